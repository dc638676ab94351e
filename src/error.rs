// ===============================
// src/error.rs
// ===============================
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;

/// Closed set of failure classes every catalog fetch can end in.
/// All of them are terminal for the request that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FetchErrorKind {
    Network,
    BadRequest,
    InvalidDataFormat,
    AuthenticationFailure,
    RateLimited,
    PlannedOutage,
    UnplannedOutage,
    InvalidRequest,
}

impl FetchErrorKind {
    /// Text the UI can show as-is.
    pub fn message(&self) -> &'static str {
        match self {
            FetchErrorKind::Network => {
                "Unable to reach the marketplace. Check your connection and try again."
            }
            FetchErrorKind::BadRequest => "The marketplace could not process this request.",
            FetchErrorKind::InvalidDataFormat => {
                "The marketplace sent data in an unexpected format."
            }
            FetchErrorKind::AuthenticationFailure => "Signing in to the marketplace failed.",
            FetchErrorKind::RateLimited => "Too many requests. Wait a moment and try again.",
            FetchErrorKind::PlannedOutage => {
                "The marketplace is down for scheduled maintenance. Try again later."
            }
            FetchErrorKind::UnplannedOutage => {
                "The marketplace is having problems right now. Try again later."
            }
            FetchErrorKind::InvalidRequest => "The requested item is not available.",
        }
    }

    /// Short label, used as a metrics label value.
    pub fn label(&self) -> &'static str {
        match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::BadRequest => "bad_request",
            FetchErrorKind::InvalidDataFormat => "invalid_data_format",
            FetchErrorKind::AuthenticationFailure => "authentication_failure",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::PlannedOutage => "planned_outage",
            FetchErrorKind::UnplannedOutage => "unplanned_outage",
            FetchErrorKind::InvalidRequest => "invalid_request",
        }
    }

    /// Class of a non-2xx HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => FetchErrorKind::BadRequest,
            401 | 403 => FetchErrorKind::AuthenticationFailure,
            429 => FetchErrorKind::RateLimited,
            503 => FetchErrorKind::PlannedOutage,
            500..=599 => FetchErrorKind::UnplannedOutage,
            _ => FetchErrorKind::InvalidRequest,
        }
    }
}

/// Error value surfaced by every fetch-producing operation.
///
/// `Display` is the per-kind user message; `detail` keeps whatever the
/// server or transport said, for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.kind.message())]
pub struct FetchError {
    kind: FetchErrorKind,
    status: Option<u16>,
    detail: Option<String>,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind) -> Self {
        Self { kind, status: None, detail: None }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network).with_detail(detail)
    }

    pub fn invalid_data(detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidDataFormat).with_detail(detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidRequest).with_detail(detail)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn message(&self) -> &'static str {
        self.kind.message()
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::new(FetchErrorKind::from_status(status.as_u16()))
                .with_status(status.as_u16())
                .with_detail(e.to_string());
        }
        let kind = if e.is_builder() {
            FetchErrorKind::InvalidRequest
        } else if e.is_decode() {
            FetchErrorKind::InvalidDataFormat
        } else {
            // connect, timeout, body read, redirect loops
            FetchErrorKind::Network
        };
        FetchError::new(kind).with_detail(e.to_string())
    }
}

/// Yielded instead of a response once the request has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request cancelled")]
pub struct Cancelled;

/// Navigation rejected by the category path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("category {0} is already on the path")]
    DuplicateId(String),
    #[error("category {child} is not a subcategory of {parent}")]
    UnknownChild { parent: String, child: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid catalog url `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("catalog url `{0}` cannot be used as a base")]
    NotABase(String),
    #[error("failed to build http client")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} `{value}`")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}

/// Decodes a JSON endpoint response, classifying HTTP- and payload-level
/// failures into the fetch taxonomy.
pub fn classify_response(status: u16, body: &[u8]) -> FetchResult<Value> {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let description = parsed.as_ref().and_then(error_description);

    if !(200..300).contains(&status) {
        let mut err = FetchError::new(FetchErrorKind::from_status(status)).with_status(status);
        if let Some(d) = description {
            err = err.with_detail(d);
        }
        return Err(err);
    }

    match (parsed, description) {
        (None, _) => Err(FetchError::invalid_data("response body is not valid JSON").with_status(status)),
        (Some(_), Some(d)) => Err(FetchError::new(FetchErrorKind::BadRequest)
            .with_status(status)
            .with_detail(d)),
        (Some(v), None) => Ok(v),
    }
}

fn error_description(v: &Value) -> Option<String> {
    v.get("ErrorDescription")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
