// ===============================
// src/gateway_http.rs
// ===============================
//
// Marketplace REST transport (reqwest).
// - JSON endpoints: Categories, Search/General, Listings
// - Thumbnails: absolute image URL, raw bytes
// - OAuth PLAINTEXT header when key/secret are configured
//
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::domain::{ListingsQuery, PAGE_SIZE};
use crate::error::{classify_response, ConfigError, FetchError, FetchErrorKind, FetchResult};
use crate::gateway::{Endpoint, RawResponse, Transport};

const USER_AGENT: &str = concat!("catalog_browser/", env!("CARGO_PKG_VERSION"));

pub struct HttpTransport {
    http: reqwest::Client,
    base: Url,
    authorization: Option<String>,
}

impl HttpTransport {
    pub fn new(cfg: &ApiConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&cfg.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: cfg.base_url.clone(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::NotABase(cfg.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;

        let authorization = oauth_header(cfg);
        if authorization.is_none() {
            warn!(base = %base, "no consumer key/secret, requests go out unsigned");
        }

        Ok(Self { http, base, authorization })
    }

    fn endpoint_url(&self, endpoint: &Endpoint) -> FetchResult<Url> {
        match endpoint {
            Endpoint::Category { id } => {
                let mut url = self.api_url(&["Categories", &format!("{id}.json")])?;
                url.query_pairs_mut()
                    .append_pair("depth", "1")
                    .append_pair("with_counts", "true");
                Ok(url)
            }
            Endpoint::Listings(query) => {
                let mut url = self.api_url(&["Search", "General.json"])?;
                append_listings_query(&mut url, query);
                Ok(url)
            }
            Endpoint::ListingDetails { id } => self.api_url(&["Listings", &format!("{id}.json")]),
            Endpoint::Thumbnail { url } => Url::parse(url)
                .map_err(|e| FetchError::invalid_request(format!("bad thumbnail url `{url}`: {e}"))),
        }
    }

    fn api_url(&self, segments: &[&str]) -> FetchResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::invalid_request("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn append_listings_query(url: &mut Url, query: &ListingsQuery) {
    let page = query.page().to_string();
    let rows = PAGE_SIZE.to_string();
    let mut pairs = url.query_pairs_mut();
    pairs.append_pair("category", query.category_id());
    if !query.search_string().is_empty() {
        pairs.append_pair("search_string", query.search_string());
    }
    pairs
        .append_pair("condition", query.condition().as_param())
        .append_pair("sort_order", query.sort().as_param())
        .append_pair("page", &page)
        .append_pair("rows", &rows);
}

/// `OAuth oauth_consumer_key="..", oauth_signature_method="PLAINTEXT", ...`
/// PLAINTEXT signature is `consumer_secret&token_secret`, both percent-encoded.
fn oauth_header(cfg: &ApiConfig) -> Option<String> {
    let key = cfg.consumer_key.as_deref()?;
    let secret = cfg.consumer_secret.as_deref()?;
    let token_secret = cfg.oauth_token_secret.as_deref().unwrap_or("");

    let signature = format!(
        "{}&{}",
        urlencoding::encode(secret),
        urlencoding::encode(token_secret)
    );
    let mut params = vec![("oauth_consumer_key", key.to_string())];
    if let Some(token) = cfg.oauth_token.as_deref() {
        params.push(("oauth_token", token.to_string()));
    }
    params.push(("oauth_signature_method", "PLAINTEXT".to_string()));
    params.push(("oauth_signature", signature));

    let joined = params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("OAuth {joined}"))
}

impl Transport for HttpTransport {
    fn send(&self, endpoint: Endpoint) -> BoxFuture<'static, FetchResult<RawResponse>> {
        let url = self.endpoint_url(&endpoint);
        let http = self.http.clone();
        // thumbnails live on the image CDN, never sign them
        let auth = match endpoint {
            Endpoint::Thumbnail { .. } => None,
            _ => self.authorization.clone(),
        };
        let is_image = matches!(endpoint, Endpoint::Thumbnail { .. });

        async move {
            let url = url?;
            debug!(%url, "GET");
            let mut req = http.get(url);
            if let Some(auth) = auth {
                req = req.header(AUTHORIZATION, auth);
            }

            let rsp = req.send().await?;
            let status = rsp.status().as_u16();
            let body = rsp.bytes().await?;

            if is_image {
                if !(200..300).contains(&status) {
                    return Err(FetchError::new(FetchErrorKind::from_status(status)).with_status(status));
                }
                return Ok(RawResponse::Bytes(body.to_vec()));
            }

            let value = classify_response(status, &body)?;
            Ok(RawResponse::Json(value))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::ApiMode;
    use crate::domain::{Condition, SortOrder};

    fn config(base_url: String) -> ApiConfig {
        ApiConfig {
            base_url,
            timeout_ms: 2_000,
            ..ApiConfig::for_mode(ApiMode::Sandbox)
        }
    }

    fn signed(base_url: String) -> ApiConfig {
        ApiConfig {
            consumer_key: Some("KEY".into()),
            consumer_secret: Some("SECRET".into()),
            oauth_token: Some("TOKEN".into()),
            oauth_token_secret: Some("TOKSEC".into()),
            ..config(base_url)
        }
    }

    #[test]
    fn oauth_header_is_plaintext() {
        let header = oauth_header(&signed("https://x.test/v1".into())).unwrap();
        assert_eq!(
            header,
            "OAuth oauth_consumer_key=\"KEY\", oauth_token=\"TOKEN\", \
             oauth_signature_method=\"PLAINTEXT\", oauth_signature=\"SECRET%26TOKSEC\""
        );
        assert!(oauth_header(&config("https://x.test/v1".into())).is_none());
    }

    #[test]
    fn bad_base_url_is_config_error() {
        let err = HttpTransport::new(&config("not a url".into())).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
        let err = HttpTransport::new(&config("mailto:ops@x.test".into())).err().unwrap();
        assert!(matches!(err, ConfigError::NotABase(_)));
    }

    #[tokio::test]
    async fn category_request_is_signed_and_shallow() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/Categories/0001.json")
                    .query_param("depth", "1")
                    .query_param("with_counts", "true")
                    .header_exists("authorization");
                then.status(200).json_body(json!({
                    "Number": "0001", "Name": "Cars", "Path": "/Cars", "Count": 120, "Subcategories": []
                }));
            })
            .await;

        let transport = HttpTransport::new(&signed(server.url("/v1"))).unwrap();
        let raw = transport.send(Endpoint::Category { id: "0001".into() }).await.unwrap();

        m.assert_async().await;
        assert_eq!(raw.into_json().unwrap()["Name"], json!("Cars"));
    }

    #[tokio::test]
    async fn listings_query_string() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/Search/General.json")
                    .query_param("category", "0001")
                    .query_param("search_string", "omega")
                    .query_param("condition", "Used")
                    .query_param("sort_order", "PriceAsc")
                    .query_param("page", "3")
                    .query_param("rows", "20");
                then.status(200).json_body(json!({ "TotalCount": 0, "List": [] }));
            })
            .await;

        let query = ListingsQuery::new("0001")
            .with_search_string("omega")
            .with_condition(Condition::Used)
            .with_sort(SortOrder::LowestPrice)
            .with_page(3);
        let transport = HttpTransport::new(&config(server.url("/v1"))).unwrap();
        transport.send(Endpoint::Listings(query)).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let server = MockServer::start_async().await;
        for (id, status) in [(1u64, 401u16), (2, 429), (3, 503), (4, 500), (5, 404)] {
            server
                .mock_async(move |when, then| {
                    when.method(GET).path(format!("/v1/Listings/{id}.json"));
                    then.status(status)
                        .json_body(json!({ "ErrorDescription": format!("status {status}") }));
                })
                .await;
        }
        let transport = HttpTransport::new(&config(server.url("/v1"))).unwrap();

        let mut kinds = Vec::new();
        for id in 1..=5u64 {
            let err = transport.send(Endpoint::ListingDetails { id }).await.unwrap_err();
            kinds.push(err.kind());
        }
        assert_eq!(
            kinds,
            vec![
                FetchErrorKind::AuthenticationFailure,
                FetchErrorKind::RateLimited,
                FetchErrorKind::PlannedOutage,
                FetchErrorKind::UnplannedOutage,
                FetchErrorKind::InvalidRequest,
            ]
        );
    }

    #[tokio::test]
    async fn thumbnail_is_unsigned_bytes() {
        let server = MockServer::start_async().await;
        let signed_hit = server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/6215751.jpg").header_exists("authorization");
                then.status(500);
            })
            .await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/6215751.jpg");
                then.status(200).body(vec![0xFF, 0xD8, 0xFF]);
            })
            .await;

        let transport = HttpTransport::new(&signed(server.url("/v1"))).unwrap();
        let raw = transport
            .send(Endpoint::Thumbnail { url: server.url("/photos/6215751.jpg") })
            .await
            .unwrap();
        m.assert_async().await;
        signed_hit.assert_hits_async(0).await;
        assert_eq!(raw, RawResponse::Bytes(vec![0xFF, 0xD8, 0xFF]));
    }

    #[tokio::test]
    async fn unreachable_host_is_network() {
        let transport = HttpTransport::new(&config("http://127.0.0.1:1/v1".into())).unwrap();
        let err = transport.send(Endpoint::ListingDetails { id: 1 }).await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Network);

        let err = transport
            .send(Endpoint::Thumbnail { url: "::nope::".into() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::InvalidRequest);
    }
}
