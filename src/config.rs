// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : catalog_browser — async marketplace catalog browsing core in Rust
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Browses a remote marketplace catalog (mock/sandbox/production):
          category tree navigation with shallow path caching, filtered and
          paged listings sessions with stale-response protection, thumbnail
          and listing detail fetches, Prometheus metrics.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::env;
use dotenvy::dotenv;

/// Sumber data katalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiMode {
    Mock,
    Sandbox,
    Production,
}

impl ApiMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(ApiMode::Mock),
            "sandbox" | "tmsandbox" => Some(ApiMode::Sandbox),
            "production" | "prod" | "live" => Some(ApiMode::Production),
            _ => None,
        }
    }

    pub fn from_env(key: &str, default_mode: ApiMode) -> ApiMode {
        env::var(key)
            .ok()
            .and_then(|v| Self::parse_one(&v))
            .unwrap_or(default_mode)
    }

    // Endpoint default per mode
    pub fn default_api_url(&self) -> &'static str {
        match self {
            ApiMode::Mock       => "mock://catalog/v1", // tidak dipakai saat mock
            ApiMode::Sandbox    => "https://api.tmsandbox.co.nz/v1",
            ApiMode::Production => "https://api.trademe.co.nz/v1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMode::Mock => "mock",
            ApiMode::Sandbox => "sandbox",
            ApiMode::Production => "production",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub mode: ApiMode,
    pub base_url: String,

    // OAuth (PLAINTEXT); header is omitted when key/secret are missing
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub oauth_token: Option<String>,
    pub oauth_token_secret: Option<String>,

    pub timeout_ms: u64,
    pub mock_latency_ms: u64,
}

impl ApiConfig {
    pub fn for_mode(mode: ApiMode) -> Self {
        Self {
            base_url: mode.default_api_url().to_string(),
            mode,
            consumer_key: None,
            consumer_secret: None,
            oauth_token: None,
            oauth_token_secret: None,
            timeout_ms: 15_000,
            mock_latency_ms: 40,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BrowseConfig {
    pub root_category_id: String,
    pub metrics_port: Option<u16>,
    pub log_filter: String,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn load() -> (ApiConfig, BrowseConfig) {
    // Pastikan .env dibaca (agar CATALOG_CONSUMER_KEY, dll ter-load)
    let _ = dotenv();

    // ===== Mode & endpoint =====
    let mode = ApiMode::from_env("CATALOG_MODE", ApiMode::Mock);
    let base_url = non_empty("CATALOG_API_URL")
        .unwrap_or_else(|| mode.default_api_url().to_string());

    // ===== Credentials =====
    let consumer_key       = non_empty("CATALOG_CONSUMER_KEY");
    let consumer_secret    = non_empty("CATALOG_CONSUMER_SECRET");
    let oauth_token        = non_empty("CATALOG_OAUTH_TOKEN");
    let oauth_token_secret = non_empty("CATALOG_OAUTH_TOKEN_SECRET");

    // ===== Timing =====
    let timeout_ms = env::var("CATALOG_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(15_000);
    let mock_latency_ms = env::var("MOCK_LATENCY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(40);

    let api = ApiConfig {
        mode,
        base_url,
        consumer_key,
        consumer_secret,
        oauth_token,
        oauth_token_secret,
        timeout_ms,
        mock_latency_ms,
    };

    // ===== Browsing =====
    let root_category_id = non_empty("ROOT_CATEGORY_ID").unwrap_or_else(|| "0".to_string());
    let metrics_port = env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok());
    let log_filter = non_empty("LOG_FILTER").unwrap_or_else(|| "info".to_string());

    let browse = BrowseConfig { root_category_id, metrics_port, log_filter };
    (api, browse)
}
