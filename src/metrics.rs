// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Fetch gateway --------
pub static FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("catalog_fetches_total", "completed fetches (labels: endpoint, outcome)"),
        &["endpoint", "outcome"],
    )
    .unwrap()
});

pub static FETCH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("catalog_fetch_latency_ms", "fetch latency (ms)")
            .buckets(vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
        &["endpoint"],
    )
    .unwrap()
});

pub static CANCELLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("catalog_fetches_cancelled_total", "fetches cancelled before completion"),
        &["endpoint"],
    )
    .unwrap()
});

// -------- Browsing state --------
pub static STALE_COMPLETIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "catalog_stale_completions_total",
            "completions dropped because a newer request superseded them (label: slot)",
        ),
        &["slot"],
    )
    .unwrap()
});

pub static CATEGORY_DEDUP_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "catalog_category_dedup_hits_total",
        "category fetches served by an already inflight request",
    )
    .unwrap()
});

pub static CATEGORY_LEVEL_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "catalog_category_level_hits_total",
        "ascends served from the per-level cache without a fetch",
    )
    .unwrap()
});

pub static THUMBNAILS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("catalog_thumbnails_total", "thumbnail loads (label: outcome)"),
        &["outcome"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_API_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_api_mode", "catalog api mode (label: mode)"), &["mode"])
        .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(FETCHES.clone())),
        REGISTRY.register(Box::new(FETCH_LATENCY_MS.clone())),
        REGISTRY.register(Box::new(CANCELLED.clone())),
        REGISTRY.register(Box::new(STALE_COMPLETIONS.clone())),
        REGISTRY.register(Box::new(CATEGORY_DEDUP_HITS.clone())),
        REGISTRY.register(Box::new(CATEGORY_LEVEL_HITS.clone())),
        REGISTRY.register(Box::new(THUMBNAILS.clone())),
        REGISTRY.register(Box::new(CONFIG_API_MODE.clone())),
    ] {
        // AlreadyReg on a second init is fine
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

/// Status line and body for one scrape request, keyed on its request line.
fn route(request_line: &str) -> (&'static str, Vec<u8>) {
    let mut parts = request_line.split_whitespace();
    let (method, path) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));
    let path = path.split('?').next().unwrap_or("");
    match (method, path) {
        ("GET", "/" | "/metrics") => ("200 OK", encode_metrics()),
        ("GET", _) => ("404 Not Found", b"not found\n".to_vec()),
        _ => ("405 Method Not Allowed", b"GET only\n".to_vec()),
    }
}

fn handle_scrape(stream: TcpStream) {
    let mut request_line = String::new();
    let mut reader = BufReader::new(&stream);
    if let Err(e) = reader.read_line(&mut request_line) {
        debug!(?e, "metrics request unreadable");
        return;
    }
    let (status, body) = route(&request_line);
    if !status.starts_with("200") {
        debug!(request = request_line.trim_end(), status, "metrics request rejected");
    }

    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut out = &stream;
    if let Err(e) = out.write_all(header.as_bytes()).and_then(|_| out.write_all(&body)) {
        debug!(?e, "metrics scrape write failed");
    }
}

/// Prometheus exporter on its own OS thread, one scrape at a time.
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(?e, %addr, "metrics bind failed");
                return;
            }
        };
        info!(%addr, "metrics exporter on / and /metrics");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_scrape(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
