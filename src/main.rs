// ===============================
// src/main.rs
// ===============================
/*
 # offline (mock marketplace), descend Cars > Motorbikes, cheapest first
 cargo run -- --open 0001 --open 0001-0268 --sort lowest-price --thumbnails

 # sandbox, signed
 CATALOG_MODE=sandbox CATALOG_CONSUMER_KEY=... CATALOG_CONSUMER_SECRET=... \
   cargo run -- --open 0002 --search laptop --details 6215800

 # metrics
 METRICS_PORT=9898 cargo run -- --open 0001 && curl -s localhost:9898/metrics | grep '^catalog_'
*/
/*
=============================================================================
Project : catalog_browser — async marketplace catalog browsing core in Rust
Module  : main.rs
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
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use catalog_browser::config;
use catalog_browser::metrics;
use catalog_browser::{
    fetch_details, BrowseState, CategoryBrowser, CategoryNode, CategoryRepository, Condition,
    ConfigError, FetchError, FetchGateway, ListingsQuery, ListingsResult, ListingsSession,
    NavigationError, SessionEvent, SessionState, SortOrder, ThumbnailRequest, ThumbnailState,
};

#[derive(Parser, Debug)]
#[command(name = "catalog_browser", version, about = "Browse the marketplace catalog from the terminal")]
struct Cli {
    /// Category id to descend into (repeat to go deeper)
    #[arg(long = "open", value_name = "ID")]
    open: Vec<String>,

    /// Search text for the listings query
    #[arg(long)]
    search: Option<String>,

    /// all | new | used
    #[arg(long, default_value = "all")]
    condition: Condition,

    /// featured, lowest-price, highest-price, lowest-buy-now, highest-buy-now,
    /// most-bids, latest, closing-soon, title
    #[arg(long, default_value = "featured")]
    sort: SortOrder,

    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Also load thumbnails of the listed items
    #[arg(long)]
    thumbnails: bool,

    /// Show the detail record of one listing
    #[arg(long, value_name = "LISTING_ID")]
    details: Option<u64>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("nothing pending, state is {0}")]
    Unsettled(&'static str),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ---- Load config ----
    let (api, browse) = config::load();

    // ---- Logging (RUST_LOG wins over LOG_FILTER) ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&browse.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Metrics ----
    metrics::init();
    if let Some(port) = browse.metrics_port {
        tokio::spawn(metrics::serve_metrics(port));
    }

    info!(
        mode = api.mode.as_str(),
        base_url = %api.base_url,
        signed = api.consumer_key.is_some() && api.consumer_secret.is_some(),
        timeout_ms = api.timeout_ms,
        root = %browse.root_category_id,
        "startup config"
    );
    metrics::CONFIG_API_MODE
        .with_label_values(&[api.mode.as_str()])
        .set(1);

    if let Err(e) = run(cli, api, browse).await {
        match &e {
            AppError::Fetch(f) => error!(kind = f.kind().label(), status = ?f.status(), detail = ?f.detail(), "{e}"),
            _ => error!("{e}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, api: config::ApiConfig, browse: config::BrowseConfig) -> Result<(), AppError> {
    let gateway = FetchGateway::from_config(&api)?;

    // ---- Categories ----
    let repo = CategoryRepository::new(gateway.clone(), browse.root_category_id);
    let mut browser = CategoryBrowser::new(repo);
    browser.load();
    let mut node = settle_category(&mut browser).await?;
    for id in &cli.open {
        browser.descend(id)?;
        node = settle_category(&mut browser).await?;
    }
    print_category(&browser, &node, cli.json)?;

    // ---- Listings ----
    let mut query = ListingsQuery::new(node.id())
        .with_condition(cli.condition)
        .with_sort(cli.sort);
    if let Some(search) = &cli.search {
        query = query.with_search_string(search.as_str());
    }
    query = query.with_page(cli.page);

    let mut session = ListingsSession::new(gateway.clone(), query);
    session.reload();
    let result = settle_listings(&mut session).await?;
    print_listings(&session, &result, cli.json)?;

    // ---- Thumbnails ----
    if cli.thumbnails {
        let started = result
            .items
            .iter()
            .filter(|i| session.request_thumbnail(i.id) == ThumbnailRequest::Started)
            .count();
        info!(started, "thumbnail loads issued");
        while session.settle().await.is_some() {}
        print_thumbnails(&session, &result, cli.json)?;
    }

    // ---- Details ----
    if let Some(listing_id) = cli.details {
        let details = fetch_details(&gateway, listing_id).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&details)?);
        } else {
            println!("\nListing {}", details.id);
            for (k, v) in &details.fields {
                println!("  {k:<14} {v}");
            }
        }
    }

    session.close();
    Ok(())
}

async fn settle_category(browser: &mut CategoryBrowser) -> Result<Arc<CategoryNode>, AppError> {
    while let Some(applied) = browser.settle().await {
        if applied {
            break;
        }
    }
    match browser.state() {
        BrowseState::Loaded(node) => Ok(node),
        BrowseState::Failed { error, .. } => Err(error.into()),
        BrowseState::Idle => Err(AppError::Unsettled("idle")),
        BrowseState::Loading { .. } => Err(AppError::Unsettled("loading")),
    }
}

async fn settle_listings(session: &mut ListingsSession) -> Result<Arc<ListingsResult>, AppError> {
    while let Some(event) = session.settle().await {
        if event == SessionEvent::Listings {
            break;
        }
    }
    match session.state() {
        SessionState::Loaded { result, .. } => Ok(result),
        SessionState::Failed { error, .. } => Err(error.into()),
        SessionState::Idle => Err(AppError::Unsettled("idle")),
        SessionState::Loading { .. } => Err(AppError::Unsettled("loading")),
    }
}

fn print_category(browser: &CategoryBrowser, node: &CategoryNode, as_json: bool) -> Result<(), AppError> {
    if as_json {
        let out = json!({ "path": browser.path(), "category": node });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    let trail: Vec<&str> = browser.path().iter().map(|n| n.name()).collect();
    println!("{}  ({} listings)", trail.join(" > "), node.listings_count());
    match node.children() {
        Some([]) | None => println!("  (no subcategories)"),
        Some(children) => {
            for c in children {
                let mark = if c.is_leaf() { " " } else { ">" };
                println!("  {mark} {:<16} {:<24} {:>6}", c.id(), c.name(), c.listings_count());
            }
        }
    }
    Ok(())
}

fn print_listings(session: &ListingsSession, result: &ListingsResult, as_json: bool) -> Result<(), AppError> {
    if as_json {
        let out = json!({ "query": session.query(), "result": result });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    let q = session.query();
    println!(
        "\nListings: {} result(s), page {}/{} [{} | {}{}]",
        result.total_count,
        q.page(),
        result.page_count().max(1),
        q.sort(),
        q.condition().as_param(),
        if q.search_string().is_empty() { String::new() } else { format!(" | \"{}\"", q.search_string()) },
    );
    for item in &result.items {
        let photo = if item.thumbnail_url.is_some() { "*" } else { " " };
        println!("  {photo} {:>10}  {}", item.id, item.title);
    }
    Ok(())
}

fn print_thumbnails(session: &ListingsSession, result: &ListingsResult, as_json: bool) -> Result<(), AppError> {
    let rows: Vec<(u64, ThumbnailState)> = result
        .items
        .iter()
        .map(|i| (i.id, session.thumbnail_state(i.id)))
        .collect();

    if as_json {
        let out: Vec<_> = rows
            .iter()
            .map(|(id, state)| match state {
                ThumbnailState::Loaded(img) => json!({ "item_id": id, "state": "loaded", "bytes": img.len() }),
                ThumbnailState::Failed(e) => json!({ "item_id": id, "state": "failed", "error": e.kind() }),
                ThumbnailState::Loading => json!({ "item_id": id, "state": "loading" }),
                ThumbnailState::NotLoaded => json!({ "item_id": id, "state": "not_loaded" }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\nThumbnails:");
    for (id, state) in rows {
        match state {
            ThumbnailState::Loaded(img) => println!("  {id:>10}  {} bytes", img.len()),
            ThumbnailState::Failed(e) => println!("  {id:>10}  failed: {e}"),
            ThumbnailState::Loading => println!("  {id:>10}  loading"),
            ThumbnailState::NotLoaded => println!("  {id:>10}  -"),
        }
    }
    Ok(())
}
