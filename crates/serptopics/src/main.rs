use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serptopics_core::{Cluster, MatchMode, SerpQuery, SerpSnapshot, SiteMatcher};
use serptopics_local::{
    cannibalization, cluster, dataforseo::DataForSeoClient, labeler, sitemap, SnapshotCache,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "serptopics")]
#[command(about = "SERP-based keyword clustering and cannibalization analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch (and cache) SERP snapshots for a keyword list (writes a JSON artifact).
    FetchSerps(FetchSerpsCmd),
    /// Group keywords into clusters by SERP overlap (writes a JSON artifact).
    Cluster(ClusterCmd),
    /// Map clusters onto a site's ranking URLs and flag cannibalization issues.
    Cannibalize(CannibalizeCmd),
    /// Label clusters through an OpenAI-compatible endpoint.
    Label(LabelCmd),
    /// Fetch, cluster, map, and detect in one pass.
    Run(RunCmd),
    /// Collect page URLs from a sitemap (and nested sitemaps).
    Sitemap(SitemapCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor,
    /// Print version info.
    Version,
}

#[derive(clap::Args, Debug)]
struct FetchSerpsCmd {
    /// Keyword list, one per line; blank lines and duplicates are dropped.
    #[arg(long)]
    keywords: PathBuf,
    /// Provider location code (2840 = United States).
    #[arg(long, default_value_t = 2840)]
    location_code: u32,
    #[arg(long, default_value = "en")]
    language_code: String,
    /// Snapshot cache directory (default: a per-user temp dir).
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Treat cached snapshots as stale and refetch everything.
    #[arg(long, default_value_t = false)]
    refresh: bool,
    /// Output JSON path (default: stdout).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ClusterCmd {
    /// Snapshot artifact from `fetch-serps` (keyword -> snapshot JSON).
    #[arg(long)]
    serps: PathBuf,
    /// Minimum SERP overlap percentage for joining a cluster.
    #[arg(long, default_value_t = 80.0)]
    threshold: f64,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct CannibalizeCmd {
    #[arg(long)]
    serps: PathBuf,
    /// Cluster artifact from `cluster`.
    #[arg(long)]
    clusters: PathBuf,
    /// Target site pattern to match ranking URLs against.
    #[arg(long)]
    site: String,
    /// URL matching mode. Allowed: substring, host
    #[arg(long, default_value = "substring")]
    match_mode: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct LabelCmd {
    #[arg(long)]
    serps: PathBuf,
    #[arg(long)]
    clusters: PathBuf,
    /// Model override (otherwise SERPTOPICS_OPENAI_COMPAT_MODEL).
    #[arg(long)]
    model: Option<String>,
    /// Bounded in-flight labeling requests.
    #[arg(long, default_value_t = 4)]
    max_in_flight: usize,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct RunCmd {
    #[arg(long)]
    keywords: PathBuf,
    #[arg(long)]
    site: String,
    #[arg(long, default_value_t = 80.0)]
    threshold: f64,
    /// URL matching mode. Allowed: substring, host
    #[arg(long, default_value = "substring")]
    match_mode: String,
    #[arg(long, default_value_t = 2840)]
    location_code: u32,
    #[arg(long, default_value = "en")]
    language_code: String,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Also label clusters (requires the OpenAI-compat env configuration).
    #[arg(long, default_value_t = false)]
    label: bool,
    #[arg(long, default_value_t = 4)]
    max_in_flight: usize,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct SitemapCmd {
    /// Sitemap URL (sitemap indexes are followed).
    #[arg(long)]
    url: String,
    /// Maximum nesting depth for sitemap indexes.
    #[arg(long, default_value_t = 3)]
    max_depth: usize,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn default_cache_dir() -> PathBuf {
    // Keep it local + user-owned; caller can override.
    std::env::temp_dir().join("serptopics-cache")
}

fn read_keywords(path: &PathBuf) -> Result<Vec<String>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading keywords from {}", path.display()))?;
    let mut out: Vec<String> = Vec::new();
    for line in body.lines() {
        let kw = line.trim();
        if kw.is_empty() {
            continue;
        }
        if !out.iter().any(|k| k == kw) {
            out.push(kw.to_string());
        }
    }
    Ok(out)
}

fn read_serps(path: &PathBuf) -> Result<BTreeMap<String, SerpSnapshot>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshots from {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&body)
        .with_context(|| format!("parsing snapshots in {}", path.display()))?;
    // Accept both the fetch-serps artifact and a bare keyword -> snapshot map.
    let map_value = value.get("serps").cloned().unwrap_or(value);
    serde_json::from_value(map_value)
        .with_context(|| format!("parsing snapshots in {}", path.display()))
}

#[derive(serde::Deserialize)]
struct ClusterArtifact {
    clusters: Vec<Cluster>,
}

fn read_clusters(path: &PathBuf) -> Result<Vec<Cluster>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading clusters from {}", path.display()))?;
    let artifact: ClusterArtifact = serde_json::from_str(&body)
        .with_context(|| format!("parsing clusters in {}", path.display()))?;
    Ok(artifact.clusters)
}

fn parse_match_mode(s: &str) -> Result<MatchMode> {
    match s {
        "substring" => Ok(MatchMode::Substring),
        "host" => Ok(MatchMode::Host),
        other => bail!("unknown match mode {other:?} (allowed: substring, host)"),
    }
}

fn write_artifact(out: &Option<PathBuf>, value: &serde_json::Value) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, body)
                .with_context(|| format!("writing artifact to {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("serptopics/0.1")
        .build()
        .context("building http client")
}

async fn cmd_fetch_serps(cmd: FetchSerpsCmd) -> Result<()> {
    let keywords = read_keywords(&cmd.keywords)?;
    let query = SerpQuery {
        location_code: cmd.location_code,
        language_code: cmd.language_code.clone(),
        ..SerpQuery::default()
    };
    let cache_dir = cmd.cache_dir.clone().unwrap_or_else(default_cache_dir);
    let cache = if cmd.refresh {
        // TTL 0 turns every cached entry into a miss while still writing
        // fresh results back.
        SnapshotCache::with_ttl(cache_dir, 0)
    } else {
        SnapshotCache::new(cache_dir)
    };

    let source = DataForSeoClient::from_env(http_client()?)?;
    let snapshots =
        serptopics_local::fetch_snapshots(&source, Some(&cache), &keywords, &query).await;

    write_artifact(
        &cmd.out,
        &serde_json::json!({
            "requested_keywords": keywords.len(),
            "fetched_keywords": snapshots.len(),
            "serps": snapshots,
        }),
    )
}

fn cmd_cluster(cmd: ClusterCmd) -> Result<()> {
    let serps = read_serps(&cmd.serps)?;
    let keywords: Vec<String> = serps.keys().cloned().collect();
    let (clusters, index) = cluster::cluster_keywords(&keywords, &serps, cmd.threshold);

    write_artifact(
        &cmd.out,
        &serde_json::json!({
            "threshold": cmd.threshold,
            "cluster_count": clusters.len(),
            "clusters": clusters,
            "cluster_index": index,
        }),
    )
}

fn cmd_cannibalize(cmd: CannibalizeCmd) -> Result<()> {
    let serps = read_serps(&cmd.serps)?;
    let clusters = read_clusters(&cmd.clusters)?;
    let matcher = SiteMatcher::new(cmd.site.clone(), parse_match_mode(&cmd.match_mode)?);

    let owned = cannibalization::map_owned_urls(&clusters, &serps, &matcher);
    let issues = cannibalization::detect_cannibalization(&owned);

    write_artifact(
        &cmd.out,
        &serde_json::json!({
            "site": cmd.site,
            "match_mode": cmd.match_mode,
            "issue_count": issues.len(),
            "owned_urls": owned,
            "issues": issues,
        }),
    )
}

async fn cmd_label(cmd: LabelCmd) -> Result<()> {
    let serps = read_serps(&cmd.serps)?;
    let clusters = read_clusters(&cmd.clusters)?;
    let labeler_client =
        labeler::OpenAiCompatLabeler::from_env(http_client()?, cmd.model.clone())?;

    let labels =
        labeler::label_clusters(&labeler_client, &clusters, &serps, cmd.max_in_flight).await;

    write_artifact(
        &cmd.out,
        &serde_json::json!({
            "cluster_count": clusters.len(),
            "labeled_count": labels.len(),
            "labels": labels,
        }),
    )
}

async fn cmd_run(cmd: RunCmd) -> Result<()> {
    let match_mode = parse_match_mode(&cmd.match_mode)?;
    let keywords = read_keywords(&cmd.keywords)?;
    let query = SerpQuery {
        location_code: cmd.location_code,
        language_code: cmd.language_code.clone(),
        ..SerpQuery::default()
    };
    let cache = SnapshotCache::new(cmd.cache_dir.clone().unwrap_or_else(default_cache_dir));

    let source = DataForSeoClient::from_env(http_client()?)?;
    let serps = serptopics_local::fetch_snapshots(&source, Some(&cache), &keywords, &query).await;

    let (clusters, index) = cluster::cluster_keywords(&keywords, &serps, cmd.threshold);
    let matcher = SiteMatcher::new(cmd.site.clone(), match_mode);
    let owned = cannibalization::map_owned_urls(&clusters, &serps, &matcher);
    let issues = cannibalization::detect_cannibalization(&owned);

    let labels = if cmd.label {
        let labeler_client = labeler::OpenAiCompatLabeler::from_env(http_client()?, None)?;
        labeler::label_clusters(&labeler_client, &clusters, &serps, cmd.max_in_flight).await
    } else {
        BTreeMap::new()
    };

    write_artifact(
        &cmd.out,
        &serde_json::json!({
            "site": cmd.site,
            "threshold": cmd.threshold,
            "requested_keywords": keywords.len(),
            "fetched_keywords": serps.len(),
            "cluster_count": clusters.len(),
            "issue_count": issues.len(),
            "clusters": clusters,
            "cluster_index": index,
            "labels": labels,
            "owned_urls": owned,
            "issues": issues,
        }),
    )
}

async fn cmd_sitemap(cmd: SitemapCmd) -> Result<()> {
    let urls = sitemap::fetch_sitemap_urls(&http_client()?, &cmd.url, cmd.max_depth).await?;
    write_artifact(
        &cmd.out,
        &serde_json::json!({
            "sitemap": cmd.url,
            "url_count": urls.len(),
            "urls": urls,
        }),
    )
}

fn env_is_set(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

fn cmd_doctor() -> Result<()> {
    // Presence only; never echo values.
    write_artifact(
        &None,
        &serde_json::json!({
            "ok": true,
            "dataforseo": {
                "login_set": env_is_set("SERPTOPICS_DATAFORSEO_LOGIN"),
                "password_set": env_is_set("SERPTOPICS_DATAFORSEO_PASSWORD"),
                "endpoint_override_set": env_is_set("SERPTOPICS_DATAFORSEO_ENDPOINT"),
            },
            "openai_compat": {
                "base_url_set": env_is_set("SERPTOPICS_OPENAI_COMPAT_BASE_URL"),
                "api_key_set": env_is_set("SERPTOPICS_OPENAI_COMPAT_API_KEY"),
                "model_set": env_is_set("SERPTOPICS_OPENAI_COMPAT_MODEL"),
            },
            "default_cache_dir": default_cache_dir(),
        }),
    )
}

fn cmd_version() -> Result<()> {
    write_artifact(
        &None,
        &serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::FetchSerps(cmd) => cmd_fetch_serps(cmd).await,
        Commands::Cluster(cmd) => cmd_cluster(cmd),
        Commands::Cannibalize(cmd) => cmd_cannibalize(cmd),
        Commands::Label(cmd) => cmd_label(cmd).await,
        Commands::Run(cmd) => cmd_run(cmd).await,
        Commands::Sitemap(cmd) => cmd_sitemap(cmd).await,
        Commands::Doctor => cmd_doctor(),
        Commands::Version => cmd_version(),
    }
}
