//! cloudfetch: fetch provider data through the cache and resilience core
//!
//! Performs one or more `get_or_fetch` calls against an HTTP endpoint and
//! prints each envelope as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cloudfetch::providers::HttpFetcher;
use cloudfetch::{CloudFetchBuilder, Config, Params, Provider, ServiceType};

/// Cached, rate-limited, circuit-broken fetch of provider pricing data
#[derive(Parser)]
#[command(name = "cloudfetch")]
#[command(version)]
#[command(about = "Fetch cloud provider data through the cloudfetch core")]
struct Args {
    /// Config file (default: ~/.cloudfetch/config.toml, then /etc/cloudfetch/config.toml)
    #[arg(short, long, env = "CLOUDFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Provider: aws, azure, gcp, ibm or alibaba
    provider: Provider,

    /// Service type, e.g. pricing, compute, cost_estimation
    service: ServiceType,

    /// Region the data is for
    region: String,

    /// Endpoint returning JSON
    #[arg(short, long)]
    url: String,

    /// Cache-key parameter as name=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,

    /// Query-string parameter as name=value (repeatable)
    #[arg(short, long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Request header as name=value (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    /// Bearer token for the endpoint
    #[arg(long, env = "CLOUDFETCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Number of times to request the same key
    #[arg(short, long, default_value_t = 1)]
    repeat: u32,

    /// Print compact JSON
    #[arg(long)]
    compact: bool,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got {s:?}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every request produced data.
async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let config = Config::discover(args.config.as_deref())?;
    let coordinator = CloudFetchBuilder::from_config(config).build()?;

    let mut fetcher = HttpFetcher::new(&args.url);
    for (name, value) in &args.query {
        fetcher = fetcher.query(name, value);
    }
    for (name, value) in &args.headers {
        fetcher = fetcher.header(name, value);
    }
    if let Some(token) = &args.token {
        fetcher = fetcher.bearer_token(token);
    }

    let params: Params = args.params.into_iter().collect();
    let mut all_ok = true;
    for _ in 0..args.repeat.max(1) {
        let result = coordinator
            .get_or_fetch(
                args.provider,
                args.service,
                args.region.as_str(),
                params.clone(),
                &fetcher,
            )
            .await;
        match result {
            Ok(envelope) => {
                let json = if args.compact {
                    serde_json::to_string(&envelope)?
                } else {
                    serde_json::to_string_pretty(&envelope)?
                };
                println!("{json}");
            }
            Err(e) => {
                all_ok = false;
                eprintln!("fetch failed: {e}");
            }
        }
    }
    Ok(all_ok)
}
