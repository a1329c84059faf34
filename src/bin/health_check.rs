//! Chain node health probe.
//!
//! Calls the node's `/ext/health` endpoint with a 5 s timeout, prints a
//! one-line status, and exits 0 (healthy), 1 (unreachable), or
//! 2 (unhealthy).

use clap::Parser;
use serde::Deserialize;
use std::process::exit;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "health-check", about = "Probe the chain node's health endpoint")]
struct Args {
    /// Full health URL. Defaults to the configured RPC host's /ext/health.
    #[arg(long, env = "HEALTH_URL")]
    url: Option<String>,

    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct HealthResponse {
    result: HealthResult,
}

#[derive(Deserialize)]
struct HealthResult {
    healthy: bool,
}

fn derive_health_url() -> Option<String> {
    let config = avaxarb_bot::PipelineConfig::from_env().ok()?;
    let mut url = reqwest::Url::parse(&config.rpc_url).ok()?;
    url.set_path("/ext/health");
    Some(url.to_string())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let url = match args.url.or_else(derive_health_url) {
        Some(url) => url,
        None => {
            println!("unreachable: no health URL configured");
            exit(1);
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            println!("unreachable: {} ({})", url, e);
            exit(1);
        }
    };

    match client.get(&url).send().await {
        Ok(response) => match response.json::<HealthResponse>().await {
            Ok(health) if health.result.healthy => {
                println!("healthy: {}", url);
                exit(0);
            }
            Ok(_) => {
                println!("unhealthy: {}", url);
                exit(2);
            }
            Err(e) => {
                println!("unhealthy: {} (bad response: {})", url, e);
                exit(2);
            }
        },
        Err(e) => {
            println!("unreachable: {} ({})", url, e);
            exit(1);
        }
    }
}
