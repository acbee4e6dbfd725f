//! CLI for failover operations

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use shardpilot::common::{parse_duration, retry_with_backoff};

#[derive(Parser)]
#[command(name = "shardpilot")]
#[command(about = "shardpilot failover coordination CLI")]
#[command(version)]
struct Cli {
    /// Admin daemon URL
    #[arg(long, default_value = "http://localhost:7000")]
    admin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a shard's recorded topology
    Topology {
        #[arg(long)]
        keyspace: String,

        #[arg(long)]
        shard: String,
    },

    /// Register a shard
    InitShard {
        #[arg(long)]
        keyspace: String,

        #[arg(long)]
        shard: String,
    },

    /// Register a node in a shard
    InitNode {
        #[arg(long)]
        keyspace: String,

        #[arg(long)]
        shard: String,

        #[arg(long)]
        cell: String,

        #[arg(long)]
        uid: u32,

        /// Control endpoint
        #[arg(long)]
        addr: String,

        /// Replication endpoint
        #[arg(long)]
        db_addr: String,

        /// Register as the shard's current primary
        #[arg(long)]
        primary: bool,
    },

    /// Re-point a shard at an already-promoted candidate primary
    Reparent {
        #[arg(long)]
        keyspace: String,

        #[arg(long)]
        shard: String,

        #[arg(long)]
        cell: String,

        #[arg(long)]
        uid: u32,

        /// Relax fatal pre-checks (never the already-primary check)
        #[arg(long)]
        force: bool,

        /// Bound on waiting for node outcomes (e.g. "60s", "2m")
        #[arg(long, default_value = "60s")]
        timeout: String,
    },
}

fn transport_error(e: reqwest::Error) -> shardpilot::Error {
    if e.is_timeout() {
        shardpilot::Error::Timeout(e.to_string())
    } else {
        shardpilot::Error::ConnectionFailed(e.to_string())
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
) -> shardpilot::Result<reqwest::Response> {
    client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(transport_error)
}

async fn get_json(client: &reqwest::Client, url: &str) -> shardpilot::Result<reqwest::Response> {
    client.get(url).send().await.map_err(transport_error)
}

async fn fail_from_envelope(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let message = resp
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| format!("HTTP {}", status));
    anyhow::anyhow!(message)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let retries = 3;
    let backoff = std::time::Duration::from_millis(250);

    match cli.command {
        Commands::Topology { keyspace, shard } => {
            let url = format!("{}/v1/topology/{}/{}", cli.admin, keyspace, shard);
            let resp =
                retry_with_backoff(|| get_json(&client, &url), retries, backoff).await?;
            if !resp.status().is_success() {
                return Err(fail_from_envelope(resp).await);
            }
            let body: Value = resp.json().await?;
            let primary = body["shard"]["primary"]
                .as_object()
                .map(|p| format!("{}-{}", p["cell"].as_str().unwrap_or("?"), p["uid"]))
                .unwrap_or_else(|| "none".to_string());
            println!("Shard {}/{}:", keyspace, shard);
            println!("  Primary: {}", primary);
            for node in body["nodes"].as_array().into_iter().flatten() {
                println!(
                    "  {}-{}  {}  {}  db={}",
                    node["id"]["cell"].as_str().unwrap_or("?"),
                    node["id"]["uid"],
                    node["role"].as_str().unwrap_or("?"),
                    node["serving"].as_str().unwrap_or("?"),
                    node["db_addr"].as_str().unwrap_or("?"),
                );
            }
        }

        Commands::InitShard { keyspace, shard } => {
            let url = format!("{}/v1/shards", cli.admin);
            let body = json!({ "keyspace": keyspace, "shard": shard });
            let resp =
                retry_with_backoff(|| post_json(&client, &url, &body), retries, backoff).await?;
            if !resp.status().is_success() {
                return Err(fail_from_envelope(resp).await);
            }
            println!("Created shard {}/{}", keyspace, shard);
        }

        Commands::InitNode {
            keyspace,
            shard,
            cell,
            uid,
            addr,
            db_addr,
            primary,
        } => {
            let url = format!("{}/v1/nodes", cli.admin);
            let body = json!({
                "keyspace": keyspace,
                "shard": shard,
                "cell": cell,
                "uid": uid,
                "addr": addr,
                "db_addr": db_addr,
                "role": if primary { "primary" } else { "replica" },
            });
            let resp =
                retry_with_backoff(|| post_json(&client, &url, &body), retries, backoff).await?;
            if !resp.status().is_success() {
                return Err(fail_from_envelope(resp).await);
            }
            println!("Created node {}-{} in {}/{}", cell, uid, keyspace, shard);
        }

        Commands::Reparent {
            keyspace,
            shard,
            cell,
            uid,
            force,
            timeout,
        } => {
            let wait_timeout = parse_duration(&timeout)?;
            let url = format!("{}/v1/reparent", cli.admin);
            let body = json!({
                "keyspace": keyspace,
                "shard": shard,
                "candidate": { "cell": cell, "uid": uid },
                "force": force,
                "wait_timeout_secs": wait_timeout.as_secs(),
            });
            let resp =
                retry_with_backoff(|| post_json(&client, &url, &body), retries, backoff).await?;

            match resp.status().as_u16() {
                200 => {
                    println!("Reparent complete: {}/{} primary is now {}-{}", keyspace, shard, cell, uid);
                }
                207 => {
                    let body: Value = resp.json().await?;
                    println!(
                        "Reparent committed: {}/{} primary is now {}-{}",
                        keyspace, shard, cell, uid
                    );
                    let lagging: Vec<&str> = body["lagging"]
                        .as_array()
                        .into_iter()
                        .flatten()
                        .filter_map(|n| n.as_str())
                        .collect();
                    for node in &lagging {
                        println!("  did not follow: {}", node);
                    }
                    bail!("{} node(s) did not follow the new primary", lagging.len());
                }
                _ => return Err(fail_from_envelope(resp).await),
            }
        }
    }

    Ok(())
}
