use anyhow::{Context, bail};
use buoy_cp::ip::{self, CidrBlocks};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "buoy")]
#[command(about = "CLI for the buoy floating-IP control plane", long_about = None)]
struct Cli {
    /// REST API address
    #[arg(short, long, default_value = "http://[::1]:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a route from a floating IP to one or more backends
    Create {
        /// Public floating IP
        #[arg(long)]
        public_ip: String,

        /// Backend private IP (repeatable; order sets the link index)
        #[arg(long = "endpoint", required = true)]
        endpoints: Vec<String>,
    },

    /// Get a route
    Get {
        /// Public floating IP
        public_ip: String,
    },

    /// List all routes
    List,

    /// Expand CIDR blocks into per-host /32 entries
    Expand {
        /// A CIDR block, or a JSON list of blocks (nested lists allowed)
        blocks: String,
    },
}

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "PUBLIC IP")]
    public_ip: String,
    #[tabled(rename = "ENDPOINTS")]
    endpoints: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Create {
            public_ip,
            endpoints,
        } => {
            let body = json!({
                "route": {
                    "public_ip": public_ip,
                    "endpoints": endpoints
                        .iter()
                        .map(|ip| json!({"private_ip": ip}))
                        .collect::<Vec<_>>(),
                }
            });
            let res = client
                .post(format!("{}/api/v1/routes", cli.server))
                .json(&body)
                .send()
                .await
                .context("control plane unreachable")?;
            if res.status() != reqwest::StatusCode::CREATED {
                bail!("create failed: {}", error_text(res).await);
            }
            println!("Route created: {public_ip}");
        }

        Commands::Get { public_ip } => {
            let res = client
                .get(format!("{}/api/v1/routes/{}", cli.server, public_ip))
                .send()
                .await
                .context("control plane unreachable")?;
            if !res.status().is_success() {
                bail!("get failed: {}", error_text(res).await);
            }
            let route: Value = res.json().await?;
            print_routes(std::slice::from_ref(&route));
        }

        Commands::List => {
            let res = client
                .get(format!("{}/api/v1/routes", cli.server))
                .send()
                .await
                .context("control plane unreachable")?;
            if !res.status().is_success() {
                bail!("list failed: {}", error_text(res).await);
            }
            let routes: Vec<Value> = res.json().await?;
            print_routes(&routes);
        }

        Commands::Expand { blocks } => {
            // Accept either a JSON list or a single bare block.
            let blocks: CidrBlocks = match serde_json::from_str(&blocks) {
                Ok(parsed) => parsed,
                Err(_) => CidrBlocks::One(blocks),
            };
            for host in ip::expand_cidr_to_host_blocks(&blocks)? {
                println!("{host}");
            }
        }
    }

    Ok(())
}

fn print_routes(routes: &[Value]) {
    let rows: Vec<RouteRow> = routes
        .iter()
        .map(|route| RouteRow {
            public_ip: route["public_ip"].as_str().unwrap_or_default().to_string(),
            endpoints: route["endpoints"]
                .as_array()
                .map(|endpoints| {
                    endpoints
                        .iter()
                        .filter_map(|e| e["private_ip"].as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows));
}

async fn error_text(res: reqwest::Response) -> String {
    let status = res.status();
    match res.json::<Value>().await {
        Ok(body) => body["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}
