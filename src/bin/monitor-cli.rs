use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "monitor-cli")]
#[command(about = "Operator CLI for the security monitor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "admin-secret-key")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show monitor status and the active rule table
    Status,
    /// Summarize active threats across monitored clients
    Insights,
    /// Show the current window for a client under a rule
    RateLimit { rule: String, identifier: String },
    /// Clear a client's window under a rule
    Reset { rule: String, identifier: String },
    /// Show the threat level of an identity key (e.g. ip:10.0.0.1)
    Threat { key: String },
    /// Aggregate audit statistics
    Stats {
        #[arg(short, long, default_value = "24h")]
        timeframe: String,
    },
    /// Query recorded audit logs, newest first
    Audit {
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        operation: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Insights => client.get(format!("{}/admin/insights", cli.url)),
        Commands::RateLimit { rule, identifier } => {
            client.get(format!("{}/admin/rate-limits/{}/{}", cli.url, rule, identifier))
        }
        Commands::Reset { rule, identifier } => {
            client.delete(format!("{}/admin/rate-limits/{}/{}", cli.url, rule, identifier))
        }
        Commands::Threat { key } => client.get(format!("{}/admin/threats/{}", cli.url, key)),
        Commands::Stats { timeframe } => client
            .get(format!("{}/admin/statistics", cli.url))
            .query(&[("timeframe", timeframe)]),
        Commands::Audit {
            user_id,
            operation,
            severity,
            limit,
        } => {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(user_id) = user_id {
                params.push(("user_id", user_id));
            }
            if let Some(operation) = operation {
                params.push(("operation", operation));
            }
            if let Some(severity) = severity {
                params.push(("severity", severity));
            }
            if let Some(limit) = limit {
                params.push(("limit", limit.to_string()));
            }
            client.get(format!("{}/admin/audit", cli.url)).query(&params)
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
