//! Stubble - CLI Entry Point
//!
//! Serves the configured stubs over a line-delimited JSON harness: one
//! request object per line on stdin, one response object per line on stdout.

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use stubble::endpoint::{Endpoint, EndpointHandle};
use stubble::{Exchange, StubRegistry, StubbleConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stubble",
    about = "Scriptable stub responder - sequential, random and matched responses",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stubble.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

/// A request line on stdin.
#[derive(Debug, Deserialize)]
struct RequestLine {
    endpoint: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// A response line on stdout.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResponseLine {
    Response {
        endpoint: String,
        body: String,
        headers: BTreeMap<String, String>,
        selection: String,
    },
    Error {
        error: String,
    },
}

fn answer(registry: &StubRegistry, line: &str, case_insensitive: bool) -> ResponseLine {
    let request: RequestLine = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return ResponseLine::Error {
                error: format!("invalid request line: {}", e),
            }
        }
    };

    let mut exchange = Exchange::new(request.endpoint).with_body(request.body);
    if !case_insensitive {
        exchange = exchange.with_case_sensitive_headers();
    }
    for (name, value) in request.headers {
        exchange.set_header(name, value);
    }

    match registry.dispatch(&mut exchange) {
        Ok(selection) => ResponseLine::Response {
            endpoint: exchange.endpoint().to_string(),
            body: String::from_utf8_lossy(exchange.body()).to_string(),
            headers: exchange
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            selection: format!("{:?}", selection),
        },
        Err(e) => ResponseLine::Error {
            error: e.to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr, stdout carries responses
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../demos/stubble.yaml"));
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        StubbleConfig::from_file(&args.config)?
    } else {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    };

    if args.validate {
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    let registry = StubRegistry::from_config(&config)?;
    let endpoints: Vec<String> = registry
        .routes()
        .map(|r| r.stub().endpoint_uri().to_string())
        .collect();
    for uri in endpoints {
        let mut endpoint = EndpointHandle::new(uri);
        registry.activate(&mut endpoint)?;
        debug!(endpoint = %endpoint.uri(), properties = ?endpoint.properties(), "Endpoint ready");
    }

    let case_insensitive = config.settings.case_insensitive_headers;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = answer(&registry, &line, case_insensitive);
                if let ResponseLine::Error { error } = &response {
                    warn!(error = %error, "Request failed");
                }
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    for route in registry.routes() {
        info!(
            route_id = %route.route_id(),
            served = route.requests_served(),
            failed = route.requests_failed(),
            "Stub stopped"
        );
    }

    Ok(())
}
