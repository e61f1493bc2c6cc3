//! Bulwark node binary.
//!
//! Runs a single-host node and decides login attempts read as JSON lines on
//! stdin, writing one JSON response per line to stdout:
//!
//! ```text
//! {"type":"create_account","account_id":"alice","password":"correct horse"}
//! {"type":"attempt","account_id":"alice","password":"correct horse","client_ip":"192.0.2.7"}
//! ```
//!
//! A decision carries only `accepted` or `rejected`. Why an attempt was
//! rejected (blocked IP, wrong password, unknown account) stays in the debug
//! audit log.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use bulwark_core::types::{AttemptRecord, Hash256, LoginAttempt};
use bulwark_node_lib::{Node, NodeConfig};
use chrono::Utc;
use clap::Parser;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "bulwark-node",
    version,
    about = "Risk-scored login decisions over JSON lines"
)]
struct Args {
    /// TOML config file. Defaults to the per-user config path when it exists.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    CreateAccount {
        account_id: String,
        password: String,
    },
    Attempt {
        /// Hex attempt id; a random one is chosen when absent.
        id: Option<String>,
        account_id: String,
        password: String,
        client_ip: IpAddr,
        server_ip: Option<IpAddr>,
        device_cookie: Option<String>,
    },
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    Created {
        account_id: String,
    },
    Decision {
        id: String,
        result: &'static str,
    },
    Error {
        message: String,
    },
}

/// Externally visible form of a decision. The record is logged for audit.
fn decision(record: &AttemptRecord) -> Response {
    debug!(
        attempt = %record.attempt.id,
        account = %record.attempt.account_id,
        ip = %record.attempt.client_ip,
        outcome = ?record.outcome,
        height = ?record.password_height,
        "audit: attempt decided"
    );
    Response::Decision {
        id: record.attempt.id.to_string(),
        result: record.outcome.public_result(),
    }
}

fn attempt_id(hex_id: Option<&str>) -> anyhow::Result<Hash256> {
    match hex_id {
        Some(s) => {
            let bytes = hex::decode(s).context("attempt id is not hex")?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("attempt id must be 32 bytes"))?;
            Ok(Hash256::from_bytes(bytes))
        }
        None => {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            Ok(Hash256::from_bytes(bytes))
        }
    }
}

async fn handle(node: &Node, line: &str) -> anyhow::Result<Response> {
    let request: Request = serde_json::from_str(line).context("malformed request")?;
    let now = Utc::now();
    match request {
        Request::CreateAccount {
            account_id,
            password,
        } => {
            node.engine()
                .create_account(account_id.as_str().into(), &password, now)
                .await?;
            Ok(Response::Created { account_id })
        }
        Request::Attempt {
            id,
            account_id,
            password,
            client_ip,
            server_ip,
            device_cookie,
        } => {
            let attempt = LoginAttempt {
                id: attempt_id(id.as_deref())?,
                account_id: account_id.into(),
                client_ip,
                server_ip,
                timestamp: now,
                device_cookie_hash: device_cookie.map(|c| Hash256::digest(c.as_bytes())),
            };
            let record = node.decide(&attempt, &password).await?;
            Ok(decision(&record))
        }
    }
}

async fn serve(node: &Node) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle(node, &line).await.unwrap_or_else(|e| {
            warn!("request failed: {e:#}");
            Response::Error {
                message: format!("{e:#}"),
            }
        });
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);

    let path = args
        .config
        .or_else(|| NodeConfig::default_path().filter(|p| p.exists()));
    let config = match NodeConfig::load(path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {}", e);
            process::exit(1);
        }
    };

    info!("Bulwark Node v{}", env!("CARGO_PKG_VERSION"));
    info!("config: {:?}", path);
    info!("host: {}", config.fleet.local_host);

    let node = match Node::new(config) {
        Ok(n) => n,
        Err(e) => {
            error!("failed to start node: {}", e);
            process::exit(1);
        }
    };
    node.start();

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = serve(&node) => match result {
            Ok(()) => info!("stdin closed"),
            Err(e) => error!("serve loop failed: {e:#}"),
        },
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    if let Err(e) = node.shutdown().await {
        error!("shutdown failed: {}", e);
        process::exit(1);
    }
    info!("Bulwark node shutdown complete");
}

/// Initialize tracing with the given level and output format.
///
/// Logs go to stderr so stdout carries only responses. Pass `format = "json"`
/// for structured output; any other value gives human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::types::Outcome;

    fn record(outcome: Outcome, encrypted: Option<Vec<u8>>) -> AttemptRecord {
        AttemptRecord {
            attempt: LoginAttempt {
                id: Hash256([2; 32]),
                account_id: "alice".into(),
                client_ip: "192.0.2.7".parse().unwrap(),
                server_ip: None,
                timestamp: Utc::now(),
                device_cookie_hash: None,
            },
            outcome,
            password_height: Some(40),
            encrypted_incorrect_password: encrypted,
        }
    }

    #[test]
    fn blocked_and_wrong_password_look_the_same() {
        let blocked = serde_json::to_value(decision(&record(Outcome::CredentialsValidButBlocked, None))).unwrap();
        let wrong = serde_json::to_value(decision(&record(
            Outcome::CredentialsInvalidIncorrectPassword,
            Some(vec![7; 48]),
        )))
        .unwrap();
        assert_eq!(blocked, wrong);
        assert_eq!(blocked["result"], "rejected");

        let fields: Vec<&str> = blocked.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(fields.len(), 3, "{fields:?}");
        for field in ["type", "id", "result"] {
            assert!(fields.contains(&field), "missing {field}");
        }
    }

    #[test]
    fn accepted_decision() {
        let value = serde_json::to_value(decision(&record(Outcome::CredentialsValid, None))).unwrap();
        assert_eq!(value["type"], "decision");
        assert_eq!(value["result"], "accepted");
        assert_eq!(value["id"], Hash256([2; 32]).to_string());
    }

    #[test]
    fn attempt_id_parses_hex() {
        let id = Hash256([0xAB; 32]);
        assert_eq!(attempt_id(Some(&id.to_string())).unwrap(), id);
        assert!(attempt_id(Some("zz")).is_err());
        assert!(attempt_id(Some("abcd")).is_err());
        assert_ne!(attempt_id(None).unwrap(), attempt_id(None).unwrap());
    }
}
