//! Relay - inbound mail relay for disposable addresses
//!
//! Serves the HTTP API and Pub/Sub webhook by default; the other
//! subcommands are one-shot operator tasks.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;
use tempmail::ServiceConfig;

mod commands;
mod dispatch;
mod server;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Inbound mail relay for disposable addresses")]
struct Cli {
    /// Port to listen on (overrides PORT and relay.json)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Interface to bind (overrides RELAY_HOST and relay.json)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Directory holding state.json, emails.json and gmail-tokens.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Authorize Gmail access and store tokens
    Authorize,
    /// Register push notifications and seed the sync watermark
    Watch {
        /// Pub/Sub topic, e.g. projects/<id>/topics/<name>
        #[arg(long)]
        topic: Option<String>,
        /// Label to watch (repeatable); defaults to the configured filter
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Stop push notifications
    StopWatch,
    /// List new-message history after a cursor (read-only)
    History {
        cursor: String,
    },
    /// Add fresh addresses to the pool
    SeedPool {
        #[arg(long)]
        prefix: String,
        #[arg(long)]
        domain: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let mut service = ServiceConfig::load()?;
    if let Some(port) = cli.port {
        service.port = port;
    }
    if let Some(host) = cli.host {
        service.host = host;
    }
    if let Some(dir) = cli.data_dir {
        service.data_dir = Some(dir);
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => tokio::runtime::Runtime::new()?.block_on(server::serve(service)),
        Command::Authorize => commands::authorize(&service),
        Command::Watch { topic, labels } => commands::watch(&service, topic, labels),
        Command::StopWatch => commands::stop_watch(&service),
        Command::History { cursor } => commands::history(&service, &cursor),
        Command::SeedPool {
            prefix,
            domain,
            count,
        } => commands::seed_pool(&service, &prefix, &domain, count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = Cli::parse_from(["relay"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_global_overrides() {
        let cli = Cli::parse_from(["relay", "serve", "--port", "9000", "--host", "127.0.0.1"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_cli_watch_labels() {
        let cli = Cli::parse_from([
            "relay", "watch", "--topic", "projects/p/topics/t", "--label", "INBOX", "--label",
            "UNREAD",
        ]);
        match cli.command {
            Some(Command::Watch { topic, labels }) => {
                assert_eq!(topic.as_deref(), Some("projects/p/topics/t"));
                assert_eq!(labels, vec!["INBOX", "UNREAD"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_seed_pool() {
        let cli = Cli::parse_from([
            "relay", "seed-pool", "--prefix", "box", "--domain", "test.com", "--count", "3",
        ]);
        assert!(matches!(
            cli.command,
            Some(Command::SeedPool { count: 3, .. })
        ));
    }
}
