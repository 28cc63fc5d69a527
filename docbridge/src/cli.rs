//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docbridge - document database operations on the local event bus
#[derive(Debug, Parser)]
#[command(
    name = "docbridge",
    about = "Serve document-database processors on a local event bus",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Database address, overrides the config file
    #[arg(long, global = true, value_name = "ADDRESS")]
    pub db: Option<String>,

    /// Bus socket path, overrides the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the store and the bus listener until Ctrl-C
    Serve,

    /// Publish one event and print the acknowledged event
    Publish {
        /// Event topic, e.g. db::insert
        topic: String,

        /// Event payload as a JSON object
        payload: String,
    },

    /// Check that the bus listener is alive
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_publish_with_globals() {
        let cli = Cli::try_parse_from([
            "docbridge",
            "publish",
            "db::find",
            r#"{"db":"shop"}"#,
            "--socket",
            "/tmp/bus.sock",
            "-l",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/bus.sock")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Publish { topic, payload } => {
                assert_eq!(topic, "db::find");
                assert_eq!(payload, r#"{"db":"shop"}"#);
            }
            _ => panic!("Expected Publish"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["docbridge"]).is_err());
    }
}
