//! Purpose: `pagesync` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Value, json};

mod command_dispatch;
mod serve;

use pagesync::api::{
    DEFAULT_MAX_RESULTS, DEFAULT_MAX_RESULTS_CAP, Error, ErrorKind, to_exit_code,
};

const DEFAULT_BIND: &str = "127.0.0.1:8000";
const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 300;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `pagesync --help` for usage."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command)?;
    Ok(0)
}

#[derive(Parser)]
#[command(
    name = "pagesync",
    version,
    about = "Snapshot-consistent, resumable listing over a system-versioned table",
    long_about = None,
    after_help = r#"EXAMPLES
  $ pagesync serve
  $ curl -s 'http://127.0.0.1:8000/list?max_results=10'
  $ curl -s 'http://127.0.0.1:8000/list?next_page_token=<token>'
  $ curl -s 'http://127.0.0.1:8000/list?sync_token=<token>'
  $ pagesync token decode <token>"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Serve the list protocol over HTTP (loopback by default)",
        after_help = r#"ROUTES
  GET  /list?sync_token=&next_page_token=&max_results=
  POST /insert   {"name": "...", "email": "..."}
  POST /update   {"id": 1, "name": "...", "email": "..."}
  POST /delete   {"id": 1}
  POST /clear
  GET  /healthz

NOTES
  - Tokens expire after --retention-secs; history older than that is purged
  - Set RUST_LOG=debug to log every continuation decision"#
    )]
    Serve(ServeArgs),
    #[command(about = "Inspect continuation tokens")]
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    #[command(
        about = "Decode a token and print its fields as JSON (no expiry check)",
        arg_required_else_help = true
    )]
    Decode {
        #[arg(help = "Opaque token string")]
        token: String,
        #[arg(long, value_enum, help = "Require a specific token kind")]
        kind: Option<TokenKindArg>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TokenKindArg {
    NextPage,
    Sync,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Bind address", help_heading = "Connection")]
    bind: String,
    #[arg(
        long,
        help = "Allow non-loopback binds",
        help_heading = "Connection"
    )]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_RETENTION_SECS,
        help = "History retention and token lifetime in seconds",
        help_heading = "Retention"
    )]
    retention_secs: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_PURGE_INTERVAL_SECS,
        help = "Seconds between history purge runs",
        help_heading = "Retention"
    )]
    purge_interval_secs: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_RESULTS,
        help = "Page size when max_results is absent",
        help_heading = "Limits"
    )]
    default_max_results: usize,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_RESULTS_CAP,
        help = "Largest page size a client may request",
        help_heading = "Limits"
    )]
    max_results_cap: usize,
}

impl ServeArgs {
    fn into_config(self) -> Result<serve::ServeConfig, Error> {
        let bind: SocketAddr = self.bind.parse().map_err(|_| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid bind address: {}", self.bind))
                .with_hint("Use a host:port value like 127.0.0.1:8000.")
        })?;
        Ok(serve::ServeConfig {
            bind,
            allow_non_loopback: self.allow_non_loopback,
            retention: Duration::from_secs(self.retention_secs),
            default_max_results: self.default_max_results,
            max_results_cap: self.max_results_cap,
            purge_interval: Duration::from_secs(self.purge_interval_secs),
        })
    }
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim_start_matches("error: ").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = serde_json::Map::new();
    inner.insert("kind".to_string(), json!(err.kind().as_str()));
    inner.insert("message".to_string(), json!(err.message().unwrap_or("error")));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    json!({ "error": inner })
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {err}");
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}
