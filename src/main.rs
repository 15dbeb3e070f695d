//! Purpose: `synclite` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueHint};
use serde_json::json;
use url::Url;

mod data_paths;
mod serve;

use data_paths::{cache_root, default_data_dir, records_dir};
use synclite::api::{Error, ErrorKind, to_exit_code};
use synclite::cache::{CacheConfig, CacheManager, FetchRequest, UreqFetcher};

#[derive(Parser)]
#[command(
    name = "synclite",
    version,
    about = "Offline-first sync relay and asset cache",
    after_help = r#"EXAMPLES
  $ synclite serve                                  # relay on loopback
  $ synclite cache install                          # precache the app shell
  $ synclite cache activate                         # drop superseded generations
  $ synclite cache fetch https://ironlog.app/ --navigate

LEARN MORE
  $ synclite <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Data directory (default: ~/.synclite)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Serve the sync relay over HTTP (loopback by default)",
        after_help = r#"EXAMPLES
  $ synclite serve
  $ synclite serve --bind 0.0.0.0:9800 --allow-non-loopback

NOTES
  - Records live under <data-dir>/records (override with --dir)
  - Responses are CORS-open; gate exposure at the bind address"#
    )]
    Serve {
        #[command(flatten)]
        run: ServeRunArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Manage the shell asset cache",
        after_help = r#"EXAMPLES
  $ synclite cache install
  $ synclite cache activate
  $ synclite cache fetch https://ironlog.app/iron_log.html"#
    )]
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Args)]
struct ServeRunArgs {
    #[arg(long, default_value = "127.0.0.1:9800", help = "Bind address")]
    bind: String,
    #[arg(
        long,
        help = "Allow non-loopback binds (the relay is CORS-open)",
        help_heading = "Safety"
    )]
    allow_non_loopback: bool,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(
        about = "Precache the shell manifest and, best-effort, its fonts",
        long_about = r#"Build the cache generation for the current shell version.

The shell asset manifest must cache completely or the install fails;
stylesheet and font precaching is best-effort and never fails the install."#
    )]
    Install {
        #[arg(long, help = "Shell base URL override")]
        base_url: Option<Url>,
    },
    #[command(about = "Delete every cache generation except the current one")]
    Activate,
    #[command(
        about = "Resolve one request through the cache manager",
        long_about = r#"Resolve a request the way the shell would: cache-first with network
fallback, sync-path bypass, and the cached-shell fallback for offline
navigations. The body is written to stdout unless --output is given."#
    )]
    Fetch {
        #[arg(help = "Request URL")]
        url: Url,
        #[arg(long, help = "Treat the request as a page navigation")]
        navigate: bool,
        #[arg(long, help = "Shell base URL override")]
        base_url: Option<Url>,
        #[arg(long, value_hint = ValueHint::FilePath, help = "Write the body to a file")]
        output: Option<PathBuf>,
    },
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let data_dir = cli.dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Command::Serve { run } => {
            let bind: SocketAddr = run.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:9800.")
            })?;
            let config = serve::ServeConfig {
                bind,
                records_dir: records_dir(&data_dir),
                allow_non_loopback: run.allow_non_loopback,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))
        }
        Command::Cache { command } => {
            init_tracing();
            dispatch_cache(command, &data_dir)
        }
    }
}

fn dispatch_cache(command: CacheCommand, data_dir: &Path) -> Result<(), Error> {
    match command {
        CacheCommand::Install { base_url } => {
            let manager = cache_manager(data_dir, base_url);
            let report = manager.install()?;
            emit_json(json!({
                "install": {
                    "generation": manager.config().generation,
                    "shell_assets": report.shell_assets,
                    "stylesheets": report.stylesheets,
                    "fonts": report.fonts,
                }
            }));
            Ok(())
        }
        CacheCommand::Activate => {
            let manager = cache_manager(data_dir, None);
            let report = manager.activate()?;
            emit_json(json!({
                "activate": {
                    "generation": manager.config().generation,
                    "removed": report.removed,
                }
            }));
            Ok(())
        }
        CacheCommand::Fetch {
            url,
            navigate,
            base_url,
            output,
        } => {
            let manager = cache_manager(data_dir, base_url);
            let request = if navigate {
                FetchRequest::navigate(url)
            } else {
                FetchRequest::get(url)
            };
            let response = manager.handle(&request)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &response.body).map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write response body")
                            .with_path(&path)
                            .with_source(err)
                    })?;
                    emit_json(json!({
                        "fetch": {
                            "status": response.status,
                            "bytes": response.body.len(),
                            "output": path.display().to_string(),
                        }
                    }));
                }
                None => {
                    std::io::stdout().write_all(&response.body).map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write response body")
                            .with_source(err)
                    })?;
                }
            }
            Ok(())
        }
    }
}

fn cache_manager(data_dir: &Path, base_url: Option<Url>) -> CacheManager {
    let config = match base_url {
        Some(base_url) => CacheConfig::for_shell(base_url),
        None => CacheConfig::builtin(),
    };
    CacheManager::new(config, cache_root(data_dir), Arc::new(UreqFetcher::new()))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit_json(value: serde_json::Value) {
    match serde_json::to_string_pretty(&value) {
        Ok(rendered) => println!("{rendered}"),
        Err(_) => println!("{value}"),
    }
}

fn emit_error(err: &Error) {
    let mut body = serde_json::Map::new();
    body.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    if let Some(message) = err.message() {
        body.insert("message".to_string(), json!(message));
    }
    if let Some(hint) = err.hint() {
        body.insert("hint".to_string(), json!(hint));
    }
    eprintln!("{}", json!({ "error": body }));
}
