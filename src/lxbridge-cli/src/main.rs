use anyhow::{Context, Result};
use clap::Parser;
use lxbridge_core::{init_logging, AppDirs, Config, LogLevel, LoggingGuard, APP_NAME};
use lxbridge_plugin::Response;
use lxbridge_runtime::{Bridge, ModuleCatalog};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::task::LocalSet;

#[derive(Debug, Parser)]
#[command(
    name = "lxbridge",
    version,
    about = "Hosts one music-source module behind a JSON line protocol on stdin/stdout"
)]
struct Cli {
    /// Module manifest to load (TOML, or JSON with a .json extension)
    module: PathBuf,
    /// Config file (defaults to config.toml in the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log level override (takes precedence over config)
    #[arg(long)]
    log_level: Option<LogLevel>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, _logging) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(err) => {
            announce_failure(&format!("{err:#}"));
            return ExitCode::FAILURE;
        }
    };

    match serve(&cli.module, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("bridge stopped: {err:#}");
            eprintln!("lxbridge: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn prepare(cli: &Cli) -> Result<(Config, LoggingGuard)> {
    let dirs = AppDirs::discover()
        .unwrap_or_else(|_| AppDirs::rooted_at(std::env::temp_dir().join(APP_NAME)));
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(&dirs)?,
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let logging = init_logging(&config.logging, &dirs)?;
    Ok((config, logging))
}

fn serve(module: &Path, config: Config) -> Result<()> {
    tracing::info!(
        module = %module.display(),
        version = env!("CARGO_PKG_VERSION"),
        "lxbridge starting"
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    #[cfg(unix)]
    let protocol_out =
        lxbridge_runtime::output::claim_stdout().context("failed to take over stdout")?;
    #[cfg(not(unix))]
    let protocol_out = tokio::io::stdout();

    let bridge = Bridge::new(config.bridge, module_catalog());
    LocalSet::new().block_on(&runtime, bridge.run(module, tokio::io::stdin(), protocol_out))?;

    tracing::info!("lxbridge exiting");
    Ok(())
}

fn module_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with(static_module::KIND, static_module::factory)
        .with(relay_module::KIND, relay_module::factory)
}

/// Startup failed before the bridge owned stdout: tell the peer in protocol
/// form, and a human on stderr.
fn announce_failure(message: &str) {
    if let Ok(line) = serde_json::to_string(&Response::failure(None, message)) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
    eprintln!("lxbridge: {message}");
}
