//! session-split - command line entry point
//!
//! `get` prints the cached session (exit code 1 on a miss), `put` caches the
//! session read from stdin, `agent` runs the socket agent, `check` reports
//! whether the external tools are in place.

use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use session_split::{
    config::Config,
    process::find_in_path,
    socket::{server::SocketAgentServer, SocketBackend, UnixSocketAgent},
    SessionCache, SessionSecret,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Cache a vault session split across gpg-agent, a temp file and a socket agent"
)]
struct Cli {
    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log every protocol step to stderr.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cached session. Exits with 1 when nothing usable is cached.
    Get,
    /// Cache the session read from stdin.
    Put,
    /// Run the socket agent in the foreground.
    Agent,
    /// Report tool paths and socket agent status as JSON.
    Check,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    gpg: Option<PathBuf>,
    agent_client: Option<PathBuf>,
    gnupg_home: Option<PathBuf>,
    share_dir: PathBuf,
    socket_path: PathBuf,
    socket_enabled: bool,
    socket_available: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(cli))
}

fn init_logging(cli: &Cli) {
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("session_split=debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("session_split=info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "session_split=warn".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn async_main(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Command::Get => get(&config).await,
        Command::Put => put(&config).await,
        Command::Agent => agent(&config).await,
        Command::Check => check(&config).await,
    }
}

async fn get(config: &Config) -> anyhow::Result<ExitCode> {
    let cache = SessionCache::from_config(config)?;
    let Some(secret) = cache.load().await? else {
        return Ok(ExitCode::from(1));
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(secret.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(ExitCode::SUCCESS)
}

async fn put(config: &Config) -> anyhow::Result<ExitCode> {
    let mut input = Zeroizing::new(Vec::new());
    std::io::stdin()
        .read_to_end(&mut input)
        .context("Failed to read session from stdin")?;
    let len = trimmed_len(&input);
    let secret = SessionSecret::new(input[..len].to_vec());

    if config.socket.enabled && config.socket.autostart {
        if let Err(e) = autostart_agent(config).await {
            warn!("Could not start socket agent: {}", e);
        }
    }

    let cache = SessionCache::from_config(config)?;
    let stored = cache.put(&secret).await.context("Failed to cache session")?;
    info!(
        "Session cached ({} shares, share file {})",
        stored.share_count,
        stored.share_path.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Length of `input` without one trailing line ending.
fn trimmed_len(input: &[u8]) -> usize {
    if input.ends_with(b"\r\n") {
        input.len() - 2
    } else if input.ends_with(b"\n") {
        input.len() - 1
    } else {
        input.len()
    }
}

/// Start `session-split agent` in the background unless one already answers.
async fn autostart_agent(config: &Config) -> anyhow::Result<()> {
    let client = UnixSocketAgent::new(&config.socket);
    if client.probe().await {
        return Ok(());
    }

    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    info!("Starting socket agent at {}", config.socket.path.display());
    std::process::Command::new(exe)
        .arg("agent")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Failed to spawn socket agent")?;

    for _ in 0..20 {
        if client.probe().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("socket agent did not come up at {}", config.socket.path.display())
}

async fn agent(config: &Config) -> anyhow::Result<ExitCode> {
    let server = SocketAgentServer::bind(&config.socket.path)
        .with_context(|| format!("Failed to bind {}", config.socket.path.display()))?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Socket agent shutting down"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn check(config: &Config) -> anyhow::Result<ExitCode> {
    let socket_available = if config.socket.enabled {
        UnixSocketAgent::new(&config.socket).probe().await
    } else {
        false
    };

    let report = CheckReport {
        gpg: find_in_path(&config.gpg_program),
        agent_client: find_in_path(&config.agent_client_program),
        gnupg_home: config.gnupg_home.clone(),
        share_dir: config.share_dir.clone(),
        socket_path: config.socket.path.clone(),
        socket_enabled: config.socket.enabled,
        socket_available,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.gpg.is_some() && report.agent_client.is_some() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
