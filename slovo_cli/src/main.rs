use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use slovo_core::config::AppConfig;
use slovo_core::discovery;
use slovo_core::{AppCommand, AppEvent, Services, run_backend, transfer};
use std::io::BufRead;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser)]
#[command(name = "slovo")]
#[command(about = "Send files and folders to other hosts on the local network")]
struct Cli {
    /// Name announced to peers (defaults to the host name)
    #[arg(long)]
    name: Option<String>,

    /// Directory received files are saved into
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// UDP discovery port; transfers use the next port up
    #[arg(long)]
    port: Option<u16>,

    /// Store the name, download dir and port given here as the new defaults
    #[arg(long)]
    save: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer discovery probes and receive files until Ctrl-C.
    /// Reads `scan`, `send <target> <path>` and `quit` from stdin.
    Serve,
    /// List peers on the local network
    Scan {
        /// Wait this long for each next reply
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send a file or directory to a peer
    Send {
        /// Peer IP, or IP:PORT of its receiver
        target: String,
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load();
    if let Some(name) = cli.name {
        config.display_name = name;
    }
    if let Some(dir) = cli.download_dir {
        config.download_path = dir;
    }
    if let Some(port) = cli.port {
        config.discovery_port = port;
    }
    debug!("Effective config: {:?}", config);
    if cli.save {
        // A port with no room for the transfer port above it is never stored
        config.transfer_port()?;
        let path = config.save().context("saving config")?;
        info!("Saved config to {}", path.display());
    }

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Scan { timeout_ms } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.discovery_timeout());
            let peers = discovery::discover(config.discovery_port, timeout).await?;
            if peers.is_empty() {
                println!("No devices found");
            }
            for peer in peers {
                println!("{} ({})", peer.display_name, peer.address.ip());
            }
            Ok(())
        }
        Command::Send { target, path } => {
            let target = parse_target(&target, config.transfer_port()?)?;
            let (event_tx, event_rx) = mpsc::channel(1000);
            let printer = tokio::spawn(output::print_events(event_rx));

            let result =
                transfer::send_path(target, &path, config.effective_chunk_size(), &event_tx).await;
            drop(event_tx);
            let _ = printer.await;

            let report = result.with_context(|| format!("sending {}", path.display()))?;
            if let Some(archive) = report.archive {
                println!("Archive left at {}", archive.display());
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<AppCommand>(100);
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>(1000);
    let cancel = CancellationToken::new();

    let services = Services::bind(&config, event_tx.clone()).await?;
    let transfer_port = config.transfer_port()?;
    let backend = tokio::spawn(run_backend(config, services, cmd_rx, event_tx, cancel.clone()));
    let printer = tokio::spawn(output::print_events(event_rx));

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut lines = spawn_stdin_reader();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else { break };

        match parse_line(&line, transfer_port) {
            Ok(Input::Command(cmd)) => {
                if cmd_tx.send(cmd).await.is_err() {
                    break;
                }
            }
            Ok(Input::Blank) => {}
            Ok(Input::Quit) => break,
            Err(e) => eprintln!("{}", e),
        }
    }

    info!("Shutting down");
    cancel.cancel();
    drop(cmd_tx);
    let _ = backend.await;
    let _ = printer.await;
    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// One line typed into `serve`
#[derive(Debug)]
enum Input {
    Blank,
    Quit,
    Command(AppCommand),
}

fn parse_line(line: &str, transfer_port: u16) -> Result<Input> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "" => Ok(Input::Blank),
        "scan" => Ok(Input::Command(AppCommand::StartDiscovery)),
        "send" => {
            let (target, path) = rest
                .trim()
                .split_once(' ')
                .context("usage: send <target> <path>")?;
            Ok(Input::Command(AppCommand::SendPath {
                target: parse_target(target, transfer_port)?,
                path: PathBuf::from(path.trim()),
            }))
        }
        "quit" | "exit" => Ok(Input::Quit),
        other => bail!("unknown command {:?} (try scan, send, quit)", other),
    }
}

/// Accept `IP` (uses `default_port`) or `IP:PORT`
fn parse_target(target: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = target
        .parse()
        .with_context(|| format!("invalid target address {:?}", target))?;
    Ok(SocketAddr::new(ip, default_port))
}
