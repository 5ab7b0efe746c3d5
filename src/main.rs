//! agentmux - run a shell or an AI coding assistant on a managed PTY
//!
//! A thin front end over the library: one session, raw bytes passed straight
//! through to the host terminal, activity transitions written to the log.
//!
//! ```text
//! agentmux                     # Plain shell
//! agentmux -m assist           # The configured assistant
//! agentmux -m auto -C ~/src    # Assistant in autonomous mode, in ~/src
//! agentmux -- htop             # Any command
//! ```

use std::env;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{never, select, tick, unbounded, Receiver};
use crossterm::terminal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agentmux::config::{self, Config};
use agentmux::{LaunchMode, LaunchSpec, SessionEvent, SessionRegistry};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Command line options
#[derive(Debug, Default)]
struct Args {
    mode: LaunchMode,
    working_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    command: Option<String>,
    command_args: Vec<String>,
}

fn print_help() {
    eprintln!("agentmux {} - shells and AI coding assistants on managed PTYs", VERSION);
    eprintln!();
    eprintln!("Usage: agentmux [OPTIONS] [-- COMMAND [ARGS...]]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -m, --mode <MODE>     shell (default), assist, or auto");
    eprintln!("  -C, --dir <DIR>       Working directory for the session");
    eprintln!("  -c, --config <FILE>   Config file (default: ~/.agentmux/config.toml)");
    eprintln!("  -V, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Logging goes to ~/.agentmux/agentmux.log; set AGENTMUX_LOG to change the level.");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                eprintln!("agentmux {}", VERSION);
                std::process::exit(0);
            }
            "-m" | "--mode" => {
                i += 1;
                let name = args.get(i).ok_or("Missing mode argument")?;
                parsed.mode = LaunchMode::from_name(name).ok_or_else(|| format!("Unknown mode: {}", name))?;
            }
            "-C" | "--dir" => {
                i += 1;
                let dir = args.get(i).ok_or("Missing directory argument")?;
                parsed.working_dir = Some(PathBuf::from(dir));
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing config argument")?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "--" => {
                let mut rest = args[i + 1..].iter().cloned();
                parsed.command = rest.next();
                parsed.command_args = rest.collect();
                break;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to `~/.agentmux/agentmux.log`; the terminal belongs to the child.
fn init_logging() {
    let log_path = config::config_dir()
        .map(|dir| dir.join("agentmux.log"))
        .unwrap_or_else(|| PathBuf::from("agentmux.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&log_path) else {
        return;
    };

    let filter = EnvFilter::try_from_env("AGENTMUX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Forward stdin on a detached thread; a blocked read cannot be interrupted.
fn spawn_stdin_reader() -> anyhow::Result<Receiver<Vec<u8>>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut buffer = [0u8; 1024];
            loop {
                match stdin.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        })
        .context("failed to start stdin reader")?;
    Ok(rx)
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("agentmux {} starting", VERSION);

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    let registry = SessionRegistry::new(config)?;

    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    let mut spec = LaunchSpec::new(args.mode).size(cols, rows).args(args.command_args);
    spec.command = args.command;
    spec.working_dir = args.working_dir;

    let events = registry.subscribe_sessions();
    let activity = registry.subscribe_activity();
    let id = registry.create(spec)?;
    info!(id, cols, rows, "terminal size");

    terminal::enable_raw_mode()?;
    let result = run(&registry, id, &events, &activity, (cols, rows));
    let _ = terminal::disable_raw_mode();

    let exit_code = registry.session(id).and_then(|s| s.exit_code());
    registry.shutdown();

    match result {
        Ok(()) => {
            info!(?exit_code, "agentmux exiting");
            std::process::exit(exit_code.map_or(0, |code| code as i32));
        }
        Err(e) => {
            error!(error = %e, "agentmux failed");
            Err(e)
        }
    }
}

/// Pump bytes between the host terminal and the session until it exits.
fn run(
    registry: &SessionRegistry,
    id: agentmux::SessionId,
    events: &Receiver<SessionEvent>,
    activity: &Receiver<agentmux::ActivityEvent>,
    mut size: (u16, u16),
) -> anyhow::Result<()> {
    let mut input = spawn_stdin_reader()?;
    let resize_tick = tick(RESIZE_POLL_INTERVAL);
    let mut stdout = std::io::stdout();

    loop {
        select! {
            recv(events) -> event => match event? {
                SessionEvent::Output { id: from, bytes } if from == id => {
                    stdout.write_all(&bytes)?;
                    stdout.flush()?;
                }
                SessionEvent::Exited { id: from, exit_code } if from == id => {
                    info!(id, ?exit_code, "session exited");
                    return Ok(());
                }
                _ => {}
            },
            recv(activity) -> event => {
                let event = event?;
                info!(
                    id = event.id,
                    previous = ?event.previous,
                    current = ?event.current,
                    cost_usd = ?event.usage.cost_usd,
                    "activity"
                );
                if event.is_response_complete() {
                    info!(id = event.id, "response complete");
                }
            },
            recv(input) -> bytes => match bytes {
                Ok(bytes) => {
                    if let Err(e) = registry.route(id, &bytes) {
                        error!(error = %e, "failed to forward input");
                    }
                }
                // Stdin closed; keep showing output until the child exits
                Err(_) => input = never(),
            },
            recv(resize_tick) -> _ => {
                if let Ok(current) = terminal::size() {
                    if current != size {
                        size = current;
                        if let Err(e) = registry.resize(id, current.0, current.1) {
                            error!(error = %e, "failed to resize session");
                        }
                    }
                }
            },
        }
    }
}
