use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pl_assistant::bootstrap::{self, StartupError};
use pl_assistant::channels::ConsoleTransport;
use pl_assistant::cli::{Cli, Command, ConfigCommand};
use pl_assistant::runtime;
use pl_assistant::AppState;
use pl_domain::channel::InboundMessage;
use pl_domain::config::ConfigSeverity;
use pl_domain::secrets::EnvSecretStore;
use pl_tools::ApprovalRequest;

// Startup exit codes.
const EXIT_CONFIG: i32 = 64;
const EXIT_UNAVAILABLE: i32 = 69;
const EXIT_PANIC: i32 = 70;

fn main() {
    let result = std::panic::catch_unwind(run);
    match result {
        Ok(code) => std::process::exit(code),
        Err(_) => {
            eprintln!("parley: unexpected panic during startup");
            std::process::exit(EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("parley: failed to start async runtime: {e}");
                    return EXIT_UNAVAILABLE;
                }
            };
            runtime.block_on(serve(&cli.config))
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            init_tracing();
            match pl_assistant::cli::load_config(&cli.config) {
                Ok(config) => {
                    let issues = config.validate();
                    for issue in &issues {
                        println!("{issue}");
                    }
                    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                        EXIT_CONFIG
                    } else {
                        println!("config OK");
                        0
                    }
                }
                Err(e) => {
                    eprintln!("parley: {e}");
                    EXIT_CONFIG
                }
            }
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            match pl_assistant::cli::load_config(&cli.config) {
                Ok(config) => match toml::to_string_pretty(&config) {
                    Ok(text) => {
                        println!("{text}");
                        0
                    }
                    Err(e) => {
                        eprintln!("parley: {e}");
                        EXIT_CONFIG
                    }
                },
                Err(e) => {
                    eprintln!("parley: {e}");
                    EXIT_CONFIG
                }
            }
        }
        Some(Command::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            0
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pl_assistant=debug")),
        )
        .json()
        .init();
}

async fn serve(config_path: &std::path::PathBuf) -> i32 {
    tracing::info!("parley starting");

    let config = match pl_assistant::cli::load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "cannot load config");
            return EXIT_CONFIG;
        }
    };

    // Default collaborators: env-var secrets, file-backed memory, the
    // in-process scheduler stub. Deployments swap these for real
    // integrations.
    let memory = match bootstrap::FileMemoryStore::open(&config.sessions.state_path) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::error!(error = %e, "cannot open memory store");
            return EXIT_UNAVAILABLE;
        }
    };
    let scheduler = Arc::new(bootstrap::InMemoryScheduler::default());

    let (state, approval_rx) = match bootstrap::build_state(
        config,
        Arc::new(EnvSecretStore),
        memory,
        scheduler,
    )
    .await
    {
        Ok(pair) => pair,
        Err(StartupError::ConfigInvalid(m)) => {
            tracing::error!("{m}");
            return EXIT_CONFIG;
        }
        Err(StartupError::DependencyUnavailable(m)) => {
            tracing::error!("{m}");
            return EXIT_UNAVAILABLE;
        }
    };

    // ── Ingress channel + transports ──────────────────────────────
    let (ingress_tx, mut ingress_rx) = tokio::sync::mpsc::channel::<InboundMessage>(256);
    if state.config.console {
        state.attach_transport(Arc::new(ConsoleTransport::start(ingress_tx.clone())));
    }
    if state.transports.read().is_empty() {
        tracing::warn!("no channel transports attached; set console = true or embed one");
    }

    // ── Approval prompt forwarder ─────────────────────────────────
    spawn_approval_forwarder(state.clone(), approval_rx);

    // ── Periodic maintenance ──────────────────────────────────────
    spawn_maintenance(state.clone());

    // ── Hot reload on SIGHUP ──────────────────────────────────────
    let mut reload_signal = open_reload_signal();

    // ── Main loop ─────────────────────────────────────────────────
    tracing::info!("parley ready");
    loop {
        tokio::select! {
            maybe_msg = ingress_rx.recv() => {
                match maybe_msg {
                    Some(msg) => runtime::handle_inbound(&state, msg).await,
                    None => {
                        tracing::info!("ingress closed; shutting down");
                        break;
                    }
                }
            }
            _ = recv_reload(&mut reload_signal) => {
                tracing::info!("SIGHUP: reloading config");
                match pl_assistant::cli::load_config(config_path) {
                    Ok(incoming) => bootstrap::apply_reload(&state, incoming),
                    Err(e) => tracing::warn!(error = %e, "reload skipped: config unreadable"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; shutting down");
                break;
            }
        }
    }

    shutdown(&state).await;
    0
}

#[cfg(unix)]
fn open_reload_signal() -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable; hot reload disabled");
            None
        }
    }
}

#[cfg(not(unix))]
fn open_reload_signal() -> Option<()> {
    None
}

#[cfg(unix)]
async fn recv_reload(signal: &mut Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn recv_reload(_signal: &mut Option<()>) {
    std::future::pending::<()>().await;
}

/// Forward approval prompts to the originating chat.
fn spawn_approval_forwarder(
    state: AppState,
    mut rx: tokio::sync::mpsc::Receiver<ApprovalRequest>,
) {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let Ok(key) = request.session_key.parse::<pl_sessions::SessionKey>() else {
                tracing::warn!(session_key = %request.session_key, "unparseable approval key");
                continue;
            };
            let Some(transport) = state.transport(&key.channel) else {
                tracing::warn!(channel = %key.channel, "no transport for approval prompt");
                continue;
            };
            let text = format!(
                "approval required for {}: {}\nreply /approve {} or /deny {}",
                request.tool_name, request.summary, request.call_id, request.call_id
            );
            if let Err(kind) = transport
                .send(
                    &key.chat_id,
                    pl_domain::channel::OutboundPayload {
                        text,
                        reply_to: None,
                    },
                )
                .await
            {
                tracing::warn!(?kind, "approval prompt delivery failed");
            }
        }
    });
}

/// Session eviction and queue pruning on a slow tick.
fn spawn_maintenance(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let ttl = std::time::Duration::from_secs(state.config.sessions.idle_ttl_secs);
            let evicted = state.sessions.evict_idle(ttl);
            if evicted > 0 {
                tracing::debug!(evicted, "idle sessions evicted");
            }
            let window =
                std::time::Duration::from_millis(state.reloadable().queue.dedup_window_ms);
            state.queue.prune_idle(window);
        }
    });
}

async fn shutdown(state: &AppState) {
    // Stop accepting queued work, cancel active runs, give streamers a
    // moment to flush their tails.
    state.lanes.close_all();
    for summary in state.sessions.list() {
        if let Ok(key) = summary.key.parse::<pl_sessions::SessionKey>() {
            state.cancel_map.cancel(&key.to_string());
        }
    }
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    tracing::info!("parley stopped");
}
