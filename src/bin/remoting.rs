//! Remoting CLI binary.
//!
//! # Commands
//!
//! - `table` - Print the session transition table
//! - `demo` - Run a loopback client/server session and log every transition

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use remoting::{
    channel_pair,
    protocol::{table, Target},
    Config, Notification, RemoteSession, Role, SessionState, VERSION,
};

#[derive(Parser)]
#[command(name = "remoting")]
#[command(version = VERSION)]
#[command(about = "Remote session state machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the transition table
    Table {
        /// Only rows leaving this state
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Run a loopback client/server session
    Demo {
        /// Config file (default: <config_dir>/remoting/config.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Server requests key exchange after negotiation
        #[arg(long)]
        key_exchange: bool,

        /// Drop the transport once and reconnect
        #[arg(long)]
        reconnect: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Log as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Table { state } => cmd_table(state.as_deref()),
        Commands::Demo {
            config,
            key_exchange,
            reconnect,
            verbose,
            json,
        } => {
            init_logging(verbose, json);
            cmd_demo(config, key_exchange, reconnect)
        },
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cmd_table(state: Option<&str>) -> anyhow::Result<()> {
    let filter = state
        .map(|name| {
            SessionState::ALL
                .into_iter()
                .find(|s| s.to_string().eq_ignore_ascii_case(name))
                .with_context(|| format!("Unknown state: {name}"))
        })
        .transpose()?;

    println!("{:<28} {:<28} {:<28} Side effects", "From", "Event", "To");
    println!("{}", "-".repeat(110));

    for (from, event, transition) in table().rows() {
        if filter.is_some_and(|f| f != from) {
            continue;
        }
        let to = match transition.target {
            Target::To(state) => state.to_string(),
            Target::Stay => "(unchanged)".to_string(),
            Target::Resume => "(resume state)".to_string(),
        };
        let effects = transition
            .effects
            .iter()
            .map(|e| format!("{e:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<28} {:<28} {:<28} {}",
            from.to_string(),
            event.to_string(),
            to,
            if effects.is_empty() { "-" } else { effects.as_str() }
        );
    }

    println!();
    println!("{} rows", table().len());
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let file = match path {
        Some(path) => Some(Config::from_file(&path).with_context(|| format!("loading {}", path.display()))?),
        None => match Config::default_path() {
            Some(path) if path.exists() => Some(Config::from_file(path)?),
            _ => None,
        },
    };

    let config = file.unwrap_or_default().merge(Config::from_env());
    config.validate()?;
    Ok(config)
}

fn cmd_demo(config: Option<PathBuf>, key_exchange: bool, reconnect: bool) -> anyhow::Result<()> {
    let mut config = load_config(config)?;
    config.session.require_key_exchange |= key_exchange;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (a, b) = channel_pair();
        let client_link = Arc::clone(&a.transport);

        let client = Arc::new(RemoteSession::new(Role::Client, a.transport, &config)?);
        let server = Arc::new(RemoteSession::new(Role::Server, b.transport, &config)?);

        for (name, session) in [("client", &client), ("server", &server)] {
            session.engine().register(move |notification| match notification {
                Notification::StateChanged(change) => tracing::info!(
                    side = name,
                    from = %change.previous,
                    to = %change.current.state,
                    event = %change.event,
                    "state changed"
                ),
                Notification::ProtocolViolation(report) => tracing::warn!(
                    side = name,
                    state = %report.state,
                    event = %report.event,
                    "protocol violation"
                ),
            })?;
        }

        let client_loop = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.serve(a.inbound).await }
        });
        let server_loop = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(b.inbound).await }
        });

        server.connect()?;
        client.connect()?;

        let target = if config.session.require_key_exchange {
            SessionState::EstablishedAndKeyExchanged
        } else {
            SessionState::Established
        };
        wait_for(&client, target).await?;
        wait_for(&server, target).await?;

        if config.session.require_key_exchange {
            let client_key = client.session_key()?;
            let server_key = server.session_key()?;
            anyhow::ensure!(client_key == server_key, "session keys differ");
            tracing::info!(bytes = client_key.len(), "both sides agree on the session key");
        }

        client.send_data(b"Get-Process".to_vec())?;

        if reconnect {
            client_link.sever();
            client.connection_lost()?;
            client_link.restore();
            let info = client.reconnect()?;
            tracing::info!(state = %info.state, capability = ?client.engine().capability(), "client reconnected");
        }

        client.close()?;
        wait_for(&server, SessionState::Closed).await?;

        // Server keeps the client's inbound channel open
        client_loop.abort();
        let _ = server_loop.await;
        // Let callback tasks flush their last lines
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<(), anyhow::Error>(())
    })
}

async fn wait_for(session: &RemoteSession, state: SessionState) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.state() != state {
        if session.state().is_terminal() && state != SessionState::Closed {
            let info = session.engine().current_state();
            anyhow::bail!(
                "{:?} closed before reaching {state}: {}",
                session.role(),
                info.reason.map(|r| r.to_string()).unwrap_or_default()
            );
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "{:?} did not reach {state} (stuck in {})",
            session.role(),
            session.state()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
