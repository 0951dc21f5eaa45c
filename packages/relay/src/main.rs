use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use relay::config::{DEFAULT_CHUNK_SIZE, DEFAULT_HOST, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PORT};
use relay::{OperatorInput, Relay, RelayConfig, print_events};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay operator commands to many connected TCP clients")]
struct Args {
    /// Host to bind to
    #[arg(short = 'b', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How often to refresh the session list, in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Maximum bytes read from a session at once
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            host: self.host,
            port: self.port,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            chunk_size: self.chunk_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging; stdout belongs to the operator console
    let filter = if args.debug {
        "relay=debug,session_registry=debug"
    } else {
        "relay=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = args.into_config();
    let bind_addr = config.bind_addr();

    let mut relay = Relay::start(config)
        .await
        .with_context(|| format!("Failed to start relay on {}", bind_addr))?;

    println!("[relay] Listening on {}", relay.local_addr());

    let events = relay
        .take_events()
        .context("Relay event stream already taken")?;
    let printer = tokio::spawn(print_events(events, tokio::io::stdout()));

    let cancel = relay.cancellation_token();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal, cleaning up...");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }

    let mut dispatch = relay.dispatch_loop(OperatorInput::stdin(), tokio::io::stdout());
    let dispatch_result = dispatch.run(&cancel).await;
    drop(dispatch);

    let stats = relay.shutdown().await;

    match printer.await {
        Ok(Err(e)) => error!("Console output failed: {}", e),
        Err(e) => error!("Console printer task failed: {}", e),
        Ok(Ok(())) => {}
    }

    println!(
        "[relay] Stopped after {} session(s), {} command(s) sent",
        stats.total_sessions, stats.commands_sent
    );

    dispatch_result.context("Operator console failed")?;
    info!("Shutdown complete");
    Ok(())
}
