//! Command-line front end for the messaging engine.
//!
//! ```text
//! fog-messaging --config agent.toml check
//! fog-messaging --config agent.toml send POST /api/v1/agents/events --body '{"events": []}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use fog_messaging::config::load_config;
use fog_messaging::observability::{init_logging, init_metrics};
use fog_messaging::{HttpMethod, MemoryBuffer, MessageCategory, Messaging, MessagingContext};

#[derive(Parser)]
#[command(name = "fog-messaging")]
#[command(about = "Send messages to the management backend", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "/etc/cp/conf/fog-messaging.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check connectivity to the backend
    Check,
    /// Send one request to the backend and print the response
    Send {
        /// GET, POST, PATCH, PUT or DELETE
        method: HttpMethod,
        uri: String,
        #[arg(short, long, default_value = "")]
        body: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&config.observability.log_level);
    tracing::info!(config = %cli.config.display(), "fog-messaging starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let buffer = Arc::new(MemoryBuffer::new());
    let messaging = Messaging::new(MessagingContext::from_config(config), buffer.clone());

    if let Err(e) = messaging.set_fog_connection(MessageCategory::Generic).await {
        tracing::warn!(error = %e, "Initial fog connection failed");
    }

    match cli.command {
        Commands::Check => {
            let status = messaging.check_fog_connection().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Send { method, uri, body } => {
            let metadata = messaging.fog_metadata()?;
            match messaging
                .send_sync_message(method, &uri, &body, MessageCategory::Generic, &metadata)
                .await
            {
                Ok(response) => println!("{response}"),
                Err(e) => {
                    eprintln!("{}", e.to_response());
                    std::process::exit(1);
                }
            }
        }
    }

    for message in buffer.drain() {
        tracing::warn!(method = %message.method, uri = %message.uri, "Message was not delivered");
    }
    Ok(())
}
