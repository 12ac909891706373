//! Command-line interface for kafka-proxy
//!
//! # Usage Examples
//!
//! ```bash
//! # Follow a topic as part of a consumer group
//! kafka-proxy consume --brokers localhost:9092 --group my-group --topics events
//!
//! # Brokers and group may also come from the environment
//! KAFKA_BROKERS=kafka-1:9092,kafka-2:9092 KAFKA_GROUP=my-group \
//!   kafka-proxy consume --topics events --max-processing-time 30s
//! ```

use clap::{Parser, Subcommand};
use kafka_proxy::ConsumeOpts;

#[derive(Parser)]
#[command(name = "kafka-proxy")]
#[command(about = "Consume Kafka topics through a consumer-group proxy")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a consumer group and print every message it receives
    Consume {
        #[command(flatten)]
        opts: ConsumeOpts,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kafka_proxy=info,kafka_proxy_consumer=info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume { opts } => kafka_proxy::consume(opts).await,
    }
}
