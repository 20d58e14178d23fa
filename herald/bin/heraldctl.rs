//! Command-line utility for operating a herald queue
//!
//! Works directly on the file-backed store named in the configuration file:
//! - Listing records by status
//! - Viewing a single record
//! - Re-queueing failed records
//! - Queueing a mail by hand
//! - Viewing statistics

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use herald_delivery::{Enqueuer, MailEnvelope, MailQueueService, QueueAdmin};
use herald_queue::{QueueRecord, QueueStatus, RecordId, StoreConfig};
use serde_json::{Map, Value};

/// Manage the herald mail queue
#[derive(Parser, Debug)]
#[command(name = "heraldctl", version, about, long_about = None)]
struct Cli {
    /// Configuration file (same lookup as the herald daemon)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List records, oldest first
    List {
        /// Only records in this status (pending, processing, success, failed)
        #[arg(long)]
        status: Option<QueueStatus>,
    },
    /// Show a single record
    View { id: RecordId },
    /// Move a failed record back to pending with a fresh retry budget
    Retry { id: RecordId },
    /// Count records per status
    Stats,
    /// Queue a mail
    Enqueue {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        template: String,
        #[arg(long)]
        cc: Vec<String>,
        #[arg(long)]
        bcc: Vec<String>,
        /// Template data as a JSON object
        #[arg(long)]
        data: Option<String>,
        /// 1 (high), 2 (medium) or 3 (low)
        #[arg(long)]
        priority: Option<u8>,
        /// Recorded as the requesting actor
        #[arg(long, default_value = "heraldctl")]
        actor: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = herald::config::find_config_file(cli.config)?;
    let config = herald::config::load(&config_path)?;

    if matches!(config.store, StoreConfig::Memory(_)) {
        anyhow::bail!("heraldctl needs a file-backed queue; the configured store lives in memory");
    }
    let store = config.store.into_store()?;
    let admin = QueueAdmin::new(Arc::clone(&store));

    match cli.command {
        Command::List { status } => {
            let records = admin.list(status).await?;
            print_records(&records, cli.format)?;
        }
        Command::View { id } => {
            let record = admin.get(&id).await?;
            print_records(std::slice::from_ref(&record), cli.format)?;
        }
        Command::Retry { id } => {
            let record = admin.retry(&id).await?;
            println!("Re-queued {} for {}", record.id, record.to);
        }
        Command::Stats => {
            let stats = admin.stats().await?;
            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                Format::Text => {
                    for (status, count) in stats.by_status() {
                        println!("{status:<12} {count}");
                    }
                    println!("{:<12} {}", "total", stats.total());
                }
            }
        }
        Command::Enqueue {
            to,
            subject,
            template,
            cc,
            bcc,
            data,
            priority,
            actor,
        } => {
            let mut envelope = MailEnvelope::new(to, subject, template);
            envelope.cc = cc;
            envelope.bcc = bcc;
            envelope.priority = priority;
            if let Some(data) = data {
                envelope.template_data = serde_json::from_str::<Map<String, Value>>(&data)?;
            }

            let record = Enqueuer::new(store).enqueue(envelope, &actor).await?;
            println!("Queued {} ({} priority)", record.id, record.priority);
        }
    }

    Ok(())
}

fn print_records(records: &[QueueRecord], format: Format) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(records)?),
        Format::Text => {
            if records.is_empty() {
                println!("No records");
            }
            for record in records {
                println!(
                    "{}  {:<10} {:<6} retries={} to={} template={}",
                    record.id,
                    record.status.to_string(),
                    record.priority.to_string(),
                    record.retry_count,
                    record.to,
                    record.template_name,
                );
                if let Some(error) = &record.error_message {
                    println!("    last error: {error}");
                }
            }
        }
    }
    Ok(())
}
