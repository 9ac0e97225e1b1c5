//! # Redisque CLI
//!
//! Command-line interface for Redisque queues.
//!
//! This module provides CLI commands for:
//! - Enqueueing, checking out, acknowledging and releasing messages
//! - Inspecting partition sizes
//! - Running the scheduler until interrupted
//! - Printing the resolved configuration

use clap::{Parser, Subcommand};
use redisque_runtime::{
    ConfigurationError, Delay, EnqueueOptions, MessageId, NewMessage, QueueError, Redisque,
    RedisqueConfig, SchedulerEvent, ValidationError,
};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Redisque CLI - delayed-delivery job queues over Redis
#[derive(Parser)]
#[command(name = "redisque")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Delayed-delivery job queues over Redis")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "REDISQUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Enqueue a message
    Put {
        queue: String,

        body: String,

        /// Relative seconds or an RFC 3339 timestamp
        #[arg(short, long)]
        delay: Option<String>,

        /// Visibility timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Use this id instead of a generated one
        #[arg(long)]
        id: Option<String>,

        /// Message attribute as key=value; may be repeated
        #[arg(short, long = "attribute")]
        attributes: Vec<String>,
    },

    /// Check out ready messages
    Get {
        queue: String,

        /// Number of messages to claim
        #[arg(short = 'n', long)]
        count: Option<u32>,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Acknowledge (archive) a message
    Delete { queue: String, id: String },

    /// Return an in-flight message to the ready list
    Release { queue: String, id: String },

    /// Show partition sizes
    Stats {
        queue: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run the promotion and reclaim loops until Ctrl-C
    Scheduler,

    /// Print the resolved configuration
    Config {
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

/// Output format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Output failed: {message}")]
    Output { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(e) if e.is_transient() => 2,
            Self::Queue(_) => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) | Self::Output { .. } => 5,
            Self::Logging { .. } => 6,
        }
    }
}

impl From<ValidationError> for CliError {
    fn from(e: ValidationError) -> Self {
        Self::Queue(QueueError::Validation(e))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::Output {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Output {
            message: e.to_string(),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli.log_level, cli.json_logs)?;

    let config = RedisqueConfig::load(cli.config.as_deref())?;
    debug!(store = %config.store.url(), "Configuration loaded");

    let mut stdout = std::io::stdout().lock();
    if let Commands::Config { format } = &cli.command {
        return print_config(&config, format, &mut stdout);
    }

    let redisque = Redisque::connect(config).await?;
    execute_command(cli.command, &redisque, &mut stdout).await
}

/// Install the global subscriber; `RUST_LOG` overrides `level`
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("redisque_runtime={0},redisque_cli={0}", level))
            .map_err(|e| CliError::InvalidArgument {
                arg: "log-level".to_string(),
                message: e.to_string(),
            })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Run a queue or scheduler command, writing results to `out`
pub async fn execute_command(
    command: Commands,
    redisque: &Redisque,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Put {
            queue,
            body,
            delay,
            timeout,
            id,
            attributes,
        } => {
            let message = build_message(body, delay, timeout, id, &attributes)?;
            let ids = redisque
                .queue(&queue)?
                .enqueue(std::iter::once(message), &EnqueueOptions::default())
                .await?;
            for id in ids {
                writeln!(out, "{}", id)?;
            }
        }
        Commands::Get {
            queue,
            count,
            format,
        } => {
            let messages = redisque.queue(&queue)?.checkout(count).await?;
            match format {
                OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&messages)?)?,
                OutputFormat::Text => {
                    for message in &messages {
                        writeln!(out, "{}\t{}", message.id, message.body)?;
                    }
                }
            }
        }
        Commands::Delete { queue, id } => {
            let id = parse_id(&id)?;
            redisque.queue(&queue)?.acknowledge(&id).await?;
            writeln!(out, "deleted {}", id)?;
        }
        Commands::Release { queue, id } => {
            let id = parse_id(&id)?;
            redisque.queue(&queue)?.release(&id).await?;
            writeln!(out, "released {}", id)?;
        }
        Commands::Stats { queue, format } => {
            let stats = redisque.queue(&queue)?.stats().await?;
            match format {
                OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?,
                OutputFormat::Text => {
                    writeln!(out, "scheduled:  {}", stats.scheduled)?;
                    writeln!(out, "active:     {}", stats.active)?;
                    writeln!(out, "processing: {}", stats.processing)?;
                    writeln!(out, "archived:   {}", stats.archived)?;
                }
            }
        }
        Commands::Scheduler => run_scheduler(redisque).await,
        Commands::Config { format } => print_config(redisque.config(), &format, out)?,
    }

    Ok(())
}

/// Assemble a message from command-line fields
pub fn build_message(
    body: String,
    delay: Option<String>,
    timeout: Option<u64>,
    id: Option<String>,
    attributes: &[String],
) -> Result<NewMessage, CliError> {
    let mut message = NewMessage::new(body);
    if let Some(delay) = delay {
        message = message.with_delay(delay.parse::<Delay>()?);
    }
    if let Some(timeout) = timeout {
        message = message.with_timeout(timeout);
    }
    if let Some(id) = id {
        message = message.with_id(parse_id(&id)?);
    }
    for attribute in attributes {
        let (key, value) = attribute
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument {
                arg: "attribute".to_string(),
                message: format!("'{}' is not key=value", attribute),
            })?;
        message = message.with_attribute(key, value);
    }

    Ok(message)
}

fn parse_id(id: &str) -> Result<MessageId, CliError> {
    id.parse::<MessageId>().map_err(CliError::from)
}

fn print_config(
    config: &RedisqueConfig,
    format: &ConfigFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
    };
    writeln!(out, "{}", rendered.trim_end())?;
    Ok(())
}

async fn run_scheduler(redisque: &Redisque) {
    let scheduler = redisque.scheduler();
    let mut events = scheduler.subscribe();
    scheduler.start();
    info!(owner = scheduler.owner(), "Scheduler running; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SchedulerEvent::Error(message)) => warn!(error = %message, "Scheduler error"),
                Ok(SchedulerEvent::StartScheduler) => info!("Leading promotion"),
                Ok(SchedulerEvent::StartTimeout) => info!("Leading reclaim"),
                Ok(event) => debug!(?event, "Scheduler event"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Scheduler events skipped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.stop().await;
    info!("Scheduler stopped");
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
