use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use offline_cache::agent::{Agent, Interception};
use offline_cache::cache::{BlobStore, SqliteStore, Sweeper};
use offline_cache::config::Config;
use offline_cache::event::{serve, Dispatcher, EventSource};
use offline_cache::net::{Destination, HttpFetcher, Request};
use offline_cache::notify::LogNotifier;

#[derive(Parser, Debug)]
#[command(name = "offline-cache")]
#[command(about = "A request-intercepting caching agent for offline-capable web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the static partition
  Install,
  /// Delete partitions that are no longer current
  Activate,
  /// Route a single request through the agent
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// Request destination (document, image, script, style, font)
    #[arg(long, default_value = "")]
    destination: String,
  },
  /// Evict expired remote-data entries once
  Sweep,
  /// List partitions and their entry counts
  Partitions,
  /// Serve host events read as JSON lines from stdin
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let db_path = match &config.database {
    Some(path) => path.clone(),
    None => SqliteStore::default_path()?,
  };
  let store: Arc<dyn BlobStore> = Arc::new(SqliteStore::open(&db_path)?);
  let fetcher = Arc::new(HttpFetcher::new()?);
  let agent = Agent::new(&config, store.clone(), fetcher)?;

  match args.command {
    Command::Install => {
      let installed = agent.lifecycle().install().await?;
      println!("Cached {} assets", installed.cached);
    }
    Command::Activate => {
      let activated = agent.lifecycle().activate().await?;
      if activated.deleted.is_empty() {
        println!("No stale partitions");
      }
      for name in activated.deleted {
        println!("Deleted {}", name);
      }
    }
    Command::Fetch {
      url,
      method,
      accept,
      destination,
    } => {
      let url = Request::resolve(&config.origin()?, &url)?;
      let mut request = Request::get(url)
        .with_method(&method)
        .with_destination(Destination::parse(&destination));
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }

      match agent.handle(&request).await? {
        Interception::Respond(routed) => {
          println!("{} ({:?})", routed.response.status, routed.source);
          for (name, value) in &routed.response.headers {
            println!("{}: {}", name, value);
          }
          println!();
          println!("{}", routed.response.body_text());
        }
        Interception::Passthrough => {
          let response = agent.fetch(&request).await?;
          println!("{} (passthrough)", response.status);
        }
      }
      agent.wait_idle().await;
    }
    Command::Sweep => {
      let sweeper = Sweeper::new(agent.dynamic().await?, config.sweep_interval());
      let report = sweeper.sweep_once(Utc::now()).await?;
      println!(
        "Evicted {}, kept {}, skipped {}",
        report.evicted.len(),
        report.kept,
        report.skipped
      );
      for key in report.evicted {
        println!("  {}", key);
      }
    }
    Command::Partitions => {
      for name in store.partition_names().await? {
        let count = store.keys(&name).await?.len();
        println!("{}\t{}", name, count);
      }
    }
    Command::Run => run(&config, agent).await?,
  }

  Ok(())
}

/// Host event loop: one JSON outcome line per event line on stdin.
async fn run(config: &Config, agent: Agent) -> Result<()> {
  let sweeper = Sweeper::new(agent.dynamic().await?, config.sweep_interval());
  let sweeping = sweeper.spawn(agent.cancellation());

  let dispatcher = Arc::new(Dispatcher::new(
    agent.clone(),
    Arc::new(LogNotifier),
    config.notifications.clone(),
    config.origin()?,
  ));

  info!("Agent running");
  let events = EventSource::spawn(BufReader::new(tokio::io::stdin()));
  serve(dispatcher, events, tokio::io::stdout()).await?;

  info!("Input closed, shutting down");
  agent.shutdown().await;
  sweeping
    .await
    .map_err(|e| eyre!("Sweeper task failed: {}", e))?;

  Ok(())
}

/// Log to a daily file under the data directory; stdout carries command output.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("offline-cache")
    .join("logs");

  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("agent")
    .filename_suffix("log")
    .build(&log_dir)
    .map_err(|e| eyre!("Failed to open log directory {}: {}", log_dir.display(), e))?;
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let default_level = if verbose {
    "offline_cache=debug"
  } else {
    "offline_cache=info"
  };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
