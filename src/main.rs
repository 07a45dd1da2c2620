mod cache;
mod config;
mod disambiguate;
mod error;
mod fetch;
mod logging;
mod platform;
mod provider;
mod service;
mod ticket;

#[cfg(test)]
mod testing;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

use crate::cache::{CacheSource, MemoryCache, NoopCache, SqliteStorage, TicketCache};
use crate::config::{CacheBackend, Config, FetcherKind};
use crate::disambiguate::{Disambiguator, PromptDisambiguator, RefuseDisambiguator};
use crate::fetch::{AgentFetcher, DirectApiFetcher, FetchStrategy, TicketFetcher};
use crate::platform::{Platform, PlatformCatalog, PlatformDetector};
use crate::provider::ProviderRegistry;
use crate::service::{GetOptions, TicketService};
use crate::ticket::GenericTicket;

#[derive(Parser, Debug)]
#[command(name = "tix")]
#[command(about = "Fetch and cache tickets from Jira, Linear, GitHub, Azure DevOps, Monday and Trello")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tix/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Fail on ambiguous input instead of prompting
  #[arg(long, global = true)]
  non_interactive: bool,

  /// Neither read nor write the ticket cache
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a ticket by URL or identifier
  Get {
    input: String,
    /// Platform to use instead of detecting one
    #[arg(short, long)]
    platform: Option<Platform>,
    /// Ignore the cached copy
    #[arg(long)]
    refresh: bool,
    /// Per-attempt fetch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Print the normalized ticket as JSON
    #[arg(long)]
    json: bool,
  },
  /// Drop the cached copy of a ticket
  Invalidate {
    input: String,
    #[arg(short, long)]
    platform: Option<Platform>,
  },
  /// Clear the cache, or only one platform's entries
  Clear {
    #[arg(short, long)]
    platform: Option<Platform>,
  },
  /// Show which platforms an input could refer to
  Detect { input: String },
  /// Inspect the ticket cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
  /// Print the suggested git branch name for a ticket
  Branch {
    input: String,
    #[arg(short, long)]
    platform: Option<Platform>,
  },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// List live cache entries, least recently used first
  List,
  /// Show the cached entry for a ticket without fetching it
  Show {
    input: String,
    #[arg(short, long)]
    platform: Option<Platform>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let service = build_service(&config, &args)?;

  match args.command {
    Command::Get {
      input,
      platform,
      refresh,
      timeout,
      json,
    } => {
      let options = GetOptions {
        hint: platform,
        refresh,
        timeout: timeout.map(Duration::from_secs),
      };
      let result = service.get_ticket_with(&input, &options).await?;
      if json {
        println!(
          "{}",
          serde_json::to_string_pretty(&result.data).map_err(|e| eyre!("Failed to serialize ticket: {}", e))?
        );
      } else {
        print_ticket(&result.data, result.source);
      }
    }
    Command::Invalidate { input, platform } => {
      let key = service.invalidate(&input, platform).await?;
      println!("Invalidated {}", key);
    }
    Command::Clear { platform } => {
      service.clear_cache(platform);
      match platform {
        Some(platform) => println!("Cleared cached {} tickets", platform),
        None => println!("Cleared ticket cache"),
      }
    }
    Command::Detect { input } => {
      let detections = service.detect(&input);
      if detections.is_empty() {
        let known: Vec<String> = service.platforms().iter().map(Platform::to_string).collect();
        println!("No platform recognizes '{}' (known: {})", input.trim(), known.join(", "));
      }
      for detection in detections {
        let fields: Vec<String> = detection
          .fields
          .iter()
          .map(|(k, v)| format!("{}={}", k, v))
          .collect();
        println!(
          "{:<13} {:<4} {}",
          detection.platform,
          if detection.from_url { "url" } else { "id" },
          fields.join(" ")
        );
      }
    }
    Command::Cache {
      command: CacheCommand::List,
    } => {
      let entries = service.cached_entries();
      if entries.is_empty() {
        println!("Cache is empty");
      }
      for entry in entries {
        println!(
          "{:<32} expires {}  {}",
          entry.key().to_string(),
          entry.expires_at.format("%Y-%m-%d %H:%M:%S"),
          entry.ticket.title()
        );
      }
    }
    Command::Cache {
      command: CacheCommand::Show { input, platform },
    } => match service.peek(&input, platform).await? {
      Some(entry) => {
        print_ticket(&entry.ticket, CacheSource::Cache);
        println!("Cached:   {}", entry.cached_at.format("%Y-%m-%d %H:%M:%S"));
        println!("Expires:  {}", entry.expires_at.format("%Y-%m-%d %H:%M:%S"));
        if let Some(validator) = entry.validator {
          println!("ETag:     {}", validator);
        }
      }
      None => println!("Not cached"),
    },
    Command::Branch { input, platform } => {
      let ticket = service.get_ticket(&input, platform).await?;
      println!("{}", ticket.branch_name());
    }
  }

  Ok(())
}

fn build_service(config: &Config, args: &Args) -> Result<TicketService> {
  let catalog = PlatformCatalog::builtin().map_err(|e| eyre!("Invalid platform pattern: {}", e))?;
  let providers =
    Arc::new(ProviderRegistry::from_catalog(&catalog).map_err(|e| eyre!("Invalid platform pattern: {}", e))?);

  let ttl = config.cache.ttl();
  let cache: Arc<dyn TicketCache> = match config.cache.backend {
    _ if args.no_cache => Arc::new(NoopCache),
    CacheBackend::None => Arc::new(NoopCache),
    CacheBackend::Memory => Arc::new(MemoryCache::new(ttl, config.cache.max_entries)),
    CacheBackend::Sqlite => Arc::new(SqliteStorage::open(
      config.cache.path.as_deref(),
      ttl,
      config.cache.max_entries,
    )?),
  };

  let strategy = FetchStrategy::new(
    fetcher(config.fetch.primary, config, &providers)?,
    fetcher(config.fetch.fallback, config, &providers)?,
  );

  let disambiguator: Arc<dyn Disambiguator> = if args.non_interactive || !std::io::stdin().is_terminal() {
    Arc::new(RefuseDisambiguator)
  } else {
    Arc::new(PromptDisambiguator)
  };

  Ok(
    TicketService::builder(PlatformDetector::new(Arc::new(catalog)), providers, cache, strategy)
      .disambiguator(disambiguator)
      .default_platform(config.default_platform)
      .ttl(ttl)
      .build(),
  )
}

fn fetcher(
  kind: FetcherKind,
  config: &Config,
  providers: &Arc<ProviderRegistry>,
) -> Result<Option<Arc<dyn TicketFetcher>>> {
  let fetcher: Arc<dyn TicketFetcher> = match kind {
    FetcherKind::Direct => Arc::new(DirectApiFetcher::new(config)?),
    FetcherKind::Agent => Arc::new(
      AgentFetcher::new(config.agent.command.clone(), config.agent.args.clone(), providers.clone())
        .with_timeout(config.fetch.timeout()),
    ),
    FetcherKind::None => return Ok(None),
  };
  Ok(Some(fetcher))
}

fn print_ticket(ticket: &GenericTicket, source: CacheSource) {
  println!("{}  {}", ticket.id(), ticket.title());
  println!(
    "{} | {} | {}",
    ticket.platform(),
    wire_name(&ticket.status()),
    wire_name(&ticket.ticket_type())
  );
  if !ticket.url().is_empty() {
    println!("URL:      {}", ticket.url());
  }
  if let Some(assignee) = ticket.assignee() {
    println!("Assignee: {}", assignee);
  }
  if !ticket.labels().is_empty() {
    println!("Labels:   {}", ticket.labels().join(", "));
  }
  println!("Branch:   {}", ticket.branch_name());
  if !ticket.description().is_empty() {
    println!();
    println!("{}", ticket.description());
  }
  println!();
  println!("({})", wire_name(&source));
}

/// The serde name of a unit enum variant (`IN_PROGRESS`, `cache`).
fn wire_name<T: Serialize>(value: &T) -> String {
  match serde_json::to_value(value) {
    Ok(serde_json::Value::String(s)) => s,
    _ => String::new(),
  }
}
