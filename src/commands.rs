use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;

use fmcache::cache::{CacheKey, Collection};
use fmcache::remote::{Condition, Fields};
use fmcache::session::SessionStore;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List every document in a collection
  #[command(alias = "ls")]
  List {
    collection: Collection,
    /// Skip the cache and refetch
    #[arg(short, long)]
    refresh: bool,
  },

  /// Show one document
  Get {
    collection: Collection,
    id: String,
    #[arg(short, long)]
    refresh: bool,
  },

  /// Create a document from a JSON object
  Add { collection: Collection, json: String },

  /// Merge a JSON object into a document
  Update {
    collection: Collection,
    id: String,
    json: String,
  },

  /// Delete one document
  #[command(alias = "rm")]
  Delete { collection: Collection, id: String },

  /// Query a collection (never cached)
  Query {
    collection: Collection,
    /// Condition as field:op:value, repeatable (ANDed)
    #[arg(short = 'w', long = "where")]
    conditions: Vec<Condition>,
  },

  /// Delete every document in a collection
  Purge {
    collection: Collection,
    /// Confirm the deletion
    #[arg(long)]
    yes: bool,
  },

  /// Document count per collection
  Counts,

  /// Inspect or maintain the local cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Entry counts and size
  Stats,
  /// Remove every cache entry
  Clear,
  /// Remove entries past the stale threshold
  Sweep,
  /// Remove a collection's entries, or one document's entry
  Invalidate {
    collection: Collection,
    id: Option<String>,
  },
}

/// Parse a JSON object argument into document fields.
fn parse_fields(json: &str) -> Result<Fields> {
  match serde_json::from_str::<Value>(json) {
    Ok(Value::Object(fields)) => Ok(fields),
    Ok(_) => Err(eyre!("Document data must be a JSON object")),
    Err(e) => Err(eyre!("Invalid JSON document: {}", e)),
  }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", out);
  Ok(())
}

/// Execute a command against the session's store.
pub async fn run(store: &SessionStore, command: Command) -> Result<()> {
  match command {
    Command::List {
      collection,
      refresh,
    } => print(&store.get_all_documents(collection, refresh).await),
    Command::Get {
      collection,
      id,
      refresh,
    } => print(&store.get_document(collection, &id, refresh).await),
    Command::Add { collection, json } => {
      let data = parse_fields(&json)?;
      print(&store.add_document(collection, data).await)
    }
    Command::Update {
      collection,
      id,
      json,
    } => {
      let data = parse_fields(&json)?;
      print(&store.update_document(collection, &id, data).await)
    }
    Command::Delete { collection, id } => print(&store.delete_document(collection, &id).await),
    Command::Query {
      collection,
      conditions,
    } => print(&store.query_documents(collection, &conditions).await),
    Command::Purge { collection, yes } => {
      if !yes {
        return Err(eyre!(
          "Refusing to delete every document in '{}' without --yes",
          collection
        ));
      }
      print(&store.purge_collection(collection).await)
    }
    Command::Counts => {
      let counts: serde_json::Map<String, Value> = store
        .counts(&Collection::ALL)
        .await
        .into_iter()
        .map(|(collection, count)| {
          let value = serde_json::to_value(count).unwrap_or(Value::Null);
          (collection.to_string(), value)
        })
        .collect();
      print(&counts)
    }
    Command::Cache(cache_command) => run_cache(store, cache_command),
  }
}

fn run_cache(store: &SessionStore, command: CacheCommand) -> Result<()> {
  let cache = store.cache();
  match command {
    CacheCommand::Stats => print(&cache.stats()),
    CacheCommand::Clear => {
      cache.clear();
      Ok(())
    }
    CacheCommand::Sweep => print(&serde_json::json!({ "removed": cache.evict_stale() })),
    CacheCommand::Invalidate {
      collection,
      id: Some(id),
    } => {
      cache.invalidate(&CacheKey::document(collection, id));
      Ok(())
    }
    CacheCommand::Invalidate {
      collection,
      id: None,
    } => {
      cache.invalidate_collection(collection);
      Ok(())
    }
  }
}
