//! Feed commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use roost::{Draft, EntityId, EntityKind, EntityPatch, EventKind, StoreEvent, SyncEngine};
use std::time::Duration;

use crate::config::{self, load_config};
use crate::output::{print_table, status_label, EntityRow, OutputFormat};

#[derive(Subcommand)]
pub enum FeedAction {
    /// Show the feed, cache-first
    #[command(alias = "ls")]
    Show {
        /// Number of pages to load
        #[arg(short, long, default_value = "1")]
        pages: u32,
    },

    /// Load the next page after the cached window
    More,

    /// Force a remote refresh of the first page
    Refresh,

    /// Toggle favorite on an entity
    Like {
        /// Entity ID
        id: String,
    },

    /// Toggle bookmark on an entity
    Bookmark {
        /// Entity ID
        id: String,
    },

    /// Repost an entity
    Repost {
        /// Entity ID
        id: String,
    },

    /// Publish a new post
    Post {
        /// Post content
        content: String,
    },

    /// Delete an entity
    Delete {
        /// Entity ID
        id: String,
    },

    /// Keep refreshing in the background and print changes as they land
    Watch {
        /// Refresh interval in seconds (defaults to the configured value)
        #[arg(short, long)]
        every: Option<u64>,
    },
}

pub async fn handle(action: FeedAction, format: OutputFormat, _verbose: bool) -> Result<()> {
    match action {
        FeedAction::Show { pages } => show(pages, format).await,
        FeedAction::More => more(format).await,
        FeedAction::Refresh => refresh(format).await,
        FeedAction::Like { id } => like(&id).await,
        FeedAction::Bookmark { id } => bookmark(&id).await,
        FeedAction::Repost { id } => repost(&id).await,
        FeedAction::Post { content } => post(&content).await,
        FeedAction::Delete { id } => delete(&id).await,
        FeedAction::Watch { every } => watch(every).await,
    }
}

async fn show(pages: u32, format: OutputFormat) -> Result<()> {
    let engine = config::build_engine()?;
    let first = engine.bootstrap().await?;

    let mut entities = first.entities;
    for _ in 1..pages {
        match engine.feed().load_more().await? {
            Some(page) => entities.extend(page.entities),
            None => break,
        }
    }

    if matches!(format, OutputFormat::Plain) {
        println!(
            "{} entities ({}){}\n",
            entities.len(),
            status_label(first.status),
            if engine.feed().has_more() { ", more available" } else { "" }
        );
    }

    print_table(entities.iter().map(EntityRow::from).collect(), format);
    Ok(())
}

async fn more(format: OutputFormat) -> Result<()> {
    let engine = config::build_engine()?;
    engine.bootstrap().await?;

    match engine.feed().load_more().await? {
        Some(page) => {
            if matches!(format, OutputFormat::Plain) {
                println!("{} entities ({})\n", page.entities.len(), status_label(page.status));
            }
            print_table(page.entities.iter().map(EntityRow::from).collect(), format);
        }
        None => println!("no more pages"),
    }
    Ok(())
}

async fn refresh(format: OutputFormat) -> Result<()> {
    let engine = config::build_engine()?;
    let page = engine.feed().refresh().await?;
    engine.sessions().ingest(&page.entities).await?;

    if matches!(format, OutputFormat::Plain) {
        println!("{} entities ({})\n", page.entities.len(), status_label(page.status));
    }

    print_table(page.entities.iter().map(EntityRow::from).collect(), format);
    Ok(())
}

/// Hydrate the engine so a cached entity is present before mutating it.
async fn engine_with_entity(id: &EntityId) -> Result<SyncEngine> {
    let engine = config::build_engine()?;
    engine.bootstrap().await?;
    if engine.store().lock().unwrap().get(id).is_none() {
        anyhow::bail!("unknown entity {}", id);
    }
    Ok(engine)
}

async fn like(id: &str) -> Result<()> {
    let id: EntityId = id.into();
    let engine = engine_with_entity(&id).await?;

    let patch = {
        let store = engine.store().lock().unwrap();
        EntityPatch::toggle_favorite(store.get(&id).ok_or_else(|| anyhow::anyhow!("gone"))?)
    };
    let settled = engine.mutations().apply(id, patch).await?;

    let state = if settled.flags.favorited { "favorited".green() } else { "unfavorited".normal() };
    println!("{} {} ({} favorites)", settled.id, state, settled.counts.favorites);
    Ok(())
}

async fn bookmark(id: &str) -> Result<()> {
    let id: EntityId = id.into();
    let engine = engine_with_entity(&id).await?;

    let patch = {
        let store = engine.store().lock().unwrap();
        EntityPatch::toggle_bookmark(store.get(&id).ok_or_else(|| anyhow::anyhow!("gone"))?)
    };
    let settled = engine.mutations().apply(id, patch).await?;

    let state = if settled.flags.bookmarked { "bookmarked".green() } else { "unbookmarked".normal() };
    println!("{} {}", settled.id, state);
    Ok(())
}

async fn repost(id: &str) -> Result<()> {
    let id: EntityId = id.into();
    let engine = engine_with_entity(&id).await?;

    let patch = {
        let store = engine.store().lock().unwrap();
        EntityPatch::repost(store.get(&id).ok_or_else(|| anyhow::anyhow!("gone"))?)
    };
    let settled = engine.mutations().apply(id, patch).await?;

    println!("{} reposted ({} reposts)", settled.id, settled.counts.reposts);
    Ok(())
}

async fn post(content: &str) -> Result<()> {
    let engine = config::build_engine()?;
    engine.bootstrap().await?;

    let entity = engine
        .mutations()
        .submit(Draft {
            kind: EntityKind::Post,
            recipient: None,
            content: content.to_string(),
        })
        .await?;

    println!("posted as {}", entity.id.to_string().cyan());
    Ok(())
}

async fn delete(id: &str) -> Result<()> {
    let id: EntityId = id.into();
    let engine = engine_with_entity(&id).await?;

    let snapshot = engine.store().lock().unwrap().get(&id).cloned();
    engine.mutations().delete(id.clone()).await?;
    if let Some(entity) = snapshot {
        engine.sessions().entity_deleted(&entity).await?;
    }

    println!("deleted {}", id);
    Ok(())
}

async fn watch(every: Option<u64>) -> Result<()> {
    let cfg = load_config()?;
    let every = Duration::from_secs(every.unwrap_or(cfg.poll_secs));

    let engine = config::build_engine()?;
    let page = engine.bootstrap().await?;
    println!(
        "watching feed for {} ({} cached entities, refresh every {:?}; ctrl-c to stop)",
        engine.owner(),
        page.entities.len(),
        every
    );

    let bus = engine.bus().clone();
    for kind in [
        EventKind::EntityCreated,
        EventKind::EntityUpdated,
        EventKind::EntityDeleted,
        EventKind::SessionChanged,
    ] {
        bus.subscribe_all(kind, move |event| match event {
            StoreEvent::EntityCreated(e) => {
                println!("{} {} by {}", "new".green(), e.id, e.author)
            }
            StoreEvent::EntityUpdated(e) => println!("{} {}", "updated".yellow(), e.id),
            StoreEvent::EntityDeleted(id) => println!("{} {}", "deleted".red(), id),
            StoreEvent::SessionChanged(s) => {
                println!("{} conversation with {}", "session".blue(), s.counterpart)
            }
            _ => {}
        });
    }

    engine.start_feed_poll(every);
    tokio::signal::ctrl_c().await?;
    engine.stop_feed_poll();
    Ok(())
}
