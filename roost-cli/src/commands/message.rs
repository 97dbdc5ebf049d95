//! Message commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use roost::{Draft, Entity, EntityKind, UserId};

use crate::config;
use crate::output::{print_table, MessageRow, OutputFormat, SessionRow};

#[derive(Subcommand)]
pub enum MessageAction {
    /// List conversations
    #[command(alias = "ls")]
    List,

    /// Show a conversation without touching its unread state
    Show {
        /// Counterpart username
        user: String,
    },

    /// Read a conversation and mark it read
    Read {
        /// Counterpart username
        user: String,
    },

    /// Send a message
    Send {
        /// Recipient username
        #[arg(short, long)]
        to: String,
        /// Message content
        content: String,
    },

    /// Delete a conversation and its messages
    Remove {
        /// Counterpart username
        user: String,
    },
}

pub async fn handle(action: MessageAction, format: OutputFormat, _verbose: bool) -> Result<()> {
    match action {
        MessageAction::List => list(format).await,
        MessageAction::Show { user } => show(&user, false, format).await,
        MessageAction::Read { user } => show(&user, true, format).await,
        MessageAction::Send { to, content } => send(&to, &content).await,
        MessageAction::Remove { user } => remove(&user).await,
    }
}

async fn list(format: OutputFormat) -> Result<()> {
    let engine = config::build_engine()?;
    engine.bootstrap().await?;

    let sessions = engine.sessions().sessions();
    let rows: Vec<SessionRow> = {
        let store = engine.store().lock().unwrap();
        sessions
            .iter()
            .map(|s| SessionRow::from_session(s, store.get(&s.latest_entity)))
            .collect()
    };

    if matches!(format, OutputFormat::Plain) {
        let unread = engine.sessions().unread_count();
        println!("{} conversations, {} unread\n", sessions.len(), unread);
    }

    print_table(rows, format);
    Ok(())
}

/// Cached messages for one conversation, in display order.
fn conversation(engine: &roost::SyncEngine, counterpart: &UserId) -> Vec<Entity> {
    let owner = engine.owner().clone();
    let store = engine.store().lock().unwrap();
    store.entities_with(|e| e.counterpart_for(&owner) == Some(counterpart))
}

async fn show(user: &str, mark_read: bool, format: OutputFormat) -> Result<()> {
    let counterpart: UserId = user.into();
    let engine = config::build_engine()?;
    engine.bootstrap().await?;

    if engine.sessions().session(&counterpart).is_none() {
        anyhow::bail!("no conversation with {}", counterpart);
    }
    if mark_read {
        engine.sessions().mark_read(&counterpart).await?;
    }

    if matches!(format, OutputFormat::Plain) {
        println!("conversation with {}\n", user.green());
    }

    let owner = engine.owner().clone();
    let rows: Vec<MessageRow> = conversation(&engine, &counterpart)
        .iter()
        .map(|e| MessageRow::new(e, &owner))
        .collect();
    print_table(rows, format);
    Ok(())
}

async fn send(to: &str, content: &str) -> Result<()> {
    let engine = config::build_engine()?;
    engine.bootstrap().await?;

    let entity = engine
        .mutations()
        .submit(Draft {
            kind: EntityKind::Message,
            recipient: Some(to.into()),
            content: content.to_string(),
        })
        .await?;
    engine
        .sessions()
        .ingest(std::slice::from_ref(&entity))
        .await?;

    println!("sent to {} as {}", to.green(), entity.id.to_string().cyan());
    Ok(())
}

async fn remove(user: &str) -> Result<()> {
    let counterpart: UserId = user.into();
    let engine = config::build_engine()?;
    engine.bootstrap().await?;

    if engine.sessions().session(&counterpart).is_none() {
        anyhow::bail!("no conversation with {}", counterpart);
    }
    engine.sessions().remove(&counterpart).await?;

    println!("removed conversation with {}", user);
    Ok(())
}
