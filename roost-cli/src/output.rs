//! Output formatting.

use chrono::{Local, TimeZone};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use roost::{Entity, EntityKind, Session, SyncStatus, UserId};
use serde::Serialize;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table format
    Table,
    /// JSON format
    Json,
    /// Plain text format
    #[default]
    Plain,
}

/// Trait for plain text output.
pub trait PlainPrint {
    /// Print as plain text with formatting.
    fn plain_print(&self);
}

/// Trait for table row generation.
pub trait TableRow {
    /// Get table headers.
    fn headers() -> Vec<&'static str>;
    /// Get row data as strings.
    fn row(&self) -> Vec<String>;
}

/// Print items in plain text format.
pub fn print_plain<T: PlainPrint>(items: &[T]) {
    if items.is_empty() {
        println!("No results");
        return;
    }
    for item in items {
        item.plain_print();
    }
}

/// Format a millisecond Unix timestamp for display.
pub fn format_time(timestamp_ms: i64) -> String {
    if timestamp_ms == 0 {
        return "-".to_string();
    }

    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

/// One-word label for a page's freshness.
pub fn status_label(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Fresh => "fresh",
        SyncStatus::CachedOnly => "cached",
        SyncStatus::CachedFallback => "cached (remote failed)",
        SyncStatus::Offline => "offline",
    }
}

/// Print a table of items with proper formatting for each output mode.
pub fn print_table<T: TableRow + Serialize + PlainPrint>(items: Vec<T>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items).unwrap_or_default());
        }
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No results");
                return;
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(T::headers());
            for item in &items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Plain => {
            print_plain(&items);
        }
    }
}

/// Row for feed entity display.
#[derive(Serialize)]
pub struct EntityRow {
    pub id: String,
    pub kind: String,
    pub author: String,
    pub time: String,
    pub content: String,
    pub favorites: i64,
    pub reposts: i64,
    pub favorited: bool,
}

impl From<&Entity> for EntityRow {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id.to_string(),
            kind: match e.kind {
                EntityKind::Post => "post".to_string(),
                EntityKind::Message => "message".to_string(),
            },
            author: e.author.to_string(),
            time: format_time(e.created_at),
            content: e.content.clone().unwrap_or_default(),
            favorites: e.counts.favorites,
            reposts: e.counts.reposts,
            favorited: e.flags.favorited,
        }
    }
}

impl TableRow for EntityRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Kind", "Author", "Time", "Content", "Favs", "Reposts"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.kind.clone(),
            self.author.clone(),
            self.time.clone(),
            self.content.clone(),
            self.favorites.to_string(),
            self.reposts.to_string(),
        ]
    }
}

impl PlainPrint for EntityRow {
    fn plain_print(&self) {
        let marker = if self.favorited { "*".yellow() } else { " ".normal() };
        println!(
            "{}[{}] {} {}",
            marker,
            self.id.cyan(),
            self.author.bold(),
            self.time.dimmed()
        );
        if !self.content.is_empty() {
            println!("   {}", self.content);
        }
    }
}

/// Row for session list display.
#[derive(Serialize)]
pub struct SessionRow {
    pub counterpart: String,
    pub last_active: String,
    pub unread: bool,
    pub latest: String,
}

impl SessionRow {
    /// Build from a session plus the cached latest message, if present.
    pub fn from_session(session: &Session, latest: Option<&Entity>) -> Self {
        Self {
            counterpart: session.counterpart.to_string(),
            last_active: format_time(session.last_active),
            unread: session.unread,
            latest: latest
                .and_then(|e| e.content.clone())
                .unwrap_or_default(),
        }
    }
}

impl TableRow for SessionRow {
    fn headers() -> Vec<&'static str> {
        vec!["Counterpart", "Last active", "Unread", "Latest"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.counterpart.clone(),
            self.last_active.clone(),
            if self.unread { "yes".to_string() } else { String::new() },
            self.latest.clone(),
        ]
    }
}

impl PlainPrint for SessionRow {
    fn plain_print(&self) {
        let name = if self.unread {
            self.counterpart.bold().green()
        } else {
            self.counterpart.normal()
        };
        println!("{} {}", name, self.last_active.dimmed());
        if !self.latest.is_empty() {
            println!("   {}", self.latest);
        }
    }
}

/// Row for a message inside one conversation.
#[derive(Serialize)]
pub struct MessageRow {
    pub id: String,
    pub from: String,
    pub time: String,
    pub content: String,
    pub incoming: bool,
}

impl MessageRow {
    pub fn new(entity: &Entity, owner: &UserId) -> Self {
        Self {
            id: entity.id.to_string(),
            from: entity.author.to_string(),
            time: format_time(entity.created_at),
            content: entity.content.clone().unwrap_or_default(),
            incoming: entity.is_incoming_for(owner),
        }
    }
}

impl TableRow for MessageRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "From", "Time", "Content"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.from.clone(),
            self.time.clone(),
            self.content.clone(),
        ]
    }
}

impl PlainPrint for MessageRow {
    fn plain_print(&self) {
        let from = if self.incoming {
            self.from.green()
        } else {
            self.from.blue()
        };
        println!("{} {} {}", from.bold(), self.time.dimmed(), self.content);
    }
}
