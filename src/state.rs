//! Event log - SQLite-based persistence for sync outcomes
//!
//! This module provides persistent storage for:
//! - Per-world last sync status (last outcome, when, why it was skipped)
//! - Sync events (pushes, pulls, created repositories, refusals, errors)
//!
//! The database is stored in the user data directory as worldsync/state.db

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use tracing::{debug, info};

/// Event types that can occur during sync operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// World was committed and pushed
    Pushed,
    /// Push found nothing new to commit
    NothingToBackup,
    /// World was hard-reset to the remote and pulled
    Pulled,
    /// Remote had no branch to pull yet
    NothingToPull,
    /// World was cloned into the saves directory
    Cloned,
    /// A private backup repository was created
    RepoCreated,
    /// Backup metadata was removed from a world
    Unbound,
    /// World directory was renamed to its recorded casing
    Renamed,
    /// Push refused because the world has no content
    SkippedEmpty,
    /// Clone refused because unrelated files are in the way
    SkippedLocalConflict,
    /// A reconciliation pass finished
    Reconciled,
    /// Sync operation failed with an error
    SyncError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Pushed => "pushed",
            EventType::NothingToBackup => "nothing_to_backup",
            EventType::Pulled => "pulled",
            EventType::NothingToPull => "nothing_to_pull",
            EventType::Cloned => "cloned",
            EventType::RepoCreated => "repo_created",
            EventType::Unbound => "unbound",
            EventType::Renamed => "renamed",
            EventType::SkippedEmpty => "skipped_empty",
            EventType::SkippedLocalConflict => "skipped_local_conflict",
            EventType::Reconciled => "reconciled",
            EventType::SyncError => "sync_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pushed" => Some(EventType::Pushed),
            "nothing_to_backup" => Some(EventType::NothingToBackup),
            "pulled" => Some(EventType::Pulled),
            "nothing_to_pull" => Some(EventType::NothingToPull),
            "cloned" => Some(EventType::Cloned),
            "repo_created" => Some(EventType::RepoCreated),
            "unbound" => Some(EventType::Unbound),
            "renamed" => Some(EventType::Renamed),
            "skipped_empty" => Some(EventType::SkippedEmpty),
            "skipped_local_conflict" => Some(EventType::SkippedLocalConflict),
            "reconciled" => Some(EventType::Reconciled),
            "sync_error" => Some(EventType::SyncError),
            _ => None,
        }
    }

    /// Get the severity level for this event type
    pub fn severity(&self) -> Severity {
        match self {
            EventType::Pushed
            | EventType::NothingToBackup
            | EventType::Pulled
            | EventType::NothingToPull
            | EventType::Cloned
            | EventType::RepoCreated
            | EventType::Unbound
            | EventType::Renamed
            | EventType::Reconciled => Severity::Info,
            EventType::SkippedEmpty | EventType::SkippedLocalConflict => Severity::Warning,
            EventType::SyncError => Severity::Error,
        }
    }
}

/// Severity levels for events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Outcome of the most recent operation on a world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldStatus {
    Ok,
    Skipped,
    Error,
    Unknown,
}

impl WorldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldStatus::Ok => "ok",
            WorldStatus::Skipped => "skipped",
            WorldStatus::Error => "error",
            WorldStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => WorldStatus::Ok,
            "skipped" => WorldStatus::Skipped,
            "error" => WorldStatus::Error,
            _ => WorldStatus::Unknown,
        }
    }

    fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info => WorldStatus::Ok,
            Severity::Warning => WorldStatus::Skipped,
            Severity::Error => WorldStatus::Error,
        }
    }
}

/// Last known state of one world
#[derive(Debug, Clone)]
pub struct WorldState {
    pub name: String,
    pub last_event: Option<EventType>,
    pub last_status: WorldStatus,
    pub last_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A sync event record
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub world: Option<String>,
    pub event_type: EventType,
    pub severity: Severity,
    pub summary: String,
    pub details: Option<String>,
    pub acknowledged: bool,
}

/// Builder for creating new sync events
#[derive(Debug)]
pub struct SyncEventBuilder {
    world: Option<String>,
    event_type: EventType,
    summary: String,
    details: Option<String>,
}

impl SyncEventBuilder {
    pub fn new(event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            world: None,
            event_type,
            summary: summary.into(),
            details: None,
        }
    }

    pub fn world(mut self, name: impl Into<String>) -> Self {
        self.world = Some(name.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// State database manager
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Open or create the state database
    pub fn open() -> Result<Self> {
        let db_path = Self::default_db_path()?;
        Self::open_at(db_path)
    }

    /// Open or create the state database at a specific path
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;

        info!("State database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Get the default database path
    pub fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Failed to get user data directory")?;
        Ok(data_dir.join("worldsync").join("state.db"))
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                -- World state table
                CREATE TABLE IF NOT EXISTS worlds (
                    name TEXT PRIMARY KEY NOT NULL,
                    last_event TEXT,
                    last_status TEXT DEFAULT 'unknown',
                    last_message TEXT,
                    updated_at TEXT NOT NULL
                );

                -- Event log table
                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    world TEXT,
                    event_type TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    details TEXT,
                    acknowledged INTEGER DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_events_unack ON events(acknowledged, timestamp);
                CREATE INDEX IF NOT EXISTS idx_events_world ON events(world, timestamp);
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    // =========================================================================
    // World State Operations
    // =========================================================================

    fn upsert_world(&self, name: &str, event_type: EventType, message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let status = WorldStatus::from_severity(event_type.severity());

        self.conn
            .execute(
                r#"
                INSERT INTO worlds (name, last_event, last_status, last_message, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(name) DO UPDATE SET
                    last_event = ?2,
                    last_status = ?3,
                    last_message = ?4,
                    updated_at = ?5
                "#,
                params![name, event_type.as_str(), status.as_str(), message, now],
            )
            .context("Failed to upsert world state")?;

        Ok(())
    }

    /// Get a world's last recorded state
    pub fn get_world(&self, name: &str) -> Result<Option<WorldState>> {
        let result = self
            .conn
            .query_row(
                r#"
                SELECT name, last_event, last_status, last_message, updated_at
                FROM worlds
                WHERE name = ?1
                "#,
                params![name],
                |row| {
                    Ok(WorldState {
                        name: row.get(0)?,
                        last_event: row
                            .get::<_, Option<String>>(1)?
                            .and_then(|s| EventType::parse(&s)),
                        last_status: WorldStatus::parse(
                            &row.get::<_, String>(2).unwrap_or_default(),
                        ),
                        last_message: row.get(3)?,
                        updated_at: parse_timestamp(row.get::<_, String>(4).ok()),
                    })
                },
            )
            .optional()
            .context("Failed to query world state")?;

        Ok(result)
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Record a new sync event, updating the world's last status when it names one
    pub fn record_event(&self, builder: SyncEventBuilder) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let severity = builder.event_type.severity();

        self.conn
            .execute(
                r#"
                INSERT INTO events (timestamp, world, event_type, severity, summary, details)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    now,
                    builder.world,
                    builder.event_type.as_str(),
                    severity.as_str(),
                    builder.summary,
                    builder.details,
                ],
            )
            .context("Failed to record event")?;

        let id = self.conn.last_insert_rowid();

        if let Some(world) = &builder.world {
            self.upsert_world(world, builder.event_type, &builder.summary)?;
        }

        debug!(
            "Recorded event: {} - {}",
            builder.event_type.as_str(),
            builder.summary
        );
        Ok(id)
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, limit: u32) -> Result<Vec<SyncEvent>> {
        self.query_events(None, Some(limit))
    }

    /// Events for one world, newest first
    pub fn events_for_world(&self, world: &str, limit: Option<u32>) -> Result<Vec<SyncEvent>> {
        self.query_events(Some(world), limit)
    }

    /// Get unacknowledged events
    pub fn unacknowledged_events(&self) -> Result<Vec<SyncEvent>> {
        Ok(self
            .query_events(None, None)?
            .into_iter()
            .filter(|e| !e.acknowledged)
            .collect())
    }

    fn query_events(&self, world: Option<&str>, limit: Option<u32>) -> Result<Vec<SyncEvent>> {
        let where_clause = if world.is_some() { "WHERE world = ?1" } else { "" };
        let limit_clause = limit.map(|l| format!(" LIMIT {}", l)).unwrap_or_default();

        let sql = format!(
            r#"
            SELECT id, timestamp, world, event_type, severity, summary, details, acknowledged
            FROM events
            {}
            ORDER BY timestamp DESC, id DESC
            {}
            "#,
            where_clause, limit_clause
        );

        let mut stmt = self.conn.prepare(&sql)?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SyncEvent> {
            Ok(SyncEvent {
                id: row.get(0)?,
                timestamp: parse_timestamp(row.get::<_, String>(1).ok()),
                world: row.get(2)?,
                event_type: EventType::parse(&row.get::<_, String>(3)?)
                    .unwrap_or(EventType::SyncError),
                severity: Severity::parse(&row.get::<_, String>(4)?).unwrap_or(Severity::Info),
                summary: row.get(5)?,
                details: row.get(6)?,
                acknowledged: row.get::<_, i32>(7)? != 0,
            })
        };

        let rows = match world {
            Some(world) => stmt.query_map(params![world], map_row),
            None => stmt.query_map([], map_row),
        }
        .context("Failed to query events")?;

        let events = rows
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect events")?;

        Ok(events)
    }

    /// Acknowledge all events
    pub fn acknowledge_all_events(&self) -> Result<u64> {
        let count = self
            .conn
            .execute(
                "UPDATE events SET acknowledged = 1 WHERE acknowledged = 0",
                [],
            )
            .context("Failed to acknowledge all events")?;
        Ok(count as u64)
    }

    /// Get count of unacknowledged events by severity
    pub fn unacknowledged_counts(&self) -> Result<(u32, u32, u32)> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT severity, COUNT(*) as count
            FROM events
            WHERE acknowledged = 0
            GROUP BY severity
            "#,
        )?;

        let mut info_count = 0u32;
        let mut warning_count = 0u32;
        let mut error_count = 0u32;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        for row in rows {
            let (severity, count) = row?;
            match severity.as_str() {
                "info" => info_count = count,
                "warning" => warning_count = count,
                "error" => error_count = count,
                _ => {}
            }
        }

        Ok((info_count, warning_count, error_count))
    }

    /// Clean up acknowledged events older than `days`
    pub fn cleanup_old_events(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let count = self
            .conn
            .execute(
                "DELETE FROM events WHERE timestamp < ?1 AND acknowledged = 1",
                params![cutoff.to_rfc3339()],
            )
            .context("Failed to cleanup old events")?;
        Ok(count as u64)
    }
}

fn parse_timestamp(raw: Option<String>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
