// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use entman_app::{
    ActivityEntry, ActivityKind, EntityId, Extras, FilterPreset, MAX_ACTIVITY_ENTRIES,
    StateFilter,
};
use rusqlite::{Connection, params};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

pub const APP_NAME: &str = "entman";

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    ("favorites", &["entity_id", "created_at"]),
    ("entity_tags", &["entity_id", "tag", "position"]),
    ("entity_aliases", &["entity_id", "alias"]),
    (
        "filter_presets",
        &[
            "id",
            "name",
            "search_term",
            "view_state",
            "domain",
            "favorites_only",
            "created_at",
        ],
    ),
    ("activity_log", &["id", "kind", "detail", "created_at"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequiredIndex {
    name: &'static str,
    create_sql: &'static str,
}

const REQUIRED_INDEXES: &[RequiredIndex] = &[
    RequiredIndex {
        name: "idx_entity_tags_entity_tag",
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_tags_entity_tag ON entity_tags (entity_id, tag);",
    },
    RequiredIndex {
        name: "idx_filter_presets_name",
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_filter_presets_name ON filter_presets (name);",
    },
    RequiredIndex {
        name: "idx_activity_log_created_at",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_activity_log_created_at ON activity_log (created_at);",
    },
];

/// SQLite-backed storage for the panel's local extras.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }

        ensure_required_indexes(&self.conn)?;
        Ok(())
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT name
                FROM sqlite_master
                WHERE type = 'table'
                  AND name NOT LIKE 'sqlite_%'
                ORDER BY name ASC
                ",
            )
            .context("prepare table names query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query table names")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect table names")
    }

    pub fn load_extras(&self) -> Result<Extras> {
        let mut extras = Extras::default();
        extras.favorites = self.load_favorites()?;

        let mut stmt = self
            .conn
            .prepare("SELECT entity_id, tag FROM entity_tags ORDER BY entity_id, position, rowid")
            .context("prepare tags query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("query tags")?;
        for row in rows {
            let (entity_id, tag) = row.context("read tag row")?;
            extras
                .tags
                .entry(EntityId::new(entity_id))
                .or_default()
                .push(tag);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT entity_id, alias FROM entity_aliases")
            .context("prepare aliases query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("query aliases")?;
        for row in rows {
            let (entity_id, alias) = row.context("read alias row")?;
            extras.aliases.insert(EntityId::new(entity_id), alias);
        }

        extras.presets = self.load_presets()?;
        extras.activity = self.load_activity()?.into();
        debug!(
            favorites = extras.favorites.len(),
            presets = extras.presets.len(),
            activity = extras.activity.len(),
            "loaded extras"
        );
        Ok(extras)
    }

    /// Replaces every stored extra with `extras` in one transaction. Favorites
    /// that were already stored keep their original `created_at`.
    pub fn save_extras(&self, extras: &Extras) -> Result<()> {
        let now = now_rfc3339()?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin extras transaction")?;

        let stored: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT entity_id FROM favorites")
                .context("prepare stored favorites query")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .context("query stored favorites")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("collect stored favorites")?
        };
        for entity_id in stored {
            if !extras.favorites.contains(&EntityId::new(entity_id.as_str())) {
                tx.execute("DELETE FROM favorites WHERE entity_id = ?", [&entity_id])
                    .with_context(|| format!("delete favorite {entity_id}"))?;
            }
        }

        tx.execute_batch(
            "
            DELETE FROM entity_tags;
            DELETE FROM entity_aliases;
            DELETE FROM filter_presets;
            DELETE FROM activity_log;
            ",
        )
        .context("clear extras")?;

        for entity_id in &extras.favorites {
            tx.execute(
                "INSERT OR IGNORE INTO favorites (entity_id, created_at) VALUES (?, ?)",
                params![entity_id.as_str(), now],
            )
            .with_context(|| format!("insert favorite {entity_id}"))?;
        }

        for (entity_id, tags) in &extras.tags {
            for (position, tag) in tags.iter().enumerate() {
                tx.execute(
                    "INSERT OR IGNORE INTO entity_tags (entity_id, tag, position) VALUES (?, ?, ?)",
                    params![entity_id.as_str(), tag, position as i64],
                )
                .with_context(|| format!("insert tag {tag} for {entity_id}"))?;
            }
        }

        for (entity_id, alias) in &extras.aliases {
            tx.execute(
                "INSERT INTO entity_aliases (entity_id, alias) VALUES (?, ?)",
                params![entity_id.as_str(), alias],
            )
            .with_context(|| format!("insert alias for {entity_id}"))?;
        }

        for preset in &extras.presets {
            tx.execute(
                "
                INSERT INTO filter_presets
                  (name, search_term, view_state, domain, favorites_only, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
                params![
                    preset.name,
                    preset.search_term,
                    preset.view_state.as_str(),
                    preset.domain,
                    preset.favorites_only,
                    format_datetime(preset.created_at)?,
                ],
            )
            .with_context(|| format!("insert preset {}", preset.name))?;
        }

        let skip = extras.activity.len().saturating_sub(MAX_ACTIVITY_ENTRIES);
        for entry in extras.activity.iter().skip(skip) {
            tx.execute(
                "INSERT INTO activity_log (kind, detail, created_at) VALUES (?, ?, ?)",
                params![entry.kind.as_str(), entry.detail, format_datetime(entry.at)?],
            )
            .context("insert activity entry")?;
        }

        tx.commit().context("commit extras")?;
        debug!(revision = extras.revision(), "saved extras");
        Ok(())
    }

    fn load_favorites(&self) -> Result<BTreeSet<EntityId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entity_id FROM favorites")
            .context("prepare favorites query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query favorites")?;
        let mut favorites = BTreeSet::new();
        for row in rows {
            favorites.insert(EntityId::new(row.context("read favorite row")?));
        }
        Ok(favorites)
    }

    fn load_presets(&self) -> Result<Vec<FilterPreset>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT name, search_term, view_state, domain, favorites_only, created_at
                FROM filter_presets
                ORDER BY id ASC
                ",
            )
            .context("prepare presets query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("query presets")?;

        let mut presets = Vec::new();
        for row in rows {
            let (name, search_term, view_state, domain, favorites_only, created_at) =
                row.context("read preset row")?;
            let view_state = StateFilter::parse(&view_state).ok_or_else(|| {
                anyhow!("preset {name:?} has invalid view state {view_state:?}; delete and save it again")
            })?;
            presets.push(FilterPreset {
                name,
                search_term,
                view_state,
                domain,
                favorites_only,
                created_at: parse_datetime(&created_at)?,
            });
        }
        Ok(presets)
    }

    fn load_activity(&self) -> Result<Vec<ActivityEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT kind, detail, created_at
                FROM (SELECT id, kind, detail, created_at FROM activity_log ORDER BY id DESC LIMIT ?)
                ORDER BY id ASC
                ",
            )
            .context("prepare activity query")?;
        let rows = stmt
            .query_map(params![MAX_ACTIVITY_ENTRIES as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("query activity")?;

        let mut entries = Vec::new();
        for row in rows {
            let (kind, detail, created_at) = row.context("read activity row")?;
            let Some(kind) = ActivityKind::parse(&kind) else {
                debug!(kind, "skipping activity entry with unknown kind");
                continue;
            };
            entries.push(ActivityEntry {
                kind,
                detail,
                at: parse_datetime(&created_at)?,
            });
        }
        Ok(entries)
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("ENTMAN_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set ENTMAN_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("entman.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        let columns = table_columns(conn, table)?;
        if columns.is_empty() {
            bail!(
                "database is missing required table `{table}`; point storage.db_path at an entman database"
            );
        }

        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.contains(*column))
            .collect();
        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; move the old database aside and restart",
                missing.join(", ")
            );
        }
    }
    Ok(())
}

fn ensure_required_indexes(conn: &Connection) -> Result<()> {
    for index in REQUIRED_INDEXES {
        conn.execute_batch(index.create_sql)
            .with_context(|| format!("ensure required index `{}`", index.name))?;
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    format_datetime(OffsetDateTime::now_utc())
}

fn format_datetime(value: OffsetDateTime) -> Result<String> {
    value.format(&Rfc3339).context("format timestamp")
}

fn parse_datetime(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).with_context(|| format!("parse timestamp {raw:?}"))
}
