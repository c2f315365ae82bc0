//! Schema migrations for the index database
//!
//! The applied schema version lives in `PRAGMA user_version`. Databases
//! written by releases older than [`LEGACY_VERSION_THRESHOLD`] carry the
//! baseline tables but no version; they are stamped at the baseline before
//! upgrading.

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Releases older than this wrote the baseline schema without stamping it
pub const LEGACY_VERSION_THRESHOLD: &str = "0.1.5";

/// Version of the baseline schema
pub const BASELINE_VERSION: u32 = 1;

/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATION_001: &str = r#"
CREATE TABLE IF NOT EXISTS metas (
    id INTEGER PRIMARY KEY,
    version TEXT,
    root TEXT
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    name TEXT,
    path TEXT,
    mtime TEXT
);

CREATE TABLE IF NOT EXISTS infos (
    id INTEGER PRIMARY KEY,
    file_id INTEGER REFERENCES files(id),
    duration INTEGER,
    seekable BOOLEAN,
    live BOOLEAN,
    audio_streams INTEGER,
    video_streams INTEGER,
    subtitle_streams INTEGER
);

-- One table for every stream variant, discriminated by `type`
CREATE TABLE IF NOT EXISTS streams (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER REFERENCES streams(id),
    info_id INTEGER REFERENCES infos(id),
    media_type TEXT,
    type TEXT,
    bitrate INTEGER,
    max_bitrate INTEGER,
    depth INTEGER,
    framerate_num INTEGER,
    framerate_denom INTEGER,
    width INTEGER,
    height INTEGER,
    par_num INTEGER,
    par_denom INTEGER,
    is_image BOOLEAN,
    is_interlaced BOOLEAN,
    channel_mask INTEGER,
    channels INTEGER,
    sample_rate INTEGER,
    language TEXT
);

CREATE TABLE IF NOT EXISTS fields (
    id INTEGER PRIMARY KEY,
    stream_id INTEGER REFERENCES streams(id),
    name TEXT,
    value TEXT
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY,
    stream_id INTEGER REFERENCES streams(id),
    name TEXT,
    value TEXT
);
"#;

// SQLite cannot alter a foreign key in place: rebuild each child table.
const MIGRATION_002: &str = r#"
CREATE TABLE infos_new (
    id INTEGER PRIMARY KEY,
    file_id INTEGER REFERENCES files(id) ON DELETE CASCADE,
    duration INTEGER,
    seekable BOOLEAN,
    live BOOLEAN,
    audio_streams INTEGER,
    video_streams INTEGER,
    subtitle_streams INTEGER
);
INSERT INTO infos_new (id, file_id, duration, seekable, live, audio_streams, video_streams, subtitle_streams)
    SELECT id, file_id, duration, seekable, live, audio_streams, video_streams, subtitle_streams FROM infos;
DROP TABLE infos;
ALTER TABLE infos_new RENAME TO infos;

CREATE TABLE streams_new (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER REFERENCES streams(id) ON DELETE CASCADE,
    info_id INTEGER REFERENCES infos(id) ON DELETE CASCADE,
    media_type TEXT,
    type TEXT,
    bitrate INTEGER,
    max_bitrate INTEGER,
    depth INTEGER,
    framerate_num INTEGER,
    framerate_denom INTEGER,
    width INTEGER,
    height INTEGER,
    par_num INTEGER,
    par_denom INTEGER,
    is_image BOOLEAN,
    is_interlaced BOOLEAN,
    channel_mask INTEGER,
    channels INTEGER,
    sample_rate INTEGER,
    language TEXT
);
INSERT INTO streams_new
    SELECT id, parent_id, info_id, media_type, type, bitrate, max_bitrate, depth,
           framerate_num, framerate_denom, width, height, par_num, par_denom,
           is_image, is_interlaced, channel_mask, channels, sample_rate, language
    FROM streams;
DROP TABLE streams;
ALTER TABLE streams_new RENAME TO streams;

CREATE TABLE fields_new (
    id INTEGER PRIMARY KEY,
    stream_id INTEGER REFERENCES streams(id) ON DELETE CASCADE,
    name TEXT,
    value TEXT
);
INSERT INTO fields_new (id, stream_id, name, value) SELECT id, stream_id, name, value FROM fields;
DROP TABLE fields;
ALTER TABLE fields_new RENAME TO fields;

CREATE TABLE tags_new (
    id INTEGER PRIMARY KEY,
    stream_id INTEGER REFERENCES streams(id) ON DELETE CASCADE,
    name TEXT,
    value TEXT
);
INSERT INTO tags_new (id, stream_id, name, value) SELECT id, stream_id, name, value FROM tags;
DROP TABLE tags;
ALTER TABLE tags_new RENAME TO tags;

CREATE INDEX IF NOT EXISTS idx_infos_file_id ON infos(file_id);
CREATE INDEX IF NOT EXISTS idx_streams_info_id ON streams(info_id);
CREATE INDEX IF NOT EXISTS idx_streams_parent_id ON streams(parent_id);
CREATE INDEX IF NOT EXISTS idx_fields_stream_id ON fields(stream_id);
CREATE INDEX IF NOT EXISTS idx_tags_stream_id ON tags(stream_id);
"#;

const MIGRATION_003: &str = r#"
CREATE TABLE IF NOT EXISTS errors (
    id INTEGER PRIMARY KEY,
    file_id INTEGER REFERENCES files(id) ON DELETE CASCADE,
    error_log TEXT
);
CREATE INDEX IF NOT EXISTS idx_errors_file_id ON errors(file_id);

-- Older releases could index the same file twice
DELETE FROM files WHERE id NOT IN (SELECT MIN(id) FROM files GROUP BY name, path);
DELETE FROM infos WHERE file_id NOT IN (SELECT id FROM files);
DELETE FROM streams WHERE info_id NOT IN (SELECT id FROM infos);
DELETE FROM fields WHERE stream_id NOT IN (SELECT id FROM streams);
DELETE FROM tags WHERE stream_id NOT IN (SELECT id FROM streams);
CREATE UNIQUE INDEX IF NOT EXISTS uq_files_name_path ON files(name, path);
"#;

/// Every migration, in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        sql: MIGRATION_001,
    },
    Migration {
        version: 2,
        name: "cascade_deletes",
        sql: MIGRATION_002,
    },
    Migration {
        version: 3,
        name: "errors",
        sql: MIGRATION_003,
    },
];

/// Version of the newest schema
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Schema version currently stamped in the database
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the database to the latest schema, returning the final version.
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    let mut current = schema_version(conn)?;

    if current == 0 && needs_legacy_stamp(conn)? {
        info!("Stamping legacy schema at version {}", BASELINE_VERSION);
        conn.pragma_update(None, "user_version", BASELINE_VERSION)?;
        current = BASELINE_VERSION;
    }

    let start = current;
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        info!(
            "Applying migration {} ({})",
            migration.version, migration.name
        );
        // foreign_keys cannot be toggled inside a transaction
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        current = migration.version;
    }

    debug!("Schema at version {}", current);
    Ok(current)
}

fn needs_legacy_stamp(conn: &Connection) -> Result<bool> {
    let has_metas: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'metas'",
        [],
        |row| row.get(0),
    )?;
    if !has_metas {
        return Ok(false);
    }

    let version: Option<Option<String>> = conn
        .query_row("SELECT version FROM metas ORDER BY id LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(match version {
        Some(Some(version)) => version_older_than(&version, LEGACY_VERSION_THRESHOLD),
        Some(None) => true,
        None => false,
    })
}

/// Compare dotted release versions numerically.
///
/// Each component contributes its leading digits (`"5rc1"` counts as 5);
/// missing components count as zero.
pub fn version_older_than(version: &str, threshold: &str) -> bool {
    let lhs = version_components(version);
    let rhs = version_components(threshold);
    let len = lhs.len().max(rhs.len());
    for i in 0..len {
        let a = lhs.get(i).copied().unwrap_or(0);
        let b = rhs.get(i).copied().unwrap_or(0);
        if a != b {
            return a < b;
        }
    }
    false
}

fn version_components(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}
