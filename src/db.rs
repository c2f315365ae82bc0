//! Database module: the persistent index of files and their media topology

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;

use crate::config::{DatabaseConfig, SqliteLocation};
use crate::error::Result;
use crate::migrations;
use crate::models::{
    AudioAttributes, ErrorRecord, FileRecord, InfoRecord, MetaRecord, ProbeInfo, PropertyRecord,
    RowCounts, StreamArena, StreamNode, StreamRecord, StreamVariant, VideoAttributes,
};

const STREAM_COLUMNS: &str = "id, info_id, parent_id, media_type, type, bitrate, max_bitrate, \
     depth, framerate_num, framerate_denom, width, height, par_num, par_denom, is_image, \
     is_interlaced, channel_mask, channels, sample_rate, language";

/// Database manager for the media index
pub struct IndexDatabase {
    conn: Connection,
}

impl IndexDatabase {
    /// Open (or create) the database described by `config`, migrate it and
    /// record the running version and media root.
    pub fn open(config: &DatabaseConfig, root: &Path) -> Result<Self> {
        let config = config.clone().resolve()?;
        let conn = match config.sqlite_location()? {
            SqliteLocation::Memory => Connection::open_in_memory()?,
            SqliteLocation::File(path) => {
                info!("Opening index database {}", path.display());
                Connection::open(path)?
            }
        };
        Self::init(conn, root)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory(root: &Path) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, root)
    }

    fn init(mut conn: Connection, root: &Path) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&mut conn)?;
        let db = Self { conn };
        db.write_meta(env!("CARGO_PKG_VERSION"), root)?;
        Ok(db)
    }

    fn write_meta(&self, version: &str, root: &Path) -> Result<()> {
        let root = root.to_string_lossy().replace('\\', "/");
        let updated = self.conn.execute(
            "UPDATE metas SET version = ?1, root = ?2 WHERE id = (SELECT MIN(id) FROM metas)",
            params![version, root],
        )?;
        if updated == 0 {
            self.conn.execute(
                "INSERT INTO metas (version, root) VALUES (?1, ?2)",
                params![version, root],
            )?;
        }
        Ok(())
    }

    /// The singleton meta row
    pub fn meta(&self) -> Result<Option<MetaRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, version, root FROM metas ORDER BY id LIMIT 1",
                [],
                |row| {
                    Ok(MetaRecord {
                        id: row.get(0)?,
                        version: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        root: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Schema version of the open database
    pub fn schema_version(&self) -> Result<u32> {
        migrations::schema_version(&self.conn)
    }

    /// Look up a file by name and directory relative to the root
    pub fn find_file(&self, name: &str, path: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, path, mtime FROM files WHERE name = ?1 AND path = ?2",
                params![name, path],
                file_from_row,
            )
            .optional()?)
    }

    /// Look up a file by id
    pub fn file(&self, id: i64) -> Result<Option<FileRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, path, mtime FROM files WHERE id = ?1",
                [id],
                file_from_row,
            )
            .optional()?)
    }

    /// Every indexed file, by id
    pub fn all_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, path, mtime FROM files ORDER BY id")?;
        let rows = stmt.query_map([], file_from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// Insert a newly sighted file
    pub fn insert_file(&self, name: &str, path: &str, mtime: DateTime<Utc>) -> Result<i64> {
        debug!("Adding file name={} path={} mtime={}", name, path, mtime);
        self.conn.execute(
            "INSERT INTO files (name, path, mtime) VALUES (?1, ?2, ?3)",
            params![name, path, mtime],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record a new modification time
    pub fn update_file_mtime(&self, id: i64, mtime: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute("UPDATE files SET mtime = ?1 WHERE id = ?2", params![mtime, id])?;
        Ok(())
    }

    /// Delete a file together with its info, streams, fields, tags and errors
    pub fn delete_file(&self, id: i64) -> Result<bool> {
        let deleted = self.conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Store a successful probe.
    ///
    /// The Info row is updated in place (or created) and its stream tree is
    /// rebuilt from scratch. Errors left by earlier failed probes are dropped.
    pub fn replace_info(&mut self, file_id: i64, probe: &ProbeInfo) -> Result<i64> {
        let counts = probe.stream_counts();
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM infos WHERE file_id = ?1 ORDER BY id LIMIT 1",
                [file_id],
                |row| row.get(0),
            )
            .optional()?;
        let info_id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE infos SET duration = ?1, seekable = ?2, live = ?3, audio_streams = ?4,
                     video_streams = ?5, subtitle_streams = ?6 WHERE id = ?7",
                    params![
                        probe.duration,
                        probe.seekable,
                        probe.live,
                        counts.audio,
                        counts.video,
                        counts.subtitle,
                        id
                    ],
                )?;
                tx.execute("DELETE FROM streams WHERE info_id = ?1", [id])?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO infos (file_id, duration, seekable, live, audio_streams,
                     video_streams, subtitle_streams) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        file_id,
                        probe.duration,
                        probe.seekable,
                        probe.live,
                        counts.audio,
                        counts.video,
                        counts.subtitle
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        let mut pending: Vec<(&StreamNode, Option<i64>)> =
            probe.topology.iter().rev().map(|node| (node, None)).collect();
        while let Some((node, parent_id)) = pending.pop() {
            let stream_id = insert_stream(&tx, info_id, parent_id, node)?;
            pending.extend(node.children.iter().rev().map(|child| (child, Some(stream_id))));
        }

        tx.execute("DELETE FROM errors WHERE file_id = ?1", [file_id])?;
        tx.commit()?;
        Ok(info_id)
    }

    /// Store the diagnostic of a failed probe, superseding earlier ones.
    /// Info and streams are left untouched.
    pub fn record_error(&mut self, file_id: i64, error_log: &str) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM errors WHERE file_id = ?1", [file_id])?;
        tx.execute(
            "INSERT INTO errors (file_id, error_log) VALUES (?1, ?2)",
            params![file_id, error_log],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// The Info of a file, if it was ever probed successfully
    pub fn info_for_file(&self, file_id: i64) -> Result<Option<InfoRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, file_id, duration, seekable, live, audio_streams, video_streams,
                 subtitle_streams FROM infos WHERE file_id = ?1 ORDER BY id LIMIT 1",
                [file_id],
                |row| {
                    Ok(InfoRecord {
                        id: row.get(0)?,
                        file_id: row.get(1)?,
                        duration: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        seekable: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
                        live: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
                        audio_streams: row.get::<_, Option<u32>>(5)?.unwrap_or(0),
                        video_streams: row.get::<_, Option<u32>>(6)?.unwrap_or(0),
                        subtitle_streams: row.get::<_, Option<u32>>(7)?.unwrap_or(0),
                    })
                },
            )
            .optional()?)
    }

    /// The stream tree of an Info
    pub fn streams_for_info(&self, info_id: i64) -> Result<StreamArena> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM streams WHERE info_id = ?1 ORDER BY id",
            STREAM_COLUMNS
        ))?;
        let rows = stmt.query_map([info_id], stream_from_row)?;
        let mut streams = Vec::new();
        for row in rows {
            streams.push(row?);
        }
        Ok(StreamArena::new(streams))
    }

    /// Fields of a stream
    pub fn fields_for_stream(&self, stream_id: i64) -> Result<Vec<PropertyRecord>> {
        self.properties("fields", stream_id)
    }

    /// Tags of a stream
    pub fn tags_for_stream(&self, stream_id: i64) -> Result<Vec<PropertyRecord>> {
        self.properties("tags", stream_id)
    }

    fn properties(&self, table: &str, stream_id: i64) -> Result<Vec<PropertyRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, stream_id, name, value FROM {} WHERE stream_id = ?1 ORDER BY id",
            table
        ))?;
        let rows = stmt.query_map([stream_id], |row| {
            Ok(PropertyRecord {
                id: row.get(0)?,
                stream_id: row.get(1)?,
                name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                value: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;
        let mut properties = Vec::new();
        for row in rows {
            properties.push(row?);
        }
        Ok(properties)
    }

    /// Probe diagnostics recorded for a file
    pub fn errors_for_file(&self, file_id: i64) -> Result<Vec<ErrorRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_id, error_log FROM errors WHERE file_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([file_id], |row| {
            Ok(ErrorRecord {
                id: row.get(0)?,
                file_id: row.get(1)?,
                error_log: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?;
        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok(errors)
    }

    /// Get file count
    pub fn file_count(&self) -> Result<u64> {
        self.count("files")
    }

    /// Row counts of every indexed table
    pub fn row_counts(&self) -> Result<RowCounts> {
        Ok(RowCounts {
            files: self.count("files")?,
            infos: self.count("infos")?,
            streams: self.count("streams")?,
            fields: self.count("fields")?,
            tags: self.count("tags")?,
            errors: self.count("errors")?,
        })
    }

    fn count(&self, table: &str) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        mtime: row.get(3)?,
    })
}

fn stream_from_row(row: &Row<'_>) -> rusqlite::Result<StreamRecord> {
    let discriminant: Option<String> = row.get(4)?;
    let variant = match discriminant.as_deref() {
        Some("container") => StreamVariant::Container,
        Some("video") => StreamVariant::Video(VideoAttributes {
            bitrate: row.get(5)?,
            max_bitrate: row.get(6)?,
            depth: row.get(7)?,
            framerate_num: row.get(8)?,
            framerate_denom: row.get(9)?,
            width: row.get(10)?,
            height: row.get(11)?,
            par_num: row.get(12)?,
            par_denom: row.get(13)?,
            is_image: row.get::<_, Option<bool>>(14)?.unwrap_or(false),
            is_interlaced: row.get::<_, Option<bool>>(15)?.unwrap_or(false),
        }),
        Some("audio") => StreamVariant::Audio(AudioAttributes {
            bitrate: row.get(5)?,
            max_bitrate: row.get(6)?,
            depth: row.get(7)?,
            channel_mask: row.get(16)?,
            channels: row.get(17)?,
            sample_rate: row.get(18)?,
            language: row.get(19)?,
        }),
        Some("subtitle") => StreamVariant::Subtitle {
            language: row.get(19)?,
        },
        _ => StreamVariant::Generic,
    };

    Ok(StreamRecord {
        id: row.get(0)?,
        info_id: row.get(1)?,
        parent_id: row.get(2)?,
        media_type: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        variant,
    })
}

fn insert_stream(
    tx: &Transaction<'_>,
    info_id: i64,
    parent_id: Option<i64>,
    node: &StreamNode,
) -> Result<i64> {
    let discriminant = node.variant.discriminant();
    match &node.variant {
        StreamVariant::Generic | StreamVariant::Container => {
            tx.execute(
                "INSERT INTO streams (info_id, parent_id, media_type, type) VALUES (?1, ?2, ?3, ?4)",
                params![info_id, parent_id, node.media_type, discriminant],
            )?;
        }
        StreamVariant::Video(video) => {
            tx.execute(
                "INSERT INTO streams (info_id, parent_id, media_type, type, bitrate, max_bitrate,
                 depth, framerate_num, framerate_denom, width, height, par_num, par_denom,
                 is_image, is_interlaced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    info_id,
                    parent_id,
                    node.media_type,
                    discriminant,
                    video.bitrate,
                    video.max_bitrate,
                    video.depth,
                    video.framerate_num,
                    video.framerate_denom,
                    video.width,
                    video.height,
                    video.par_num,
                    video.par_denom,
                    video.is_image,
                    video.is_interlaced
                ],
            )?;
        }
        StreamVariant::Audio(audio) => {
            tx.execute(
                "INSERT INTO streams (info_id, parent_id, media_type, type, bitrate, max_bitrate,
                 depth, channel_mask, channels, sample_rate, language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    info_id,
                    parent_id,
                    node.media_type,
                    discriminant,
                    audio.bitrate,
                    audio.max_bitrate,
                    audio.depth,
                    audio.channel_mask,
                    audio.channels,
                    audio.sample_rate,
                    audio.language
                ],
            )?;
        }
        StreamVariant::Subtitle { language } => {
            tx.execute(
                "INSERT INTO streams (info_id, parent_id, media_type, type, language)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![info_id, parent_id, node.media_type, discriminant, language],
            )?;
        }
    }
    let stream_id = tx.last_insert_rowid();

    {
        let mut field_stmt =
            tx.prepare_cached("INSERT INTO fields (stream_id, name, value) VALUES (?1, ?2, ?3)")?;
        for (name, value) in &node.fields {
            field_stmt.execute(params![stream_id, name, value])?;
        }
        let mut tag_stmt =
            tx.prepare_cached("INSERT INTO tags (stream_id, name, value) VALUES (?1, ?2, ?3)")?;
        for (name, value) in &node.tags {
            tag_stmt.execute(params![stream_id, name, value])?;
        }
    }

    Ok(stream_id)
}
