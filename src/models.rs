//! Core data models for the media indexer

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Normalize a filesystem timestamp to UTC with microsecond precision.
///
/// Stored and freshly read modification times are compared for equality, so
/// both sides go through this.
pub fn normalize_mtime(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time).trunc_subsecs(6)
}

/// A file known to the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// File name without directory
    pub name: String,
    /// Directory relative to the media root, empty for the root itself
    pub path: String,
    /// Modification time, UTC
    pub mtime: DateTime<Utc>,
}

/// Technical summary of a successfully probed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRecord {
    pub id: i64,
    pub file_id: i64,
    /// Duration in nanoseconds
    pub duration: i64,
    pub seekable: bool,
    pub live: bool,
    pub audio_streams: u32,
    pub video_streams: u32,
    pub subtitle_streams: u32,
}

/// Video stream attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAttributes {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate_num: Option<u32>,
    pub framerate_denom: Option<u32>,
    pub par_num: Option<u32>,
    pub par_denom: Option<u32>,
    pub depth: Option<u32>,
    pub bitrate: Option<u32>,
    pub max_bitrate: Option<u32>,
    pub is_image: bool,
    pub is_interlaced: bool,
}

/// Audio stream attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAttributes {
    pub channels: Option<u32>,
    pub channel_mask: Option<i64>,
    pub sample_rate: Option<u32>,
    pub depth: Option<u32>,
    pub bitrate: Option<u32>,
    pub max_bitrate: Option<u32>,
    pub language: Option<String>,
}

/// Stream variant with its variant specific attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamVariant {
    /// Stream of unknown or unsupported kind
    #[serde(rename = "stream")]
    Generic,
    /// Demultiplexer; its children are the elementary streams
    Container,
    Video(VideoAttributes),
    Audio(AudioAttributes),
    Subtitle { language: Option<String> },
}

impl StreamVariant {
    /// Discriminant stored in the `type` column
    pub fn discriminant(&self) -> &'static str {
        match self {
            StreamVariant::Generic => "stream",
            StreamVariant::Container => "container",
            StreamVariant::Video(_) => "video",
            StreamVariant::Audio(_) => "audio",
            StreamVariant::Subtitle { .. } => "subtitle",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, StreamVariant::Container)
    }
}

impl std::fmt::Display for StreamVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.discriminant())
    }
}

/// A stream row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: i64,
    pub info_id: i64,
    pub parent_id: Option<i64>,
    pub media_type: String,
    pub variant: StreamVariant,
}

/// A field or tag row attached to a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: i64,
    pub stream_id: i64,
    pub name: String,
    pub value: String,
}

/// Diagnostic left by a failed probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: i64,
    pub file_id: i64,
    pub error_log: String,
}

/// Tool version and media root that last used the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub id: i64,
    pub version: String,
    pub root: Option<String>,
}

/// The streams of one Info, indexed by id.
///
/// Parent/child links are plain ids so walks never chase references.
#[derive(Debug, Clone, Default)]
pub struct StreamArena {
    records: Vec<StreamRecord>,
}

impl StreamArena {
    pub fn new(records: Vec<StreamRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: i64) -> Option<&StreamRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Streams without a parent
    pub fn roots(&self) -> impl Iterator<Item = &StreamRecord> {
        self.records.iter().filter(|r| r.parent_id.is_none())
    }

    /// Direct children of a stream
    pub fn children(&self, id: i64) -> impl Iterator<Item = &StreamRecord> {
        self.records.iter().filter(move |r| r.parent_id == Some(id))
    }
}

/// One node of a probe result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNode {
    pub variant: StreamVariant,
    pub media_type: String,
    pub fields: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
    pub children: Vec<StreamNode>,
}

impl StreamNode {
    pub fn new(variant: StreamVariant, media_type: impl Into<String>) -> Self {
        Self {
            variant,
            media_type: media_type.into(),
            fields: Vec::new(),
            tags: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), value.into()));
        self
    }

    /// Add a demultiplexed child stream
    pub fn with_child(mut self, child: StreamNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Result of a successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Duration in nanoseconds
    pub duration: i64,
    pub seekable: bool,
    pub live: bool,
    /// Top level streams, usually a single container
    pub topology: Vec<StreamNode>,
}

/// Number of audio, video and subtitle streams in a topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounts {
    pub audio: u32,
    pub video: u32,
    pub subtitle: u32,
}

impl ProbeInfo {
    /// Every node of the topology, parents before children
    pub fn nodes(&self) -> Vec<&StreamNode> {
        let mut nodes = Vec::new();
        let mut stack: Vec<&StreamNode> = self.topology.iter().rev().collect();
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children.iter().rev());
        }
        nodes
    }

    pub fn stream_counts(&self) -> StreamCounts {
        let mut counts = StreamCounts::default();
        for node in self.nodes() {
            match node.variant {
                StreamVariant::Audio(_) => counts.audio += 1,
                StreamVariant::Video(_) => counts.video += 1,
                StreamVariant::Subtitle { .. } => counts.subtitle += 1,
                StreamVariant::Generic | StreamVariant::Container => {}
            }
        }
        counts
    }
}

/// Row counts of every indexed table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub files: u64,
    pub infos: u64,
    pub streams: u64,
    pub fields: u64,
    pub tags: u64,
    pub errors: u64,
}

/// Totals of an indexing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Regular files sighted by traversals or the change monitor
    pub files_seen: u64,
    /// Files added to the index
    pub new_files: u64,
    /// Files whose modification time changed
    pub changed_files: u64,
    /// Files removed from the index
    pub deleted_files: u64,
    pub dirs_listed: u64,
    pub listing_errors: u64,
    pub probes_dispatched: u64,
    pub probes_succeeded: u64,
    pub probes_failed: u64,
    /// Manual rescans accepted
    pub rescans: u64,
    /// Total run duration in milliseconds
    pub duration_ms: u64,
}

impl ScanSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if every probe succeeded and every directory could be listed
    pub fn is_clean(&self) -> bool {
        self.probes_failed == 0 && self.listing_errors == 0
    }
}
