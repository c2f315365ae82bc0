//! Media probing
//!
//! The coordinator only sees the [`MediaProber`] trait: hand it a file URI,
//! get back a future resolving to the file's technical metadata or a
//! diagnostic. [`FfprobeProber`] is the implementation used by the binary.

use log::{debug, info};
use serde_json::{Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{Result, ScanError};
use crate::models::{AudioAttributes, ProbeInfo, StreamNode, StreamVariant, VideoAttributes};

/// Analyzes media files.
///
/// The returned future must not borrow the prober: it is polled as a task
/// on the loop after `probe` returns.
pub trait MediaProber {
    fn probe(&self, uri: Url) -> impl Future<Output = Result<ProbeInfo>> + 'static;

    /// Refuse further work. Probes already running are dropped with the loop.
    fn stop(&self) {}
}

/// A finished probe, as delivered back to the loop
#[derive(Debug)]
pub struct ProbeOutcome {
    pub uri: Url,
    pub result: Result<ProbeInfo>,
}

/// Prober backed by the `ffprobe` executable.
///
/// At most `max_concurrent` processes run at once; the timeout only starts
/// once a process slot is granted.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
    timeout: Duration,
    stopped: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
}

impl FfprobeProber {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            program: program.into(),
            timeout,
            stopped: Arc::new(AtomicBool::new(false)),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Process slots currently free
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(
            "ffprobe",
            Duration::from_secs(crate::config::DEFAULT_PROBE_TIMEOUT_SECS),
            crate::config::DEFAULT_MAX_PROBES,
        )
    }
}

impl MediaProber for FfprobeProber {
    fn probe(&self, uri: Url) -> impl Future<Output = Result<ProbeInfo>> + 'static {
        let program = self.program.clone();
        let timeout = self.timeout;
        let stopped = self.stopped.clone();
        let permits = self.permits.clone();

        async move {
            let path = uri
                .to_file_path()
                .map_err(|()| ScanError::probe(None, format!("Not a file URI: {}", uri)))?;
            // Closed on stop, which also wakes every queued request
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(ScanError::probe(Some(path), "Prober stopped"));
            };
            if stopped.load(Ordering::Relaxed) {
                return Err(ScanError::probe(Some(path), "Prober stopped"));
            }

            let mut command = Command::new(&program);
            command
                .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
                .arg(&path)
                .stdin(Stdio::null())
                .kill_on_drop(true);

            let output = match tokio::time::timeout(timeout, command.output()).await {
                Err(_) => {
                    return Err(ScanError::probe(
                        Some(path),
                        format!("Timeout of {}s reached", timeout.as_secs()),
                    ))
                }
                Ok(Err(e)) => {
                    return Err(ScanError::probe(
                        Some(path),
                        format!("Failed to run {}: {}", program.display(), e),
                    ))
                }
                Ok(Ok(output)) => output,
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let message = if stderr.is_empty() {
                    format!("{} exited with {}", program.display(), output.status)
                } else {
                    stderr
                };
                return Err(ScanError::probe(Some(path), message));
            }

            debug!("Probed {}", path.display());
            parse_ffprobe_output(&output.stdout).map_err(|message| ScanError::probe(Some(path), message))
        }
    }

    fn stop(&self) {
        info!("Stopping prober");
        self.stopped.store(true, Ordering::Relaxed);
        self.permits.close();
    }
}

/// Turn `ffprobe -print_format json -show_format -show_streams` output into
/// a probe result.
///
/// The format becomes a container root whose children are the streams.
/// Durations are reported in nanoseconds.
pub fn parse_ffprobe_output(stdout: &[u8]) -> std::result::Result<ProbeInfo, String> {
    let document: Value =
        serde_json::from_slice(stdout).map_err(|e| format!("Invalid ffprobe output: {}", e))?;

    let streams: Vec<StreamNode> = document
        .get("streams")
        .and_then(Value::as_array)
        .map(|streams| {
            streams
                .iter()
                .filter_map(Value::as_object)
                .map(stream_node)
                .collect()
        })
        .unwrap_or_default();
    if streams.is_empty() {
        return Err("No streams found".to_string());
    }

    let format = document.get("format").and_then(Value::as_object);
    let duration = format
        .and_then(|f| f.get("duration"))
        .and_then(scalar)
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1_000_000_000.0).round() as i64);

    let topology = match format {
        Some(format) => {
            let media_type = format
                .get("format_name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let mut root = StreamNode::new(StreamVariant::Container, media_type);
            root.fields = fields_of(format);
            root.tags = tags_of(format);
            root.children = streams;
            vec![root]
        }
        None => streams,
    };

    Ok(ProbeInfo {
        duration: duration.unwrap_or(0),
        seekable: duration.is_some(),
        live: false,
        topology,
    })
}

fn stream_node(stream: &Map<String, Value>) -> StreamNode {
    let codec_type = stream
        .get("codec_type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let codec_name = stream
        .get("codec_name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let language = stream
        .get("tags")
        .and_then(Value::as_object)
        .and_then(|tags| tags.get("language"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let variant = match codec_type {
        "video" => {
            let (framerate_num, framerate_denom) = ratio(stream, "avg_frame_rate", '/')
                .or_else(|| ratio(stream, "r_frame_rate", '/'))
                .unzip();
            let (par_num, par_denom) = ratio(stream, "sample_aspect_ratio", ':').unzip();
            let field_order = stream.get("field_order").and_then(Value::as_str);
            StreamVariant::Video(VideoAttributes {
                width: number(stream, "width"),
                height: number(stream, "height"),
                framerate_num,
                framerate_denom,
                par_num,
                par_denom,
                depth: number(stream, "bits_per_raw_sample"),
                bitrate: number(stream, "bit_rate"),
                max_bitrate: number(stream, "max_bit_rate"),
                is_image: stream
                    .get("disposition")
                    .and_then(|d| d.get("attached_pic"))
                    .and_then(Value::as_u64)
                    == Some(1),
                is_interlaced: matches!(field_order, Some(order) if order != "progressive" && order != "unknown"),
            })
        }
        "audio" => StreamVariant::Audio(AudioAttributes {
            channels: number(stream, "channels"),
            channel_mask: None,
            sample_rate: number(stream, "sample_rate"),
            depth: number(stream, "bits_per_raw_sample")
                .or_else(|| number(stream, "bits_per_sample"))
                .filter(|d| *d > 0),
            bitrate: number(stream, "bit_rate"),
            max_bitrate: number(stream, "max_bit_rate"),
            language,
        }),
        "subtitle" => StreamVariant::Subtitle { language },
        _ => StreamVariant::Generic,
    };

    let mut node = StreamNode::new(variant, format!("{}/{}", codec_type, codec_name));
    node.fields = fields_of(stream);
    node.tags = tags_of(stream);
    node
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn fields_of(object: &Map<String, Value>) -> Vec<(String, String)> {
    object
        .iter()
        .filter_map(|(name, value)| scalar(value).map(|value| (name.clone(), value)))
        .collect()
}

fn tags_of(object: &Map<String, Value>) -> Vec<(String, String)> {
    object
        .get("tags")
        .and_then(Value::as_object)
        .map(fields_of)
        .unwrap_or_default()
}

fn number(object: &Map<String, Value>, key: &str) -> Option<u32> {
    match object.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn ratio(object: &Map<String, Value>, key: &str, separator: char) -> Option<(u32, u32)> {
    let text = object.get(key)?.as_str()?;
    let (num, denom) = text.split_once(separator)?;
    let num: u32 = num.parse().ok()?;
    let denom: u32 = denom.parse().ok()?;
    if num == 0 || denom == 0 {
        return None;
    }
    Some((num, denom))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Thirty seconds, one video and one audio stream
    pub(crate) fn playable_info() -> ProbeInfo {
        ProbeInfo {
            duration: 30_000_000_000,
            seekable: true,
            live: false,
            topology: vec![
                StreamNode::new(
                    StreamVariant::Video(VideoAttributes {
                        width: Some(320),
                        height: Some(240),
                        ..Default::default()
                    }),
                    "video/x-h264",
                )
                .with_field("profile", "baseline"),
                StreamNode::new(
                    StreamVariant::Audio(AudioAttributes {
                        channels: Some(2),
                        sample_rate: Some(44100),
                        ..Default::default()
                    }),
                    "audio/mpeg",
                )
                .with_tag("title", "a"),
            ],
        }
    }

    /// Probes without touching the files: names starting with `bad` fail,
    /// everything else is [`playable_info`].
    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeProber {
        calls: Rc<RefCell<Vec<String>>>,
        stopped: Rc<RefCell<bool>>,
    }

    impl FakeProber {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// File names probed so far
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub(crate) fn is_stopped(&self) -> bool {
            *self.stopped.borrow()
        }
    }

    impl MediaProber for FakeProber {
        fn probe(&self, uri: Url) -> impl Future<Output = Result<ProbeInfo>> + 'static {
            let name = uri
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default()
                .to_string();
            self.calls.borrow_mut().push(name.clone());

            async move {
                tokio::task::yield_now().await;
                if name.starts_with("bad") {
                    Err(ScanError::probe(
                        uri.to_file_path().ok(),
                        "Could not determine type of stream",
                    ))
                } else {
                    Ok(playable_info())
                }
            }
        }

        fn stop(&self) {
            *self.stopped.borrow_mut() = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MP4: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "profile": "High",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "sample_aspect_ratio": "1:1",
                "field_order": "progressive",
                "r_frame_rate": "30000/1001",
                "avg_frame_rate": "30000/1001",
                "bit_rate": "4800000",
                "bits_per_raw_sample": "8",
                "disposition": { "default": 1, "attached_pic": 0 },
                "tags": { "language": "und", "handler_name": "VideoHandler" }
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channels": 2,
                "channel_layout": "stereo",
                "bits_per_sample": 0,
                "bit_rate": "128000",
                "tags": { "language": "eng" }
            },
            {
                "index": 2,
                "codec_name": "mov_text",
                "codec_type": "subtitle",
                "tags": { "language": "fra" }
            },
            {
                "index": 3,
                "codec_type": "data",
                "codec_tag_string": "tmcd"
            }
        ],
        "format": {
            "filename": "a.mp4",
            "nb_streams": 4,
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "30.000000",
            "tags": { "major_brand": "isom", "title": "Sample" }
        }
    }"#;

    #[test]
    fn test_parse_ffprobe_output() {
        let info = parse_ffprobe_output(MP4.as_bytes()).unwrap();
        assert_eq!(info.duration, 30_000_000_000);
        assert!(info.seekable);
        assert!(!info.live);
        assert_eq!(info.topology.len(), 1);

        let root = &info.topology[0];
        assert!(root.variant.is_container());
        assert_eq!(root.media_type, "mov,mp4,m4a,3gp,3g2,mj2");
        assert!(root.fields.contains(&("nb_streams".to_string(), "4".to_string())));
        assert!(root.tags.contains(&("title".to_string(), "Sample".to_string())));
        assert_eq!(root.children.len(), 4);

        match &root.children[0].variant {
            StreamVariant::Video(video) => {
                assert_eq!(video.width, Some(1920));
                assert_eq!(video.framerate_num, Some(30000));
                assert_eq!(video.framerate_denom, Some(1001));
                assert_eq!(video.par_num, Some(1));
                assert_eq!(video.depth, Some(8));
                assert_eq!(video.bitrate, Some(4_800_000));
                assert!(!video.is_image);
                assert!(!video.is_interlaced);
            }
            other => panic!("unexpected variant {:?}", other),
        }
        assert_eq!(root.children[0].media_type, "video/h264");

        match &root.children[1].variant {
            StreamVariant::Audio(audio) => {
                assert_eq!(audio.sample_rate, Some(48000));
                assert_eq!(audio.channels, Some(2));
                assert_eq!(audio.depth, None);
                assert_eq!(audio.language.as_deref(), Some("eng"));
            }
            other => panic!("unexpected variant {:?}", other),
        }
        assert_eq!(
            root.children[2].variant,
            StreamVariant::Subtitle {
                language: Some("fra".to_string())
            }
        );
        assert_eq!(root.children[3].variant, StreamVariant::Generic);
        assert_eq!(root.children[3].media_type, "data/unknown");

        let counts = info.stream_counts();
        assert_eq!((counts.video, counts.audio, counts.subtitle), (1, 1, 1));
    }

    #[test]
    fn test_parse_interlaced_cover_art() {
        let json = r#"{
            "streams": [{
                "codec_name": "mjpeg",
                "codec_type": "video",
                "field_order": "tt",
                "avg_frame_rate": "0/0",
                "r_frame_rate": "90000/1",
                "disposition": { "attached_pic": 1 }
            }]
        }"#;
        let info = parse_ffprobe_output(json.as_bytes()).unwrap();
        assert_eq!(info.duration, 0);
        assert!(!info.seekable);
        match &info.topology[0].variant {
            StreamVariant::Video(video) => {
                assert!(video.is_image);
                assert!(video.is_interlaced);
                assert_eq!(video.framerate_num, Some(90000));
                assert_eq!(video.framerate_denom, Some(1));
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_streamless_output() {
        let err = parse_ffprobe_output(br#"{"format": {"filename": "x"}}"#).unwrap_err();
        assert_eq!(err, "No streams found");
        assert!(parse_ffprobe_output(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_probe_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"not really").unwrap();

        let prober = FfprobeProber::new(
            dir.path().join("no-such-ffprobe"),
            Duration::from_secs(5),
            2,
        );
        let err = prober
            .probe(Url::from_file_path(&path).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ScanErrorKind::Probe);
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_prober_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let prober = FfprobeProber::default();
        prober.stop();
        let err = prober
            .probe(Url::from_file_path(dir.path().join("a.mp4")).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.message, "Prober stopped");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_processes_are_bounded() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("slow-ffprobe");
        std::fs::write(&program, "#!/bin/sh\nsleep 0.2\necho 'not media' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let prober = FfprobeProber::new(&program, Duration::from_secs(10), 2);
        assert_eq!(prober.available_slots(), 2);

        let started = std::time::Instant::now();
        tokio::task::LocalSet::new()
            .run_until(async {
                let pending: Vec<_> = (0..6)
                    .map(|i| {
                        let uri =
                            Url::from_file_path(dir.path().join(format!("{}.mp4", i))).unwrap();
                        tokio::task::spawn_local(prober.probe(uri))
                    })
                    .collect();
                for task in pending {
                    let err = task.await.unwrap().unwrap_err();
                    assert_eq!(err.message, "not media");
                }
            })
            .await;

        // Six 200ms runs through two slots take at least three rounds
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert_eq!(prober.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_stop_releases_queued_work() {
        let dir = tempfile::tempdir().unwrap();
        let prober = FfprobeProber::new("ffprobe", Duration::from_secs(5), 1);
        // Hold the only slot so the next request has to queue
        let held = prober.permits.clone().acquire_owned().await.unwrap();

        let err = tokio::task::LocalSet::new()
            .run_until(async {
                let queued = tokio::task::spawn_local(
                    prober.probe(Url::from_file_path(dir.path().join("a.mp4")).unwrap()),
                );
                tokio::task::yield_now().await;
                prober.stop();
                queued.await.unwrap().unwrap_err()
            })
            .await;
        assert_eq!(err.message, "Prober stopped");
        drop(held);
    }
}
