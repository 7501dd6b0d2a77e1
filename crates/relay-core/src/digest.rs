//! Hourly recording digest.
//!
//! Frigate stores continuous recordings as short segments under
//! `<recordings_dir>/YYYY-MM/DD/HH/<camera>/`. For each camera the digest
//! concatenates one hour of segments with ffmpeg, grabs a thumbnail one second
//! in, and posts the result silently to the chat. Cameras without recordings
//! for the hour are skipped; one camera failing does not stop the others.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta, Timelike};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use relay_proto::{ChatApi, DeliveryError, VideoUpload};

use crate::caption::{camera_tag, hourly_caption};
use crate::config::DigestConfig;

/// Result type alias for digest operations.
pub type DigestResult<T> = std::result::Result<T, DigestError>;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// ffmpeg did not run to a clean exit.
    #[error("ffmpeg {step} failed: {reason}")]
    Transcode { step: &'static str, reason: String },

    #[error("digest is {size} bytes, over the {limit} byte upload limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("invalid hour `{0}`, expected YYYY-MM-DDTHH")]
    InvalidHour(String),

    #[error(transparent)]
    Upload(#[from] DeliveryError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> DigestError + '_ {
    move |source| DigestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parse `YYYY-MM-DDTHH` into the start of that hour.
pub fn parse_hour(s: &str) -> DigestResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{s}:00"), "%Y-%m-%dT%H:%M")
        .map_err(|_| DigestError::InvalidHour(s.to_string()))
}

/// Start of the hour before `now`.
pub fn previous_hour(now: NaiveDateTime) -> NaiveDateTime {
    let top = now
        .with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(now);
    top - TimeDelta::hours(1)
}

/// Directory holding `camera`'s segments for `hour`.
pub fn segment_dir(root: &Path, hour: NaiveDateTime, camera: &str) -> PathBuf {
    root.join(hour.format("%Y-%m").to_string())
        .join(hour.format("%d").to_string())
        .join(hour.format("%H").to_string())
        .join(camera)
}

/// Regular files in `dir`, sorted by name. A missing directory has none.
pub async fn list_segments(dir: &Path) -> DigestResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir)(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let file_type = entry.file_type().await.map_err(io_error(dir))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Input list for ffmpeg's concat demuxer.
pub fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|path| {
            let quoted = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{quoted}'\n")
        })
        .collect()
}

/// The two ffmpeg steps a digest needs.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Stream-copy every file named in the concat `list` into `output`.
    async fn concat(&self, list: &Path, output: &Path) -> DigestResult<()>;

    /// Write a single JPEG frame from one second into `video`.
    async fn thumbnail(&self, video: &Path, output: &Path) -> DigestResult<()>;
}

/// [`Transcoder`] backed by the ffmpeg executable.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, step: &'static str, mut command: Command) -> DigestResult<()> {
        let child = command.spawn().map_err(|e| DigestError::Transcode {
            step,
            reason: format!("failed to start {}: {e}", self.program.display()),
        })?;

        // Dropping the child on timeout kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(DigestError::Transcode {
                step,
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
            Ok(Err(e)) => Err(DigestError::Transcode {
                step,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(step, timeout_secs = self.timeout.as_secs(), "ffmpeg timed out, killed");
                Err(DigestError::Transcode {
                    step,
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                })
            }
        }
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn concat(&self, list: &Path, output: &Path) -> DigestResult<()> {
        let mut command = self.command();
        command
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list)
            .args(["-c", "copy"])
            .arg(output);
        self.run("concat", command).await
    }

    async fn thumbnail(&self, video: &Path, output: &Path) -> DigestResult<()> {
        let mut command = self.command();
        command
            .args(["-ss", "1", "-i"])
            .arg(video)
            .args(["-frames:v", "1"])
            .arg(output);
        self.run("thumbnail", command).await
    }
}

/// Outcome of one digest run.
#[derive(Debug, Default)]
pub struct DigestReport {
    pub uploaded: Vec<String>,
    /// Cameras with no recordings for the hour.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DigestReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Builds and posts one hour of recordings per camera.
pub struct DigestRunner {
    recordings_dir: PathBuf,
    cameras: Vec<String>,
    max_upload_bytes: u64,
    chat: Arc<dyn ChatApi>,
    chat_id: i64,
    transcoder: Arc<dyn Transcoder>,
}

impl DigestRunner {
    pub fn new(
        config: &DigestConfig,
        cameras: Vec<String>,
        chat: Arc<dyn ChatApi>,
        chat_id: i64,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            recordings_dir: PathBuf::from(&config.recordings_dir),
            cameras,
            max_upload_bytes: config.max_upload_bytes,
            chat,
            chat_id,
            transcoder,
        }
    }

    /// Digest every camera for the hour starting at `hour` (local time).
    pub async fn run(&self, hour: NaiveDateTime) -> DigestReport {
        let mut report = DigestReport::default();

        for camera in &self.cameras {
            let dir = segment_dir(&self.recordings_dir, hour, camera);
            let segments = match list_segments(&dir).await {
                Ok(segments) => segments,
                Err(e) => {
                    warn!(camera = %camera, error = %e, "Failed to list recordings");
                    report.failed.push((camera.clone(), e.to_string()));
                    continue;
                }
            };
            if segments.is_empty() {
                debug!(camera = %camera, dir = %dir.display(), "No recordings for hour");
                report.skipped.push(camera.clone());
                continue;
            }

            match self.digest_camera(camera, hour, &segments).await {
                Ok(()) => report.uploaded.push(camera.clone()),
                Err(e) => {
                    warn!(camera = %camera, error = %e, "Hourly digest failed");
                    report.failed.push((camera.clone(), e.to_string()));
                }
            }
        }

        report
    }

    async fn digest_camera(
        &self,
        camera: &str,
        hour: NaiveDateTime,
        segments: &[PathBuf],
    ) -> DigestResult<()> {
        let workdir = tempfile::Builder::new()
            .prefix("frigate-relay-digest")
            .tempdir()
            .map_err(io_error(&std::env::temp_dir()))?;
        let list = workdir.path().join("segments.txt");
        let video = workdir.path().join("digest.mp4");
        let thumb = workdir.path().join("thumb.jpg");

        tokio::fs::write(&list, concat_list(segments))
            .await
            .map_err(io_error(&list))?;
        self.transcoder.concat(&list, &video).await?;

        let size = tokio::fs::metadata(&video)
            .await
            .map_err(io_error(&video))?
            .len();
        if size > self.max_upload_bytes {
            return Err(DigestError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let thumbnail = match self.transcoder.thumbnail(&video, &thumb).await {
            Ok(()) => tokio::fs::read(&thumb).await.ok(),
            Err(e) => {
                warn!(camera = %camera, error = %e, "No thumbnail for digest");
                None
            }
        };

        let bytes = tokio::fs::read(&video).await.map_err(io_error(&video))?;
        info!(
            camera = %camera,
            hour = %hour.format("%Y-%m-%dT%H"),
            segments = segments.len(),
            size,
            "Uploading hourly digest"
        );
        self.chat
            .send_video(
                self.chat_id,
                VideoUpload {
                    bytes,
                    file_name: format!("{}_{}.mp4", camera_tag(camera), hour.format("%Y%m%d%H")),
                    caption: hourly_caption(camera, hour),
                    silent: true,
                    duration_secs: None,
                    thumbnail,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChat, SentItem};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes fixed-size outputs and records each concat list it is handed.
    #[derive(Default)]
    struct MockTranscoder {
        lists: Mutex<Vec<String>>,
        video_size: usize,
        fail_concat_containing: Option<String>,
        fail_thumbnail: bool,
    }

    impl MockTranscoder {
        fn new() -> Self {
            Self {
                video_size: 4096,
                ..Self::default()
            }
        }

        fn lists(&self) -> Vec<String> {
            self.lists.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transcoder for MockTranscoder {
        async fn concat(&self, list: &Path, output: &Path) -> DigestResult<()> {
            let contents = std::fs::read_to_string(list).unwrap();
            self.lists.lock().unwrap().push(contents.clone());
            if self
                .fail_concat_containing
                .as_deref()
                .is_some_and(|needle| contents.contains(needle))
            {
                return Err(DigestError::Transcode {
                    step: "concat",
                    reason: "Invalid data found when processing input".to_string(),
                });
            }
            std::fs::write(output, vec![0u8; self.video_size]).unwrap();
            Ok(())
        }

        async fn thumbnail(&self, _video: &Path, output: &Path) -> DigestResult<()> {
            if self.fail_thumbnail {
                return Err(DigestError::Transcode {
                    step: "thumbnail",
                    reason: "Output file is empty".to_string(),
                });
            }
            std::fs::write(output, [0xFF; 16]).unwrap();
            Ok(())
        }
    }

    fn hour() -> NaiveDateTime {
        parse_hour("2024-03-01T09").unwrap()
    }

    fn recordings(cameras: &[(&str, &[&str])]) -> TempDir {
        let root = TempDir::new().unwrap();
        for (camera, files) in cameras {
            let dir = segment_dir(root.path(), hour(), camera);
            std::fs::create_dir_all(&dir).unwrap();
            for file in *files {
                std::fs::write(dir.join(file), b"segment").unwrap();
            }
        }
        root
    }

    fn runner(
        root: &TempDir,
        cameras: &[&str],
        chat: &MockChat,
        transcoder: Arc<MockTranscoder>,
    ) -> DigestRunner {
        let config = DigestConfig {
            recordings_dir: root.path().to_string_lossy().into_owned(),
            max_upload_bytes: 1024 * 1024,
            ..DigestConfig::default()
        };
        DigestRunner::new(
            &config,
            cameras.iter().map(|c| (*c).to_string()).collect(),
            Arc::new(chat.clone()),
            -100,
            transcoder,
        )
    }

    #[test]
    fn parse_hour_accepts_hour_stamp() {
        let parsed = hour();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2024-03-01 09:00");
        assert!(matches!(
            parse_hour("2024-03-01 09"),
            Err(DigestError::InvalidHour(_))
        ));
        assert!(parse_hour("2024-03-01T25").is_err());
    }

    #[test]
    fn previous_hour_truncates_and_wraps_midnight() {
        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();

        let now = at("2024-03-01 09:41:17");
        assert_eq!(previous_hour(now), parse_hour("2024-03-01T08").unwrap());

        let now = at("2024-03-01 00:05:00");
        assert_eq!(previous_hour(now), parse_hour("2024-02-29T23").unwrap());
    }

    #[test]
    fn segment_dir_follows_frigate_layout() {
        let dir = segment_dir(Path::new("/media/frigate/recordings"), hour(), "porch");
        assert_eq!(
            dir,
            PathBuf::from("/media/frigate/recordings/2024-03/01/09/porch")
        );
    }

    #[test]
    fn concat_list_quotes_paths() {
        let list = concat_list(&[
            PathBuf::from("/rec/00.00.mp4"),
            PathBuf::from("/rec/it's.mp4"),
        ]);
        assert_eq!(list, "file '/rec/00.00.mp4'\nfile '/rec/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn uploads_sorted_segments_with_hourly_caption() {
        let root = recordings(&[("front-door", &["10.00.mp4", "00.00.mp4", "05.00.mp4"])]);
        std::fs::create_dir_all(segment_dir(root.path(), hour(), "front-door").join("nested"))
            .unwrap();
        let chat = MockChat::new();
        let transcoder = Arc::new(MockTranscoder::new());

        let report = runner(&root, &["front-door"], &chat, Arc::clone(&transcoder))
            .run(hour())
            .await;

        assert_eq!(report.uploaded, vec!["front-door".to_string()]);
        assert!(report.is_success());

        let lists = transcoder.lists();
        assert_eq!(lists.len(), 1);
        let names: Vec<&str> = lists[0]
            .lines()
            .map(|line| line.rsplit('/').next().unwrap())
            .collect();
        assert_eq!(names, vec!["00.00.mp4'", "05.00.mp4'", "10.00.mp4'"]);

        let videos = chat.videos();
        assert_eq!(videos.len(), 1);
        let SentItem::Video {
            chat_id,
            caption,
            size,
            silent,
            has_thumbnail,
            ..
        } = &videos[0]
        else {
            panic!("expected a video");
        };
        assert_eq!(*chat_id, -100);
        assert_eq!(caption, "#Hourly #front_door\n2024-03-01 09");
        assert_eq!(*size, 4096);
        assert!(*silent);
        assert!(*has_thumbnail);
    }

    #[tokio::test]
    async fn camera_without_recordings_is_skipped() {
        let root = recordings(&[("porch", &["00.00.mp4"])]);
        let chat = MockChat::new();
        let transcoder = Arc::new(MockTranscoder::new());

        let report = runner(&root, &["yard", "porch"], &chat, Arc::clone(&transcoder))
            .run(hour())
            .await;

        assert_eq!(report.skipped, vec!["yard".to_string()]);
        assert_eq!(report.uploaded, vec!["porch".to_string()]);
        assert_eq!(transcoder.lists().len(), 1);
        assert_eq!(chat.videos().len(), 1);
    }

    #[tokio::test]
    async fn thumbnail_failure_still_uploads() {
        let root = recordings(&[("porch", &["00.00.mp4"])]);
        let chat = MockChat::new();
        let transcoder = Arc::new(MockTranscoder {
            fail_thumbnail: true,
            ..MockTranscoder::new()
        });

        let report = runner(&root, &["porch"], &chat, transcoder).run(hour()).await;

        assert!(report.is_success());
        assert!(matches!(
            chat.videos()[0],
            SentItem::Video {
                has_thumbnail: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_digest_is_not_uploaded() {
        let root = recordings(&[("porch", &["00.00.mp4"])]);
        let chat = MockChat::new();
        let transcoder = Arc::new(MockTranscoder {
            video_size: 2 * 1024 * 1024,
            ..MockTranscoder::new()
        });

        let report = runner(&root, &["porch"], &chat, transcoder).run(hour()).await;

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("upload limit"));
        assert!(chat.videos().is_empty());
    }

    #[tokio::test]
    async fn one_camera_failing_does_not_stop_the_rest() {
        let root = recordings(&[("porch", &["00.00.mp4"]), ("yard", &["00.00.mp4"])]);
        let chat = MockChat::new();
        let transcoder = Arc::new(MockTranscoder {
            fail_concat_containing: Some("/porch/".to_string()),
            ..MockTranscoder::new()
        });

        let report = runner(&root, &["porch", "yard"], &chat, transcoder)
            .run(hour())
            .await;

        assert!(!report.is_success());
        assert_eq!(report.failed[0].0, "porch");
        assert!(report.failed[0].1.contains("concat"));
        assert_eq!(report.uploaded, vec!["yard".to_string()]);
        assert_eq!(chat.videos().len(), 1);
    }

    #[tokio::test]
    async fn upload_error_is_reported_per_camera() {
        let root = recordings(&[("porch", &["00.00.mp4"])]);
        let chat = MockChat::failing();

        let report = runner(&root, &["porch"], &chat, Arc::new(MockTranscoder::new()))
            .run(hour())
            .await;

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("failed to send video"));
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_a_transcode_error() {
        let ffmpeg = Ffmpeg::new("/nonexistent/ffmpeg", Duration::from_secs(5));
        let err = ffmpeg
            .concat(Path::new("list.txt"), Path::new("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Transcode { step: "concat", .. }));
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_transcode_error() {
        let ffmpeg = Ffmpeg::new("false", Duration::from_secs(5));
        let err = ffmpeg
            .thumbnail(Path::new("in.mp4"), Path::new("out.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DigestError::Transcode {
                step: "thumbnail",
                ..
            }
        ));
    }
}
