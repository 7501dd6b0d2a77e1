//! Caption formatting for alerts and clips.
//!
//! Captions are sent in Telegram HTML parse mode. Camera names become hashtags
//! (`front-door` → `#front_door`) so the chat can be filtered per camera.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use relay_proto::CameraEvent;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const HOUR_FORMAT: &str = "%Y-%m-%d %H";

/// Escape special HTML characters for Telegram's HTML parse mode.
///
/// Telegram requires `<`, `>`, and `&` to be escaped in HTML-formatted messages.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Turn a camera name into a hashtag body. Dashes and spaces are not valid in
/// Telegram hashtags.
pub fn camera_tag(camera: &str) -> String {
    camera.replace(['-', ' '], "_")
}

/// `#Hourly #<camera>` followed by the local hour the recording covers.
pub fn hourly_caption(camera: &str, hour: NaiveDateTime) -> String {
    format!(
        "#Hourly #{}\n{}",
        escape_html(&camera_tag(camera)),
        hour.format(HOUR_FORMAT)
    )
}

/// Renders captions in the deployment's local time zone.
#[derive(Debug, Clone)]
pub struct CaptionFormatter {
    zone: Option<Tz>,
}

impl CaptionFormatter {
    /// Resolve an IANA zone name. Unknown names fall back to UTC with a warning.
    pub fn new(zone_name: &str) -> Self {
        let zone = match zone_name.parse::<Tz>() {
            Ok(zone) => Some(zone),
            Err(e) => {
                warn!(zone = %zone_name, error = %e, "Unknown time zone, captions will use UTC");
                None
            }
        };
        Self { zone }
    }

    /// Formatter that always renders UTC.
    pub fn utc() -> Self {
        Self { zone: None }
    }

    /// Wall-clock time in the configured zone.
    pub fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self.zone {
            Some(zone) => at.with_timezone(&zone).naive_local(),
            None => at.naive_utc(),
        }
    }

    pub fn local_now(&self) -> NaiveDateTime {
        self.to_local(Utc::now())
    }

    /// `YYYY-MM-DDTHH:MM:SS` in the configured zone.
    pub fn format_time(&self, at: DateTime<Utc>) -> String {
        match self.zone {
            Some(zone) => at.with_timezone(&zone).format(TIME_FORMAT).to_string(),
            None => at.format(TIME_FORMAT).to_string(),
        }
    }

    /// Format an epoch-seconds timestamp as carried by Frigate events.
    pub fn format_epoch(&self, epoch_secs: f64) -> String {
        let at = DateTime::from_timestamp(epoch_secs.floor() as i64, 0).unwrap_or_default();
        self.format_time(at)
    }

    /// `#Event #<camera> at <time>` for an immediate snapshot alert.
    pub fn snapshot_caption(&self, camera: &str, at: DateTime<Utc>) -> String {
        format!(
            "#Event #{} at {}",
            escape_html(&camera_tag(camera)),
            self.format_time(at)
        )
    }

    /// Caption for a finished clip: camera, start time, label and a link
    /// back to the Frigate download.
    pub fn clip_caption(&self, event: &CameraEvent, clip_url: &str) -> String {
        let mut caption = format!(
            "#Event #{} at {}\n#{}",
            escape_html(&camera_tag(&event.camera)),
            self.format_epoch(event.start_time),
            escape_html(&camera_tag(&event.label)),
        );
        if let Some(score) = event.top_score {
            caption.push_str(&format!(" ({:.0}%)", score * 100.0));
        }
        if let Some(duration) = event.duration_secs() {
            caption.push_str(&format!(", {duration}s"));
        }
        caption.push_str(&format!(
            "\n<a href=\"{}\">Download clip</a>",
            escape_html(clip_url)
        ));
        caption
    }
}
