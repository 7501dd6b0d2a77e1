//! Snapshot and clip retrieval from the Frigate HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use relay_proto::{FetchError, FetchResult};

use crate::error::Result;

/// `{base}/api/events/{id}/snapshot.jpg?download=true`
pub fn snapshot_url(base_url: &str, event_id: &str) -> String {
    format!(
        "{}/api/events/{}/snapshot.jpg?download=true",
        base_url.trim_end_matches('/'),
        event_id
    )
}

/// `{base}/api/events/{id}/clip.mp4?download=true`
pub fn clip_url(base_url: &str, event_id: &str) -> String {
    format!(
        "{}/api/events/{}/clip.mp4?download=true",
        base_url.trim_end_matches('/'),
        event_id
    )
}

/// Raw access to event media.
///
/// [`FrigateClient`] is the production implementation; tests substitute an
/// in-memory source.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Download the snapshot JPEG for an event.
    async fn get_snapshot(&self, event_id: &str) -> FetchResult<Vec<u8>>;

    /// Download the MP4 clip for an event.
    async fn get_clip(&self, event_id: &str) -> FetchResult<Vec<u8>>;

    /// Public download link for an event's clip.
    fn clip_link(&self, event_id: &str) -> String;
}

/// HTTP client for the Frigate event API.
pub struct FrigateClient {
    client: Client,
    base_url: String,
}

impl FrigateClient {
    /// Create a client with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn download(&self, url: String) -> FetchResult<Vec<u8>> {
        debug!("Downloading {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl MediaSource for FrigateClient {
    async fn get_snapshot(&self, event_id: &str) -> FetchResult<Vec<u8>> {
        self.download(snapshot_url(&self.base_url, event_id)).await
    }

    async fn get_clip(&self, event_id: &str) -> FetchResult<Vec<u8>> {
        self.download(clip_url(&self.base_url, event_id)).await
    }

    fn clip_link(&self, event_id: &str) -> String {
        clip_url(&self.base_url, event_id)
    }
}

/// Applies the relay's fetch policy on top of a [`MediaSource`]:
/// snapshots are fetched once, clips after a settle delay and only when
/// large enough to be a finished recording.
#[derive(Clone)]
pub struct MediaFetcher {
    source: Arc<dyn MediaSource>,
    clip_delay: Duration,
    min_clip_bytes: usize,
}

impl MediaFetcher {
    pub fn new(source: Arc<dyn MediaSource>, clip_delay: Duration, min_clip_bytes: usize) -> Self {
        Self {
            source,
            clip_delay,
            min_clip_bytes,
        }
    }

    /// Single attempt, no retry.
    pub async fn fetch_snapshot(&self, event_id: &str) -> FetchResult<Vec<u8>> {
        self.source.get_snapshot(event_id).await
    }

    /// Wait for Frigate to finish the recording, then download it once.
    ///
    /// Bodies of `min_clip_bytes` or fewer are reported as
    /// [`FetchError::NotReady`]; there is no second attempt.
    pub async fn fetch_clip(&self, event_id: &str, camera: &str) -> FetchResult<Vec<u8>> {
        debug!(event_id = %event_id, camera = %camera, delay = ?self.clip_delay, "Waiting before clip fetch");
        tokio::time::sleep(self.clip_delay).await;

        let clip = self.source.get_clip(event_id).await?;
        if clip.len() <= self.min_clip_bytes {
            return Err(FetchError::NotReady {
                event_id: event_id.to_string(),
                size: clip.len(),
            });
        }
        Ok(clip)
    }

    pub fn clip_link(&self, event_id: &str) -> String {
        self.source.clip_link(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockMedia;

    #[test]
    fn urls_follow_frigate_api_layout() {
        assert_eq!(
            snapshot_url("http://frigate:5000/", "abc"),
            "http://frigate:5000/api/events/abc/snapshot.jpg?download=true"
        );
        assert_eq!(
            clip_url("http://frigate:5000", "abc"),
            "http://frigate:5000/api/events/abc/clip.mp4?download=true"
        );
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = FrigateClient::new("http://frigate/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://frigate");
        assert_eq!(
            client.clip_link("x"),
            "http://frigate/api/events/x/clip.mp4?download=true"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_clip_waits_for_delay() {
        let media = MockMedia::new().with_clip_size(4096);
        let fetcher = MediaFetcher::new(Arc::new(media.clone()), Duration::from_secs(5), 1024);

        let start = tokio::time::Instant::now();
        let clip = fetcher.fetch_clip("1", "front-door").await.unwrap();

        assert_eq!(clip.len(), 4096);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(media.clip_requests(), vec!["1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn small_clip_is_not_ready() {
        let media = MockMedia::new().with_clip_size(1024);
        let fetcher = MediaFetcher::new(Arc::new(media), Duration::from_secs(5), 1024);

        let err = fetcher.fetch_clip("1", "front-door").await.unwrap_err();
        assert!(matches!(err, FetchError::NotReady { size: 1024, .. }));
    }

    #[tokio::test]
    async fn snapshot_failure_is_returned() {
        let media = MockMedia::new().failing_snapshots();
        let fetcher = MediaFetcher::new(Arc::new(media), Duration::ZERO, 1024);
        assert!(fetcher.fetch_snapshot("1").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_frigate_is_a_request_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = FrigateClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.get_snapshot("1").await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
