//! Audio extraction collaborators.
//!
//! An [`AudioSource`] turns a track into a playable audio URL and opens a
//! byte stream on it. Two implementations are provided: [`ApiAudioSource`]
//! talks to the self-hosted extraction API and [`YtdlAudioSource`] resolves
//! streams in-process with `rusty_ytdl`.

use std::future::Future;
use std::time::Duration;

use rusty_ytdl::{Video, VideoOptions, VideoQuality, VideoSearchOptions};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{DownloadError, Error, Result};
use crate::model::Track;

/// Connect timeout for extraction and transfer requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Byte stream of a single audio file.
pub trait AudioStream: Send {
    /// Total size in bytes, when the server announced it.
    fn content_length(&self) -> Option<u64>;

    /// Next chunk of bytes, `None` once the stream is exhausted.
    fn chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

/// Resolves and opens audio for a track.
pub trait AudioSource: Send + Sync + 'static {
    /// Stream type returned by [`AudioSource::open`].
    type Stream: AudioStream;

    /// Ask the extraction service for a streamable URL.
    fn resolve_audio_url(&self, track: &Track) -> impl Future<Output = Result<String>> + Send;

    /// Start fetching the bytes behind a resolved URL.
    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Stream>> + Send;
}

fn extraction_error(track_id: &str, reason: impl ToString) -> Error {
    Error::Download(DownloadError::ExtractionFailed {
        track_id: track_id.to_string(),
        reason: reason.to_string(),
    })
}

fn transfer_error(url: &str, reason: impl ToString) -> Error {
    Error::Download(DownloadError::TransferFailed {
        track_id: url.to_string(),
        reason: reason.to_string(),
    })
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Streams a `reqwest` response body.
#[derive(Debug)]
pub struct HttpAudioStream {
    url: String,
    response: reqwest::Response,
}

impl AudioStream for HttpAudioStream {
    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk = self
            .response
            .chunk()
            .await
            .map_err(|e| transfer_error(&self.url, e))?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

async fn open_http(client: &reqwest::Client, url: &str) -> Result<HttpAudioStream> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| transfer_error(url, e))?;
    debug!("Opened audio stream, length {:?}", response.content_length());
    Ok(HttpAudioStream {
        url: url.to_string(),
        response,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioUrlResponse {
    #[serde(default)]
    audio_url: Option<String>,
}

/// Client of the self-hosted extraction API.
#[derive(Debug, Clone)]
pub struct ApiAudioSource {
    base_url: String,
    client: reqwest::Client,
}

impl ApiAudioSource {
    /// Create a client for the API at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Configuration(
                "api_base_url not found, please setup this key in settings menu.".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            client: http_client()?,
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AudioSource for ApiAudioSource {
    type Stream = HttpAudioStream;

    async fn resolve_audio_url(&self, track: &Track) -> Result<String> {
        let endpoint = format!("{}/get-audio-url", self.base_url);
        debug!("Requesting audio URL for {} from {}", track.id, endpoint);

        let response = self
            .client
            .get(&endpoint)
            .query(&[("videoId", track.id.as_str())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| extraction_error(&track.id, e))?;

        let body: AudioUrlResponse = response
            .json()
            .await
            .map_err(|e| extraction_error(&track.id, e))?;

        match body.audio_url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(Error::Download(DownloadError::NoAudioUrl {
                track_id: track.id.clone(),
            })),
        }
    }

    async fn open(&self, url: &str) -> Result<HttpAudioStream> {
        open_http(&self.client, url).await
    }
}

/// In-process extraction with `rusty_ytdl`.
#[derive(Debug, Clone)]
pub struct YtdlAudioSource {
    client: reqwest::Client,
}

impl YtdlAudioSource {
    /// Create a new extractor.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }
}

impl AudioSource for YtdlAudioSource {
    type Stream = HttpAudioStream;

    async fn resolve_audio_url(&self, track: &Track) -> Result<String> {
        let video_url = format!("https://www.youtube.com/watch?v={}", track.id);

        // Audio-only formats are frequently refused with 403, combined
        // streams are not.
        let options = VideoOptions {
            quality: VideoQuality::Lowest,
            filter: VideoSearchOptions::VideoAudio,
            ..Default::default()
        };

        let video = Video::new_with_options(&video_url, options)
            .map_err(|e| extraction_error(&track.id, format!("Failed to create video instance: {e}")))?;

        let info = video
            .get_info()
            .await
            .map_err(|e| extraction_error(&track.id, format!("Failed to get video info: {e}")))?;

        info!("Available formats for {}: {}", track.id, info.formats.len());

        info.formats
            .iter()
            .filter(|f| f.has_audio && !f.url.is_empty())
            .min_by_key(|f| (!f.has_video, f.bitrate))
            .map(|f| f.url.clone())
            .ok_or_else(|| {
                Error::Download(DownloadError::NoAudioUrl {
                    track_id: track.id.clone(),
                })
            })
    }

    async fn open(&self, url: &str) -> Result<HttpAudioStream> {
        open_http(&self.client, url).await
    }
}
