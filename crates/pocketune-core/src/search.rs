//! Search and metadata lookups against the YouTube Data API v3.
//!
//! Free-text search returns music videos; pasted links are classified as a
//! single video or a playlist and expanded into [`Track`] records ready for
//! the download queue.

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Track, html_decode};

/// Default API endpoint.
pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Results returned by a free-text search.
pub const SEARCH_MAX_RESULTS: u32 = 10;

/// Page size for playlist expansion.
const PLAYLIST_PAGE_SIZE: u32 = 50;

/// Upper bound on tracks pulled from one playlist.
const PLAYLIST_MAX_ITEMS: usize = 500;

/// What a pasted link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// A single video id.
    Video(String),
    /// A playlist id.
    Playlist(String),
}

/// Classify a pasted YouTube URL. A `list=` parameter wins over a video id.
#[must_use]
pub fn parse_link(url: &str) -> Option<LinkTarget> {
    let url = url.trim();
    let lower = url.to_lowercase();
    if !(lower.contains("youtube.com") || lower.contains("youtu.be")) {
        return None;
    }

    let playlist_re = Regex::new(r"[?&]list=([A-Za-z0-9_-]+)").ok()?;
    if let Some(caps) = playlist_re.captures(url) {
        return Some(LinkTarget::Playlist(caps.get(1)?.as_str().to_string()));
    }

    let video_re = Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/|/embed/)([A-Za-z0-9_-]{11})").ok()?;
    let caps = video_re.captures(url)?;
    Some(LinkTarget::Video(caps.get(1)?.as_str().to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    #[serde(default)]
    id: Option<ItemId>,
    #[serde(default)]
    snippet: Option<Snippet>,
}

/// `search` returns `{"videoId": ...}`, `videos` a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemId {
    Plain(String),
    Search {
        #[serde(rename = "videoId")]
        video_id: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: Option<String>,
    #[serde(default)]
    video_owner_channel_title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(default)]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(self) -> Option<String> {
        self.high.or(self.medium).or(self.default).map(|t| t.url)
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

impl ApiItem {
    fn into_track(self) -> Option<Track> {
        let snippet = self.snippet.unwrap_or_default();
        // Playlist items carry their own id; the video id is in `resourceId`.
        let id = snippet
            .resource_id
            .and_then(|r| r.video_id)
            .or(match self.id {
                Some(ItemId::Plain(id)) => Some(id),
                Some(ItemId::Search { video_id }) => video_id,
                None => None,
            })
            .filter(|id| !id.is_empty())?;

        Some(Track {
            id,
            title: html_decode(&snippet.title),
            channel_title: snippet.video_owner_channel_title.or(snippet.channel_title),
            thumbnail: snippet.thumbnails.best(),
            description: snippet.description.filter(|d| !d.is_empty()),
        })
    }
}

fn tracks_from(response: ApiResponse) -> Vec<Track> {
    response
        .items
        .into_iter()
        .filter_map(ApiItem::into_track)
        .collect()
}

/// YouTube Data API client.
#[derive(Debug, Clone)]
pub struct YouTubeSearch {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl YouTubeSearch {
    /// Create a client. An empty key is a configuration error.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Configuration(
                "youtube_api_key not found, please setup this key in settings menu.".to_string(),
            ));
        }
        Ok(Self {
            api_key,
            base_url: YOUTUBE_API_BASE.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Point the client at another endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, resource: &str, params: &[(&str, &str)]) -> Result<ApiResponse> {
        let url = format!("{}/{}", self.base_url, resource);
        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Search(format!("YouTube API error: {}", status.as_u16())));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Search(format!("Unexpected response: {e}")))
    }

    /// Free-text search for music videos.
    pub async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let max_results = SEARCH_MAX_RESULTS.to_string();
        let response = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("q", query),
                    ("videoCategoryId", "10"),
                    ("maxResults", max_results.as_str()),
                    ("order", "relevance"),
                ],
            )
            .await?;
        let tracks = tracks_from(response);
        info!("Search '{}' returned {} tracks", query, tracks.len());
        Ok(tracks)
    }

    /// Metadata of a single video.
    pub async fn video(&self, video_id: &str) -> Result<Option<Track>> {
        let response = self
            .get("videos", &[("part", "snippet"), ("id", video_id)])
            .await?;
        Ok(tracks_from(response).into_iter().next())
    }

    /// All videos of a playlist, following pagination.
    pub async fn playlist_items(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let page_size = PLAYLIST_PAGE_SIZE.to_string();
        let mut tracks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("part", "snippet"),
                ("playlistId", playlist_id),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let response = self.get("playlistItems", &params).await?;
            let next = response.next_page_token.clone();
            tracks.extend(tracks_from(response));

            match next {
                Some(token) if tracks.len() < PLAYLIST_MAX_ITEMS => page_token = Some(token),
                Some(_) => {
                    warn!("Playlist {} truncated at {} items", playlist_id, tracks.len());
                    break;
                }
                None => break,
            }
        }
        debug!("Playlist {} has {} tracks", playlist_id, tracks.len());
        Ok(tracks)
    }

    /// Expand a pasted link into tracks.
    pub async fn resolve_link(&self, url: &str) -> Result<Vec<Track>> {
        match parse_link(url) {
            Some(LinkTarget::Playlist(id)) => self.playlist_items(&id).await,
            Some(LinkTarget::Video(id)) => Ok(self.video(&id).await?.into_iter().collect()),
            None => Err(Error::Search(format!("Not a YouTube video or playlist link: {url}"))),
        }
    }
}
