//! Command handlers for the `pocketune` binary.
//!
//! Each handler returns `Ok(true)` when the intent succeeded and `Ok(false)`
//! when it ran but reported failure, so `main` can pick the exit code.

use std::path::PathBuf;
use std::sync::Arc;

use pocketune_core::{
    ApiAudioSource, AppConfig, AudioSource, Catalog, ConfigManager, DOWNLOAD_QUEUE_KEY,
    DOWNLOADING_ID_KEY, DownloadEvent, DownloadQueue, Error, ExtractionBackend, FileStore,
    HttpAudioStream, KeyValueStore, LibrarySong, NoticeLevel, PLAYER_CURRENT_TIME_KEY,
    PLAYER_SONG_PLAYING_KEY, PLAYER_SONG_QUEUE_KEY, Playlist, Result, Track, YouTubeSearch,
    YtdlAudioSource, parse_link,
};
use tracing::{debug, info, warn};

/// Settings keys that can be saved from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SettingsKey {
    /// YouTube Data API key used by `search` and `link`.
    YoutubeApiKey,
    /// Base URL of the audio extraction API.
    ApiBaseUrl,
}

impl SettingsKey {
    /// Store key the value is saved under.
    pub const fn store_key(self) -> &'static str {
        match self {
            Self::YoutubeApiKey => "youtube_api_key",
            Self::ApiBaseUrl => "api_base_url",
        }
    }
}

/// Extraction backend picked from configuration.
#[derive(Debug, Clone)]
pub enum Extractor {
    /// Self-hosted extraction API.
    Api(ApiAudioSource),
    /// In-process `rusty_ytdl`.
    Ytdl(YtdlAudioSource),
}

impl AudioSource for Extractor {
    type Stream = HttpAudioStream;

    async fn resolve_audio_url(&self, track: &Track) -> Result<String> {
        match self {
            Self::Api(source) => source.resolve_audio_url(track).await,
            Self::Ytdl(source) => source.resolve_audio_url(track).await,
        }
    }

    async fn open(&self, url: &str) -> Result<HttpAudioStream> {
        match self {
            Self::Api(source) => source.open(url).await,
            Self::Ytdl(source) => source.open(url).await,
        }
    }
}

/// Everything a command needs: settings, the data store and the catalog.
pub struct App {
    config: ConfigManager,
    store: Arc<FileStore>,
    catalog: Arc<Catalog>,
}

impl App {
    /// Load configuration and open the data directory.
    ///
    /// `data_dir` overrides the configured directory for this run only.
    pub fn open(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config =
            ConfigManager::with_path(config_path.unwrap_or_else(AppConfig::config_file_path))?;
        let data_dir = data_dir.unwrap_or_else(|| config.config().data_directory.clone());
        info!("Data directory: {}", data_dir.display());

        let store = Arc::new(FileStore::new(data_dir)?);
        let catalog = Arc::new(Catalog::load(store.clone())?);
        Ok(Self {
            config,
            store,
            catalog,
        })
    }

    /// A service setting: the config file wins, then the saved settings key.
    fn setting(&self, key: SettingsKey) -> Result<String> {
        let services = &self.config.config().services;
        let configured = match key {
            SettingsKey::YoutubeApiKey => services.youtube_api_key.as_deref(),
            SettingsKey::ApiBaseUrl => services.api_base_url.as_deref(),
        };
        match configured.map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => self.store.require(key.store_key()),
        }
    }

    fn search_client(&self) -> Result<YouTubeSearch> {
        YouTubeSearch::new(self.setting(SettingsKey::YoutubeApiKey)?)
    }

    fn extractor(&self) -> Result<Extractor> {
        match self.config.config().services.backend {
            ExtractionBackend::Api => Ok(Extractor::Api(ApiAudioSource::new(
                self.setting(SettingsKey::ApiBaseUrl)?,
            )?)),
            ExtractionBackend::Ytdl => Ok(Extractor::Ytdl(YtdlAudioSource::new()?)),
        }
    }

    fn download_queue(&self) -> Result<DownloadQueue<Extractor>> {
        Ok(DownloadQueue::open(
            self.extractor()?,
            self.store.clone(),
            Arc::clone(&self.catalog),
            self.config.config().download.clone(),
        ))
    }

    /// Free-text search.
    pub async fn search(&self, query: &str) -> Result<bool> {
        let results = self.search_client()?.search(query).await?;
        if results.is_empty() {
            println!("No results for \"{query}\"");
        }
        for track in &results {
            print_track(track, self.catalog.contains(&track.id));
        }
        Ok(true)
    }

    /// Expand a pasted video or playlist link.
    pub async fn link(&self, url: &str) -> Result<bool> {
        let tracks = self.search_client()?.resolve_link(url).await?;
        for track in &tracks {
            print_track(track, self.catalog.contains(&track.id));
        }
        println!("{} track(s)", tracks.len());
        Ok(!tracks.is_empty())
    }

    /// Queue tracks and run the queue until it drains.
    ///
    /// Each item is a link, a search query (first hit wins) or, with
    /// `raw_ids`, a bare video id. Without items the persisted queue resumes.
    pub async fn download(&self, items: &[String], raw_ids: bool) -> Result<bool> {
        let tracks = if raw_ids {
            items.iter().map(|id| Track::new(id.as_str(), id.as_str())).collect()
        } else {
            self.lookup(items).await?
        };

        let queue = self.download_queue()?;
        let added = queue.enqueue_many(tracks).await;
        debug!("Added {} track(s) to the download queue", added);
        queue.start().await;

        let mut failures = 0usize;
        loop {
            tokio::select! {
                biased;
                event = queue.recv_event() => match event {
                    Some(event) => report(&event, &mut failures),
                    None => break,
                },
                () = queue.wait_idle() => break,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, the remaining queue resumes on the next run");
                    println!("Interrupted");
                    return Ok(false);
                }
            }
        }
        while let Some(event) = queue.try_recv_event().await {
            report(&event, &mut failures);
        }
        Ok(failures == 0)
    }

    async fn lookup(&self, items: &[String]) -> Result<Vec<Track>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let search = self.search_client()?;
        let mut tracks = Vec::new();
        for item in items {
            if parse_link(item).is_some() {
                tracks.extend(search.resolve_link(item).await?);
                continue;
            }
            match search.search(item).await?.into_iter().next() {
                Some(track) => tracks.push(track),
                None => println!("No results for \"{item}\", skipped"),
            }
        }
        Ok(tracks)
    }

    /// Show the persisted download queue.
    pub fn queue(&self) -> Result<bool> {
        let downloading = self.store.get(DOWNLOADING_ID_KEY)?;
        let queue: Vec<Track> = match self.store.get(DOWNLOAD_QUEUE_KEY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        if queue.is_empty() && downloading.is_none() {
            println!("Download queue is empty");
            return Ok(true);
        }
        for track in &queue {
            let marker = if downloading.as_deref() == Some(track.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!("{marker} {}  {}", track.id, track.title);
        }
        Ok(true)
    }

    /// Drop a queued track that has not started.
    pub async fn cancel(&self, track_id: &str) -> Result<bool> {
        let cancelled = self.download_queue()?.cancel(track_id).await;
        if cancelled {
            println!("Cancelled {track_id}");
        } else {
            println!("{track_id} is not waiting in the queue");
        }
        Ok(cancelled)
    }

    /// List library songs.
    pub fn songs(&self, favorites_only: bool) -> Result<bool> {
        let songs = if favorites_only {
            self.catalog.favorites()
        } else {
            self.catalog.songs()
        };
        if songs.is_empty() {
            println!("No songs");
        }
        for song in &songs {
            print_song(song);
        }
        Ok(true)
    }

    /// Flip the favorite flag of a song.
    pub fn favorite(&self, song_id: &str) -> Result<bool> {
        let favorite = self.catalog.toggle_favorite(song_id)?;
        println!(
            "{song_id} {}",
            if favorite { "added to favorites" } else { "removed from favorites" }
        );
        Ok(true)
    }

    /// Delete a song, its file and its playlist entries.
    pub fn delete_song(&self, song_id: &str) -> Result<bool> {
        if self.catalog.delete_song(song_id)? {
            println!("Deleted {song_id}");
        } else {
            println!("{song_id} was not in the library");
        }
        Ok(true)
    }

    /// List playlists.
    pub fn playlists(&self) -> Result<bool> {
        let playlists = self.catalog.playlists();
        if playlists.is_empty() {
            println!("No playlists");
        }
        for playlist in &playlists {
            print_playlist(playlist);
        }
        Ok(true)
    }

    /// Create a playlist.
    pub fn create_playlist(&self, name: Option<&str>) -> Result<bool> {
        let playlist = self.catalog.create_playlist(name)?;
        print_playlist(&playlist);
        Ok(true)
    }

    /// Rename a playlist.
    pub fn rename_playlist(&self, playlist_id: &str, name: &str) -> Result<bool> {
        self.catalog.rename_playlist(playlist_id, name)?;
        println!("Renamed {playlist_id} to \"{}\"", name.trim());
        Ok(true)
    }

    /// Set or clear a playlist cover.
    pub fn set_playlist_image(&self, playlist_id: &str, image: &str) -> Result<bool> {
        self.catalog.set_playlist_image(playlist_id, image)?;
        Ok(true)
    }

    /// Delete a playlist. Its songs stay in the library.
    pub fn delete_playlist(&self, playlist_id: &str) -> Result<bool> {
        let deleted = self.catalog.delete_playlist(playlist_id)?;
        if !deleted {
            println!("Playlist {playlist_id} not found");
        }
        Ok(deleted)
    }

    /// Add a library song to a playlist.
    pub fn add_to_playlist(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        if !self.catalog.contains(song_id) {
            return Err(Error::SongNotFound(song_id.to_string()));
        }
        let added = self.catalog.add_song_to_playlist(playlist_id, song_id)?;
        if !added {
            println!("{song_id} was not added to {playlist_id}");
        }
        Ok(added)
    }

    /// Remove a song from a playlist.
    pub fn remove_from_playlist(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        let removed = self.catalog.remove_song_from_playlist(playlist_id, song_id)?;
        if !removed {
            println!("{song_id} is not in {playlist_id}");
        }
        Ok(removed)
    }

    /// Show a playlist and its songs.
    pub fn show_playlist(&self, playlist_id: &str) -> Result<bool> {
        let snapshot = self.catalog.snapshot();
        let playlist = snapshot
            .playlist(playlist_id)
            .ok_or_else(|| Error::PlaylistNotFound(playlist_id.to_string()))?;
        print_playlist(playlist);
        for song in snapshot.resolve(playlist) {
            print_song(&song);
        }
        Ok(true)
    }

    /// Show the persisted playback session.
    pub fn session(&self) -> Result<bool> {
        let playing: Option<LibrarySong> = match self.store.get(PLAYER_SONG_PLAYING_KEY)? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        let Some(song) = playing else {
            println!("No playback session");
            return Ok(true);
        };
        let queue: Vec<LibrarySong> = match self.store.get(PLAYER_SONG_QUEUE_KEY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        let position = self
            .store
            .get(PLAYER_CURRENT_TIME_KEY)?
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0);

        println!("Now playing: {} - {}", song.title, song.artist());
        println!("Position:    {}", format_position(position));
        let index = queue.iter().position(|s| s.id == song.id);
        match index {
            Some(index) => println!("Queue:       {} of {}", index + 1, queue.len()),
            None => println!("Queue:       {} song(s)", queue.len()),
        }
        Ok(true)
    }

    /// Print the effective configuration.
    pub fn show_config(&self) -> Result<bool> {
        println!("# {}", self.config.path().display());
        println!("{}", serde_json::to_string_pretty(self.config.config())?);
        for key in [SettingsKey::YoutubeApiKey, SettingsKey::ApiBaseUrl] {
            let state = if self.setting(key).is_ok() { "set" } else { "not set" };
            println!("{}: {state}", key.store_key());
        }
        Ok(true)
    }

    /// Move the data directory used by later runs. Existing files stay where
    /// they are.
    pub fn set_data_dir(&mut self, path: PathBuf) -> Result<bool> {
        let mut config = self.config.config().clone();
        config.set_data_directory(path)?;
        self.config.update(config)?;
        println!(
            "Data directory set to {}",
            self.config.config().data_directory.display()
        );
        Ok(true)
    }

    /// Write the default configuration back to the config file.
    pub fn reset_config(&mut self) -> Result<bool> {
        self.config.reset()?;
        println!("Restored defaults in {}", self.config.path().display());
        Ok(true)
    }

    /// Save a service key, like the settings screen does.
    pub fn set_key(&self, key: SettingsKey, value: &str) -> Result<bool> {
        let value = value.trim();
        if value.is_empty() {
            self.store.remove(key.store_key())?;
            println!("Cleared {}", key.store_key());
        } else {
            self.store.set(key.store_key(), value)?;
            println!("Saved {}", key.store_key());
        }
        Ok(true)
    }
}

fn report(event: &DownloadEvent, failures: &mut usize) {
    match event {
        DownloadEvent::Started { track_id } => println!("Downloading {track_id}"),
        DownloadEvent::Progress { track_id, percent } => {
            debug!("{} at {}%", track_id, percent);
        }
        DownloadEvent::Completed { track_id, file_uri } => {
            println!("Saved {track_id} to {file_uri}");
        }
        DownloadEvent::Failed { track_id, message } => {
            *failures += 1;
            println!("Failed {track_id}: {message}");
        }
        DownloadEvent::Recovered { track_id } => println!("Recovered {track_id}"),
        DownloadEvent::Notice(notice) => match notice.level {
            NoticeLevel::Success => debug!("{}: {}", notice.title, notice.message),
            NoticeLevel::Error => warn!("{}: {}", notice.title, notice.message),
        },
        DownloadEvent::Enqueued { .. } | DownloadEvent::Cancelled { .. } => {}
    }
}

fn print_track(track: &Track, downloaded: bool) {
    let marker = if downloaded { "✓" } else { " " };
    match &track.channel_title {
        Some(channel) => println!("{marker} {}  {}  ({channel})", track.id, track.title),
        None => println!("{marker} {}  {}", track.id, track.title),
    }
}

fn print_song(song: &LibrarySong) {
    let star = if song.favorite { "★" } else { " " };
    println!("{star} {}  {} - {}", song.id, song.title, song.artist());
}

fn print_playlist(playlist: &Playlist) {
    println!(
        "{}  {}  ({} song(s))",
        playlist.id,
        playlist.name,
        playlist.songs.len()
    );
}

fn format_position(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketune_core::BlobStore;
    use tempfile::TempDir;

    fn app(dir: &TempDir) -> App {
        let config_path = dir.path().join("config.json");
        App::open(Some(config_path), Some(dir.path().join("data"))).expect("app")
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0.0), "0:00");
        assert_eq!(format_position(83.5), "1:23");
        assert_eq!(format_position(3600.0), "60:00");
    }

    #[test]
    fn test_settings_key_names() {
        assert_eq!(SettingsKey::YoutubeApiKey.store_key(), "youtube_api_key");
        assert_eq!(SettingsKey::ApiBaseUrl.store_key(), "api_base_url");
    }

    #[test]
    fn test_missing_key_reports_settings_hint() {
        let dir = TempDir::new().expect("tempdir");
        let app = app(&dir);

        let err = app.search_client().expect_err("no key");
        assert_eq!(
            err.user_message(),
            "youtube_api_key not found, please setup this key in settings menu."
        );
    }

    #[test]
    fn test_saved_key_is_used() {
        let dir = TempDir::new().expect("tempdir");
        let app = app(&dir);

        app.set_key(SettingsKey::ApiBaseUrl, "https://audio.example/")
            .expect("set");
        match app.extractor().expect("extractor") {
            Extractor::Api(source) => assert_eq!(source.base_url(), "https://audio.example"),
            Extractor::Ytdl(_) => panic!("api backend expected"),
        }
    }

    #[test]
    fn test_set_data_dir_is_saved_for_next_run() {
        let dir = TempDir::new().expect("tempdir");
        let config_path = dir.path().join("config.json");
        let target = dir.path().join("library");
        let mut app = app(&dir);

        assert!(app.set_data_dir(target.clone()).expect("set"));
        assert!(target.is_dir());

        let reopened = App::open(Some(config_path), None).expect("reopen");
        assert_eq!(reopened.config.config().data_directory, target);
    }

    #[test]
    fn test_set_data_dir_rejects_relative_path() {
        let dir = TempDir::new().expect("tempdir");
        let mut app = app(&dir);
        let before = app.config.config().data_directory.clone();

        assert!(app.set_data_dir(PathBuf::from("music")).is_err());
        assert_eq!(app.config.config().data_directory, before);
    }

    #[test]
    fn test_reset_config_restores_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let mut app = app(&dir);
        app.set_data_dir(dir.path().join("library")).expect("set");

        assert!(app.reset_config().expect("reset"));
        assert_eq!(app.config.config(), &AppConfig::default());
    }

    #[test]
    fn test_playlist_commands() {
        let dir = TempDir::new().expect("tempdir");
        let app = app(&dir);
        app.store.write("a.mp3", b"x").expect("write");
        app.catalog
            .add_song(LibrarySong::from_track(
                &Track::new("a", "A"),
                app.store.uri_for("a.mp3"),
            ))
            .expect("add");

        assert!(app.create_playlist(Some("Mix")).expect("create"));
        let id = app.catalog.playlists()[0].id.clone();
        assert!(app.add_to_playlist(&id, "a").expect("add"));
        assert!(!app.add_to_playlist(&id, "a").expect("duplicate"));
        assert!(app.add_to_playlist(&id, "ghost").is_err());
        assert!(app.show_playlist(&id).expect("show"));
        assert!(app.delete_song("a").expect("delete"));
        assert!(app.catalog.playlists()[0].songs.is_empty());
    }

    #[tokio::test]
    async fn test_download_without_items_on_empty_queue() {
        let dir = TempDir::new().expect("tempdir");
        let app = app(&dir);
        app.set_key(SettingsKey::ApiBaseUrl, "http://127.0.0.1:9")
            .expect("set");

        assert!(app.download(&[], false).await.expect("download"));
    }
}
