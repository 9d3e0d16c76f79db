//! Download queue engine.
//!
//! Tracks are downloaded strictly one at a time in FIFO order by a single
//! worker task. The queue and the id of the in-flight track are persisted to
//! the key/value store after every change, so a killed process resumes where
//! it stopped:
//!
//! - the in-flight track stays at the head of the queue until its pipeline
//!   finishes, so an interrupted download is simply retried;
//! - if the catalog already holds the interrupted track (the process died
//!   between writing the file and clearing the markers), the markers are
//!   cleared and a success notice is emitted instead.
//!
//! State is published as a [`DownloadSnapshot`] on a `watch` channel and
//! individual transitions as [`DownloadEvent`]s.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, CatalogSnapshot};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Error, Result};
use crate::model::{LibrarySong, Track, TrackId, html_decode};
use crate::source::{AudioSource, AudioStream};
use crate::store::{KeyValueStore, load_json, save_json};

/// Key holding the id of the track being downloaded.
pub const DOWNLOADING_ID_KEY: &str = "downloading_id";

/// Key holding the JSON array of queued tracks.
pub const DOWNLOAD_QUEUE_KEY: &str = "download_queue";

/// Characters that never make it into a file name.
const UNSAFE_FILE_CHARS: [char; 10] = ['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// What the worker is doing with the in-flight track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkerPhase {
    /// No pipeline is running.
    #[default]
    Idle,
    /// Waiting for the extraction service to return an audio URL.
    Fetching,
    /// Transferring bytes.
    Downloading {
        /// Integer percent of bytes received, 0 when the size is unknown.
        progress: u8,
    },
}

impl WorkerPhase {
    /// Progress of the in-flight transfer.
    #[must_use]
    pub const fn progress(self) -> u8 {
        match self {
            Self::Downloading { progress } => progress,
            Self::Idle | Self::Fetching => 0,
        }
    }
}

/// Point-in-time view of the download queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DownloadSnapshot {
    /// Track currently owned by the worker.
    pub downloading_id: Option<TrackId>,
    /// Pending tracks in FIFO order. The in-flight track, if any, is the head.
    pub queue: Vec<Track>,
    /// Worker phase.
    pub phase: WorkerPhase,
}

impl DownloadSnapshot {
    /// Progress of the in-flight transfer.
    #[must_use]
    pub const fn progress(&self) -> u8 {
        self.phase.progress()
    }

    /// Nothing queued and nothing in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.downloading_id.is_none() && self.queue.is_empty()
    }

    /// Tracks waiting behind the in-flight one.
    #[must_use]
    pub fn pending(&self) -> Vec<&Track> {
        self.queue
            .iter()
            .filter(|t| self.downloading_id.as_deref() != Some(t.id.as_str()))
            .collect()
    }
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Something finished well.
    Success,
    /// Something failed.
    Error,
}

/// Short message meant for an alert or toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Alert title.
    pub title: String,
    /// Alert body.
    pub message: String,
}

impl Notice {
    fn success(title: &str, message: &str) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.to_string(),
            message: message.to_string(),
        }
    }

    fn error(title: &str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

/// Events emitted by the download queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// A track was appended to the queue.
    Enqueued {
        /// Track id.
        track_id: TrackId,
    },
    /// A queued track was removed before it started.
    Cancelled {
        /// Track id.
        track_id: TrackId,
    },
    /// The worker picked up a track.
    Started {
        /// Track id.
        track_id: TrackId,
    },
    /// Transfer progress changed.
    Progress {
        /// Track id.
        track_id: TrackId,
        /// Integer percent.
        percent: u8,
    },
    /// The track is in the catalog.
    Completed {
        /// Track id.
        track_id: TrackId,
        /// Stored file reference.
        file_uri: String,
    },
    /// The pipeline failed; the track was dropped from the queue.
    Failed {
        /// Track id.
        track_id: TrackId,
        /// User-facing message.
        message: String,
    },
    /// An interrupted download turned out to be complete.
    Recovered {
        /// Track id.
        track_id: TrackId,
    },
    /// Something the user should be told about.
    Notice(Notice),
}

/// Replace characters that are unsafe in file names and cap the length.
///
/// The cap counts characters, not bytes.
#[must_use]
pub fn sanitize_file_stem(title: &str, max_len: usize) -> String {
    let decoded = html_decode(title);
    let replaced: String = decoded
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if UNSAFE_FILE_CHARS.contains(&c) { '-' } else { c })
        .take(max_len)
        .collect();
    replaced.trim().trim_matches('.').to_string()
}

#[derive(Debug, Default)]
struct QueueState {
    downloading_id: Option<TrackId>,
    queue: VecDeque<Track>,
    phase: WorkerPhase,
}

impl QueueState {
    fn holds(&self, track_id: &str) -> bool {
        self.downloading_id.as_deref() == Some(track_id)
            || self.queue.iter().any(|t| t.id == track_id)
    }

    /// Hand the head of the queue to the worker.
    fn begin_next(&mut self) -> Option<Track> {
        if self.phase != WorkerPhase::Idle {
            return None;
        }
        let track = self.queue.front()?.clone();
        self.downloading_id = Some(track.id.clone());
        self.phase = WorkerPhase::Fetching;
        Some(track)
    }

    /// Drop the in-flight track and return to idle.
    fn finish(&mut self, track_id: &str) {
        self.queue.retain(|t| t.id != track_id);
        self.downloading_id = None;
        self.phase = WorkerPhase::Idle;
    }

    fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            downloading_id: self.downloading_id.clone(),
            queue: self.queue.iter().cloned().collect(),
            phase: self.phase,
        }
    }
}

struct Inner<S: AudioSource> {
    source: S,
    store: Arc<dyn KeyValueStore>,
    catalog: Arc<Catalog>,
    config: DownloadConfig,
    state: RwLock<QueueState>,
    /// Single worker slot; holding this lock is required to spawn or retire the worker.
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    snapshot_tx: watch::Sender<DownloadSnapshot>,
    event_tx: mpsc::UnboundedSender<DownloadEvent>,
    event_rx: Mutex<mpsc::UnboundedReceiver<DownloadEvent>>,
}

/// Persistent single-worker download queue.
pub struct DownloadQueue<S: AudioSource> {
    inner: Arc<Inner<S>>,
}

impl<S: AudioSource> Clone for DownloadQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AudioSource> DownloadQueue<S> {
    /// Create the engine and restore the persisted queue.
    ///
    /// Nothing is downloaded until [`DownloadQueue::start`] is called.
    pub fn open(
        source: S,
        store: Arc<dyn KeyValueStore>,
        catalog: Arc<Catalog>,
        config: DownloadConfig,
    ) -> Self {
        let downloading_id = match store.get(DOWNLOADING_ID_KEY) {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                warn!("Failed to restore in-flight download id: {}", e);
                None
            }
        };
        let queue: VecDeque<Track> = load_json(store.as_ref(), DOWNLOAD_QUEUE_KEY).unwrap_or_default();

        if let Some(id) = &downloading_id {
            info!("Restored interrupted download {}", id);
        }
        debug!("Restored {} queued downloads", queue.len());

        let state = QueueState {
            downloading_id,
            queue,
            phase: WorkerPhase::Idle,
        };
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                source,
                store,
                catalog,
                config,
                state: RwLock::new(state),
                worker: Mutex::new(None),
                started: AtomicBool::new(false),
                snapshot_tx,
                event_tx,
                event_rx: Mutex::new(event_rx),
            }),
        }
    }

    /// Reconcile restored state with the catalog, then start processing.
    /// Calling it again does nothing.
    ///
    /// The catalog is fully loaded before the queue opens, so one pass settles
    /// any interrupted download. Until it has run, `enqueue` only persists.
    pub async fn start(&self) {
        if self.inner.started.load(Ordering::SeqCst) {
            return;
        }
        self.inner.reconcile(&self.inner.catalog.snapshot()).await;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        Inner::process_next(&self.inner).await;
    }

    /// Queue a track. Returns `false` if it is already queued, in flight, or
    /// in the catalog.
    pub async fn enqueue(&self, track: Track) -> bool {
        let added = self.inner.push(track).await;
        if added {
            Inner::process_next(&self.inner).await;
        }
        added
    }

    /// Queue several tracks in order. Returns how many were added.
    pub async fn enqueue_many(&self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let mut added = 0;
        for track in tracks {
            if self.inner.push(track).await {
                added += 1;
            }
        }
        if added > 0 {
            Inner::process_next(&self.inner).await;
        }
        added
    }

    /// Remove a track that has not started yet.
    ///
    /// The in-flight track cannot be cancelled; it runs to completion or failure.
    pub async fn cancel(&self, track_id: &str) -> bool {
        let mut state = self.inner.state.write().await;
        if state.downloading_id.as_deref() == Some(track_id) {
            debug!("Refusing to cancel in-flight download {}", track_id);
            return false;
        }
        let before = state.queue.len();
        state.queue.retain(|t| t.id != track_id);
        if state.queue.len() == before {
            return false;
        }
        info!("Cancelled queued download {}", track_id);
        self.inner.commit(&state);
        drop(state);
        self.inner.emit(DownloadEvent::Cancelled {
            track_id: track_id.to_string(),
        });
        true
    }

    /// Current state.
    pub async fn snapshot(&self) -> DownloadSnapshot {
        self.inner.state.read().await.snapshot()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DownloadSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Try to receive an event without waiting.
    pub async fn try_recv_event(&self) -> Option<DownloadEvent> {
        self.inner.event_rx.lock().await.try_recv().ok()
    }

    /// Wait for the next event.
    pub async fn recv_event(&self) -> Option<DownloadEvent> {
        self.inner.event_rx.lock().await.recv().await
    }

    /// Wait until nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(DownloadSnapshot::is_idle).await;
    }
}

impl<S: AudioSource> std::fmt::Debug for DownloadQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadQueue")
            .field("snapshot", &*self.inner.snapshot_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<S: AudioSource> Inner<S> {
    fn emit(&self, event: DownloadEvent) {
        let _ = self.event_tx.send(event);
    }

    fn notify(&self, notice: Notice) {
        self.emit(DownloadEvent::Notice(notice));
    }

    /// Persist and publish. Persistence is best effort.
    fn commit(&self, state: &QueueState) {
        let id_result = match &state.downloading_id {
            Some(id) => self.store.set(DOWNLOADING_ID_KEY, id),
            None => self.store.remove(DOWNLOADING_ID_KEY),
        };
        if let Err(e) = id_result {
            warn!("Failed to persist in-flight download id: {}", e);
        }
        if let Err(e) = save_json(self.store.as_ref(), DOWNLOAD_QUEUE_KEY, &state.queue) {
            warn!("Failed to persist download queue: {}", e);
        }
        self.snapshot_tx.send_replace(state.snapshot());
    }

    /// Publish without persisting, for transient progress updates.
    fn publish(&self, state: &QueueState) {
        self.snapshot_tx.send_replace(state.snapshot());
    }

    async fn push(&self, track: Track) -> bool {
        if self.catalog.contains(&track.id) {
            debug!("Track {} is already downloaded", track.id);
            return false;
        }
        let mut state = self.state.write().await;
        if state.holds(&track.id) {
            debug!("Track {} is already queued", track.id);
            return false;
        }
        info!("Queued download {} ({})", track.title, track.id);
        let track_id = track.id.clone();
        state.queue.push_back(track);
        self.commit(&state);
        drop(state);
        self.emit(DownloadEvent::Enqueued { track_id });
        true
    }

    /// Settle a download id restored from storage that no pipeline owns.
    async fn reconcile(&self, catalog: &CatalogSnapshot) {
        let mut state = self.state.write().await;
        if state.phase != WorkerPhase::Idle {
            return;
        }
        let Some(id) = state.downloading_id.clone() else {
            return;
        };

        if catalog.contains(&id) {
            info!("Interrupted download {} is already in the library", id);
            state.finish(&id);
            self.commit(&state);
            drop(state);
            self.emit(DownloadEvent::Recovered { track_id: id });
            self.notify(Notice::success("Download completed", "Song downloaded successfully"));
        } else {
            warn!("Retrying interrupted download {}", id);
            state.downloading_id = None;
            self.commit(&state);
        }
    }

    /// Spawn the worker unless it is already running.
    async fn process_next(this: &Arc<Self>) {
        if !this.started.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = this.worker.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if this.state.read().await.queue.is_empty() {
            *slot = None;
            return;
        }
        let worker = Arc::clone(this);
        *slot = Some(tokio::spawn(worker.run()));
    }

    async fn run(self: Arc<Self>) {
        loop {
            let track = {
                let mut slot = self.worker.lock().await;
                let mut state = self.state.write().await;
                match state.begin_next() {
                    Some(track) => {
                        self.commit(&state);
                        track
                    }
                    None => {
                        // Retire while holding the slot so a concurrent
                        // enqueue either sees us running or spawns anew.
                        *slot = None;
                        return;
                    }
                }
            };

            info!("Starting download {} ({})", track.title, track.id);
            self.emit(DownloadEvent::Started {
                track_id: track.id.clone(),
            });

            let outcome = self.download(&track).await;

            {
                let mut state = self.state.write().await;
                state.finish(&track.id);
                self.commit(&state);
            }

            match outcome {
                Ok(file_uri) => {
                    info!("Downloaded {} to {}", track.id, file_uri);
                    self.emit(DownloadEvent::Completed {
                        track_id: track.id.clone(),
                        file_uri,
                    });
                    self.notify(Notice::success("Download finished", "Song downloaded successfully"));
                }
                Err(e) => {
                    error!("Download of {} failed: {}", track.id, e);
                    let message = e.user_message();
                    self.emit(DownloadEvent::Failed {
                        track_id: track.id.clone(),
                        message: message.clone(),
                    });
                    self.notify(Notice::error("Download failed", message));
                }
            }
        }
    }

    /// Fetch, transfer and catalog one track. Returns the stored file reference.
    async fn download(&self, track: &Track) -> Result<String> {
        let url = self
            .source
            .resolve_audio_url(track)
            .await
            .map_err(|e| as_extraction_failure(&track.id, e))?;
        debug!("Resolved audio URL for {}", track.id);

        self.set_progress(&track.id, 0).await;

        let blobs = Arc::clone(self.catalog.blobs());
        let name = self.file_name_for(track);
        let transferred = self.transfer(track, &url, &name).await;

        let added = match transferred {
            Ok(()) => {
                let song = LibrarySong::from_track(track, blobs.uri_for(&name));
                self.catalog.add_song(song)
            }
            Err(e) => Err(e),
        };

        match added {
            Ok(inserted) => {
                if !inserted {
                    debug!("Catalog already had {}", track.id);
                }
                Ok(blobs.uri_for(&name))
            }
            Err(e) => {
                if self.config.cleanup_partial_files {
                    match blobs.remove(&name) {
                        Ok(true) => debug!("Removed partial file {}", name),
                        Ok(false) => {}
                        Err(cleanup) => warn!("Failed to remove partial file {}: {}", name, cleanup),
                    }
                }
                Err(e)
            }
        }
    }

    async fn transfer(&self, track: &Track, url: &str, name: &str) -> Result<()> {
        let fail = |e: Error| as_transfer_failure(&track.id, e);

        let mut stream = self.source.open(url).await.map_err(fail)?;
        let total = stream.content_length().filter(|len| *len > 0);
        let mut writer = self.catalog.blobs().create(name).map_err(fail)?;

        let mut written: u64 = 0;
        let mut last_percent = 0u8;
        while let Some(chunk) = stream.chunk().await.map_err(fail)? {
            writer.write_all(&chunk).map_err(|e| fail(e.into()))?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                let percent = percent_of(written, total);
                if percent != last_percent {
                    last_percent = percent;
                    self.set_progress(&track.id, percent).await;
                }
            }
        }
        writer.flush().map_err(|e| fail(e.into()))?;
        debug!("Transferred {} bytes for {}", written, track.id);
        Ok(())
    }

    async fn set_progress(&self, track_id: &str, percent: u8) {
        {
            let mut state = self.state.write().await;
            state.phase = WorkerPhase::Downloading { progress: percent };
            self.publish(&state);
        }
        self.emit(DownloadEvent::Progress {
            track_id: track_id.to_string(),
            percent,
        });
    }

    /// Blob name for a track; disambiguated when another song owns the name.
    fn file_name_for(&self, track: &Track) -> String {
        let ext = &self.config.audio_extension;
        let stem = sanitize_file_stem(&track.title, self.config.max_file_stem_len);
        let stem = if stem.is_empty() { track.id.clone() } else { stem };
        let name = format!("{stem}.{ext}");

        let blobs = self.catalog.blobs();
        let taken = self.catalog.songs().iter().any(|song| {
            song.id != track.id && blobs.name_from_uri(&song.file_uri).as_deref() == Some(name.as_str())
        });
        if taken {
            format!("{stem}-{}.{ext}", track.id)
        } else {
            name
        }
    }
}

fn percent_of(written: u64, total: u64) -> u8 {
    ((written as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

fn as_extraction_failure(track_id: &str, e: Error) -> Error {
    match e {
        Error::Download(_) => e,
        other => Error::Download(DownloadError::ExtractionFailed {
            track_id: track_id.to_string(),
            reason: other.to_string(),
        }),
    }
}

fn as_transfer_failure(track_id: &str, e: Error) -> Error {
    let reason = match e {
        Error::Download(DownloadError::TransferFailed { reason, .. }) => reason,
        other => other.to_string(),
    };
    Error::Download(DownloadError::TransferFailed {
        track_id: track_id.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlobStore, MemoryStore};
    use std::time::Duration;

    /// Serves a fixed body for every track except the ones told to fail.
    #[derive(Default)]
    struct FakeSource {
        body: Vec<u8>,
        fail_extraction: Vec<String>,
        fail_transfer: Vec<String>,
    }

    struct FakeStream {
        chunks: VecDeque<Vec<u8>>,
        total: u64,
        fail: bool,
    }

    impl AudioStream for FakeStream {
        fn content_length(&self) -> Option<u64> {
            Some(self.total)
        }

        async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None if self.fail => Err(Error::Download(DownloadError::TransferFailed {
                    track_id: "stream".to_string(),
                    reason: "connection reset".to_string(),
                })),
                None => Ok(None),
            }
        }
    }

    impl AudioSource for FakeSource {
        type Stream = FakeStream;

        async fn resolve_audio_url(&self, track: &Track) -> Result<String> {
            if self.fail_extraction.contains(&track.id) {
                return Err(Error::Download(DownloadError::NoAudioUrl {
                    track_id: track.id.clone(),
                }));
            }
            Ok(format!("https://cdn.test/{}", track.id))
        }

        async fn open(&self, url: &str) -> Result<FakeStream> {
            let id = url.rsplit('/').next().unwrap_or_default();
            let fail = self.fail_transfer.iter().any(|f| f == id);
            let chunks = self.body.chunks(4).map(<[u8]>::to_vec).collect();
            Ok(FakeStream {
                chunks,
                total: self.body.len() as u64,
                fail,
            })
        }
    }

    fn open_on(store: &MemoryStore, source: FakeSource) -> (Arc<Catalog>, DownloadQueue<FakeSource>) {
        let catalog = Arc::new(Catalog::load(Arc::new(store.clone())).expect("catalog"));
        let queue = DownloadQueue::open(
            source,
            Arc::new(store.clone()),
            Arc::clone(&catalog),
            DownloadConfig::default(),
        );
        (catalog, queue)
    }

    fn setup(source: FakeSource) -> (MemoryStore, Arc<Catalog>, DownloadQueue<FakeSource>) {
        let store = MemoryStore::new();
        let (catalog, queue) = open_on(&store, source);
        (store, catalog, queue)
    }

    async fn drain_events(queue: &DownloadQueue<FakeSource>) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Some(event) = queue.try_recv_event().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("AC/DC: Back <In> Black?", 50), "AC-DC- Back -In- Black-");
        assert_eq!(sanitize_file_stem("Tom &amp; Jerry", 50), "Tom & Jerry");
        assert_eq!(sanitize_file_stem("100% \"Pure\" | Live", 50), "100- -Pure- - Live");
    }

    #[test]
    fn test_sanitize_file_stem_caps_characters() {
        let title = "é".repeat(80);
        let stem = sanitize_file_stem(&title, 50);
        assert_eq!(stem.chars().count(), 50);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 67);
        assert_eq!(percent_of(12, 10), 100);
    }

    #[test]
    fn test_worker_phase_serialization() {
        let json = serde_json::to_value(WorkerPhase::Downloading { progress: 42 }).expect("json");
        assert_eq!(json["phase"], "downloading");
        assert_eq!(json["progress"], 42);
    }

    #[tokio::test]
    async fn test_enqueue_before_start_only_persists() {
        let (store, _catalog, queue) = setup(FakeSource::default());

        assert!(queue.enqueue(Track::new("a", "A")).await);
        assert!(!queue.enqueue(Track::new("a", "A")).await);

        let persisted = store.get(DOWNLOAD_QUEUE_KEY).expect("get").expect("queue");
        assert!(persisted.contains("\"a\""));
        assert_eq!(queue.snapshot().await.queue.len(), 1);
        assert_eq!(queue.snapshot().await.downloading_id, None);
    }

    #[tokio::test]
    async fn test_download_completes_and_catalogs() {
        let source = FakeSource {
            body: b"0123456789".to_vec(),
            ..Default::default()
        };
        let (store, catalog, queue) = setup(source);
        queue.start().await;

        queue.enqueue(Track::new("a", "Rock &amp; Roll")).await;
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .expect("idle");

        let song = catalog.get_song("a").expect("song");
        assert_eq!(song.title, "Rock & Roll");
        assert_eq!(store.read("Rock & Roll.mp3").expect("read"), Some(b"0123456789".to_vec()));
        assert!(!store.contains(DOWNLOADING_ID_KEY));

        let events = drain_events(&queue).await;
        assert!(events.contains(&DownloadEvent::Progress {
            track_id: "a".to_string(),
            percent: 100
        }));
        assert!(events.iter().any(|e| matches!(e, DownloadEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn test_transfer_failure_cleans_partial_file() {
        let source = FakeSource {
            body: b"partial-bytes".to_vec(),
            fail_transfer: vec!["a".to_string()],
            ..Default::default()
        };
        let (store, catalog, queue) = setup(source);
        queue.start().await;

        queue.enqueue(Track::new("a", "Broken")).await;
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .expect("idle");

        assert!(!catalog.contains("a"));
        assert!(!store.exists("Broken.mp3"));
        let events = drain_events(&queue).await;
        assert!(events.contains(&DownloadEvent::Failed {
            track_id: "a".to_string(),
            message: "Network error occurred".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_cancel_refuses_in_flight_item() {
        let store = MemoryStore::new();
        store.set(DOWNLOADING_ID_KEY, "a").expect("set");
        save_json(&store, DOWNLOAD_QUEUE_KEY, &vec![Track::new("a", "A"), Track::new("b", "B")])
            .expect("save");
        let (_catalog, queue) = open_on(&store, FakeSource::default());

        assert_eq!(queue.snapshot().await.downloading_id.as_deref(), Some("a"));
        assert!(!queue.cancel("a").await);
        assert!(queue.cancel("b").await);
        assert!(!queue.cancel("b").await);
        assert_eq!(queue.snapshot().await.queue.len(), 1);
        assert_eq!(
            drain_events(&queue).await,
            vec![DownloadEvent::Cancelled {
                track_id: "b".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_file_name_collision_gets_id_suffix() {
        let source = FakeSource {
            body: b"x".to_vec(),
            ..Default::default()
        };
        let (store, catalog, queue) = setup(source);
        queue.start().await;

        queue.enqueue(Track::new("a", "Same Title")).await;
        queue.enqueue(Track::new("b", "Same Title")).await;
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .expect("idle");

        assert_eq!(catalog.songs().len(), 2);
        assert!(store.exists("Same Title.mp3"));
        assert!(store.exists("Same Title-b.mp3"));
    }
}
