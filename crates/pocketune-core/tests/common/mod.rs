//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pocketune_core::{
    AudioDevice, AudioSource, AudioStream, Catalog, DeviceError, DeviceResult, DownloadConfig,
    DownloadError, DownloadEvent, DownloadQueue, Error, LibrarySong, MemoryStore, Result, Track,
};

/// Extraction service whose answers are scripted per track id.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    body: Vec<u8>,
    no_audio: HashSet<String>,
    broken_transfer: HashSet<String>,
    resolved: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            ..Default::default()
        }
    }

    /// Resolving this track reports no audio URL.
    pub fn without_audio(mut self, track_id: &str) -> Self {
        self.no_audio.insert(track_id.to_string());
        self
    }

    /// The transfer of this track breaks after the first chunk.
    pub fn with_broken_transfer(mut self, track_id: &str) -> Self {
        self.broken_transfer.insert(track_id.to_string());
        self
    }

    /// Track ids in the order their URL was requested.
    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().expect("resolved").clone()
    }
}

pub struct ScriptedStream {
    chunks: VecDeque<Vec<u8>>,
    total: u64,
    broken: Option<String>,
}

impl AudioStream for ScriptedStream {
    fn content_length(&self) -> Option<u64> {
        Some(self.total)
    }

    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(track_id) = &self.broken
            && self.chunks.len() < 2
        {
            return Err(Error::Download(DownloadError::TransferFailed {
                track_id: track_id.clone(),
                reason: "connection reset".to_string(),
            }));
        }
        Ok(self.chunks.pop_front())
    }
}

impl AudioSource for ScriptedSource {
    type Stream = ScriptedStream;

    async fn resolve_audio_url(&self, track: &Track) -> Result<String> {
        self.resolved
            .lock()
            .expect("resolved")
            .push(track.id.clone());
        if self.no_audio.contains(&track.id) {
            return Err(Error::Download(DownloadError::NoAudioUrl {
                track_id: track.id.clone(),
            }));
        }
        Ok(format!("https://cdn.test/audio/{}", track.id))
    }

    async fn open(&self, url: &str) -> Result<ScriptedStream> {
        let track_id = url.rsplit('/').next().unwrap_or_default().to_string();
        Ok(ScriptedStream {
            chunks: self.body.chunks(3).map(<[u8]>::to_vec).collect(),
            total: self.body.len() as u64,
            broken: self.broken_transfer.contains(&track_id).then_some(track_id),
        })
    }
}

/// Open a catalog and a download queue over the same in-memory store.
pub fn open_queue(
    store: &MemoryStore,
    source: ScriptedSource,
) -> (Arc<Catalog>, DownloadQueue<ScriptedSource>) {
    let catalog = Arc::new(Catalog::load(Arc::new(store.clone())).expect("catalog"));
    let queue = DownloadQueue::open(
        source,
        Arc::new(store.clone()),
        Arc::clone(&catalog),
        DownloadConfig::default(),
    );
    (catalog, queue)
}

pub async fn settle(queue: &DownloadQueue<ScriptedSource>) {
    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
        .await
        .expect("download queue did not drain");
}

pub async fn drain_events(queue: &DownloadQueue<ScriptedSource>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Some(event) = queue.try_recv_event().await {
        events.push(event);
    }
    events
}

/// Command seen by [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Load(String),
    Play,
    Pause,
    Seek(f64),
    Unload,
}

/// Audio device that records every command it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
    playing: bool,
    fail_loads: Arc<Mutex<HashSet<String>>>,
    fail_play: Arc<Mutex<bool>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("calls").clear();
    }

    /// Loading this file reference fails from now on.
    pub fn fail_load(&self, uri: &str) {
        self.fail_loads.lock().expect("fail_loads").insert(uri.to_string());
    }

    /// Every `play` fails from now on.
    pub fn fail_play(&self) {
        *self.fail_play.lock().expect("fail_play") = true;
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().expect("calls").push(call);
    }
}

impl AudioDevice for RecordingDevice {
    fn load(&mut self, uri: &str) -> DeviceResult<()> {
        self.record(DeviceCall::Load(uri.to_string()));
        if self.fail_loads.lock().expect("fail_loads").contains(uri) {
            return Err(DeviceError::LoadFailed {
                uri: uri.to_string(),
                reason: "unsupported format".to_string(),
            });
        }
        self.playing = false;
        Ok(())
    }

    fn play(&mut self) -> DeviceResult<()> {
        self.record(DeviceCall::Play);
        if *self.fail_play.lock().expect("fail_play") {
            return Err(DeviceError::PlayFailed("output busy".to_string()));
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> DeviceResult<()> {
        self.record(DeviceCall::Pause);
        self.playing = false;
        Ok(())
    }

    fn seek(&mut self, position: f64) -> DeviceResult<()> {
        self.record(DeviceCall::Seek(position));
        Ok(())
    }

    fn unload(&mut self) -> DeviceResult<()> {
        self.record(DeviceCall::Unload);
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

pub fn song(id: &str) -> LibrarySong {
    LibrarySong::from_track(&Track::new(id, format!("Song {id}")), format!("memory://{id}.mp3"))
}
