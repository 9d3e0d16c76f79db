//! Library catalog: downloaded songs and user playlists.
//!
//! The catalog persists as two pretty-printed JSON blobs in the blob store,
//! `songs-data.json` and `playlists-data.json`. Every successful mutation is
//! written through before the in-memory copy changes, then published on a
//! `watch` channel so the download engine and UI can react.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{LibrarySong, Playlist};
use crate::store::BlobStore;

/// Blob holding every library song.
pub const SONGS_BLOB: &str = "songs-data.json";

/// Blob holding every playlist.
pub const PLAYLISTS_BLOB: &str = "playlists-data.json";

/// Point-in-time view of the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Songs in insertion order.
    pub songs: Vec<LibrarySong>,
    /// Playlists in creation order.
    pub playlists: Vec<Playlist>,
}

impl CatalogSnapshot {
    /// Whether a song with this id has been downloaded.
    #[must_use]
    pub fn contains(&self, song_id: &str) -> bool {
        self.songs.iter().any(|s| s.id == song_id)
    }

    /// Look up a song by id.
    #[must_use]
    pub fn song(&self, song_id: &str) -> Option<&LibrarySong> {
        self.songs.iter().find(|s| s.id == song_id)
    }

    /// Look up a playlist by id.
    #[must_use]
    pub fn playlist(&self, playlist_id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == playlist_id)
    }

    /// Songs of a playlist in playlist order, skipping ids that no longer resolve.
    #[must_use]
    pub fn resolve(&self, playlist: &Playlist) -> Vec<LibrarySong> {
        playlist
            .songs
            .iter()
            .filter_map(|id| self.song(id).cloned())
            .collect()
    }

    fn playlist_mut(&mut self, playlist_id: &str) -> Result<&mut Playlist> {
        self.playlists
            .iter_mut()
            .find(|p| p.id == playlist_id)
            .ok_or_else(|| Error::PlaylistNotFound(playlist_id.to_string()))
    }

    fn song_mut(&mut self, song_id: &str) -> Result<&mut LibrarySong> {
        self.songs
            .iter_mut()
            .find(|s| s.id == song_id)
            .ok_or_else(|| Error::SongNotFound(song_id.to_string()))
    }
}

/// Which catalog blobs a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touched {
    Nothing,
    Songs,
    Playlists,
    Both,
}

impl Touched {
    const fn songs(self) -> bool {
        matches!(self, Self::Songs | Self::Both)
    }

    const fn playlists(self) -> bool {
        matches!(self, Self::Playlists | Self::Both)
    }
}

/// Durable song and playlist collection.
pub struct Catalog {
    blobs: Arc<dyn BlobStore>,
    state: Mutex<CatalogSnapshot>,
    tx: watch::Sender<CatalogSnapshot>,
}

impl Catalog {
    /// Load the catalog from the blob store. Missing blobs start empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a blob exists but cannot be read or parsed.
    pub fn load(blobs: Arc<dyn BlobStore>) -> Result<Self> {
        let snapshot = read_snapshot(blobs.as_ref())?;
        info!(
            "Loaded catalog: {} songs, {} playlists",
            snapshot.songs.len(),
            snapshot.playlists.len()
        );
        let (tx, _rx) = watch::channel(snapshot.clone());
        Ok(Self {
            blobs,
            state: Mutex::new(snapshot),
            tx,
        })
    }

    /// Blob store the catalog and audio files live in.
    #[must_use]
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Re-read both blobs and publish the result.
    pub fn refresh(&self) -> Result<()> {
        let snapshot = read_snapshot(self.blobs.as_ref())?;
        let mut state = self.lock();
        *state = snapshot;
        self.tx.send_replace(state.clone());
        debug!("Catalog refreshed");
        Ok(())
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.lock().clone()
    }

    /// Watch catalog changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CatalogSnapshot> {
        self.tx.subscribe()
    }

    /// All songs.
    #[must_use]
    pub fn songs(&self) -> Vec<LibrarySong> {
        self.lock().songs.clone()
    }

    /// All playlists.
    #[must_use]
    pub fn playlists(&self) -> Vec<Playlist> {
        self.lock().playlists.clone()
    }

    /// Look up a song by id.
    #[must_use]
    pub fn get_song(&self, song_id: &str) -> Option<LibrarySong> {
        self.lock().song(song_id).cloned()
    }

    /// Whether a song with this id has been downloaded.
    #[must_use]
    pub fn contains(&self, song_id: &str) -> bool {
        self.lock().contains(song_id)
    }

    /// Favorited songs.
    #[must_use]
    pub fn favorites(&self) -> Vec<LibrarySong> {
        self.lock()
            .songs
            .iter()
            .filter(|s| s.favorite)
            .cloned()
            .collect()
    }

    /// Append a song. Returns `false` when the id is already present.
    pub fn add_song(&self, song: LibrarySong) -> Result<bool> {
        self.mutate(|catalog| {
            if catalog.contains(&song.id) {
                debug!("Song {} already in catalog", song.id);
                return Ok((false, Touched::Nothing));
            }
            info!("Adding song {} to catalog", song.id);
            catalog.songs.push(song);
            Ok((true, Touched::Songs))
        })
    }

    /// Delete a song, its audio file and every playlist reference to it.
    ///
    /// Deleting an unknown song or one whose file is already gone is not an
    /// error; playlists are scrubbed either way. Returns whether a catalog
    /// entry was removed.
    pub fn delete_song(&self, song_id: &str) -> Result<bool> {
        self.mutate(|catalog| {
            let mut touched = Touched::Nothing;
            let mut removed = false;

            if let Some(pos) = catalog.songs.iter().position(|s| s.id == song_id) {
                let song = &catalog.songs[pos];
                match self.blobs.name_from_uri(&song.file_uri) {
                    Some(name) => {
                        if !self.blobs.remove(&name)? {
                            debug!("Audio file {} was already gone", name);
                        }
                    }
                    None => warn!("Cannot resolve file {} of song {}", song.file_uri, song_id),
                }
                catalog.songs.remove(pos);
                removed = true;
                touched = Touched::Songs;
            }

            let mut scrubbed = false;
            for playlist in &mut catalog.playlists {
                let before = playlist.songs.len();
                playlist.songs.retain(|id| id != song_id);
                scrubbed |= playlist.songs.len() != before;
            }
            if scrubbed {
                touched = if removed { Touched::Both } else { Touched::Playlists };
            }

            info!("Deleted song {} (catalog entry removed: {})", song_id, removed);
            Ok((removed, touched))
        })
    }

    /// Set the favorite flag of a song.
    pub fn set_favorite(&self, song_id: &str, favorite: bool) -> Result<()> {
        self.mutate(|catalog| {
            let song = catalog.song_mut(song_id)?;
            if song.favorite == favorite {
                return Ok(((), Touched::Nothing));
            }
            song.favorite = favorite;
            Ok(((), Touched::Songs))
        })
    }

    /// Flip the favorite flag of a song and return the new value.
    pub fn toggle_favorite(&self, song_id: &str) -> Result<bool> {
        self.mutate(|catalog| {
            let song = catalog.song_mut(song_id)?;
            song.favorite = !song.favorite;
            Ok((song.favorite, Touched::Songs))
        })
    }

    /// Create a playlist. Without a name it is called `Playlist #N`.
    pub fn create_playlist(&self, name: Option<&str>) -> Result<Playlist> {
        self.mutate(|catalog| {
            let name = match name.map(str::trim) {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => format!("Playlist #{}", catalog.playlists.len() + 1),
            };
            let playlist = Playlist {
                id: Uuid::new_v4().to_string(),
                name,
                image: String::new(),
                songs: Vec::new(),
            };
            info!("Created playlist {} ({})", playlist.name, playlist.id);
            catalog.playlists.push(playlist.clone());
            Ok((playlist, Touched::Playlists))
        })
    }

    /// Rename a playlist.
    pub fn rename_playlist(&self, playlist_id: &str, name: &str) -> Result<()> {
        self.mutate(|catalog| {
            catalog.playlist_mut(playlist_id)?.name = name.trim().to_string();
            Ok(((), Touched::Playlists))
        })
    }

    /// Set or clear (empty string) a playlist cover image.
    pub fn set_playlist_image(&self, playlist_id: &str, image: &str) -> Result<()> {
        self.mutate(|catalog| {
            catalog.playlist_mut(playlist_id)?.image = image.to_string();
            Ok(((), Touched::Playlists))
        })
    }

    /// Delete a playlist. Returns `false` when it did not exist.
    pub fn delete_playlist(&self, playlist_id: &str) -> Result<bool> {
        self.mutate(|catalog| {
            let before = catalog.playlists.len();
            catalog.playlists.retain(|p| p.id != playlist_id);
            if catalog.playlists.len() == before {
                return Ok((false, Touched::Nothing));
            }
            info!("Deleted playlist {}", playlist_id);
            Ok((true, Touched::Playlists))
        })
    }

    /// Append a song to a playlist.
    ///
    /// Returns `false` when the playlist does not exist or already holds the song.
    pub fn add_song_to_playlist(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        self.mutate(|catalog| {
            let Ok(playlist) = catalog.playlist_mut(playlist_id) else {
                warn!("Playlist {} not found", playlist_id);
                return Ok((false, Touched::Nothing));
            };
            if playlist.contains(song_id) {
                return Ok((false, Touched::Nothing));
            }
            playlist.songs.push(song_id.to_string());
            Ok((true, Touched::Playlists))
        })
    }

    /// Remove a song from a playlist. Returns whether it was there.
    pub fn remove_song_from_playlist(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        self.mutate(|catalog| {
            let playlist = catalog.playlist_mut(playlist_id)?;
            let before = playlist.songs.len();
            playlist.songs.retain(|id| id != song_id);
            if playlist.songs.len() == before {
                return Ok((false, Touched::Nothing));
            }
            Ok((true, Touched::Playlists))
        })
    }

    /// Resolved songs of a playlist; dangling ids are skipped.
    pub fn playlist_songs(&self, playlist_id: &str) -> Result<Vec<LibrarySong>> {
        let state = self.lock();
        let playlist = state
            .playlist(playlist_id)
            .ok_or_else(|| Error::PlaylistNotFound(playlist_id.to_string()))?;
        Ok(state.resolve(playlist))
    }

    fn lock(&self) -> MutexGuard<'_, CatalogSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a copy of the catalog, persist what it touched and only
    /// then swap the copy in and publish it.
    fn mutate<R>(&self, f: impl FnOnce(&mut CatalogSnapshot) -> Result<(R, Touched)>) -> Result<R> {
        let mut state = self.lock();
        let mut next = state.clone();
        let (result, touched) = f(&mut next)?;
        if touched == Touched::Nothing {
            return Ok(result);
        }
        if touched.songs() {
            write_json(self.blobs.as_ref(), SONGS_BLOB, &next.songs)?;
        }
        if touched.playlists() {
            write_json(self.blobs.as_ref(), PLAYLISTS_BLOB, &next.playlists)?;
        }
        *state = next;
        self.tx.send_replace(state.clone());
        Ok(result)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Catalog")
            .field("songs", &state.songs.len())
            .field("playlists", &state.playlists.len())
            .finish_non_exhaustive()
    }
}

fn read_snapshot(blobs: &dyn BlobStore) -> Result<CatalogSnapshot> {
    Ok(CatalogSnapshot {
        songs: read_json(blobs, SONGS_BLOB)?,
        playlists: read_json(blobs, PLAYLISTS_BLOB)?,
    })
}

fn read_json<T: DeserializeOwned + Default>(blobs: &dyn BlobStore, name: &str) -> Result<T> {
    match blobs.read(name)? {
        Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        _ => Ok(T::default()),
    }
}

fn write_json<T: Serialize + ?Sized>(blobs: &dyn BlobStore, name: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    blobs.write(name, &bytes)
}
