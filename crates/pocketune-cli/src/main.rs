//! Pocketune - search YouTube, download audio and manage the song library
//! from the terminal.

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::{App, SettingsKey};
use tracing::{error, info};

/// Pocketune command line host.
#[derive(Debug, Parser)]
#[command(name = "pocketune", version, about)]
struct Cli {
    /// More console logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file to use instead of the default one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory to use for this run.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search YouTube for music.
    Search {
        /// Search terms.
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// List the tracks behind a video or playlist link.
    Link {
        /// YouTube video or playlist URL.
        url: String,
    },
    /// Queue downloads and run the queue until it is empty.
    ///
    /// Without arguments the persisted queue is resumed.
    Download {
        /// Links, search queries or (with --ids) video ids.
        items: Vec<String>,
        /// Treat every item as a bare video id.
        #[arg(long)]
        ids: bool,
    },
    /// Show the download queue.
    Queue,
    /// Remove a track from the download queue.
    Cancel {
        /// Video id.
        id: String,
    },
    /// List downloaded songs.
    Songs {
        /// Only favorites.
        #[arg(long)]
        favorites: bool,
    },
    /// Toggle the favorite flag of a song.
    Favorite {
        /// Song id.
        id: String,
    },
    /// Delete a song and its file.
    DeleteSong {
        /// Song id.
        id: String,
    },
    /// Manage playlists.
    Playlist {
        #[command(subcommand)]
        action: PlaylistCommand,
    },
    /// Show the saved playback session.
    Session,
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PlaylistCommand {
    /// List playlists.
    List,
    /// Create a playlist.
    Create {
        /// Name, `Playlist #N` when omitted.
        name: Option<String>,
    },
    /// Rename a playlist.
    Rename {
        /// Playlist id.
        id: String,
        /// New name.
        name: String,
    },
    /// Set the cover image, an empty value clears it.
    Image {
        /// Playlist id.
        id: String,
        /// Image URI.
        image: String,
    },
    /// Delete a playlist.
    Delete {
        /// Playlist id.
        id: String,
    },
    /// Add a song to a playlist.
    Add {
        /// Playlist id.
        id: String,
        /// Song id.
        song: String,
    },
    /// Remove a song from a playlist.
    Remove {
        /// Playlist id.
        id: String,
        /// Song id.
        song: String,
    },
    /// Show a playlist and its songs.
    Show {
        /// Playlist id.
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the configuration.
    Show,
    /// Save a service key.
    SetKey {
        /// Which key.
        #[arg(value_enum)]
        key: SettingsKey,
        /// Value, empty to clear.
        value: String,
    },
    /// Use another data directory from the next run on.
    SetDataDir {
        /// Absolute path, created when missing.
        path: PathBuf,
    },
    /// Restore the default configuration.
    Reset,
}

async fn run(app: &mut App, command: Command) -> pocketune_core::Result<bool> {
    match command {
        Command::Search { query } => app.search(&query.join(" ")).await,
        Command::Link { url } => app.link(&url).await,
        Command::Download { items, ids } => app.download(&items, ids).await,
        Command::Queue => app.queue(),
        Command::Cancel { id } => app.cancel(&id).await,
        Command::Songs { favorites } => app.songs(favorites),
        Command::Favorite { id } => app.favorite(&id),
        Command::DeleteSong { id } => app.delete_song(&id),
        Command::Playlist { action } => match action {
            PlaylistCommand::List => app.playlists(),
            PlaylistCommand::Create { name } => app.create_playlist(name.as_deref()),
            PlaylistCommand::Rename { id, name } => app.rename_playlist(&id, &name),
            PlaylistCommand::Image { id, image } => app.set_playlist_image(&id, &image),
            PlaylistCommand::Delete { id } => app.delete_playlist(&id),
            PlaylistCommand::Add { id, song } => app.add_to_playlist(&id, &song),
            PlaylistCommand::Remove { id, song } => app.remove_from_playlist(&id, &song),
            PlaylistCommand::Show { id } => app.show_playlist(&id),
        },
        Command::Session => app.session(),
        Command::Config { action } => match action {
            ConfigCommand::Show => app.show_config(),
            ConfigCommand::SetKey { key, value } => app.set_key(key, &value),
            ConfigCommand::SetDataDir { path } => app.set_data_dir(path),
            ConfigCommand::Reset => app.reset_config(),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_directory = cli
        .data_dir
        .as_ref()
        .map_or_else(logging::default_log_directory, |dir| dir.join("logs"));
    let log_config = logging::LoggingConfig::auto()
        .with_log_directory(log_directory)
        .with_verbosity(cli.verbose);
    let _log_guard = match logging::init(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: {e}");
            None
        }
    };

    info!("Starting Pocketune {}", env!("CARGO_PKG_VERSION"));

    let mut app = match App::open(cli.config, cli.data_dir) {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {}", e);
            eprintln!("error: {}", e.user_message());
            return ExitCode::FAILURE;
        }
    };

    match run(&mut app, cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_playlist_add() {
        let cli = Cli::try_parse_from(["pocketune", "playlist", "add", "p1", "s1"]).expect("parse");
        assert!(matches!(
            cli.command,
            Command::Playlist {
                action: PlaylistCommand::Add { ref id, ref song }
            } if id == "p1" && song == "s1"
        ));
    }

    #[test]
    fn test_parse_download_ids_with_global_flags() {
        let cli = Cli::try_parse_from([
            "pocketune", "download", "--ids", "abc", "def", "-vv", "--data-dir", "/tmp/pt",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/pt")));
        assert!(matches!(
            cli.command,
            Command::Download { ref items, ids: true } if items.len() == 2
        ));
    }

    #[test]
    fn test_parse_set_key() {
        let cli = Cli::try_parse_from(["pocketune", "config", "set-key", "youtube-api-key", "k"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigCommand::SetKey {
                    key: SettingsKey::YoutubeApiKey,
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_parse_set_data_dir() {
        let cli = Cli::try_parse_from(["pocketune", "config", "set-data-dir", "/srv/music"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigCommand::SetDataDir { ref path }
            } if path == &PathBuf::from("/srv/music")
        ));
    }

    #[test]
    fn test_search_requires_query() {
        assert!(Cli::try_parse_from(["pocketune", "search"]).is_err());
    }
}
