//! Persisted state store.
//!
//! Durable, crash-safe JSON snapshots. Writes go through a temp file in the
//! destination directory followed by an atomic rename, so an interrupted
//! save never leaves partial JSON at the destination path. Concurrent
//! access by runners is serialized externally via a shared mutex held
//! across the whole load-modify-save window.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use driftwatch_core::snapshot::{State, CURRENT_STATE_VERSION};
use tracing::warn;

/// State persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding failure.
    #[error("encode state: {0}")]
    Encode(#[from] serde_json::Error),

    /// The blocking save task was aborted.
    #[error("state save task: {0}")]
    Background(#[from] tokio::task::JoinError),
}

/// Interface for persisting state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the current state. Missing or unreadable content degrades to
    /// an empty state rather than an error.
    async fn load(&self) -> Result<State, StateError>;

    /// Writes the state atomically.
    async fn save(&self, state: &State) -> Result<(), StateError>;
}

/// JSON-backed state store.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a store persisting to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The destination path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<State, StateError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "state file missing, starting fresh");
                return Ok(State::empty());
            }
            Err(err) => return Err(err.into()),
        };

        let mut state: State = match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "state file corrupt, starting fresh"
                );
                return Ok(State::empty());
            }
        };

        // Version 0 is the pre-versioned format; anything newer than the
        // current schema is unknown and discarded.
        if state.version == 0 {
            state.version = CURRENT_STATE_VERSION;
        } else if state.version > CURRENT_STATE_VERSION {
            warn!(
                path = %self.path.display(),
                version = state.version,
                supported = CURRENT_STATE_VERSION,
                "state file version is newer than supported, starting fresh"
            );
            return Ok(State::empty());
        }

        Ok(state)
    }

    async fn save(&self, state: &State) -> Result<(), StateError> {
        let path = self.path.clone();
        let mut state = state.clone();
        state.version = CURRENT_STATE_VERSION;
        let payload = serde_json::to_vec(&state)?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &payload)).await??;
        Ok(())
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StateError> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    // NamedTempFile is created 0600 and lives in the destination directory
    // so the final rename cannot cross filesystems.
    let mut temp = tempfile::Builder::new()
        .prefix(".state-")
        .suffix(".json")
        .tempfile_in(dir)?;
    temp.write_all(payload)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;

    // Surviving a crash between rename and directory sync only costs the
    // last snapshot, so a failure here is not propagated.
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }

    Ok(())
}
