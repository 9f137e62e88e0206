//! Match settings persisted as a JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use raceway_protocol::MatchSettings;
use raceway_room::{RoomError, SettingsStore};

/// Keeps a room's [`MatchSettings`] in a pretty-printed JSON file.
///
/// A missing file loads as "nothing saved yet". Saves go through a
/// sibling temp file and a rename, so a crash never leaves half a file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn store_error(e: impl std::error::Error + Send + Sync + 'static) -> RoomError {
    RoomError::Store(Box::new(e))
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Option<MatchSettings>, RoomError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(e)),
        };
        serde_json::from_str(&text).map(Some).map_err(store_error)
    }

    fn save(&self, settings: &MatchSettings) -> Result<(), RoomError> {
        let json = serde_json::to_string_pretty(settings).map_err(store_error)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(store_error)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(store_error)?;
        std::fs::rename(&tmp, &self.path).map_err(store_error)?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}
