//! Persistence hook for match settings.

use parking_lot::Mutex;
use raceway_protocol::MatchSettings;

use crate::RoomError;

/// Where a room loads its settings from at construction and saves them
/// after every change.
///
/// A failing store is logged by the room and otherwise ignored.
pub trait SettingsStore: Send + Sync + 'static {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<MatchSettings>, RoomError>;

    fn save(&self, settings: &MatchSettings) -> Result<(), RoomError>;
}

/// Keeps the last saved settings in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<MatchSettings>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new(initial: Option<MatchSettings>) -> Self {
        Self {
            saved: Mutex::new(initial),
            saves: Mutex::new(0),
        }
    }

    /// The most recently saved settings.
    pub fn saved(&self) -> Option<MatchSettings> {
        self.saved.lock().clone()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<MatchSettings>, RoomError> {
        Ok(self.saved())
    }

    fn save(&self, settings: &MatchSettings) -> Result<(), RoomError> {
        *self.saved.lock() = Some(settings.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

impl<S: SettingsStore> SettingsStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<MatchSettings>, RoomError> {
        (**self).load()
    }

    fn save(&self, settings: &MatchSettings) -> Result<(), RoomError> {
        (**self).save(settings)
    }
}
