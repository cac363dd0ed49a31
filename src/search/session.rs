use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use crate::search::state::SearchState;

/// Session-scoped persistence for the search record.
///
/// One value, round-tripped across page views within a single run. Nothing
/// here survives a restart on purpose.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> std::io::Result<Option<SearchState>>;
    fn save(&self, state: &SearchState) -> std::io::Result<()>;
}

/// JSON file backed session store.
pub struct JsonFileSession {
    path: PathBuf,
}

impl JsonFileSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for JsonFileSession {
    fn load(&self) -> std::io::Result<Option<SearchState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let state = serde_json::from_reader(reader)?;
        Ok(Some(state))
    }

    fn save(&self, state: &SearchState) -> std::io::Result<()> {
        let file = File::create(&self.path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, state)?;
        Ok(())
    }
}

/// In-memory session store, shared across clones.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemorySession {
    slot: std::sync::Arc<std::sync::Mutex<Option<SearchState>>>,
}

#[cfg(test)]
impl SessionStore for MemorySession {
    fn load(&self) -> std::io::Result<Option<SearchState>> {
        Ok(self.slot.lock().unwrap().clone())
    }

    fn save(&self, state: &SearchState) -> std::io::Result<()> {
        *self.slot.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}
