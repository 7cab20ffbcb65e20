//! Watermark store implementations

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{WatermarkError, WatermarkStore};
use crate::models::{Cursor, WatermarkState};

/// Watermark persisted as `{"lastCursor": "..."}` in a JSON file
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> Result<Cursor, WatermarkError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WatermarkError::NotFound(self.location()));
            }
            Err(e) => return Err(WatermarkError::Io(e.to_string())),
        };

        let state: WatermarkState =
            serde_json::from_str(&content).map_err(|e| WatermarkError::Corrupt {
                location: self.location(),
                reason: e.to_string(),
            })?;

        if state.last_cursor.as_str().trim().is_empty() {
            return Err(WatermarkError::Corrupt {
                location: self.location(),
                reason: "empty cursor".to_string(),
            });
        }

        Ok(state.last_cursor)
    }

    fn save(&self, cursor: &Cursor) -> Result<(), WatermarkError> {
        config::save_json_file(&self.path, &WatermarkState::new(cursor.clone()))
            .map_err(|e| WatermarkError::Io(format!("{:#}", e)))
    }
}

/// In-memory watermark, used by tests and dry runs
#[derive(Default)]
pub struct InMemoryWatermarkStore {
    cursor: Mutex<Option<Cursor>>,
}

impl InMemoryWatermarkStore {
    pub fn new(initial: Option<Cursor>) -> Self {
        Self {
            cursor: Mutex::new(initial),
        }
    }

    /// Current value without going through the trait
    pub fn current(&self) -> Option<Cursor> {
        self.cursor.lock().ok().and_then(|c| c.clone())
    }
}

impl WatermarkStore for InMemoryWatermarkStore {
    fn load(&self) -> Result<Cursor, WatermarkError> {
        let guard = self
            .cursor
            .lock()
            .map_err(|_| WatermarkError::Io("watermark lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| WatermarkError::NotFound("memory".to_string()))
    }

    fn save(&self, cursor: &Cursor) -> Result<(), WatermarkError> {
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| WatermarkError::Io("watermark lock poisoned".to_string()))?;
        *guard = Some(cursor.clone());
        Ok(())
    }
}
