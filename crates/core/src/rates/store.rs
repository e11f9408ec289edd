use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::info;

use crate::errors::StoreError;
use crate::rates::schema::RateBook;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Where the previous document was copied, if there was one.
    pub backup: Option<String>,
    pub bytes_written: usize,
}

/// The single persisted copy of the rate store.
///
/// Saves replace the whole document. Content is decoded before anything is written, so an
/// invalid save leaves both the document and its backup untouched.
pub trait BackingStore: Send + Sync {
    fn read_document(&self) -> Result<String, StoreError>;

    fn save_document(&self, content: &str) -> Result<SaveOutcome, StoreError>;

    fn load(&self) -> Result<RateBook, StoreError> {
        RateBook::from_json(&self.read_document()?)
    }

    fn describe(&self) -> String;
}

#[derive(Clone, Debug)]
pub struct FileBackingStore {
    path: PathBuf,
    backup_suffix: String,
}

impl FileBackingStore {
    pub fn new(path: impl Into<PathBuf>, backup_suffix: impl Into<String>) -> Self {
        Self { path: path.into(), backup_suffix: backup_suffix.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut raw = self.path.clone().into_os_string();
        raw.push(&self.backup_suffix);
        PathBuf::from(raw)
    }
}

impl BackingStore for FileBackingStore {
    fn read_document(&self) -> Result<String, StoreError> {
        fs::read_to_string(&self.path)
            .map_err(|source| StoreError::Read { path: self.path.clone(), source })
    }

    fn save_document(&self, content: &str) -> Result<SaveOutcome, StoreError> {
        RateBook::from_json(content)?;

        let backup = if self.path.exists() {
            let backup_path = self.backup_path();
            fs::copy(&self.path, &backup_path)
                .map_err(|source| StoreError::Backup { path: backup_path.clone(), source })?;
            info!(
                event_name = "store.save.backup_written",
                backup = %backup_path.display(),
                "previous rate store copied to backup"
            );
            Some(backup_path.display().to_string())
        } else {
            None
        };

        fs::write(&self.path, content)
            .map_err(|source| StoreError::Write { path: self.path.clone(), source })?;
        info!(
            event_name = "store.save.written",
            path = %self.path.display(),
            bytes = content.len(),
            "rate store written"
        );

        Ok(SaveOutcome { backup, bytes_written: content.len() })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the document and its backups in memory.
#[derive(Debug, Default)]
pub struct InMemoryBackingStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    document: Option<String>,
    backups: Vec<String>,
}

impl InMemoryBackingStore {
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MemoryState { document: Some(document.into()), backups: Vec::new() }),
        }
    }

    pub fn backups(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state.backups.clone())
    }
}

impl BackingStore for InMemoryBackingStore {
    fn read_document(&self) -> Result<String, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        state.document.clone().ok_or_else(|| StoreError::Read {
            path: PathBuf::from("memory"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no document stored"),
        })
    }

    fn save_document(&self, content: &str) -> Result<SaveOutcome, StoreError> {
        RateBook::from_json(content)?;

        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let backup = state.document.replace(content.to_string()).map(|previous| {
            state.backups.push(previous);
            format!("memory#{}", state.backups.len())
        });

        Ok(SaveOutcome { backup, bytes_written: content.len() })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Replaces one cell of a rate store document, addressed by a dotted path.
///
/// Missing intermediate objects are created. A numeric segment indexes into an array
/// (`isoneRates.ophr.3.25-26`); it never extends one.
pub fn set_cell(document: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
    let segments: Vec<&str> =
        path.split('.').map(str::trim).filter(|segment| !segment.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(cell_error(path, "path is empty"));
    };

    if !document.is_object() {
        *document = Value::Object(Map::new());
    }

    let mut cursor = document;
    for segment in parents {
        cursor = match cursor {
            Value::Object(map) => {
                map.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()))
            }
            Value::Array(items) => {
                let index = array_index(path, segment, items.len())?;
                &mut items[index]
            }
            _ => return Err(cell_error(path, &format!("`{segment}` is not inside an object"))),
        };
    }

    match cursor {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(path, last, items.len())?;
            items[index] = value;
            Ok(())
        }
        _ => Err(cell_error(path, "parent of the cell is a scalar")),
    }
}

/// Reads one cell by the same dotted path `set_cell` accepts.
pub fn get_cell<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').map(str::trim).filter(|segment| !segment.is_empty()).try_fold(
        document,
        |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        },
    )
}

fn array_index(path: &str, segment: &str, len: usize) -> Result<usize, StoreError> {
    let index = segment
        .parse::<usize>()
        .map_err(|_| cell_error(path, &format!("`{segment}` is not an array index")))?;
    if index >= len {
        return Err(cell_error(path, &format!("index {index} is out of bounds (len {len})")));
    }
    Ok(index)
}

fn cell_error(path: &str, reason: &str) -> StoreError {
    StoreError::CellPath { path: path.to_string(), reason: reason.to_string() }
}
