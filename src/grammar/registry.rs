//! Grammar loading and hot reload.
//!
//! A [`GrammarRegistry`] owns the last good [`Grammar`] for one device type.
//! When it is backed by a file, [`GrammarRegistry::refresh`] stats the file
//! and re-reads it only when its modification time or length moved. A
//! re-read table is compiled only if its content changed; compiled grammars
//! are cached by content digest so flipping between versions does not
//! recompile.
//! A table that fails to load is logged and the previous grammar stays live.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use log::{debug, warn};
use moka::sync::Cache;
use sha2::{Digest, Sha256};

use super::{CommandTable, Grammar};
use crate::error::EngineError;
use crate::templates;

/// Where a grammar comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarSource {
    /// A builtin table from [`crate::templates`].
    Builtin(String),
    /// A JSON command table on disk.
    File(PathBuf),
    /// A table supplied by the caller; never reloaded.
    Inline,
}

const CACHE_CAPACITY: u64 = 16;

/// Metadata of the backing file at the last read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Result<Self, EngineError> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

pub struct GrammarRegistry {
    source: GrammarSource,
    current: Mutex<Arc<Grammar>>,
    stamp: Mutex<Option<FileStamp>>,
    cache: Cache<[u8; 32], Arc<Grammar>>,
}

impl GrammarRegistry {
    /// Registry for a builtin table, e.g. `huawei_smartax`.
    pub fn builtin(name: &str) -> Result<Self, EngineError> {
        let table = templates::by_name(name)?;
        let grammar = Grammar::load(&table)?;
        Ok(Self::with(GrammarSource::Builtin(name.to_string()), grammar))
    }

    /// Registry for a command table file. The first load must succeed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let stamp = FileStamp::of(&path)?;
        let text = fs::read_to_string(&path)?;
        let grammar = Grammar::load(&CommandTable::from_json(&text)?)?;
        let registry = Self::with(GrammarSource::File(path), grammar);
        *registry.stamp.lock().unwrap_or_else(PoisonError::into_inner) = Some(stamp);
        let grammar = registry.grammar();
        registry.cache.insert(digest(&text), grammar);
        Ok(registry)
    }

    /// Registry for an in-memory table.
    pub fn from_table(table: &CommandTable) -> Result<Self, EngineError> {
        Ok(Self::with(GrammarSource::Inline, Grammar::load(table)?))
    }

    fn with(source: GrammarSource, grammar: Grammar) -> Self {
        Self {
            source,
            current: Mutex::new(Arc::new(grammar)),
            stamp: Mutex::new(None),
            cache: Cache::new(CACHE_CAPACITY),
        }
    }

    pub fn source(&self) -> &GrammarSource {
        &self.source
    }

    /// Last successfully loaded grammar.
    pub fn grammar(&self) -> Arc<Grammar> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-checks the backing file and returns the grammar to use for the
    /// next command. Only file sources ever change, and an unchanged stamp
    /// costs one `stat`.
    pub fn refresh(&self) -> Arc<Grammar> {
        let GrammarSource::File(path) = &self.source else {
            return self.grammar();
        };
        let stamp = match FileStamp::of(path) {
            Ok(stamp) => stamp,
            Err(err) => {
                warn!(
                    "keeping previous grammar, cannot stat {}: {err}",
                    path.display()
                );
                return self.grammar();
            }
        };
        {
            let mut last = self.stamp.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(stamp) {
                return self.grammar();
            }
            *last = Some(stamp);
        }
        match self.load_file(path) {
            Ok(grammar) => {
                let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
                if !Arc::ptr_eq(&current, &grammar) {
                    debug!("command table {} changed, grammar reloaded", path.display());
                    *current = grammar.clone();
                }
                grammar
            }
            Err(err) => {
                warn!(
                    "keeping previous grammar, reload of {} failed: {err}",
                    path.display()
                );
                self.grammar()
            }
        }
    }

    fn load_file(&self, path: &Path) -> Result<Arc<Grammar>, EngineError> {
        let text = fs::read_to_string(path)?;
        let key = digest(&text);
        if let Some(grammar) = self.cache.get(&key) {
            return Ok(grammar);
        }
        let grammar = Arc::new(Grammar::load(&CommandTable::from_json(&text)?)?);
        self.cache.insert(key, grammar.clone());
        Ok(grammar)
    }
}

impl std::fmt::Debug for GrammarRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammarRegistry")
            .field("source", &self.source)
            .field("device_type", &self.grammar().device_type())
            .finish()
    }
}

fn digest(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    fn write_table(file: &mut tempfile::NamedTempFile, table: &CommandTable) {
        let json = table.to_json_pretty().expect("encode table");
        let handle = file.as_file_mut();
        handle.set_len(0).expect("truncate");
        handle.rewind().expect("rewind");
        handle.write_all(json.as_bytes()).expect("write table");
        handle.flush().expect("flush");
    }

    #[test]
    fn builtin_registry_never_changes() {
        let registry = GrammarRegistry::builtin("huawei_smartax").expect("builtin");
        let first = registry.grammar();
        let second = registry.refresh();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn refresh_picks_up_file_changes_and_survives_bad_tables() {
        let mut table = templates::by_name("huawei_smartax").expect("table");
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write_table(&mut file, &table);

        let registry = GrammarRegistry::from_path(file.path()).expect("load file");
        let original = registry.grammar();
        assert!(Arc::ptr_eq(&original, &registry.refresh()));

        table.unknown_command = Some("% changed".to_string());
        write_table(&mut file, &table);
        let reloaded = registry.refresh();
        assert!(!Arc::ptr_eq(&original, &reloaded));
        assert_eq!(reloaded.unknown_command(), "% changed");

        let handle = file.as_file_mut();
        handle.set_len(0).expect("truncate");
        let kept = registry.refresh();
        assert!(Arc::ptr_eq(&kept, &reloaded));
    }

    #[test]
    fn unchanged_stamp_skips_reading_the_file() {
        let mut table = templates::by_name("huawei_smartax").expect("table");
        table.unknown_command = Some("% version a".to_string());
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write_table(&mut file, &table);
        let registry = GrammarRegistry::from_path(file.path()).expect("load file");
        let modified = file
            .as_file()
            .metadata()
            .expect("metadata")
            .modified()
            .expect("mtime");

        table.unknown_command = Some("% version b".to_string());
        write_table(&mut file, &table);
        file.as_file().set_modified(modified).expect("restore mtime");
        assert_eq!(registry.refresh().unknown_command(), "% version a");

        file.as_file()
            .set_modified(modified + std::time::Duration::from_secs(1))
            .expect("touch");
        assert_eq!(registry.refresh().unknown_command(), "% version b");
    }
}
