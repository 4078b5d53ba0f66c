use crate::error::PlanError;
use crate::keys::LoaderId;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_log::log::debug;
use walkdir::WalkDir;

/// Class-file bytes provider behind the repository. Lookups are keyed by
/// slash-form internal name plus the loader that owns the class.
pub trait ClassBytesSource: Send {
    fn fetch(&self, name: &str, loader: LoaderId) -> Result<Vec<u8>, PlanError>;

    /// Pre-seeds bytes for a custom-loader class delivered by the agent at
    /// attach time. Sources that cannot hold seeded bytes drop them.
    fn seed(&self, _name: &str, _loader: LoaderId, _bytes: Vec<u8>) {}
}

/// Looks classes up in classpath directories. The directory index is built on
/// first fetch; custom-loader bytes seeded by the agent take priority.
pub struct DirSource {
    dirs: Vec<PathBuf>,
    index: OnceCell<HashMap<String, PathBuf>>,
    injected: DashMap<(String, LoaderId), Vec<u8>>,
}

impl DirSource {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            index: OnceCell::new(),
            injected: DashMap::new(),
        }
    }

    fn index(&self) -> &HashMap<String, PathBuf> {
        self.index.get_or_init(|| {
            let mut map = HashMap::new();
            for dir in &self.dirs {
                for entry in WalkDir::new(dir)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    let path = entry.path();
                    if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("class")
                    {
                        continue;
                    }
                    let Ok(rel) = path.strip_prefix(dir) else {
                        continue;
                    };
                    let name = rel
                        .with_extension("")
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    // first classpath entry wins
                    map.entry(name).or_insert_with(|| path.to_path_buf());
                }
            }
            debug!("indexed {} class files", map.len());
            map
        })
    }

    /// Internal names of every indexed class, sorted for deterministic
    /// replay order.
    pub fn indexed_class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ClassBytesSource for DirSource {
    fn fetch(&self, name: &str, loader: LoaderId) -> Result<Vec<u8>, PlanError> {
        if let Some(bytes) = self.injected.get(&(name.to_string(), loader)) {
            return Ok(bytes.clone());
        }
        match self.index().get(name) {
            Some(path) => Ok(std::fs::read(path)?),
            None => Err(PlanError::ClassNotFound(name.to_string())),
        }
    }

    fn seed(&self, name: &str, loader: LoaderId, bytes: Vec<u8>) {
        self.injected.insert((name.to_string(), loader), bytes);
    }
}
