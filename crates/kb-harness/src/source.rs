//! Document sources: where `kb sync` fetches text from.
//!
//! A [`DocumentSource`] maps a `source_id` to the document's current text.
//! [`FileSource`] serves `.md` and `.txt` files under a root directory, with
//! `source_id` being the path relative to that root.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use kb_harness_core::error::{Error, Result};

/// File extensions picked up by [`FileSource::list`].
const EXTENSIONS: &[&str] = &["md", "txt"];

/// A store of documents addressable by `source_id`.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Current text of `source_id`. Fails with `NotFound` or `AccessDenied`.
    async fn fetch(&self, source_id: &str) -> Result<String>;

    /// Every `source_id` the source can serve, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

/// Serves files below a root directory.
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, source_id: &str) -> Result<PathBuf> {
        let relative = Path::new(source_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if source_id.is_empty() || escapes {
            return Err(Error::AccessDenied(format!(
                "'{}' is outside the source root",
                source_id
            )));
        }
        // One file, one id: "./a.md" or "notes//b.txt" would index a second copy.
        let canonical = canonical_id(relative);
        if canonical != source_id {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a canonical source id; use '{}'",
                source_id, canonical
            )));
        }

        let root = self.root.canonicalize().map_err(|e| io_error(&self.root, e))?;
        let path = root.join(relative);
        let resolved = path.canonicalize().map_err(|e| io_error(&path, e))?;
        // Symlinks may still point elsewhere.
        if !resolved.starts_with(&root) {
            return Err(Error::AccessDenied(format!(
                "'{}' resolves outside the source root",
                source_id
            )));
        }
        Ok(resolved)
    }
}

/// `/`-joined normal components of a root-relative path, the form
/// [`FileSource::list`] returns.
fn canonical_id(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => Error::AccessDenied(path.display().to_string()),
        _ => Error::Storage(format!("{}: {}", path.display(), e)),
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    async fn fetch(&self, source_id: &str) -> Result<String> {
        let path = self.resolve(source_id)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        String::from_utf8(bytes)
            .map_err(|_| Error::InvalidInput(format!("{} is not valid UTF-8", source_id)))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let root = self.root.canonicalize().map_err(|e| io_error(&self.root, e))?;

        let mut ids = Vec::new();
        let walker = WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let wanted = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if !wanted {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            ids.push(canonical_id(relative));
        }

        ids.sort();
        Ok(ids)
    }
}
