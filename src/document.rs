use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A whole source file held in memory.
///
/// The text is only ever replaced wholesale, through [`SourceDocument::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    path: PathBuf,
    text: String,
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not valid UTF-8 (first invalid byte at {offset})")]
    Encoding { path: PathBuf, offset: usize },
}

impl SourceDocument {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let path = path.into();
        let bytes = fs::read(&path).map_err(|source| DocumentError::Read {
            path: path.clone(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|e| DocumentError::Encoding {
            path: path.clone(),
            offset: e.utf8_error().valid_up_to(),
        })?;
        Ok(Self { path, text })
    }

    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Persist `text` through `writer` and take it as the new contents.
    pub fn commit(self, text: String, writer: &dyn DocumentWriter) -> io::Result<Self> {
        writer.write(&self.path, text.as_bytes())?;
        Ok(Self {
            path: self.path,
            text,
        })
    }
}

/// Persists a document's bytes.
pub trait DocumentWriter {
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Default writer: [`atomic_write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicWriter;

impl DocumentWriter for AtomicWriter {
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        atomic_write(path, contents)
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// The new file takes over the permissions of the one it replaces.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Some(permissions) = permissions {
        temp.as_file().set_permissions(permissions)?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
