//! Artifact access and the restore guard.
//!
//! [`ArtifactCheckout`] keeps the original bytes of the artifact being manipulated.
//! Consuming it with [`ArtifactCheckout::restore`] writes them back exactly once; if
//! the checkout is dropped without that (early return, panic), the drop handler
//! restores instead.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use super::config::TriageConfig;
use super::records::MethodUnderTest;

/// The original artifact could not be put back. Fatal for the run.
#[derive(Debug, Error)]
#[error("failed to restore original artifact {location}: {source}")]
pub struct RestoreError {
    /// Artifact location.
    pub location: String,
    /// Underlying error.
    #[source]
    pub source: io::Error,
}

/// A replaceable compiled unit.
pub trait Artifact {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;
    /// Current bytes.
    fn read(&self) -> io::Result<Vec<u8>>;
    /// Replace the bytes.
    fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

impl<A: Artifact + ?Sized> Artifact for &A {
    fn location(&self) -> String {
        (**self).location()
    }

    fn read(&self) -> io::Result<Vec<u8>> {
        (**self).read()
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }
}

/// Resolves the artifact that holds a method.
pub trait ArtifactSource {
    /// Artifact containing `method`.
    fn artifact_for(&self, method: &MethodUnderTest) -> Box<dyn Artifact + '_>;
}

/// Artifact stored as one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifact {
    path: PathBuf,
}

impl FileArtifact {
    /// Artifact at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Artifact for FileArtifact {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".triage-tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, &self.path)
    }
}

/// Artifacts laid out as `<root>/<package path>/<Class>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirectory {
    root: PathBuf,
    extension: String,
}

impl ArtifactDirectory {
    /// Directory rooted at `root` with files ending in `extension`.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// Directory described by `config`.
    pub fn from_config(config: &TriageConfig) -> Self {
        Self::new(&config.artifact_root, &config.artifact_extension)
    }

    /// Path of the artifact holding `method`.
    pub fn path_for(&self, method: &MethodUnderTest) -> PathBuf {
        let mut path = self.root.clone();
        for segment in method.package.split('.').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(format!("{}.{}", method.class, self.extension));
        path
    }
}

impl ArtifactSource for ArtifactDirectory {
    fn artifact_for(&self, method: &MethodUnderTest) -> Box<dyn Artifact + '_> {
        Box::new(FileArtifact::new(self.path_for(method)))
    }
}

/// Artifact held in memory, recording every write.
#[derive(Debug, Default)]
pub struct MemoryArtifact {
    name: String,
    bytes: Mutex<Vec<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes_after: Option<usize>,
}

impl MemoryArtifact {
    /// Artifact named `name` holding `bytes`.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: Mutex::new(bytes.into()),
            writes: Mutex::new(Vec::new()),
            fail_writes_after: None,
        }
    }

    /// Reject every write after the first `count`.
    pub fn failing_writes_after(mut self, count: usize) -> Self {
        self.fail_writes_after = Some(count);
        self
    }

    /// Current bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Every accepted write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

impl Artifact for MemoryArtifact {
    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn read(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes())
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writes = self.writes.lock();
        if self.fail_writes_after.is_some_and(|limit| writes.len() >= limit) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "write rejected"));
        }
        writes.push(bytes.to_vec());
        *self.bytes.lock() = bytes.to_vec();
        Ok(())
    }
}

/// Original bytes of an artifact plus the obligation to put them back.
pub struct ArtifactCheckout<'a> {
    artifact: &'a dyn Artifact,
    original: Vec<u8>,
    restored: bool,
}

impl<'a> ArtifactCheckout<'a> {
    /// Read and remember the current bytes of `artifact`.
    pub fn acquire(artifact: &'a dyn Artifact) -> io::Result<Self> {
        let original = artifact.read()?;
        Ok(Self {
            artifact,
            original,
            restored: false,
        })
    }

    /// Bytes read at acquisition.
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Artifact location.
    pub fn location(&self) -> String {
        self.artifact.location()
    }

    /// Install `bytes` in place of the current artifact.
    pub fn install(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.artifact.write(bytes)
    }

    /// Write the original bytes back. Never retried.
    pub fn restore(mut self) -> Result<(), RestoreError> {
        self.restored = true;
        self.artifact
            .write(&self.original)
            .map_err(|source| RestoreError {
                location: self.artifact.location(),
                source,
            })
    }
}

impl Drop for ArtifactCheckout<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(err) = self.artifact.write(&self.original) {
            tracing::error!(
                artifact = %self.artifact.location(),
                error = %err,
                "failed to restore original artifact during unwind"
            );
        }
    }
}
