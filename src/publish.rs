//! Publishing built output to a target.
//!
//! A server entry in `project.toml` names a target URL:
//!
//! ```toml
//! [servers.production]
//! name = "Production"
//! target = "file:///srv/www/site"
//! ```
//!
//! The target's scheme selects a [`Publisher`]. A publisher returns a lazy
//! iterator of progress lines; a transport failure is an `Err` item, which the
//! event stream turns into a final `Error: ` message. Only the local
//! `file://` transport ships with the crate; others plug in through
//! [`PublisherRegistry::register`].

use crate::builder::STATE_FILENAME;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("{0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid publish target '{0}'")]
    InvalidTarget(String),
    #[error("No publisher for scheme '{0}'")]
    UnsupportedScheme(String),
}

/// Credentials passed through to a publisher.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("key", &redact(&self.key))
            .finish()
    }
}

/// A parsed `scheme://location` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub location: String,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, PublishError> {
        let (scheme, location) = raw
            .split_once("://")
            .ok_or_else(|| PublishError::InvalidTarget(raw.to_string()))?;
        let valid_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme || location.is_empty() {
            return Err(PublishError::InvalidTarget(raw.to_string()));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.location)
    }
}

/// Progress lines of a running publish.
pub type PublishLines = Box<dyn Iterator<Item = Result<String, PublishError>> + Send>;

/// A publish transport for one URL scheme.
pub trait Publisher: Send + Sync {
    fn scheme(&self) -> &str;

    /// Start publishing `output_dir` to `target`. Work happens as the
    /// returned iterator is drained.
    fn publish(
        &self,
        target: &Target,
        output_dir: &Path,
        credentials: &Credentials,
    ) -> Result<PublishLines, PublishError>;
}

/// Publishers keyed by scheme.
#[derive(Clone)]
pub struct PublisherRegistry {
    publishers: Vec<Arc<dyn Publisher>>,
}

impl Default for PublisherRegistry {
    fn default() -> Self {
        Self {
            publishers: vec![Arc::new(LocalPublisher)],
        }
    }
}

impl fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.publishers.iter().map(|p| p.scheme()))
            .finish()
    }
}

impl PublisherRegistry {
    /// Register a publisher, replacing any existing one for its scheme.
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.retain(|p| p.scheme() != publisher.scheme());
        self.publishers.push(publisher);
    }

    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn Publisher>> {
        self.publishers.iter().find(|p| p.scheme() == scheme)
    }

    /// Parse `target` and start the matching publisher.
    pub fn start(
        &self,
        target: &str,
        output_dir: &Path,
        credentials: &Credentials,
    ) -> Result<PublishLines, PublishError> {
        let target = Target::parse(target)?;
        let publisher = self
            .get(&target.scheme)
            .ok_or_else(|| PublishError::UnsupportedScheme(target.scheme.clone()))?;
        tracing::info!(target = %target, "publishing");
        publisher.publish(&target, output_dir, credentials)
    }
}

// =============================================================================
// Local directory transport
// =============================================================================

/// Mirrors the output directory into a local directory (`file://`).
///
/// Changed files are copied, files absent from the output are removed, and
/// the builder's ledger is never copied.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPublisher;

impl Publisher for LocalPublisher {
    fn scheme(&self) -> &str {
        "file"
    }

    fn publish(
        &self,
        target: &Target,
        output_dir: &Path,
        _credentials: &Credentials,
    ) -> Result<PublishLines, PublishError> {
        if !output_dir.is_dir() {
            return Err(PublishError::Failed(format!(
                "nothing to publish: {} does not exist, run a build first",
                output_dir.display()
            )));
        }
        let dest = PathBuf::from(&target.location);
        if dest.starts_with(output_dir) || output_dir.starts_with(&dest) {
            return Err(PublishError::InvalidTarget(target.to_string()));
        }
        fs::create_dir_all(&dest)?;
        Ok(Box::new(LocalSync::new(output_dir.to_path_buf(), dest)))
    }
}

enum SyncPhase {
    Copy(walkdir::IntoIter),
    Delete(walkdir::IntoIter),
    Summary,
    Done,
}

/// Lazy mirror: one progress line per changed file.
struct LocalSync {
    src: PathBuf,
    dest: PathBuf,
    phase: SyncPhase,
    seen: BTreeSet<PathBuf>,
    copied: usize,
    deleted: usize,
}

impl LocalSync {
    fn new(src: PathBuf, dest: PathBuf) -> Self {
        let walker = WalkDir::new(&src).min_depth(1).sort_by_file_name().into_iter();
        Self {
            src,
            dest,
            phase: SyncPhase::Copy(walker),
            seen: BTreeSet::new(),
            copied: 0,
            deleted: 0,
        }
    }

    fn is_ledger(rel: &Path) -> bool {
        rel == Path::new(STATE_FILENAME)
    }

    fn copy_entry(&mut self, entry: walkdir::DirEntry) -> Result<Option<String>, PublishError> {
        let rel = entry
            .path()
            .strip_prefix(&self.src)
            .map_err(|e| PublishError::Failed(e.to_string()))?
            .to_path_buf();
        if Self::is_ledger(&rel) {
            return Ok(None);
        }
        self.seen.insert(rel.clone());
        let target = self.dest.join(&rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            return Ok(None);
        }
        if target.is_file() && fs::read(&target)? == fs::read(entry.path())? {
            return Ok(None);
        }
        fs::copy(entry.path(), &target)?;
        self.copied += 1;
        Ok(Some(format!("copied {}", rel.display())))
    }

    fn delete_entry(&mut self, entry: walkdir::DirEntry) -> Result<Option<String>, PublishError> {
        let rel = entry
            .path()
            .strip_prefix(&self.dest)
            .map_err(|e| PublishError::Failed(e.to_string()))?
            .to_path_buf();
        if self.seen.contains(&rel) {
            return Ok(None);
        }
        if entry.file_type().is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        self.deleted += 1;
        Ok(Some(format!("deleted {}", rel.display())))
    }
}

impl Iterator for LocalSync {
    type Item = Result<String, PublishError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.phase, SyncPhase::Done) {
                SyncPhase::Copy(mut walker) => match walker.next() {
                    Some(entry) => {
                        self.phase = SyncPhase::Copy(walker);
                        match entry.map_err(PublishError::from).and_then(|e| self.copy_entry(e)) {
                            Ok(Some(line)) => return Some(Ok(line)),
                            Ok(None) => continue,
                            Err(e) => {
                                self.phase = SyncPhase::Done;
                                return Some(Err(e));
                            }
                        }
                    }
                    None => {
                        // Parents come before children, so a removed
                        // directory takes its whole subtree with it.
                        let walker = WalkDir::new(&self.dest).min_depth(1).sort_by_file_name().into_iter();
                        self.phase = SyncPhase::Delete(walker);
                    }
                },
                SyncPhase::Delete(mut walker) => match walker.next() {
                    Some(entry) => {
                        let result = entry.map_err(PublishError::from).and_then(|e| {
                            let is_dir = e.file_type().is_dir();
                            let line = self.delete_entry(e)?;
                            if line.is_some() && is_dir {
                                walker.skip_current_dir();
                            }
                            Ok(line)
                        });
                        self.phase = SyncPhase::Delete(walker);
                        match result {
                            Ok(Some(line)) => return Some(Ok(line)),
                            Ok(None) => continue,
                            Err(e) => {
                                self.phase = SyncPhase::Done;
                                return Some(Err(e));
                            }
                        }
                    }
                    None => self.phase = SyncPhase::Summary,
                },
                SyncPhase::Summary => {
                    return Some(Ok(format!(
                        "published to {}: {} copied, {} deleted",
                        self.dest.display(),
                        self.copied,
                        self.deleted
                    )));
                }
                SyncPhase::Done => return None,
            }
        }
    }
}
