//! Incremental builds.
//!
//! The builder turns every `(path, alt)` source of a snapshot into one
//! artifact under the output directory: records render to
//! `<url>/index.html`, attachments are copied to their URL.
//!
//! # Build state
//!
//! The ledger lives at `<output_dir>/.lectern-buildstate.json` and maps each
//! source (`"/blog/post1@_primary"`) to the artifacts it produced plus a
//! content hash:
//!
//! - **Records** hash the serialized [`Page`](crate::render::Page) together
//!   with the renderer name. The page includes breadcrumbs and child links,
//!   so retitling a child re-renders its parent.
//! - **Attachments** hash the file bytes (SHA-256, computed in parallel on
//!   the rayon pool before the first source is built).
//!
//! A source is skipped when its hash is unchanged and its artifacts are all
//! still on disk. Replacing a source's artifact set deletes the files it no
//! longer produces. The ledger is the only record of what the builder owns:
//! a corrupt or incompatible ledger is an error, never silently discarded,
//! because discarding it would orphan every artifact it tracks.
//!
//! # Pruning
//!
//! `prune(false)` removes the artifacts of sources that no longer resolve;
//! `prune(true)` removes every tracked artifact. Empty directories left
//! behind are removed too. After `build_all` followed by `prune(false)` the
//! tracked artifacts are exactly those reachable from the current tree.
//!
//! # Streaming
//!
//! [`BuildPass`] performs one unit of work per `next()` call and yields a
//! [`BuildEvent`] for it, so a build can feed an
//! [`EventStream`](crate::events::EventStream). A failing render is reported
//! as [`BuildEvent::Failed`] and the pass moves on; I/O errors on the output
//! directory end the pass. Dropping a pass part-way flushes the ledger so
//! artifacts already written stay tracked.

use crate::render::{self, RenderError, Renderer};
use crate::site::Snapshot;
use rayon::prelude::*;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::io;
use std::ops::DerefMut;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Name of the build ledger within the output directory.
pub const STATE_FILENAME: &str = ".lectern-buildstate.json";

/// Version of the ledger format.
const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Build state at {path} is corrupt: {message}")]
    CorruptState { path: PathBuf, message: String },
    #[error("Build state version {found} is not supported (expected {expected}); remove {path} and rebuild")]
    IncompatibleState {
        path: PathBuf,
        found: u64,
        expected: u32,
    },
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

// =============================================================================
// Ledger
// =============================================================================

/// Artifacts produced by one `(path, alt)` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub path: String,
    pub alt: String,
    pub source_hash: String,
    pub artifacts: BTreeSet<String>,
}

/// Persisted mapping from sources to their artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub version: u32,
    pub sources: BTreeMap<String, SourceEntry>,
}

impl BuildState {
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION,
            sources: BTreeMap::new(),
        }
    }

    /// Ledger key of a source.
    pub fn source_key(path: &str, alt: &str) -> String {
        format!("{path}@{alt}")
    }

    /// Load from the output directory. A missing ledger is an empty one.
    pub fn load(output_dir: &Path) -> Result<Self, BuildError> {
        let path = output_dir.join(STATE_FILENAME);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |message: String| BuildError::CorruptState {
            path: path.clone(),
            message,
        };
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        let found = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| corrupt("missing version".into()))?;
        if found != u64::from(STATE_VERSION) {
            return Err(BuildError::IncompatibleState {
                path: path.clone(),
                found,
                expected: STATE_VERSION,
            });
        }
        serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))
    }

    /// Save to the output directory, replacing the previous ledger atomically.
    pub fn save(&self, output_dir: &Path) -> Result<(), BuildError> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(STATE_FILENAME);
        let tmp = output_dir.join(format!("{STATE_FILENAME}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Every tracked artifact.
    pub fn artifacts(&self) -> BTreeSet<String> {
        self.sources
            .values()
            .flat_map(|e| e.artifacts.iter().cloned())
            .collect()
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// SHA-256 over several NUL-separated parts.
fn hash_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

/// Output path of a URL, relative to the output directory.
fn artifact_path(url: &str, is_attachment: bool) -> Option<String> {
    let rel = url.trim_start_matches('/');
    let rel = if is_attachment {
        rel.to_string()
    } else {
        format!("{rel}index.html")
    };
    let safe = !rel.is_empty()
        && Path::new(&rel)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    safe.then_some(rel)
}

// =============================================================================
// Reports and events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSource {
    pub path: String,
    pub alt: String,
    pub message: String,
}

/// Summary of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub built: usize,
    pub cached: usize,
    pub failed: Vec<FailedSource>,
    /// Artifacts removed by pruning.
    pub pruned: usize,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} built, {} cached, {} failed, {} pruned",
            self.built,
            self.cached,
            self.failed.len(),
            self.pruned
        )
    }
}

/// One step of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Built {
        path: String,
        alt: String,
        artifact: String,
    },
    Cached {
        path: String,
        alt: String,
        artifact: String,
    },
    Failed {
        path: String,
        alt: String,
        message: String,
    },
    Pruned {
        path: String,
        alt: String,
        artifacts: Vec<String>,
    },
    Finished(BuildReport),
}

impl fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built { artifact, .. } => write!(f, "built {artifact}"),
            Self::Cached { artifact, .. } => write!(f, "cached {artifact}"),
            Self::Failed { path, alt, message } => write!(f, "failed {path} ({alt}): {message}"),
            Self::Pruned {
                path,
                alt,
                artifacts,
            } => write!(f, "pruned {path} ({alt}): {} artifacts", artifacts.len()),
            Self::Finished(report) => write!(f, "finished: {report}"),
        }
    }
}

/// Serialized as a progress message: `{"msg": "built index.html"}`.
impl Serialize for BuildEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BuildEvent", 1)?;
        state.serialize_field("msg", &self.to_string())?;
        state.end()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Owner of the output directory and its ledger.
pub struct Builder {
    output_dir: PathBuf,
    state: BuildState,
    renderer: Arc<dyn Renderer>,
    dirty: bool,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("output_dir", &self.output_dir)
            .field("sources", &self.state.sources.len())
            .field("renderer", &self.renderer.name())
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// What a pass does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPlan {
    /// Build every source.
    Build,
    /// Build every source, then prune orphans.
    BuildAndPrune,
    /// Prune only; `all` removes every tracked artifact.
    Prune { all: bool },
}

impl Builder {
    /// Create a builder, loading the ledger from `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, renderer: Arc<dyn Renderer>) -> Result<Self, BuildError> {
        let output_dir = output_dir.into();
        let state = BuildState::load(&output_dir)?;
        tracing::debug!(
            output = %output_dir.display(),
            sources = state.sources.len(),
            "loaded build state"
        );
        Ok(Self {
            output_dir,
            state,
            renderer,
            dirty: false,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn tracked_artifacts(&self) -> BTreeSet<String> {
        self.state.artifacts()
    }

    /// Build every source of the snapshot.
    pub fn build_all(&mut self, snapshot: &Arc<Snapshot>) -> Result<BuildReport, BuildError> {
        BuildPass::new(self, Arc::clone(snapshot), BuildPlan::Build).run()
    }

    /// Remove orphaned artifacts, or every tracked artifact with `all`.
    pub fn prune(&mut self, snapshot: &Arc<Snapshot>, all: bool) -> Result<BuildReport, BuildError> {
        BuildPass::new(self, Arc::clone(snapshot), BuildPlan::Prune { all }).run()
    }

    /// Persist the ledger if it changed.
    pub fn flush(&mut self) -> Result<(), BuildError> {
        if self.dirty {
            self.state.save(&self.output_dir)?;
            self.dirty = false;
        }
        Ok(())
    }
}

enum Task {
    HashAttachments,
    Source { path: String, alt: String },
    Prune { all: bool },
    Remove(String),
    Finish,
}

enum Job {
    Copy(PathBuf),
    Render(Box<render::Page>),
}

/// A build or prune pass, one step per `next()`.
///
/// Generic over how the builder is held so the same pass runs on a plain
/// `&mut Builder` or on a `MutexGuard` that keeps other passes out until the
/// pass is dropped.
pub struct BuildPass<B: DerefMut<Target = Builder>> {
    builder: B,
    snapshot: Arc<Snapshot>,
    tasks: VecDeque<Task>,
    hashes: HashMap<PathBuf, Result<String, String>>,
    /// Artifact → source key, for sources built in this pass.
    claimed: HashMap<String, String>,
    report: BuildReport,
}

impl<B: DerefMut<Target = Builder>> BuildPass<B> {
    pub fn new(builder: B, snapshot: Arc<Snapshot>, plan: BuildPlan) -> Self {
        let mut tasks = VecDeque::new();
        if matches!(plan, BuildPlan::Build | BuildPlan::BuildAndPrune) {
            tasks.push_back(Task::HashAttachments);
            for node in snapshot.tree.nodes() {
                for alt in snapshot.alts.iter() {
                    tasks.push_back(Task::Source {
                        path: node.path.clone(),
                        alt: alt.id.clone(),
                    });
                }
            }
        }
        match plan {
            BuildPlan::BuildAndPrune => tasks.push_back(Task::Prune { all: false }),
            BuildPlan::Prune { all } => tasks.push_back(Task::Prune { all }),
            BuildPlan::Build => {}
        }
        tasks.push_back(Task::Finish);
        Self {
            builder,
            snapshot,
            tasks,
            hashes: HashMap::new(),
            claimed: HashMap::new(),
            report: BuildReport::default(),
        }
    }

    /// Drain the pass and return its report.
    pub fn run(self) -> Result<BuildReport, BuildError> {
        let mut report = BuildReport::default();
        for event in self {
            if let BuildEvent::Finished(r) = event? {
                report = r;
            }
        }
        Ok(report)
    }

    fn step(&mut self, task: Task) -> Result<Option<BuildEvent>, BuildError> {
        match task {
            Task::HashAttachments => {
                self.hash_attachments();
                Ok(None)
            }
            Task::Source { path, alt } => self.build_source(&path, &alt).map(Some),
            Task::Prune { all } => {
                let snapshot = &self.snapshot;
                let stale: Vec<String> = self
                    .builder
                    .state
                    .sources
                    .iter()
                    .filter(|(_, e)| {
                        all || snapshot.tree.get(&e.path).is_none() || !snapshot.alts.iter().any(|a| a.id == e.alt)
                    })
                    .map(|(key, _)| key.clone())
                    .collect();
                tracing::debug!(count = stale.len(), all, "pruning sources");
                for key in stale.into_iter().rev() {
                    self.tasks.push_front(Task::Remove(key));
                }
                Ok(None)
            }
            Task::Remove(key) => self.remove_source(&key),
            Task::Finish => {
                self.builder.flush()?;
                tracing::info!(report = %self.report, "build pass finished");
                Ok(Some(BuildEvent::Finished(self.report.clone())))
            }
        }
    }

    fn hash_attachments(&mut self) {
        let paths: Vec<PathBuf> = self
            .snapshot
            .tree
            .nodes()
            .filter(|n| n.is_attachment())
            .map(|n| n.fs_path.clone())
            .collect();
        self.hashes = paths
            .into_par_iter()
            .map(|p| {
                let hash = hash_file(&p).map_err(|e| e.to_string());
                (p, hash)
            })
            .collect();
    }

    fn fail(&mut self, path: &str, alt: &str, message: impl Into<String>) -> BuildEvent {
        let message = message.into();
        tracing::warn!(path, alt, error = %message, "source failed to build");
        self.report.failed.push(FailedSource {
            path: path.to_string(),
            alt: alt.to_string(),
            message: message.clone(),
        });
        BuildEvent::Failed {
            path: path.to_string(),
            alt: alt.to_string(),
            message,
        }
    }

    fn owned_elsewhere(&self, artifact: &str, key: &str) -> bool {
        self.claimed.get(artifact).is_some_and(|owner| owner != key)
            || self
                .builder
                .state
                .sources
                .iter()
                .any(|(k, e)| k != key && e.artifacts.contains(artifact))
    }

    fn build_source(&mut self, path: &str, alt_id: &str) -> Result<BuildEvent, BuildError> {
        let snapshot = Arc::clone(&self.snapshot);
        let (Some(node), Some(alt)) = (snapshot.tree.get(path), snapshot.alts.get(alt_id)) else {
            return Ok(self.fail(path, alt_id, "source is not in the tree"));
        };
        let Some(url) = snapshot.urls.path_to_url(path, alt) else {
            return Ok(self.fail(path, alt_id, "source has no URL"));
        };
        let Some(artifact) = artifact_path(url, node.is_attachment()) else {
            return Ok(self.fail(path, alt_id, format!("URL {url} does not map to an output file")));
        };
        let key = BuildState::source_key(path, alt_id);
        if let Some(owner) = self.claimed.get(&artifact) {
            let message = format!("{artifact} is already produced by {owner}");
            return Ok(self.fail(path, alt_id, message));
        }
        self.claimed.insert(artifact.clone(), key.clone());

        let (hash, job) = if node.is_attachment() {
            match self.hashes.get(&node.fs_path) {
                Some(Ok(bytes_hash)) => (
                    hash_parts(&[b"attachment", bytes_hash.as_bytes()]),
                    Job::Copy(node.fs_path.clone()),
                ),
                Some(Err(message)) => {
                    let message = message.clone();
                    return Ok(self.fail(path, alt_id, message));
                }
                None => return Ok(self.fail(path, alt_id, "attachment was not hashed")),
            }
        } else {
            let page = render::page_for(&snapshot, node, alt);
            let json = serde_json::to_string(&page)?;
            (
                hash_parts(&[self.builder.renderer.name().as_bytes(), json.as_bytes()]),
                Job::Render(Box::new(page)),
            )
        };

        let expected = BTreeSet::from([artifact.clone()]);
        let target = self.builder.output_dir.join(&artifact);
        if let Some(entry) = self.builder.state.sources.get(&key)
            && entry.source_hash == hash
            && entry.artifacts == expected
            && target.is_file()
        {
            self.report.cached += 1;
            tracing::debug!(path, alt = alt_id, "unchanged");
            return Ok(BuildEvent::Cached {
                path: path.to_string(),
                alt: alt_id.to_string(),
                artifact,
            });
        }

        match job {
            Job::Copy(src) => {
                ensure_parent(&target)?;
                fs::copy(&src, &target)?;
            }
            Job::Render(page) => match self.builder.renderer.render(&page) {
                Ok(html) => {
                    ensure_parent(&target)?;
                    fs::write(&target, html)?;
                }
                Err(e) => return Ok(self.fail(path, alt_id, e.to_string())),
            },
        }

        let previous = self.builder.state.sources.insert(
            key.clone(),
            SourceEntry {
                path: path.to_string(),
                alt: alt_id.to_string(),
                source_hash: hash,
                artifacts: expected.clone(),
            },
        );
        self.builder.dirty = true;
        if let Some(previous) = previous {
            for stale in previous.artifacts.difference(&expected) {
                if !self.owned_elsewhere(stale, &key) {
                    remove_artifact(&self.builder.output_dir, stale)?;
                }
            }
        }

        self.report.built += 1;
        tracing::debug!(path, alt = alt_id, artifact = %artifact, "built");
        Ok(BuildEvent::Built {
            path: path.to_string(),
            alt: alt_id.to_string(),
            artifact,
        })
    }

    fn remove_source(&mut self, key: &str) -> Result<Option<BuildEvent>, BuildError> {
        let Some(entry) = self.builder.state.sources.remove(key) else {
            return Ok(None);
        };
        self.builder.dirty = true;
        let mut removed = Vec::new();
        for artifact in &entry.artifacts {
            if self.owned_elsewhere(artifact, key) {
                continue;
            }
            remove_artifact(&self.builder.output_dir, artifact)?;
            removed.push(artifact.clone());
        }
        self.report.pruned += removed.len();
        Ok(Some(BuildEvent::Pruned {
            path: entry.path,
            alt: entry.alt,
            artifacts: removed,
        }))
    }
}

impl<B: DerefMut<Target = Builder>> Iterator for BuildPass<B> {
    type Item = Result<BuildEvent, BuildError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(task) = self.tasks.pop_front() {
            match self.step(task) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => {
                    self.tasks.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl<B: DerefMut<Target = Builder>> Drop for BuildPass<B> {
    fn drop(&mut self) {
        if let Err(e) = self.builder.flush() {
            tracing::warn!(error = %e, "failed to save build state");
        }
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Delete an artifact and any directories it leaves empty.
fn remove_artifact(output_dir: &Path, artifact: &str) -> io::Result<()> {
    let path = output_dir.join(artifact);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == output_dir || !d.starts_with(output_dir) || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{HtmlRenderer, Page};
    use crate::test_helpers::*;
    use tempfile::TempDir;

    fn builder(out: &Path) -> Builder {
        Builder::new(out, Arc::new(HtmlRenderer)).unwrap()
    }

    struct FailingRenderer(&'static str);

    impl Renderer for FailingRenderer {
        fn name(&self) -> &str {
            "failing"
        }

        fn render(&self, page: &Page) -> Result<String, RenderError> {
            if page.path == self.0 {
                Err(RenderError::Template {
                    path: page.path.clone(),
                    message: "boom".into(),
                })
            } else {
                HtmlRenderer.render(page)
            }
        }
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    #[test]
    fn missing_state_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(BuildState::load(tmp.path()).unwrap(), BuildState::empty());
    }

    #[test]
    fn corrupt_state_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(STATE_FILENAME), "{not json").unwrap();
        assert!(matches!(
            BuildState::load(tmp.path()),
            Err(BuildError::CorruptState { .. })
        ));
    }

    #[test]
    fn other_version_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(STATE_FILENAME),
            r#"{"version": 99, "sources": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            BuildState::load(tmp.path()),
            Err(BuildError::IncompatibleState { found: 99, .. })
        ));
    }

    #[test]
    fn state_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut state = BuildState::empty();
        state.sources.insert(
            BuildState::source_key("/", "_primary"),
            SourceEntry {
                path: "/".into(),
                alt: "_primary".into(),
                source_hash: "abc".into(),
                artifacts: BTreeSet::from(["index.html".to_string()]),
            },
        );
        state.save(tmp.path()).unwrap();
        assert_eq!(BuildState::load(tmp.path()).unwrap(), state);
        assert!(!tmp.path().join(format!("{STATE_FILENAME}.tmp")).exists());
    }

    #[test]
    fn artifact_paths_stay_inside_output() {
        assert_eq!(artifact_path("/", false).as_deref(), Some("index.html"));
        assert_eq!(artifact_path("/blog/", false).as_deref(), Some("blog/index.html"));
        assert_eq!(artifact_path("/a/b.txt", true).as_deref(), Some("a/b.txt"));
        assert_eq!(artifact_path("/../x/", false), None);
        assert_eq!(artifact_path("/", true), None);
    }

    // =========================================================================
    // Build and prune
    // =========================================================================

    #[test]
    fn build_writes_pages_and_attachments() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        let report = b.build_all(&snapshot).unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        assert!(report.built > 0);
        assert!(out.join("index.html").is_file());
        assert!(out.join("de/index.html").is_file());
        assert!(out.join("blog/2015/12/post1/index.html").is_file());
        assert_eq!(
            fs::read_to_string(out.join("blog/2015/12/post1/hello.txt")).unwrap(),
            fs::read_to_string(tmp.path().join("content/blog/post1/hello.txt")).unwrap()
        );
        assert_eq!(b.tracked_artifacts(), output_files(&out));
        assert!(out.join(STATE_FILENAME).is_file());
    }

    #[test]
    fn second_build_is_cached() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let first = builder(&out).build_all(&snapshot).unwrap();
        let second = builder(&out).build_all(&snapshot).unwrap();
        assert_eq!(second.built, 0);
        assert_eq!(second.cached, first.built);
    }

    #[test]
    fn deleted_artifact_is_rebuilt() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        b.build_all(&snapshot).unwrap();
        fs::remove_file(out.join("blog/index.html")).unwrap();
        let report = b.build_all(&snapshot).unwrap();
        assert_eq!(report.built, 1);
        assert!(out.join("blog/index.html").is_file());
    }

    #[test]
    fn build_then_prune_leaves_only_reachable_artifacts() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        b.build_all(&snapshot).unwrap();
        assert!(out.join("blog/2015/12/post1/index.html").is_file());

        fs::remove_dir_all(tmp.path().join("content/blog/post1")).unwrap();
        let snapshot = reload_snapshot(tmp.path());
        b.build_all(&snapshot).unwrap();
        let report = b.prune(&snapshot, false).unwrap();

        assert!(report.pruned >= 4);
        assert!(!out.join("blog/2015/12/post1").exists());
        assert!(!out.join("blog/2015/12/post1/hello.txt").exists());
        assert_eq!(b.tracked_artifacts(), output_files(&out));
        assert!(b.state().sources.keys().all(|k| !k.starts_with("/blog/post1")));
    }

    #[test]
    fn prune_all_removes_every_tracked_artifact() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        b.build_all(&snapshot).unwrap();
        fs::write(out.join("robots.txt"), "untracked").unwrap();
        let report = b.prune(&snapshot, true).unwrap();
        assert!(report.pruned > 0);
        assert!(b.tracked_artifacts().is_empty());
        assert_eq!(output_files(&out), BTreeSet::from(["robots.txt".to_string()]));
    }

    #[test]
    fn slug_change_replaces_stale_artifact() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        b.build_all(&snapshot).unwrap();
        let contents = tmp.path().join("content/extra/contents.lr");
        let text = fs::read_to_string(&contents).unwrap();
        fs::write(&contents, format!("{text}---\n_slug: more\n")).unwrap();
        let snapshot = reload_snapshot(tmp.path());
        b.build_all(&snapshot).unwrap();
        assert!(out.join("more/index.html").is_file());
        assert!(!out.join("extra/index.html").exists());
        assert_eq!(b.tracked_artifacts(), output_files(&out));
    }

    #[test]
    fn failed_render_does_not_stop_the_pass() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = Builder::new(&out, Arc::new(FailingRenderer("/blog"))).unwrap();
        let report = b.build_all(&snapshot).unwrap();
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().all(|f| f.path == "/blog" && f.message.contains("boom")));
        assert!(!out.join("blog/index.html").exists());
        assert!(out.join("blog/2015/12/post1/index.html").is_file());
        assert!(report.to_string().contains("2 failed"));
    }

    #[test]
    fn pass_yields_one_event_per_source_then_finished() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        let events: Vec<BuildEvent> = BuildPass::new(&mut b, Arc::clone(&snapshot), BuildPlan::BuildAndPrune)
            .collect::<Result<_, _>>()
            .unwrap();
        let sources = snapshot.tree.len() * snapshot.alts.len();
        assert_eq!(events.len(), sources + 1);
        assert!(matches!(events.last(), Some(BuildEvent::Finished(r)) if r.built == sources));
        let json = serde_json::to_value(&events[0]).unwrap();
        assert!(json["msg"].as_str().unwrap().starts_with("built "));
    }

    #[test]
    fn dropped_pass_keeps_progress() {
        let (tmp, snapshot) = demo_snapshot();
        let out = tmp.path().join("out");
        let mut b = builder(&out);
        let mut pass = BuildPass::new(&mut b, Arc::clone(&snapshot), BuildPlan::Build);
        assert!(matches!(pass.next(), Some(Ok(BuildEvent::Built { .. }))));
        drop(pass);
        let state = BuildState::load(&out).unwrap();
        assert_eq!(state.sources.len(), 1);
        assert_eq!(state.artifacts(), output_files(&out));
    }
}
