//! The project context every operation runs against.
//!
//! A [`Site`] owns one project: its configuration, the current immutable
//! [`Snapshot`] of models, content tree and URL map, the [`Builder`] for its
//! output directory, and the publishers it can deploy with.
//!
//! Concurrency follows two rules:
//!
//! - **Reads** clone the current `Arc<Snapshot>` under a short read lock and
//!   work on that value; a concurrent edit never changes a snapshot in use.
//! - **Edits** hold the write lock while touching disk, then rescan and swap
//!   in a fresh snapshot before releasing it.
//!
//! Build, clean and publish passes hold the builder mutex for as long as their
//! [`EventStream`] lives, so two passes never interleave on one output
//! directory.

use crate::builder::{BuildError, BuildPass, BuildPlan, Builder};
use crate::config::{self, AltSet, ConfigError, ProjectConfig};
use crate::editor::{self, DeleteOutcome, DeleteScope, NewRecordOutcome, Upload, UploadOutcome};
use crate::events::{EventStream, Progress};
use crate::model::{ModelError, ModelRegistry};
use crate::publish::{Credentials, PublishError, PublisherRegistry};
use crate::render::{HtmlRenderer, Renderer};
use crate::resolver::{
    self, FindResults, NewAttachmentInfo, NewRecordInfo, PathInfo, PreviewInfo, RawRecord, RecordInfo,
    UrlMatch,
};
use crate::tree::{CONTENT_DIR, SourceTree, TreeError};
use crate::urls::UrlMatcher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid parameters: {}", format_params(.0))]
    InvalidParams(BTreeMap<String, String>),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Content error: {0}")]
    Tree(TreeError),
    #[error("Build error: {0}")]
    Build(#[from] BuildError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ApiError {
    /// Validation failure on a single parameter.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams(BTreeMap::from([(field.to_string(), message.into())]))
    }
}

fn format_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<TreeError> for ApiError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(path) => Self::NotFound(path),
            TreeError::InvalidPath(path) => Self::invalid("path", format!("invalid path '{path}'")),
            TreeError::UnknownAlt(alt) => Self::invalid("alt", format!("unknown alt '{alt}'")),
            other => Self::Tree(other),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Everything derived from the project files at one point in time.
#[derive(Debug)]
pub struct Snapshot {
    pub root: PathBuf,
    pub alts: AltSet,
    pub models: ModelRegistry,
    pub tree: SourceTree,
    pub urls: UrlMatcher,
}

impl Snapshot {
    /// Load models, scan `content/` and compute URLs.
    pub fn load(root: &Path, config: &ProjectConfig) -> Result<Self, ApiError> {
        let alts = config.alt_set();
        let models = ModelRegistry::load(root)?;
        let tree = SourceTree::scan(
            &root.join(CONTENT_DIR),
            &alts,
            &models,
            &config.project.hidden_prefix,
        )?;
        let urls = UrlMatcher::build(&tree, &alts, &models);
        tracing::debug!(nodes = tree.len(), urls = urls.len(), "loaded snapshot");
        Ok(Self {
            root: root.to_path_buf(),
            alts,
            models,
            tree,
            urls,
        })
    }
}

// =============================================================================
// Site
// =============================================================================

/// Overrides for [`Site::open_with`].
pub struct SiteOptions {
    /// Output directory; defaults to `project.output_path` under the root.
    pub output_dir: Option<PathBuf>,
    pub renderer: Arc<dyn Renderer>,
    pub publishers: PublisherRegistry,
}

impl Default for SiteOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            renderer: Arc::new(HtmlRenderer),
            publishers: PublisherRegistry::default(),
        }
    }
}

/// A configured publish target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub target: String,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerList {
    pub servers: Vec<ServerInfo>,
}

/// Progress lines of a publish run.
pub type PublishProgress = Box<dyn Iterator<Item = Result<Progress, PublishError>> + Send>;

/// Event stream of a build or clean pass. Holds the builder lock until dropped.
pub type BuildStream<'a> = EventStream<BuildPass<MutexGuard<'a, Builder>>>;

/// Publish progress that keeps the builder locked, so no build can rewrite
/// the output directory while it is being mirrored.
pub struct PublishPass<'a> {
    _builder: MutexGuard<'a, Builder>,
    lines: PublishProgress,
}

impl Iterator for PublishPass<'_> {
    type Item = Result<Progress, PublishError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next()
    }
}

/// Event stream of a publish run. Holds the builder lock until dropped.
pub type PublishStream<'a> = EventStream<PublishPass<'a>>;

pub struct Site {
    root: PathBuf,
    config: ProjectConfig,
    output_dir: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
    builder: Mutex<Builder>,
    publishers: PublisherRegistry,
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("root", &self.root)
            .field("output_dir", &self.output_dir)
            .field("publishers", &self.publishers)
            .finish_non_exhaustive()
    }
}

impl Site {
    /// Open the project at `root` with default options.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ApiError> {
        Self::open_with(root, SiteOptions::default())
    }

    pub fn open_with(root: impl AsRef<Path>, options: SiteOptions) -> Result<Self, ApiError> {
        let root = root.as_ref().to_path_buf();
        let config = config::load_config(&root)?;
        let output_dir = options
            .output_dir
            .unwrap_or_else(|| root.join(&config.project.output_path));
        let snapshot = Snapshot::load(&root, &config)?;
        let builder = Builder::new(&output_dir, options.renderer)?;
        tracing::info!(
            project = %config.project.name,
            root = %root.display(),
            output = %output_dir.display(),
            "opened project"
        );
        Ok(Self {
            root,
            config,
            output_dir,
            snapshot: RwLock::new(Arc::new(snapshot)),
            builder: Mutex::new(builder),
            publishers: options.publishers,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rescan the project and swap in the result.
    pub fn reload(&self) -> Result<(), ApiError> {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(Snapshot::load(&self.root, &self.config)?);
        Ok(())
    }

    /// Run an edit under the write lock, then rescan.
    fn mutate<T>(&self, edit: impl FnOnce(&Snapshot) -> Result<T, ApiError>) -> Result<T, ApiError> {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let current = Arc::clone(&guard);
        let value = edit(&current)?;
        *guard = Arc::new(Snapshot::load(&self.root, &self.config)?);
        Ok(value)
    }

    fn lock_builder(&self) -> MutexGuard<'_, Builder> {
        self.builder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get_record_info(&self, path: &str, alt: &str) -> Result<RecordInfo, ApiError> {
        resolver::record_info(&self.snapshot(), path, alt)
    }

    pub fn get_path_info(&self, path: &str) -> Result<PathInfo, ApiError> {
        resolver::path_info(&self.snapshot(), path)
    }

    pub fn get_preview_info(&self, path: &str, alt: &str) -> Result<PreviewInfo, ApiError> {
        resolver::preview_info(&self.snapshot(), path, alt)
    }

    pub fn match_url(&self, url: &str) -> UrlMatch {
        resolver::match_url(&self.snapshot(), url)
    }

    pub fn find(&self, query: &str, alt: &str, lang: &str) -> Result<FindResults, ApiError> {
        resolver::find(&self.snapshot(), query, alt, lang)
    }

    pub fn get_raw_record(&self, path: &str, alt: &str) -> Result<RawRecord, ApiError> {
        resolver::raw_record(&self.snapshot(), path, alt)
    }

    pub fn new_record_info(&self, path: &str, alt: &str) -> Result<NewRecordInfo, ApiError> {
        resolver::new_record_info(&self.snapshot(), path, alt)
    }

    pub fn new_attachment_info(&self, path: &str) -> Result<NewAttachmentInfo, ApiError> {
        resolver::new_attachment_info(&self.snapshot(), path)
    }

    pub fn source_path(&self, path: &str, alt: &str) -> Result<PathBuf, ApiError> {
        resolver::source_path(&self.snapshot(), path, alt)
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    /// Apply field edits; `None` deletes a field. Returns whether anything
    /// changed on disk.
    pub fn set_raw_record(
        &self,
        path: &str,
        alt: &str,
        data: &BTreeMap<String, Option<String>>,
    ) -> Result<bool, ApiError> {
        self.mutate(|snap| editor::set_raw_record(snap, path, alt, data))
    }

    pub fn create_record(
        &self,
        parent: &str,
        id: &str,
        alt: &str,
        model: Option<&str>,
        data: &BTreeMap<String, String>,
    ) -> Result<NewRecordOutcome, ApiError> {
        self.mutate(|snap| editor::create_record(snap, parent, id, alt, model, data))
    }

    pub fn upload_attachment(
        &self,
        path: &str,
        alt: &str,
        uploads: &[Upload],
    ) -> Result<UploadOutcome, ApiError> {
        self.mutate(|snap| editor::upload_attachments(snap, path, alt, uploads))
    }

    pub fn delete_record(&self, path: &str, alt: &str, scope: DeleteScope) -> Result<DeleteOutcome, ApiError> {
        self.mutate(|snap| editor::delete_record(snap, path, alt, scope))
    }

    // -------------------------------------------------------------------------
    // Build, clean, publish
    // -------------------------------------------------------------------------

    /// Build every source of the current snapshot, then prune orphans.
    ///
    /// Blocks while another pass holds the builder.
    pub fn build(&self) -> BuildStream<'_> {
        let builder = self.lock_builder();
        EventStream::new(BuildPass::new(builder, self.snapshot(), BuildPlan::BuildAndPrune))
    }

    /// Prune orphaned artifacts, or every tracked artifact with `full`.
    pub fn clean(&self, full: bool) -> BuildStream<'_> {
        let builder = self.lock_builder();
        EventStream::new(BuildPass::new(builder, self.snapshot(), BuildPlan::Prune { all: full }))
    }

    /// Publish the output directory to the configured server `server`.
    ///
    /// An unknown server is an error; failures after that are reported
    /// inside the stream. Builds wait until the stream is dropped.
    pub fn publish(
        &self,
        server: &str,
        credentials: &Credentials,
    ) -> Result<PublishStream<'_>, ApiError> {
        let server = server.trim();
        if server.is_empty() {
            return Err(ApiError::invalid("server", "no server given"));
        }
        let config = self
            .config
            .servers
            .get(server)
            .ok_or_else(|| ApiError::NotFound(format!("publish target '{server}'")))?;
        let builder = self.lock_builder();
        let lines: PublishProgress = match self.publishers.start(&config.target, &self.output_dir, credentials) {
            Ok(lines) => Box::new(lines.map(|line| line.map(Progress::new))),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        Ok(EventStream::new(PublishPass {
            _builder: builder,
            lines,
        }))
    }

    pub fn list_publish_targets(&self) -> ServerList {
        ServerList {
            servers: self
                .config
                .servers
                .iter()
                .map(|(id, server)| ServerInfo {
                    id: id.clone(),
                    name: if server.name.is_empty() {
                        id.clone()
                    } else {
                        server.name.clone()
                    },
                    target: server.target.clone(),
                    default: server.default,
                })
                .collect(),
        }
    }

    /// The server marked `default`, else the only one configured.
    pub fn default_publish_target(&self) -> Option<&str> {
        let servers = &self.config.servers;
        servers
            .iter()
            .find(|(_, s)| s.default)
            .or_else(|| (servers.len() == 1).then(|| servers.iter().next()).flatten())
            .map(|(id, _)| id.as_str())
    }
}
