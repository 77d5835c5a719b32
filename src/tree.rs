//! Content tree scanning and alt resolution.
//!
//! The `content/` directory is the source of truth. Every directory is a
//! record; its fields live in `contents.lr`, with one optional overlay file
//! per non-primary alt:
//!
//! ```text
//! content/
//! ├── contents.lr                  # Root record, primary alt
//! ├── contents+de.lr               # Root record, German overlay
//! ├── hello.txt                    # Attachment of the root record
//! ├── hello.txt.lr                 # Metadata sidecar (not an attachment)
//! └── blog/
//!     ├── contents.lr
//!     └── post1/
//!         ├── contents.lr
//!         └── hello.txt
//! ```
//!
//! Scanning produces an immutable [`SourceTree`] keyed by normalized path.
//! Resolving a path in an alt layers the overlay's fields over the primary
//! fields; a missing overlay is the normal case and simply means every field
//! comes from the primary file. The primary alt always exists; any other alt
//! exists for a record only when its overlay file is present.
//!
//! Hidden status is computed here once: a record is hidden when its id starts
//! with the configured hidden prefix, when it sets `_hidden: yes`, when its
//! model is hidden, or when any ancestor is hidden.

use crate::config::{Alt, AltSet};
use crate::contents::ContentFile;
use crate::model::{DataModel, ModelRegistry, NONE_MODEL};
use crate::order::parse_bool;
use crate::slug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the content tree, relative to the project root.
pub const CONTENT_DIR: &str = "content";

/// Primary content file of every record.
pub const PRIMARY_CONTENT_FILE: &str = "contents.lr";

/// Extension of content files and attachment sidecars.
const CONTENT_EXT: &str = ".lr";

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Content directory not found: {0}")]
    MissingContent(PathBuf),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Path not found: {0}")]
    NotFound(String),
    #[error("Unknown alt: {0}")]
    UnknownAlt(String),
    #[error("Content file is not valid UTF-8: {0}")]
    Encoding(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Record,
    Attachment,
}

/// A record or attachment in the scanned tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub path: String,
    pub id: String,
    pub kind: NodeKind,
    /// Record directory, or the attachment file itself.
    pub fs_path: PathBuf,
    /// Primary fields: `contents.lr` for records, the sidecar for attachments.
    pub primary: ContentFile,
    /// Overlay fields keyed by alt id.
    pub overlays: BTreeMap<String, ContentFile>,
    pub model: String,
    pub hidden: bool,
    /// Child record paths, sorted by id.
    pub children: Vec<String>,
    /// Attachment paths, sorted by id.
    pub attachments: Vec<String>,
}

impl Node {
    pub fn is_attachment(&self) -> bool {
        self.kind == NodeKind::Attachment
    }

    /// Whether this node has content of its own in `alt`.
    ///
    /// Attachments are not localized and exist in every alt.
    pub fn exists_in(&self, alt: &Alt) -> bool {
        alt.is_primary || self.is_attachment() || self.overlays.contains_key(&alt.id)
    }

    pub fn overlay(&self, alt: &Alt) -> Option<&ContentFile> {
        if alt.is_primary {
            None
        } else {
            self.overlays.get(&alt.id)
        }
    }

    /// File backing this node in `alt`: the overlay when present, else the
    /// primary content file. Attachments are their own file.
    pub fn source_file(&self, alt: &Alt) -> PathBuf {
        match self.kind {
            NodeKind::Attachment => self.fs_path.clone(),
            NodeKind::Record if self.overlay(alt).is_some() => {
                self.fs_path.join(alt.content_filename())
            }
            NodeKind::Record => self.fs_path.join(PRIMARY_CONTENT_FILE),
        }
    }

    /// File holding this node's own fields in `alt`, existing or not.
    pub fn fields_file(&self, alt: &Alt) -> PathBuf {
        match self.kind {
            NodeKind::Attachment => sidecar_path(&self.fs_path),
            NodeKind::Record => self.fs_path.join(alt.content_filename()),
        }
    }
}

/// Sidecar metadata file of an attachment: `photo.jpg` → `photo.jpg.lr`.
pub fn sidecar_path(attachment: &Path) -> PathBuf {
    let mut name = attachment.as_os_str().to_owned();
    name.push(CONTENT_EXT);
    PathBuf::from(name)
}

/// A node viewed through one alt.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedNode<'a> {
    pub node: &'a Node,
    pub alt: &'a Alt,
}

impl<'a> ResolvedNode<'a> {
    /// Field value with the overlay layered over the primary file.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "_id" => Some(self.node.id.clone()),
            "_path" => Some(self.node.path.clone()),
            _ => self
                .node
                .overlay(self.alt)
                .and_then(|o| o.get(name))
                .or_else(|| self.node.primary.get(name)),
        }
    }

    /// Every field after layering, keyed by name.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = self.node.primary.fields().into_iter().collect();
        if let Some(overlay) = self.node.overlay(self.alt) {
            fields.extend(overlay.fields());
        }
        fields
    }

    pub fn exists(&self) -> bool {
        self.node.exists_in(self.alt)
    }

    /// Title in this alt, falling back to a label derived from the id.
    pub fn label(&self) -> String {
        self.field("title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| slug::display_label(&self.node.id))
    }
}

/// Existence of one alt for one node.
#[derive(Debug, Clone, Copy)]
pub struct AltStatus<'a> {
    pub alt: &'a Alt,
    pub exists: bool,
}

/// Scanned content tree.
#[derive(Debug, Clone)]
pub struct SourceTree {
    content_dir: PathBuf,
    nodes: BTreeMap<String, Node>,
}

impl SourceTree {
    /// Scan `content_dir`. Read-only; scanning the same directory twice
    /// yields the same tree.
    pub fn scan(
        content_dir: &Path,
        alts: &AltSet,
        models: &ModelRegistry,
        hidden_prefix: &str,
    ) -> Result<Self, TreeError> {
        if !content_dir.is_dir() {
            return Err(TreeError::MissingContent(content_dir.to_path_buf()));
        }
        let mut scanner = Scanner {
            alts,
            models,
            hidden_prefix,
            nodes: BTreeMap::new(),
        };
        scanner.scan_record(content_dir, "/".to_string(), None, false)?;
        tracing::debug!(nodes = scanner.nodes.len(), "scanned content tree");
        Ok(Self {
            content_dir: content_dir.to_path_buf(),
            nodes: scanner.nodes,
        })
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Node at an already-normalized path.
    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    /// Node at a caller-supplied path.
    pub fn lookup(&self, path: &str) -> Result<&Node, TreeError> {
        let normalized =
            slug::normalize_path(path).ok_or_else(|| TreeError::InvalidPath(path.to_string()))?;
        self.nodes
            .get(&normalized)
            .ok_or(TreeError::NotFound(normalized))
    }

    /// Resolve a path in an alt. `_primary` and the primary's configured id
    /// both name the primary alt.
    pub fn resolve<'a>(
        &'a self,
        path: &str,
        alt: &str,
        alts: &'a AltSet,
    ) -> Result<ResolvedNode<'a>, TreeError> {
        let alt = alts
            .get(alt)
            .ok_or_else(|| TreeError::UnknownAlt(alt.to_string()))?;
        let node = self.lookup(path)?;
        Ok(ResolvedNode { node, alt })
    }

    /// Every configured alt for a node in configured order, primary first.
    pub fn alts<'a>(&self, node: &Node, alts: &'a AltSet) -> Vec<AltStatus<'a>> {
        alts.iter()
            .map(|alt| AltStatus {
                alt,
                exists: node.exists_in(alt),
            })
            .collect()
    }

    /// All nodes, parents before their descendants.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Directory a record at `path` lives (or would live) in.
    pub fn fs_path_for(&self, path: &str) -> PathBuf {
        slug::split_segments(path)
            .into_iter()
            .fold(self.content_dir.clone(), |dir, segment| dir.join(segment))
    }
}

struct Scanner<'a> {
    alts: &'a AltSet,
    models: &'a ModelRegistry,
    hidden_prefix: &'a str,
    nodes: BTreeMap<String, Node>,
}

impl Scanner<'_> {
    fn is_hidden_id(&self, id: &str) -> bool {
        !self.hidden_prefix.is_empty() && id.starts_with(self.hidden_prefix)
    }

    fn scan_record(
        &mut self,
        dir: &Path,
        path: String,
        parent_model: Option<&DataModel>,
        parent_hidden: bool,
    ) -> Result<(), TreeError> {
        let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        let mut primary = None;
        let mut overlays = BTreeMap::new();
        let mut subdirs = Vec::new();
        let mut files = BTreeSet::new();

        for entry in entries {
            let entry_path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry_path.display(), "skipping non UTF-8 file name");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if entry_path.is_dir() {
                if slug::is_valid_id(&name) {
                    subdirs.push((name, entry_path));
                } else {
                    tracing::warn!(path = %entry_path.display(), "skipping directory with invalid id");
                }
                continue;
            }
            if name == PRIMARY_CONTENT_FILE {
                primary = Some(read_content(&entry_path)?);
            } else if name.starts_with("contents+") && name.ends_with(CONTENT_EXT) {
                match self.alts.for_overlay_file(&name) {
                    Some(alt) => {
                        overlays.insert(alt.id.clone(), read_content(&entry_path)?);
                    }
                    None => {
                        tracing::warn!(path = %entry_path.display(), "overlay for an unconfigured alt")
                    }
                }
            } else {
                files.insert(name);
            }
        }

        let primary = primary.unwrap_or_default();
        let model = self
            .models
            .resolve(primary.get("_model").as_deref(), parent_model)
            .clone();
        let id = slug::id_of(&path).to_string();
        let hidden = parent_hidden
            || model.hidden
            || self.is_hidden_id(&id)
            || is_flagged_hidden(&primary);

        let mut attachments = Vec::new();
        for name in &files {
            if name.ends_with(CONTENT_EXT) {
                let owner = &name[..name.len() - CONTENT_EXT.len()];
                if !files.contains(owner) {
                    tracing::debug!(file = %name, "ignoring stray content file");
                }
                continue;
            }
            if !slug::is_valid_id(name) {
                tracing::warn!(file = %name, "skipping attachment with invalid id");
                continue;
            }
            let fs_path = dir.join(name);
            let sidecar_name = format!("{name}{CONTENT_EXT}");
            let sidecar = if files.contains(&sidecar_name) {
                read_content(&dir.join(&sidecar_name))?
            } else {
                ContentFile::default()
            };
            let att_path = slug::join_path(&path, name);
            let att_hidden = hidden || self.is_hidden_id(name) || is_flagged_hidden(&sidecar);
            attachments.push(att_path.clone());
            self.nodes.insert(
                att_path.clone(),
                Node {
                    path: att_path,
                    id: name.clone(),
                    kind: NodeKind::Attachment,
                    fs_path,
                    primary: sidecar,
                    overlays: BTreeMap::new(),
                    model: NONE_MODEL.to_string(),
                    hidden: att_hidden,
                    children: Vec::new(),
                    attachments: Vec::new(),
                },
            );
        }

        let children: Vec<String> = subdirs
            .iter()
            .map(|(name, _)| slug::join_path(&path, name))
            .collect();

        self.nodes.insert(
            path.clone(),
            Node {
                path: path.clone(),
                id,
                kind: NodeKind::Record,
                fs_path: dir.to_path_buf(),
                primary,
                overlays,
                model: model.id.clone(),
                hidden,
                children: children.clone(),
                attachments,
            },
        );

        for ((_, subdir), child_path) in subdirs.iter().zip(children) {
            self.scan_record(subdir, child_path, Some(&model), hidden)?;
        }
        Ok(())
    }
}

fn is_flagged_hidden(file: &ContentFile) -> bool {
    file.get("_hidden")
        .and_then(|v| parse_bool(&v))
        .unwrap_or(false)
}

fn read_content(path: &Path) -> Result<ContentFile, TreeError> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|_| TreeError::Encoding(path.to_path_buf()))?;
    Ok(ContentFile::parse(&text))
}
