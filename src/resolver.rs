//! Read operations over a [`Snapshot`].
//!
//! Each function returns a plain `Serialize` record; an HTTP or CLI adapter
//! decides how to encode it. Nothing here touches the filesystem.

use crate::config::Alt;
use crate::model::{DataModel, FieldType};
use crate::site::{ApiError, Snapshot};
use crate::slug;
use crate::tree::{Node, ResolvedNode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Most results `find` returns.
pub const MAX_FIND_RESULTS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct RecordInfo {
    pub id: String,
    pub path: String,
    pub alt: String,
    pub label: String,
    pub label_i18n: BTreeMap<String, String>,
    pub exists: bool,
    pub is_attachment: bool,
    pub model: String,
    pub is_hidden: bool,
    pub url: Option<String>,
    pub can_have_children: bool,
    pub can_have_attachments: bool,
    pub can_be_deleted: bool,
    pub children: Vec<ChildInfo>,
    pub attachments: Vec<AttachmentInfo>,
    pub alts: Vec<AltInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildInfo {
    pub id: String,
    pub path: String,
    pub label: String,
    pub label_i18n: BTreeMap<String, String>,
    /// Whether the child has content of its own in the requested alt.
    pub exists: bool,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentInfo {
    pub id: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AltInfo {
    pub alt: String,
    pub name: String,
    pub name_i18n: BTreeMap<String, String>,
    pub is_primary: bool,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathInfo {
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathSegment {
    pub id: String,
    pub path: String,
    pub exists: bool,
    pub label_i18n: BTreeMap<String, String>,
    pub can_have_children: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewInfo {
    pub exists: bool,
    pub url: Option<String>,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlMatch {
    pub exists: bool,
    pub path: Option<String>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindResults {
    pub results: Vec<FindHit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindHit {
    pub id: String,
    pub path: String,
    pub title: String,
    pub parents: Vec<ParentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentRef {
    pub path: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawRecord {
    pub path: String,
    pub alt: String,
    pub data: BTreeMap<String, String>,
    pub datamodel: DataModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRecordInfo {
    pub label: String,
    pub can_have_children: bool,
    pub implied_model: Option<String>,
    pub available_models: Vec<ModelRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAttachmentInfo {
    pub label: String,
    pub can_upload: bool,
}

// =============================================================================
// Helpers shared with rendering and building
// =============================================================================

/// Look up an alt by name, accepting `_primary` and the primary's alias.
pub(crate) fn alt<'a>(snap: &'a Snapshot, name: &str) -> Result<&'a Alt, ApiError> {
    snap.alts
        .get(name)
        .ok_or_else(|| ApiError::invalid("alt", format!("unknown alt '{name}'")))
}

/// Normalize a caller-supplied path.
pub(crate) fn normalize(path: &str) -> Result<String, ApiError> {
    slug::normalize_path(path).ok_or_else(|| ApiError::invalid("path", format!("invalid path '{path}'")))
}

pub(crate) fn model_of<'a>(snap: &'a Snapshot, node: &Node) -> &'a DataModel {
    snap.models
        .get(&node.model)
        .unwrap_or_else(|| snap.models.implied_child_model(None))
}

fn can_have_children(snap: &Snapshot, node: &Node) -> bool {
    !node.is_attachment() && model_of(snap, node).can_have_children
}

fn labels(alt: &Alt, label: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(alt.locale.clone(), label.to_string())])
}

fn attachment_kind(id: &str) -> &'static str {
    let ext = id.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "avif" | "svg") => "image",
        Some("mp4" | "webm" | "mov") => "video",
        Some("mp3" | "ogg" | "wav" | "flac") => "audio",
        Some("txt" | "md" | "csv" | "json" | "xml") => "text",
        _ => "other",
    }
}

/// Children of a record viewed in `alt`, sorted by the owning model's
/// ordering declaration. Every child resolves through the primary alt, so
/// none are dropped for lacking an overlay in `alt`.
pub fn sorted_children<'a>(snap: &'a Snapshot, node: &'a Node, alt: &'a Alt) -> Vec<ResolvedNode<'a>> {
    let children: Vec<ResolvedNode<'a>> = node
        .children
        .iter()
        .filter_map(|p| snap.tree.get(p))
        .map(|child| ResolvedNode { node: child, alt })
        .collect();
    let order = &model_of(snap, node).child_order;
    if order.is_empty() {
        return children;
    }
    let child_models: Vec<&DataModel> = children
        .iter()
        .filter_map(|c| snap.models.get(&c.node.model))
        .collect();
    let field_type = |field: &str| {
        child_models
            .iter()
            .find(|m| m.field(field).is_some())
            .map(|m| m.field_type(field))
            .unwrap_or(FieldType::String)
    };
    order.sort(children, field_type, |child, field| child.field(field))
}

// =============================================================================
// Operations
// =============================================================================

pub fn record_info(snap: &Snapshot, path: &str, alt: &str) -> Result<RecordInfo, ApiError> {
    let alt = self::alt(snap, alt)?;
    let node = snap.tree.lookup(path)?;
    let resolved = ResolvedNode { node, alt };
    let label = resolved.label();
    let model = model_of(snap, node);

    let children = if node.is_attachment() {
        Vec::new()
    } else {
        sorted_children(snap, node, alt)
            .into_iter()
            .map(|child| {
                let label = child.label();
                ChildInfo {
                    id: child.node.id.clone(),
                    path: child.node.path.clone(),
                    label_i18n: labels(alt, &label),
                    label,
                    exists: child.exists(),
                    visible: !child.node.hidden,
                }
            })
            .collect()
    };

    let attachments = node
        .attachments
        .iter()
        .filter_map(|p| snap.tree.get(p))
        .map(|att| AttachmentInfo {
            id: att.id.clone(),
            path: att.path.clone(),
            kind: attachment_kind(&att.id),
        })
        .collect();

    let mut alts: Vec<AltInfo> = snap
        .tree
        .alts(node, &snap.alts)
        .into_iter()
        .map(|status| AltInfo {
            alt: status.alt.id.clone(),
            name: status.alt.name.clone(),
            name_i18n: labels(alt, &status.alt.name),
            is_primary: status.alt.is_primary,
            exists: status.exists,
        })
        .collect();
    alts.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(RecordInfo {
        id: node.id.clone(),
        path: node.path.clone(),
        alt: alt.id.clone(),
        label_i18n: labels(alt, &label),
        label,
        exists: resolved.exists(),
        is_attachment: node.is_attachment(),
        model: model.id.clone(),
        is_hidden: node.hidden,
        url: snap.urls.path_to_url(&node.path, alt).map(str::to_string),
        can_have_children: can_have_children(snap, node),
        can_have_attachments: !node.is_attachment() && model.can_upload,
        can_be_deleted: node.path != "/",
        children,
        attachments,
        alts,
    })
}

pub fn path_info(snap: &Snapshot, path: &str) -> Result<PathInfo, ApiError> {
    let path = normalize(path)?;
    let primary = snap.alts.primary();
    let segments = slug::ancestors(&path)
        .into_iter()
        .map(|p| {
            let id = slug::id_of(&p).to_string();
            match snap.tree.get(&p) {
                Some(node) => PathSegment {
                    label_i18n: labels(primary, &ResolvedNode { node, alt: primary }.label()),
                    can_have_children: can_have_children(snap, node),
                    exists: true,
                    id,
                    path: p,
                },
                None => PathSegment {
                    label_i18n: labels(primary, &slug::display_label(&id)),
                    can_have_children: false,
                    exists: false,
                    id,
                    path: p,
                },
            }
        })
        .collect();
    Ok(PathInfo { segments })
}

pub fn preview_info(snap: &Snapshot, path: &str, alt: &str) -> Result<PreviewInfo, ApiError> {
    let alt = self::alt(snap, alt)?;
    let path = normalize(path)?;
    Ok(PreviewInfo {
        exists: snap.tree.get(&path).is_some(),
        url: snap.urls.path_to_url(&path, alt).map(str::to_string),
        is_hidden: snap.urls.is_hidden(&path),
    })
}

pub fn match_url(snap: &Snapshot, url: &str) -> UrlMatch {
    match snap.urls.url_to_path(url) {
        Some((path, alt)) => UrlMatch {
            exists: true,
            path: Some(path.to_string()),
            alt: Some(alt.to_string()),
        },
        None => UrlMatch {
            exists: false,
            path: None,
            alt: None,
        },
    }
}

/// Search record labels in `alt`.
///
/// Exact matches rank before prefix matches, which rank before substring
/// matches; ties keep path order. Titles are reported in the alt whose locale
/// is `lang` when the record has content there.
pub fn find(snap: &Snapshot, query: &str, alt: &str, lang: &str) -> Result<FindResults, ApiError> {
    let alt = self::alt(snap, alt)?;
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(FindResults { results: Vec::new() });
    }
    let display_alt = snap
        .alts
        .iter()
        .find(|a| a.locale == lang)
        .unwrap_or(alt);
    let title_of = |node: &Node| {
        let shown = if node.exists_in(display_alt) { display_alt } else { alt };
        ResolvedNode { node, alt: shown }.label()
    };

    let mut hits: Vec<(u8, &Node)> = snap
        .tree
        .nodes()
        .filter(|n| !n.is_attachment())
        .filter_map(|node| {
            let label = ResolvedNode { node, alt }.label().to_lowercase();
            let rank = if label == needle {
                0
            } else if label.starts_with(&needle) {
                1
            } else if label.contains(&needle) {
                2
            } else {
                return None;
            };
            Some((rank, node))
        })
        .collect();
    hits.sort_by_key(|(rank, _)| *rank);
    hits.truncate(MAX_FIND_RESULTS);

    let results = hits
        .into_iter()
        .map(|(_, node)| {
            let mut ancestors = slug::ancestors(&node.path);
            ancestors.pop();
            FindHit {
                id: node.id.clone(),
                path: node.path.clone(),
                title: title_of(node),
                parents: ancestors
                    .iter()
                    .filter_map(|p| snap.tree.get(p))
                    .map(|parent| ParentRef {
                        path: parent.path.clone(),
                        title: title_of(parent),
                    })
                    .collect(),
            }
        })
        .collect();
    Ok(FindResults { results })
}

/// Fields stored in the node's own file for `alt`, without layering.
pub fn raw_record(snap: &Snapshot, path: &str, alt: &str) -> Result<RawRecord, ApiError> {
    let alt = self::alt(snap, alt)?;
    let node = snap.tree.lookup(path)?;
    let file = if alt.is_primary || node.is_attachment() {
        Some(&node.primary)
    } else {
        node.overlay(alt)
    };
    Ok(RawRecord {
        path: node.path.clone(),
        alt: alt.id.clone(),
        data: file
            .map(|f| f.fields().into_iter().collect())
            .unwrap_or_default(),
        datamodel: model_of(snap, node).clone(),
    })
}

pub fn new_record_info(snap: &Snapshot, path: &str, alt: &str) -> Result<NewRecordInfo, ApiError> {
    let alt = self::alt(snap, alt)?;
    let node = snap.tree.lookup(path)?;
    let allowed = can_have_children(snap, node);
    Ok(NewRecordInfo {
        label: ResolvedNode { node, alt }.label(),
        can_have_children: allowed,
        implied_model: allowed.then(|| {
            snap.models
                .implied_child_model(Some(model_of(snap, node)))
                .id
                .clone()
        }),
        available_models: snap
            .models
            .iter()
            .map(|m| ModelRef {
                id: m.id.clone(),
                name: m.name.clone(),
            })
            .collect(),
    })
}

pub fn new_attachment_info(snap: &Snapshot, path: &str) -> Result<NewAttachmentInfo, ApiError> {
    let node = snap.tree.lookup(path)?;
    let primary = snap.alts.primary();
    Ok(NewAttachmentInfo {
        label: ResolvedNode { node, alt: primary }.label(),
        can_upload: !node.is_attachment() && model_of(snap, node).can_upload,
    })
}

/// File backing a node in an alt.
pub fn source_path(snap: &Snapshot, path: &str, alt: &str) -> Result<PathBuf, ApiError> {
    let alt = self::alt(snap, alt)?;
    let node = snap.tree.lookup(path)?;
    Ok(node.source_file(alt))
}
