//! Write operations on the content tree.
//!
//! Every operation validates its whole input before touching disk, so a
//! rejected request never leaves a partial write. Content files are replaced
//! through a hidden temporary sibling and a rename. Nothing here updates the
//! snapshot; [`Site`](crate::site::Site) rescans after each call.

use crate::contents::ContentFile;
use crate::resolver::{self, model_of};
use crate::site::{ApiError, Snapshot};
use crate::slug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// One uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRecordOutcome {
    pub valid_id: bool,
    pub exists: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub bad_upload: bool,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub okay: bool,
}

/// How much of a record [`delete_record`] removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// The record directory with every alt, attachment and descendant.
    #[default]
    AllAlts,
    /// Only the content file of the requested alt.
    AltOnly,
}

/// Write `bytes` to `path` via a temporary file in the same directory.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_or_default(path: &Path) -> Result<ContentFile, ApiError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(ContentFile::parse(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ContentFile::default()),
        Err(e) => Err(e.into()),
    }
}

fn check_field_names<'a>(names: impl IntoIterator<Item = &'a String>) -> Result<(), ApiError> {
    let bad: BTreeMap<String, String> = names
        .into_iter()
        .filter(|name| !slug::is_valid_field_name(name))
        .map(|name| (name.clone(), "invalid field name".to_string()))
        .collect();
    if bad.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidParams(bad))
    }
}

/// Apply field edits to the node's own file in `alt`. `None` deletes a
/// field. Returns whether the file changed.
///
/// Untouched fields keep their exact bytes. An overlay or sidecar left
/// without content is deleted; the primary `contents.lr` is kept.
pub fn set_raw_record(
    snap: &Snapshot,
    path: &str,
    alt: &str,
    data: &BTreeMap<String, Option<String>>,
) -> Result<bool, ApiError> {
    let alt = resolver::alt(snap, alt)?;
    let node = snap.tree.lookup(path)?;
    check_field_names(data.keys())?;

    let file_path = node.fields_file(alt);
    let mut file = read_or_default(&file_path)?;
    let mut changed = false;
    for (key, value) in data {
        match value {
            Some(value) if file.get(key).as_deref() != Some(value.as_str()) => {
                file.set(key, value);
                changed = true;
            }
            Some(_) => {}
            None => changed |= file.remove(key),
        }
    }
    if !changed {
        tracing::debug!(path = %node.path, alt = %alt.id, "no field changes");
        return Ok(false);
    }

    let text = file.to_string();
    let keep_empty = alt.is_primary && !node.is_attachment();
    if text.trim().is_empty() && !keep_empty {
        remove_if_exists(&file_path)?;
    } else {
        write_atomic(&file_path, text.as_bytes())?;
    }
    tracing::info!(path = %node.path, alt = %alt.id, file = %file_path.display(), "updated record");
    Ok(true)
}

/// Create a child record of `parent`.
///
/// An invalid id or an existing child is a soft outcome, not an error. The
/// new record's model is written as `_model` only when it differs from the
/// model the parent implies, and always to the primary file whatever `alt`
/// is; `data` goes to the content file of `alt`.
pub fn create_record(
    snap: &Snapshot,
    parent: &str,
    id: &str,
    alt: &str,
    model: Option<&str>,
    data: &BTreeMap<String, String>,
) -> Result<NewRecordOutcome, ApiError> {
    let alt = resolver::alt(snap, alt)?;
    let parent = snap.tree.lookup(parent)?;
    if !slug::is_valid_id(id) || shadows_alt_prefix(snap, &parent.path, id) {
        return Ok(NewRecordOutcome {
            valid_id: false,
            exists: false,
            path: None,
        });
    }
    let parent_model = model_of(snap, parent);
    if parent.is_attachment() || !parent_model.can_have_children {
        return Err(ApiError::invalid("path", format!("{} cannot have children", parent.path)));
    }

    let path = slug::join_path(&parent.path, id);
    let dir = parent.fs_path.join(id);
    if snap.tree.get(&path).is_some() || dir.exists() {
        return Ok(NewRecordOutcome {
            valid_id: true,
            exists: true,
            path: Some(path),
        });
    }

    check_field_names(data.keys())?;
    let implied = &snap.models.implied_child_model(Some(parent_model)).id;
    let model = model.map(str::trim).filter(|m| !m.is_empty());
    if let Some(model) = model
        && snap.models.get(model).is_none()
    {
        return Err(ApiError::invalid("model", format!("unknown model '{model}'")));
    }

    // The scanner only reads _model from the primary file
    let mut primary = ContentFile::default();
    if let Some(model) = model
        && model != implied
    {
        primary.set("_model", model);
    }
    let mut overlay = ContentFile::default();
    let file = if alt.is_primary { &mut primary } else { &mut overlay };
    for (key, value) in data {
        file.set(key, value);
    }
    fs::create_dir(&dir)?;
    if !alt.is_primary {
        write_atomic(&dir.join(alt.content_filename()), overlay.to_string().as_bytes())?;
    }
    if alt.is_primary || !primary.is_empty() {
        write_atomic(&dir.join("contents.lr"), primary.to_string().as_bytes())?;
    }
    tracing::info!(path = %path, alt = %alt.id, "created record");
    Ok(NewRecordOutcome {
        valid_id: true,
        exists: false,
        path: Some(path),
    })
}

/// A top-level id equal to an alt's first URL segment would claim that
/// alt's root URL.
fn shadows_alt_prefix(snap: &Snapshot, parent: &str, id: &str) -> bool {
    parent == "/"
        && snap
            .alts
            .iter()
            .filter(|a| !a.is_primary)
            .any(|a| a.url_prefix.trim_matches('/').split('/').next() == Some(id))
}

/// Store uploaded files as attachments of the record at `path`.
///
/// Nothing is written unless every file is acceptable.
pub fn upload_attachments(
    snap: &Snapshot,
    path: &str,
    alt: &str,
    uploads: &[Upload],
) -> Result<UploadOutcome, ApiError> {
    resolver::alt(snap, alt)?;
    let path = resolver::normalize(path)?;
    if uploads.is_empty() {
        return Err(ApiError::invalid("file", "no files uploaded"));
    }
    let bad = |path: String| {
        tracing::warn!(path = %path, "rejected upload");
        Ok(UploadOutcome {
            bad_upload: true,
            path,
        })
    };
    let Some(node) = snap.tree.get(&path) else {
        return bad(path);
    };
    if node.is_attachment() || !model_of(snap, node).can_upload {
        return bad(path);
    }
    let acceptable = |name: &str| {
        slug::is_valid_id(name) && !name.ends_with(".lr") && !node.fs_path.join(name).is_dir()
    };
    if !uploads.iter().all(|u| acceptable(&u.filename)) {
        return bad(path);
    }

    for upload in uploads {
        write_atomic(&node.fs_path.join(&upload.filename), &upload.data)?;
        tracing::info!(record = %path, file = %upload.filename, bytes = upload.data.len(), "stored attachment");
    }
    Ok(UploadOutcome {
        bad_upload: false,
        path,
    })
}

/// Delete a record or attachment.
///
/// Attachments go together with their metadata sidecar. For records,
/// `scope` decides between the whole directory and one alt's content file;
/// a directory emptied by the latter is removed as well.
pub fn delete_record(
    snap: &Snapshot,
    path: &str,
    alt: &str,
    scope: DeleteScope,
) -> Result<DeleteOutcome, ApiError> {
    let alt = resolver::alt(snap, alt)?;
    let node = snap.tree.lookup(path)?;
    if node.path == "/" {
        return Err(ApiError::invalid("path", "the root record cannot be deleted"));
    }

    let okay = if node.is_attachment() {
        let removed = remove_if_exists(&node.fs_path)?;
        remove_if_exists(&node.fields_file(alt))?;
        removed
    } else {
        match scope {
            DeleteScope::AllAlts => {
                fs::remove_dir_all(&node.fs_path)?;
                true
            }
            DeleteScope::AltOnly => {
                let removed = remove_if_exists(&node.fs_path.join(alt.content_filename()))?;
                if fs::read_dir(&node.fs_path)?.next().is_none() {
                    fs::remove_dir(&node.fs_path)?;
                }
                removed
            }
        }
    };
    tracing::info!(path = %node.path, alt = %alt.id, ?scope, okay, "deleted");
    Ok(DeleteOutcome { okay })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    fn edits(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    // =========================================================================
    // set_raw_record
    // =========================================================================

    #[test]
    fn deleting_a_field_keeps_other_bytes() {
        let (tmp, site) = open_demo();
        let file = tmp.path().join("content/blog/post1/contents.lr");
        let changed = set_raw_record(&site.snapshot(), "/blog/post1", "_primary", &edits(&[("pub_date", None)])).unwrap();
        assert!(changed);
        assert_eq!(
            fs::read_to_string(file).unwrap(),
            "title: Post 1\n---\nbody: First post.\n"
        );
    }

    #[test]
    fn setting_a_field_rewrites_only_its_block() {
        let (tmp, site) = open_demo();
        let file = tmp.path().join("content/blog/post1/contents.lr");
        set_raw_record(&site.snapshot(), "/blog/post1", "_primary", &edits(&[("title", Some("First"))])).unwrap();
        assert_eq!(
            fs::read_to_string(file).unwrap(),
            "title: First\n---\npub_date: 2015-12-12\n---\nbody: First post.\n"
        );
    }

    #[test]
    fn unchanged_values_do_not_write() {
        let (_tmp, site) = open_demo();
        let changed = set_raw_record(&site.snapshot(), "/blog", "_primary", &edits(&[("title", Some("Blog"))])).unwrap();
        assert!(!changed);
    }

    #[test]
    fn invalid_field_names_are_rejected_without_writing() {
        let (tmp, site) = open_demo();
        let file = tmp.path().join("content/blog/contents.lr");
        let before = fs::read_to_string(&file).unwrap();
        let err = set_raw_record(
            &site.snapshot(),
            "/blog",
            "_primary",
            &edits(&[("title", Some("New")), ("bad name", Some("x"))]),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParams(ref m) if m.contains_key("bad name")));
        assert_eq!(fs::read_to_string(&file).unwrap(), before);
    }

    #[test]
    fn overlay_is_created_and_removed_when_emptied() {
        let (tmp, site) = open_demo();
        let overlay = tmp.path().join("content/blog/contents+de.lr");
        set_raw_record(&site.snapshot(), "/blog", "de", &edits(&[("title", Some("Tagebuch"))])).unwrap();
        assert_eq!(fs::read_to_string(&overlay).unwrap(), "title: Tagebuch\n");
        site.reload().unwrap();
        set_raw_record(&site.snapshot(), "/blog", "de", &edits(&[("title", None)])).unwrap();
        assert!(!overlay.exists());
    }

    #[test]
    fn attachment_fields_go_to_the_sidecar() {
        let (tmp, site) = open_demo();
        set_raw_record(&site.snapshot(), "/hello.txt", "de", &edits(&[("description", Some("hi"))])).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("content/hello.txt.lr")).unwrap(),
            "description: hi\n"
        );
    }

    // =========================================================================
    // create_record
    // =========================================================================

    #[test]
    fn dotted_id_is_not_valid() {
        let (_tmp, site) = open_demo();
        let outcome = create_record(&site.snapshot(), "/", ".new", "_primary", None, &BTreeMap::new()).unwrap();
        assert!(!outcome.valid_id);
        assert_eq!(outcome.path, None);
    }

    #[test]
    fn new_child_gets_a_content_file() {
        let (tmp, site) = open_demo();
        let data = BTreeMap::from([("title".to_string(), "Flute".to_string())]);
        let outcome = create_record(&site.snapshot(), "/projects", "flute", "_primary", Some("project"), &data).unwrap();
        assert_eq!(
            outcome,
            NewRecordOutcome {
                valid_id: true,
                exists: false,
                path: Some("/projects/flute".into()),
            }
        );
        // project is the implied child model, so no _model line
        assert_eq!(
            fs::read_to_string(tmp.path().join("content/projects/flute/contents.lr")).unwrap(),
            "title: Flute\n"
        );
    }

    #[test]
    fn explicit_model_differing_from_implied_is_written() {
        let (tmp, site) = open_demo();
        create_record(&site.snapshot(), "/blog", "about", "_primary", Some("page"), &BTreeMap::new()).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("content/blog/about/contents.lr")).unwrap(),
            "_model: page\n"
        );
    }

    #[test]
    fn creating_in_an_alt_writes_the_overlay() {
        let (tmp, site) = open_demo();
        create_record(&site.snapshot(), "/", "neu", "de", None, &BTreeMap::new()).unwrap();
        assert!(tmp.path().join("content/neu/contents+de.lr").is_file());
        assert!(!tmp.path().join("content/neu/contents.lr").exists());
    }

    #[test]
    fn explicit_model_in_an_alt_lands_in_the_primary_file() {
        let (tmp, site) = open_demo();
        let data = BTreeMap::from([("title".to_string(), "Impressum".to_string())]);
        create_record(&site.snapshot(), "/blog", "about", "de", Some("page"), &data).unwrap();
        let dir = tmp.path().join("content/blog/about");
        assert_eq!(fs::read_to_string(dir.join("contents.lr")).unwrap(), "_model: page\n");
        assert_eq!(fs::read_to_string(dir.join("contents+de.lr")).unwrap(), "title: Impressum\n");
        site.reload().unwrap();
        let snap = site.snapshot();
        let node = snap.tree.get("/blog/about").unwrap();
        assert_eq!(model_of(&snap, node).id, "page");
    }

    #[test]
    fn top_level_id_matching_an_alt_prefix_is_not_valid() {
        let (tmp, site) = open_demo();
        let outcome = create_record(&site.snapshot(), "/", "de", "_primary", None, &BTreeMap::new()).unwrap();
        assert!(!outcome.valid_id);
        assert!(!tmp.path().join("content/de").exists());
        let nested = create_record(&site.snapshot(), "/projects", "de", "_primary", None, &BTreeMap::new()).unwrap();
        assert!(nested.valid_id);
    }

    #[test]
    fn existing_child_is_reported() {
        let (_tmp, site) = open_demo();
        let outcome = create_record(&site.snapshot(), "/projects", "wolf", "_primary", None, &BTreeMap::new()).unwrap();
        assert!(outcome.valid_id);
        assert!(outcome.exists);
    }

    #[test]
    fn parents_without_children_are_rejected() {
        let (_tmp, site) = open_demo();
        let snap = site.snapshot();
        let err = create_record(&snap, "/blog/post1", "x", "_primary", None, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidParams(ref m) if m.contains_key("path")));
        let err = create_record(&snap, "/hello.txt", "x", "_primary", None, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidParams(_)));
        let err = create_record(&snap, "/", "x", "_primary", Some("nope"), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidParams(ref m) if m.contains_key("model")));
    }

    // =========================================================================
    // upload_attachments
    // =========================================================================

    fn upload(name: &str) -> Upload {
        Upload {
            filename: name.into(),
            data: b"data".to_vec(),
        }
    }

    #[test]
    fn upload_stores_files() {
        let (tmp, site) = open_demo();
        let outcome = upload_attachments(&site.snapshot(), "/projects/wolf", "_primary", &[upload("wolf.png")]).unwrap();
        assert!(!outcome.bad_upload);
        assert_eq!(fs::read(tmp.path().join("content/projects/wolf/wolf.png")).unwrap(), b"data");
    }

    #[test]
    fn bad_uploads_write_nothing() {
        let (tmp, site) = open_demo();
        let snap = site.snapshot();
        let bad = |path: &str, files: &[Upload]| upload_attachments(&snap, path, "_primary", files).unwrap().bad_upload;
        assert!(bad("/missing", &[upload("a.txt")]));
        assert!(bad("/hello.txt", &[upload("a.txt")]));
        // the blog model disables attachments
        assert!(bad("/blog", &[upload("a.txt")]));
        assert!(bad("/", &[upload("ok.txt"), upload(".secret")]));
        assert!(bad("/", &[upload("contents+fr.lr")]));
        assert!(bad("/", &[upload("blog")]));
        assert!(!tmp.path().join("content/ok.txt").exists());
    }

    #[test]
    fn upload_without_files_is_invalid() {
        let (_tmp, site) = open_demo();
        let err = upload_attachments(&site.snapshot(), "/", "_primary", &[]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidParams(ref m) if m.contains_key("file")));
        let err = upload_attachments(&site.snapshot(), "/", "fr", &[upload("a.txt")]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidParams(ref m) if m.contains_key("alt")));
    }

    // =========================================================================
    // delete_record
    // =========================================================================

    #[test]
    fn delete_removes_the_record_directory() {
        let (tmp, site) = open_demo();
        let outcome = delete_record(&site.snapshot(), "/blog/post1", "_primary", DeleteScope::AllAlts).unwrap();
        assert!(outcome.okay);
        assert!(!tmp.path().join("content/blog/post1").exists());
    }

    #[test]
    fn delete_alt_only_keeps_the_primary() {
        let (tmp, site) = open_demo();
        let dir = tmp.path().join("content/projects/bagpipe");
        let outcome = delete_record(&site.snapshot(), "/projects/bagpipe", "de", DeleteScope::AltOnly).unwrap();
        assert!(outcome.okay);
        assert!(!dir.join("contents+de.lr").exists());
        assert!(dir.join("contents.lr").is_file());

        let again = delete_record(&site.snapshot(), "/projects/wolf", "de", DeleteScope::AltOnly).unwrap();
        assert!(!again.okay);
    }

    #[test]
    fn delete_attachment_takes_its_sidecar() {
        let (tmp, site) = open_demo();
        let content = tmp.path().join("content");
        fs::write(content.join("hello.txt.lr"), "description: hi\n").unwrap();
        site.reload().unwrap();
        delete_record(&site.snapshot(), "/hello.txt", "_primary", DeleteScope::AllAlts).unwrap();
        assert!(!content.join("hello.txt").exists());
        assert!(!content.join("hello.txt.lr").exists());
    }

    #[test]
    fn root_and_missing_paths_cannot_be_deleted() {
        let (_tmp, site) = open_demo();
        let snap = site.snapshot();
        assert!(matches!(
            delete_record(&snap, "/", "_primary", DeleteScope::AllAlts),
            Err(ApiError::InvalidParams(_))
        ));
        assert!(matches!(
            delete_record(&snap, "/nope", "_primary", DeleteScope::AllAlts),
            Err(ApiError::NotFound(_))
        ));
    }
}
