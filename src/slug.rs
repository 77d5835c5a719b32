//! Identifier and path rules shared by records and attachments.
//!
//! Every node in the content tree is addressed by a slash-delimited path whose
//! segments are filesystem-safe ids:
//!
//! - `/` is the root record
//! - `/blog` is the `blog` directory under `content/`
//! - `/blog/post1/hello.txt` is an attachment beside `post1`'s content file
//!
//! ## Ids
//!
//! An id is non-empty, never starts with a dot, and uses only alphanumerics,
//! `-`, `_` and `.`. This keeps ids safe to use as directory names and URL
//! segments on every platform without escaping.
//!
//! ## Display labels
//!
//! Records without a `title` field fall back to their id with dashes and
//! underscores turned into spaces, mirroring how filenames become titles:
//! - `coffee-machine` → "coffee machine"
//! - `my_notes` → "my notes"

/// Canonical name of the primary alt in every operation result.
pub const PRIMARY_ALT: &str = "_primary";

/// Label used for the root record when it has no title.
const ROOT_LABEL: &str = "Index";

/// Whether `id` is usable as a record or attachment id.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Whether `name` is usable as a field name in a content file.
pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Normalize a node path.
///
/// Accepts optional leading and trailing slashes and collapses repeated
/// separators: `"blog/post1/"` and `"//blog//post1"` both become
/// `"/blog/post1"`. The empty string is the root. Returns `None` when any
/// segment is not a valid id (including `.` and `..`).
pub fn normalize_path(path: &str) -> Option<String> {
    let segments = split_segments(path);
    if segments.iter().any(|s| !is_valid_id(s)) {
        return None;
    }
    Some(format!("/{}", segments.join("/")))
}

/// Non-empty segments of a path, in order.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a child id onto a normalized parent path.
pub fn join_path(parent: &str, id: &str) -> String {
    if parent == "/" {
        format!("/{id}")
    } else {
        format!("{parent}/{id}")
    }
}

/// Parent of a normalized path, `None` for the root.
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(pos) => Some(path[..pos].to_string()),
        None => None,
    }
}

/// Every ancestor of a normalized path, root first, including the path itself.
///
/// `"/blog/post2"` → `["/", "/blog", "/blog/post2"]`
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let mut current = String::new();
    for segment in split_segments(path) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// Last segment of a normalized path; empty for the root.
pub fn id_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Fallback label for a node without a title.
pub fn display_label(id: &str) -> String {
    if id.is_empty() {
        return ROOT_LABEL.to_string();
    }
    id.replace(['-', '_'], " ")
}
