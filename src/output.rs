//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Every record is shown
//! by its label first, with its path and URL as indented context lines, so a
//! listing reads like a table of contents while still letting users trace an
//! entry back to `content/`.
//!
//! # Output Format
//!
//! ## Record info
//!
//! ```text
//! Blog → /blog/
//!     Path: /blog
//!     Model: blog
//!     Alts: English, German (missing)
//! Children
//! 001 Post 2
//!     Path: /blog/post2
//! 002 Post 1
//!     Path: /blog/post1
//! ```
//!
//! ## Find
//!
//! ```text
//! 001 Post 1
//!     Path: /blog/post1
//!     In: Welcome › Blog
//! ```
//!
//! ## Build
//!
//! ```text
//! built index.html
//! built blog/index.html
//! finished: 28 built, 0 cached, 0 failed, 0 pruned
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function returning `Vec<String>`; the binary
//! prints the lines or, with `--json`, the serialized value instead. Format
//! functions are pure: no I/O, no side effects.

use crate::events::ProgressEvent;
use crate::resolver::{FindResults, PathInfo, RawRecord, RecordInfo};
use crate::site::ServerList;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// First line of a value, truncated to `max` characters.
fn preview_value(value: &str, max: usize) -> String {
    let first = value.lines().next().unwrap_or("");
    let multiline = value.lines().nth(1).is_some();
    if first.chars().count() > max {
        let cut: String = first.chars().take(max).collect();
        format!("{cut}...")
    } else if multiline {
        format!("{first} ...")
    } else {
        first.to_string()
    }
}

// ============================================================================
// Records
// ============================================================================

pub fn format_record_info(info: &RecordInfo) -> Vec<String> {
    let mut lines = Vec::new();
    match &info.url {
        Some(url) => lines.push(format!("{} → {}", info.label, url)),
        None => lines.push(info.label.clone()),
    }
    lines.push(format!("{}Path: {}", indent(1), info.path));
    if info.is_attachment {
        lines.push(format!("{}Attachment", indent(1)));
    } else {
        lines.push(format!("{}Model: {}", indent(1), info.model));
    }
    if info.is_hidden {
        lines.push(format!("{}Hidden", indent(1)));
    }
    let alts: Vec<String> = info
        .alts
        .iter()
        .map(|a| {
            if a.exists {
                a.name.clone()
            } else {
                format!("{} (missing)", a.name)
            }
        })
        .collect();
    lines.push(format!("{}Alts: {}", indent(1), alts.join(", ")));

    if !info.children.is_empty() {
        lines.push("Children".to_string());
        for (i, child) in info.children.iter().enumerate() {
            let hidden = if child.visible { "" } else { " (hidden)" };
            lines.push(format!("{} {}{}", format_index(i + 1), child.label, hidden));
            lines.push(format!("{}Path: {}", indent(1), child.path));
        }
    }
    if !info.attachments.is_empty() {
        lines.push("Attachments".to_string());
        for (i, att) in info.attachments.iter().enumerate() {
            lines.push(format!("{} {} ({})", format_index(i + 1), att.id, att.kind));
        }
    }
    lines
}

/// One line per ancestor, indented by depth.
pub fn format_path_info(info: &PathInfo) -> Vec<String> {
    info.segments
        .iter()
        .enumerate()
        .map(|(depth, segment)| {
            let label = segment
                .label_i18n
                .values()
                .next()
                .map(String::as_str)
                .unwrap_or(&segment.id);
            let missing = if segment.exists { "" } else { " (missing)" };
            format!("{}{} ({}){}", indent(depth), label, segment.path, missing)
        })
        .collect()
}

pub fn format_raw_record(record: &RawRecord) -> Vec<String> {
    let mut lines = vec![format!("{} [{}] ({})", record.path, record.datamodel.id, record.alt)];
    if record.data.is_empty() {
        lines.push(format!("{}(no fields)", indent(1)));
    }
    for (key, value) in &record.data {
        lines.push(format!("{}{}: {}", indent(1), key, preview_value(value, 60)));
    }
    lines
}

pub fn format_find_results(results: &FindResults) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, hit) in results.results.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), hit.title));
        lines.push(format!("{}Path: {}", indent(1), hit.path));
        if !hit.parents.is_empty() {
            let trail: Vec<&str> = hit.parents.iter().map(|p| p.title.as_str()).collect();
            lines.push(format!("{}In: {}", indent(1), trail.join(" › ")));
        }
    }
    if lines.is_empty() {
        lines.push("No matches".to_string());
    }
    lines
}

// ============================================================================
// Servers and progress
// ============================================================================

pub fn format_server_list(list: &ServerList) -> Vec<String> {
    if list.servers.is_empty() {
        return vec!["No publish targets configured".to_string()];
    }
    list.servers
        .iter()
        .map(|s| {
            let default = if s.default { " (default)" } else { "" };
            format!("{} {} → {}{}", s.id, s.name, s.target, default)
        })
        .collect()
}

/// Text of a progress event; `None` for the terminal event.
///
/// Messages without a `msg` field are shown as compact JSON.
pub fn format_progress_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Terminal => None,
        ProgressEvent::Message(value) => Some(
            event
                .msg()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{AltInfo, AttachmentInfo, ChildInfo, FindHit, ParentRef, PathSegment};
    use std::collections::BTreeMap;

    fn record() -> RecordInfo {
        RecordInfo {
            id: "blog".into(),
            path: "/blog".into(),
            alt: "_primary".into(),
            label: "Blog".into(),
            label_i18n: BTreeMap::new(),
            exists: true,
            is_attachment: false,
            model: "blog".into(),
            is_hidden: false,
            url: Some("/blog/".into()),
            can_have_children: true,
            can_have_attachments: false,
            can_be_deleted: true,
            children: vec![
                ChildInfo {
                    id: "post2".into(),
                    path: "/blog/post2".into(),
                    label: "Post 2".into(),
                    label_i18n: BTreeMap::new(),
                    exists: true,
                    visible: true,
                },
                ChildInfo {
                    id: "draft".into(),
                    path: "/blog/draft".into(),
                    label: "Draft".into(),
                    label_i18n: BTreeMap::new(),
                    exists: true,
                    visible: false,
                },
            ],
            attachments: vec![AttachmentInfo {
                id: "cover.jpg".into(),
                path: "/blog/cover.jpg".into(),
                kind: "image",
            }],
            alts: vec![
                AltInfo {
                    alt: "_primary".into(),
                    name: "English".into(),
                    name_i18n: BTreeMap::new(),
                    is_primary: true,
                    exists: true,
                },
                AltInfo {
                    alt: "de".into(),
                    name: "German".into(),
                    name_i18n: BTreeMap::new(),
                    is_primary: false,
                    exists: false,
                },
            ],
        }
    }

    #[test]
    fn index_is_zero_padded() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(120), "120");
    }

    #[test]
    fn record_header_shows_label_and_url() {
        let lines = format_record_info(&record());
        assert_eq!(lines[0], "Blog → /blog/");
        assert_eq!(lines[1], "    Path: /blog");
        assert!(lines.contains(&"    Alts: English, German (missing)".to_string()));
    }

    #[test]
    fn record_children_are_numbered() {
        let lines = format_record_info(&record());
        let start = lines.iter().position(|l| l == "Children").unwrap();
        assert_eq!(lines[start + 1], "001 Post 2");
        assert_eq!(lines[start + 3], "002 Draft (hidden)");
        assert!(lines.contains(&"001 cover.jpg (image)".to_string()));
    }

    #[test]
    fn path_info_indents_by_depth() {
        let segment = |id: &str, path: &str, label: &str, exists| PathSegment {
            id: id.into(),
            path: path.into(),
            exists,
            label_i18n: BTreeMap::from([("en".to_string(), label.to_string())]),
            can_have_children: true,
        };
        let info = PathInfo {
            segments: vec![
                segment("", "/", "Welcome", true),
                segment("blog", "/blog", "Blog", true),
                segment("nope", "/blog/nope", "nope", false),
            ],
        };
        assert_eq!(
            format_path_info(&info),
            vec![
                "Welcome (/)",
                "    Blog (/blog)",
                "        nope (/blog/nope) (missing)",
            ]
        );
    }

    #[test]
    fn find_results_show_parent_trail() {
        let results = FindResults {
            results: vec![FindHit {
                id: "post1".into(),
                path: "/blog/post1".into(),
                title: "Post 1".into(),
                parents: vec![
                    ParentRef {
                        path: "/".into(),
                        title: "Welcome".into(),
                    },
                    ParentRef {
                        path: "/blog".into(),
                        title: "Blog".into(),
                    },
                ],
            }],
        };
        assert_eq!(
            format_find_results(&results),
            vec!["001 Post 1", "    Path: /blog/post1", "    In: Welcome › Blog"]
        );
        assert_eq!(
            format_find_results(&FindResults { results: vec![] }),
            vec!["No matches"]
        );
    }

    #[test]
    fn long_values_are_previewed() {
        assert_eq!(preview_value("short", 10), "short");
        assert_eq!(preview_value("abcdefghijkl", 5), "abcde...");
        assert_eq!(preview_value("line one\nline two", 60), "line one ...");
    }

    #[test]
    fn progress_events_show_their_message() {
        let event = ProgressEvent::Message(serde_json::json!({"msg": "built index.html"}));
        assert_eq!(format_progress_event(&event).as_deref(), Some("built index.html"));
        let bare = ProgressEvent::Message(serde_json::json!(5));
        assert_eq!(format_progress_event(&bare).as_deref(), Some("5"));
        assert_eq!(format_progress_event(&ProgressEvent::Terminal), None);
    }
}
