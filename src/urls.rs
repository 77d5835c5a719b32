//! Public URL mapping.
//!
//! Every `(path, alt)` pair in the tree has exactly one canonical URL:
//!
//! | Source | Alt | URL |
//! |--------|-----|-----|
//! | `/` | primary | `/` |
//! | `/` | `de` | `/de/` |
//! | `/blog/post1` (dated 2015-12-12) | primary | `/blog/2015/12/post1/` |
//! | `/blog/post1/hello.txt` | primary | `/blog/2015/12/post1/hello.txt` |
//!
//! Record URLs end in `/`; attachment URLs do not. A record's `_slug` field
//! replaces its id segment, and a model with `url_date_field` inserts the
//! formatted date before it. Non-primary alts prefix everything with their
//! configured `url_prefix`.
//!
//! The reverse index is derived from the forward mapping, so
//! `url_to_path(path_to_url(p, a)) == (p, a)` holds for every pair that does
//! not collide with an earlier one. Collisions keep the first mapping and log
//! a warning.

use crate::config::{Alt, AltSet};
use crate::model::ModelRegistry;
use crate::slug;
use crate::tree::{Node, ResolvedNode, SourceTree};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// Bidirectional map between `(path, alt)` and public URLs.
#[derive(Debug, Clone, Default)]
pub struct UrlMatcher {
    forward: BTreeMap<(String, String), String>,
    reverse: HashMap<String, (String, String)>,
    hidden: HashMap<String, bool>,
}

impl UrlMatcher {
    /// Build the full mapping over the tree inventory.
    pub fn build(tree: &SourceTree, alts: &AltSet, models: &ModelRegistry) -> Self {
        let mut matcher = Self::default();
        for node in tree.nodes() {
            matcher.hidden.insert(node.path.clone(), node.hidden);
            for alt in alts.iter() {
                let Some(url) = matcher.compute(node, alt, models) else {
                    tracing::warn!(path = %node.path, alt = %alt.id, "no URL for node");
                    continue;
                };
                let key = (node.path.clone(), alt.id.clone());
                match matcher.reverse.get(&url) {
                    Some((other, other_alt)) => tracing::warn!(
                        url = %url,
                        path = %node.path,
                        alt = %alt.id,
                        existing = %other,
                        existing_alt = %other_alt,
                        "URL collision, keeping the existing mapping"
                    ),
                    None => {
                        matcher.reverse.insert(url.clone(), key.clone());
                    }
                }
                matcher.forward.insert(key, url);
            }
        }
        tracing::debug!(urls = matcher.forward.len(), "built URL map");
        matcher
    }

    fn compute(&self, node: &Node, alt: &Alt, models: &ModelRegistry) -> Option<String> {
        let Some(parent) = slug::parent_path(&node.path) else {
            return Some(alt.url_prefix.clone());
        };
        let parent_url = self.forward.get(&(parent, alt.id.clone()))?;
        if node.is_attachment() {
            return Some(format!("{parent_url}{}", node.id));
        }
        let resolved = ResolvedNode { node, alt };
        let mut url = parent_url.clone();
        if let Some(segment) = date_segment(&resolved, models) {
            url.push_str(&segment);
            url.push('/');
        }
        url.push_str(&record_slug(&resolved));
        url.push('/');
        Some(url)
    }

    /// Canonical URL of a path in an alt.
    pub fn path_to_url(&self, path: &str, alt: &Alt) -> Option<&str> {
        let path = slug::normalize_path(path)?;
        self.forward.get(&(path, alt.id.clone())).map(String::as_str)
    }

    /// `(path, alt)` behind a public URL.
    ///
    /// Query strings and fragments are ignored, a missing trailing slash is
    /// tolerated and `index.html` maps to its directory.
    pub fn url_to_path(&self, url: &str) -> Option<(&str, &str)> {
        let url = url.split(['?', '#']).next().unwrap_or_default();
        let url = if url.starts_with('/') {
            url.to_string()
        } else {
            format!("/{url}")
        };
        let mut candidates = vec![url.clone()];
        if let Some(dir) = url.strip_suffix("index.html") {
            candidates.push(dir.to_string());
        } else if !url.ends_with('/') {
            candidates.push(format!("{url}/"));
        }
        candidates
            .iter()
            .find_map(|c| self.reverse.get(c))
            .map(|(path, alt)| (path.as_str(), alt.as_str()))
    }

    /// Whether a path is hidden from navigation. Missing paths are hidden.
    pub fn is_hidden(&self, path: &str) -> bool {
        slug::normalize_path(path)
            .and_then(|p| self.hidden.get(&p).copied())
            .unwrap_or(true)
    }

    /// Every `(path, alt id, url)` triple in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.forward
            .iter()
            .map(|((path, alt), url)| (path.as_str(), alt.as_str(), url.as_str()))
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

fn record_slug(node: &ResolvedNode<'_>) -> String {
    node.field("_slug")
        .map(|s| s.trim().trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| node.node.id.clone())
}

fn date_segment(node: &ResolvedNode<'_>, models: &ModelRegistry) -> Option<String> {
    let model = models.get(&node.node.model)?;
    let field = model.url_date_field.as_deref()?;
    let raw = node.field(field)?;
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    let mut out = String::new();
    if write!(out, "{}", date.format(&model.url_date_format)).is_err() {
        tracing::warn!(model = %model.id, format = %model.url_date_format, "invalid url_date_format");
        return None;
    }
    let out = out.trim_matches('/').to_string();
    (!out.is_empty()).then_some(out)
}
