//! Page rendering.
//!
//! The builder turns every `(record, alt)` pair into a [`Page`] and hands it
//! to a [`Renderer`]. The page carries everything a template needs (layered
//! fields with their declared types, breadcrumbs, visible children and
//! attachments) so a renderer never has to reach back into the tree. The
//! serialized page also feeds the builder's change detection: a record is
//! re-rendered exactly when its page value changes.
//!
//! [`HtmlRenderer`] is the stock renderer. It uses
//! [maud](https://maud.lambda.xyz/) for markup, so every interpolated value is
//! escaped, and `pulldown-cmark` for `markdown` fields.

use crate::config::Alt;
use crate::model::FieldType;
use crate::resolver;
use crate::site::Snapshot;
use crate::slug;
use crate::tree::{Node, ResolvedNode};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Parser, html as md_html};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Cannot render {path}: {message}")]
    Template { path: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to render one record in one alt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub path: String,
    pub alt: String,
    pub locale: String,
    pub url: String,
    pub title: String,
    pub model: String,
    pub fields: Vec<PageField>,
    pub breadcrumbs: Vec<PageLink>,
    pub children: Vec<PageLink>,
    pub attachments: Vec<PageLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLink {
    pub title: String,
    pub url: String,
}

/// Renders a page to the bytes of its `index.html`.
pub trait Renderer: Send + Sync {
    /// Stable identifier mixed into change detection; bump it when output
    /// changes for unchanged input.
    fn name(&self) -> &str;

    fn render(&self, page: &Page) -> Result<String, RenderError>;
}

/// Assemble the page for a record in an alt.
pub fn page_for(snap: &Snapshot, node: &Node, alt: &Alt) -> Page {
    let resolved = ResolvedNode { node, alt };
    let model = snap.models.get(&node.model);
    let link = |n: &Node| PageLink {
        title: ResolvedNode { node: n, alt }.label(),
        url: snap
            .urls
            .path_to_url(&n.path, alt)
            .unwrap_or_default()
            .to_string(),
    };

    let fields = resolved
        .fields()
        .into_iter()
        .filter(|(name, _)| !name.starts_with('_') && name != "title")
        .map(|(name, value)| PageField {
            field_type: model.map(|m| m.field_type(&name)).unwrap_or(FieldType::String),
            name,
            value,
        })
        .collect();

    let mut ancestors = slug::ancestors(&node.path);
    ancestors.pop();
    let breadcrumbs = ancestors
        .iter()
        .filter_map(|p| snap.tree.get(p))
        .map(link)
        .collect();

    let children = resolver::sorted_children(snap, node, alt)
        .into_iter()
        .filter(|c| !c.node.hidden)
        .map(|c| link(c.node))
        .collect();

    let attachments = node
        .attachments
        .iter()
        .filter_map(|p| snap.tree.get(p))
        .filter(|a| !a.hidden)
        .map(link)
        .collect();

    Page {
        path: node.path.clone(),
        alt: alt.id.clone(),
        locale: alt.locale.clone(),
        url: snap
            .urls
            .path_to_url(&node.path, alt)
            .unwrap_or_default()
            .to_string(),
        title: resolved.label(),
        model: node.model.clone(),
        fields,
        breadcrumbs,
        children,
        attachments,
    }
}

// ============================================================================
// Stock HTML renderer
// ============================================================================

/// Minimal HTML renderer used when no other renderer is configured.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn name(&self) -> &str {
        "html-1"
    }

    fn render(&self, page: &Page) -> Result<String, RenderError> {
        Ok(render_page(page).into_string())
    }
}

/// Renders the base HTML document structure
fn base_document(title: &str, lang: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang=(lang) {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
            }
            body {
                (content)
            }
        }
    }
}

fn render_links(class: &str, links: &[PageLink]) -> Markup {
    html! {
        @if !links.is_empty() {
            ul class=(class) {
                @for link in links {
                    li { a href=(link.url) { (link.title) } }
                }
            }
        }
    }
}

fn render_field(field: &PageField) -> Markup {
    match field.field_type {
        FieldType::Markdown => {
            let mut body = String::new();
            md_html::push_html(&mut body, Parser::new(&field.value));
            html! { div.field.markdown data-field=(field.name) { (PreEscaped(body)) } }
        }
        FieldType::Html => html! {
            div.field data-field=(field.name) { (PreEscaped(field.value.as_str())) }
        },
        FieldType::Url => html! {
            p.field data-field=(field.name) { a href=(field.value) { (field.value) } }
        },
        _ => html! { p.field data-field=(field.name) { (field.value) } },
    }
}

fn render_page(page: &Page) -> Markup {
    let content = html! {
        @if !page.breadcrumbs.is_empty() {
            nav.breadcrumb {
                @for crumb in &page.breadcrumbs {
                    a href=(crumb.url) { (crumb.title) }
                    " › "
                }
                (page.title)
            }
        }
        main {
            article data-model=(page.model) {
                h1 { (page.title) }
                @for field in &page.fields {
                    (render_field(field))
                }
            }
            (render_links("children", &page.children))
            (render_links("attachments", &page.attachments))
        }
    };
    base_document(&page.title, &page.locale, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Page {
        Page {
            path: "/blog/post1".into(),
            alt: "_primary".into(),
            locale: "en".into(),
            url: "/blog/2015/12/post1/".into(),
            title: "Post 1".into(),
            model: "blog-post".into(),
            fields: vec![
                PageField {
                    name: "body".into(),
                    field_type: FieldType::Markdown,
                    value: "This is **bold**.".into(),
                },
                PageField {
                    name: "summary".into(),
                    field_type: FieldType::String,
                    value: "<script>alert('x')</script>".into(),
                },
            ],
            breadcrumbs: vec![
                PageLink {
                    title: "Welcome".into(),
                    url: "/".into(),
                },
                PageLink {
                    title: "Blog".into(),
                    url: "/blog/".into(),
                },
            ],
            children: vec![],
            attachments: vec![PageLink {
                title: "hello.txt".into(),
                url: "/blog/2015/12/post1/hello.txt".into(),
            }],
        }
    }

    #[test]
    fn renders_document_shell() {
        let html = HtmlRenderer.render(&page()).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Post 1</title>"));
        assert!(html.contains("lang=\"en\""));
    }

    #[test]
    fn markdown_fields_are_converted() {
        let html = HtmlRenderer.render(&page()).unwrap();
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn plain_fields_are_escaped() {
        let html = HtmlRenderer.render(&page()).unwrap();
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn links_and_breadcrumbs() {
        let html = HtmlRenderer.render(&page()).unwrap();
        assert!(html.contains("href=\"/blog/\""));
        assert!(html.contains("href=\"/blog/2015/12/post1/hello.txt\""));
        assert!(!html.contains("class=\"children\""));
    }
}
