//! Data models.
//!
//! Every record is governed by a model declared in `models/<id>.toml`:
//!
//! ```toml
//! [model]
//! name = "Blog Post"
//! url_date_field = "pub_date"   # Adds /YYYY/MM/ before the record's slug
//! url_date_format = "%Y/%m"
//!
//! [children]
//! enabled = false               # can_have_children
//! model = "comment"             # Default model for new children
//! order_by = "-pub_date, title"
//!
//! [attachments]
//! enabled = true                # can_upload
//!
//! [fields.title]
//! type = "string"
//! label = "Title"
//!
//! [fields.pub_date]
//! type = "date"
//! ```
//!
//! Model files are parsed once per snapshot into typed [`DataModel`] values,
//! ordering declarations included. A record picks its model from its own
//! `_model` field, then from its parent's `[children] model`, then `page` if
//! such a model exists, and finally the implicit `none` model, which allows
//! everything and declares no fields.

use crate::order::OrderSpec;
use crate::slug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Directory holding model files, relative to the project root.
pub const MODELS_DIR: &str = "models";

/// Id of the implicit catch-all model.
pub const NONE_MODEL: &str = "none";

/// Model used when neither the record nor its parent names one.
const DEFAULT_MODEL: &str = "page";

const DEFAULT_URL_DATE_FORMAT: &str = "%Y/%m";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse model '{id}': {source}")]
    Parse {
        id: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid model id '{0}'")]
    InvalidId(String),
    #[error("Model '{model}' field '{field}': {message}")]
    Field {
        model: String,
        field: String,
        message: String,
    },
}

/// Declared type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Text,
    Markdown,
    Html,
    Url,
    Slug,
    Date,
    Integer,
    Float,
    Boolean,
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "url" => Ok(Self::Url),
            "slug" => Ok(Self::Slug),
            "date" => Ok(Self::Date),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" | "checkbox" => Ok(Self::Boolean),
            other => Err(format!("unknown field type '{other}'")),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Url => "url",
            Self::Slug => "slug",
            Self::Date => "date",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
}

/// A parsed model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataModel {
    pub id: String,
    pub name: String,
    /// Records of this model are hidden from navigation.
    pub hidden: bool,
    pub fields: Vec<FieldDef>,
    pub can_have_children: bool,
    /// Model implied for new children.
    pub child_model: Option<String>,
    pub child_order: OrderSpec,
    pub can_upload: bool,
    pub url_date_field: Option<String>,
    pub url_date_format: String,
}

impl DataModel {
    /// The implicit model used when nothing else applies.
    pub fn none() -> Self {
        Self {
            id: NONE_MODEL.to_string(),
            name: "None".to_string(),
            hidden: false,
            fields: Vec::new(),
            can_have_children: true,
            child_model: None,
            child_order: OrderSpec::default(),
            can_upload: true,
            url_date_field: None,
            url_date_format: DEFAULT_URL_DATE_FORMAT.to_string(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared type of `name`. System and undeclared fields are strings.
    pub fn field_type(&self, name: &str) -> FieldType {
        self.field(name)
            .map(|f| f.field_type)
            .unwrap_or(FieldType::String)
    }

    /// Parse a model file's text.
    pub fn parse(id: &str, text: &str) -> Result<Self, ModelError> {
        if !slug::is_valid_id(id) {
            return Err(ModelError::InvalidId(id.to_string()));
        }
        let file: ModelFile = toml::from_str(text).map_err(|source| ModelError::Parse {
            id: id.to_string(),
            source,
        })?;

        let mut fields = Vec::with_capacity(file.fields.len());
        for (name, section) in file.fields {
            if !slug::is_valid_field_name(&name) || name.starts_with('_') {
                return Err(ModelError::Field {
                    model: id.to_string(),
                    field: name,
                    message: "field names use letters, digits and underscores and may not start with '_'".into(),
                });
            }
            let field_type = section
                .field_type
                .parse::<FieldType>()
                .map_err(|message| ModelError::Field {
                    model: id.to_string(),
                    field: name.clone(),
                    message,
                })?;
            let label = section
                .label
                .unwrap_or_else(|| slug::display_label(&name));
            fields.push(FieldDef {
                name,
                field_type,
                label,
            });
        }

        if let Some(date_field) = &file.model.url_date_field
            && !fields.iter().any(|f| &f.name == date_field)
        {
            return Err(ModelError::Field {
                model: id.to_string(),
                field: date_field.clone(),
                message: "url_date_field names an undeclared field".into(),
            });
        }

        Ok(Self {
            id: id.to_string(),
            name: file
                .model
                .name
                .unwrap_or_else(|| slug::display_label(id)),
            hidden: file.model.hidden,
            fields,
            can_have_children: file.children.enabled,
            child_model: file.children.model,
            child_order: OrderSpec::parse(&file.children.order_by),
            can_upload: file.attachments.enabled,
            url_date_field: file.model.url_date_field,
            url_date_format: file
                .model
                .url_date_format
                .unwrap_or_else(|| DEFAULT_URL_DATE_FORMAT.to_string()),
        })
    }
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModelFile {
    model: ModelSection,
    children: ChildrenSection,
    attachments: AttachmentsSection,
    fields: BTreeMap<String, FieldSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModelSection {
    name: Option<String>,
    hidden: bool,
    url_date_field: Option<String>,
    url_date_format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ChildrenSection {
    enabled: bool,
    model: Option<String>,
    order_by: String,
}

impl Default for ChildrenSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            order_by: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AttachmentsSection {
    enabled: bool,
}

impl Default for AttachmentsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldSection {
    #[serde(rename = "type", default = "default_field_type")]
    field_type: String,
    #[serde(default)]
    label: Option<String>,
}

fn default_field_type() -> String {
    "string".to_string()
}

// =============================================================================
// Registry
// =============================================================================

/// Every model of a project, keyed by id.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, DataModel>,
    fallback: DataModel,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            models: BTreeMap::new(),
            fallback: DataModel::none(),
        }
    }
}

impl ModelRegistry {
    /// Load `models/*.toml` under a project root. A missing directory yields
    /// a registry holding only the implicit model.
    pub fn load(root: &Path) -> Result<Self, ModelError> {
        let dir = root.join(MODELS_DIR);
        let mut registry = Self::default();
        if !dir.is_dir() {
            return Ok(registry);
        }
        let mut entries: Vec<_> = fs::read_dir(&dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path)?;
            registry.insert(DataModel::parse(id, &text)?);
        }
        for model in registry.models.values() {
            if let Some(child) = &model.child_model
                && registry.get(child).is_none()
            {
                tracing::warn!(model = %model.id, child = %child, "children.model names an unknown model");
            }
        }
        tracing::debug!(count = registry.models.len(), "loaded models");
        Ok(registry)
    }

    pub fn insert(&mut self, model: DataModel) {
        if model.id == NONE_MODEL {
            self.fallback = model;
        } else {
            self.models.insert(model.id.clone(), model);
        }
    }

    pub fn get(&self, id: &str) -> Option<&DataModel> {
        if id == NONE_MODEL {
            Some(&self.fallback)
        } else {
            self.models.get(id)
        }
    }

    /// Every model, the implicit one last.
    pub fn iter(&self) -> impl Iterator<Item = &DataModel> {
        self.models.values().chain(std::iter::once(&self.fallback))
    }

    /// Model implied for a new child of `parent`.
    pub fn implied_child_model(&self, parent: Option<&DataModel>) -> &DataModel {
        parent
            .and_then(|p| p.child_model.as_deref())
            .and_then(|id| self.get(id))
            .or_else(|| self.models.get(DEFAULT_MODEL))
            .unwrap_or(&self.fallback)
    }

    /// Model of a record with an optional explicit `_model` value.
    pub fn resolve(&self, explicit: Option<&str>, parent: Option<&DataModel>) -> &DataModel {
        if let Some(id) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            match self.get(id) {
                Some(model) => return model,
                None => tracing::warn!(model = %id, "record names an unknown model"),
            }
        }
        self.implied_child_model(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BLOG_POST: &str = r#"
[model]
name = "Blog Post"
url_date_field = "pub_date"

[children]
enabled = false

[fields.title]
type = "string"

[fields.pub_date]
type = "date"
label = "Publication date"
"#;

    #[test]
    fn parses_sections() {
        let model = DataModel::parse("blog-post", BLOG_POST).unwrap();
        assert_eq!(model.name, "Blog Post");
        assert!(!model.can_have_children);
        assert!(model.can_upload);
        assert_eq!(model.url_date_field.as_deref(), Some("pub_date"));
        assert_eq!(model.url_date_format, "%Y/%m");
        assert_eq!(model.field_type("pub_date"), FieldType::Date);
        assert_eq!(model.field("pub_date").unwrap().label, "Publication date");
        assert_eq!(model.field("title").unwrap().label, "title");
        assert_eq!(model.field_type("_id"), FieldType::String);
    }

    #[test]
    fn order_by_is_parsed_once() {
        let model = DataModel::parse("blog", "[children]\norder_by = \"-pub_date, title\"\n").unwrap();
        assert_eq!(model.child_order.to_string(), "-pub_date, title");
        assert_eq!(model.name, "blog");
    }

    #[test]
    fn unknown_field_type_rejected() {
        let err = DataModel::parse("x", "[fields.a]\ntype = \"blob\"\n").unwrap_err();
        assert!(matches!(err, ModelError::Field { .. }));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = DataModel::parse("x", "[children]\norderby = \"title\"\n").unwrap_err();
        assert!(matches!(err, ModelError::Parse { .. }));
    }

    #[test]
    fn date_field_must_be_declared() {
        let err = DataModel::parse("x", "[model]\nurl_date_field = \"when\"\n").unwrap_err();
        assert!(matches!(err, ModelError::Field { .. }));
    }

    #[test]
    fn missing_dir_gives_implicit_model() {
        let tmp = TempDir::new().unwrap();
        let registry = ModelRegistry::load(tmp.path()).unwrap();
        assert_eq!(registry.resolve(None, None).id, NONE_MODEL);
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn resolution_falls_back_in_order() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(MODELS_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("page.toml"), "").unwrap();
        std::fs::write(dir.join("blog.toml"), "[children]\nmodel = \"blog-post\"\n").unwrap();
        std::fs::write(dir.join("blog-post.toml"), BLOG_POST).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let registry = ModelRegistry::load(tmp.path()).unwrap();

        let blog = registry.get("blog").unwrap();
        assert_eq!(registry.resolve(Some("blog"), None).id, "blog");
        assert_eq!(registry.resolve(None, Some(blog)).id, "blog-post");
        assert_eq!(registry.resolve(None, None).id, "page");
        assert_eq!(registry.resolve(Some("missing"), None).id, "page");
        assert_eq!(registry.resolve(Some("none"), None).id, NONE_MODEL);
    }
}
