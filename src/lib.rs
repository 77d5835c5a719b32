//! # Lectern
//!
//! Content resolution and incremental builds for a file-backed static site
//! engine. The filesystem is the database: every directory under `content/`
//! is a record, its fields live in `contents.lr`, other files are its
//! attachments, and localized overlays (`contents+de.lr`) sit beside the
//! primary file.
//!
//! # Architecture: Snapshot, Operations, Passes
//!
//! ```text
//! project.toml + models/ + content/
//!         │  scan
//!         ▼
//!     Snapshot  (models, SourceTree, UrlMatcher; immutable, Arc-shared)
//!         │
//!         ├── reads   → resolver   (record info, path info, find, URLs)
//!         ├── edits   → editor     (validate, write, rescan, swap)
//!         └── passes  → builder    (build / prune, streamed as events)
//!                        publish   (mirror output to a target, streamed)
//! ```
//!
//! A [`site::Site`] holds the current snapshot behind a lock. Reads clone the
//! `Arc` and never block each other; edits rescan and swap in a new snapshot;
//! build passes serialize on the builder. Long-running work is an iterator of
//! results wrapped in an [`events::EventStream`], which frames each item as
//! `data: <json>\n\n` and always ends with one terminal frame.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`site`] | The project context: snapshot, locks, every public operation |
//! | [`config`] | `project.toml` loading, validation and merging; alternatives |
//! | [`model`] | `models/*.toml` parsing into typed data models |
//! | [`contents`] | Byte-preserving `contents.lr` field format |
//! | [`tree`] | Content tree scanning, overlays, hidden status |
//! | [`order`] | `order_by` declarations and the stable multi-key sort |
//! | [`urls`] | Bidirectional path ↔ URL mapping per alt |
//! | [`resolver`] | Read operations returning serializable records |
//! | [`editor`] | Write operations: fields, new records, uploads, deletion |
//! | [`render`] | Page assembly and the stock Maud HTML renderer |
//! | [`builder`] | Incremental build ledger, build and prune passes |
//! | [`events`] | Progress event framing over fallible producers |
//! | [`publish`] | Publisher trait, registry and the local directory transport |
//! | [`slug`] | Path normalization, id validation and fallback labels |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Overlays Are Optional
//!
//! A missing `contents+<alt>.lr` is the normal case, not an error: every field
//! falls back to the primary file. Children of a record are therefore always
//! listed and sorted in every alt, whether or not they have been translated.
//!
//! ## The Ledger Owns the Output
//!
//! The builder only ever deletes files it recorded producing in
//! `.lectern-buildstate.json`. Files dropped into the output directory by
//! hand survive builds and cleans alike.

pub mod builder;
pub mod config;
pub mod contents;
pub mod editor;
pub mod events;
pub mod model;
pub mod order;
pub mod output;
pub mod publish;
pub mod render;
pub mod resolver;
pub mod site;
pub mod slug;
pub mod tree;
pub mod urls;

#[cfg(test)]
pub(crate) mod test_helpers;
