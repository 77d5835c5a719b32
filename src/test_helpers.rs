//! Shared test utilities.
//!
//! Every test gets its own copy of `fixtures/demo-project`, a small
//! two-language site with a dated blog, an ordered project list, a hidden
//! record and a few attachments.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (tmp, site) = open_demo();
//! let info = site.get_record_info("/blog", "_primary").unwrap();
//! assert_eq!(info.children[0].id, "post2");
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::builder::STATE_FILENAME;
use crate::config::load_config;
use crate::site::{Site, Snapshot};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/demo-project/` to a temp directory and return it.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/demo-project");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Open a fresh copy of the demo project.
pub fn open_demo() -> (TempDir, Site) {
    let tmp = setup_fixtures();
    let site = Site::open(tmp.path()).unwrap();
    (tmp, site)
}

/// Snapshot of a fresh copy of the demo project, without a `Site`.
pub fn demo_snapshot() -> (TempDir, Arc<Snapshot>) {
    let tmp = setup_fixtures();
    let snapshot = reload_snapshot(tmp.path());
    (tmp, snapshot)
}

/// Rescan a project root.
pub fn reload_snapshot(root: &Path) -> Arc<Snapshot> {
    let config = load_config(root).unwrap();
    Arc::new(Snapshot::load(root, &config).unwrap())
}

// =========================================================================
// Output inspection
// =========================================================================

/// Files under an output directory, relative and `/`-separated, without
/// the build ledger.
pub fn output_files(out: &Path) -> BTreeSet<String> {
    if !out.exists() {
        return BTreeSet::new();
    }
    WalkDir::new(out)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(out)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .filter(|rel| rel != STATE_FILENAME)
        .collect()
}
