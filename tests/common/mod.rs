//! Fixture setup shared by the integration tests.

#![allow(dead_code)]

use lectern::site::{Site, SiteOptions};
use std::path::Path;
use tempfile::TempDir;

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

/// Open a fresh copy after appending `extra` to its `project.toml`.
pub fn open_demo_with(extra: &str, options: SiteOptions) -> (TempDir, Site) {
    let tmp = setup_fixtures();
    let config = tmp.path().join("project.toml");
    let mut text = std::fs::read_to_string(&config).unwrap();
    text.push('\n');
    text.push_str(extra);
    std::fs::write(&config, text).unwrap();
    let site = Site::open_with(tmp.path(), options).unwrap();
    (tmp, site)
}
