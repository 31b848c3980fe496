//! Writing images and their JSON sidecars to disk.

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::controller::Persistence;
use crate::stitch::StitchedImage;

/// Writes stitched images under one output directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/<name>`, or `<root>/<stem>-<rand>.<ext>` when that is taken.
    fn free_path(&self, name: &str) -> PathBuf {
        let candidate = self.root.join(name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("screenshot");
        let ext = Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("png");
        let mut rng = rand::thread_rng();
        loop {
            let suffix = rng.gen_range(1000..9999);
            let path = self.root.join(format!("{stem}-{suffix}.{ext}"));
            if !path.exists() {
                return path;
            }
        }
    }
}

impl Persistence for FileStore {
    fn persist(&mut self, image: &StitchedImage, suggested_name: &str) -> Result<PathBuf> {
        let path = self.free_path(suggested_name);
        ensure_parent_dir(&path)?;
        fs::write(&path, &image.png)
            .with_context(|| format!("failed to write image: {}", path.display()))?;
        info!(path = %path.display(), bytes = image.png.len(), "saved stitched image");
        Ok(path)
    }
}

pub fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

pub fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn image() -> StitchedImage {
        StitchedImage {
            png: vec![0x89, b'P', b'N', b'G'],
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn persists_under_root_creating_directories() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("nested").join("out"));
        let path = store.persist(&image(), "page_20240101-000000.png").unwrap();
        assert_eq!(path.file_name().unwrap(), "page_20240101-000000.png");
        assert_eq!(fs::read(&path).unwrap(), image().png);
    }

    #[test]
    fn never_overwrites_an_existing_file() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        let first = store.persist(&image(), "same.png").unwrap();
        let second = store.persist(&image(), "same.png").unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        assert_eq!(second.extension().unwrap(), "png");
    }

    #[test]
    fn writes_json_pretty() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn sidecar_sits_next_to_the_image() {
        assert_eq!(
            default_sidecar_for(Path::new("/tmp/out/page.png")),
            PathBuf::from("/tmp/out/page.json")
        );
    }
}
