//! Persisting artifacts into the output directory.
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so the dev server never serves a half-written bundle.

use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Artifact;
use crate::error::{IoError, IoResultExt};
use crate::utils::as_overhead;

/// Writes artifacts under one output directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    /// Source map directory, relative to the output directory.
    map_dir: Utf8PathBuf,
}

impl OutputWriter {
    pub fn new(map_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            map_dir: map_dir.into(),
        }
    }

    /// Writes `artifact` under `dir/name`, replacing any previous file, and
    /// its source map (if any) under `dir/<map_dir>/name.map`.
    pub fn write(
        &self,
        dir: &Utf8Path,
        name: &Utf8Path,
        artifact: &Artifact,
    ) -> Result<(), IoError> {
        replace(&dir.join(name), &artifact.data)?;

        if let Some(map) = &artifact.map {
            let path = dir.join(&self.map_dir).join(format!("{name}.map"));
            replace(&path, map)?;
        }

        Ok(())
    }
}

fn replace(path: &Utf8Path, data: &[u8]) -> Result<(), IoError> {
    let parent = path.parent().unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent).at(parent)?;

    let file_name = path.file_name().unwrap_or("artifact");
    let temp = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    fs::write(&temp, data).at(&temp)?;

    if let Err(e) = fs::rename(&temp, path) {
        fs::remove_file(&temp).ok();
        return Err(IoError::new(path, e));
    }

    Ok(())
}

/// Removes every entry under `dir`, keeping the directory itself.
///
/// A missing directory is created, so running this twice in a row always
/// ends with the same empty directory.
pub fn clean(dir: &Utf8Path) -> Result<(), IoError> {
    let s = Instant::now();

    fs::create_dir_all(dir).at(dir)?;

    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let path = entry.path();
        let file_type = entry.file_type().at(dir)?;

        let result = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IoError::new(dir, e)),
        }
    }

    tracing::info!("cleaned {dir} {}", as_overhead(s));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoErrorKind;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_write_creates_directories() {
        let (_guard, root) = tempdir();
        let out = root.join("build");
        let writer = OutputWriter::new("maps");

        let artifact = Artifact::new("app.js", "let a = 1;");
        writer.write(&out, Utf8Path::new("app.js"), &artifact).unwrap();

        assert_eq!(fs::read_to_string(out.join("app.js")).unwrap(), "let a = 1;");
        assert!(!out.join("maps").exists());
    }

    #[test]
    fn test_write_source_map() {
        let (_guard, root) = tempdir();
        let writer = OutputWriter::new("maps");

        let artifact = Artifact::new("app.css", "a{}").with_map("{}");
        writer.write(&root, Utf8Path::new("app.css"), &artifact).unwrap();

        assert_eq!(fs::read_to_string(root.join("maps/app.css.map")).unwrap(), "{}");
    }

    #[test]
    fn test_write_replaces_and_leaves_no_temp() {
        let (_guard, root) = tempdir();
        let writer = OutputWriter::new("maps");

        writer
            .write(&root, Utf8Path::new("app.js"), &Artifact::new("app.js", "old"))
            .unwrap();
        writer
            .write(&root, Utf8Path::new("app.js"), &Artifact::new("app.js", "new"))
            .unwrap();

        assert_eq!(fs::read_to_string(root.join("app.js")).unwrap(), "new");
        let names: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["app.js".to_string()]);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let (_guard, root) = tempdir();
        let out = root.join("build");
        fs::create_dir_all(out.join("maps")).unwrap();
        fs::write(out.join("app.js"), "x").unwrap();
        fs::write(out.join("maps/app.js.map"), "x").unwrap();

        clean(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);

        clean(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_clean_missing_directory() {
        let (_guard, root) = tempdir();
        let out = root.join("never/created");

        clean(&out).unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn test_write_into_file_fails() {
        let (_guard, root) = tempdir();
        fs::write(root.join("blocker"), "").unwrap();
        let writer = OutputWriter::new("maps");

        let err = writer
            .write(&root.join("blocker"), Utf8Path::new("app.js"), &Artifact::new("app.js", ""))
            .unwrap_err();

        assert_eq!(err.path, root.join("blocker"));
        assert_ne!(err.kind, IoErrorKind::NotFound);
    }
}
