use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};

/// Directory to watch recursively so that every file matched by `glob` is
/// seen.
///
/// The glob is cut before its first wildcard component. When that static
/// prefix names a file its parent is watched, so atomic writes are caught;
/// when it does not exist yet, the closest existing ancestor is watched.
pub(crate) fn watch_root(glob: impl AsRef<str>) -> anyhow::Result<Utf8PathBuf> {
    let path = Utf8Path::new(glob.as_ref());

    let components: Vec<_> = path.components().collect();
    let static_len = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let prefix: Utf8PathBuf = components.iter().take(static_len).collect();

    let existing = prefix
        .ancestors()
        .find(|p| !p.as_str().is_empty() && p.exists())
        .unwrap_or(Utf8Path::new("."));

    let absolute = existing.canonicalize_utf8()?;

    if absolute.is_file() {
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        return Ok(parent);
    }

    Ok(absolute)
}

/// Drops every root that lies inside another one. Roots are watched
/// recursively, so the outer one already sees those events.
pub(crate) fn outermost(roots: impl IntoIterator<Item = Utf8PathBuf>) -> BTreeSet<Utf8PathBuf> {
    let sorted: BTreeSet<_> = roots.into_iter().collect();
    let mut kept = BTreeSet::new();

    for root in sorted {
        if !is_covered(&root, &kept) {
            kept.insert(root);
        }
    }

    kept
}

/// Whether `path` is one of `roots` or lies below one of them.
pub(crate) fn is_covered(path: &Utf8Path, roots: &BTreeSet<Utf8PathBuf>) -> bool {
    path.ancestors().any(|dir| roots.contains(dir))
}

/// Directories holding `files` that no recursive root already watches.
pub(crate) fn uncovered_dirs<'a>(
    files: impl IntoIterator<Item = &'a Utf8PathBuf>,
    roots: &BTreeSet<Utf8PathBuf>,
) -> BTreeSet<Utf8PathBuf> {
    files
        .into_iter()
        .filter(|file| !is_covered(file, roots))
        .filter_map(|file| file.parent())
        .map(Utf8Path::to_path_buf)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::create_dir_all(root.join("src/scss")).unwrap();
        fs::write(root.join("src/js/index.js"), "").unwrap();
        (dir, root)
    }

    fn set(paths: &[&str]) -> BTreeSet<Utf8PathBuf> {
        paths.iter().map(Utf8PathBuf::from).collect()
    }

    #[test]
    fn test_concrete_file_is_watched_through_its_directory() {
        let (_guard, root) = project();
        let watch = watch_root(format!("{root}/src/js/index.js")).unwrap();
        assert_eq!(watch, root.join("src/js"));
    }

    #[test]
    fn test_concrete_directory() {
        let (_guard, root) = project();
        let watch = watch_root(format!("{root}/src/scss")).unwrap();
        assert_eq!(watch, root.join("src/scss"));
    }

    #[test]
    fn test_glob_is_cut_at_first_wildcard() {
        let (_guard, root) = project();
        assert_eq!(watch_root(format!("{root}/src/js/**/*.js")).unwrap(), root.join("src/js"));
        assert_eq!(watch_root(format!("{root}/src/*/main.scss")).unwrap(), root.join("src"));
    }

    #[test]
    fn test_missing_directory_falls_back_to_ancestor() {
        let (_guard, root) = project();
        let watch = watch_root(format!("{root}/src/html/**/*.html")).unwrap();
        assert_eq!(watch, root.join("src"));
    }

    #[test]
    fn test_nested_asset_roots_collapse() {
        let roots = outermost(set(&[
            "/site/src/js",
            "/site/src/js/components",
            "/site/src",
            "/site/templates",
        ]));

        assert_eq!(roots, set(&["/site/src", "/site/templates"]));
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_kept() {
        let roots = outermost(set(&["/site/src/js", "/site/src/js-legacy"]));
        assert_eq!(roots, set(&["/site/src/js", "/site/src/js-legacy"]));
    }

    #[test]
    fn test_uncovered_dirs_of_tracked_modules() {
        let roots = set(&["/site/src/js", "/site/src/scss"]);
        let tracked = set(&[
            "/site/src/js/index.js",
            "/site/src/js/b.mjs",
            "/site/src/shared.js",
            "/site/node_modules/kit/esm/index.js",
            "/site/node_modules/kit/esm/button.js",
        ]);

        assert_eq!(
            uncovered_dirs(&tracked, &roots),
            set(&["/site/node_modules/kit/esm", "/site/src"])
        );
    }
}
