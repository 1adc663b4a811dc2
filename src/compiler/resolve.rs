//! Module specifier resolution for the script bundler.

use camino::{Utf8Path, Utf8PathBuf};
use oxc_resolver::{ResolveOptions, Resolver};

use crate::error::CompileError;

/// Node-style resolution for browser bundles: ESM conditions and the
/// `module` field win over `main`, `/`-prefixed specifiers start at the
/// project root.
pub(crate) struct ModuleResolver {
    resolver: Resolver,
}

impl ModuleResolver {
    pub(crate) fn new(root: &Utf8Path) -> Self {
        let resolver = Resolver::new(ResolveOptions {
            condition_names: ["import", "module", "browser", "default"].map(String::from).into(),
            extensions: vec![".js".into(), ".mjs".into()],
            main_fields: vec!["module".into(), "main".into()],
            roots: vec![root.as_std_path().to_path_buf()],
            symlinks: false,
            ..ResolveOptions::default()
        });

        Self { resolver }
    }

    /// Resolves `specifier` as imported from the file `importer`.
    pub(crate) fn resolve(
        &self,
        importer: &Utf8Path,
        specifier: &str,
    ) -> Result<Utf8PathBuf, CompileError> {
        let dir = importer.parent().unwrap_or(importer);

        let resolution = self.resolver.resolve(dir, specifier).map_err(|e| {
            CompileError::resolution(importer, format!("cannot resolve module '{specifier}': {e}"))
        })?;

        Utf8PathBuf::from_path_buf(resolution.path().to_path_buf()).map_err(|path| {
            CompileError::resolution(importer, format!("non UTF-8 path {}", path.display()))
        })
    }

    /// Forgets every file system lookup made so far, so files created since
    /// the last compile are found.
    pub(crate) fn clear(&self) {
        self.resolver.clear_cache();
    }
}
