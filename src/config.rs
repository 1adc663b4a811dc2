//! Process-wide configuration.
//!
//! [`Settings`] is the user-facing, deserializable shape of `tsumugi.json`.
//! [`Config`] is its resolved form: absolute paths, compiled globs and the
//! [`BuildMode`]. A `Config` is built exactly once at startup, wrapped in an
//! `Arc` and handed to every component; nothing downstream reads the
//! environment.

use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use serde::Deserialize;

use crate::core::BuildMode;
use crate::error::ConfigError;

/// Environment variable selecting the [`BuildMode`].
pub const MODE_VAR: &str = "TSUMUGI_MODE";

/// Config file looked up in the working directory when none is given.
pub const CONFIG_FILE: &str = "tsumugi.json";

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Raw settings as written by the user. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Settings {
    pub root: Utf8PathBuf,
    pub entry: Utf8PathBuf,
    pub script_glob: String,
    pub style_glob: String,
    pub markup_glob: String,
    pub output_dir: Utf8PathBuf,
    pub source_map_dir: Utf8PathBuf,
    pub script_bundle: String,
    pub style_bundle: String,
    pub title: Option<String>,
    pub host: String,
    pub port: u16,
    pub reload_port: u16,
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: ".".into(),
            entry: "src/js/index.js".into(),
            script_glob: "src/js/**/*.js".into(),
            style_glob: "src/scss/**/*.scss".into(),
            markup_glob: "src/html/**/*.html".into(),
            output_dir: "build".into(),
            source_map_dir: "maps".into(),
            script_bundle: "app.js".into(),
            style_bundle: "app.css".into(),
            title: None,
            host: "127.0.0.1".into(),
            port: 8080,
            reload_port: 1337,
            debounce_ms: 100,
        }
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(path.into(), e))
    }
}

/// An immutable set of glob patterns identifying the inputs of one asset kind.
///
/// Patterns are anchored at the project root, so they can be matched directly
/// against the absolute paths reported by the file watcher.
#[derive(Debug, Clone)]
pub struct SourceSet {
    globs: Vec<String>,
    patterns: Vec<Pattern>,
}

impl SourceSet {
    pub fn new<I, S>(root: impl AsRef<Utf8Path>, globs: I) -> Result<Self, glob::PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base = Pattern::escape(root.as_ref().as_str());
        let globs: Vec<String> = globs
            .into_iter()
            .map(|glob| format!("{}/{}", base.trim_end_matches('/'), glob.as_ref()))
            .collect();

        let patterns = globs
            .iter()
            .map(|glob| Pattern::new(glob))
            .collect::<Result<_, _>>()?;

        Ok(Self { globs, patterns })
    }

    /// Absolute glob strings, used to derive the directories to watch.
    pub fn globs(&self) -> &[String] {
        &self.globs
    }

    pub fn matches(&self, path: impl AsRef<Utf8Path>) -> bool {
        let path = path.as_ref().as_std_path();
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH))
    }

    /// Every file currently matching the set, sorted and deduplicated.
    pub fn files(&self) -> std::io::Result<Vec<Utf8PathBuf>> {
        let mut found = BTreeSet::new();

        for glob in &self.globs {
            let paths = glob::glob_with(glob, MATCH)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

            for path in paths {
                let path = path.map_err(glob::GlobError::into_error)?;
                if !path.is_file() {
                    continue;
                }
                match Utf8PathBuf::from_path_buf(path) {
                    Ok(path) => {
                        found.insert(path);
                    }
                    Err(path) => tracing::warn!("skipping non UTF-8 path {}", path.display()),
                }
            }
        }

        Ok(found.into_iter().collect())
    }
}

/// Resolved configuration shared by every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: BuildMode,
    pub root: Utf8PathBuf,
    /// Script entry point; the compile-time source set of the script bundle.
    pub entry: Utf8PathBuf,
    /// Files whose change retriggers the script bundle.
    pub scripts: SourceSet,
    pub styles: SourceSet,
    pub markup: SourceSet,
    pub output_dir: Utf8PathBuf,
    /// Source map directory, relative to `output_dir`.
    pub source_map_dir: Utf8PathBuf,
    pub script_bundle: String,
    pub style_bundle: String,
    pub page: String,
    pub title: Option<String>,
    pub host: String,
    pub port: u16,
    pub reload_port: u16,
    pub debounce: Duration,
}

impl Config {
    /// Reads the mode from the environment and the settings from `path`, or
    /// from `tsumugi.json` in the working directory when it exists.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let mode = match std::env::var(MODE_VAR) {
            Ok(value) => BuildMode::parse(&value).ok_or(ConfigError::Mode(value))?,
            Err(_) => BuildMode::default(),
        };

        let settings = match path {
            Some(path) => Settings::from_file(path)?,
            None if Utf8Path::new(CONFIG_FILE).is_file() => Settings::from_file(CONFIG_FILE)?,
            None => Settings::default(),
        };

        Self::resolve(settings, mode)
    }

    pub fn resolve(settings: Settings, mode: BuildMode) -> Result<Self, ConfigError> {
        let root = settings
            .root
            .canonicalize_utf8()
            .map_err(|e| ConfigError::Root(settings.root.clone(), e))?;

        Ok(Self {
            mode,
            entry: root.join(&settings.entry),
            scripts: SourceSet::new(&root, [&settings.script_glob])?,
            styles: SourceSet::new(&root, [&settings.style_glob])?,
            markup: SourceSet::new(&root, [&settings.markup_glob])?,
            output_dir: root.join(&settings.output_dir),
            source_map_dir: settings.source_map_dir,
            script_bundle: settings.script_bundle,
            style_bundle: settings.style_bundle,
            page: "index.html".into(),
            title: settings.title,
            host: settings.host,
            port: settings.port,
            reload_port: settings.reload_port,
            debounce: Duration::from_millis(settings.debounce_ms),
            root,
        })
    }

    /// Path of a source map relative to the output directory.
    pub fn map_href(&self, bundle: &str) -> String {
        format!("{}/{bundle}.map", self.source_map_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_follow_layout() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.entry, "src/js/index.js");
        assert_eq!(settings.output_dir, "build");
        assert_eq!(settings.script_bundle, "app.js");
        assert_eq!(settings.port, 8080);
    }

    #[test]
    fn test_settings_camel_case() {
        let settings: Settings =
            serde_json::from_str(r#"{"styleGlob": "css/*.scss", "sourceMapDir": "sm"}"#).unwrap();
        assert_eq!(settings.style_glob, "css/*.scss");
        assert_eq!(settings.source_map_dir, "sm");
    }

    #[test]
    fn test_settings_unknown_field() {
        assert!(serde_json::from_str::<Settings>(r#"{"outDir": "x"}"#).is_err());
    }

    #[test]
    fn test_source_set_matching() {
        let set = SourceSet::new("/project", ["src/js/**/*.js"]).unwrap();

        assert!(set.matches("/project/src/js/index.js"));
        assert!(set.matches("/project/src/js/lib/a.js"));
        assert!(!set.matches("/project/src/scss/a.scss"));
        assert!(!set.matches("/other/src/js/index.js"));
    }

    #[test]
    fn test_source_set_single_star_stays_in_directory() {
        let set = SourceSet::new("/project", ["src/*.scss"]).unwrap();

        assert!(set.matches("/project/src/main.scss"));
        assert!(!set.matches("/project/src/nested/main.scss"));
    }

    #[test]
    fn test_source_set_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/b.scss"), "").unwrap();
        fs::write(root.join("src/a.scss"), "").unwrap();
        fs::write(root.join("src/c.txt"), "").unwrap();

        let set = SourceSet::new(root, ["src/*.scss"]).unwrap();
        let files = set.files().unwrap();

        assert_eq!(files, vec![root.join("src/a.scss"), root.join("src/b.scss")]);
    }

    #[test]
    fn test_resolve_makes_paths_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            root: Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            ..Settings::default()
        };

        let config = Config::resolve(settings, BuildMode::Production).unwrap();

        assert!(config.root.is_absolute());
        assert!(config.entry.starts_with(&config.root));
        assert!(config.output_dir.ends_with("build"));
        assert_eq!(config.map_href("app.js"), "maps/app.js.map");
    }
}
