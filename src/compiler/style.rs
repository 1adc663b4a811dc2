use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use super::sourcemap::{LineMap, line_count};
use super::{AssetCompiler, AssetKind, Pipeline, StyleStage};
use crate::config::{Config, SourceSet};
use crate::core::Artifact;
use crate::error::CompileError;

/// Oldest browsers that still get vendor prefixes, as `major << 16`.
fn targets() -> Targets {
    Targets::from(Browsers {
        chrome: Some(80 << 16),
        firefox: Some(70 << 16),
        safari: Some(12 << 16),
        ..Browsers::default()
    })
}

/// One stylesheet on its way through the stages.
struct Sheet {
    path: Utf8PathBuf,
    source: String,
    css: String,
}

/// Compiles every non-partial stylesheet matching the style globs, in path
/// order, into a single bundle.
pub struct StyleCompiler {
    root: Utf8PathBuf,
    sources: SourceSet,
    output: String,
    map_href: String,
    stages: &'static [StyleStage],
}

impl StyleCompiler {
    pub fn new(config: &Config, pipeline: &'static Pipeline) -> Self {
        Self {
            root: config.root.clone(),
            sources: config.styles.clone(),
            output: config.style_bundle.clone(),
            map_href: config.map_href(&config.style_bundle),
            stages: pipeline.style,
        }
    }

    /// Stylesheets prefixed with `_` are partials, only ever imported.
    fn entries(&self) -> Result<Vec<Utf8PathBuf>, CompileError> {
        let files = self
            .sources
            .files()
            .map_err(|e| CompileError::internal(&self.root, e))?;

        Ok(files
            .into_iter()
            .filter(|path| !path.file_name().is_some_and(|name| name.starts_with('_')))
            .collect())
    }
}

impl AssetCompiler for StyleCompiler {
    fn kind(&self) -> AssetKind {
        AssetKind::Style
    }

    fn output_name(&self) -> &str {
        &self.output
    }

    fn compile(&mut self) -> Result<Artifact, CompileError> {
        let mut sheets = Vec::new();
        let mut code = String::new();
        let mut map = None;

        for stage in self.stages {
            match stage {
                StyleStage::Compile => {
                    for path in self.entries()? {
                        let source = fs::read_to_string(&path)
                            .map_err(|e| CompileError::internal(&path, e))?;
                        let css = grass::from_path(&path, &grass::Options::default())
                            .map_err(|e| CompileError::syntax(&path, e))?;

                        sheets.push(Sheet { path, source, css });
                    }
                }
                StyleStage::Prefix => {
                    for sheet in &mut sheets {
                        sheet.css = prefix(&sheet.path, &sheet.css)?;
                    }
                }
                StyleStage::Concat => {
                    for sheet in &mut sheets {
                        if !sheet.css.is_empty() && !sheet.css.ends_with('\n') {
                            sheet.css.push('\n');
                        }
                        code.push_str(&sheet.css);
                    }
                }
                StyleStage::Minify => code = minify(&self.root, &code)?,
                StyleStage::SourceMap => {
                    // Preprocessing rewrites the line structure, so each
                    // output block maps back to its stylesheet as a whole.
                    let mut lines = LineMap::new(&self.output);
                    let mut dst = 0;

                    for sheet in &sheets {
                        let name = sheet.path.strip_prefix(&self.root).unwrap_or(&sheet.path);
                        let source = lines.add_source(name.as_str(), &sheet.source);
                        let count = line_count(&sheet.css);
                        lines.map_block(source, dst, count);
                        dst += count;
                    }

                    map = Some(lines.to_json());
                    code.push_str(&format!("/*# sourceMappingURL={} */\n", self.map_href));
                }
            }
        }

        let artifact = Artifact::new(&self.output, code);
        Ok(match map {
            Some(map) => artifact.with_map(map),
            None => artifact,
        })
    }
}

/// Adds the vendor prefixes the configured targets still need.
fn prefix(path: &Utf8Path, css: &str) -> Result<String, CompileError> {
    let options = ParserOptions {
        filename: path.to_string(),
        ..ParserOptions::default()
    };

    let mut sheet =
        StyleSheet::parse(css, options).map_err(|e| CompileError::syntax(path, e))?;

    sheet
        .minify(MinifyOptions {
            targets: targets(),
            ..MinifyOptions::default()
        })
        .map_err(|e| CompileError::internal(path, e))?;

    let out = sheet
        .to_css(PrinterOptions {
            minify: false,
            targets: targets(),
            ..PrinterOptions::default()
        })
        .map_err(|e| CompileError::internal(path, e))?;

    Ok(out.code)
}

fn minify(root: &Utf8Path, css: &str) -> Result<String, CompileError> {
    let sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| CompileError::internal(root, e))?;

    let out = sheet
        .to_css(PrinterOptions {
            minify: true,
            targets: targets(),
            ..PrinterOptions::default()
        })
        .map_err(|e| CompileError::internal(root, e))?;

    Ok(out.code)
}
