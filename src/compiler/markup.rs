use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use minijinja::{Environment, context};

use super::{AssetCompiler, AssetKind, MarkupStage, Pipeline};
use crate::config::{Config, SourceSet};
use crate::core::Artifact;
use crate::error::CompileError;

/// Renders the page template into the output page.
///
/// The first template matching the markup globs, in path order, is rendered
/// with `title`, `script` and `style` in scope.
pub struct MarkupCompiler {
    root: Utf8PathBuf,
    sources: SourceSet,
    output: String,
    title: Option<String>,
    script: String,
    style: String,
    /// Port of the reload hub, when one is running.
    reload: Option<u16>,
    stages: &'static [MarkupStage],
}

impl MarkupCompiler {
    pub fn new(config: &Config, pipeline: &'static Pipeline, reload: Option<u16>) -> Self {
        Self {
            root: config.root.clone(),
            sources: config.markup.clone(),
            output: config.page.clone(),
            title: config.title.clone(),
            script: config.script_bundle.clone(),
            style: config.style_bundle.clone(),
            reload,
            stages: pipeline.markup,
        }
    }

    /// The configured title, else the `name` from `package.json`.
    fn title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }

        fs::read_to_string(self.root.join("package.json"))
            .ok()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
            .and_then(|json| json.get("name")?.as_str().map(str::to_string))
            .unwrap_or_else(|| String::from("app"))
    }

    fn template(&self) -> Result<Utf8PathBuf, CompileError> {
        let files = self
            .sources
            .files()
            .map_err(|e| CompileError::internal(&self.root, e))?;

        files.into_iter().next().ok_or_else(|| {
            let glob = self.sources.globs().join(", ");
            CompileError::resolution(&self.root, format!("no page template matches {glob}"))
        })
    }

    fn render(&self, path: &Utf8Path) -> Result<String, CompileError> {
        let source = fs::read_to_string(path).map_err(|e| CompileError::internal(path, e))?;

        let mut env = Environment::new();
        env.add_template(path.as_str(), &source)
            .map_err(|e| CompileError::syntax(path, e))?;

        let template = env
            .get_template(path.as_str())
            .map_err(|e| CompileError::internal(path, e))?;

        template
            .render(context! {
                title => self.title(),
                script => &self.script,
                style => &self.style,
            })
            .map_err(|e| CompileError::syntax(path, e))
    }
}

impl AssetCompiler for MarkupCompiler {
    fn kind(&self) -> AssetKind {
        AssetKind::Markup
    }

    fn output_name(&self) -> &str {
        &self.output
    }

    fn compile(&mut self) -> Result<Artifact, CompileError> {
        let mut html = String::new();

        for stage in self.stages {
            match stage {
                MarkupStage::Render => html = self.render(&self.template()?)?,
                MarkupStage::LiveReload => {
                    if let Some(port) = self.reload {
                        html = inject(&html, &reload_script(port));
                    }
                }
            }
        }

        Ok(Artifact::new(&self.output, html))
    }
}

fn reload_script(port: u16) -> String {
    format!(
        r#"<script>
const socket = new WebSocket("ws://" + window.location.hostname + ":{port}");
socket.addEventListener("message", event => {{
    if (event.data === "reload") window.location.reload();
}});
</script>
"#
    )
}

/// Inserts `snippet` right before the closing body tag, or appends it.
fn inject(html: &str, snippet: &str) -> String {
    match html.rfind("</body>") {
        Some(i) => format!("{}{snippet}{}", &html[..i], &html[i..]),
        None => format!("{html}{snippet}"),
    }
}
