//! The script bundler.
//!
//! Every module reachable from the entry is parsed once and transpiled down
//! to [`TARGET`]. Its `import` and `export` statements are then lowered
//! against a small CommonJS-style runtime and the results are wrapped into a
//! single self-executing registry.
//!
//! Lowering follows the ES module semantics that matter at runtime: every
//! `require` is hoisted above the module body, exports are defined as
//! getters before any dependency runs, and each use of an imported binding
//! reads through the dependency's exports object. Bindings therefore stay
//! live and import cycles resolve the way they do in the browser.
//!
//! The hoisted statements sit on the wrapper line and the body keeps its
//! line breaks, so each module's own source map applies to the bundle with
//! a plain line offset.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use oxc::allocator::Allocator;
use oxc::ast::ast::{
    CallExpression, Declaration, ExportDefaultDeclarationKind, Expression,
    IdentifierReference, ImportDeclarationSpecifier, ModuleDeclaration, ModuleExportName,
    ObjectProperty, Program, TaggedTemplateExpression,
};
use oxc::ast_visit::{Visit, walk};
use oxc::codegen::{Codegen, CodegenOptions, CodegenReturn, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::semantic::{Scoping, SemanticBuilder, SymbolId};
use oxc::span::{GetSpan, SourceType};
use oxc::transformer::{TransformOptions, Transformer};
use oxc_sourcemap::{ConcatSourceMapBuilder, SourceMap};

use super::resolve::ModuleResolver;
use super::sourcemap::line_count;
use super::{AssetCompiler, AssetKind, Pipeline, ScriptStage, TrackedFiles};
use crate::config::Config;
use crate::core::{Artifact, Hash32};
use crate::error::CompileError;

/// Syntax level every module is transpiled down to.
pub const TARGET: &str = "es2015";

const PRELUDE: &str = r#"(function (modules, entry) {
  var cache = {};
  function load(id) {
    if (cache[id]) return cache[id].exports;
    var module = (cache[id] = { exports: {} });
    var def = modules[id];
    def[0](function (spec) {
      var target = def[1][spec];
      if (target === undefined) throw new Error("Cannot find module '" + spec + "'");
      return load(target);
    }, module, module.exports);
    return module.exports;
  }
  load(entry);
})({
"#;

const ES_MODULE_FLAG: &str = r#"Object.defineProperty(exports, "__esModule", { value: true });"#;

/// Local name given to an anonymous default export.
const DEFAULT_LOCAL: &str = "__tsumugi_default";

/// Cache effectiveness of the most recent compile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Modules reused without being parsed.
    pub hits: usize,
    /// Modules that had to be parsed.
    pub misses: usize,
}

/// A single replacement in a module's transpiled text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// A transpiled module, ready to be linked.
#[derive(Debug)]
struct Module {
    /// Transpiled source, the text `edits` apply to.
    code: String,
    edits: Vec<Edit>,
    /// Export table and hoisted requires, run before the body.
    prologue: String,
    /// Import specifiers in source order, with their resolved targets.
    deps: Vec<(String, Utf8PathBuf)>,
    /// Maps `code` back to the file on disk.
    map: Option<SourceMap>,
}

impl Module {
    /// Applies the edits, padding every replacement with the line breaks of
    /// the text it replaced.
    fn lower(&self) -> String {
        let mut out = String::with_capacity(self.code.len());
        let mut cursor = 0;

        for edit in &self.edits {
            out.push_str(&self.code[cursor..edit.start]);
            out.push_str(&edit.text);
            let removed = &self.code[edit.start..edit.end];
            out.extend(removed.chars().filter(|&c| c == '\n'));
            cursor = edit.end;
        }

        out.push_str(&self.code[cursor..]);
        out
    }
}

struct CachedModule {
    hash: Hash32,
    /// Cleared by `invalidate`; a stale entry is re-hashed before reuse.
    fresh: bool,
    module: Arc<Module>,
}

#[derive(Default)]
struct ModuleCache {
    entries: HashMap<Utf8PathBuf, CachedModule>,
}

/// State threaded through the stages of one compile.
#[derive(Default)]
struct Bundle {
    modules: Vec<Arc<Module>>,
    ids: HashMap<Utf8PathBuf, usize>,
    /// Every file the walk tried to load, including one that failed.
    visited: Vec<Utf8PathBuf>,
    code: String,
    /// First bundle line of each module body, by module id.
    sections: Vec<u32>,
    map: Option<String>,
}

/// Bundles the script entry and everything it imports into one file.
pub struct ScriptCompiler {
    root: Utf8PathBuf,
    entry: Utf8PathBuf,
    output: String,
    map_href: String,
    stages: &'static [ScriptStage],
    resolver: ModuleResolver,
    cache: Option<ModuleCache>,
    tracked: TrackedFiles,
    stats: CacheStats,
}

impl ScriptCompiler {
    pub fn new(config: &Config, pipeline: &'static Pipeline) -> Self {
        Self {
            root: config.root.clone(),
            entry: config.entry.clone(),
            output: config.script_bundle.clone(),
            map_href: config.map_href(&config.script_bundle),
            stages: pipeline.script,
            resolver: ModuleResolver::new(&config.root),
            cache: pipeline.cache.then(ModuleCache::default),
            tracked: TrackedFiles::default(),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn maps(&self) -> bool {
        self.stages.contains(&ScriptStage::SourceMap)
    }

    /// Depth-first walk from the entry. Ids follow the visiting order, so
    /// the same sources always produce the same registry.
    fn walk(&mut self, bundle: &mut Bundle) -> Result<(), CompileError> {
        let options = TransformOptions::from_target(TARGET)
            .map_err(|e| CompileError::internal(&self.entry, e))?;
        let mut stack = vec![self.entry.clone()];

        while let Some(path) = stack.pop() {
            if bundle.ids.contains_key(&path) {
                continue;
            }

            bundle.visited.push(path.clone());
            let module = self.load(&path, &options)?;
            bundle.ids.insert(path, bundle.modules.len());

            for (_, dep) in module.deps.iter().rev() {
                if !bundle.ids.contains_key(dep) {
                    stack.push(dep.clone());
                }
            }

            bundle.modules.push(module);
        }

        Ok(())
    }

    fn load(
        &mut self,
        path: &Utf8Path,
        options: &TransformOptions,
    ) -> Result<Arc<Module>, CompileError> {
        if let Some(cache) = &self.cache
            && let Some(entry) = cache.entries.get(path)
            && entry.fresh
        {
            self.stats.hits += 1;
            return Ok(entry.module.clone());
        }

        let source = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CompileError::resolution(path, "module not found"),
            _ => CompileError::internal(path, e),
        })?;
        let hash = Hash32::hash(&source);

        if let Some(cache) = &mut self.cache
            && let Some(entry) = cache.entries.get_mut(path)
            && entry.hash == hash
        {
            entry.fresh = true;
            self.stats.hits += 1;
            return Ok(entry.module.clone());
        }

        self.stats.misses += 1;
        tracing::debug!("parsing {path}");

        let name = path.strip_prefix(&self.root).unwrap_or(path);
        let map = self.maps().then(|| name.as_std_path().to_path_buf());
        let (code, map) = transpile(path, &source, options, map)?;
        let module = Arc::new(plan_module(path, code, map, &self.resolver)?);

        if let Some(cache) = &mut self.cache {
            let cached = CachedModule {
                hash,
                fresh: true,
                module: module.clone(),
            };
            cache.entries.insert(path.to_path_buf(), cached);
        }

        Ok(module)
    }

    fn link(&self, bundle: &mut Bundle) {
        let mut code = String::from(PRELUDE);
        let mut line = line_count(PRELUDE);

        for (id, module) in bundle.modules.iter().enumerate() {
            let mut body = module.lower();
            if !body.is_empty() && !body.ends_with('\n') {
                body.push('\n');
            }

            let deps: BTreeMap<&str, usize> = module
                .deps
                .iter()
                .map(|(spec, path)| (spec.as_str(), bundle.ids[path]))
                .collect();
            // Keys are plain strings and values plain numbers.
            let deps = serde_json::to_string(&deps).unwrap_or_else(|_| String::from("{}"));

            let mut head = format!("{id}: [function (require, module, exports) {{ \"use strict\";");
            if !module.prologue.is_empty() {
                head.push(' ');
                head.push_str(&module.prologue);
            }
            code.push_str(&head);
            code.push('\n');
            line += 1;

            bundle.sections.push(line);
            code.push_str(&body);
            line += line_count(&body);

            code.push_str(&format!("}}, {deps}],\n"));
            line += 1;
        }

        code.push_str("}, 0);\n");
        bundle.code = code;
    }

    fn source_map(&self, bundle: &mut Bundle) {
        let maps: Vec<(&SourceMap, u32)> = bundle
            .modules
            .iter()
            .zip(&bundle.sections)
            .filter_map(|(module, &line)| module.map.as_ref().map(|map| (map, line)))
            .collect();

        let mut map = ConcatSourceMapBuilder::from_sourcemaps(&maps).into_sourcemap();
        map.set_file(&self.output);

        bundle.map = Some(map.to_json_string());
        bundle
            .code
            .push_str(&format!("//# sourceMappingURL={}\n", self.map_href));
    }
}

impl AssetCompiler for ScriptCompiler {
    fn kind(&self) -> AssetKind {
        AssetKind::Script
    }

    fn output_name(&self) -> &str {
        &self.output
    }

    fn compile(&mut self) -> Result<Artifact, CompileError> {
        self.stats = CacheStats::default();
        self.resolver.clear();
        let mut bundle = Bundle::default();

        for stage in self.stages {
            match stage {
                ScriptStage::Resolve => {
                    let walked = self.walk(&mut bundle);
                    let visited = std::mem::take(&mut bundle.visited);
                    match walked {
                        Ok(()) => self.tracked.replace(visited),
                        // Keep watching what was seen before, the broken
                        // module included, so fixing it triggers a rebuild.
                        Err(e) => {
                            self.tracked.extend(visited);
                            return Err(e);
                        }
                    }
                }
                ScriptStage::Transpile => self.link(&mut bundle),
                ScriptStage::Minify => bundle.code = minify(&self.entry, &bundle.code)?,
                ScriptStage::SourceMap => self.source_map(&mut bundle),
            }
        }

        let artifact = Artifact::new(&self.output, bundle.code);
        Ok(match bundle.map {
            Some(map) => artifact.with_map(map),
            None => artifact,
        })
    }

    fn invalidate(&mut self, changed: &[Utf8PathBuf]) {
        let Some(cache) = &mut self.cache else {
            return;
        };

        for path in changed {
            if let Some(entry) = cache.entries.get_mut(path) {
                entry.fresh = false;
            }
        }
    }

    fn tracked(&self) -> Option<TrackedFiles> {
        Some(self.tracked.clone())
    }
}

/// Transpiles one module down to [`TARGET`], keeping its module syntax.
/// With `map` set, also returns a source map naming the file `map`.
fn transpile(
    path: &Utf8Path,
    source: &str,
    options: &TransformOptions,
    map: Option<PathBuf>,
) -> Result<(String, Option<SourceMap>), CompileError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::mjs()).parse();

    if let Some(error) = ret.errors.first() {
        return Err(CompileError::syntax(path, error));
    }

    let mut program = ret.program;
    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();

    let ret = Transformer::new(&allocator, path.as_std_path(), options)
        .build_with_scoping(scoping, &mut program);

    if let Some(error) = ret.errors.first() {
        return Err(CompileError::syntax(path, error));
    }

    let CodegenReturn { code, map, .. } = Codegen::new()
        .with_options(CodegenOptions {
            source_map_path: map,
            ..CodegenOptions::default()
        })
        .build(&program);

    Ok((code, map))
}

/// Parses transpiled code and plans the lowering of its module syntax.
fn plan_module(
    path: &Utf8Path,
    code: String,
    map: Option<SourceMap>,
    resolver: &ModuleResolver,
) -> Result<Module, CompileError> {
    let (lowering, edits) = {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &code, SourceType::mjs()).parse();

        if let Some(error) = ret.errors.first() {
            return Err(CompileError::internal(path, error));
        }

        let program = ret.program;
        let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();

        let mut lowering = Lowering::default();
        for stmt in program.body.iter() {
            if let Some(decl) = stmt.as_module_declaration() {
                lowering.statement(decl);
            }
        }

        let mut edits = lowering.references(&program, &scoping);
        edits.append(&mut lowering.edits);
        edits.sort();
        (lowering, edits)
    };

    let prologue = lowering.prologue();

    let mut deps = Vec::with_capacity(lowering.specifiers.len());
    for spec in lowering.specifiers {
        let target = resolver.resolve(path, &spec)?;
        deps.push((spec, target));
    }

    Ok(Module {
        code,
        edits,
        prologue,
        deps,
        map,
    })
}

/// What an export getter returns.
enum ExportValue {
    /// A binding declared in the module itself.
    Local(String),
    /// An expression over a required module.
    Expr(String),
}

#[derive(Default)]
struct Lowering {
    edits: Vec<Edit>,
    /// Unique specifiers in the order they first appear.
    specifiers: Vec<String>,
    /// Whether the module exports anything at all.
    exports: bool,
    /// Exported names in declaration order.
    table: Vec<(String, ExportValue)>,
    /// Requires and re-export loops, in source order.
    hoisted: Vec<String>,
    /// Import bindings by symbol, with the expression that replaces them.
    bindings: HashMap<SymbolId, String>,
    /// The same bindings by name, for `export { name }` lists.
    names: HashMap<String, String>,
    /// Byte ranges of statements that are removed outright.
    removed: Vec<(u32, u32)>,
    counter: usize,
}

impl Lowering {
    fn statement(&mut self, decl: &ModuleDeclaration) {
        let span = decl.span();
        let (start, end) = (span.start as usize, span.end as usize);

        match decl {
            ModuleDeclaration::ImportDeclaration(import) => {
                let source = import.source.value.as_str();
                self.remove(start, end);

                let specs = match &import.specifiers {
                    Some(specs) if !specs.is_empty() => specs,
                    _ => {
                        self.hoisted.push(format!("require({});", quote(source)));
                        self.require(source);
                        return;
                    }
                };

                let var = self.fresh();
                self.hoisted
                    .push(format!("var {var} = require({});", quote(source)));

                for spec in specs.iter() {
                    match spec {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            let wrapped = self.fresh();
                            self.hoisted.push(format!(
                                "var {wrapped} = {var} && {var}.__esModule \
                                 ? {var} : {{ default: {var} }};"
                            ));
                            self.bind(&s.local, format!("{wrapped}.default"));
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            self.bind(&s.local, var.clone());
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            self.bind(&s.local, member(&var, &export_name(&s.imported)));
                        }
                    }
                }

                self.require(source);
            }
            ModuleDeclaration::ExportNamedDeclaration(named) => {
                self.exports = true;

                if let Some(declaration) = &named.declaration {
                    // Keep the declaration, drop the keyword.
                    self.replace(start, declaration.span().start as usize, String::new());
                    for name in declared_names(declaration) {
                        self.table.push((name.clone(), ExportValue::Local(name)));
                    }
                    return;
                }

                self.remove(start, end);

                match &named.source {
                    Some(source) => {
                        let source = source.value.as_str();
                        let var = self.fresh();
                        self.hoisted
                            .push(format!("var {var} = require({});", quote(source)));
                        for spec in named.specifiers.iter() {
                            let value = member(&var, &export_name(&spec.local));
                            self.table
                                .push((export_name(&spec.exported), ExportValue::Expr(value)));
                        }
                        self.require(source);
                    }
                    None => {
                        for spec in named.specifiers.iter() {
                            let local = export_name(&spec.local);
                            let value = match self.names.get(&local) {
                                Some(imported) => ExportValue::Expr(imported.clone()),
                                None => ExportValue::Local(local),
                            };
                            self.table.push((export_name(&spec.exported), value));
                        }
                    }
                }
            }
            ModuleDeclaration::ExportDefaultDeclaration(default) => {
                self.exports = true;
                let prefix = default.declaration.span().start as usize;

                let local = match &default.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                        self.replace(start, prefix, String::new());
                        match &func.id {
                            Some(id) => id.name.to_string(),
                            None => {
                                // Name it so the declaration stays hoisted.
                                let at = func.params.span.start as usize;
                                self.replace(at, at, format!(" {DEFAULT_LOCAL}"));
                                DEFAULT_LOCAL.to_string()
                            }
                        }
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => match &class.id {
                        Some(id) => {
                            self.replace(start, prefix, String::new());
                            id.name.to_string()
                        }
                        None => {
                            self.replace(start, prefix, format!("var {DEFAULT_LOCAL} = "));
                            self.replace(end, end, ";".into());
                            DEFAULT_LOCAL.to_string()
                        }
                    },
                    _ => {
                        self.replace(start, prefix, format!("var {DEFAULT_LOCAL} = "));
                        DEFAULT_LOCAL.to_string()
                    }
                };

                self.table
                    .push(("default".into(), ExportValue::Local(local)));
            }
            ModuleDeclaration::ExportAllDeclaration(all) => {
                self.exports = true;
                self.remove(start, end);

                let source = all.source.value.as_str();
                let var = self.fresh();
                self.hoisted
                    .push(format!("var {var} = require({});", quote(source)));

                match &all.exported {
                    Some(name) => {
                        self.table
                            .push((export_name(name), ExportValue::Expr(var)));
                    }
                    None => self.hoisted.push(format!(
                        "Object.keys({var}).forEach(function (k) {{ \
                         if (k === \"default\" || k === \"__esModule\" || \
                         Object.prototype.hasOwnProperty.call(exports, k)) return; \
                         Object.defineProperty(exports, k, {{ enumerable: true, \
                         get: function () {{ return {var}[k]; }} }}); }});"
                    )),
                }

                self.require(source);
            }
            _ => {}
        }
    }

    /// Rewrites every use of an import binding into a read through the
    /// dependency's exports.
    fn references(&self, program: &Program, scoping: &Scoping) -> Vec<Edit> {
        let mut visitor = References {
            scoping,
            bindings: &self.bindings,
            removed: &self.removed,
            callees: Default::default(),
            shorthands: Default::default(),
            edits: vec![],
        };
        visitor.visit_program(program);
        visitor.edits
    }

    /// The export table first, so a cycle back into this module already
    /// sees every name, then the requires.
    fn prologue(&self) -> String {
        let mut out = vec![];

        if self.exports {
            out.push(ES_MODULE_FLAG.to_string());
        }

        for (name, value) in &self.table {
            let value = match value {
                ExportValue::Local(local) => local,
                ExportValue::Expr(expr) => expr,
            };
            out.push(format!(
                "Object.defineProperty(exports, {}, {{ enumerable: true, \
                 get: function () {{ return {value}; }} }});",
                quote(name)
            ));
        }

        out.extend(self.hoisted.iter().cloned());
        out.join(" ")
    }

    fn bind(&mut self, local: &oxc::ast::ast::BindingIdentifier, target: String) {
        if let Some(symbol) = local.symbol_id.get() {
            self.bindings.insert(symbol, target.clone());
        }
        self.names.insert(local.name.to_string(), target);
    }

    fn remove(&mut self, start: usize, end: usize) {
        self.removed.push((start as u32, end as u32));
        self.replace(start, end, String::new());
    }

    fn replace(&mut self, start: usize, end: usize, text: String) {
        self.edits.push(Edit { start, end, text });
    }

    fn require(&mut self, specifier: &str) {
        if !self.specifiers.iter().any(|s| s == specifier) {
            self.specifiers.push(specifier.to_string());
        }
    }

    fn fresh(&mut self) -> String {
        let var = format!("__tsumugi_{}", self.counter);
        self.counter += 1;
        var
    }
}

struct References<'s> {
    scoping: &'s Scoping,
    bindings: &'s HashMap<SymbolId, String>,
    removed: &'s [(u32, u32)],
    /// Identifiers called directly, which must not pass their namespace as
    /// `this`.
    callees: HashSet<u32>,
    /// Identifiers written as `{ name }` in an object literal.
    shorthands: HashSet<u32>,
    edits: Vec<Edit>,
}

impl<'a> Visit<'a> for References<'_> {
    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &it.callee {
            self.callees.insert(ident.span.start);
        }
        walk::walk_call_expression(self, it);
    }

    fn visit_tagged_template_expression(&mut self, it: &TaggedTemplateExpression<'a>) {
        if let Expression::Identifier(ident) = &it.tag {
            self.callees.insert(ident.span.start);
        }
        walk::walk_tagged_template_expression(self, it);
    }

    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if it.shorthand
            && let Expression::Identifier(ident) = &it.value
        {
            self.shorthands.insert(ident.span.start);
        }
        walk::walk_object_property(self, it);
    }

    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        let Some(reference) = it.reference_id.get() else {
            return;
        };
        let Some(symbol) = self.scoping.get_reference(reference).symbol_id() else {
            return;
        };
        let Some(target) = self.bindings.get(&symbol) else {
            return;
        };

        let start = it.span.start;
        if self.removed.iter().any(|&(s, e)| s <= start && start < e) {
            return;
        }

        let text = if self.shorthands.contains(&start) {
            format!("{}: {target}", it.name)
        } else if self.callees.contains(&start) {
            format!("(0, {target})")
        } else {
            target.clone()
        };

        self.edits.push(Edit {
            start: start as usize,
            end: it.span.end as usize,
            text,
        });
    }
}

fn declared_names(declaration: &Declaration) -> Vec<String> {
    match declaration {
        Declaration::VariableDeclaration(var) => var
            .declarations
            .iter()
            .flat_map(|d| d.id.get_binding_identifiers())
            .map(|id| id.name.to_string())
            .collect(),
        Declaration::FunctionDeclaration(func) => {
            func.id.iter().map(|id| id.name.to_string()).collect()
        }
        Declaration::ClassDeclaration(class) => {
            class.id.iter().map(|id| id.name.to_string()).collect()
        }
        _ => vec![],
    }
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::IdentifierName(ident) => ident.name.to_string(),
        ModuleExportName::IdentifierReference(ident) => ident.name.to_string(),
        ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
    }
}

/// Property access on `object`, dotted when `name` allows it.
fn member(object: &str, name: &str) -> String {
    let mut chars = name.chars();
    let dotted = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if dotted {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", quote(name))
    }
}

/// A JavaScript string literal for `value`.
fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn minify(entry: &Utf8Path, source: &str) -> Result<String, CompileError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();

    if let Some(error) = ret.errors.first() {
        return Err(CompileError::internal(entry, error));
    }

    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;

    Ok(code)
}
