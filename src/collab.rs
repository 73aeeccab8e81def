//! Collaborator seams.
//!
//! The markup compiler, style compiler and script bundler are black boxes to
//! the assembler. Each is a trait here with one default implementation, so a
//! site can swap in its own toolchain without touching the assembly engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use lazy_static::lazy_static;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::Browsers;
use regex::Regex;
use serde_json::Value;

use crate::slot::preprocess_indented_template;
use crate::{BuildMode, Data};

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

/// Turns a template source and data into an HTML string.
#[async_trait]
pub trait MarkupCompiler: Send + Sync {
    async fn compile(&self, source: &str, base_path: &Path, data: &Data) -> anyhow::Result<String>;
}

/// Default markup compiler backed by Tera one-off renders.
#[derive(Debug, Clone, Default)]
pub struct TeraMarkup;

#[async_trait]
impl MarkupCompiler for TeraMarkup {
    async fn compile(&self, source: &str, base_path: &Path, data: &Data) -> anyhow::Result<String> {
        let context = tera::Context::from_serialize(data)?;
        tera::Tera::one_off(source, &context, false)
            .with_context(|| format!("rendering template under {}", base_path.display()))
    }
}

// ---------------------------------------------------------------------------
// Style
// ---------------------------------------------------------------------------

/// A variable bound into a style compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleValue {
    Ident(String),
    Object(BTreeMap<String, StyleValue>),
}

impl StyleValue {
    /// Bind a top-level data value: objects recurse, everything else is an ident.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => StyleValue::Object(object_members(map.iter())),
            Value::Array(items) => StyleValue::Object(object_members(
                items.iter().enumerate().map(|(i, v)| (i.to_string(), v)),
            )),
            other => StyleValue::Ident(ident_text(other)),
        }
    }

    /// Look up a dotted member path (`theme.color`).
    pub fn lookup(&self, path: &[&str]) -> Option<&StyleValue> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => match self {
                StyleValue::Object(members) => members.get(*head)?.lookup(rest),
                StyleValue::Ident(_) => None,
            },
        }
    }
}

// Null/false members are left out of objects.
fn object_members<'a, K: ToString>(
    entries: impl Iterator<Item = (K, &'a Value)>,
) -> BTreeMap<String, StyleValue> {
    entries
        .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
        .map(|(k, v)| (k.to_string(), StyleValue::from_json(v)))
        .collect()
}

fn ident_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Options handed to the style compiler.
#[derive(Debug, Clone, Default)]
pub struct StyleOptions {
    pub compress: bool,
    pub filename: PathBuf,
    pub search_paths: Vec<PathBuf>,
    pub bindings: BTreeMap<String, StyleValue>,
}

impl StyleOptions {
    /// Bind every top-level data key as a style variable.
    pub fn bind_data(mut self, data: &Data) -> Self {
        for (key, value) in data {
            self.bindings.insert(key.clone(), StyleValue::from_json(value));
        }
        self
    }
}

/// Turns style source plus variable bindings into CSS text.
#[async_trait]
pub trait StyleCompiler: Send + Sync {
    async fn compile(&self, source: &str, options: &StyleOptions) -> anyhow::Result<String>;
}

/// Default style compiler: `$variable` substitution, then lightningcss
/// minification when `compress` is set.
#[derive(Debug, Clone, Default)]
pub struct LightningStyle;

#[async_trait]
impl StyleCompiler for LightningStyle {
    async fn compile(&self, source: &str, options: &StyleOptions) -> anyhow::Result<String> {
        let css = substitute_variables(source, &options.bindings);
        if !options.compress {
            return Ok(css);
        }
        minify_css(&css).with_context(|| format!("compiling {}", options.filename.display()))
    }
}

/// Replace `$name` and `$name.member` references with bound idents.
/// Unbound references and object-valued references are left as written.
pub fn substitute_variables(source: &str, bindings: &BTreeMap<String, StyleValue>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .unwrap_or(after.len());
        let reference = after[..len].trim_end_matches('.');
        let path: Vec<&str> = reference.split('.').collect();
        let bound = path
            .split_first()
            .and_then(|(head, tail)| bindings.get(*head)?.lookup(tail));
        match bound {
            Some(StyleValue::Ident(text)) => {
                out.push_str(text);
                rest = &after[reference.len()..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse, minify and print CSS.
pub fn minify_css(css: &str) -> anyhow::Result<String> {
    let mut stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| anyhow!("CSS parse error: {:?}", e))?;

    stylesheet
        .minify(MinifyOptions {
            targets: Browsers::default().into(),
            ..Default::default()
        })
        .map_err(|e| anyhow!("CSS minify error: {:?}", e))?;

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..Default::default()
        })
        .map_err(|e| anyhow!("CSS print error: {:?}", e))?;

    Ok(result.code)
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ScriptInput {
    /// An entry module on disk; the bundler manages its module graph.
    Entry(PathBuf),
    /// Script text to transpile and minify as-is.
    Text(String),
}

/// One script bundler invocation.
#[derive(Debug, Clone)]
pub struct ScriptBuild {
    pub input: ScriptInput,
    pub mode: BuildMode,
    /// Extra module resolution roots (a component's sibling dependencies).
    pub module_paths: Vec<PathBuf>,
    /// Inner markup of a framework-backed instance. Bundlers apply it to the
    /// single-file components they load, see [`ScriptBuild::framework_source`].
    pub slot_body: Option<String>,
}

impl ScriptBuild {
    pub fn text(script: String, mode: BuildMode) -> Self {
        Self {
            input: ScriptInput::Text(script),
            mode,
            module_paths: Vec::new(),
            slot_body: None,
        }
    }

    pub fn entry(path: PathBuf, mode: BuildMode) -> Self {
        Self {
            input: ScriptInput::Entry(path),
            mode,
            module_paths: Vec::new(),
            slot_body: None,
        }
    }

    /// Resolve static slots in a single-file component loaded for this build.
    pub fn framework_source(&self, source: &str) -> String {
        match &self.slot_body {
            Some(body) => preprocess_indented_template(source, body),
            None => source.to_string(),
        }
    }
}

/// Builds script text. Failures carry the bundler's own diagnostic.
#[async_trait]
pub trait ScriptBundler: Send + Sync {
    async fn build(&self, request: ScriptBuild) -> anyhow::Result<String>;
}

lazy_static! {
    static ref FRAMEWORK_IMPORT: Regex =
        Regex::new(r#"import\s+\w+\s+from\s+['"]([^'"]+\.vue)['"]"#).unwrap();
}

fn is_framework_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "vue")
}

/// Default bundler: entries are read from disk, text is returned unchanged.
///
/// Single-file components get their static slots resolved, both as entries
/// and when a script entry imports them. Imported components are appended
/// after the entry, each under a `// module: <specifier>` line.
#[derive(Debug, Clone, Default)]
pub struct PassthroughBundler;

#[async_trait]
impl ScriptBundler for PassthroughBundler {
    async fn build(&self, request: ScriptBuild) -> anyhow::Result<String> {
        let path = match &request.input {
            ScriptInput::Text(text) => return Ok(text.clone()),
            ScriptInput::Entry(path) => path,
        };
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading entry {}", path.display()))?;
        if is_framework_file(path) {
            return Ok(request.framework_source(&source));
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let specifiers: Vec<String> = FRAMEWORK_IMPORT
            .captures_iter(&source)
            .map(|caps| caps[1].to_string())
            .collect();
        let mut output = source;
        for specifier in specifiers {
            let module = base.join(&specifier);
            let component = tokio::fs::read_to_string(&module)
                .await
                .with_context(|| format!("loading {specifier} from {}", path.display()))?;
            output.push_str(&format!("\n// module: {specifier}\n"));
            output.push_str(&request.framework_source(&component));
        }
        Ok(output)
    }
}
