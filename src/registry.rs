//! Component registry.
//!
//! Discovers component names across search roots and lazily loads each
//! component's definition from its `component.toml` manifest. Definitions
//! are loaded at most once and cached by name.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AssembleError, BuildMode, Data};

/// Manifest file expected inside every component directory.
pub const MANIFEST_FILE: &str = "component.toml";

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Server-side data loading for a component instance.
///
/// Receives the instance data merged so far. Returning `Some` replaces the
/// instance data wholesale.
#[async_trait]
pub trait DataHook: Send + Sync {
    async fn load(&self, data: &Data) -> anyhow::Result<Option<Data>>;
}

/// Computes a component's client-visible data from the page data.
#[async_trait]
pub trait PublicDataHook: Send + Sync {
    async fn public_data(&self, page_data: &Data) -> anyhow::Result<Data>;
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ComponentManifest {
    template: Option<String>,
    style: Option<String>,
    script: Option<String>,
    props: BTreeMap<String, PropSpec>,
    public_data: Option<Vec<String>>,
    tags: Vec<SharedTag>,
}

/// A declared prop. Only props with a default take part in the merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropSpec {
    pub default: Option<Value>,
}

/// Attribute value on a shared tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagAttr {
    Flag(bool),
    Text(String),
}

/// A head/body tag that must appear once on every page using the component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedTag {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, TagAttr>,
    #[serde(default)]
    pub mode: Option<BuildMode>,
}

impl SharedTag {
    pub fn script(src: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("src".to_string(), TagAttr::Text(src.into()));
        Self {
            tag: "script".to_string(),
            attributes,
            mode: None,
        }
    }

    /// Whether the tag applies to the given build mode.
    pub fn applies_to(&self, mode: BuildMode) -> bool {
        self.mode.map_or(true, |m| m == mode)
    }

    /// Render the tag with sorted attributes. `tagType` is never rendered.
    pub fn render(&self) -> String {
        let attrs: Vec<String> = self
            .attributes
            .iter()
            .filter(|(key, _)| key.as_str() != "tagType")
            .filter_map(|(key, value)| match value {
                TagAttr::Flag(true) => Some(key.clone()),
                TagAttr::Flag(false) => None,
                TagAttr::Text(text) => Some(format!("{key}=\"{text}\"")),
            })
            .collect();
        let attrs = if attrs.is_empty() {
            String::new()
        } else {
            format!(" {}", attrs.join(" "))
        };
        format!("<{tag}{attrs}></{tag}>", tag = self.tag)
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum PublicDataSpec {
    /// Keys copied from the page data.
    Keys(Vec<String>),
    /// Computed from the page data.
    Hook(Arc<dyn PublicDataHook>),
}

impl fmt::Debug for PublicDataSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicDataSpec::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            PublicDataSpec::Hook(_) => f.write_str("Hook(..)"),
        }
    }
}

/// A loaded component. Immutable once loaded.
#[derive(Clone)]
pub struct ComponentDefinition {
    pub name: String,
    /// Component directory.
    pub path: PathBuf,
    /// Module directory of the search root the component was found in.
    pub module_path: PathBuf,
    pub template: Option<String>,
    pub style: Option<String>,
    /// Script file name, empty when the component has no script.
    pub script: String,
    pub props: BTreeMap<String, PropSpec>,
    pub data_hook: Option<Arc<dyn DataHook>>,
    pub public_data: Option<PublicDataSpec>,
    pub tags: Vec<SharedTag>,
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("template", &self.template)
            .field("style", &self.style)
            .field("script", &self.script)
            .field("props", &self.props)
            .field("has_data_hook", &self.data_hook.is_some())
            .field("public_data", &self.public_data)
            .field("tags", &self.tags)
            .finish()
    }
}

impl ComponentDefinition {
    pub fn has_script(&self) -> bool {
        !self.script.is_empty()
    }

    /// Whether the script is a framework single-file definition.
    pub fn is_framework_backed(&self) -> bool {
        self.script.ends_with(".vue")
    }

    pub fn template_path(&self) -> Option<PathBuf> {
        self.template.as_ref().map(|t| self.path.join(t))
    }

    pub fn style_path(&self) -> Option<PathBuf> {
        self.style.as_ref().map(|s| self.path.join(s))
    }

    pub fn script_path(&self) -> PathBuf {
        self.path.join(&self.script)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A directory of components plus the module directory their scripts resolve against.
#[derive(Debug, Clone)]
pub struct SearchRoot {
    pub components: PathBuf,
    pub modules: PathBuf,
}

impl SearchRoot {
    pub fn new(components: impl Into<PathBuf>, modules: impl Into<PathBuf>) -> Self {
        Self {
            components: components.into(),
            modules: modules.into(),
        }
    }
}

/// Registry of components across ordered search roots.
pub struct ComponentRegistry {
    roots: Vec<SearchRoot>,
    names: Vec<String>,
    cache: DashMap<String, Arc<ComponentDefinition>>,
    data_hooks: HashMap<String, Arc<dyn DataHook>>,
    public_data_hooks: HashMap<String, Arc<dyn PublicDataHook>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("roots", &self.roots)
            .field("names", &self.names)
            .field("loaded", &self.cache.len())
            .finish()
    }
}

impl ComponentRegistry {
    /// Discover component names. Roots earlier in the list win.
    pub fn discover(roots: Vec<SearchRoot>) -> Result<Self, AssembleError> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        for root in &roots {
            if !root.components.is_dir() {
                tracing::debug!("skipping missing component root {}", root.components.display());
                continue;
            }
            let mut found = Vec::new();
            for entry in std::fs::read_dir(&root.components)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        found.push(name.to_string());
                    }
                }
            }
            found.sort();
            for name in found {
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        tracing::info!("discovered {} components across {} roots", names.len(), roots.len());
        Ok(Self {
            roots,
            names,
            cache: DashMap::new(),
            data_hooks: HashMap::new(),
            public_data_hooks: HashMap::new(),
        })
    }

    /// Attach a data hook to a component.
    pub fn with_data_hook(mut self, name: impl Into<String>, hook: Arc<dyn DataHook>) -> Self {
        self.data_hooks.insert(name.into(), hook);
        self
    }

    /// Attach a public-data function, replacing any manifest key list.
    pub fn with_public_data_hook(
        mut self,
        name: impl Into<String>,
        hook: Arc<dyn PublicDataHook>,
    ) -> Self {
        self.public_data_hooks.insert(name.into(), hook);
        self
    }

    /// Discovered names, in discovery order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Resolve a component, loading it on first use.
    ///
    /// `Ok(None)` when no root has a directory with this name.
    pub async fn resolve(&self, name: &str) -> Result<Option<Arc<ComponentDefinition>>, AssembleError> {
        if let Some(found) = self.cache.get(name) {
            return Ok(Some(Arc::clone(found.value())));
        }

        let mut found = None;
        for root in &self.roots {
            let is_dir = tokio::fs::metadata(root.components.join(name))
                .await
                .is_ok_and(|meta| meta.is_dir());
            if is_dir {
                found = Some(root);
                break;
            }
        }
        let Some(root) = found else {
            return Ok(None);
        };

        let definition = Arc::new(self.load(name, root).await?);
        tracing::debug!("loaded component <{}> from {}", name, definition.path.display());
        let cached = self
            .cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&definition));
        Ok(Some(Arc::clone(cached.value())))
    }

    async fn load(&self, name: &str, root: &SearchRoot) -> Result<ComponentDefinition, AssembleError> {
        let path = root.components.join(name);
        let manifest = read_manifest(name, &path).await?;

        let public_data = match self.public_data_hooks.get(name) {
            Some(hook) => Some(PublicDataSpec::Hook(Arc::clone(hook))),
            None => manifest.public_data.map(PublicDataSpec::Keys),
        };

        Ok(ComponentDefinition {
            name: name.to_string(),
            path,
            module_path: root.modules.clone(),
            template: manifest.template,
            style: manifest.style,
            script: manifest.script.unwrap_or_default(),
            props: manifest.props,
            data_hook: self.data_hooks.get(name).cloned(),
            public_data,
            tags: manifest.tags,
        })
    }
}

async fn read_manifest(name: &str, dir: &Path) -> Result<ComponentManifest, AssembleError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !tokio::fs::try_exists(&manifest_path).await? {
        return Ok(ComponentManifest::default());
    }
    let source = tokio::fs::read_to_string(&manifest_path).await?;
    toml::from_str(&source).map_err(|e| AssembleError::Manifest {
        component: name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn component(root: &Path, name: &str, manifest: Option<&str>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        if let Some(manifest) = manifest {
            std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        }
    }

    struct Nothing;

    #[async_trait]
    impl PublicDataHook for Nothing {
        async fn public_data(&self, _page_data: &Data) -> anyhow::Result<Data> {
            Ok(Data::new())
        }
    }

    #[tokio::test]
    async fn local_root_wins_over_plugin_root() {
        let local = TempDir::new().unwrap();
        let plugin = TempDir::new().unwrap();
        component(local.path(), "x-card", Some("template = \"local.html\""));
        component(plugin.path(), "x-card", Some("template = \"plugin.html\""));
        component(plugin.path(), "x-badge", None);

        let registry = ComponentRegistry::discover(vec![
            SearchRoot::new(local.path(), "local_modules"),
            SearchRoot::new(plugin.path(), "plugin_modules"),
        ])
        .unwrap();

        assert_eq!(registry.names(), &["x-card".to_string(), "x-badge".to_string()]);
        let card = registry.resolve("x-card").await.unwrap().unwrap();
        assert_eq!(card.template.as_deref(), Some("local.html"));
        assert_eq!(card.module_path, PathBuf::from("local_modules"));
        let badge = registry.resolve("x-badge").await.unwrap().unwrap();
        assert_eq!(badge.module_path, PathBuf::from("plugin_modules"));
    }

    #[tokio::test]
    async fn missing_script_normalizes_to_empty() {
        let root = TempDir::new().unwrap();
        component(root.path(), "x-plain", None);
        let registry =
            ComponentRegistry::discover(vec![SearchRoot::new(root.path(), "m")]).unwrap();
        let plain = registry.resolve("x-plain").await.unwrap().unwrap();
        assert_eq!(plain.script, "");
        assert!(!plain.has_script());
        assert!(plain.template.is_none());
    }

    #[tokio::test]
    async fn unknown_component_is_absent() {
        let root = TempDir::new().unwrap();
        let registry =
            ComponentRegistry::discover(vec![SearchRoot::new(root.path(), "m")]).unwrap();
        assert!(registry.resolve("x-ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn definitions_load_once() {
        let root = TempDir::new().unwrap();
        component(root.path(), "x-card", Some("template = \"a.html\""));
        let registry =
            ComponentRegistry::discover(vec![SearchRoot::new(root.path(), "m")]).unwrap();
        let first = registry.resolve("x-card").await.unwrap().unwrap();

        // Later edits are not picked up: the first load is cached.
        std::fs::write(
            root.path().join("x-card").join(MANIFEST_FILE),
            "template = \"b.html\"",
        )
        .unwrap();
        let second = registry.resolve("x-card").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.template.as_deref(), Some("a.html"));
    }

    #[tokio::test]
    async fn manifest_props_tags_and_public_data() {
        let root = TempDir::new().unwrap();
        component(
            root.path(),
            "x-button",
            Some(
                r#"
template = "template.html"
style = "style.css"
script = "XButton.vue"
public_data = ["count"]

[props.size]
default = "md"

[props.label]

[[tags]]
tag = "link"
mode = "production"
attributes = { rel = "preconnect", href = "https://fonts.example" }
"#,
            ),
        );
        let registry =
            ComponentRegistry::discover(vec![SearchRoot::new(root.path(), "m")]).unwrap();
        let button = registry.resolve("x-button").await.unwrap().unwrap();
        assert!(button.is_framework_backed());
        assert_eq!(button.props["size"].default, Some(Value::String("md".into())));
        assert_eq!(button.props["label"].default, None);
        assert!(matches!(&button.public_data, Some(PublicDataSpec::Keys(k)) if k == &["count"]));
        assert_eq!(button.tags[0].mode, Some(BuildMode::Production));
        assert!(!button.tags[0].applies_to(BuildMode::Development));
        assert_eq!(
            button.tags[0].render(),
            r#"<link href="https://fonts.example" rel="preconnect"></link>"#
        );
    }

    #[tokio::test]
    async fn public_data_hook_replaces_key_list() {
        let root = TempDir::new().unwrap();
        component(root.path(), "x-count", Some("public_data = [\"count\"]"));
        let registry = ComponentRegistry::discover(vec![SearchRoot::new(root.path(), "m")])
            .unwrap()
            .with_public_data_hook("x-count", Arc::new(Nothing));
        let count = registry.resolve("x-count").await.unwrap().unwrap();
        assert!(matches!(count.public_data, Some(PublicDataSpec::Hook(_))));
    }

    #[tokio::test]
    async fn malformed_manifest_is_an_error() {
        let root = TempDir::new().unwrap();
        component(root.path(), "x-bad", Some("template = ["));
        let registry =
            ComponentRegistry::discover(vec![SearchRoot::new(root.path(), "m")]).unwrap();
        let err = registry.resolve("x-bad").await.unwrap_err();
        assert!(matches!(err, AssembleError::Manifest { component, .. } if component == "x-bad"));
    }

    #[test]
    fn shared_tag_render_flags() {
        let mut tag = SharedTag::script("/a.js");
        tag.attributes.insert("defer".into(), TagAttr::Flag(true));
        tag.attributes.insert("async".into(), TagAttr::Flag(false));
        tag.attributes.insert("tagType".into(), TagAttr::Text("body".into()));
        assert_eq!(tag.render(), r#"<script defer src="/a.js"></script>"#);
    }
}
