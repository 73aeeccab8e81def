//! Build configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AssembleError, BuildMode};

/// Describes WHERE the assembler writes and HOW it treats components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Output root. Pages land under `<out_dir>/<public_path>/`.
    pub out_dir: PathBuf,
    /// Public directory inside the output root.
    pub public_path: String,
    /// Page style sheets, relative to the public directory.
    pub page_style_path: String,
    /// Page script bundles, relative to the public directory.
    pub page_script_path: String,
    /// Build mode.
    pub mode: BuildMode,
    /// Search paths handed to the style compiler.
    pub style_include_paths: Vec<PathBuf>,
    /// Base directory for markup includes.
    pub template_base: PathBuf,
    /// Treat component tags that fail to resolve as fatal: custom elements
    /// with no component directory, and discovered components that no
    /// longer load.
    pub strict_components: bool,
    /// Framework runtime locations for single-file components.
    pub framework: FrameworkConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("output"),
            public_path: "public".to_string(),
            page_style_path: "style/page".to_string(),
            page_script_path: "script/page".to_string(),
            mode: BuildMode::Development,
            style_include_paths: Vec::new(),
            template_base: PathBuf::from("include"),
            strict_components: false,
            framework: FrameworkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Module specifier the mount stub imports the runtime from.
    pub runtime_module: String,
    /// Runtime script tag source in development.
    pub cdn_development: String,
    /// Runtime script tag source in production.
    pub cdn_production: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            runtime_module: "vue".to_string(),
            cdn_development: "//cdn.jsdelivr.net/npm/vue/dist/vue.js".to_string(),
            cdn_production: "//cdn.jsdelivr.net/npm/vue".to_string(),
        }
    }
}

impl FrameworkConfig {
    pub fn cdn_for(&self, mode: BuildMode) -> &str {
        match mode {
            BuildMode::Development => &self.cdn_development,
            BuildMode::Production => &self.cdn_production,
        }
    }
}

impl BuildConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, AssembleError> {
        toml::from_str(source).map_err(|e| AssembleError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, AssembleError> {
        let source = std::fs::read_to_string(path)?;
        toml::from_str(&source).map_err(|e| AssembleError::Config(format!("{}: {e}", path.display())))
    }

    /// Directory that holds the public site.
    pub fn public_dir(&self) -> PathBuf {
        self.out_dir.join(&self.public_path)
    }

    /// Scratch area for staging intermediate script text.
    pub fn scratch_dir(&self) -> PathBuf {
        self.out_dir.clone()
    }
}
