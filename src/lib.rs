//! # smol assembler
//!
//! Page-component assembly engine for the smol static site pipeline.
//!
//! Given a compiled page and a registry of components, the assembler finds
//! every component instance on the page, resolves its data, expands its
//! template into named slots, scopes its styles per distinct data binding,
//! weaves its scripts, and writes the page together with its style sheet,
//! script bundle and public data.
//!
//! The markup compiler, style compiler and script bundler are collaborators
//! behind the traits in [`collab`]. The assembler never looks inside them.

pub mod assemble;
pub mod collab;
pub mod config;
pub mod context;
pub mod data;
pub mod extract;
pub mod registry;
pub mod scope;
pub mod slot;
pub mod utils;
pub mod weave;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use assemble::{build_pages, AssembledPage, Assembler, PageOutput, PagePlan, SiteReport};
pub use collab::{
    LightningStyle, MarkupCompiler, PassthroughBundler, ScriptBuild, ScriptBundler, ScriptInput,
    StyleCompiler, StyleOptions, StyleValue, TeraMarkup,
};
pub use config::{BuildConfig, FrameworkConfig};
pub use registry::{ComponentDefinition, ComponentRegistry, DataHook, PublicDataHook, SearchRoot};

/// Data bound to a page or a component instance.
pub type Data = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Build Mode
// ---------------------------------------------------------------------------

/// The build mode selects shared tags and the framework runtime URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Unminified framework runtime, development-only tags.
    #[default]
    Development,
    /// Minified framework runtime, production-only tags.
    Production,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic emitted while assembling a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            message: message.into(),
            context: None,
        }
    }

    pub fn warning(message: impl Into<String>, context: Option<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            context,
        }
    }
}

// ---------------------------------------------------------------------------
// AssembleError
// ---------------------------------------------------------------------------

/// Errors that abort a page build.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Markup compile failed for {path}: {message}")]
    Markup { path: PathBuf, message: String },

    #[error("Style compile failed for <{component}>: {message}")]
    Style { component: String, message: String },

    #[error("Script build failed for {context}: {message}")]
    Script { context: String, message: String },

    #[error("Data hook failed for <{component}>: {message}")]
    DataHook { component: String, message: String },

    #[error("Invalid component manifest for <{component}>: {message}")]
    Manifest { component: String, message: String },

    #[error("Invalid build config: {0}")]
    Config(String),

    #[error("<{name}> is nested inside another <{name}>, same-named nesting is not supported")]
    NestedComponent { name: String },

    #[error("Component <{0}> could not be resolved from any search root")]
    UnresolvedComponent(String),

    #[error("Token space exhausted after {0} draws")]
    TokenExhausted(usize),

    #[error("Component expansion did not settle after {0} passes")]
    ExpansionDepth(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Page {path} failed: {source}")]
    Page {
        path: String,
        #[source]
        source: Box<AssembleError>,
    },
}

impl AssembleError {
    /// Attach the page path to an error, unless it already carries one.
    pub fn for_page(self, path: impl Into<String>) -> Self {
        match self {
            AssembleError::Page { .. } => self,
            other => AssembleError::Page {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Flatten a collaborator error with its whole context chain.
pub(crate) fn diagnostic_text(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
