//! Script weaving.
//!
//! Framework single-file components get one mount stub per instance, built
//! through the bundler from a scratch entry file. Plain scripts are emitted
//! once per component type, wrapped so they can read their public data.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::collab::{ScriptBuild, ScriptBundler};
use crate::config::BuildConfig;
use crate::registry::{ComponentDefinition, PublicDataSpec, SharedTag};
use crate::utils::camel_case;
use crate::{diagnostic_text, AssembleError, Data};

/// Mount stub skeleton for framework-backed instances.
///
/// The stub queues a mount function instead of mounting on load. The
/// mounted element's attributes become camel-cased props. A `ref` attribute
/// is not passed on; the mounted child is registered under it in the
/// registry object handed to the mount function instead.
pub const MOUNT_STUB: &str = r#"import Vue from '$runtimePath'
import BaseComponent from '$baseComponentPath'

function mount(registry) {
  const element = document.querySelector('$componentName[data-smol-id-$componentId]')
  const attributes = {}
  for (const attr of Array.from(element.attributes)) {
    const name = attr.name.split('-').map((segment, index) => index ? segment.slice(0, 1).toUpperCase() + segment.slice(1) : segment).join('')
    attributes[name] = attr.value
  }
  const ref = attributes.ref
  delete attributes.ref

  Vue.config.productionTip = false
  Vue.config.devtools = false

  new Vue({
    components: { BaseComponent },
    el: element,
    data() {
      return { attributes }
    },
    mounted() {
      if (ref) registry[ref] = this.$refs.baseComponent
    },
    template: '<base-component v-bind="attributes" ref="baseComponent"></base-component>',
  })
}

;(window.smolMounts = window.smolMounts || []).push(mount)
"#;

/// Appended once to a page script that queued mounts. Creates the page's
/// ref registry, runs every queued mount with it, then publishes it as
/// `window.smolComponents` for the page's other scripts.
pub const MOUNT_RUNNER: &str = "\n;(() => {const registry = {};(window.smolMounts || []).splice(0).forEach((mount) => mount(registry));window.smolComponents = registry})()\n";

lazy_static! {
    static ref MODULE_REFERENCE: Regex = Regex::new(r"\b(?:require|import)\b").unwrap();
}

/// Fill the mount stub's four substitution points.
pub fn render_mount_stub(runtime: &str, component_module: &Path, name: &str, id: &str) -> String {
    let module = component_module.to_string_lossy().replace('\\', "/");
    MOUNT_STUB
        .replace("$runtimePath", runtime)
        .replace("$baseComponentPath", &module)
        .replace("$componentName", name)
        .replace("$componentId", id)
}

/// Wrap a self-contained script so it sees its component's public data.
pub fn wrap_plain_script(name: &str, script: &str) -> String {
    let key = camel_case(name);
    format!(
        "(() => {{var publicData = (window.smolPublicData && window.smolPublicData.{key}) ? window.smolPublicData.{key} : {{}};{script}}})()"
    )
}

/// Whether a script pulls in other modules and must go through the bundler.
pub fn references_modules(script: &str) -> bool {
    MODULE_REFERENCE.is_match(script)
}

/// The framework runtime tag for the configured build mode.
pub fn runtime_tag(config: &BuildConfig) -> SharedTag {
    SharedTag::script(config.framework.cdn_for(config.mode))
}

/// Builds component scripts through the bundler.
pub struct Weaver<'a> {
    pub bundler: &'a dyn ScriptBundler,
    pub config: &'a BuildConfig,
}

impl Weaver<'_> {
    /// Build the mount script for one framework-backed instance.
    ///
    /// The stub is staged in a scratch file that is removed on every exit path.
    pub async fn mount_script(
        &self,
        component: &ComponentDefinition,
        id: &str,
        slot_body: &str,
    ) -> Result<String, AssembleError> {
        let stub = render_mount_stub(
            &self.config.framework.runtime_module,
            &component.script_path(),
            &component.name,
            id,
        );

        let scratch_dir = self.config.scratch_dir();
        tokio::fs::create_dir_all(&scratch_dir).await?;
        let entry = tempfile::Builder::new()
            .prefix(".smol-mount-")
            .suffix(".js")
            .tempfile_in(&scratch_dir)?;
        tokio::fs::write(entry.path(), stub).await?;

        let mut request = ScriptBuild::entry(entry.path().to_path_buf(), self.config.mode);
        request.module_paths.push(component.module_path.clone());
        request.slot_body = Some(slot_body.to_string());

        tracing::debug!("building mount script for <{}> instance {}", component.name, id);
        self.bundler.build(request).await.map_err(|err| AssembleError::Script {
            context: format!("<{}> instance {}", component.name, id),
            message: diagnostic_text(&err),
        })
    }

    /// Build the once-per-type script of a plain-script component.
    pub async fn type_script(&self, component: &ComponentDefinition) -> Result<String, AssembleError> {
        let path = component.script_path();
        let source = tokio::fs::read_to_string(&path).await?;

        if !references_modules(&source) {
            return Ok(wrap_plain_script(&component.name, &source));
        }

        let mut request = ScriptBuild::entry(path, self.config.mode);
        request.module_paths.push(component.module_path.clone());

        tracing::debug!("bundling script for <{}>", component.name);
        self.bundler.build(request).await.map_err(|err| AssembleError::Script {
            context: format!("<{}>", component.name),
            message: diagnostic_text(&err),
        })
    }
}

/// Compute a component type's public data entry for the page.
///
/// Returns the camel-cased component name and the data object, or `None`
/// when the component declares no public data or the result is empty.
pub async fn compute_public_data(
    component: &ComponentDefinition,
    page_data: &Data,
) -> Result<Option<(String, Value)>, AssembleError> {
    let data = match &component.public_data {
        None => return Ok(None),
        Some(PublicDataSpec::Keys(keys)) => keys
            .iter()
            .filter_map(|key| page_data.get(key).map(|value| (key.clone(), value.clone())))
            .collect::<Data>(),
        Some(PublicDataSpec::Hook(hook)) => {
            hook.public_data(page_data)
                .await
                .map_err(|err| AssembleError::DataHook {
                    component: component.name.clone(),
                    message: diagnostic_text(&err),
                })?
        }
    };

    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some((camel_case(&component.name), Value::Object(data))))
}
