//! Instance data resolution.
//!
//! Merge order, later wins:
//! 1. page data (shallow copy)
//! 2. tag attributes, camel-cased; valueless attributes bind `true`
//! 3. declared prop defaults, only for keys still absent
//! 4. the data hook result, which replaces everything when present

use serde_json::Value;

use crate::extract::TagOccurrence;
use crate::registry::ComponentDefinition;
use crate::utils::camel_case;
use crate::{diagnostic_text, AssembleError, Data};

/// Merge page data, tag attributes and prop defaults (steps 1-3).
pub fn merge_static(component: &ComponentDefinition, page_data: &Data, tag: &TagOccurrence) -> Data {
    let mut data = page_data.clone();

    for (name, value) in &tag.attributes {
        data.insert(camel_case(name), Value::String(value.clone()));
    }
    for name in &tag.flags {
        data.insert(camel_case(name), Value::Bool(true));
    }

    for (prop, spec) in &component.props {
        if data.contains_key(prop) {
            continue;
        }
        if let Some(default) = &spec.default {
            data.insert(prop.clone(), default.clone());
        }
    }

    data
}

/// Resolve the final data for one instance.
pub async fn resolve_instance_data(
    component: &ComponentDefinition,
    page_data: &Data,
    tag: &TagOccurrence,
) -> Result<Data, AssembleError> {
    let data = merge_static(component, page_data, tag);

    let Some(hook) = &component.data_hook else {
        return Ok(data);
    };

    match hook.load(&data).await {
        Ok(Some(replacement)) => Ok(replacement),
        Ok(None) => Ok(data),
        Err(err) => Err(AssembleError::DataHook {
            component: component.name.clone(),
            message: diagnostic_text(&err),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::find_instances;
    use crate::registry::{DataHook, PropSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn button(hook: Option<Arc<dyn DataHook>>) -> ComponentDefinition {
        let mut props = BTreeMap::new();
        props.insert(
            "size".to_string(),
            PropSpec {
                default: Some(json!("md")),
            },
        );
        props.insert("label".to_string(), PropSpec { default: None });
        ComponentDefinition {
            name: "x-button".into(),
            path: PathBuf::from("component/x-button"),
            module_path: PathBuf::from("node_modules"),
            template: None,
            style: None,
            script: String::new(),
            props,
            data_hook: hook,
            public_data: None,
            tags: Vec::new(),
        }
    }

    fn page(value: serde_json::Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    fn tag(html: &str) -> TagOccurrence {
        find_instances(html, "x-button").unwrap().remove(0)
    }

    struct Replace;

    #[async_trait]
    impl DataHook for Replace {
        async fn load(&self, data: &Data) -> anyhow::Result<Option<Data>> {
            let mut out = Data::new();
            out.insert("computed".into(), json!(format!("from-{}", data["size"].as_str().unwrap_or(""))));
            Ok(Some(out))
        }
    }

    struct Decline;

    #[async_trait]
    impl DataHook for Decline {
        async fn load(&self, _data: &Data) -> anyhow::Result<Option<Data>> {
            Ok(None)
        }
    }

    struct Broken;

    #[async_trait]
    impl DataHook for Broken {
        async fn load(&self, _data: &Data) -> anyhow::Result<Option<Data>> {
            Err(anyhow::anyhow!("database offline"))
        }
    }

    #[tokio::test]
    async fn tag_attribute_beats_prop_default() {
        let data = resolve_instance_data(
            &button(Some(Arc::new(Decline))),
            &Data::new(),
            &tag(r#"<x-button size="lg"></x-button>"#),
        )
        .await
        .unwrap();
        assert_eq!(data["size"], json!("lg"));
    }

    #[tokio::test]
    async fn prop_default_fills_absent_key() {
        let data = resolve_instance_data(&button(None), &Data::new(), &tag("<x-button></x-button>"))
            .await
            .unwrap();
        assert_eq!(data["size"], json!("md"));
        assert!(!data.contains_key("label"));
    }

    #[tokio::test]
    async fn page_data_beats_prop_default_and_attribute_beats_page() {
        let data = resolve_instance_data(
            &button(None),
            &page(json!({"size": "xl", "theme": "dark"})),
            &tag(r#"<x-button theme="light"></x-button>"#),
        )
        .await
        .unwrap();
        assert_eq!(data["size"], json!("xl"));
        assert_eq!(data["theme"], json!("light"));
    }

    #[tokio::test]
    async fn kebab_attributes_are_camel_cased_and_flags_are_true() {
        let data = resolve_instance_data(
            &button(None),
            &Data::new(),
            &tag(r#"<x-button icon-name="star" full-width></x-button>"#),
        )
        .await
        .unwrap();
        assert_eq!(data["iconName"], json!("star"));
        assert_eq!(data["fullWidth"], json!(true));
        assert!(!data.contains_key("icon-name"));
    }

    #[tokio::test]
    async fn hook_result_replaces_data_wholesale() {
        let data = resolve_instance_data(
            &button(Some(Arc::new(Replace))),
            &page(json!({"title": "Home"})),
            &tag(r#"<x-button size="lg"></x-button>"#),
        )
        .await
        .unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data["computed"], json!("from-lg"));
    }

    #[tokio::test]
    async fn hook_failure_is_reported() {
        let err = resolve_instance_data(
            &button(Some(Arc::new(Broken))),
            &Data::new(),
            &tag("<x-button></x-button>"),
        )
        .await
        .unwrap_err();
        match err {
            AssembleError::DataHook { component, message } => {
                assert_eq!(component, "x-button");
                assert!(message.contains("database offline"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
