//! Instance-scoped styles.
//!
//! A component's style is compiled once per instance with that instance's
//! data bound. Byte-identical outputs share one scope label; each distinct
//! output gets its own. Every distinct output then has its bare component
//! type selectors rewritten to `name[data-smol-<label>]`, and each instance
//! is tagged with the attribute of the output it produced.

use lightningcss::rules::style::StyleRule;
use lightningcss::rules::CssRule;
use lightningcss::selector::{Component, Selector};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::values::ident::Ident;

use crate::context::TokenIssuer;
use crate::AssembleError;

/// Attribute prefix for scope labels. Instance ids use `data-smol-id-`.
pub const SCOPE_ATTR_PREFIX: &str = "data-smol-";

/// Scope attribute for a label.
pub fn scope_attr(label: &str) -> String {
    format!("{SCOPE_ATTR_PREFIX}{label}")
}

/// The once-per-type display rule.
pub fn display_rule(name: &str) -> String {
    format!("{name}{{display:block}}")
}

/// Distinct compiled outputs of one component type, in label-assignment order.
#[derive(Debug, Default, Clone)]
pub struct TypeStyles {
    outputs: Vec<String>,
    labels: Vec<String>,
}

impl TypeStyles {
    /// Record one instance's compiled output and return its label.
    ///
    /// An output equal to one already recorded reuses that label.
    pub fn record(&mut self, output: String, issuer: &mut TokenIssuer) -> Result<String, AssembleError> {
        if let Some(index) = self.outputs.iter().position(|seen| *seen == output) {
            return Ok(self.labels[index].clone());
        }
        let label = issuer.issue()?;
        self.outputs.push(output);
        self.labels.push(label.clone());
        Ok(label)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Each distinct output with its selectors scoped to its label.
    pub fn scoped_rules(&self, name: &str) -> Result<Vec<String>, AssembleError> {
        self.outputs
            .iter()
            .zip(&self.labels)
            .map(|(css, label)| scope_selectors(css, name, label))
            .collect()
    }
}

/// Rewrite `name` type selectors in `css` to `name[data-smol-<label>]`.
///
/// The output is parsed and walked as a rule tree: style rules and the rules
/// nested inside them, plus grouping at-rules (`@media`, `@supports`,
/// `@layer`, `@container`, `@scope`, `@starting-style`, `@-moz-document`).
/// Selector arguments of `:not()`, `:is()`, `:where()` and `:has()` are
/// rewritten too. The result is printed minified.
pub fn scope_selectors(css: &str, name: &str, label: &str) -> Result<String, AssembleError> {
    let style_error = |message: String| AssembleError::Style {
        component: name.to_string(),
        message,
    };

    let mut sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| style_error(format!("CSS parse error: {:?}", e)))?;
    scope_rules(&mut sheet.rules.0, name, &scope_attr(label));

    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..Default::default()
        })
        .map_err(|e| style_error(format!("CSS print error: {:?}", e)))?;
    Ok(printed.code)
}

fn scope_rules(rules: &mut [CssRule<'_>], name: &str, attr: &str) {
    for rule in rules {
        match rule {
            CssRule::Style(style) => scope_style_rule(style, name, attr),
            CssRule::Nesting(nesting) => scope_style_rule(&mut nesting.style, name, attr),
            CssRule::Media(media) => scope_rules(&mut media.rules.0, name, attr),
            CssRule::Supports(supports) => scope_rules(&mut supports.rules.0, name, attr),
            CssRule::LayerBlock(layer) => scope_rules(&mut layer.rules.0, name, attr),
            CssRule::Container(container) => scope_rules(&mut container.rules.0, name, attr),
            CssRule::Scope(scope) => scope_rules(&mut scope.rules.0, name, attr),
            CssRule::StartingStyle(starting) => scope_rules(&mut starting.rules.0, name, attr),
            CssRule::MozDocument(document) => scope_rules(&mut document.rules.0, name, attr),
            // Keyframes, font faces, imports and the like carry no selectors.
            _ => {}
        }
    }
}

fn scope_style_rule(style: &mut StyleRule<'_>, name: &str, attr: &str) {
    for selector in style.selectors.0.iter_mut() {
        if mentions_type(selector, name) {
            *selector = scope_selector(selector, name, attr);
        }
    }
    scope_rules(&mut style.rules.0, name, attr);
}

fn is_type(component: &Component<'_>, name: &str) -> bool {
    matches!(component, Component::LocalName(local) if local.name == name)
}

fn mentions_type(selector: &Selector<'_>, name: &str) -> bool {
    selector.iter_raw_match_order().any(|component| match component {
        Component::Negation(list)
        | Component::Is(list)
        | Component::Where(list)
        | Component::Has(list)
        | Component::Any(_, list) => list.iter().any(|inner| mentions_type(inner, name)),
        other => is_type(other, name),
    })
}

// Selectors store compounds right to left with each compound's simple
// selectors left to right. Rebuild in parse order, appending the scope
// attribute after every matching type selector.
fn scope_selector<'i>(selector: &Selector<'i>, name: &str, attr: &str) -> Selector<'i> {
    let mut combinators = selector
        .iter_raw_match_order()
        .rev()
        .filter_map(|component| component.as_combinator());
    let compounds = selector
        .iter_raw_match_order()
        .as_slice()
        .split(|component| component.is_combinator())
        .rev();

    let mut parse_order = Vec::with_capacity(selector.len() + 1);
    for (index, compound) in compounds.enumerate() {
        if index > 0 {
            if let Some(combinator) = combinators.next() {
                parse_order.push(Component::Combinator(combinator));
            }
        }
        for component in compound {
            parse_order.push(scope_component(component, name, attr));
            if is_type(component, name) {
                parse_order.push(Component::AttributeInNoNamespaceExists {
                    local_name: Ident::from(attr.to_string()),
                    local_name_lower: Ident::from(attr.to_string()),
                });
            }
        }
    }
    Selector::from(parse_order)
}

fn scope_component<'i>(component: &Component<'i>, name: &str, attr: &str) -> Component<'i> {
    let scope_all = |list: &[Selector<'i>]| -> Box<[Selector<'i>]> {
        list.iter()
            .map(|inner| {
                if mentions_type(inner, name) {
                    scope_selector(inner, name, attr)
                } else {
                    inner.clone()
                }
            })
            .collect()
    };
    match component {
        Component::Negation(list) => Component::Negation(scope_all(list)),
        Component::Is(list) => Component::Is(scope_all(list)),
        Component::Where(list) => Component::Where(scope_all(list)),
        Component::Has(list) => Component::Has(scope_all(list)),
        Component::Any(prefix, list) => Component::Any(*prefix, scope_all(list)),
        other => other.clone(),
    }
}
