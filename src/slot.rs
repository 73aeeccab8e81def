//! Slot resolution.
//!
//! Content nested inside a component instance is split into named blocks
//! (`<template slot="name">`, plus an implicit `default` block for anything
//! left over). The component's expanded template marks insertion points with
//! `<slot static>` placeholders whose own content is the fallback.

use lazy_static::lazy_static;
use regex::Regex;

use crate::extract::find_elements;

pub const DEFAULT_SLOT: &str = "default";

/// How a block combines with the placeholder's fallback content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Placement {
    #[default]
    Replace,
    Prepend,
    Append,
}

/// A named content block taken from an instance's inner markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBlock {
    pub name: String,
    pub placement: Placement,
    pub body: String,
}

impl SlotBlock {
    /// Combine the block with a placeholder's fallback content.
    pub fn fill(&self, fallback: &str) -> String {
        match self.placement {
            Placement::Replace => self.body.clone(),
            Placement::Prepend => format!("{}{}", self.body, fallback),
            Placement::Append => format!("{}{}", fallback, self.body),
        }
    }
}

/// Split an instance's inner markup into slot blocks.
///
/// Explicit `<template>` blocks come first in textual order. Remaining
/// non-blank markup becomes a trailing implicit `default` block, so an
/// explicit `slot="default"` template takes precedence over it.
pub fn collect_blocks(inner: &str) -> Vec<SlotBlock> {
    let mut blocks = Vec::new();
    let mut rest = String::with_capacity(inner.len());
    let mut pos = 0;

    for template in find_elements(inner, "template") {
        rest.push_str(&inner[pos..template.start]);
        pos = template.end();

        let marked = |marker: &str| {
            template.flags.contains(marker) || template.attributes.contains_key(marker)
        };
        let placement = if marked("append") {
            Placement::Append
        } else if marked("prepend") {
            Placement::Prepend
        } else {
            Placement::Replace
        };
        blocks.push(SlotBlock {
            name: template
                .attributes
                .get("slot")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SLOT.to_string()),
            placement,
            body: template.inner(inner).to_string(),
        });
    }
    rest.push_str(&inner[pos..]);

    if !rest.trim().is_empty() {
        blocks.push(SlotBlock {
            name: DEFAULT_SLOT.to_string(),
            placement: Placement::Replace,
            body: rest,
        });
    }
    blocks
}

fn find_block<'a>(blocks: &'a [SlotBlock], name: &str) -> Option<&'a SlotBlock> {
    blocks.iter().find(|block| block.name == name)
}

/// Resolve every `<slot ... static>` placeholder in expanded markup.
///
/// A placeholder with no matching block keeps its fallback. Slots without
/// the `static` marker are left for the client runtime.
pub fn apply_static_slots(expanded: &str, blocks: &[SlotBlock]) -> String {
    let mut out = String::with_capacity(expanded.len());
    let mut pos = 0;

    for slot in find_elements(expanded, "slot") {
        if !slot.flags.contains("static") && !slot.attributes.contains_key("static") {
            continue;
        }
        out.push_str(&expanded[pos..slot.start]);
        pos = slot.end();

        let name = slot.attributes.get("name").map_or(DEFAULT_SLOT, String::as_str);
        let fallback = slot.inner(expanded);
        match find_block(blocks, name) {
            Some(block) => out.push_str(&block.fill(fallback)),
            None => out.push_str(fallback),
        }
    }
    out.push_str(&expanded[pos..]);
    out
}

/// Split a single-root template into the root's attribute text and its
/// inner content. `None` when the markup is not exactly one element.
pub fn unwrap_root(expanded: &str) -> Option<(String, String)> {
    let trimmed = expanded.trim();
    let tag = trimmed.strip_prefix('<')?;
    let name_len = tag
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag.len());
    let name = &tag[..name_len];
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let elements = find_elements(trimmed, name);
    let [root] = elements.as_slice() else {
        return None;
    };
    if root.start != 0 || root.end() != trimmed.len() {
        return None;
    }
    Some((root.attr_text(trimmed).to_string(), root.inner(trimmed).to_string()))
}

lazy_static! {
    static ref TEMPLATE_SECTION: Regex = Regex::new(r"(?s)<template.*?</template>").unwrap();
    static ref STATIC_SLOT_LINE: Regex = Regex::new(r"slot\(.*?static.*?\)").unwrap();
    static ref SLOT_NAME: Regex = Regex::new(r#"name=["'](.+?)["']"#).unwrap();
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Resolve static slots in the indentation-structured `<template>` section of
/// a framework single-file component, against an instance's inner markup.
///
/// A slot line's indented children are its fallback; they are dedented one
/// level when kept. Inserted block bodies take the slot line's indentation.
pub fn preprocess_indented_template(source: &str, body: &str) -> String {
    let blocks = collect_blocks(body);

    TEMPLATE_SECTION
        .replace(source, |caps: &regex::Captures| {
            let mut lines: Vec<String> = caps[0].split('\n').map(str::to_string).collect();
            let mut i = 1;
            while i + 1 < lines.len() {
                if !STATIC_SLOT_LINE.is_match(&lines[i]) {
                    i += 1;
                    continue;
                }
                let name = SLOT_NAME
                    .captures(&lines[i])
                    .map_or_else(|| DEFAULT_SLOT.to_string(), |c| c[1].to_string());
                let indent = indent_of(&lines[i]);

                let mut fallback = Vec::new();
                for line in &lines[i + 1..lines.len() - 1] {
                    if indent_of(line) <= indent {
                        break;
                    }
                    let strip = indent_of(line).min(2);
                    fallback.push(line[strip..].to_string());
                }
                let consumed = fallback.len() + 1;

                let mut replacement = fallback;
                if let Some(block) = find_block(&blocks, &name) {
                    let padded = format!("{}{}", " ".repeat(indent.div_ceil(2) * 2), block.body);
                    match block.placement {
                        Placement::Append => replacement.push(padded),
                        Placement::Prepend => replacement.insert(0, padded),
                        Placement::Replace => replacement = vec![padded],
                    }
                }

                let inserted = replacement.len();
                lines.splice(i..i + consumed, replacement);
                i += inserted;
            }
            lines.join("\n")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXPANDED: &str = r#"<div class="card"><slot static>Fallback</slot></div>"#;

    #[test]
    fn implicit_default_replaces_fallback() {
        let blocks = collect_blocks("Custom");
        assert_eq!(
            apply_static_slots(EXPANDED, &blocks),
            r#"<div class="card">Custom</div>"#
        );
    }

    #[test]
    fn append_keeps_fallback_first() {
        let blocks = collect_blocks("<template append>Custom</template>");
        assert_eq!(
            apply_static_slots(EXPANDED, &blocks),
            r#"<div class="card">FallbackCustom</div>"#
        );
    }

    #[test]
    fn prepend_puts_block_first() {
        let blocks = collect_blocks("<template prepend>Custom</template>");
        assert_eq!(
            apply_static_slots(EXPANDED, &blocks),
            r#"<div class="card">CustomFallback</div>"#
        );
    }

    #[test]
    fn missing_block_keeps_fallback() {
        let blocks = collect_blocks(r#"<template slot="footer">F</template>"#);
        assert_eq!(
            apply_static_slots(EXPANDED, &blocks),
            r#"<div class="card">Fallback</div>"#
        );
    }

    #[test]
    fn named_slots_and_leftover_default() {
        let inner = r#"<template slot="title">T</template> body text "#;
        let blocks = collect_blocks(inner);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "title");
        assert_eq!(blocks[1].name, "default");
        assert_eq!(blocks[1].body, " body text ");

        let expanded = r#"<h1><slot name="title" static>Untitled</slot></h1><slot static></slot>"#;
        assert_eq!(
            apply_static_slots(expanded, &blocks),
            "<h1>T</h1> body text "
        );
    }

    #[test]
    fn blank_leftover_is_not_a_block() {
        let blocks = collect_blocks("\n  <template slot=\"a\">x</template>\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "a");
    }

    #[test]
    fn non_static_slots_are_untouched() {
        let blocks = collect_blocks("Custom");
        let expanded = "<slot>Fallback</slot>";
        assert_eq!(apply_static_slots(expanded, &blocks), expanded);
    }

    #[test]
    fn unwraps_single_root() {
        let (attrs, inner) = unwrap_root("\n<div class=\"card\" id=\"c\"><p>x</p></div>\n").unwrap();
        assert_eq!(attrs, r#" class="card" id="c""#);
        assert_eq!(inner, "<p>x</p>");
    }

    #[test]
    fn multiple_roots_are_not_unwrapped() {
        assert!(unwrap_root("<p>a</p><p>b</p>").is_none());
        assert!(unwrap_root("text <p>a</p>").is_none());
        assert!(unwrap_root("<div><p>a</p></div> tail").is_none());
    }

    #[test]
    fn indented_template_replace() {
        let source = "<template>\n  div.card\n    slot(name=\"title\" static)\n      span Untitled\n    p body\n</template>\n<script>\nexport default {}\n</script>";
        let out = preprocess_indented_template(source, r#"<template slot="title">h1 Custom</template>"#);
        assert_eq!(
            out,
            "<template>\n  div.card\n    h1 Custom\n    p body\n</template>\n<script>\nexport default {}\n</script>"
        );
    }

    #[test]
    fn indented_template_append_and_fallback() {
        let source = "<template>\n  div\n    slot(static)\n      span Fallback\n</template>";
        let out = preprocess_indented_template(source, "<template append>b Extra</template>");
        assert_eq!(out, "<template>\n  div\n    span Fallback\n    b Extra\n</template>");

        let untouched = preprocess_indented_template(source, "");
        assert_eq!(untouched, "<template>\n  div\n    span Fallback\n</template>");
    }
}
