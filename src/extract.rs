//! Instance extractor.
//!
//! A linear tag scanner. It finds opening tags of one name, parses their
//! attributes, and bounds their inner content by counting nested open/close
//! tags of the same name. No document tree is built.
//!
//! Occurrences are returned in left-to-right order of their opening tag.
//! That order is the ordinal every later rewrite correlates on.

use std::collections::{BTreeMap, BTreeSet};

use crate::AssembleError;

/// Attribute prefix marking an instance that already went through assembly.
pub const INSTANCE_ATTR_PREFIX: &str = "data-smol-id-";

/// One opening tag occurrence and the extent of its element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOccurrence {
    /// Position among occurrences of this name, in textual order.
    pub ordinal: usize,
    /// Byte offset of `<`.
    pub start: usize,
    /// Byte offset just past the tag name.
    pub name_end: usize,
    /// Byte offset where the attribute text ends (`>` or `/>`).
    pub attrs_end: usize,
    /// Byte offset just past the opening tag's `>`.
    pub open_end: usize,
    pub self_closing: bool,
    /// `</name>` extent, when the element is closed.
    pub close: Option<(usize, usize)>,
    /// Valued attributes, raw names.
    pub attributes: BTreeMap<String, String>,
    /// Valueless attributes, raw names.
    pub flags: BTreeSet<String>,
}

impl TagOccurrence {
    /// Byte offset just past the whole element.
    pub fn end(&self) -> usize {
        self.close.map_or(self.open_end, |(_, end)| end)
    }

    /// Inner markup between the opening and closing tags.
    pub fn inner<'a>(&self, markup: &'a str) -> &'a str {
        match self.close {
            Some((close_start, _)) => &markup[self.open_end..close_start],
            None => "",
        }
    }

    /// Raw attribute text of the opening tag, leading whitespace included.
    pub fn attr_text<'a>(&self, markup: &'a str) -> &'a str {
        &markup[self.name_end..self.attrs_end]
    }

    /// Whether this instance already carries an instance id.
    pub fn is_processed(&self) -> bool {
        self.attributes
            .keys()
            .chain(self.flags.iter())
            .any(|name| name.starts_with(INSTANCE_ATTR_PREFIX))
    }
}

/// Find every instance of a component in textual order.
///
/// An instance nested inside another instance of the same component is
/// rejected with [`AssembleError::NestedComponent`].
pub fn find_instances(markup: &str, name: &str) -> Result<Vec<TagOccurrence>, AssembleError> {
    scan(markup, name, true).ok_or_else(|| AssembleError::NestedComponent {
        name: name.to_string(),
    })
}

/// Find the top-level elements of a tag name, counting same-name nesting.
pub fn find_elements(markup: &str, name: &str) -> Vec<TagOccurrence> {
    scan(markup, name, false).unwrap_or_default()
}

/// Whether the markup contains at least one opening tag of this name.
pub fn contains_tag(markup: &str, name: &str) -> bool {
    next_open(markup, 0, name).is_some()
}

// Returns None only when nesting is rejected and found.
/// Custom element names (tag names containing `-`) opened in `markup`,
/// lower-cased, in first-occurrence order.
pub fn custom_element_names(markup: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut pos = 0;
    while let Some(lt) = next_tag_start(markup, pos) {
        let rest = &markup[lt + 1..];
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len());
        let name = rest[..len].to_ascii_lowercase();
        if name.starts_with(|c: char| c.is_ascii_alphabetic()) && name.contains('-') && !names.contains(&name) {
            names.push(name);
        }
        pos = lt + 1;
    }
    names
}

fn scan(markup: &str, name: &str, reject_nested: bool) -> Option<Vec<TagOccurrence>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(start) = next_open(markup, pos, name) {
        let Some(open) = parse_open_tag(markup, start, name) else {
            break;
        };
        let close = if open.self_closing {
            None
        } else {
            find_close(markup, open.open_end, name, reject_nested)?
        };
        let (attributes, flags) = parse_attributes(&markup[open.name_end..open.attrs_end]);
        let occurrence = TagOccurrence {
            ordinal: found.len(),
            start,
            name_end: open.name_end,
            attrs_end: open.attrs_end,
            open_end: open.open_end,
            self_closing: open.self_closing,
            close,
            attributes,
            flags,
        };
        pos = occurrence.end();
        found.push(occurrence);
    }
    Some(found)
}

struct OpenTag {
    name_end: usize,
    attrs_end: usize,
    open_end: usize,
    self_closing: bool,
}

fn opens_at(markup: &str, pos: usize, name: &str) -> bool {
    let bytes = markup.as_bytes();
    if bytes.get(pos) != Some(&b'<') || !markup[pos + 1..].starts_with(name) {
        return false;
    }
    match bytes.get(pos + 1 + name.len()) {
        None => true,
        Some(b) => b.is_ascii_whitespace() || *b == b'>' || *b == b'/',
    }
}

fn closes_at(markup: &str, pos: usize, name: &str) -> Option<usize> {
    let rest = markup.get(pos..)?;
    let after = rest.strip_prefix("</")?.strip_prefix(name)?;
    let trimmed = after.trim_start();
    if !trimmed.starts_with('>') {
        return None;
    }
    Some(markup.len() - trimmed.len() + 1)
}

// Skips HTML comments.
fn next_tag_start(markup: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    loop {
        let lt = pos + markup.get(pos..)?.find('<')?;
        if markup[lt..].starts_with("<!--") {
            pos = match markup[lt + 4..].find("-->") {
                Some(end) => lt + 4 + end + 3,
                None => return None,
            };
            continue;
        }
        return Some(lt);
    }
}

fn next_open(markup: &str, from: usize, name: &str) -> Option<usize> {
    let mut pos = from;
    while let Some(lt) = next_tag_start(markup, pos) {
        if opens_at(markup, lt, name) {
            return Some(lt);
        }
        pos = lt + 1;
    }
    None
}

fn parse_open_tag(markup: &str, start: usize, name: &str) -> Option<OpenTag> {
    let name_end = start + 1 + name.len();
    let mut quote: Option<char> = None;
    for (offset, ch) in markup[name_end..].char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '>') => {
                let gt = name_end + offset;
                let before = markup[name_end..gt].trim_end();
                let self_closing = before.ends_with('/');
                let attrs_end = if self_closing {
                    name_end + before.len() - 1
                } else {
                    gt
                };
                return Some(OpenTag {
                    name_end,
                    attrs_end,
                    open_end: gt + 1,
                    self_closing,
                });
            }
            _ => {}
        }
    }
    None
}

// Outer None: nesting rejected. Inner None: no closing tag.
fn find_close(
    markup: &str,
    from: usize,
    name: &str,
    reject_nested: bool,
) -> Option<Option<(usize, usize)>> {
    let mut depth = 0usize;
    let mut pos = from;
    while let Some(lt) = next_tag_start(markup, pos) {
        if opens_at(markup, lt, name) {
            if reject_nested {
                return None;
            }
            match parse_open_tag(markup, lt, name) {
                Some(open) => {
                    if !open.self_closing {
                        depth += 1;
                    }
                    pos = open.open_end;
                }
                None => return Some(None),
            }
            continue;
        }
        if let Some(end) = closes_at(markup, lt, name) {
            if depth == 0 {
                return Some(Some((lt, end)));
            }
            depth -= 1;
            pos = end;
            continue;
        }
        pos = lt + 1;
    }
    Some(None)
}

/// Parse attribute text into valued attributes and valueless flags.
pub fn parse_attributes(text: &str) -> (BTreeMap<String, String>, BTreeSet<String>) {
    let mut attributes = BTreeMap::new();
    let mut flags = BTreeSet::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == '/') {
            i += 1;
        }
        let name_start = i;
        while i < chars.len() && !chars[i].is_whitespace() && !matches!(chars[i], '=' | '>' | '/') {
            i += 1;
        }
        if i == name_start {
            // Stray '=' or '>'.
            i += 1;
            continue;
        }
        let name: String = chars[name_start..i].iter().collect();

        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j < chars.len() && chars[j] == '=' {
            j += 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let value: String;
            if j < chars.len() && (chars[j] == '"' || chars[j] == '\'') {
                let quote = chars[j];
                let value_start = j + 1;
                let mut k = value_start;
                while k < chars.len() && chars[k] != quote {
                    k += 1;
                }
                value = chars[value_start..k].iter().collect();
                i = (k + 1).min(chars.len());
            } else {
                let value_start = j;
                let mut k = j;
                while k < chars.len() && !chars[k].is_whitespace() && chars[k] != '>' {
                    k += 1;
                }
                value = chars[value_start..k].iter().collect();
                i = k;
            }
            attributes.insert(name, value);
        } else {
            flags.insert(name);
        }
    }

    (attributes, flags)
}
