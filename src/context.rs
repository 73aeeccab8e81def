//! Per-page build state.
//!
//! A [`PageBuildContext`] is created when a page build starts and dropped
//! once its artifacts are written. Nothing in it outlives the page.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::registry::SharedTag;
use crate::scope::TypeStyles;
use crate::AssembleError;

/// Token alphabet for instance ids and scope labels.
pub const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";
/// Token length. Part of the output contract.
pub const TOKEN_LEN: usize = 8;
/// Draws attempted before giving up on a fresh token.
pub const MAX_TOKEN_DRAWS: usize = 1024;

/// Issues tokens unique within one namespace.
///
/// Draws are uniform over the alphabet and redrawn on conflict. The generator
/// is seeded, so the same page issues the same tokens on every build.
#[derive(Debug)]
pub struct TokenIssuer {
    rng: StdRng,
    issued: HashSet<String>,
}

impl TokenIssuer {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            issued: HashSet::new(),
        }
    }

    pub fn issue(&mut self) -> Result<String, AssembleError> {
        for _ in 0..MAX_TOKEN_DRAWS {
            let token: String = (0..TOKEN_LEN)
                .map(|_| TOKEN_ALPHABET[self.rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
                .collect();
            if self.issued.insert(token.clone()) {
                return Ok(token);
            }
        }
        Err(AssembleError::TokenExhausted(MAX_TOKEN_DRAWS))
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

// Labels draw from their own stream.
const LABEL_SEED_SALT: u64 = 0x5c0b_e5c0_be5c_0be5;

/// Aggregates everything a page build emits.
#[derive(Debug)]
pub struct PageBuildContext {
    /// Script fragments, in emission order.
    pub scripts: Vec<String>,
    /// Framework mount stubs among `scripts`.
    pub mounts: usize,
    /// Shared tags, in declaration order. Deduplicated when rendered.
    pub shared_tags: Vec<SharedTag>,
    /// Public data entries, keyed by camel-cased component name, in emission order.
    pub public_data: Vec<(String, Value)>,
    /// Per component type style state.
    pub styles: BTreeMap<String, TypeStyles>,
    /// Component types whose once-per-type work is done.
    pub finished_types: HashSet<String>,
    pub ids: TokenIssuer,
    pub labels: TokenIssuer,
}

impl PageBuildContext {
    pub fn new(seed: u64) -> Self {
        Self {
            scripts: Vec::new(),
            mounts: 0,
            shared_tags: Vec::new(),
            public_data: Vec::new(),
            styles: BTreeMap::new(),
            finished_types: HashSet::new(),
            ids: TokenIssuer::seeded(seed),
            labels: TokenIssuer::seeded(seed ^ LABEL_SEED_SALT),
        }
    }

    /// Rendered shared tags split into head and body tags, first occurrence wins.
    pub fn rendered_tags(&self) -> (Vec<String>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut head = Vec::new();
        let mut body = Vec::new();
        for tag in &self.shared_tags {
            let rendered = tag.render();
            if !seen.insert(rendered.clone()) {
                continue;
            }
            if tag.tag == "script" {
                body.push(rendered);
            } else {
                head.push(rendered);
            }
        }
        (head, body)
    }

    /// The inline public data script, if any component contributed data.
    pub fn public_data_script(&self) -> Option<String> {
        if self.public_data.is_empty() {
            return None;
        }
        let entries: Vec<String> = self
            .public_data
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        Some(format!("<script>smolPublicData = {{{}}}</script>", entries.join(",")))
    }
}
