use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{
    normalize_name, Match, Placeholder, PlaceholderKind, PlaceholderLocation, PlaceholderType,
};

pub const OPEN: &str = "{{";
pub const CLOSE: &str = "}}";

static IMAGE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^image:([^|]*)\|width:([0-9]+)\|height:([0-9]+)$").expect("image token regex")
});

/// Finds every `{{...}}` token in `text`, left to right, never overlapping.
///
/// Each token is first tried against the image grammar
/// (`image:NAME|width:W|height:H`); anything that does not fit it exactly is
/// kept as a text placeholder named by the whole inner content.
pub fn find_placeholders(text: &str, trim_names: bool) -> Vec<Match> {
    let mut out: Vec<Match> = Vec::new();
    let mut pos = 0usize;
    while let Some(rel) = text[pos..].find(OPEN) {
        let start = pos + rel;
        let inner_start = start + OPEN.len();
        let Some(close_rel) = text[inner_start..].find(CLOSE) else {
            break;
        };
        let inner_end = inner_start + close_rel;
        let inner = &text[inner_start..inner_end];

        // "{{a {{b}}": only the innermost opener can start a token.
        if let Some(nested) = inner.rfind(OPEN) {
            pos = inner_start + nested;
            continue;
        }

        let end = inner_end + CLOSE.len();
        if let Some(kind) = classify_token(inner, trim_names) {
            out.push(Match {
                kind,
                start,
                len: end - start,
                raw: text[start..end].to_string(),
            });
        }
        pos = end;
    }
    out
}

fn classify_token(inner: &str, trim_names: bool) -> Option<PlaceholderKind> {
    let body = if trim_names { inner.trim() } else { inner };
    if body.trim().is_empty() {
        return None;
    }
    if let Some(image) = parse_image_token(body, trim_names) {
        return Some(image);
    }
    Some(PlaceholderKind::Text {
        name: body.to_string(),
    })
}

fn parse_image_token(body: &str, trim_names: bool) -> Option<PlaceholderKind> {
    let caps = IMAGE_TOKEN_RE.captures(body)?;
    let raw_name = caps.get(1)?.as_str();
    let name = if trim_names { raw_name.trim() } else { raw_name };
    if name.trim().is_empty() {
        return None;
    }
    let width = caps.get(2)?.as_str().parse::<u32>().ok().filter(|w| *w > 0)?;
    let height = caps.get(3)?.as_str().parse::<u32>().ok().filter(|h| *h > 0)?;
    Some(PlaceholderKind::Image {
        name: name.to_string(),
        width,
        height,
    })
}

/// Placeholders discovered by scan passes, keyed by kind and case-insensitive name.
#[derive(Clone, Debug, Default)]
pub struct PlaceholderSet {
    items: Vec<Placeholder>,
    index: HashMap<(PlaceholderType, String), usize>,
}

impl PlaceholderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, m: &Match, document: &Path, context: &str, position: Option<usize>) {
        let (kind, max_width, max_height) = match &m.kind {
            PlaceholderKind::Text { .. } => (PlaceholderType::Text, None, None),
            PlaceholderKind::Image { width, height, .. } => {
                (PlaceholderType::Image, Some(*width), Some(*height))
            }
        };
        let location = PlaceholderLocation {
            document: document.to_path_buf(),
            context: context.to_string(),
            occurrences: 1,
            positions: position.into_iter().collect(),
        };
        self.insert(
            Placeholder {
                name: m.name().to_string(),
                kind,
                max_width,
                max_height,
                total_occurrences: 1,
                locations: vec![location],
            },
        );
    }

    /// Unions another set into this one (batch aggregation).
    pub fn merge(&mut self, other: PlaceholderSet) {
        for p in other.items {
            self.insert(p);
        }
    }

    fn insert(&mut self, incoming: Placeholder) {
        let key = (incoming.kind, normalize_name(&incoming.name));
        let Some(&i) = self.index.get(&key) else {
            self.index.insert(key, self.items.len());
            self.items.push(incoming);
            return;
        };
        let existing = &mut self.items[i];
        existing.total_occurrences += incoming.total_occurrences;
        for loc in incoming.locations {
            match existing
                .locations
                .iter_mut()
                .find(|l| l.document == loc.document && l.context == loc.context)
            {
                Some(l) => {
                    l.occurrences += loc.occurrences;
                    l.positions.extend(loc.positions);
                }
                None => existing.locations.push(loc),
            }
        }
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.items
    }

    pub fn into_placeholders(self) -> Vec<Placeholder> {
        self.items
    }

    pub fn get(&self, kind: PlaceholderType, name: &str) -> Option<&Placeholder> {
        self.index
            .get(&(kind, normalize_name(name)))
            .map(|&i| &self.items[i])
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl Extend<Placeholder> for PlaceholderSet {
    fn extend<T: IntoIterator<Item = Placeholder>>(&mut self, iter: T) {
        for p in iter {
            self.insert(p);
        }
    }
}
