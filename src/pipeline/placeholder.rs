//! Placeholder scanning shared by the template renderer and the field deriver.
//!
//! Tag syntax:
//!
//! | Text | Meaning |
//! |------|---------|
//! | `{name}` or `{{name}}` | substitute field `name` |
//! | `{#records}` | open the repeating block named `records` |
//! | `{/records}` | close it |
//!
//! Whitespace inside the braces is ignored. A brace with no closing partner,
//! or an empty tag, is ordinary text.

use crate::record::Record;

/// What a tag asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind<'a> {
    Field(&'a str),
    BlockOpen(&'a str),
    BlockClose(&'a str),
}

/// A tag located in a string; `start..end` is its byte span including braces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    pub start: usize,
    pub end: usize,
    pub kind: TagKind<'a>,
}

impl Tag<'_> {
    pub fn is_marker(&self) -> bool {
        !matches!(self.kind, TagKind::Field(_))
    }
}

/// Find every tag in `text`, left to right.
pub fn scan(text: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let (open_len, close) = if text[start..].starts_with("{{") {
            (2, "}}")
        } else {
            (1, "}")
        };
        let inner_start = start + open_len;

        let Some(close_offset) = text[inner_start..].find(close) else {
            pos = start + 1;
            continue;
        };
        let inner_end = inner_start + close_offset;
        let inner = text[inner_start..inner_end].trim();

        if inner.is_empty() || inner.contains('{') {
            pos = start + 1;
            continue;
        }

        let kind = if let Some(name) = inner.strip_prefix('#') {
            TagKind::BlockOpen(name.trim())
        } else if let Some(name) = inner.strip_prefix('/') {
            TagKind::BlockClose(name.trim())
        } else {
            TagKind::Field(inner)
        };

        let end = inner_end + close.len();
        tags.push(Tag { start, end, kind });
        pos = end;
    }

    tags
}

/// Substitute every field tag in `template` from `record`; missing fields
/// become empty. Block markers are left in place.
pub fn fill(template: &str, record: &Record) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for tag in scan(template) {
        if let TagKind::Field(name) = tag.kind {
            out.push_str(&template[last..tag.start]);
            out.push_str(&record.text(name));
            last = tag.end;
        }
    }
    out.push_str(&template[last..]);
    out
}
