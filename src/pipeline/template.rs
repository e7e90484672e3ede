//! DOCX templates: package I/O and repeating-block location.
//!
//! A template is an OOXML package whose main part, `word/document.xml`,
//! holds one repeating block:
//!
//! ```text
//! <w:body>
//!   … static content …            ← copied once, before all records
//!   <w:p>{#records}</w:p>         ← start marker (dropped)
//!   … block content …             ← instantiated once per record
//!   <w:p>{/records}</w:p>         ← end marker (dropped)
//!   … static content, sectPr …    ← copied once, after all records
//! </w:body>
//! ```
//!
//! The main part is parsed into a flat list of quick-xml events; the block
//! is recorded as event-index ranges so rendering can copy static content
//! untouched and rewrite only the block. Marker rules: each marker must be
//! the only text of a top-level body paragraph, the pair must appear exactly
//! once, and no other `{#…}` section may appear anywhere in the body.

use crate::error::MergeError;
use crate::pipeline::placeholder::{self, TagKind};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read, Write};
use std::ops::Range;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Owned quick-xml event.
pub type XmlEvent = Event<'static>;

/// Path of the main document part inside a DOCX package.
pub const DOCUMENT_PART: &str = "word/document.xml";

/// One entry of the zip package, kept byte-for-byte.
#[derive(Debug, Clone)]
struct PackagePart {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

/// Event-index ranges of the main part around the repeating block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    /// From the start of the part up to (excluding) the start-marker paragraph.
    pub before: Range<usize>,
    /// Between the two marker paragraphs.
    pub block: Range<usize>,
    /// From just after the end-marker paragraph to the end of the part.
    pub after: Range<usize>,
}

/// A parsed, validated template. Read-only once built.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    block_name: String,
    parts: Vec<PackagePart>,
    document_index: usize,
    events: Vec<XmlEvent>,
    layout: BlockLayout,
}

impl Template {
    /// Parse a DOCX package and locate the block named `block_name`.
    ///
    /// `name` is the template's file name, used in error messages.
    pub fn from_bytes(bytes: &[u8], name: &str, block_name: &str) -> Result<Self, MergeError> {
        let parts = read_package(bytes).map_err(|e| MergeError::render(name, e))?;
        let document_index = parts
            .iter()
            .position(|p| p.name == DOCUMENT_PART)
            .ok_or_else(|| {
                MergeError::render(name, format!("not a Word document: no {DOCUMENT_PART}"))
            })?;

        let xml = std::str::from_utf8(&parts[document_index].data)
            .map_err(|e| MergeError::render(name, format!("{DOCUMENT_PART} is not UTF-8: {e}")))?;
        let events = parse_events(xml).map_err(|e| MergeError::render(name, e))?;
        let layout = locate_block(&events, name, block_name)?;

        tracing::debug!(
            "Template '{}': block '{}' spans events {:?}",
            name,
            block_name,
            layout.block
        );

        Ok(Self {
            name: name.to_string(),
            block_name: block_name.to_string(),
            parts,
            document_index,
            events,
            layout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block_name(&self) -> &str {
        &self.block_name
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub(crate) fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    /// Field names referenced inside the repeating block, in first-use order.
    pub fn placeholders(&self) -> Vec<String> {
        let block = &self.events[self.layout.block.clone()];
        let mut names: Vec<String> = Vec::new();
        for range in paragraph_ranges(block) {
            let Ok(text) = text_of(&block[range]) else {
                continue;
            };
            for tag in placeholder::scan(&text) {
                if let TagKind::Field(field) = tag.kind {
                    if !names.iter().any(|n| n == field) {
                        names.push(field.to_string());
                    }
                }
            }
        }
        names
    }

    /// Rebuild the package with `document_xml` as the main part.
    pub(crate) fn repackage(&self, document_xml: &[u8]) -> Result<Vec<u8>, MergeError> {
        write_package(&self.parts, self.document_index, document_xml)
            .map_err(|e| MergeError::render(&self.name, format!("failed to reassemble package: {e}")))
    }
}

// ── Package I/O ──────────────────────────────────────────────────────────

fn read_package(bytes: &[u8]) -> Result<Vec<PackagePart>, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| format!("not a DOCX package: {e}"))?;

    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| format!("corrupt package entry #{i}: {e}"))?;
        let name = file.name().to_string();
        let is_dir = file.is_dir();
        let mut data = Vec::new();
        if !is_dir {
            file.read_to_end(&mut data)
                .map_err(|e| format!("corrupt package entry '{name}': {e}"))?;
        }
        parts.push(PackagePart { name, data, is_dir });
    }
    Ok(parts)
}

fn write_package(
    parts: &[PackagePart],
    replace_index: usize,
    replacement: &[u8],
) -> zip::result::ZipResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (i, part) in parts.iter().enumerate() {
        if part.is_dir {
            zip.add_directory(part.name.clone(), options)?;
            continue;
        }
        zip.start_file(part.name.clone(), options)?;
        let data = if i == replace_index {
            replacement
        } else {
            &part.data
        };
        zip.write_all(data)?;
    }

    Ok(zip.finish()?.into_inner())
}

// ── XML helpers ──────────────────────────────────────────────────────────

pub(crate) fn parse_events(xml: &str) -> Result<Vec<XmlEvent>, String> {
    let mut reader = Reader::from_str(xml);
    let mut events = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => events.push(event.into_owned()),
            Err(e) => {
                return Err(format!(
                    "{DOCUMENT_PART} is not well-formed near byte {}: {e}",
                    reader.buffer_position()
                ))
            }
        }
    }
    Ok(events)
}

pub(crate) fn is_start(event: &XmlEvent, name: &[u8]) -> bool {
    matches!(event, Event::Start(e) if e.name().as_ref() == name)
}

pub(crate) fn is_end(event: &XmlEvent, name: &[u8]) -> bool {
    matches!(event, Event::End(e) if e.name().as_ref() == name)
}

/// Index of the `End` event closing the `Start` at `start`.
pub(crate) fn matching_end(events: &[XmlEvent], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, event) in events.iter().enumerate().skip(start) {
        match event {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Ranges of every `w:p` element in `events`, outermost first.
pub(crate) fn paragraph_ranges(events: &[XmlEvent]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    for (i, event) in events.iter().enumerate() {
        match event {
            Event::Start(e) if e.name().as_ref() == b"w:p" => {
                if let Some(end) = matching_end(events, i) {
                    ranges.push(i..end + 1);
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"w:p" => ranges.push(i..i + 1),
            _ => {}
        }
    }
    ranges
}

/// Concatenated, unescaped `w:t` text of an element.
pub(crate) fn text_of(events: &[XmlEvent]) -> Result<String, String> {
    let mut text = String::new();
    let mut in_text = false;
    for event in events {
        match event {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) if e.name().as_ref() == b"w:t" => in_text = false,
            Event::Text(t) if in_text => {
                let s = t.unescape().map_err(|e| format!("bad text escape: {e}"))?;
                text.push_str(&s);
            }
            Event::CData(c) if in_text => text.push_str(&String::from_utf8_lossy(c)),
            _ => {}
        }
    }
    Ok(text)
}

// ── Block location ───────────────────────────────────────────────────────

/// A direct child of `w:body`.
struct BodyChild {
    range: Range<usize>,
    is_paragraph: bool,
}

fn body_children(events: &[XmlEvent], template: &str) -> Result<Vec<BodyChild>, MergeError> {
    let body_start = events
        .iter()
        .position(|e| is_start(e, b"w:body"))
        .ok_or_else(|| MergeError::render(template, "document has no <w:body>"))?;
    let body_end = matching_end(events, body_start)
        .ok_or_else(|| MergeError::render(template, "unbalanced XML in <w:body>"))?;

    let mut children = Vec::new();
    let mut i = body_start + 1;
    while i < body_end {
        let child = match &events[i] {
            Event::Start(e) => {
                let end = matching_end(events, i)
                    .ok_or_else(|| MergeError::render(template, "unbalanced XML in <w:body>"))?;
                BodyChild {
                    range: i..end + 1,
                    is_paragraph: e.name().as_ref() == b"w:p",
                }
            }
            Event::Empty(e) => BodyChild {
                range: i..i + 1,
                is_paragraph: e.name().as_ref() == b"w:p",
            },
            _ => BodyChild {
                range: i..i + 1,
                is_paragraph: false,
            },
        };
        i = child.range.end;
        children.push(child);
    }
    Ok(children)
}

fn locate_block(
    events: &[XmlEvent],
    template: &str,
    block_name: &str,
) -> Result<BlockLayout, MergeError> {
    let open_marker = format!("{{#{block_name}}}");
    let close_marker = format!("{{/{block_name}}}");
    let malformed = |detail: String| MergeError::malformed(template, detail);

    let mut open: Option<Range<usize>> = None;
    let mut close: Option<Range<usize>> = None;

    for child in body_children(events, template)? {
        let text = text_of(&events[child.range.clone()]).map_err(|e| MergeError::render(template, e))?;
        let tags = placeholder::scan(&text);
        let markers: Vec<_> = tags.iter().filter(|t| t.is_marker()).collect();
        if markers.is_empty() {
            continue;
        }

        for tag in &markers {
            match tag.kind {
                TagKind::BlockOpen(n) | TagKind::BlockClose(n) if n != block_name => {
                    return Err(malformed(format!(
                        "unsupported section '{}'; only the '{block_name}' block is allowed",
                        &text[tag.start..tag.end]
                    )));
                }
                _ => {}
            }
        }

        if !child.is_paragraph {
            return Err(malformed(format!(
                "block markers must be top-level paragraphs, found one inside a table or other element: '{}'",
                text.trim()
            )));
        }
        let outside_marker = markers.len() == 1
            && text[..markers[0].start].trim().is_empty()
            && text[markers[0].end..].trim().is_empty();
        if !outside_marker {
            return Err(malformed(format!(
                "a block marker must be alone in its paragraph, found '{}'",
                text.trim()
            )));
        }

        match markers[0].kind {
            TagKind::BlockOpen(_) => {
                if close.is_some() {
                    return Err(malformed(format!(
                        "second '{open_marker}' after '{close_marker}': only one repeating block is supported"
                    )));
                }
                if open.is_some() {
                    return Err(malformed(format!(
                        "nested '{open_marker}': blocks cannot be nested"
                    )));
                }
                open = Some(child.range);
            }
            TagKind::BlockClose(_) => {
                if open.is_none() {
                    return Err(malformed(format!(
                        "'{close_marker}' without a preceding '{open_marker}'"
                    )));
                }
                if close.is_some() {
                    return Err(malformed(format!("unmatched second '{close_marker}'")));
                }
                close = Some(child.range);
            }
            TagKind::Field(_) => {}
        }
    }

    let open = open.ok_or_else(|| malformed(format!("missing start marker '{open_marker}'")))?;
    let close = close.ok_or_else(|| malformed(format!("missing end marker '{close_marker}'")))?;

    Ok(BlockLayout {
        before: 0..open.start,
        block: open.end..close.start,
        after: close.end..events.len(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const DOC_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;
    const DOC_TAIL: &str = r#"<w:sectPr><w:pgSz w:w="11906" w:h="16838"/></w:sectPr></w:body></w:document>"#;

    pub(crate) fn para(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    pub(crate) fn document(body: &str) -> String {
        format!("{DOC_HEAD}{body}{DOC_TAIL}")
    }

    pub(crate) fn docx(document_xml: &str) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
            .unwrap();
        zip.start_file(DOCUMENT_PART, options).unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn parse(body: &str) -> Result<Template, MergeError> {
        Template::from_bytes(&docx(&document(body)), "t.docx", "records")
    }

    fn malformed_detail(body: &str) -> String {
        match parse(body) {
            Err(MergeError::TemplateMalformed { detail, .. }) => detail,
            other => panic!("expected TemplateMalformed, got {other:?}"),
        }
    }

    #[test]
    fn locates_block_between_marker_paragraphs() {
        let body = format!(
            "{}{}{}{}",
            para("封面"),
            para("{#records}"),
            para("姓名：{姓名}"),
            para("{/records}")
        );
        let t = parse(&body).unwrap();
        let block = &t.events()[t.layout().block.clone()];
        assert_eq!(text_of(block).unwrap(), "姓名：{姓名}");
        let before = &t.events()[t.layout().before.clone()];
        assert_eq!(text_of(before).unwrap(), "封面");
        let after = &t.events()[t.layout().after.clone()];
        assert!(after.iter().any(|e| is_start(e, b"w:sectPr")));
    }

    #[test]
    fn markers_split_across_runs_are_found() {
        let split_open = r#"<w:p><w:r><w:t>{#rec</w:t></w:r><w:r><w:t>ords}</w:t></w:r></w:p>"#;
        let body = format!("{split_open}{}{}", para("{x}"), para("{{/records}}"));
        assert!(parse(&body).is_ok());
    }

    #[test]
    fn lists_placeholders_in_block() {
        let body = format!(
            "{}{}{}{}",
            para("{#records}"),
            para("{姓名}／{性別}"),
            para("{姓名}"),
            para("{/records}")
        );
        assert_eq!(parse(&body).unwrap().placeholders(), vec!["姓名", "性別"]);
    }

    #[test]
    fn missing_markers_are_malformed() {
        assert!(malformed_detail(&para("{姓名}")).contains("missing start marker"));
        let body = format!("{}{}", para("{#records}"), para("{姓名}"));
        assert!(malformed_detail(&body).contains("missing end marker"));
    }

    #[test]
    fn close_before_open_is_malformed() {
        let body = format!("{}{}", para("{/records}"), para("{#records}"));
        assert!(malformed_detail(&body).contains("without a preceding"));
    }

    #[test]
    fn nested_block_is_malformed() {
        let body = format!(
            "{}{}{}{}",
            para("{#records}"),
            para("{#records}"),
            para("{/records}"),
            para("{/records}")
        );
        assert!(malformed_detail(&body).contains("nested"));
    }

    #[test]
    fn second_block_is_malformed() {
        let body = format!(
            "{}{}{}{}",
            para("{#records}"),
            para("{/records}"),
            para("{#records}"),
            para("{/records}")
        );
        assert!(malformed_detail(&body).contains("only one repeating block"));
    }

    #[test]
    fn other_sections_are_malformed() {
        let body = format!(
            "{}{}{}{}",
            para("{#records}"),
            para("{#hasCar}"),
            para("{/hasCar}"),
            para("{/records}")
        );
        assert!(malformed_detail(&body).contains("unsupported section"));
    }

    #[test]
    fn marker_sharing_a_paragraph_is_malformed() {
        let body = format!("{}{}", para("名單 {#records}"), para("{/records}"));
        assert!(malformed_detail(&body).contains("alone in its paragraph"));
    }

    #[test]
    fn marker_inside_table_is_malformed() {
        let table = format!("<w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>", para("{#records}"));
        let body = format!("{table}{}", para("{/records}"));
        assert!(malformed_detail(&body).contains("top-level paragraphs"));
    }

    #[test]
    fn non_zip_is_render_error() {
        let err = Template::from_bytes(b"plain text", "t.docx", "records").unwrap_err();
        assert!(matches!(err, MergeError::Render { .. }));
    }

    #[test]
    fn zip_without_document_part_is_render_error() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("hello.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"hi").unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        let err = Template::from_bytes(&bytes, "t.docx", "records").unwrap_err();
        assert!(err.to_string().contains("not a Word document"), "got: {err}");
    }

    #[test]
    fn broken_xml_is_render_error() {
        let xml = format!("{DOC_HEAD}<w:p><w:r></w:p>{DOC_TAIL}");
        let err = Template::from_bytes(&docx(&xml), "t.docx", "records").unwrap_err();
        assert!(matches!(err, MergeError::Render { .. }), "got: {err:?}");
    }

    #[test]
    fn repackage_keeps_other_parts() {
        let body = format!("{}{}", para("{#records}"), para("{/records}"));
        let t = parse(&body).unwrap();
        let bytes = t.repackage(b"<x/>").unwrap();
        let parts = read_package(&bytes).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "[Content_Types].xml");
        assert_eq!(parts[1].data, b"<x/>");
    }
}
