//! Block rendering: template + records → merged DOCX.
//!
//! Static content before and after the block is copied once, event for
//! event. The block's events are re-emitted once per record with every
//! `{field}` replaced, and a page-break paragraph goes between (or after)
//! instances according to [`PageBreakPolicy`].
//!
//! ## Split runs
//!
//! Word freely splits a typed `{姓名}` over several runs (spell-check,
//! revision marks, formatting changes). Substitution therefore works on the
//! concatenated `w:t` text of each paragraph: a tag's value is written into
//! the text node where the tag starts, and the rest of the tag is removed
//! from the following nodes. Run properties are untouched, so the value
//! takes the formatting of the tag's first character.
//!
//! ## Values
//!
//! Values are XML-escaped on write. With line breaks enabled a `\n` in a
//! value ends the text node and inserts `<w:br/>`; otherwise it is a space.

use crate::config::PageBreakPolicy;
use crate::error::MergeError;
use crate::pipeline::placeholder::{self, TagKind};
use crate::pipeline::template::{Template, XmlEvent};
use crate::progress::ProgressCallback;
use crate::record::Record;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, info};

/// Per-render switches, derived from [`crate::config::MergeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub page_breaks: PageBreakPolicy,
    pub line_breaks: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            page_breaks: PageBreakPolicy::BetweenRecords,
            line_breaks: true,
        }
    }
}

/// The merged package and what went into it.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    /// Block instances written, one per record.
    pub instances: usize,
    /// Page-break paragraphs inserted.
    pub page_breaks: usize,
}

/// Render one block instance per record, in order.
///
/// Runs synchronously; the orchestrator calls it from `spawn_blocking`.
pub fn render(
    template: &Template,
    records: &[Record],
    options: &RenderOptions,
    progress: Option<&ProgressCallback>,
) -> Result<RenderedDocument, MergeError> {
    let events = template.events();
    let layout = template.layout();
    let block = &events[layout.block.clone()];
    let paragraphs = collect_paragraphs(block).map_err(|e| MergeError::render(template.name(), e))?;

    debug!(
        "Rendering {} records through block '{}' of '{}' ({} paragraphs with fields)",
        records.len(),
        template.block_name(),
        template.name(),
        paragraphs.len()
    );

    let mut out = Emitter::new();
    let fail = |e: String| MergeError::render(template.name(), e);

    out.emit_all(&events[layout.before.clone()]).map_err(fail)?;

    let total = records.len();
    let mut page_breaks = 0;
    for (i, record) in records.iter().enumerate() {
        if i > 0 && options.page_breaks == PageBreakPolicy::BetweenRecords {
            out.page_break().map_err(fail)?;
            page_breaks += 1;
        }

        let edits = BlockEdits::for_record(&paragraphs, record, options.line_breaks);
        out.emit_instance(block, &edits).map_err(fail)?;

        if options.page_breaks == PageBreakPolicy::AfterEveryRecord {
            out.page_break().map_err(fail)?;
            page_breaks += 1;
        }

        if let Some(cb) = progress {
            cb.on_record_rendered(i + 1, total);
        }
    }

    out.emit_all(&events[layout.after.clone()]).map_err(fail)?;

    let document_xml = out.finish();
    let bytes = template.repackage(&document_xml)?;

    info!(
        "Rendered {} instances, {} page breaks ({} bytes)",
        total,
        page_breaks,
        bytes.len()
    );

    Ok(RenderedDocument {
        bytes,
        instances: total,
        page_breaks,
    })
}

// ── Paragraph analysis (once per template) ───────────────────────────────

/// One `w:t` text node: the index of its `Start` and `Text` events within
/// the block, and its unescaped content.
struct TextSlot {
    start_tag: usize,
    text: usize,
    content: String,
}

/// A paragraph of the block that contains at least one field tag.
struct FieldParagraph {
    slots: Vec<TextSlot>,
    /// Byte spans in the concatenated slot text, with the field name.
    fields: Vec<(Range<usize>, String)>,
}

fn collect_paragraphs(block: &[XmlEvent]) -> Result<Vec<FieldParagraph>, String> {
    let mut stack: Vec<Vec<TextSlot>> = Vec::new();
    let mut open_text: Option<usize> = None;
    let mut paragraphs = Vec::new();

    for (i, event) in block.iter().enumerate() {
        match event {
            Event::Start(e) if e.name().as_ref() == b"w:p" => stack.push(Vec::new()),
            Event::End(e) if e.name().as_ref() == b"w:p" => {
                if let Some(slots) = stack.pop() {
                    if let Some(paragraph) = FieldParagraph::new(slots) {
                        paragraphs.push(paragraph);
                    }
                }
            }
            Event::Start(e) if e.name().as_ref() == b"w:t" => open_text = Some(i),
            Event::End(e) if e.name().as_ref() == b"w:t" => open_text = None,
            Event::Text(t) => {
                if let (Some(start_tag), Some(slots)) = (open_text, stack.last_mut()) {
                    let content = t
                        .unescape()
                        .map_err(|e| format!("bad text escape: {e}"))?
                        .into_owned();
                    slots.push(TextSlot {
                        start_tag,
                        text: i,
                        content,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(paragraphs)
}

impl FieldParagraph {
    fn new(slots: Vec<TextSlot>) -> Option<Self> {
        let joined: String = slots.iter().map(|s| s.content.as_str()).collect();
        let fields: Vec<_> = placeholder::scan(&joined)
            .into_iter()
            .filter_map(|tag| match tag.kind {
                TagKind::Field(name) => Some((tag.start..tag.end, name.to_string())),
                _ => None,
            })
            .collect();
        if fields.is_empty() {
            None
        } else {
            Some(Self { slots, fields })
        }
    }
}

// ── Substitution (once per record) ───────────────────────────────────────

/// Replacement lines per text event, keyed by block index.
#[derive(Default)]
struct BlockEdits {
    texts: HashMap<usize, Vec<String>>,
    preserve: HashSet<usize>,
}

impl BlockEdits {
    fn for_record(paragraphs: &[FieldParagraph], record: &Record, line_breaks: bool) -> Self {
        let mut edits = Self::default();
        for paragraph in paragraphs {
            edits.substitute(paragraph, record, line_breaks);
        }
        edits
    }

    fn substitute(&mut self, paragraph: &FieldParagraph, record: &Record, line_breaks: bool) {
        let fields = &paragraph.fields;
        let mut offset = 0;
        let mut next = 0;

        for slot in &paragraph.slots {
            let mut lines = Vec::new();
            let mut current = String::new();

            for (i, ch) in slot.content.char_indices() {
                let pos = offset + i;
                while next < fields.len() && fields[next].0.end <= pos {
                    next += 1;
                }
                match fields.get(next) {
                    Some((span, name)) if span.start <= pos => {
                        if span.start == pos {
                            push_value(&mut lines, &mut current, &record.text(name), line_breaks);
                        }
                    }
                    _ => current.push(ch),
                }
            }
            lines.push(current);
            offset += slot.content.len();

            if lines.len() > 1 || lines[0] != slot.content {
                self.preserve.insert(slot.start_tag);
                self.texts.insert(slot.text, lines);
            }
        }
    }
}

fn push_value(lines: &mut Vec<String>, current: &mut String, value: &str, line_breaks: bool) {
    let value = value.replace("\r\n", "\n").replace('\r', "\n");
    for (k, part) in value.split('\n').enumerate() {
        if k > 0 {
            if line_breaks {
                lines.push(std::mem::take(current));
            } else {
                current.push(' ');
            }
        }
        // XML 1.0 forbids most C0 controls.
        current.extend(part.chars().filter(|c| !c.is_control() || *c == '\t'));
    }
}

// ── Serialisation ────────────────────────────────────────────────────────

struct Emitter {
    writer: Writer<Vec<u8>>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn emit(&mut self, event: &XmlEvent) -> Result<(), String> {
        self.writer
            .write_event(event)
            .map_err(|e| format!("failed to write document XML: {e}"))
    }

    fn emit_all(&mut self, events: &[XmlEvent]) -> Result<(), String> {
        events.iter().try_for_each(|e| self.emit(e))
    }

    fn emit_instance(&mut self, block: &[XmlEvent], edits: &BlockEdits) -> Result<(), String> {
        for (i, event) in block.iter().enumerate() {
            if edits.preserve.contains(&i) {
                self.emit(&text_start())?;
            } else if let Some(lines) = edits.texts.get(&i) {
                for (k, line) in lines.iter().enumerate() {
                    if k > 0 {
                        self.emit(&Event::End(BytesEnd::new("w:t")))?;
                        self.emit(&Event::Empty(BytesStart::new("w:br")))?;
                        self.emit(&text_start())?;
                    }
                    self.emit(&Event::Text(BytesText::new(line).into_owned()))?;
                }
            } else {
                self.emit(event)?;
            }
        }
        Ok(())
    }

    /// `<w:p><w:r><w:br w:type="page"/></w:r></w:p>`
    fn page_break(&mut self) -> Result<(), String> {
        self.emit(&Event::Start(BytesStart::new("w:p")))?;
        self.emit(&Event::Start(BytesStart::new("w:r")))?;
        self.emit(&Event::Empty(
            BytesStart::new("w:br").with_attributes([("w:type", "page")]),
        ))?;
        self.emit(&Event::End(BytesEnd::new("w:r")))?;
        self.emit(&Event::End(BytesEnd::new("w:p")))
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

fn text_start() -> XmlEvent {
    Event::Start(BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::template::tests::{document, docx, para};
    use crate::pipeline::template::{parse_events, text_of, DOCUMENT_PART};
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn people() -> Vec<Record> {
        vec![
            [("姓名", "王小明"), ("性別", "男")].into_iter().collect(),
            [("姓名", "李小華"), ("性別", "女")].into_iter().collect(),
            [("姓名", "陳大文")].into_iter().collect(),
        ]
    }

    fn block_body(inner: &str) -> String {
        format!(
            "{}{}{inner}{}{}",
            para("名單：{姓名}"),
            para("{#records}"),
            para("{/records}"),
            para("完")
        )
    }

    fn document_xml(bytes: &[u8]) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    fn merge(body: &str, records: &[Record], options: RenderOptions) -> (RenderedDocument, String) {
        let template = Template::from_bytes(&docx(&document(body)), "t.docx", "records").unwrap();
        let rendered = render(&template, records, &options, None).unwrap();
        let xml = document_xml(&rendered.bytes);
        (rendered, xml)
    }

    fn text(xml: &str) -> String {
        text_of(&parse_events(xml).unwrap()).unwrap()
    }

    #[test]
    fn one_instance_per_record_in_order() {
        let body = block_body(&para("{姓名}（{性別}）"));
        let (rendered, xml) = merge(&body, &people(), RenderOptions::default());
        assert_eq!(rendered.instances, 3);
        assert_eq!(
            text(&xml),
            "名單：{姓名}王小明（男）李小華（女）陳大文（）完"
        );
        assert_eq!(rendered.page_breaks, 2);
        assert_eq!(xml.matches(r#"w:type="page""#).count(), 2);
    }

    #[test]
    fn trailing_break_after_every_record() {
        let options = RenderOptions {
            page_breaks: PageBreakPolicy::AfterEveryRecord,
            ..RenderOptions::default()
        };
        let (rendered, xml) = merge(&block_body(&para("{姓名}")), &people(), options);
        assert_eq!(rendered.page_breaks, 3);
        assert_eq!(xml.matches(r#"w:type="page""#).count(), 3);
    }

    #[test]
    fn single_record_has_no_break_between() {
        let (rendered, xml) = merge(
            &block_body(&para("{姓名}")),
            &people()[..1],
            RenderOptions::default(),
        );
        assert_eq!(rendered.page_breaks, 0);
        assert!(!xml.contains(r#"w:type="page""#));
    }

    #[test]
    fn markers_and_static_content_survive_once() {
        let (_, xml) = merge(&block_body(&para("{姓名}")), &people(), RenderOptions::default());
        assert!(!xml.contains("{#records}"));
        assert!(!xml.contains("{/records}"));
        assert_eq!(xml.matches("名單：").count(), 1);
        assert_eq!(xml.matches("<w:sectPr>").count(), 1);
    }

    #[test]
    fn tag_split_across_runs_is_replaced() {
        let split = r#"<w:p><w:r><w:t>{姓</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>名}先生</w:t></w:r></w:p>"#;
        let (_, xml) = merge(&block_body(split), &people()[..1], RenderOptions::default());
        assert!(text(&xml).contains("王小明先生"));
        assert!(xml.contains(r#"<w:t xml:space="preserve">王小明</w:t>"#), "{xml}");
        assert!(xml.contains(r#"<w:b/></w:rPr><w:t xml:space="preserve">先生</w:t>"#), "{xml}");
    }

    #[test]
    fn values_are_escaped() {
        let records: Vec<Record> = vec![[("姓名", "A & B <C>")].into_iter().collect()];
        let (_, xml) = merge(&block_body(&para("{姓名}")), &records, RenderOptions::default());
        assert!(xml.contains("A &amp; B &lt;C&gt;"));
        assert!(text(&xml).contains("A & B <C>"));
    }

    #[test]
    fn newlines_become_line_breaks() {
        let records: Vec<Record> = vec![[("地址", "台北市\n中正區")].into_iter().collect()];
        let (_, xml) = merge(&block_body(&para("{地址}")), &records, RenderOptions::default());
        assert!(
            xml.contains(r#"台北市</w:t><w:br/><w:t xml:space="preserve">中正區"#),
            "{xml}"
        );
    }

    #[test]
    fn newlines_collapse_when_line_breaks_are_off() {
        let records: Vec<Record> = vec![[("地址", "台北市\r\n中正區")].into_iter().collect()];
        let options = RenderOptions {
            line_breaks: false,
            ..RenderOptions::default()
        };
        let (_, xml) = merge(&block_body(&para("{地址}")), &records, options);
        assert!(text(&xml).contains("台北市 中正區"));
        assert!(!xml.contains("<w:br/>"));
    }

    #[test]
    fn table_cells_inside_block_are_filled() {
        let table = format!(
            "<w:tbl><w:tblPr/><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
            para("姓名：{姓名}"),
            para("性別：{性別}")
        );
        let (rendered, xml) = merge(&block_body(&table), &people(), RenderOptions::default());
        assert_eq!(rendered.instances, 3);
        assert_eq!(xml.matches("<w:tbl>").count(), 3);
        assert_eq!(
            text(&xml),
            "名單：{姓名}姓名：王小明性別：男姓名：李小華性別：女姓名：陳大文性別：完"
        );
    }

    #[test]
    fn unclosed_double_brace_keeps_later_tags_live() {
        let (_, xml) = merge(
            &block_body(&para("{{備註} {姓名}")),
            &people()[..1],
            RenderOptions::default(),
        );
        assert!(text(&xml).contains("{ 王小明"), "{xml}");
    }

    #[test]
    fn paragraphs_without_tags_are_copied_verbatim() {
        let plain = r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:t>通知書</w:t></w:r></w:p>"#;
        let (_, xml) = merge(&block_body(plain), &people(), RenderOptions::default());
        assert_eq!(xml.matches(plain).count(), 3);
    }

    #[test]
    fn progress_sees_every_record() {
        use crate::progress::MergeProgressCallback;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Count(AtomicUsize);
        impl MergeProgressCallback for Count {
            fn on_record_rendered(&self, index: usize, total: usize) {
                assert!(index <= total);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Count(AtomicUsize::new(0)));
        let cb: ProgressCallback = counter.clone();
        let template = Template::from_bytes(
            &docx(&document(&block_body(&para("{姓名}")))),
            "t.docx",
            "records",
        )
        .unwrap();
        render(&template, &people(), &RenderOptions::default(), Some(&cb)).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }
}
