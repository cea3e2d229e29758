use crate::ir::{PositionEntry, TextNodeRef};

use super::parts::ParagraphRef;
use super::xml::XmlEvent;

/// Logical text of one paragraph plus the map back onto its text nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParagraphText {
    pub text: String,
    pub map: Vec<PositionEntry>,
}

/// Concatenates every `w:t` of the paragraph in document order.
///
/// Paragraphs nested inside this one (text boxes) are left to their own pass.
/// Empty text nodes produce no map entry.
pub fn reconstruct_paragraph(events: &[XmlEvent], para: &ParagraphRef) -> ParagraphText {
    let mut out = ParagraphText::default();
    let mut nested_p = 0usize;
    let mut current_t: Option<usize> = None;

    let end = para.end.min(events.len());
    for idx in (para.start + 1)..end {
        match &events[idx] {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:p" => nested_p += 1,
                "w:t" if nested_p == 0 => current_t = Some(idx),
                _ => {}
            },
            XmlEvent::End { name } => match name.as_str() {
                "w:p" => nested_p = nested_p.saturating_sub(1),
                "w:t" => current_t = None,
                _ => {}
            },
            XmlEvent::Text { text } => {
                let Some(elem) = current_t else {
                    continue;
                };
                if nested_p > 0 || text.is_empty() {
                    continue;
                }
                let start = out.text.len();
                out.text.push_str(text);
                out.map.push(PositionEntry {
                    start,
                    end: out.text.len(),
                    node: TextNodeRef {
                        elem_event_index: elem,
                        text_event_index: idx,
                    },
                    local_start: 0,
                    local_end: text.len(),
                });
            }
            _ => {}
        }
    }
    out
}

/// Current text of a node, if the handle still points at a text event.
pub fn node_text<'a>(events: &'a [XmlEvent], node: &TextNodeRef) -> Option<&'a str> {
    match events.get(node.text_event_index)? {
        XmlEvent::Text { text } => Some(text.as_str()),
        _ => None,
    }
}
