use crate::docx::parts::ParagraphRef;
use crate::docx::reconstruct::{node_text, reconstruct_paragraph};
use crate::docx::xml::{set_attr_value, XmlEvent};
use crate::ir::{Match, PositionEntry, TextNodeRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextOutcome {
    /// Spliced through the position map.
    Spliced,
    /// Position map was stale; the paragraph was rewritten as one string.
    Fallback,
    /// The token could not be found at all.
    NotFound,
}

/// Replaces one text match inside the paragraph's nodes.
///
/// Callers must feed matches right to left: a splice only preserves the local
/// offsets of text *before* the replaced range.
pub fn replace_text_match(
    events: &mut [XmlEvent],
    para: &ParagraphRef,
    map: &[PositionEntry],
    m: &Match,
    value: &str,
) -> TextOutcome {
    match plan_splice(events, map, m) {
        Some(plan) => {
            apply_splice(events, &plan, value);
            TextOutcome::Spliced
        }
        None => {
            if fallback_replace(events, para, &m.raw, value) {
                TextOutcome::Fallback
            } else {
                TextOutcome::NotFound
            }
        }
    }
}

/// Node-local coordinates of one match: `(node, local_start, local_end)` per
/// intersecting node, in document order.
struct SplicePlan {
    hits: Vec<(TextNodeRef, usize, usize)>,
}

fn plan_splice(events: &[XmlEvent], map: &[PositionEntry], m: &Match) -> Option<SplicePlan> {
    let (start, end) = (m.start, m.end());
    let mut hits: Vec<(TextNodeRef, usize, usize)> = Vec::new();
    let mut covered = start;
    for entry in map.iter().filter(|e| e.intersects(start, end)) {
        let ov_start = entry.start.max(start);
        let ov_end = entry.end.min(end);
        if ov_start != covered {
            return None;
        }
        let local_start = entry.local_start + (ov_start - entry.start);
        let local_end = entry.local_start + (ov_end - entry.start);
        let expected = m.raw.get(ov_start - start..ov_end - start)?;
        let current = node_text(events, &entry.node)?;
        if current.get(local_start..local_end) != Some(expected) {
            return None;
        }
        hits.push((entry.node.clone(), local_start, local_end));
        covered = ov_end;
    }
    if hits.is_empty() || covered != end {
        return None;
    }
    Some(SplicePlan { hits })
}

fn apply_splice(events: &mut [XmlEvent], plan: &SplicePlan, value: &str) {
    let (Some((first, first_start, _)), Some((last, _, last_end))) =
        (plan.hits.first().cloned(), plan.hits.last().cloned())
    else {
        return;
    };

    let prefix = node_text(events, &first)
        .map(|t| t[..first_start].to_string())
        .unwrap_or_default();
    let suffix = node_text(events, &last)
        .map(|t| t[last_end..].to_string())
        .unwrap_or_default();

    for (node, _, _) in plan.hits.iter().skip(1) {
        set_node_text(events, node, "");
    }
    set_node_text(events, &first, &format!("{prefix}{value}{suffix}"));
}

/// Whole-paragraph string replacement that ignores node boundaries: the full
/// new text lands in the first text node and every other node is emptied.
pub fn fallback_replace(events: &mut [XmlEvent], para: &ParagraphRef, raw: &str, value: &str) -> bool {
    let live = reconstruct_paragraph(events, para);
    let Some(pos) = live.text.find(raw) else {
        return false;
    };
    let Some(first) = live.map.first() else {
        return false;
    };
    let mut text = String::with_capacity(live.text.len() + value.len());
    text.push_str(&live.text[..pos]);
    text.push_str(value);
    text.push_str(&live.text[pos + raw.len()..]);

    for entry in live.map.iter().skip(1) {
        set_node_text(events, &entry.node, "");
    }
    set_node_text(events, &first.node, &text);
    true
}

pub fn set_node_text(events: &mut [XmlEvent], node: &TextNodeRef, text: &str) {
    if let Some(XmlEvent::Text { text: t }) = events.get_mut(node.text_event_index) {
        *t = text.to_string();
    }
    if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
        if let Some(ev) = events.get_mut(node.elem_event_index) {
            set_attr_value(ev, "xml:space", "preserve");
        }
    }
}

/// Replacement of a paragraph's content (everything after `w:pPr`) by new events.
#[derive(Clone, Debug)]
pub struct ContentSplice {
    pub start: usize,
    pub end: usize,
    pub events: Vec<XmlEvent>,
}

impl ContentSplice {
    pub fn for_paragraph(para: &ParagraphRef, events: Vec<XmlEvent>) -> Self {
        Self {
            start: para.content_start(),
            end: para.end,
            events,
        }
    }
}

/// Applies deferred paragraph substitutions. A splice lying inside another
/// splice's range is dropped; the outer one removes it anyway.
pub fn apply_content_splices(events: &mut Vec<XmlEvent>, mut splices: Vec<ContentSplice>) -> usize {
    splices.sort_by_key(|s| s.start);
    let mut kept: Vec<ContentSplice> = Vec::with_capacity(splices.len());
    for s in splices {
        if kept.last().is_some_and(|k| s.start < k.end) {
            continue;
        }
        kept.push(s);
    }
    let applied = kept.len();
    for s in kept.into_iter().rev() {
        let end = s.end.min(events.len());
        events.splice(s.start..end, s.events);
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::xml::{parse_fragment, subtree_end, write_xml_part, XmlPart};
    use crate::placeholder::find_placeholders;

    fn paragraph(xml: &str) -> (Vec<XmlEvent>, ParagraphRef) {
        let events = parse_fragment(xml).expect("parse");
        let end = subtree_end(&events, 0).expect("end");
        let para = ParagraphRef {
            start: 0,
            end,
            table_depth: 0,
            properties: None,
        };
        (events, para)
    }

    fn replace_all(events: &mut [XmlEvent], para: &ParagraphRef, values: &[(&str, &str)]) -> Vec<TextOutcome> {
        let pt = reconstruct_paragraph(events, para);
        let ms = find_placeholders(&pt.text, true);
        let mut outcomes = Vec::new();
        for m in ms.iter().rev() {
            if let Some((_, v)) = values.iter().find(|(k, _)| k.eq_ignore_ascii_case(m.name())) {
                outcomes.push(replace_text_match(events, para, &pt.map, m, v));
            }
        }
        outcomes
    }

    fn text_of(events: &[XmlEvent], para: &ParagraphRef) -> String {
        reconstruct_paragraph(events, para).text
    }

    fn node_texts(events: &[XmlEvent]) -> Vec<String> {
        let mut out = Vec::new();
        let mut in_t = false;
        for ev in events {
            match ev {
                XmlEvent::Start { name, .. } if name == "w:t" => in_t = true,
                XmlEvent::End { name } if name == "w:t" => in_t = false,
                XmlEvent::Text { text } if in_t => out.push(text.clone()),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn replaces_two_placeholders_in_one_node() {
        let (mut ev, p) = paragraph(
            "<w:p><w:r><w:t>Dear {{CUSTOMER_NAME}}, order {{ORDER_ID}} ready.</w:t></w:r></w:p>",
        );
        let out = replace_all(&mut ev, &p, &[("CUSTOMER_NAME", "John Doe"), ("ORDER_ID", "12345")]);
        assert_eq!(out, vec![TextOutcome::Spliced, TextOutcome::Spliced]);
        assert_eq!(text_of(&ev, &p), "Dear John Doe, order 12345 ready.");
    }

    #[test]
    fn three_way_split_collapses_into_first_node() {
        let (mut ev, p) = paragraph(
            r#"<w:p><w:r><w:t>x {{NAM</w:t></w:r><w:r><w:rPr><w:i/></w:rPr><w:t>E_ON</w:t></w:r><w:r><w:t>E}} y</w:t></w:r></w:p>"#,
        );
        let out = replace_all(&mut ev, &p, &[("NAME_ONE", "Value")]);
        assert_eq!(out, vec![TextOutcome::Spliced]);
        assert_eq!(text_of(&ev, &p), "x Value y");
        assert_eq!(node_texts(&ev), vec!["x Value y", "", ""]);
        // runs are emptied, never removed
        assert_eq!(ev.iter().filter(|e| e.is_start_of("w:r")).count(), 3);
    }

    #[test]
    fn every_split_point_gives_the_same_text() {
        let token = "{{NAME}}";
        let single = {
            let (mut ev, p) = paragraph(&format!("<w:p><w:r><w:t>a {token} b</w:t></w:r></w:p>"));
            replace_all(&mut ev, &p, &[("NAME", "Jane")]);
            text_of(&ev, &p)
        };
        let full = format!("a {token} b");
        for i in 1..full.len() {
            for j in i + 1..full.len() {
                let xml = format!(
                    "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
                    &full[..i],
                    &full[i..j],
                    &full[j..]
                );
                let (mut ev, p) = paragraph(&xml);
                let pt = reconstruct_paragraph(&ev, &p);
                assert_eq!(find_placeholders(&pt.text, true).len(), 1, "split {i},{j}");
                replace_all(&mut ev, &p, &[("NAME", "Jane")]);
                assert_eq!(text_of(&ev, &p), single, "split {i},{j}");
            }
        }
    }

    #[test]
    fn right_to_left_keeps_offsets_valid_when_lengths_change() {
        let (mut ev, p) = paragraph(
            "<w:p><w:r><w:t>{{A}}-{{B</w:t></w:r><w:r><w:t>}}-{{C}}</w:t></w:r></w:p>",
        );
        replace_all(
            &mut ev,
            &p,
            &[("A", "a much longer value"), ("B", ""), ("C", "ccc")],
        );
        assert_eq!(text_of(&ev, &p), "a much longer value--ccc");
    }

    #[test]
    fn stale_map_falls_back_to_whole_paragraph() {
        let (mut ev, p) = paragraph("<w:p><w:r><w:t>Hi {{NA</w:t></w:r><w:r><w:t>ME}}!</w:t></w:r></w:p>");
        let pt = reconstruct_paragraph(&ev, &p);
        let m = find_placeholders(&pt.text, true).remove(0);
        // simulate an inconsistent map: node moved under us
        if let XmlEvent::Text { text } = &mut ev[3] {
            *text = "Hi  {{NA".to_string();
        }
        let out = replace_text_match(&mut ev, &p, &pt.map, &m, "Bob");
        assert_eq!(out, TextOutcome::Fallback);
        assert_eq!(text_of(&ev, &p), "Hi  Bob!");
        assert_eq!(node_texts(&ev), vec!["Hi  Bob!", ""]);
    }

    #[test]
    fn missing_token_reports_not_found() {
        let (mut ev, p) = paragraph("<w:p><w:r><w:t>{{X}}</w:t></w:r></w:p>");
        let pt = reconstruct_paragraph(&ev, &p);
        let m = find_placeholders(&pt.text, true).remove(0);
        if let XmlEvent::Text { text } = &mut ev[3] {
            *text = "gone".to_string();
        }
        assert_eq!(
            replace_text_match(&mut ev, &p, &pt.map, &m, "v"),
            TextOutcome::NotFound
        );
        assert_eq!(text_of(&ev, &p), "gone");
    }

    #[test]
    fn zero_length_node_between_fragments_is_left_alone() {
        let (mut ev, p) = paragraph(
            "<w:p><w:r><w:t>{{A</w:t></w:r><w:r><w:t></w:t></w:r><w:r><w:t>B}}</w:t></w:r></w:p>",
        );
        replace_all(&mut ev, &p, &[("AB", "ok")]);
        assert_eq!(text_of(&ev, &p), "ok");
        assert_eq!(ev.iter().filter(|e| e.is_start_of("w:t")).count(), 3);
    }

    #[test]
    fn leading_space_sets_preserve() {
        let (mut ev, p) = paragraph("<w:p><w:r><w:t>{{X}}</w:t></w:r></w:p>");
        replace_all(&mut ev, &p, &[("X", " padded")]);
        let part = XmlPart {
            name: "t".to_string(),
            events: ev,
            baseline_hash: String::new(),
        };
        let xml = String::from_utf8(write_xml_part(&part).expect("write")).expect("utf8");
        assert_eq!(xml, r#"<w:p><w:r><w:t xml:space="preserve"> padded</w:t></w:r></w:p>"#);
    }

    #[test]
    fn content_splice_keeps_paragraph_properties() {
        let mut ev = parse_fragment(
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:t>{{image:a|width:1|height:1}}</w:t></w:r></w:p>"#,
        )
        .expect("parse");
        let para = ParagraphRef {
            start: 0,
            end: ev.len() - 1,
            table_depth: 0,
            properties: Some((1, 3)),
        };
        let run = parse_fragment("<w:r><w:drawing/></w:r>").expect("run");
        let applied = apply_content_splices(&mut ev, vec![ContentSplice::for_paragraph(&para, run)]);
        assert_eq!(applied, 1);
        let part = XmlPart {
            name: "t".to_string(),
            events: ev,
            baseline_hash: String::new(),
        };
        let xml = String::from_utf8(write_xml_part(&part).expect("write")).expect("utf8");
        assert_eq!(
            xml,
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:drawing/></w:r></w:p>"#
        );
    }

    #[test]
    fn nested_splices_keep_only_the_outer_one() {
        let mut ev = parse_fragment("<a><b><c/></b><d/></a>").expect("parse");
        let outer = ContentSplice {
            start: 1,
            end: 5,
            events: vec![XmlEvent::empty("x", &[])],
        };
        let inner = ContentSplice {
            start: 2,
            end: 3,
            events: vec![XmlEvent::empty("y", &[])],
        };
        assert_eq!(apply_content_splices(&mut ev, vec![inner, outer]), 1);
        assert_eq!(ev.len(), 3);
        assert!(matches!(&ev[1], XmlEvent::Empty { name, .. } if name == "x"));
    }
}
