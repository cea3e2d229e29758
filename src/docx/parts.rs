use std::fmt;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;

use super::package::DocxPackage;
use super::xml::{parse_xml_part, subtree_end, XmlEvent, XmlPart};

pub const BODY_PART: &str = "word/document.xml";

static HEADER_FOOTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^word/(header|footer)(\d*)\.xml$").expect("header/footer regex"));

static DOC_PR_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<wp:docPr\s[^>]*?\bid="\s*(\d+)\s*""#).expect("docPr id regex"));

/// Which structural region of the document a part is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PartKind {
    Body,
    Header(u32),
    Footer(u32),
}

impl PartKind {
    pub fn classify(entry_name: &str) -> Option<PartKind> {
        if entry_name == BODY_PART {
            return Some(PartKind::Body);
        }
        let caps = HEADER_FOOTER_RE.captures(entry_name)?;
        let n = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        match caps.get(1).map(|m| m.as_str()) {
            Some("header") => Some(PartKind::Header(n)),
            Some("footer") => Some(PartKind::Footer(n)),
            _ => None,
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartKind::Body => f.write_str("body"),
            PartKind::Header(n) => write!(f, "header{n}"),
            PartKind::Footer(n) => write!(f, "footer{n}"),
        }
    }
}

pub struct DocumentPart {
    pub kind: PartKind,
    pub xml: XmlPart,
}

/// One `w:p` element located by event indices (`start` opens it, `end` closes it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParagraphRef {
    pub start: usize,
    pub end: usize,
    pub table_depth: usize,
    /// Start/end indices of the paragraph's own `w:pPr`, if any.
    pub properties: Option<(usize, usize)>,
}

impl ParagraphRef {
    /// First event index after the paragraph properties.
    pub fn content_start(&self) -> usize {
        match self.properties {
            Some((_, ppr_end)) => ppr_end + 1,
            None => self.start + 1,
        }
    }
}

impl DocumentPart {
    pub fn name(&self) -> &str {
        &self.xml.name
    }

    /// Relationship entry that owns targets referenced from this part.
    pub fn rels_name(&self) -> String {
        match self.xml.name.rsplit_once('/') {
            Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
            None => format!("_rels/{}.rels", self.xml.name),
        }
    }

    pub fn context_label(&self, para: &ParagraphRef) -> String {
        match para.table_depth {
            0 => self.kind.to_string(),
            1 => format!("{}/table", self.kind),
            d => format!("{}/table(depth {d})", self.kind),
        }
    }

    /// Every paragraph of the part in document order, including those nested
    /// inside tables (at any depth) and text boxes.
    pub fn paragraphs(&self) -> Vec<ParagraphRef> {
        let events = &self.xml.events;
        let mut out: Vec<ParagraphRef> = Vec::new();
        let mut tbl_depth = 0usize;
        for (idx, ev) in events.iter().enumerate() {
            match ev {
                XmlEvent::Start { name, .. } if name == "w:tbl" => tbl_depth += 1,
                XmlEvent::End { name } if name == "w:tbl" => {
                    tbl_depth = tbl_depth.saturating_sub(1)
                }
                XmlEvent::Start { name, .. } if name == "w:p" => {
                    let Some(end) = subtree_end(events, idx) else {
                        log::warn!("{}: unterminated paragraph at event {idx}", self.xml.name);
                        continue;
                    };
                    out.push(ParagraphRef {
                        start: idx,
                        end,
                        table_depth: tbl_depth,
                        properties: paragraph_properties(events, idx, end),
                    });
                }
                _ => {}
            }
        }
        out
    }
}

fn paragraph_properties(events: &[XmlEvent], start: usize, end: usize) -> Option<(usize, usize)> {
    let mut i = start + 1;
    while i < end {
        match &events[i] {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } => {
                if name != "w:pPr" {
                    return None;
                }
                return subtree_end(events, i).map(|e| (i, e));
            }
            XmlEvent::End { .. } => return None,
            _ => i += 1,
        }
    }
    None
}

/// Loads the body plus every header and footer part, body first, then headers
/// and footers in numeric order.
pub fn load_parts(pkg: &DocxPackage) -> anyhow::Result<Vec<DocumentPart>> {
    let mut parts: Vec<DocumentPart> = Vec::new();
    for ent in &pkg.entries {
        let Some(kind) = PartKind::classify(&ent.name) else {
            continue;
        };
        let xml = parse_xml_part(&ent.name, &ent.data)
            .with_context(|| format!("parse xml: {}", ent.name))?;
        parts.push(DocumentPart { kind, xml });
    }
    parts.sort_by_key(|p| p.kind);
    Ok(parts)
}

/// Highest `wp:docPr` id used by any `word/*.xml` entry (body, headers,
/// footers, footnotes, comments and the rest).
pub fn max_drawing_id(pkg: &DocxPackage) -> u32 {
    pkg.entries
        .iter()
        .filter(|e| e.name.starts_with("word/") && e.name.ends_with(".xml"))
        .flat_map(|e| {
            let text = String::from_utf8_lossy(&e.data);
            DOC_PR_ID_RE
                .captures_iter(&text)
                .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
                .collect::<Vec<u32>>()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, xml: &str) -> DocumentPart {
        DocumentPart {
            kind: PartKind::classify(name).expect("classify"),
            xml: parse_xml_part(name, xml.as_bytes()).expect("parse"),
        }
    }

    #[test]
    fn classify_orders_body_headers_footers() {
        let mut kinds: Vec<PartKind> = [
            "word/footer1.xml",
            "word/header10.xml",
            "word/document.xml",
            "word/header2.xml",
        ]
        .iter()
        .filter_map(|n| PartKind::classify(n))
        .collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                PartKind::Body,
                PartKind::Header(2),
                PartKind::Header(10),
                PartKind::Footer(1)
            ]
        );
        assert_eq!(PartKind::classify("word/styles.xml"), None);
        assert_eq!(PartKind::classify("word/_rels/header1.xml.rels"), None);
    }

    #[test]
    fn paragraphs_include_nested_tables() {
        let xml = r#"<w:document><w:body>
<w:p><w:r><w:t>a</w:t></w:r></w:p>
<w:tbl><w:tr><w:tc>
  <w:p><w:r><w:t>b</w:t></w:r></w:p>
  <w:tbl><w:tr><w:tc><w:p><w:r><w:t>c</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
</w:tc></w:tr></w:tbl>
<w:p/>
</w:body></w:document>"#;
        let p = part(BODY_PART, xml);
        let paras = p.paragraphs();
        let depths: Vec<usize> = paras.iter().map(|r| r.table_depth).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        assert_eq!(p.context_label(&paras[0]), "body");
        assert_eq!(p.context_label(&paras[1]), "body/table");
        assert_eq!(p.context_label(&paras[2]), "body/table(depth 2)");
        assert!(paras.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn paragraph_properties_are_located() {
        let xml = r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:t>x</w:t></w:r></w:p>"#;
        let p = part("word/header1.xml", xml);
        let paras = p.paragraphs();
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].properties, Some((1, 3)));
        assert_eq!(paras[0].content_start(), 4);
        assert_eq!(p.context_label(&paras[0]), "header1");
    }

    #[test]
    fn rels_name_follows_part_location() {
        let p = part("word/footer3.xml", "<w:ftr/>");
        assert_eq!(p.rels_name(), "word/_rels/footer3.xml.rels");
        let b = part(BODY_PART, "<w:document/>");
        assert_eq!(b.rels_name(), "word/_rels/document.xml.rels");
    }

    #[test]
    fn max_drawing_id_covers_every_word_part() {
        use crate::docx::package::DocxEntry;
        let pkg = DocxPackage {
            entries: vec![
                DocxEntry::new_file(
                    BODY_PART,
                    br#"<w:document><wp:docPr id="4" name="x"/></w:document>"#.to_vec(),
                ),
                DocxEntry::new_file("word/header1.xml", br#"<w:hdr><wp:docPr id="9"/></w:hdr>"#.to_vec()),
                DocxEntry::new_file(
                    "word/footnotes.xml",
                    br#"<w:footnotes><wp:docPr name="fn" id="31" descr="d"/></w:footnotes>"#.to_vec(),
                ),
                DocxEntry::new_file("customXml/item1.xml", br#"<wp:docPr id="500"/>"#.to_vec()),
            ],
        };
        assert_eq!(max_drawing_id(&pkg), 31);
    }
}
