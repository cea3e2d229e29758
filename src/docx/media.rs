use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::imaging::LoadedImage;

use super::package::DocxPackage;
use super::parts::DocumentPart;
use super::xml::{escape_attr, find_attr, parse_fragment, parse_xml_part, write_xml_part, XmlEvent, XmlPart};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Handle returned when an image has been wired into a part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAttachment {
    pub rel_id: String,
    pub drawing_id: u32,
}

/// Tracks media entries, relationships and content types added while one
/// document is being processed. Nothing reaches the package until `finish`.
pub struct MediaRegistry {
    prefix: String,
    next_media: usize,
    next_drawing_id: u32,
    media_by_source: HashMap<PathBuf, String>,
    new_media: Vec<(String, Vec<u8>)>,
    rels: HashMap<String, XmlPart>,
    rel_by_target: HashMap<(String, String), String>,
    content_types: Option<XmlPart>,
    existing_names: HashSet<String>,
}

impl MediaRegistry {
    pub fn new(pkg: &DocxPackage, prefix: &str, max_drawing_id: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            next_media: 1,
            next_drawing_id: max_drawing_id + 1,
            media_by_source: HashMap::new(),
            new_media: Vec::new(),
            rels: HashMap::new(),
            rel_by_target: HashMap::new(),
            content_types: None,
            existing_names: pkg.entries.iter().map(|e| e.name.clone()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_media.is_empty() && self.rels.is_empty() && self.content_types.is_none()
    }

    /// Registers `image` (read from `source`) as media referenced from `part`.
    ///
    /// All fallible work happens on staged copies; the registry only changes
    /// once every piece (relationship, content type, media entry) is ready.
    pub fn attach(
        &mut self,
        pkg: &DocxPackage,
        part: &DocumentPart,
        source: &Path,
        image: &LoadedImage,
    ) -> anyhow::Result<ImageAttachment> {
        let media = self.plan_media(source, image);
        let target = relative_target(part.name(), &media.name);
        let key = (part.rels_name(), target);

        let (rel_id, staged_rels) = match self.rel_by_target.get(&key) {
            Some(id) => (id.clone(), None),
            None => {
                let mut rels = self.load_relationships(pkg, &key.0)?;
                let id = add_relationship(&mut rels, &key.1)?;
                (id, Some(rels))
            }
        };
        let staged_types = self.staged_content_types(pkg, image)?;

        if let Some(rels) = staged_rels {
            self.rels.insert(key.0.clone(), rels);
            self.rel_by_target.insert(key, rel_id.clone());
        }
        if let Some(types) = staged_types {
            self.content_types = Some(types);
        }
        if let Some(next_media) = media.next_media {
            self.next_media = next_media;
            self.existing_names.insert(media.name.clone());
            self.new_media.push((media.name.clone(), image.bytes.clone()));
            self.media_by_source.insert(source.to_path_buf(), media.name);
        }
        let drawing_id = self.next_drawing_id;
        self.next_drawing_id += 1;
        Ok(ImageAttachment { rel_id, drawing_id })
    }

    /// Media entry for `source`: the one already registered, or the next free name.
    fn plan_media(&self, source: &Path, image: &LoadedImage) -> MediaPlan {
        if let Some(name) = self.media_by_source.get(source) {
            return MediaPlan {
                name: name.clone(),
                next_media: None,
            };
        }
        let mut n = self.next_media;
        loop {
            let candidate = format!("word/media/{}{}.{}", self.prefix, n, image.extension);
            n += 1;
            if !self.existing_names.contains(&candidate) {
                return MediaPlan {
                    name: candidate,
                    next_media: Some(n),
                };
            }
        }
    }

    fn load_relationships(&self, pkg: &DocxPackage, rels_name: &str) -> anyhow::Result<XmlPart> {
        if let Some(part) = self.rels.get(rels_name) {
            return Ok(part.clone());
        }
        match pkg.entry(rels_name) {
            Some(ent) => parse_xml_part(rels_name, &ent.data)
                .with_context(|| format!("parse xml: {rels_name}")),
            None => empty_relationships(rels_name),
        }
    }

    /// Copy of `[Content_Types].xml` with a `Default` for the image extension,
    /// or `None` when the extension is already declared.
    fn staged_content_types(
        &self,
        pkg: &DocxPackage,
        image: &LoadedImage,
    ) -> anyhow::Result<Option<XmlPart>> {
        let mut part = match &self.content_types {
            Some(part) => part.clone(),
            None => {
                let ent = pkg
                    .entry(CONTENT_TYPES_PART)
                    .ok_or_else(|| anyhow!("package has no {CONTENT_TYPES_PART}"))?;
                parse_xml_part(CONTENT_TYPES_PART, &ent.data)
                    .with_context(|| format!("parse xml: {CONTENT_TYPES_PART}"))?
            }
        };
        let known = part.events.iter().any(|ev| match ev {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } if name == "Default" => {
                find_attr(attrs, "Extension")
                    .is_some_and(|e| e.eq_ignore_ascii_case(image.extension))
            }
            _ => false,
        });
        if known {
            return Ok(None);
        }
        let default = XmlEvent::empty(
            "Default",
            &[("Extension", image.extension), ("ContentType", image.content_type)],
        );
        insert_after_root_start(&mut part, "Types", default)?;
        Ok(Some(part))
    }

    /// Writes touched relationship/content-type parts and new media entries
    /// into the in-memory package.
    pub fn finish(self, pkg: &mut DocxPackage) -> anyhow::Result<()> {
        for (name, part) in &self.rels {
            let bytes = write_xml_part(part).with_context(|| format!("serialize xml: {name}"))?;
            pkg.put(name, bytes);
        }
        if let Some(part) = &self.content_types {
            let bytes = write_xml_part(part)
                .with_context(|| format!("serialize xml: {CONTENT_TYPES_PART}"))?;
            pkg.put(CONTENT_TYPES_PART, bytes);
        }
        for (name, data) in self.new_media {
            pkg.put(&name, data);
        }
        Ok(())
    }
}

struct MediaPlan {
    name: String,
    /// Counter value after allocating `name`; `None` when the entry already exists.
    next_media: Option<usize>,
}

/// Appends an image relationship with a fresh `rIdTpl<n>` id and returns the id.
fn add_relationship(part: &mut XmlPart, target: &str) -> anyhow::Result<String> {
    let used: HashSet<String> = part
        .events
        .iter()
        .filter_map(|ev| match ev {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs }
                if name == "Relationship" =>
            {
                find_attr(attrs, "Id").map(|s| s.to_string())
            }
            _ => None,
        })
        .collect();
    let mut n = used.len() + 1;
    let rel_id = loop {
        let candidate = format!("rIdTpl{n}");
        if !used.contains(&candidate) {
            break candidate;
        }
        n += 1;
    };

    let target = escape_attr(target);
    let rel = XmlEvent::empty(
        "Relationship",
        &[
            ("Id", rel_id.as_str()),
            ("Type", IMAGE_REL_TYPE),
            ("Target", target.as_str()),
        ],
    );
    insert_before_root_end(part, "Relationships", rel)?;
    Ok(rel_id)
}

fn empty_relationships(name: &str) -> anyhow::Result<XmlPart> {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{RELS_NS}"></Relationships>"#
    );
    parse_xml_part(name, xml.as_bytes())
}

fn relative_target(part_name: &str, media_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, _)) => media_name
            .strip_prefix(&format!("{dir}/"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("/{media_name}")),
        None => media_name.to_string(),
    }
}

fn insert_before_root_end(part: &mut XmlPart, root: &str, ev: XmlEvent) -> anyhow::Result<()> {
    if let Some(i) = part.events.iter().rposition(|e| e.is_end_of(root)) {
        part.events.insert(i, ev);
        return Ok(());
    }
    expand_empty_root(part, root)?;
    insert_before_root_end(part, root, ev)
}

fn insert_after_root_start(part: &mut XmlPart, root: &str, ev: XmlEvent) -> anyhow::Result<()> {
    if let Some(i) = part.events.iter().position(|e| e.is_start_of(root)) {
        part.events.insert(i + 1, ev);
        return Ok(());
    }
    expand_empty_root(part, root)?;
    insert_after_root_start(part, root, ev)
}

/// Turns `<root .../>` into `<root ...></root>` so children can be added.
fn expand_empty_root(part: &mut XmlPart, root: &str) -> anyhow::Result<()> {
    let i = part
        .events
        .iter()
        .position(|e| matches!(e, XmlEvent::Empty { name, .. } if name == root))
        .ok_or_else(|| anyhow!("{}: missing <{root}> element", part.name))?;
    let XmlEvent::Empty { name, attrs } = part.events[i].clone() else {
        return Err(anyhow!("{}: unexpected event for <{root}>", part.name));
    };
    part.events[i] = XmlEvent::Start { name: name.clone(), attrs };
    part.events.insert(i + 1, XmlEvent::End { name });
    Ok(())
}

/// Builds `<w:r><w:drawing>…</w:drawing></w:r>` for an inline picture of the
/// given EMU size.
pub fn drawing_run(
    att: &ImageAttachment,
    cx: i64,
    cy: i64,
    description: &str,
) -> anyhow::Result<Vec<XmlEvent>> {
    let descr = escape_attr(description);
    let id = att.drawing_id;
    let rid = escape_attr(&att.rel_id);
    let xml = format!(
        r#"<w:r><w:drawing><wp:inline xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" distT="0" distB="0" distL="0" distR="0"><wp:extent cx="{cx}" cy="{cy}"/><wp:effectExtent l="0" t="0" r="0" b="0"/><wp:docPr id="{id}" name="Picture {id}" descr="{descr}"/><wp:cNvGraphicFramePr><a:graphicFrameLocks xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" noChangeAspect="1"/></wp:cNvGraphicFramePr><a:graphic xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:pic xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:nvPicPr><pic:cNvPr id="0" name="Picture {id}" descr="{descr}"/><pic:cNvPicPr/></pic:nvPicPr><pic:blipFill><a:blip xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" r:embed="{rid}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill><pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"#
    );
    parse_fragment(&xml).context("build drawing run")
}
