use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::docx::media::{drawing_run, MediaRegistry};
use crate::docx::package::DocxPackage;
use crate::docx::parts::{load_parts, max_drawing_id, DocumentPart, ParagraphRef, PartKind, BODY_PART};
use crate::docx::reconstruct::reconstruct_paragraph;
use crate::docx::xml::{verify_structure_unchanged, write_xml_part};
use crate::error::{DocumentError, DocumentErrorKind};
use crate::imaging::{fit_within, load_image, px_to_emu, LoadedImage};
use crate::ir::{
    DocumentStatus, Match, Placeholder, PlaceholderKind, ReplaceReport, ReplacementMap,
    ReplacementRecord, UnresolvedPlaceholder, UnresolvedReason,
};
use crate::placeholder::{find_placeholders, PlaceholderSet};

use super::replace::{apply_content_splices, replace_text_match, ContentSplice, TextOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Scan,
    Replace,
}

/// Cooperative cancellation flag, observed between parts and paragraphs only.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one document in a batch. Never an `Err`: fatal failures become
/// `status == Failed` with the error text.
#[derive(Clone, Debug, Serialize)]
pub struct DocumentOutcome {
    pub document: PathBuf,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<Placeholder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReplaceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Package and parts of one opened document. Dropping it releases everything;
/// the file handle itself is closed as soon as the package has been read.
struct OpenDocument {
    pkg: DocxPackage,
    parts: Vec<DocumentPart>,
}

/// Everything recorded for one paragraph, keyed by match index so the report
/// reads left to right even though text is replaced right to left.
#[derive(Default)]
struct ParagraphLog {
    records: Vec<(usize, ReplacementRecord)>,
    unresolved: Vec<(usize, UnresolvedPlaceholder)>,
    warnings: Vec<String>,
}

impl ParagraphLog {
    fn unresolved(&mut self, idx: usize, m: &Match, context: &str, reason: UnresolvedReason) {
        self.unresolved.push((
            idx,
            UnresolvedPlaceholder {
                name: m.name().to_string(),
                kind: m.kind.placeholder_type(),
                context: context.to_string(),
                reason,
            },
        ));
    }

    fn replaced(&mut self, idx: usize, m: &Match, value: &str, context: &str) {
        self.records.push((
            idx,
            ReplacementRecord {
                name: m.name().to_string(),
                kind: m.kind.placeholder_type(),
                value: value.to_string(),
                context: context.to_string(),
            },
        ));
    }

    fn warn(&mut self, msg: String) {
        log::warn!("{msg}");
        self.warnings.push(msg);
    }

    fn flush_into(mut self, report: &mut ReplaceReport) {
        self.records.sort_by_key(|(i, _)| *i);
        self.unresolved.sort_by_key(|(i, _)| *i);
        report.replacements_performed += self.records.len();
        report
            .replacements
            .extend(self.records.into_iter().map(|(_, r)| r));
        report
            .unresolved
            .extend(self.unresolved.into_iter().map(|(_, u)| u));
        report.warnings.extend(self.warnings);
    }
}

/// Drives discovery and replacement over one document at a time.
///
/// Holds no per-document state, so one processor can serve several threads
/// working on distinct files.
#[derive(Clone, Debug, Default)]
pub struct DocumentProcessor {
    config: EngineConfig,
}

impl DocumentProcessor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn open(&self, path: &Path) -> Result<OpenDocument, DocumentError> {
        let pkg = DocxPackage::read(path)
            .map_err(|e| DocumentError::new(path, DocumentErrorKind::Open, e))?;
        if !pkg.contains(BODY_PART) {
            return Err(DocumentError::new(
                path,
                DocumentErrorKind::MissingBody,
                anyhow!("package has no {BODY_PART}"),
            ));
        }
        let parts =
            load_parts(&pkg).map_err(|e| DocumentError::new(path, DocumentErrorKind::Corrupt, e))?;
        log::debug!("{}: opened with {} part(s)", path.display(), parts.len());
        Ok(OpenDocument { pkg, parts })
    }

    fn visits(&self, kind: PartKind) -> bool {
        match kind {
            PartKind::Body => true,
            PartKind::Header(_) => self.config.include_headers,
            PartKind::Footer(_) => self.config.include_footers,
        }
    }

    /// Collects every placeholder of the document without modifying it.
    pub fn scan(
        &self,
        path: &Path,
        cancel: Option<&CancelToken>,
    ) -> Result<PlaceholderSet, DocumentError> {
        let doc = self.open(path)?;
        let mut set = PlaceholderSet::new();
        for part in doc.parts.iter().filter(|p| self.visits(p.kind)) {
            check_cancel(path, cancel)?;
            for para in part.paragraphs() {
                check_cancel(path, cancel)?;
                let pt = reconstruct_paragraph(&part.xml.events, &para);
                if pt.text.is_empty() {
                    continue;
                }
                let context = part.context_label(&para);
                for m in find_placeholders(&pt.text, self.config.trim_names) {
                    let position = self
                        .config
                        .record_positions
                        .then(|| pt.text[..m.start].chars().count());
                    set.record(&m, path, &context, position);
                }
            }
        }
        log::info!(
            "{}: found {} distinct placeholder(s)",
            path.display(),
            set.len()
        );
        Ok(set)
    }

    /// Replaces placeholders and saves once, to `output` or back onto `input`.
    ///
    /// Nothing is written unless every part has been visited.
    pub fn replace(
        &self,
        input: &Path,
        output: Option<&Path>,
        values: &ReplacementMap,
        cancel: Option<&CancelToken>,
    ) -> Result<ReplaceReport, DocumentError> {
        let OpenDocument { mut pkg, mut parts } = self.open(input)?;
        let mut report = ReplaceReport::default();
        let mut media = MediaRegistry::new(&pkg, &self.config.media_prefix, max_drawing_id(&pkg));
        let mut touched: Vec<bool> = vec![false; parts.len()];

        for (part, touched) in parts.iter_mut().zip(touched.iter_mut()) {
            if !self.visits(part.kind) {
                continue;
            }
            check_cancel(input, cancel)?;
            let mut splices: Vec<ContentSplice> = Vec::new();
            let mut text_changed = false;
            for para in part.paragraphs() {
                check_cancel(input, cancel)?;
                let mut notes = ParagraphLog::default();
                // Paragraphs inside content an image already replaces (text
                // boxes) would be discarded with it.
                if splices.iter().any(|s| s.start <= para.start && para.start < s.end) {
                    supersede_paragraph(part, &para, self.config.trim_names, &mut notes);
                } else {
                    text_changed |= self.replace_in_paragraph(
                        &pkg,
                        part,
                        &para,
                        values,
                        &mut media,
                        &mut splices,
                        &mut notes,
                    );
                }
                notes.flush_into(&mut report);
            }
            let spliced = apply_content_splices(&mut part.xml.events, splices);
            if spliced == 0 && text_changed {
                if let Err(e) = verify_structure_unchanged(&part.xml) {
                    let msg = format!("{e:#}");
                    log::warn!("{msg}");
                    report.warnings.push(msg);
                }
            }
            *touched = text_changed || spliced > 0;
            log::debug!(
                "{}: text changed: {text_changed}, {spliced} image substitution(s)",
                part.name()
            );
        }

        let save_err = |e: anyhow::Error| DocumentError::new(input, DocumentErrorKind::Save, e);
        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        for (part, touched) in parts.iter().zip(touched) {
            if touched {
                let bytes = write_xml_part(&part.xml).map_err(save_err)?;
                replacements.insert(part.name().to_string(), bytes);
            }
        }
        if !media.is_empty() {
            media.finish(&mut pkg).map_err(save_err)?;
        }
        let target = output.unwrap_or(input);
        pkg.save_with_replacements(target, &replacements)
            .map_err(|e| DocumentError::new(target, DocumentErrorKind::Save, e))?;

        log::info!(
            "{}: {} replacement(s), {} unresolved, {} warning(s)",
            target.display(),
            report.replacements_performed,
            report.unresolved.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn replace_in_paragraph(
        &self,
        pkg: &DocxPackage,
        part: &mut DocumentPart,
        para: &ParagraphRef,
        values: &ReplacementMap,
        media: &mut MediaRegistry,
        splices: &mut Vec<ContentSplice>,
        notes: &mut ParagraphLog,
    ) -> bool {
        let pt = reconstruct_paragraph(&part.xml.events, para);
        if pt.text.is_empty() {
            return false;
        }
        let matches = find_placeholders(&pt.text, self.config.trim_names);
        if matches.is_empty() {
            return false;
        }
        let context = part.context_label(para);

        // Images first: the leftmost resolvable one takes over the paragraph.
        let mut chosen: Option<usize> = None;
        for (i, m) in matches.iter().enumerate() {
            let PlaceholderKind::Image { name, width, height } = &m.kind else {
                continue;
            };
            let Some(value) = values.get(name) else {
                notes.unresolved(i, m, &context, UnresolvedReason::NoValue);
                continue;
            };
            if chosen.is_some() {
                notes.warn(format!(
                    "{context}: image placeholder {name:?} shares a paragraph with an earlier image; left in place"
                ));
                notes.unresolved(i, m, &context, UnresolvedReason::Superseded);
                continue;
            }
            let source = Path::new(value);
            let substituted = load_image(source).and_then(|img| {
                self.substitute_image(pkg, part, para, name, (*width, *height), source, &img, media)
            });
            match substituted {
                Ok(splice) => {
                    splices.push(splice);
                    notes.replaced(i, m, value, &context);
                    chosen = Some(i);
                }
                Err(e) => {
                    notes.warn(format!("{context}: image {name:?} not inserted: {e:#}"));
                    notes.unresolved(i, m, &context, UnresolvedReason::ImageUnreadable);
                }
            }
        }

        if chosen.is_some() {
            for (i, m) in matches.iter().enumerate() {
                if matches!(m.kind, PlaceholderKind::Text { .. }) {
                    notes.unresolved(i, m, &context, UnresolvedReason::Superseded);
                }
            }
            return false;
        }

        let mut changed = false;
        for (i, m) in matches.iter().enumerate().rev() {
            let PlaceholderKind::Text { name } = &m.kind else {
                continue;
            };
            let Some(value) = values.get(name) else {
                notes.unresolved(i, m, &context, UnresolvedReason::NoValue);
                continue;
            };
            match replace_text_match(&mut part.xml.events, para, &pt.map, m, value) {
                TextOutcome::Spliced => {
                    log::debug!("{context}: {name:?} replaced");
                    notes.replaced(i, m, value, &context);
                    changed = true;
                }
                TextOutcome::Fallback => {
                    notes.warn(format!(
                        "{context}: {name:?} replaced by whole-paragraph fallback; run formatting may shift"
                    ));
                    notes.replaced(i, m, value, &context);
                    changed = true;
                }
                TextOutcome::NotFound => {
                    notes.warn(format!("{context}: {name:?} could not be located for replacement"));
                    notes.unresolved(i, m, &context, UnresolvedReason::Unlocatable);
                }
            }
        }
        changed
    }

    #[allow(clippy::too_many_arguments)]
    fn substitute_image(
        &self,
        pkg: &DocxPackage,
        part: &DocumentPart,
        para: &ParagraphRef,
        name: &str,
        max_size: (u32, u32),
        source: &Path,
        img: &LoadedImage,
        media: &mut MediaRegistry,
    ) -> anyhow::Result<ContentSplice> {
        let (w, h) = fit_within(img.width, img.height, max_size.0, max_size.1)
            .ok_or_else(|| anyhow!("image has zero size: {}", source.display()))?;
        let att = media.attach(pkg, part, source, img)?;
        let dpi = self.config.image_dpi;
        let run = drawing_run(&att, px_to_emu(w, dpi), px_to_emu(h, dpi), name)?;
        log::debug!(
            "{}: image {name:?} {}x{} px -> {w}x{h} px",
            part.name(),
            img.width,
            img.height
        );
        Ok(ContentSplice::for_paragraph(para, run))
    }

    /// Runs one document in `mode`, converting fatal errors into a failed outcome.
    pub fn run_document(
        &self,
        input: &Path,
        output: Option<&Path>,
        mode: Mode,
        values: &ReplacementMap,
        cancel: Option<&CancelToken>,
    ) -> DocumentOutcome {
        let result = match mode {
            Mode::Scan => self.scan(input, cancel).map(|set| (set.into_placeholders(), None)),
            Mode::Replace => self
                .replace(input, output, values, cancel)
                .map(|report| (Vec::new(), Some(report))),
        };
        match result {
            Ok((placeholders, report)) => DocumentOutcome {
                document: input.to_path_buf(),
                status: report
                    .as_ref()
                    .map(|r| r.status())
                    .unwrap_or(DocumentStatus::Clean),
                placeholders,
                report,
                error: None,
            },
            Err(e) => {
                log::error!("{e}");
                DocumentOutcome {
                    document: input.to_path_buf(),
                    status: DocumentStatus::Failed,
                    placeholders: Vec::new(),
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Processes `inputs` one after another, in place. A failing document does
    /// not stop the batch; once cancelled, the remaining documents fail fast.
    pub fn process_batch<F>(
        &self,
        inputs: &[PathBuf],
        mode: Mode,
        values: &ReplacementMap,
        cancel: Option<&CancelToken>,
        mut on_done: F,
    ) -> Vec<DocumentOutcome>
    where
        F: FnMut(usize, &DocumentOutcome),
    {
        let mut outcomes = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let outcome = self.run_document(input, None, mode, values, cancel);
            on_done(i, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Reports every placeholder of a paragraph that is removed together with an
/// enclosing image substitution.
fn supersede_paragraph(
    part: &DocumentPart,
    para: &ParagraphRef,
    trim_names: bool,
    notes: &mut ParagraphLog,
) {
    let pt = reconstruct_paragraph(&part.xml.events, para);
    if pt.text.is_empty() {
        return;
    }
    let matches = find_placeholders(&pt.text, trim_names);
    if matches.is_empty() {
        return;
    }
    let context = part.context_label(para);
    notes.warn(format!(
        "{context}: {} placeholder(s) inside a paragraph replaced by an image were dropped",
        matches.len()
    ));
    for (i, m) in matches.iter().enumerate() {
        notes.unresolved(i, m, &context, UnresolvedReason::Superseded);
    }
}

fn check_cancel(path: &Path, cancel: Option<&CancelToken>) -> Result<(), DocumentError> {
    match cancel {
        Some(c) if c.is_cancelled() => Err(DocumentError::new(
            path,
            DocumentErrorKind::Cancelled,
            anyhow!("cancellation requested"),
        )),
        _ => Ok(()),
    }
}
