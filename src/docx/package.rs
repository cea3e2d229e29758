use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxEntry {
    pub fn new_file(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            compression: CompressionMethod::Deflated,
            last_modified: zip::DateTime::default(),
            unix_mode: None,
            is_dir: false,
        }
    }
}

impl DocxPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        Self::from_reader(f)
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).context("read zip")?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data).context("read zip entry")?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, name: &str) -> Option<&DocxEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Replaces the data of an existing entry, or appends a new deflated one.
    pub fn put(&mut self, name: &str, data: Vec<u8>) {
        if let Some(ent) = self.entries.iter_mut().find(|e| e.name == name) {
            ent.data = data;
        } else {
            self.entries.push(DocxEntry::new_file(name, data));
        }
    }

    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<W> {
        let mut zout = ZipWriter::new(writer);
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        let inner = zout.finish().context("finish zip")?;
        Ok(inner)
    }

    /// Writes the package next to `output_path` and renames it into place, so a
    /// failed save never leaves a truncated document behind.
    pub fn save_with_replacements(
        &self,
        output_path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<()> {
        let tmp = staging_path(output_path);
        let result = File::create(&tmp)
            .with_context(|| format!("create staging file: {}", tmp.display()))
            .and_then(|f| self.write_to(f, replacements))
            .and_then(|f| f.sync_all().context("flush staging file"))
            .and_then(|_| {
                std::fs::rename(&tmp, output_path)
                    .with_context(|| format!("move into place: {}", output_path.display()))
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }
}

fn staging_path(output_path: &Path) -> PathBuf {
    let file_name = output_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output.docx");
    output_path.with_file_name(format!(".{file_name}.partial"))
}
