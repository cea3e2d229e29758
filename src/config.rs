use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "docx-templater.toml";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineSection {
    /// Resolution used to turn placeholder pixel sizes into EMU.
    #[serde(default)]
    pub image_dpi: Option<u32>,
    /// File stem of media entries created for inserted images.
    #[serde(default)]
    pub media_prefix: Option<String>,
    #[serde(default)]
    pub trim_names: Option<bool>,
    #[serde(default)]
    pub record_positions: Option<bool>,
    #[serde(default)]
    pub include_headers: Option<bool>,
    #[serde(default)]
    pub include_footers: Option<bool>,
}

/// Resolved engine settings with defaults applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub image_dpi: u32,
    pub media_prefix: String,
    pub trim_names: bool,
    pub record_positions: bool,
    pub include_headers: bool,
    pub include_footers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image_dpi: 96,
            media_prefix: "tpl_image".to_string(),
            trim_names: true,
            record_positions: true,
            include_headers: true,
            include_footers: true,
        }
    }
}

impl EngineConfig {
    pub fn from_section(sec: &EngineSection) -> anyhow::Result<Self> {
        let d = Self::default();
        let image_dpi = sec.image_dpi.unwrap_or(d.image_dpi);
        if image_dpi == 0 {
            return Err(anyhow!("engine.image_dpi must be positive"));
        }
        let media_prefix = sec
            .media_prefix
            .as_deref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(d.media_prefix);
        if media_prefix
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(anyhow!(
                "engine.media_prefix may only contain [A-Za-z0-9_-]: {media_prefix:?}"
            ));
        }
        Ok(Self {
            image_dpi,
            media_prefix,
            trim_names: sec.trim_names.unwrap_or(d.trim_names),
            record_positions: sec.record_positions.unwrap_or(d.record_positions),
            include_headers: sec.include_headers.unwrap_or(d.include_headers),
            include_footers: sec.include_footers.unwrap_or(d.include_footers),
        })
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("DOCX_TEMPLATER_CONFIG") {
        let p = PathBuf::from(p);
        if p.exists() {
            return Some(p);
        }
    }
    let cwd = std::env::current_dir().ok()?;
    find_file_upwards(&cwd, DEFAULT_CONFIG_FILE, 8)
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}

/// Loads placeholder values from a JSON object (`.json`) or a TOML table.
/// Values must be strings.
pub fn load_values(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read values: {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let map: BTreeMap<String, String> = if is_json {
        serde_json::from_str(&text).context("parse values (json)")?
    } else {
        toml::from_str(&text).context("parse values (toml)")?
    };
    Ok(map.into_iter().collect())
}
