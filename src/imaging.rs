use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context};
use image::{ImageFormat, ImageReader};

/// English Metric Units per inch (the drawing length unit of OOXML).
pub const EMUS_PER_INCH: i64 = 914_400;

/// Largest size with the source aspect ratio that fits inside `max_w` x `max_h`.
///
/// Scales to the box width first and falls back to the box height when that
/// overflows, so one side always touches the box. Returns `None` for
/// degenerate (zero) inputs.
pub fn fit_within(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> Option<(u32, u32)> {
    if src_w == 0 || src_h == 0 || max_w == 0 || max_h == 0 {
        return None;
    }
    let (w, h) = (src_w as u64, src_h as u64);
    let (bw, bh) = (max_w as u64, max_h as u64);

    let height_at_full_width = div_round(h * bw, w);
    if height_at_full_width <= bh {
        return Some((max_w, height_at_full_width.max(1) as u32));
    }
    let width_at_full_height = div_round(w * bh, h).min(bw);
    Some((width_at_full_height.max(1) as u32, max_h))
}

fn div_round(num: u64, den: u64) -> u64 {
    (num + den / 2) / den
}

pub fn px_to_emu(px: u32, dpi: u32) -> i64 {
    let dpi = dpi.max(1) as i64;
    (px as i64) * EMUS_PER_INCH / dpi
}

/// An image file read into memory, with its sniffed format and pixel size.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

pub fn load_image(path: &Path) -> anyhow::Result<LoadedImage> {
    let bytes = std::fs::read(path).with_context(|| format!("read image: {}", path.display()))?;
    let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .context("sniff image format")?;
    let format = reader
        .format()
        .ok_or_else(|| anyhow!("unrecognised image format: {}", path.display()))?;
    let (extension, content_type) = match format {
        ImageFormat::Png => ("png", "image/png"),
        ImageFormat::Jpeg => ("jpeg", "image/jpeg"),
        ImageFormat::Gif => ("gif", "image/gif"),
        ImageFormat::Bmp => ("bmp", "image/bmp"),
        other => return Err(anyhow!("unsupported image format {other:?}: {}", path.display())),
    };
    let (width, height) = reader
        .into_dimensions()
        .with_context(|| format!("decode image header: {}", path.display()))?;
    Ok(LoadedImage {
        bytes,
        extension,
        content_type,
        width,
        height,
    })
}
