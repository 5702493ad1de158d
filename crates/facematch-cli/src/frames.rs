//! Replays a directory of still images (or raw camera dumps) as a frame stream.

use anyhow::{bail, Context, Result};
use facematch_core::{FrameTask, PixelLayout, RawFrame, Rotation};
use std::path::{Path, PathBuf};

/// Frame files in `dir`, sorted by name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading frame directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: u32 = w.parse().map_err(|e| format!("width: {e}"))?;
    let h: u32 = h.parse().map_err(|e| format!("height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("dimensions must be non-zero".to_string());
    }
    Ok((w, h))
}

/// Raw dumps are recognized by extension; everything else is decoded as an image.
fn raw_layout(path: &Path) -> Option<PixelLayout> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "nv21" => Some(PixelLayout::Nv21),
        "yuyv" => Some(PixelLayout::Yuyv),
        "gray" | "y8" => Some(PixelLayout::Gray8),
        _ => None,
    }
}

/// Load one file as a frame task.
pub fn load_frame(
    path: &Path,
    sequence: u64,
    rotation: Rotation,
    raw_size: Option<(u32, u32)>,
) -> Result<FrameTask> {
    let frame = match raw_layout(path) {
        Some(layout) => {
            let Some((width, height)) = raw_size else {
                bail!("{} is a raw {layout:?} frame; pass --frame-size", path.display());
            };
            let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            RawFrame { data, width, height, layout }
        }
        None => {
            let img = image::open(path)
                .with_context(|| format!("decoding {}", path.display()))?
                .to_rgb8();
            let (width, height) = img.dimensions();
            RawFrame {
                data: img.into_raw(),
                width,
                height,
                layout: PixelLayout::Rgb8,
            }
        }
    };

    Ok(FrameTask { frame, rotation, sequence })
}
