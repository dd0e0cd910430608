use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::data::model::{ClassSet, RawImages};
use crate::error::{Error, Result};

/// Save up to `count` images whose class is in `classes` as PNG files named
/// `img-<row>-<label>.png`, where `<label>` is the class name when known.
pub fn export_samples(
    images: &RawImages,
    label_names: Option<&[String]>,
    classes: &ClassSet,
    count: usize,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    if images.shape.channels != 3 {
        return Err(Error::Format(format!(
            "PNG export needs RGB images, got {} channels",
            images.shape.channels
        )));
    }
    std::fs::create_dir_all(out_dir)?;

    let mut written = Vec::new();
    for (row, &label) in images.labels.iter().enumerate() {
        if written.len() >= count {
            break;
        }
        if !classes.contains(label) {
            continue;
        }
        let img = RgbImage::from_raw(
            images.shape.width as u32,
            images.shape.height as u32,
            images.image(row).to_vec(),
        )
        .ok_or_else(|| Error::Format(format!("row {row}: pixel buffer does not fit image")))?;

        let name = label_names
            .and_then(|names| names.get(label))
            .cloned()
            .unwrap_or_else(|| label.to_string());
        let path = out_dir.join(format!("img-{row}-{name}.png"));
        img.save(&path)?;
        written.push(path);
    }
    log::info!("Exported {} images to {}", written.len(), out_dir.display());
    Ok(written)
}
