use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::model::{DatasetVariant, ImageShape, RawDataset, RawImages, Split};
use super::preprocess::{normalize, preprocess_labels, LabelPreprocessing, NormType};
use crate::error::{Error, Result};

/// Largest pixel value in the 8-bit archives.
pub const MAX_PIXEL_VALUE: f32 = 255.0;

// ---------------------------------------------------------------------------
// Dataset provider
// ---------------------------------------------------------------------------

/// Archive half to read. The validation split is cut from `Train`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSplit {
    Train,
    Test,
}

/// Source of undecoded CIFAR images.
pub trait DatasetProvider {
    fn load(&self, root: &Path, variant: DatasetVariant, split: ArchiveSplit) -> Result<RawImages>;

    /// Human-readable class names, if the archive ships them.
    fn label_names(&self, _root: &Path, _variant: DatasetVariant) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Reads the official "binary version" archives, already extracted under
/// `root`:
///
/// ```text
///  root/cifar-10-batches-bin/data_batch_{1..5}.bin, test_batch.bin
///  root/cifar-100-binary/train.bin, test.bin
/// ```
///
/// Records are a label prefix (1 byte for CIFAR-10, coarse + fine for
/// CIFAR-100) followed by 3072 bytes of channel-planar pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct CifarBinaryProvider;

impl CifarBinaryProvider {
    pub fn archive_dir(root: &Path, variant: DatasetVariant) -> PathBuf {
        match variant {
            DatasetVariant::Cifar10 => root.join("cifar-10-batches-bin"),
            DatasetVariant::Cifar100 => root.join("cifar-100-binary"),
        }
    }

    pub fn batch_files(variant: DatasetVariant, split: ArchiveSplit) -> Vec<&'static str> {
        match (variant, split) {
            (DatasetVariant::Cifar10, ArchiveSplit::Train) => vec![
                "data_batch_1.bin",
                "data_batch_2.bin",
                "data_batch_3.bin",
                "data_batch_4.bin",
                "data_batch_5.bin",
            ],
            (DatasetVariant::Cifar10, ArchiveSplit::Test) => vec!["test_batch.bin"],
            (DatasetVariant::Cifar100, ArchiveSplit::Train) => vec!["train.bin"],
            (DatasetVariant::Cifar100, ArchiveSplit::Test) => vec!["test.bin"],
        }
    }

    fn label_bytes(variant: DatasetVariant) -> usize {
        match variant {
            DatasetVariant::Cifar10 => 1,
            DatasetVariant::Cifar100 => 2,
        }
    }
}

impl DatasetProvider for CifarBinaryProvider {
    fn load(&self, root: &Path, variant: DatasetVariant, split: ArchiveSplit) -> Result<RawImages> {
        let dir = Self::archive_dir(root, variant);
        let mut images = RawImages {
            pixels: Vec::new(),
            labels: Vec::new(),
            shape: ImageShape::CIFAR,
        };
        for name in Self::batch_files(variant, split) {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(Error::not_found(format!("{variant} batch file"), path));
            }
            let bytes = std::fs::read(&path)?;
            log::debug!("Read {} bytes from {}", bytes.len(), path.display());
            decode_records(&bytes, variant, &mut images)
                .map_err(|e| Error::Format(format!("{}: {e}", path.display())))?;
        }
        log::info!("Loaded {} {variant} images from {}", images.len(), dir.display());
        Ok(images)
    }

    fn label_names(&self, root: &Path, variant: DatasetVariant) -> Result<Option<Vec<String>>> {
        let file = match variant {
            DatasetVariant::Cifar10 => "batches.meta.txt",
            DatasetVariant::Cifar100 => "fine_label_names.txt",
        };
        let path = Self::archive_dir(root, variant).join(file);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Some(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }
}

/// Append the records in `bytes` to `out`, converting CHW planes to HWC.
fn decode_records(bytes: &[u8], variant: DatasetVariant, out: &mut RawImages) -> Result<()> {
    let shape = out.shape;
    let plane = shape.height * shape.width;
    let prefix = CifarBinaryProvider::label_bytes(variant);
    let record = prefix + shape.pixels();
    if bytes.len() % record != 0 {
        return Err(Error::Format(format!(
            "{} bytes is not a multiple of the {record}-byte record size",
            bytes.len()
        )));
    }

    out.pixels.reserve(bytes.len() / record * shape.pixels());
    for (row, chunk) in bytes.chunks_exact(record).enumerate() {
        // CIFAR-100 carries (coarse, fine); the fine label is the class id.
        let label = chunk[prefix - 1] as usize;
        if label >= variant.num_classes() {
            return Err(Error::Format(format!(
                "record {row}: label {label} outside {variant}"
            )));
        }
        let body = &chunk[prefix..];
        for p in 0..plane {
            for c in 0..shape.channels {
                out.pixels.push(body[c * plane + p]);
            }
        }
        out.labels.push(label);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// How a split is turned into a [`RawDataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetOptions {
    pub variant: DatasetVariant,
    pub image_normalization: NormType,
    pub label_preprocessing: LabelPreprocessing,
    pub flatten: bool,
    /// Trailing training rows per class held out as the validation split.
    pub valid_per_class: usize,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            variant: DatasetVariant::Cifar100,
            image_normalization: NormType::Centered,
            label_preprocessing: LabelPreprocessing::None,
            flatten: false,
            valid_per_class: 50,
        }
    }
}

/// Test split from the test archive.
pub fn load_test(
    provider: &dyn DatasetProvider,
    root: &Path,
    options: &DatasetOptions,
) -> Result<RawDataset> {
    let raw = provider.load(root, options.variant, ArchiveSplit::Test)?;
    Ok(finish(raw, options, Split::Test))
}

/// Train and valid splits from a single read of the training archive.
pub fn load_train_valid(
    provider: &dyn DatasetProvider,
    root: &Path,
    options: &DatasetOptions,
) -> Result<(RawDataset, RawDataset)> {
    let all = provider.load(root, options.variant, ArchiveSplit::Train)?;
    let (train_rows, valid_rows) = holdout_rows(&all.labels, options.valid_per_class);
    let train = finish(all.select_rows(&train_rows), options, Split::Train);
    let valid = finish(all.select_rows(&valid_rows), options, Split::Valid);
    Ok((train, valid))
}

fn finish(raw: RawImages, options: &DatasetOptions, split: Split) -> RawDataset {
    log::info!("{} {split}: {} samples", options.variant, raw.len());
    preprocess(raw, options, split)
}

/// Split row indices into (train, valid): the last `per_class` rows of each
/// class, in archive order, go to valid.
pub fn holdout_rows(labels: &[usize], per_class: usize) -> (Vec<usize>, Vec<usize>) {
    let num_classes = labels.iter().max().map_or(0, |&m| m + 1);
    let mut remaining = vec![0usize; num_classes];
    for &l in labels {
        remaining[l] += 1;
    }
    let mut train = Vec::with_capacity(labels.len());
    let mut valid = Vec::new();
    for (row, &l) in labels.iter().enumerate() {
        if remaining[l] <= per_class {
            valid.push(row);
        } else {
            train.push(row);
        }
        remaining[l] -= 1;
    }
    (train, valid)
}

/// Flatten, convert to `f32` and apply the normalization and label policies.
/// Runs once per split.
pub fn preprocess(raw: RawImages, options: &DatasetOptions, split: Split) -> RawDataset {
    let mut images: Vec<f32> = raw.pixels.iter().map(|&p| p as f32).collect();
    normalize(
        &mut images,
        options.image_normalization,
        options.variant.pixel_mean(),
        options.variant.pixel_stddev(),
        MAX_PIXEL_VALUE,
    );
    let labels = preprocess_labels(&raw.labels, options.label_preprocessing);
    RawDataset {
        variant: options.variant,
        split,
        shape: raw.shape,
        flatten: options.flatten,
        images,
        labels,
        integer_labels: raw.labels,
    }
}
