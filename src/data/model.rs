use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// DatasetVariant / Split
// ---------------------------------------------------------------------------

/// Which CIFAR archive to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum DatasetVariant {
    Cifar10,
    Cifar100,
}

impl DatasetVariant {
    /// Number of (fine) classes in the variant.
    pub fn num_classes(self) -> usize {
        match self {
            DatasetVariant::Cifar10 => 10,
            DatasetVariant::Cifar100 => 100,
        }
    }

    /// Mean pixel value over the training images, used by `centered`.
    pub fn pixel_mean(self) -> f32 {
        match self {
            DatasetVariant::Cifar10 => 120.707_565,
            DatasetVariant::Cifar100 => 121.936_06,
        }
    }

    /// Pixel standard deviation over the training images, used by `centered`.
    pub fn pixel_stddev(self) -> f32 {
        match self {
            DatasetVariant::Cifar10 => 64.150_08,
            DatasetVariant::Cifar100 => 68.388_96,
        }
    }
}

impl TryFrom<u32> for DatasetVariant {
    type Error = Error;

    fn try_from(classes: u32) -> Result<Self> {
        match classes {
            10 => Ok(DatasetVariant::Cifar10),
            100 => Ok(DatasetVariant::Cifar100),
            other => Err(Error::Config(format!(
                "Invalid CIFAR type: {other}. Choose either 100 or 10"
            ))),
        }
    }
}

impl From<DatasetVariant> for u32 {
    fn from(variant: DatasetVariant) -> u32 {
        variant.num_classes() as u32
    }
}

impl fmt::Display for DatasetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CIFAR-{}", self.num_classes())
    }
}

/// Data split. `Valid` is carved out of the training archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "valid" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            other => Err(Error::Config(format!("unknown split '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassSet
// ---------------------------------------------------------------------------

/// Ordered, duplicate-free set of class ids.
///
/// Order matters: with one-hot labels the label columns of a partition
/// follow the order of the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<usize>", into = "Vec<usize>")]
pub struct ClassSet(Vec<usize>);

impl ClassSet {
    /// Build a set, dropping repeated ids but keeping first-seen order.
    pub fn new(classes: impl IntoIterator<Item = usize>) -> Self {
        let mut out: Vec<usize> = Vec::new();
        for c in classes {
            if !out.contains(&c) {
                out.push(c);
            }
        }
        ClassSet(out)
    }

    /// `[0, n)` in ascending order.
    pub fn all(n: usize) -> Self {
        ClassSet((0..n).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, class: usize) -> bool {
        self.0.contains(&class)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Position of `class` within the set, i.e. its one-hot column.
    pub fn position(&self, class: usize) -> Option<usize> {
        self.0.iter().position(|&c| c == class)
    }

    /// Elements of `self` followed by the elements of `other` not yet present.
    pub fn union(&self, other: &ClassSet) -> ClassSet {
        ClassSet::new(self.iter().chain(other.iter()))
    }

    pub fn is_disjoint(&self, other: &ClassSet) -> bool {
        !self.iter().any(|c| other.contains(c))
    }

    pub fn is_subset(&self, other: &ClassSet) -> bool {
        self.iter().all(|c| other.contains(c))
    }

    /// Membership table indexed by class id, sized to `num_classes`.
    pub fn mask(&self, num_classes: usize) -> Vec<bool> {
        let mut mask = vec![false; num_classes];
        for c in self.iter().filter(|&c| c < num_classes) {
            mask[c] = true;
        }
        mask
    }

    /// Reject ids outside `[0, num_classes)`.
    pub fn validate(&self, num_classes: usize) -> Result<()> {
        match self.iter().find(|&c| c >= num_classes) {
            Some(c) => Err(Error::Index {
                index: c,
                len: num_classes,
                context: "class set",
            }),
            None => Ok(()),
        }
    }
}

impl From<Vec<usize>> for ClassSet {
    fn from(classes: Vec<usize>) -> Self {
        ClassSet::new(classes)
    }
}

impl From<ClassSet> for Vec<usize> {
    fn from(set: ClassSet) -> Self {
        set.0
    }
}

impl FromIterator<usize> for ClassSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        ClassSet::new(iter)
    }
}

impl fmt::Display for ClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Raw images (provider output) and the preprocessed dataset
// ---------------------------------------------------------------------------

/// Per-image dimensions, HWC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub const CIFAR: ImageShape = ImageShape {
        height: 32,
        width: 32,
        channels: 3,
    };

    pub fn pixels(&self) -> usize {
        self.height * self.width * self.channels
    }
}

/// Undecoded 8-bit images (N×H×W×C, row major) with their integer labels.
#[derive(Debug, Clone)]
pub struct RawImages {
    pub pixels: Vec<u8>,
    pub labels: Vec<usize>,
    pub shape: ImageShape,
}

impl RawImages {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image(&self, idx: usize) -> &[u8] {
        let n = self.shape.pixels();
        &self.pixels[idx * n..(idx + 1) * n]
    }

    /// Keep only the rows listed in `rows`, in that order.
    pub fn select_rows(&self, rows: &[usize]) -> RawImages {
        let mut pixels = Vec::with_capacity(rows.len() * self.shape.pixels());
        let mut labels = Vec::with_capacity(rows.len());
        for &r in rows {
            pixels.extend_from_slice(self.image(r));
            labels.push(self.labels[r]);
        }
        RawImages {
            pixels,
            labels,
            shape: self.shape,
        }
    }
}

/// Encoded labels of a whole dataset or view.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelData {
    /// Class id per row.
    Integer(Vec<usize>),
    /// Row-major `len × width` one-hot matrix.
    OneHot { width: usize, values: Vec<f32> },
}

impl LabelData {
    pub fn len(&self) -> usize {
        match self {
            LabelData::Integer(v) => v.len(),
            LabelData::OneHot { width, values } => {
                if *width == 0 {
                    0
                } else {
                    values.len() / width
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A split after preprocessing: `f32` images and encoded labels.
///
/// The integer labels are kept alongside the encoded ones so that
/// partitioning and accuracy never need to decode one-hot rows.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub variant: DatasetVariant,
    pub split: Split,
    pub shape: ImageShape,
    pub flatten: bool,
    /// N × pixels, row major.
    pub images: Vec<f32>,
    pub labels: LabelData,
    pub integer_labels: Vec<usize>,
}

impl RawDataset {
    pub fn len(&self) -> usize {
        self.integer_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integer_labels.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.variant.num_classes()
    }

    /// Flat pixel slice of row `idx`.
    pub fn image(&self, idx: usize) -> &[f32] {
        let n = self.shape.pixels();
        &self.images[idx * n..(idx + 1) * n]
    }

    /// Dimensions reported for one sample: `[H*W*C]` when flattened.
    pub fn sample_dims(&self) -> Vec<usize> {
        if self.flatten {
            vec![self.shape.pixels()]
        } else {
            vec![self.shape.height, self.shape.width, self.shape.channels]
        }
    }

    /// Number of rows whose label is in `classes`.
    pub fn count_in(&self, classes: &ClassSet) -> usize {
        let mask = classes.mask(self.num_classes());
        self.integer_labels
            .iter()
            .filter(|&&l| mask.get(l).copied().unwrap_or(false))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Sample – one indexed row of a view
// ---------------------------------------------------------------------------

/// Label of a single sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Integer(usize),
    OneHot(Vec<f32>),
}

/// One row of a partitioned view.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: Vec<f32>,
    pub dims: Vec<usize>,
    pub label: Label,
    /// Original class id, independent of the label encoding.
    pub class_id: usize,
}
