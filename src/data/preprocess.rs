use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::model::LabelData;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Image normalization policy
// ---------------------------------------------------------------------------

/// How pixel values are rescaled after conversion to `f32`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NormType {
    /// Leave pixel values as they are.
    #[default]
    None,
    /// Subtract the mean and divide by the standard deviation.
    Centered,
    /// Divide by the maximum pixel value.
    Max,
    /// Divide by the maximum pixel value and rescale to `[-1, 1]`.
    MinusOneToOne,
}

impl NormType {
    pub fn as_str(self) -> &'static str {
        match self {
            NormType::None => "none",
            NormType::Centered => "centered",
            NormType::Max => "max",
            NormType::MinusOneToOne => "minus-one-to-one",
        }
    }
}

impl FromStr for NormType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(NormType::None),
            "centered" => Ok(NormType::Centered),
            "max" => Ok(NormType::Max),
            "minus-one-to-one" => Ok(NormType::MinusOneToOne),
            other => Err(Error::Config(format!(
                "unknown image normalization '{other}' \
                 (expected none, centered, max or minus-one-to-one)"
            ))),
        }
    }
}

impl TryFrom<String> for NormType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<NormType> for String {
    fn from(n: NormType) -> String {
        n.as_str().to_string()
    }
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize `pixels` in place.
///
/// `avg` and `stddev` are only read by [`NormType::Centered`], `max_val`
/// only by [`NormType::Max`] and [`NormType::MinusOneToOne`].
pub fn normalize(pixels: &mut [f32], norm_type: NormType, avg: f32, stddev: f32, max_val: f32) {
    match norm_type {
        NormType::None => {}
        NormType::Centered => {
            for p in pixels.iter_mut() {
                *p = (*p - avg) / stddev;
            }
        }
        NormType::Max => {
            for p in pixels.iter_mut() {
                *p /= max_val;
            }
        }
        NormType::MinusOneToOne => {
            for p in pixels.iter_mut() {
                *p = 2.0 * *p / max_val - 1.0;
            }
        }
    }
}

/// Mean and population standard deviation of `pixels`.
pub fn pixel_stats(pixels: &[f32]) -> (f32, f32) {
    if pixels.is_empty() {
        return (0.0, 0.0);
    }
    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    let var = pixels
        .iter()
        .map(|&p| (p as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean as f32, var.sqrt() as f32)
}

// ---------------------------------------------------------------------------
// Label preprocessing policy
// ---------------------------------------------------------------------------

/// How integer labels are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LabelPreprocessing {
    /// Keep the class id.
    #[default]
    None,
    /// One-hot vector with a single 1.0 at the class id.
    OneHot,
}

impl LabelPreprocessing {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelPreprocessing::None => "none",
            LabelPreprocessing::OneHot => "one-hot",
        }
    }
}

impl FromStr for LabelPreprocessing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(LabelPreprocessing::None),
            "one-hot" => Ok(LabelPreprocessing::OneHot),
            other => Err(Error::Config(format!(
                "unknown label preprocessing '{other}' (expected none or one-hot)"
            ))),
        }
    }
}

impl TryFrom<String> for LabelPreprocessing {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<LabelPreprocessing> for String {
    fn from(l: LabelPreprocessing) -> String {
        l.as_str().to_string()
    }
}

impl fmt::Display for LabelPreprocessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode `labels`. One-hot width is `max(label) + 1`.
pub fn preprocess_labels(labels: &[usize], preprocessing: LabelPreprocessing) -> LabelData {
    match preprocessing {
        LabelPreprocessing::None => LabelData::Integer(labels.to_vec()),
        LabelPreprocessing::OneHot => {
            let width = labels.iter().max().map_or(0, |&m| m + 1);
            let mut values = vec![0.0f32; labels.len() * width];
            for (row, &label) in labels.iter().enumerate() {
                values[row * width + label] = 1.0;
            }
            LabelData::OneHot { width, values }
        }
    }
}

/// Index of the largest entry; first wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
