use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::Checkpoint;

const NORM_EPS: f32 = 1e-5;

// ---------------------------------------------------------------------------
// Backbone interface
// ---------------------------------------------------------------------------

/// Normalization layer the factory should build into the backbone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormLayer {
    #[default]
    BatchNorm,
    Identity,
}

impl FromStr for NormLayer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "batch-norm" => Ok(NormLayer::BatchNorm),
            "identity" => Ok(NormLayer::Identity),
            other => Err(Error::Config(format!(
                "unknown norm layer '{other}' (expected batch-norm or identity)"
            ))),
        }
    }
}

impl fmt::Display for NormLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NormLayer::BatchNorm => "batch-norm",
            NormLayer::Identity => "identity",
        })
    }
}

/// A classifier producing one logit per class.
pub trait Backbone {
    fn num_classes(&self) -> usize;

    /// Replace the parameters with those in `checkpoint`. Fails on missing
    /// keys or mismatched shapes.
    fn load_state_dict(&mut self, checkpoint: &Checkpoint) -> Result<()>;

    /// Logits for one flattened image.
    fn forward(&self, image: &[f32]) -> Result<Vec<f32>>;
}

/// Builds fresh, parameter-less backbones.
pub trait BackboneFactory {
    fn build(&self, num_classes: usize, norm_layer: NormLayer) -> Box<dyn Backbone>;
}

// ---------------------------------------------------------------------------
// State dict
// ---------------------------------------------------------------------------

/// A named, shaped parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }
}

/// Parameter name → tensor, serialized as a JSON object.
pub type StateDict = BTreeMap<String, Tensor>;

fn take_tensor(state: &StateDict, key: &str, expected: &[Option<usize>]) -> Result<Tensor> {
    let tensor = state
        .get(key)
        .ok_or_else(|| Error::Format(format!("state dict is missing key '{key}'")))?;
    let fits = tensor.shape.len() == expected.len()
        && tensor
            .shape
            .iter()
            .zip(expected)
            .all(|(&d, e)| e.map_or(true, |e| e == d));
    let volume: usize = tensor.shape.iter().product();
    if !fits || volume != tensor.data.len() {
        return Err(Error::Shape {
            name: key.to_string(),
            expected: expected.iter().map(|e| e.unwrap_or(0)).collect(),
            actual: tensor.shape.clone(),
        });
    }
    Ok(tensor.clone())
}

// ---------------------------------------------------------------------------
// LinearProbe
// ---------------------------------------------------------------------------

/// Linear classifier over raw pixels with an optional feature-wise
/// batch-norm in front.
///
/// State dict keys: `fc.weight [C, D]`, `fc.bias [C]` and, with
/// [`NormLayer::BatchNorm`], `bn.running_mean [D]`, `bn.running_var [D]`.
#[derive(Debug, Clone)]
pub struct LinearProbe {
    num_classes: usize,
    norm_layer: NormLayer,
    input_dim: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
}

impl LinearProbe {
    pub fn new(num_classes: usize, norm_layer: NormLayer) -> Self {
        Self {
            num_classes,
            norm_layer,
            input_dim: 0,
            weight: Vec::new(),
            bias: Vec::new(),
            running_mean: Vec::new(),
            running_var: Vec::new(),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }
}

impl Backbone for LinearProbe {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn load_state_dict(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let state: StateDict = serde_json::from_slice(&checkpoint.bytes)?;
        let weight = take_tensor(&state, "fc.weight", &[Some(self.num_classes), None])?;
        let dim = weight.shape[1];
        let bias = take_tensor(&state, "fc.bias", &[Some(self.num_classes)])?;
        if self.norm_layer == NormLayer::BatchNorm {
            self.running_mean = take_tensor(&state, "bn.running_mean", &[Some(dim)])?.data;
            self.running_var = take_tensor(&state, "bn.running_var", &[Some(dim)])?.data;
        }
        self.input_dim = dim;
        self.weight = weight.data;
        self.bias = bias.data;
        Ok(())
    }

    fn forward(&self, image: &[f32]) -> Result<Vec<f32>> {
        if self.weight.is_empty() {
            return Err(Error::Format("linear probe has no parameters loaded".into()));
        }
        if image.len() != self.input_dim {
            return Err(Error::Shape {
                name: "input".to_string(),
                expected: vec![self.input_dim],
                actual: vec![image.len()],
            });
        }
        let normed: Vec<f32> = match self.norm_layer {
            NormLayer::Identity => image.to_vec(),
            NormLayer::BatchNorm => image
                .iter()
                .zip(self.running_mean.iter().zip(&self.running_var))
                .map(|(&x, (&m, &v))| (x - m) / (v + NORM_EPS).sqrt())
                .collect(),
        };
        Ok(self
            .weight
            .chunks_exact(self.input_dim)
            .zip(&self.bias)
            .map(|(row, &b)| row.iter().zip(&normed).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect())
    }
}

/// Factory for [`LinearProbe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearProbeFactory;

impl BackboneFactory for LinearProbeFactory {
    fn build(&self, num_classes: usize, norm_layer: NormLayer) -> Box<dyn Backbone> {
        Box::new(LinearProbe::new(num_classes, norm_layer))
    }
}
