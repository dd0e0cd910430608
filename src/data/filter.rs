use std::fmt;
use std::sync::Arc;

use super::model::{ClassSet, Label, LabelData, RawDataset, Sample};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// PartitionedView – rows of a dataset restricted to a class set
// ---------------------------------------------------------------------------

/// Rows of a shared [`RawDataset`] whose label is in `classes`.
///
/// The view holds row indices only; pixels and labels stay in the dataset.
#[derive(Debug, Clone)]
pub struct PartitionedView {
    data: Arc<RawDataset>,
    classes: ClassSet,
    rows: Vec<usize>,
}

/// Select the rows of `data` whose integer label is in `classes`.
pub fn partition(data: &Arc<RawDataset>, classes: &ClassSet) -> PartitionedView {
    let mask = classes.mask(data.num_classes());
    let rows = data
        .integer_labels
        .iter()
        .enumerate()
        .filter(|&(_, &l)| mask.get(l).copied().unwrap_or(false))
        .map(|(i, _)| i)
        .collect();
    PartitionedView {
        data: Arc::clone(data),
        classes: classes.clone(),
        rows,
    }
}

impl PartitionedView {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn classes(&self) -> &ClassSet {
        &self.classes
    }

    pub fn data(&self) -> &Arc<RawDataset> {
        &self.data
    }

    /// Dataset row backing view position `idx`.
    pub fn row(&self, idx: usize) -> Option<usize> {
        self.rows.get(idx).copied()
    }

    /// Integer label at view position `idx`.
    pub fn class_id(&self, idx: usize) -> Option<usize> {
        self.row(idx).map(|r| self.data.integer_labels[r])
    }

    /// Encoded label at view position `idx`. One-hot rows are sliced to the
    /// columns of the view's class set, so their width is `classes.len()`.
    pub fn label(&self, idx: usize) -> Option<Label> {
        let row = self.row(idx)?;
        Some(match &self.data.labels {
            LabelData::Integer(labels) => Label::Integer(labels[row]),
            LabelData::OneHot { width, values } => {
                let full = &values[row * width..(row + 1) * width];
                Label::OneHot(
                    self.classes
                        .iter()
                        .map(|c| full.get(c).copied().unwrap_or(0.0))
                        .collect(),
                )
            }
        })
    }

    /// Materialize view position `idx`.
    pub fn get(&self, idx: usize) -> Result<Sample> {
        let (Some(row), Some(label)) = (self.row(idx), self.label(idx)) else {
            return Err(Error::Index {
                index: idx,
                len: self.len(),
                context: "partitioned view",
            });
        };
        Ok(Sample {
            image: self.data.image(row).to_vec(),
            dims: self.data.sample_dims(),
            label,
            class_id: self.data.integer_labels[row],
        })
    }

    /// Labels of the whole view, encoded like the dataset.
    pub fn labels(&self) -> LabelData {
        match &self.data.labels {
            LabelData::Integer(labels) => {
                LabelData::Integer(self.rows.iter().map(|&r| labels[r]).collect())
            }
            LabelData::OneHot { .. } => {
                let width = self.classes.len();
                let mut values = Vec::with_capacity(self.len() * width);
                for idx in 0..self.len() {
                    if let Some(Label::OneHot(row)) = self.label(idx) {
                        values.extend(row);
                    }
                }
                LabelData::OneHot { width, values }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CifarDataSet – a dataset with a selectable active partition
// ---------------------------------------------------------------------------

/// Per-sample transform applied on indexing.
pub type Transform = Arc<dyn Fn(Sample) -> Sample + Send + Sync>;

/// A preprocessed split plus the currently selected class partition.
#[derive(Clone)]
pub struct CifarDataSet {
    view: PartitionedView,
    transform: Option<Transform>,
}

impl fmt::Debug for CifarDataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CifarDataSet")
            .field("split", &self.view.data.split)
            .field("classes", &self.view.classes)
            .field("len", &self.view.len())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl CifarDataSet {
    /// Wrap `data`, selecting `classes` (all classes when `None`).
    pub fn new(data: Arc<RawDataset>, classes: Option<ClassSet>) -> Result<Self> {
        let classes = classes.unwrap_or_else(|| ClassSet::all(data.num_classes()));
        classes.validate(data.num_classes())?;
        let view = partition(&data, &classes);
        Ok(Self {
            view,
            transform: None,
        })
    }

    /// Replace the active class set and recompute the view.
    pub fn select_new_partition(&mut self, classes: ClassSet) -> Result<()> {
        classes.validate(self.view.data.num_classes())?;
        log::debug!(
            "{} partition: {} -> {}",
            self.view.data.split,
            self.view.classes,
            classes
        );
        self.view = partition(&self.view.data, &classes);
        Ok(())
    }

    pub fn set_transformation(&mut self, transform: Option<Transform>) {
        self.transform = transform;
    }

    pub fn classes(&self) -> &ClassSet {
        self.view.classes()
    }

    pub fn view(&self) -> &PartitionedView {
        &self.view
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Sample at `idx` of the current view, after the transform.
    pub fn get(&self, idx: usize) -> Result<Sample> {
        let sample = self.view.get(idx)?;
        Ok(match &self.transform {
            Some(t) => t(sample),
            None => sample,
        })
    }
}
