use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backbone::{Backbone, BackboneFactory, NormLayer};
use crate::data::batch::DataLoader;
use crate::data::model::{ClassSet, RawDataset, Split};
use crate::error::Result;
use crate::eval::selected_class_accuracy;
use crate::store::{Checkpoint, ClassGroup, SessionClassInfo};

/// Accuracy per class group; `None` where the group has no samples.
pub type GroupAccuracies = BTreeMap<ClassGroup, Option<f64>>;

/// The three preprocessed splits shared by every session.
#[derive(Debug, Clone)]
pub struct Splits {
    pub train: Arc<RawDataset>,
    pub valid: Arc<RawDataset>,
    pub test: Arc<RawDataset>,
}

impl Splits {
    pub fn get(&self, split: Split) -> &Arc<RawDataset> {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

/// One step of the class-incremental sequence: a checkpoint plus the
/// classes it has seen.
///
/// Every accessor builds a new, independently owned model or loader, so
/// sessions never reconfigure each other's objects.
pub struct Session {
    info: SessionClassInfo,
    checkpoint: Checkpoint,
    splits: Splits,
    factory: Arc<dyn BackboneFactory>,
    num_classes: usize,
    norm_layer: NormLayer,
    batch_size: usize,
}

impl Session {
    pub(crate) fn new(
        info: SessionClassInfo,
        checkpoint: Checkpoint,
        splits: Splits,
        factory: Arc<dyn BackboneFactory>,
        num_classes: usize,
        norm_layer: NormLayer,
        batch_size: usize,
    ) -> Self {
        Self {
            info,
            checkpoint,
            splits,
            factory,
            num_classes,
            norm_layer,
            batch_size,
        }
    }

    pub fn index(&self) -> usize {
        self.info.session
    }

    pub fn class_info(&self) -> &SessionClassInfo {
        &self.info
    }

    pub fn all_classes(&self) -> &ClassSet {
        &self.info.all_classes
    }

    pub fn old_classes(&self) -> &ClassSet {
        &self.info.old_classes
    }

    pub fn new_classes(&self) -> &ClassSet {
        &self.info.new_classes
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Fresh backbone with this session's parameters loaded.
    pub fn model(&self) -> Result<Box<dyn Backbone>> {
        let mut model = self.factory.build(self.num_classes, self.norm_layer);
        model.load_state_dict(&self.checkpoint)?;
        Ok(model)
    }

    /// Fresh loader over `split` restricted to `all_classes`.
    pub fn loader(&self, split: Split) -> Result<DataLoader> {
        DataLoader::for_classes(self.splits.get(split), &self.info.all_classes, self.batch_size)
    }

    pub fn train_loader(&self) -> Result<DataLoader> {
        self.loader(Split::Train)
    }

    pub fn valid_loader(&self) -> Result<DataLoader> {
        self.loader(Split::Valid)
    }

    pub fn test_loader(&self) -> Result<DataLoader> {
        self.loader(Split::Test)
    }

    /// Accuracy on `split` restricted to `selected`. Classes outside
    /// `all_classes` have no samples in the session loader.
    pub fn get_acc(&self, split: Split, selected: &ClassSet) -> Result<Option<f64>> {
        let model = self.model()?;
        let loader = self.loader(split)?;
        selected_class_accuracy(model.as_ref(), &loader, selected)
    }

    pub fn get_train_acc(&self, selected: &ClassSet) -> Result<Option<f64>> {
        self.get_acc(Split::Train, selected)
    }

    pub fn get_valid_acc(&self, selected: &ClassSet) -> Result<Option<f64>> {
        self.get_acc(Split::Valid, selected)
    }

    pub fn get_test_acc(&self, selected: &ClassSet) -> Result<Option<f64>> {
        self.get_acc(Split::Test, selected)
    }

    /// Accuracy on `split` for all, old and new classes.
    pub fn accs(&self, split: Split) -> Result<GroupAccuracies> {
        let model = self.model()?;
        let loader = self.loader(split)?;
        ClassGroup::ALL
            .iter()
            .map(|&group| -> Result<(ClassGroup, Option<f64>)> {
                let acc = selected_class_accuracy(model.as_ref(), &loader, self.info.classes(group))?;
                Ok((group, acc))
            })
            .collect()
    }

    pub fn train_accs(&self) -> Result<GroupAccuracies> {
        self.accs(Split::Train)
    }

    pub fn valid_accs(&self) -> Result<GroupAccuracies> {
        self.accs(Split::Valid)
    }

    pub fn test_accs(&self) -> Result<GroupAccuracies> {
        self.accs(Split::Test)
    }
}
