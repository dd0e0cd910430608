use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backbone::BackboneFactory;
use crate::config::ExperimentConfig;
use crate::data::loader::{load_test, load_train_valid, DatasetProvider};
use crate::data::model::Split;
use crate::error::{Error, Result};
use crate::session::{GroupAccuracies, Session, Splits};
use crate::store::{parse_class_order, CheckpointStore, ClassGroup, ClassOrder};

// ---------------------------------------------------------------------------
// AccuracyRecord – one row of the results table
// ---------------------------------------------------------------------------

/// Accuracies of one session on one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub algo: String,
    pub seed: u64,
    pub session: usize,
    pub acc_type: Split,
    pub all_classes: Option<f64>,
    pub old_classes: Option<f64>,
    pub new_classes: Option<f64>,
}

impl AccuracyRecord {
    fn from_groups(algo: &str, seed: u64, session: usize, acc_type: Split, accs: &GroupAccuracies) -> Self {
        let get = |g: ClassGroup| accs.get(&g).copied().flatten();
        Self {
            algo: algo.to_string(),
            seed,
            session,
            acc_type,
            all_classes: get(ClassGroup::AllClasses),
            old_classes: get(ClassGroup::OldClasses),
            new_classes: get(ClassGroup::NewClasses),
        }
    }
}

// ---------------------------------------------------------------------------
// Experiment
// ---------------------------------------------------------------------------

/// A full class-incremental run: one class order, three splits and the
/// sessions to evaluate.
///
/// Sessions are built on first use and memoized, so asking for one session
/// only reads that session's checkpoint.
pub struct Experiment {
    config: ExperimentConfig,
    class_order: ClassOrder,
    session_indices: Vec<usize>,
    splits: Splits,
    store: Box<dyn CheckpointStore>,
    factory: Arc<dyn BackboneFactory>,
    sessions: RefCell<BTreeMap<usize, Rc<Session>>>,
}

impl Experiment {
    /// Load the class order and the three splits.
    pub fn new(
        config: ExperimentConfig,
        provider: &dyn DatasetProvider,
        store: Box<dyn CheckpointStore>,
        factory: Arc<dyn BackboneFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let class_order = store.load_class_order(&config.algo, config.seed)?;
        let num_classes = config.dataset.variant.num_classes();
        if class_order.len() != num_classes {
            return Err(Error::Config(format!(
                "class order for {} seed {} has {} classes, {} has {num_classes}",
                config.algo,
                config.seed,
                class_order.len(),
                config.dataset.variant
            )));
        }

        let session_indices = match &config.sessions {
            Some(s) => s.clone(),
            None => (0..class_order.num_sessions(config.classes_per_session)).collect(),
        };

        let (train, valid) = load_train_valid(provider, &config.data_dir, &config.dataset)?;
        let test = load_test(provider, &config.data_dir, &config.dataset)?;
        let splits = Splits {
            train: Arc::new(train),
            valid: Arc::new(valid),
            test: Arc::new(test),
        };
        log::info!(
            "Experiment {} seed {}: {} sessions, train/valid/test = {}/{}/{}",
            config.algo,
            config.seed,
            session_indices.len(),
            splits.train.len(),
            splits.valid.len(),
            splits.test.len()
        );

        Ok(Self::from_parts(config, class_order, session_indices, splits, store, factory))
    }

    /// Assemble an experiment from already loaded parts.
    pub fn from_parts(
        config: ExperimentConfig,
        class_order: ClassOrder,
        session_indices: Vec<usize>,
        splits: Splits,
        store: Box<dyn CheckpointStore>,
        factory: Arc<dyn BackboneFactory>,
    ) -> Self {
        Self {
            config,
            class_order,
            session_indices,
            splits,
            store,
            factory,
            sessions: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn class_order(&self) -> &ClassOrder {
        &self.class_order
    }

    pub fn splits(&self) -> &Splits {
        &self.splits
    }

    /// Configured sessions in evaluation order.
    pub fn session_indices(&self) -> &[usize] {
        &self.session_indices
    }

    pub fn len(&self) -> usize {
        self.session_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session_indices.is_empty()
    }

    /// Number of sessions built so far.
    pub fn loaded_sessions(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Session `index`, building it (and reading its checkpoint) on first use.
    pub fn session(&self, index: usize) -> Result<Rc<Session>> {
        if !self.session_indices.contains(&index) {
            return Err(Error::Index {
                index,
                len: self.session_indices.len(),
                context: "configured sessions",
            });
        }
        if let Some(session) = self.sessions.borrow().get(&index) {
            return Ok(Rc::clone(session));
        }

        let info = parse_class_order(&self.class_order, index, self.config.classes_per_session)?;
        let checkpoint = self
            .store
            .load_checkpoint(&self.config.algo, self.config.seed, index)?;
        log::debug!(
            "Session {index}: old {} new {}",
            info.old_classes,
            info.new_classes
        );
        let session = Rc::new(Session::new(
            info,
            checkpoint,
            self.splits.clone(),
            Arc::clone(&self.factory),
            self.config.dataset.variant.num_classes(),
            self.config.norm_layer,
            self.config.batch_size,
        ));
        self.sessions.borrow_mut().insert(index, Rc::clone(&session));
        Ok(session)
    }

    /// Accuracy records for every configured session on `split`.
    pub fn accs(&self, split: Split) -> Result<Vec<AccuracyRecord>> {
        let total = self.session_indices.len();
        let mut records = Vec::with_capacity(total);
        for (n, &index) in self.session_indices.iter().enumerate() {
            let session = self.session(index)?;
            let accs = session.accs(split)?;
            let record = AccuracyRecord::from_groups(
                &self.config.algo,
                self.config.seed,
                index,
                split,
                &accs,
            );
            log::info!(
                "[{}/{total}] {split} session {index}: all {} old {} new {}",
                n + 1,
                fmt_acc(record.all_classes),
                fmt_acc(record.old_classes),
                fmt_acc(record.new_classes)
            );
            records.push(record);
        }
        Ok(records)
    }

    pub fn train_accs(&self) -> Result<Vec<AccuracyRecord>> {
        self.accs(Split::Train)
    }

    pub fn valid_accs(&self) -> Result<Vec<AccuracyRecord>> {
        self.accs(Split::Valid)
    }

    pub fn test_accs(&self) -> Result<Vec<AccuracyRecord>> {
        self.accs(Split::Test)
    }
}

fn fmt_acc(acc: Option<f64>) -> String {
    acc.map_or_else(|| "-".to_string(), |a| format!("{:.4}", a))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::backbone::{Backbone, NormLayer};
    use crate::data::model::{ClassSet, DatasetVariant, ImageShape, LabelData, RawDataset};
    use crate::store::Checkpoint;

    /// Predicts the class stored in the first pixel.
    struct Oracle(usize);

    impl Backbone for Oracle {
        fn num_classes(&self) -> usize {
            self.0
        }

        fn load_state_dict(&mut self, _checkpoint: &Checkpoint) -> Result<()> {
            Ok(())
        }

        fn forward(&self, image: &[f32]) -> Result<Vec<f32>> {
            let c = image[0] as usize;
            Ok((0..self.0).map(|i| if i == c { 1.0 } else { 0.0 }).collect())
        }
    }

    struct OracleFactory;

    impl BackboneFactory for OracleFactory {
        fn build(&self, num_classes: usize, _norm: NormLayer) -> Box<dyn Backbone> {
            Box::new(Oracle(num_classes))
        }
    }

    /// Counts checkpoint reads; fails for sessions listed in `missing`.
    struct CountingStore {
        order: ClassOrder,
        reads: Rc<Cell<usize>>,
        missing: Vec<usize>,
    }

    impl CheckpointStore for CountingStore {
        fn load_class_order(&self, _algo: &str, _seed: u64) -> Result<ClassOrder> {
            Ok(self.order.clone())
        }

        fn load_checkpoint(&self, algo: &str, seed: u64, session: usize) -> Result<Checkpoint> {
            if self.missing.contains(&session) {
                return Err(Error::not_found("checkpoint", format!("{session}")));
            }
            self.reads.set(self.reads.get() + 1);
            Ok(Checkpoint {
                algo: algo.to_string(),
                seed,
                session,
                bytes: Vec::new(),
            })
        }
    }

    fn toy_split(split: Split) -> Arc<RawDataset> {
        let labels: Vec<usize> = (0..100).map(|i| i % 4).collect();
        Arc::new(RawDataset {
            variant: DatasetVariant::Cifar10,
            split,
            shape: ImageShape {
                height: 1,
                width: 1,
                channels: 1,
            },
            flatten: true,
            images: labels.iter().map(|&l| l as f32).collect(),
            labels: LabelData::Integer(labels.clone()),
            integer_labels: labels,
        })
    }

    fn experiment(sessions: Vec<usize>, missing: Vec<usize>) -> (Experiment, Rc<Cell<usize>>) {
        let order = ClassOrder::new(vec![0, 1, 2, 3]).unwrap();
        let reads = Rc::new(Cell::new(0));
        let store = CountingStore {
            order: order.clone(),
            reads: Rc::clone(&reads),
            missing,
        };
        let config = ExperimentConfig {
            algo: "toy".into(),
            seed: 7,
            sessions: Some(sessions.clone()),
            classes_per_session: 2,
            batch_size: 16,
            ..ExperimentConfig::default()
        };
        let splits = Splits {
            train: toy_split(Split::Train),
            valid: toy_split(Split::Valid),
            test: toy_split(Split::Test),
        };
        let exp = Experiment::from_parts(
            config,
            order,
            sessions,
            splits,
            Box::new(store),
            Arc::new(OracleFactory),
        );
        (exp, reads)
    }

    #[test]
    fn toy_sessions_slice_the_order() {
        let (exp, _) = experiment(vec![0, 1], vec![]);
        let s0 = exp.session(0).unwrap();
        assert_eq!(s0.new_classes().as_slice(), &[0, 1]);
        assert!(s0.old_classes().is_empty());
        let s1 = exp.session(1).unwrap();
        assert_eq!(s1.new_classes().as_slice(), &[2, 3]);
        assert_eq!(s1.old_classes().as_slice(), &[0, 1]);
        assert_eq!(s1.all_classes(), &ClassSet::new([0, 1, 2, 3]));
        assert_eq!(s1.test_loader().unwrap().dataset().len(), 100);
        assert_eq!(s0.test_loader().unwrap().dataset().len(), 50);
    }

    #[test]
    fn sessions_are_built_lazily_and_memoized() {
        let (exp, reads) = experiment(vec![0, 1], vec![1]);
        assert_eq!(exp.loaded_sessions(), 0);
        exp.session(0).unwrap();
        exp.session(0).unwrap();
        assert_eq!(reads.get(), 1);
        assert_eq!(exp.loaded_sessions(), 1);
        assert!(matches!(exp.session(1), Err(Error::NotFound { .. })));
    }

    #[test]
    fn unconfigured_session_is_rejected() {
        let (exp, _) = experiment(vec![1], vec![]);
        assert!(matches!(exp.session(0), Err(Error::Index { .. })));
    }

    #[test]
    fn records_follow_configured_order() {
        let (exp, _) = experiment(vec![1, 0], vec![]);
        let records = exp.test_accs().unwrap();
        let sessions: Vec<usize> = records.iter().map(|r| r.session).collect();
        assert_eq!(sessions, vec![1, 0]);

        let r1 = &records[0];
        assert_eq!(r1.algo, "toy");
        assert_eq!(r1.seed, 7);
        assert_eq!(r1.acc_type, Split::Test);
        assert_eq!(r1.all_classes, Some(1.0));
        assert_eq!(r1.old_classes, Some(1.0));
        assert_eq!(r1.new_classes, Some(1.0));

        let r0 = &records[1];
        assert_eq!(r0.old_classes, None);
        assert_eq!(r0.new_classes, Some(1.0));
    }

    #[test]
    fn train_and_valid_records_are_tagged() {
        let (exp, _) = experiment(vec![0], vec![]);
        assert_eq!(exp.train_accs().unwrap()[0].acc_type, Split::Train);
        assert_eq!(exp.valid_accs().unwrap()[0].acc_type, Split::Valid);
    }

    #[test]
    fn session_accessors_return_independent_objects() {
        let (exp, _) = experiment(vec![1], vec![]);
        let session = exp.session(1).unwrap();
        let mut a = session.train_loader().unwrap();
        let b = session.train_loader().unwrap();
        a.dataset_mut().select_new_partition(ClassSet::new([0])).unwrap();
        assert_eq!(a.dataset().len(), 25);
        assert_eq!(b.dataset().len(), 100);
        assert_eq!(
            session.get_train_acc(&ClassSet::new([2])).unwrap(),
            Some(1.0)
        );
    }
}
