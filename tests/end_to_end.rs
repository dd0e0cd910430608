use std::path::Path;
use std::sync::Arc;

use cifar_cil::backbone::LinearProbeFactory;
use cifar_cil::config::ExperimentConfig;
use cifar_cil::data::loader::CifarBinaryProvider;
use cifar_cil::data::model::Split;
use cifar_cil::experiment::Experiment;
use cifar_cil::fixture::{write_fixture, FixtureOptions, FixtureSummary};
use cifar_cil::report::write_records;
use cifar_cil::store::DirectoryStore;
use cifar_cil::Error;

fn setup(root: &Path) -> (FixtureOptions, FixtureSummary, ExperimentConfig) {
    let options = FixtureOptions::default();
    let summary = write_fixture(root, root, &options).unwrap();
    let config = ExperimentConfig {
        algo: options.algo.clone(),
        seed: options.seed,
        classes_per_session: options.classes_per_session,
        batch_size: 32,
        data_dir: root.to_path_buf(),
        store_dir: root.to_path_buf(),
        dataset: options.dataset.clone(),
        ..ExperimentConfig::default()
    };
    (options, summary, config)
}

fn experiment(config: ExperimentConfig) -> cifar_cil::Result<Experiment> {
    let store = DirectoryStore::new(&config.store_dir);
    Experiment::new(
        config,
        &CifarBinaryProvider,
        Box::new(store),
        Arc::new(LinearProbeFactory),
    )
}

#[test]
fn synthetic_run_evaluates_every_session() {
    let dir = tempfile::tempdir().unwrap();
    let (_, summary, config) = setup(dir.path());
    let exp = experiment(config).unwrap();

    assert_eq!(summary.sessions, 5);
    assert_eq!(exp.len(), 5);
    assert_eq!(exp.splits().train.len(), 150);
    assert_eq!(exp.splits().valid.len(), 50);
    assert_eq!(exp.splits().test.len(), 100);
    assert_eq!(exp.loaded_sessions(), 0);

    let records = exp.test_accs().unwrap();
    assert_eq!(records.len(), 5);
    for (s, record) in records.iter().enumerate() {
        assert_eq!(record.session, s);
        assert_eq!(record.acc_type, Split::Test);
        assert!(record.all_classes.unwrap() > 0.95, "{record:?}");
        assert!(record.new_classes.unwrap() > 0.95, "{record:?}");
        if s == 0 {
            assert_eq!(record.old_classes, None);
        } else {
            assert!(record.old_classes.unwrap() > 0.95, "{record:?}");
        }
    }
}

#[test]
fn session_loaders_grow_with_the_class_order() {
    let dir = tempfile::tempdir().unwrap();
    let (_, summary, config) = setup(dir.path());
    let exp = experiment(config).unwrap();
    let order = summary.class_order.as_slice();

    for s in 0..5 {
        let session = exp.session(s).unwrap();
        assert_eq!(session.new_classes().as_slice(), &order[2 * s..2 * s + 2]);
        assert_eq!(session.old_classes().as_slice(), &order[..2 * s]);
        assert_eq!(session.test_loader().unwrap().dataset().len(), 20 * (s + 1));
        assert_eq!(session.valid_loader().unwrap().dataset().len(), 10 * (s + 1));
    }
}

#[test]
fn subset_of_sessions_only_reads_those_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (options, _, mut config) = setup(dir.path());
    let store = DirectoryStore::new(dir.path());
    std::fs::remove_file(store.checkpoint_path(&options.algo, options.seed, 4)).unwrap();

    config.sessions = Some(vec![3, 1]);
    let exp = experiment(config).unwrap();
    let records = exp.train_accs().unwrap();
    assert_eq!(
        records.iter().map(|r| r.session).collect::<Vec<_>>(),
        vec![3, 1]
    );
    assert_eq!(exp.loaded_sessions(), 2);
}

#[test]
fn missing_checkpoint_and_class_order_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (options, _, config) = setup(dir.path());

    let mut other = config.clone();
    other.seed = options.seed + 1;
    assert!(matches!(experiment(other), Err(Error::NotFound { .. })));

    let store = DirectoryStore::new(dir.path());
    std::fs::remove_file(store.checkpoint_path(&options.algo, options.seed, 2)).unwrap();
    let exp = experiment(config).unwrap();
    assert!(matches!(exp.session(2), Err(Error::NotFound { .. })));
    assert!(exp.session(1).is_ok());
}

#[test]
fn incompatible_checkpoint_fails_when_loaded_into_backbone() {
    let dir = tempfile::tempdir().unwrap();
    let (options, _, config) = setup(dir.path());
    let store = DirectoryStore::new(dir.path());
    std::fs::write(
        store.checkpoint_path(&options.algo, options.seed, 0),
        r#"{"fc.weight": {"shape": [3, 2], "data": [0, 0, 0, 0, 0, 0]},
            "fc.bias": {"shape": [3], "data": [0, 0, 0]}}"#,
    )
    .unwrap();

    let exp = experiment(config).unwrap();
    let session = exp.session(0).unwrap();
    assert!(matches!(session.model(), Err(Error::Shape { .. })));
    assert!(session.test_accs().is_err());
}

#[test]
fn session_past_class_order_is_index_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, mut config) = setup(dir.path());
    config.sessions = Some(vec![5]);
    let exp = experiment(config).unwrap();
    assert!(matches!(exp.session(5), Err(Error::Index { .. })));
}

#[test]
fn records_write_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, mut config) = setup(dir.path());
    config.sessions = Some(vec![0, 1]);
    let exp = experiment(config).unwrap();

    let mut records = exp.train_accs().unwrap();
    records.extend(exp.test_accs().unwrap());
    let out = dir.path().join("accs.csv");
    write_records(&out, &records).unwrap();

    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 5);
    assert!(text.lines().nth(1).unwrap().starts_with("synthetic,42,0,train,"));
}
