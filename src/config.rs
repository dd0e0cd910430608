use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::error::Category;

use crate::backbone::NormLayer;
use crate::data::loader::DatasetOptions;
use crate::error::{Error, Result};
use crate::store::DEFAULT_CLASSES_PER_SESSION;

// ---------------------------------------------------------------------------
// Experiment configuration
// ---------------------------------------------------------------------------

/// Everything needed to evaluate one `(algo, seed)` run.
///
/// Loaded from JSON; every field has a default so partial files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Algorithm name, used as a key into the checkpoint store.
    pub algo: String,
    pub seed: u64,
    /// Sessions to evaluate, in this order. `None` means every session the
    /// class order covers.
    pub sessions: Option<Vec<usize>>,
    pub classes_per_session: usize,
    pub batch_size: usize,
    pub norm_layer: NormLayer,
    /// Holds the extracted CIFAR archives.
    pub data_dir: PathBuf,
    /// Holds `class_orders/` and `checkpoints/`.
    pub store_dir: PathBuf,
    pub dataset: DatasetOptions,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            algo: "er".to_string(),
            seed: 0,
            sessions: None,
            classes_per_session: DEFAULT_CLASSES_PER_SESSION,
            batch_size: 100,
            norm_layer: NormLayer::BatchNorm,
            data_dir: PathBuf::from("cache"),
            store_dir: PathBuf::from("cache"),
            dataset: DatasetOptions::default(),
        }
    }
}

impl ExperimentConfig {
    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::not_found("config file", path));
        }
        let text = std::fs::read_to_string(path)?;
        let config: ExperimentConfig = serde_json::from_str(&text).map_err(|e| match e.classify() {
            Category::Data => Error::Config(format!("{}: {e}", path.display())),
            _ => Error::Json(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.algo.is_empty() {
            return Err(Error::Config("algo must not be empty".into()));
        }
        if self.classes_per_session == 0 {
            return Err(Error::Config("classes_per_session must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::DatasetVariant;
    use crate::data::preprocess::NormType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(json: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn partial_config_uses_defaults() {
        let f = write_json(r#"{ "algo": "lop", "seed": 3, "dataset": { "variant": 10 } }"#);
        let config = ExperimentConfig::from_file(f.path()).unwrap();
        assert_eq!(config.algo, "lop");
        assert_eq!(config.seed, 3);
        assert_eq!(config.classes_per_session, 5);
        assert_eq!(config.dataset.variant, DatasetVariant::Cifar10);
        assert_eq!(config.dataset.image_normalization, NormType::Centered);
        assert!(config.sessions.is_none());
    }

    #[test]
    fn unknown_policy_or_variant_is_config_error() {
        for json in [
            r#"{ "dataset": { "image_normalization": "zscore" } }"#,
            r#"{ "dataset": { "label_preprocessing": "soft" } }"#,
            r#"{ "dataset": { "variant": 20 } }"#,
        ] {
            let f = write_json(json);
            assert!(
                matches!(ExperimentConfig::from_file(f.path()), Err(Error::Config(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn malformed_json_stays_json_error() {
        let f = write_json(r#"{ "algo": "#);
        assert!(matches!(
            ExperimentConfig::from_file(f.path()),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn zero_group_size_is_config_error() {
        let f = write_json(r#"{ "classes_per_session": 0 }"#);
        assert!(matches!(
            ExperimentConfig::from_file(f.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        assert!(matches!(
            ExperimentConfig::from_file(Path::new("/nonexistent/config.json")),
            Err(Error::NotFound { .. })
        ));
    }
}
