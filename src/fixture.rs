//! Deterministic synthetic run: CIFAR-format archives, a class order and
//! nearest-class-mean linear-probe checkpoints for every session.
//!
//! Each class is a flat colour plus Gaussian noise, so a probe that has
//! seen a class recognizes it almost perfectly and the expected accuracies
//! are easy to reason about.

use std::io::Write;
use std::path::Path;

use crate::backbone::{StateDict, Tensor};
use crate::data::loader::{preprocess, ArchiveSplit, CifarBinaryProvider, DatasetOptions};
use crate::data::model::{DatasetVariant, ImageShape, RawImages, Split};
use crate::error::Result;
use crate::store::{parse_class_order, ClassOrder, DirectoryStore};

/// Bias given to classes a session has not seen yet.
const UNSEEN_BIAS: f32 = -1.0e6;
const BN_EPS: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub algo: String,
    pub seed: u64,
    pub train_per_class: usize,
    pub test_per_class: usize,
    pub classes_per_session: usize,
    /// Pixel noise standard deviation.
    pub noise: f64,
    /// Variant and normalization the checkpoints are built for.
    pub dataset: DatasetOptions,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            algo: "synthetic".to_string(),
            seed: 42,
            train_per_class: 20,
            test_per_class: 10,
            classes_per_session: 2,
            noise: 8.0,
            dataset: DatasetOptions {
                variant: DatasetVariant::Cifar10,
                valid_per_class: 5,
                ..DatasetOptions::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureSummary {
    pub class_order: ClassOrder,
    pub sessions: usize,
    pub train_images: usize,
    pub test_images: usize,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn shuffle(&mut self, v: &mut [usize]) {
        for i in (1..v.len()).rev() {
            let j = (self.next_u64() % (i as u64 + 1)) as usize;
            v.swap(i, j);
        }
    }
}

fn class_color(class: usize) -> [f64; 3] {
    [
        ((class * 53) % 200 + 28) as f64,
        ((class * 97 + 61) % 200 + 28) as f64,
        ((class * 29 + 113) % 200 + 28) as f64,
    ]
}

/// Images in HWC order, classes interleaved row by row.
fn synth_images(variant: DatasetVariant, per_class: usize, noise: f64, rng: &mut SimpleRng) -> RawImages {
    let shape = ImageShape::CIFAR;
    let mut images = RawImages {
        pixels: Vec::with_capacity(per_class * variant.num_classes() * shape.pixels()),
        labels: Vec::new(),
        shape,
    };
    for _ in 0..per_class {
        for class in 0..variant.num_classes() {
            let color = class_color(class);
            for _ in 0..shape.height * shape.width {
                for c in color {
                    images.pixels.push(rng.gauss(c, noise).round().clamp(0.0, 255.0) as u8);
                }
            }
            images.labels.push(class);
        }
    }
    images
}

/// Encode rows of `images` as archive records (label prefix + CHW planes).
fn encode_records(images: &RawImages, rows: impl Iterator<Item = usize>, variant: DatasetVariant) -> Vec<u8> {
    let shape = images.shape;
    let plane = shape.height * shape.width;
    let mut out = Vec::new();
    for row in rows {
        let label = images.labels[row] as u8;
        if variant == DatasetVariant::Cifar100 {
            out.push(label / 5);
        }
        out.push(label);
        let img = images.image(row);
        for c in 0..shape.channels {
            for p in 0..plane {
                out.push(img[p * shape.channels + c]);
            }
        }
    }
    out
}

fn write_archive(root: &Path, variant: DatasetVariant, train: &RawImages, test: &RawImages) -> Result<()> {
    let dir = CifarBinaryProvider::archive_dir(root, variant);
    std::fs::create_dir_all(&dir)?;
    match variant {
        DatasetVariant::Cifar10 => {
            let files = CifarBinaryProvider::batch_files(variant, ArchiveSplit::Train);
            let n = files.len();
            for (b, name) in files.iter().enumerate() {
                let rows = (0..train.len()).filter(|r| r % n == b);
                std::fs::write(dir.join(name), encode_records(train, rows, variant))?;
            }
            std::fs::write(dir.join("test_batch.bin"), encode_records(test, 0..test.len(), variant))?;
            let mut meta = std::fs::File::create(dir.join("batches.meta.txt"))?;
            for name in [
                "airplane", "automobile", "bird", "cat", "deer", "dog", "frog", "horse", "ship", "truck",
            ] {
                writeln!(meta, "{name}")?;
            }
        }
        DatasetVariant::Cifar100 => {
            std::fs::write(dir.join("train.bin"), encode_records(train, 0..train.len(), variant))?;
            std::fs::write(dir.join("test.bin"), encode_records(test, 0..test.len(), variant))?;
            let mut meta = std::fs::File::create(dir.join("fine_label_names.txt"))?;
            for c in 0..variant.num_classes() {
                writeln!(meta, "class_{c:02}")?;
            }
        }
    }
    Ok(())
}

/// Nearest-class-mean probe over the classes seen so far.
fn probe_state(means: &[Vec<f32>], seen: &[usize]) -> StateDict {
    let classes = means.len();
    let dim = means.first().map_or(0, Vec::len);
    let mut weight = vec![0.0f32; classes * dim];
    let mut bias = vec![UNSEEN_BIAS; classes];
    for &c in seen {
        weight[c * dim..(c + 1) * dim].copy_from_slice(&means[c]);
        bias[c] = -0.5 * means[c].iter().map(|m| m * m).sum::<f32>();
    }
    let mut state = StateDict::new();
    state.insert("fc.weight".into(), Tensor::new(vec![classes, dim], weight));
    state.insert("fc.bias".into(), Tensor::new(vec![classes], bias));
    state.insert("bn.running_mean".into(), Tensor::new(vec![dim], vec![0.0; dim]));
    state.insert("bn.running_var".into(), Tensor::new(vec![dim], vec![1.0 - BN_EPS; dim]));
    state
}

/// Write archives under `data_root` and the class order plus checkpoints
/// under `store_root`.
pub fn write_fixture(data_root: &Path, store_root: &Path, options: &FixtureOptions) -> Result<FixtureSummary> {
    let variant = options.dataset.variant;
    let mut rng = SimpleRng::new(options.seed);

    let train = synth_images(variant, options.train_per_class, options.noise, &mut rng);
    let test = synth_images(variant, options.test_per_class, options.noise, &mut rng);
    write_archive(data_root, variant, &train, &test)?;

    let mut order: Vec<usize> = (0..variant.num_classes()).collect();
    rng.shuffle(&mut order);
    let class_order = ClassOrder::new(order)?;
    let store = DirectoryStore::new(store_root);
    let order_path = store.class_order_path(&options.algo, options.seed);
    if let Some(parent) = order_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&order_path, serde_json::to_string(&class_order)?)?;

    // Class means in the normalized space the experiment will see.
    let normed = preprocess(train.clone(), &options.dataset, Split::Train);
    let dim = normed.shape.pixels();
    let mut means = vec![vec![0.0f32; dim]; variant.num_classes()];
    let mut counts = vec![0usize; variant.num_classes()];
    for (row, &label) in normed.integer_labels.iter().enumerate() {
        for (m, &x) in means[label].iter_mut().zip(normed.image(row)) {
            *m += x;
        }
        counts[label] += 1;
    }
    for (m, &n) in means.iter_mut().zip(&counts) {
        if n > 0 {
            m.iter_mut().for_each(|v| *v /= n as f32);
        }
    }

    let sessions = class_order.num_sessions(options.classes_per_session);
    for session in 0..sessions {
        let info = parse_class_order(&class_order, session, options.classes_per_session)?;
        let state = probe_state(&means, info.all_classes.as_slice());
        let path = store.checkpoint_path(&options.algo, options.seed, session);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec(&state)?)?;
    }
    log::info!(
        "Fixture: {} train / {} test images, {sessions} sessions, order {:?}",
        train.len(),
        test.len(),
        class_order.as_slice()
    );

    Ok(FixtureSummary {
        class_order,
        sessions,
        train_images: train.len(),
        test_images: test.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::DatasetProvider;

    #[test]
    fn archive_decodes_back_to_synthesized_images() {
        let mut rng = SimpleRng::new(1);
        let images = synth_images(DatasetVariant::Cifar10, 2, 4.0, &mut rng);
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path(), DatasetVariant::Cifar10, &images, &images).unwrap();

        let back = CifarBinaryProvider
            .load(dir.path(), DatasetVariant::Cifar10, ArchiveSplit::Test)
            .unwrap();
        assert_eq!(back.labels, images.labels);
        assert_eq!(back.pixels, images.pixels);

        let train = CifarBinaryProvider
            .load(dir.path(), DatasetVariant::Cifar10, ArchiveSplit::Train)
            .unwrap();
        assert_eq!(train.len(), images.len());
        let names = CifarBinaryProvider
            .label_names(dir.path(), DatasetVariant::Cifar10)
            .unwrap()
            .unwrap();
        assert_eq!(names[9], "truck");
    }

    #[test]
    fn cifar100_archive_round_trips() {
        let mut rng = SimpleRng::new(2);
        let images = synth_images(DatasetVariant::Cifar100, 1, 4.0, &mut rng);
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path(), DatasetVariant::Cifar100, &images, &images).unwrap();
        let back = CifarBinaryProvider
            .load(dir.path(), DatasetVariant::Cifar100, ArchiveSplit::Train)
            .unwrap();
        assert_eq!(back.labels, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = SimpleRng::new(9);
        let mut v: Vec<usize> = (0..100).collect();
        rng.shuffle(&mut v);
        assert!(ClassOrder::new(v).is_ok());
    }
}
