use crate::backbone::Backbone;
use crate::data::batch::DataLoader;
use crate::data::model::ClassSet;
use crate::error::Result;

/// Accuracy over the samples of `loader` whose class is in `selected`.
///
/// The prediction is the arg-max over the logits of `selected` only, so a
/// model is never penalized for classes outside the subset. Returns `None`
/// when no sample belongs to `selected` (e.g. the old classes of session 0).
pub fn selected_class_accuracy(
    model: &dyn Backbone,
    loader: &DataLoader,
    selected: &ClassSet,
) -> Result<Option<f64>> {
    if selected.is_empty() {
        return Ok(None);
    }
    let mut correct = 0usize;
    let mut total = 0usize;
    for batch in loader.batches() {
        let batch = batch?;
        for (i, &class) in batch.class_ids.iter().enumerate() {
            if !selected.contains(class) {
                continue;
            }
            let logits = model.forward(batch.image(i))?;
            let predicted = selected
                .iter()
                .filter(|&c| c < logits.len())
                .max_by(|&a, &b| logits[a].total_cmp(&logits[b]).then(b.cmp(&a)));
            if predicted == Some(class) {
                correct += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        return Ok(None);
    }
    Ok(Some(correct as f64 / total as f64))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::model::{DatasetVariant, ImageShape, LabelData, RawDataset, Split};
    use crate::error::Error;
    use crate::store::Checkpoint;

    /// Scores class `c` by `-(x - c)^2`, so the nearest class id wins.
    struct Nearest(usize);

    impl Backbone for Nearest {
        fn num_classes(&self) -> usize {
            self.0
        }

        fn load_state_dict(&mut self, _checkpoint: &Checkpoint) -> Result<()> {
            Ok(())
        }

        fn forward(&self, image: &[f32]) -> Result<Vec<f32>> {
            let x = image.first().copied().ok_or(Error::Format("empty image".into()))?;
            Ok((0..self.0).map(|c| -(x - c as f32).powi(2)).collect())
        }
    }

    fn dataset(pixels: Vec<f32>, labels: Vec<usize>) -> Arc<RawDataset> {
        Arc::new(RawDataset {
            variant: DatasetVariant::Cifar10,
            split: Split::Test,
            shape: ImageShape {
                height: 1,
                width: 1,
                channels: 1,
            },
            flatten: true,
            images: pixels,
            labels: LabelData::Integer(labels.clone()),
            integer_labels: labels,
        })
    }

    #[test]
    fn accuracy_counts_only_selected_classes() {
        // class 0 and 1 predicted right, class 2 sample looks like class 3
        let data = dataset(vec![0.0, 1.0, 3.0, 3.0], vec![0, 1, 2, 3]);
        let all = ClassSet::new([0, 1, 2, 3]);
        let loader = DataLoader::for_classes(&data, &all, 2).unwrap();
        let model = Nearest(4);

        let acc = selected_class_accuracy(&model, &loader, &all).unwrap().unwrap();
        assert!((acc - 0.75).abs() < 1e-12);

        let low = ClassSet::new([0, 1]);
        assert_eq!(selected_class_accuracy(&model, &loader, &low).unwrap(), Some(1.0));
    }

    #[test]
    fn masking_logits_rescues_subset_accuracy() {
        // restricted to {2}, the class-3 lookalike is scored correct
        let data = dataset(vec![3.0], vec![2]);
        let loader = DataLoader::for_classes(&data, &ClassSet::new([2, 3]), 8).unwrap();
        let acc = selected_class_accuracy(&Nearest(4), &loader, &ClassSet::new([2])).unwrap();
        assert_eq!(acc, Some(1.0));
    }

    #[test]
    fn empty_selection_has_no_accuracy() {
        let data = dataset(vec![0.0], vec![0]);
        let loader = DataLoader::for_classes(&data, &ClassSet::new([0]), 8).unwrap();
        let model = Nearest(2);
        assert_eq!(selected_class_accuracy(&model, &loader, &ClassSet::new([])).unwrap(), None);
        assert_eq!(selected_class_accuracy(&model, &loader, &ClassSet::new([1])).unwrap(), None);
    }
}
