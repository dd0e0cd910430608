/// Data layer: archive decoding, preprocessing, partitioning and batching.
///
/// Architecture:
/// ```text
///  cifar-10-batches-bin / cifar-100-binary
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  decode records → RawImages, hold out valid rows
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ preprocess  │  normalize pixels, encode labels → RawDataset
///   └────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  class set → PartitionedView (row indices)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  batch    │  fixed-size batches for evaluation
///   └──────────┘
/// ```

pub mod batch;
pub mod filter;
pub mod loader;
pub mod model;
pub mod preprocess;
