//! Class-incremental evaluation of pretrained backbones on CIFAR-10/100.
//!
//! A run is identified by `(algo, seed)`. Its class order splits the classes
//! into sessions of a fixed size; every session has a checkpoint trained on
//! the classes seen so far. [`experiment::Experiment`] evaluates each
//! session on the all/old/new class groups and collects
//! [`experiment::AccuracyRecord`]s for [`report::write_records`].

pub mod backbone;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod experiment;
pub mod export;
pub mod fixture;
pub mod report;
pub mod session;
pub mod store;

pub use error::{Error, Result};
