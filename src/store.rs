//! Checkpoint and class-order index.
//!
//! Class orders and checkpoints are keyed by `(algo, seed)` and
//! `(algo, seed, session)`. Checkpoint contents are opaque here: the store
//! hands back bytes and the backbone decides whether they fit.
//!
//! ```text
//!  root/class_orders/<algo>/seed_<seed>.json                 [c0, c1, ...]
//!  root/checkpoints/<algo>/seed_<seed>/session_<s>.ckpt      opaque blob
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::model::ClassSet;
use crate::error::{Error, Result};

/// Classes introduced per session unless configured otherwise.
pub const DEFAULT_CLASSES_PER_SESSION: usize = 5;

// ---------------------------------------------------------------------------
// ClassOrder / SessionClassInfo
// ---------------------------------------------------------------------------

/// Permutation of all class ids giving the order of introduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct ClassOrder(Vec<usize>);

impl ClassOrder {
    /// Accepts only permutations of `[0, len)`.
    pub fn new(order: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; order.len()];
        for &c in &order {
            match seen.get_mut(c) {
                Some(s) if !*s => *s = true,
                _ => {
                    return Err(Error::Format(format!(
                        "class order is not a permutation of 0..{}: offending id {c}",
                        order.len()
                    )))
                }
            }
        }
        Ok(ClassOrder(order))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Number of whole sessions of `classes_per_session` the order covers.
    pub fn num_sessions(&self, classes_per_session: usize) -> usize {
        if classes_per_session == 0 {
            0
        } else {
            self.0.len() / classes_per_session
        }
    }
}

impl TryFrom<Vec<usize>> for ClassOrder {
    type Error = Error;

    fn try_from(order: Vec<usize>) -> Result<Self> {
        ClassOrder::new(order)
    }
}

impl From<ClassOrder> for Vec<usize> {
    fn from(order: ClassOrder) -> Self {
        order.0
    }
}

/// Classes seen by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionClassInfo {
    pub session: usize,
    /// Introduced before this session.
    pub old_classes: ClassSet,
    /// Introduced in this session.
    pub new_classes: ClassSet,
    /// `old_classes` followed by `new_classes`.
    pub all_classes: ClassSet,
}

/// Which class group of a session an accuracy refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassGroup {
    AllClasses,
    OldClasses,
    NewClasses,
}

impl ClassGroup {
    pub const ALL: [ClassGroup; 3] = [
        ClassGroup::AllClasses,
        ClassGroup::OldClasses,
        ClassGroup::NewClasses,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassGroup::AllClasses => "all_classes",
            ClassGroup::OldClasses => "old_classes",
            ClassGroup::NewClasses => "new_classes",
        }
    }
}

impl SessionClassInfo {
    pub fn classes(&self, group: ClassGroup) -> &ClassSet {
        match group {
            ClassGroup::AllClasses => &self.all_classes,
            ClassGroup::OldClasses => &self.old_classes,
            ClassGroup::NewClasses => &self.new_classes,
        }
    }
}

/// Slice `order` for `session`: `new = order[s*g .. (s+1)*g]`,
/// `old = order[.. s*g]`.
pub fn parse_class_order(
    order: &ClassOrder,
    session: usize,
    classes_per_session: usize,
) -> Result<SessionClassInfo> {
    let sessions = order.num_sessions(classes_per_session);
    if session >= sessions {
        return Err(Error::Index {
            index: session,
            len: sessions,
            context: "session (class order)",
        });
    }
    let start = session * classes_per_session;
    let end = start + classes_per_session;
    let old_classes = ClassSet::new(order.as_slice()[..start].iter().copied());
    let new_classes = ClassSet::new(order.as_slice()[start..end].iter().copied());
    let all_classes = old_classes.union(&new_classes);
    Ok(SessionClassInfo {
        session,
        old_classes,
        new_classes,
        all_classes,
    })
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Stored parameters for one `(algo, seed, session)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub algo: String,
    pub seed: u64,
    pub session: usize,
    pub bytes: Vec<u8>,
}

/// Read-only source of class orders and checkpoints.
pub trait CheckpointStore {
    fn load_class_order(&self, algo: &str, seed: u64) -> Result<ClassOrder>;
    fn load_checkpoint(&self, algo: &str, seed: u64, session: usize) -> Result<Checkpoint>;
}

/// [`CheckpointStore`] over a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_order_path(&self, algo: &str, seed: u64) -> PathBuf {
        self.root
            .join("class_orders")
            .join(algo)
            .join(format!("seed_{seed}.json"))
    }

    pub fn checkpoint_path(&self, algo: &str, seed: u64, session: usize) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(algo)
            .join(format!("seed_{seed}"))
            .join(format!("session_{session}.ckpt"))
    }
}

impl CheckpointStore for DirectoryStore {
    fn load_class_order(&self, algo: &str, seed: u64) -> Result<ClassOrder> {
        let path = self.class_order_path(algo, seed);
        if !path.is_file() {
            return Err(Error::not_found(
                format!("class order for {algo} seed {seed}"),
                path,
            ));
        }
        let text = std::fs::read_to_string(&path)?;
        let order: ClassOrder = serde_json::from_str(&text)?;
        log::debug!("Class order {algo}/{seed}: {} classes", order.len());
        Ok(order)
    }

    fn load_checkpoint(&self, algo: &str, seed: u64, session: usize) -> Result<Checkpoint> {
        let path = self.checkpoint_path(algo, seed, session);
        if !path.is_file() {
            return Err(Error::not_found(
                format!("checkpoint for {algo} seed {seed} session {session}"),
                path,
            ));
        }
        let bytes = std::fs::read(&path)?;
        log::debug!("Checkpoint {} ({} bytes)", path.display(), bytes.len());
        Ok(Checkpoint {
            algo: algo.to_string(),
            seed,
            session,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(n: usize) -> ClassOrder {
        // deterministic non-identity permutation
        ClassOrder::new((0..n).map(|i| (i * 7 + 3) % n).collect()).unwrap()
    }

    #[test]
    fn class_order_must_be_permutation() {
        assert!(ClassOrder::new(vec![2, 0, 1]).is_ok());
        assert!(ClassOrder::new(vec![0, 0, 1]).is_err());
        assert!(ClassOrder::new(vec![0, 3, 1]).is_err());
        assert!(serde_json::from_str::<ClassOrder>("[1, 1]").is_err());
    }

    #[test]
    fn sessions_slice_order_in_groups_of_five() {
        let order = order(100);
        let c = order.as_slice();
        for s in 0..20 {
            let info = parse_class_order(&order, s, DEFAULT_CLASSES_PER_SESSION).unwrap();
            assert_eq!(info.new_classes.as_slice(), &c[5 * s..5 * s + 5]);
            assert_eq!(info.old_classes.as_slice(), &c[..5 * s]);
            assert!(info.old_classes.is_disjoint(&info.new_classes));
            assert_eq!(info.all_classes.len(), 5 * (s + 1));
        }
    }

    #[test]
    fn all_classes_grow_monotonically() {
        let order = order(100);
        let mut prev = ClassSet::default();
        for s in 0..20 {
            let info = parse_class_order(&order, s, 5).unwrap();
            assert!(prev.is_subset(&info.all_classes));
            prev = info.all_classes;
        }
    }

    #[test]
    fn session_past_end_of_order_is_index_error() {
        let order = order(100);
        assert!(matches!(
            parse_class_order(&order, 20, 5),
            Err(Error::Index { index: 20, len: 20, .. })
        ));
        assert!(parse_class_order(&order, 0, 0).is_err());
    }

    #[test]
    fn toy_order_with_group_of_two() {
        let order = ClassOrder::new(vec![0, 1, 2, 3]).unwrap();
        let s0 = parse_class_order(&order, 0, 2).unwrap();
        assert_eq!(s0.new_classes.as_slice(), &[0, 1]);
        assert!(s0.old_classes.is_empty());
        let s1 = parse_class_order(&order, 1, 2).unwrap();
        assert_eq!(s1.new_classes.as_slice(), &[2, 3]);
        assert_eq!(s1.old_classes.as_slice(), &[0, 1]);
        assert_eq!(s1.all_classes, ClassSet::new([0, 1, 2, 3]));
    }

    #[test]
    fn directory_store_round_trip_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());

        assert!(matches!(
            store.load_class_order("er", 1),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.load_checkpoint("er", 1, 0),
            Err(Error::NotFound { .. })
        ));

        let order_path = store.class_order_path("er", 1);
        std::fs::create_dir_all(order_path.parent().unwrap()).unwrap();
        std::fs::write(&order_path, "[1, 0, 2]").unwrap();
        assert_eq!(store.load_class_order("er", 1).unwrap().as_slice(), &[1, 0, 2]);

        let ckpt_path = store.checkpoint_path("er", 1, 3);
        std::fs::create_dir_all(ckpt_path.parent().unwrap()).unwrap();
        std::fs::write(&ckpt_path, b"blob").unwrap();
        let ckpt = store.load_checkpoint("er", 1, 3).unwrap();
        assert_eq!(ckpt.bytes, b"blob");
        assert_eq!(ckpt.session, 3);
    }
}
