use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Density above which a freshly built mask is stored dense.
const SPARSE_DENSITY_LIMIT: f64 = 0.2;

/// A feature subset over a fixed-length feature axis.
///
/// Two representations share one behavior: `Dense` keeps the full boolean
/// sequence, `Sparse` keeps only the true positions. Equality, hashing and
/// iteration are representation-independent, so a dense mask and a sparse
/// mask selecting the same features are the same mask everywhere (hall of
/// fame membership included).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FeatureMask {
    Dense(Vec<bool>),
    Sparse { positions: BTreeSet<usize>, len: usize },
}

impl FeatureMask {
    /// An all-false mask of the given length.
    pub fn zeros(len: usize) -> FeatureMask {
        FeatureMask::Sparse {
            positions: BTreeSet::new(),
            len,
        }
    }

    /// Build from a boolean sequence, choosing the representation by density.
    pub fn from_bools(bits: Vec<bool>) -> FeatureMask {
        let count = bits.iter().filter(|&&b| b).count();
        if (count as f64) <= SPARSE_DENSITY_LIMIT * bits.len() as f64 {
            let positions = bits
                .iter()
                .enumerate()
                .filter(|(_, &b)| b)
                .map(|(i, _)| i)
                .collect();
            FeatureMask::Sparse {
                positions,
                len: bits.len(),
            }
        } else {
            FeatureMask::Dense(bits)
        }
    }

    /// Build from true positions, choosing the representation by density.
    ///
    /// # Panics
    /// Panics when a position is out of range.
    pub fn from_positions<I: IntoIterator<Item = usize>>(positions: I, len: usize) -> FeatureMask {
        let positions: BTreeSet<usize> = positions.into_iter().collect();
        if let Some(&max) = positions.iter().next_back() {
            assert!(
                max < len,
                "mask position {} out of range for length {}",
                max,
                len
            );
        }
        if positions.len() as f64 <= SPARSE_DENSITY_LIMIT * len as f64 {
            FeatureMask::Sparse { positions, len }
        } else {
            let mut bits = vec![false; len];
            for p in positions {
                bits[p] = true;
            }
            FeatureMask::Dense(bits)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureMask::Dense(bits) => bits.len(),
            FeatureMask::Sparse { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sum() == 0
    }

    /// Population count.
    pub fn sum(&self) -> usize {
        match self {
            FeatureMask::Dense(bits) => bits.iter().filter(|&&b| b).count(),
            FeatureMask::Sparse { positions, .. } => positions.len(),
        }
    }

    pub fn density(&self) -> f64 {
        if self.len() == 0 {
            0.0
        } else {
            self.sum() as f64 / self.len() as f64
        }
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len(), "mask index {} out of range for length {}", i, self.len());
        match self {
            FeatureMask::Dense(bits) => bits[i],
            FeatureMask::Sparse { positions, .. } => positions.contains(&i),
        }
    }

    pub fn set(&mut self, i: usize, value: bool) {
        assert!(i < self.len(), "mask index {} out of range for length {}", i, self.len());
        match self {
            FeatureMask::Dense(bits) => bits[i] = value,
            FeatureMask::Sparse { positions, .. } => {
                if value {
                    positions.insert(i);
                } else {
                    positions.remove(&i);
                }
            }
        }
    }

    pub fn flip(&mut self, i: usize) {
        let current = self.get(i);
        self.set(i, !current);
    }

    /// Ascending iteration over the true positions, identical for both forms.
    pub fn iter_true(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match self {
            FeatureMask::Dense(bits) => Box::new(
                bits.iter()
                    .enumerate()
                    .filter(|(_, &b)| b)
                    .map(|(i, _)| i),
            ),
            FeatureMask::Sparse { positions, .. } => Box::new(positions.iter().copied()),
        }
    }

    pub fn true_positions(&self) -> Vec<usize> {
        self.iter_true().collect()
    }

    pub fn to_bools(&self) -> Vec<bool> {
        match self {
            FeatureMask::Dense(bits) => bits.clone(),
            FeatureMask::Sparse { positions, len } => {
                let mut bits = vec![false; *len];
                for &p in positions {
                    bits[p] = true;
                }
                bits
            }
        }
    }

    /// Stable content hash, equal for equal masks regardless of representation.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn intersection_count(&self, other: &FeatureMask) -> usize {
        self.iter_true().filter(|&p| other.get(p)).count()
    }

    /// Jaccard similarity |A∩B| / |A∪B|; two empty masks count as identical.
    pub fn jaccard(&self, other: &FeatureMask) -> f64 {
        let inter = self.intersection_count(other) as f64;
        let union = self.sum() as f64 + other.sum() as f64 - inter;
        if union == 0.0 {
            1.0
        } else {
            inter / union
        }
    }

    /// Dice similarity 2|A∩B| / (|A|+|B|); two empty masks count as identical.
    pub fn dice(&self, other: &FeatureMask) -> f64 {
        let inter = self.intersection_count(other) as f64;
        let total = self.sum() as f64 + other.sum() as f64;
        if total == 0.0 {
            1.0
        } else {
            2.0 * inter / total
        }
    }

    /// Add this mask into per-position selection counts.
    ///
    /// # Panics
    /// Panics when `counts` is shorter than the mask.
    pub fn accumulate_into(&self, counts: &mut [usize]) {
        assert!(
            counts.len() >= self.len(),
            "count buffer of length {} too short for mask of length {}",
            counts.len(),
            self.len()
        );
        for p in self.iter_true() {
            counts[p] += 1;
        }
    }
}

impl PartialEq for FeatureMask {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() || self.sum() != other.sum() {
            return false;
        }
        self.iter_true().zip(other.iter_true()).all(|(a, b)| a == b)
    }
}

impl Eq for FeatureMask {}

impl Hash for FeatureMask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for p in self.iter_true() {
            p.hash(state);
        }
    }
}

impl fmt::Display for FeatureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}:", self.sum(), self.len())?;
        for (i, p) in self.iter_true().enumerate() {
            if i >= 12 {
                write!(f, " …")?;
                break;
            }
            write!(f, " {}", p)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(bits: &[u8]) -> FeatureMask {
        FeatureMask::Dense(bits.iter().map(|&b| b != 0).collect())
    }

    #[test]
    fn test_representation_choice_by_density() {
        // 2/10 = 20% true -> sparse
        let sparse = FeatureMask::from_bools(vec![
            true, false, false, false, true, false, false, false, false, false,
        ]);
        assert!(
            matches!(sparse, FeatureMask::Sparse { .. }),
            "20% density should pick the sparse form"
        );
        // 3/10 = 30% true -> dense
        let dense = FeatureMask::from_bools(vec![
            true, true, false, false, true, false, false, false, false, false,
        ]);
        assert!(
            matches!(dense, FeatureMask::Dense(_)),
            "30% density should pick the dense form"
        );
    }

    #[test]
    fn test_equality_and_hash_across_forms() {
        // 2/16 = 12.5% true, below the sparse density limit
        let a = dense(&[1, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let b = FeatureMask::from_positions([0, 2], 16);
        assert!(matches!(b, FeatureMask::Sparse { .. }));
        assert_eq!(a, b, "dense and sparse forms of the same mask should be equal");
        assert_eq!(
            a.content_hash(),
            b.content_hash(),
            "equal masks should share a content hash"
        );

        let c = FeatureMask::from_positions([0, 3], 16);
        assert_ne!(a, c);
        assert_ne!(a.content_hash(), c.content_hash());

        // same positions, different length: different masks
        let d = FeatureMask::from_positions([0, 2], 17);
        assert_ne!(b, d, "masks of different length are never equal");
    }

    #[test]
    fn test_get_set_flip() {
        let mut m = FeatureMask::zeros(6);
        m.set(2, true);
        m.set(4, true);
        assert_eq!(m.sum(), 2);
        assert!(m.get(2) && m.get(4) && !m.get(0));
        m.flip(2);
        assert!(!m.get(2));
        assert_eq!(m.true_positions(), vec![4]);

        let mut d = dense(&[0, 1, 1, 0]);
        d.set(0, true);
        d.flip(1);
        assert_eq!(d.true_positions(), vec![0, 2]);
    }

    #[test]
    fn test_iteration_is_ascending() {
        let m = FeatureMask::from_positions([7, 1, 4], 50);
        assert_eq!(m.true_positions(), vec![1, 4, 7]);
        let d = dense(&[0, 1, 0, 0, 1, 0, 0, 1]);
        assert_eq!(d.true_positions(), vec![1, 4, 7]);
    }

    #[test]
    fn test_jaccard_and_dice() {
        let a = dense(&[1, 1, 0, 0]);
        let b = dense(&[0, 1, 1, 0]);
        assert!((a.jaccard(&b) - 1.0 / 3.0).abs() < 1e-12, "jaccard {{0,1}} vs {{1,2}} is 1/3");
        assert!((a.dice(&b) - 0.5).abs() < 1e-12, "dice {{0,1}} vs {{1,2}} is 1/2");
        let empty1 = FeatureMask::zeros(4);
        let empty2 = FeatureMask::zeros(4);
        assert_eq!(empty1.jaccard(&empty2), 1.0, "two empty masks are identical");
        assert_eq!(empty1.dice(&empty2), 1.0);
    }

    #[test]
    fn test_accumulate_into() {
        let mut counts = vec![0usize; 5];
        dense(&[1, 0, 1, 0, 0]).accumulate_into(&mut counts);
        FeatureMask::from_positions([2, 4], 5).accumulate_into(&mut counts);
        assert_eq!(counts, vec![1, 0, 2, 0, 1]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_set_panics() {
        let mut m = FeatureMask::zeros(3);
        m.set(3, true);
    }
}
