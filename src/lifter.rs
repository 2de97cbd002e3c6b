use serde::{Deserialize, Serialize};

use crate::data::{InputData, Matrix, View};
use crate::mask::FeatureMask;

/// Bidirectional mapping between the full feature space and the reduced
/// space of prefilter-surviving features.
///
/// `uplift` compresses full-space structures to the reduced space, `downlift`
/// expands reduced-space masks back, leaving inactive positions false.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeatureSpaceLifter {
    active: Vec<bool>,
}

impl FeatureSpaceLifter {
    pub fn new(active: Vec<bool>) -> FeatureSpaceLifter {
        FeatureSpaceLifter { active }
    }

    /// A lifter keeping every feature.
    pub fn identity(len: usize) -> FeatureSpaceLifter {
        FeatureSpaceLifter {
            active: vec![true; len],
        }
    }

    pub fn full_len(&self) -> usize {
        self.active.len()
    }

    pub fn reduced_len(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    pub fn active(&self) -> &[bool] {
        &self.active
    }

    /// Full-space indices of the active features, ascending.
    pub fn active_positions(&self) -> Vec<usize> {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, &a)| a)
            .map(|(i, _)| i)
            .collect()
    }

    /// Compress a full-space mask to the reduced space.
    ///
    /// # Panics
    /// Panics when the mask length differs from the full length.
    pub fn uplift_mask(&self, full: &FeatureMask) -> FeatureMask {
        assert!(
            full.len() == self.full_len(),
            "uplift of a mask of length {} through a lifter over {} features",
            full.len(),
            self.full_len()
        );
        let bits: Vec<bool> = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, &a)| a)
            .map(|(i, _)| full.get(i))
            .collect();
        FeatureMask::from_bools(bits)
    }

    /// Expand a reduced-space mask to the full space.
    ///
    /// # Panics
    /// Panics when the mask length differs from the reduced length.
    pub fn downlift_mask(&self, reduced: &FeatureMask) -> FeatureMask {
        assert!(
            reduced.len() == self.reduced_len(),
            "downlift of a mask of length {} through a lifter with {} active features",
            reduced.len(),
            self.reduced_len()
        );
        let active_positions = self.active_positions();
        let positions = reduced.iter_true().map(|p| active_positions[p]);
        FeatureMask::from_positions(positions, self.full_len())
    }

    /// Select the active columns of a full-space matrix.
    pub fn uplift_matrix(&self, x: &Matrix) -> Matrix {
        assert!(
            x.n_cols() == self.full_len(),
            "uplift of a matrix with {} columns through a lifter over {} features",
            x.n_cols(),
            self.full_len()
        );
        x.select_columns(&self.active_positions())
    }

    pub fn uplift_names(&self, names: &[String]) -> Vec<String> {
        self.active_positions()
            .iter()
            .map(|&i| names[i].clone())
            .collect()
    }

    pub fn uplift_weights(&self, weights: &[f64]) -> Vec<f64> {
        self.active_positions().iter().map(|&i| weights[i]).collect()
    }
}

/// Per-view lifters routed by view name, collapsible over the concatenation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MultiViewLifter {
    pub view_names: Vec<String>,
    pub lifters: Vec<FeatureSpaceLifter>,
}

impl MultiViewLifter {
    pub fn new(view_names: Vec<String>, lifters: Vec<FeatureSpaceLifter>) -> MultiViewLifter {
        assert!(
            view_names.len() == lifters.len(),
            "{} view names for {} lifters",
            view_names.len(),
            lifters.len()
        );
        MultiViewLifter {
            view_names,
            lifters,
        }
    }

    pub fn lifter(&self, view: &str) -> Option<&FeatureSpaceLifter> {
        self.view_names
            .iter()
            .position(|n| n == view)
            .map(|i| &self.lifters[i])
    }

    /// A single lifter over the concatenation of all views.
    pub fn collapse(&self) -> FeatureSpaceLifter {
        let active = self
            .lifters
            .iter()
            .flat_map(|l| l.active().iter().copied())
            .collect();
        FeatureSpaceLifter::new(active)
    }

    /// Uplift a whole dataset into the reduced space, view by view.
    ///
    /// # Panics
    /// Panics when a view has no matching lifter.
    pub fn uplift_data(&self, input: &InputData) -> InputData {
        let views = input
            .views
            .iter()
            .map(|view| {
                let lifter = self
                    .lifter(&view.name)
                    .unwrap_or_else(|| panic!("no lifter for view '{}'", view.name));
                View {
                    name: view.name.clone(),
                    feature_names: lifter.uplift_names(&view.feature_names),
                    x: lifter.uplift_matrix(&view.x),
                }
            })
            .collect();
        InputData {
            views,
            outcomes: input.outcomes.clone(),
            samples: input.samples.clone(),
            nick: input.nick.clone(),
            stratify_outcome: input.stratify_outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn mask(bits: &[u8]) -> FeatureMask {
        FeatureMask::Dense(bits.iter().map(|&b| b != 0).collect())
    }

    #[test]
    fn test_uplift_and_downlift() {
        let lifter = FeatureSpaceLifter::new(vec![true, false, true, false, true]);
        assert_eq!(lifter.reduced_len(), 3);

        let up = lifter.uplift_mask(&mask(&[1, 0, 1, 0, 1]));
        assert_eq!(up, mask(&[1, 1, 1]), "uplift keeps the active entries");

        let down = lifter.downlift_mask(&mask(&[1, 1, 1]));
        assert_eq!(
            down,
            mask(&[1, 0, 1, 0, 1]),
            "downlift places entries at active positions"
        );
    }

    #[test]
    fn test_uplift_of_downlift_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let active: Vec<bool> = (0..40).map(|_| rng.gen_bool(0.4)).collect();
        let lifter = FeatureSpaceLifter::new(active);
        for _ in 0..20 {
            let reduced = FeatureMask::from_bools(
                (0..lifter.reduced_len()).map(|_| rng.gen_bool(0.3)).collect(),
            );
            assert_eq!(
                lifter.uplift_mask(&lifter.downlift_mask(&reduced)),
                reduced,
                "uplift(downlift(m)) must reproduce m"
            );
        }
    }

    #[test]
    fn test_downlift_of_uplift_intersects_with_active() {
        let lifter = FeatureSpaceLifter::new(vec![true, false, true, true, false]);
        let full = mask(&[1, 1, 0, 1, 1]);
        let round = lifter.downlift_mask(&lifter.uplift_mask(&full));
        // true exactly where full ∧ active
        assert_eq!(round, mask(&[1, 0, 0, 1, 0]));
    }

    #[test]
    fn test_uplift_matrix_and_names() {
        let lifter = FeatureSpaceLifter::new(vec![false, true, true]);
        let x = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let up = lifter.uplift_matrix(&x);
        assert_eq!(up.n_cols(), 2);
        assert_eq!(up.row(0), &[2.0, 3.0]);
        let names: Vec<String> = crate::string_vec!["a", "b", "c"];
        let expected: Vec<String> = crate::string_vec!["b", "c"];
        assert_eq!(lifter.uplift_names(&names), expected);
    }

    #[test]
    fn test_collapse_concatenates_actives() {
        let multi = MultiViewLifter::new(
            crate::string_vec!["v1", "v2"],
            vec![
                FeatureSpaceLifter::new(vec![true, false]),
                FeatureSpaceLifter::new(vec![false, true, true]),
            ],
        );
        let collapsed = multi.collapse();
        assert_eq!(collapsed.active(), &[true, false, false, true, true]);
        assert_eq!(collapsed.reduced_len(), 3);
    }

    #[test]
    fn test_uplift_data_routes_by_view_name() {
        let input = crate::data::tests::create_test_data();
        let multi = MultiViewLifter::new(
            crate::string_vec!["taxa", "genes"],
            vec![
                FeatureSpaceLifter::new(vec![true, false, true]),
                FeatureSpaceLifter::new(vec![true, true]),
            ],
        );
        let reduced = multi.uplift_data(&input);
        assert_eq!(reduced.feature_len(), 4);
        let expected: Vec<String> = crate::string_vec!["f1", "f3"];
        assert_eq!(reduced.views[0].feature_names, expected);
        assert_eq!(reduced.views[0].x.row(0), &[1.0, 2.0]);
        reduced.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "no lifter for view")]
    fn test_unknown_view_panics() {
        let input = crate::data::tests::create_test_data();
        let multi = MultiViewLifter::new(
            crate::string_vec!["taxa"],
            vec![FeatureSpaceLifter::new(vec![true, false, true])],
        );
        let _ = multi.uplift_data(&input);
    }
}
