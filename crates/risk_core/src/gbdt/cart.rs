//! Histogram CART builder
//!
//! Features are bucketed once per ensemble into at most `max_bins` bins. A
//! split on cut `b` sends every row with `bin <= b` left, which is the same as
//! `value <= cuts[b]` on the raw feature, so trees evaluate directly on the
//! unbinned matrix.

use crate::deterministic::SplitTieBreaker;
use crate::gbdt::tree::Node;

/// Deepest tree the trainer accepts
pub const MAX_TREE_DEPTH: usize = 32;

/// Per-tree growth parameters
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub lambda: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
        }
    }
}

/// Column-major bin indices plus the cut values that produced them
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    bins: Vec<Vec<u16>>,
    cuts: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub fn from_rows(rows: &[Vec<f64>], n_features: usize, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, u16::MAX as usize);
        let mut bins = Vec::with_capacity(n_features);
        let mut cuts = Vec::with_capacity(n_features);

        for feature in 0..n_features {
            let column: Vec<f64> = rows.iter().map(|r| r[feature]).collect();
            let feature_cuts = cut_points(&column, max_bins);
            bins.push(
                column
                    .iter()
                    .map(|v| feature_cuts.partition_point(|c| c < v) as u16)
                    .collect(),
            );
            cuts.push(feature_cuts);
        }

        Self { bins, cuts }
    }

    pub fn n_features(&self) -> usize {
        self.cuts.len()
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }

    pub fn cuts(&self, feature: usize) -> &[f64] {
        &self.cuts[feature]
    }

    fn bin(&self, feature: usize, row: usize) -> usize {
        self.bins[feature][row] as usize
    }
}

/// Midpoints between quantiles of the distinct values, at most `max_bins - 1`
fn cut_points(values: &[f64], max_bins: usize) -> Vec<f64> {
    let mut distinct = values.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();

    if distinct.len() <= 1 {
        return Vec::new();
    }

    let mut cuts: Vec<f64> = if distinct.len() <= max_bins {
        distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    } else {
        (1..max_bins)
            .map(|q| {
                let idx = q * distinct.len() / max_bins;
                (distinct[idx - 1] + distinct[idx]) / 2.0
            })
            .collect()
    };
    cuts.dedup();
    cuts
}

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    cut: usize,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

/// Output of growing one tree
#[derive(Debug, Clone)]
pub struct GrownTree {
    pub nodes: Vec<Node>,
    /// Total split gain contributed by each feature
    pub gains: Vec<f64>,
}

/// Grows a single regression tree on gradient statistics
pub struct CartBuilder<'a> {
    binned: &'a BinnedMatrix,
    gradients: &'a [f64],
    hessians: &'a [f64],
    features: &'a [usize],
    config: TreeConfig,
}

impl<'a> CartBuilder<'a> {
    /// `features` restricts split search to a column subsample
    pub fn new(
        binned: &'a BinnedMatrix,
        gradients: &'a [f64],
        hessians: &'a [f64],
        features: &'a [usize],
        config: TreeConfig,
    ) -> Self {
        Self {
            binned,
            gradients,
            hessians,
            features,
            config,
        }
    }

    /// Build a tree over the given row subsample
    pub fn build(&self, rows: &[usize]) -> GrownTree {
        let mut nodes = Vec::new();
        let mut gains = vec![0.0; self.binned.n_features()];
        self.build_node(rows.to_vec(), 0, &mut nodes, 0, &mut gains);
        GrownTree { nodes, gains }
    }

    fn build_node(
        &self,
        indices: Vec<usize>,
        depth: usize,
        nodes: &mut Vec<Node>,
        node_id: usize,
        gains: &mut [f64],
    ) -> usize {
        let current = nodes.len();
        let (g, h) = self.sums(&indices);

        if depth >= self.config.max_depth || indices.len() < 2 {
            nodes.push(Node::Leaf {
                value: self.leaf_value(g, h),
            });
            return current;
        }

        let Some(split) = self.find_best_split(&indices, g, h, node_id) else {
            nodes.push(Node::Leaf {
                value: self.leaf_value(g, h),
            });
            return current;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&row| self.binned.bin(split.feature_idx, row) <= split.cut);

        gains[split.feature_idx] += split.gain;
        nodes.push(Node::Split {
            feature: split.feature_idx,
            threshold: self.binned.cuts(split.feature_idx)[split.cut],
            left: 0,
            right: 0,
        });

        // Heap numbering saturates on very deep paths; ids only order ties
        let child_id = node_id.saturating_mul(2);
        let left_idx = self.build_node(left, depth + 1, nodes, child_id.saturating_add(1), gains);
        let right_idx = self.build_node(right, depth + 1, nodes, child_id.saturating_add(2), gains);

        if let Node::Split { left, right, .. } = &mut nodes[current] {
            *left = left_idx;
            *right = right_idx;
        }
        current
    }

    fn find_best_split(
        &self,
        indices: &[usize],
        g_total: f64,
        h_total: f64,
        node_id: usize,
    ) -> Option<SplitCandidate> {
        let parent_score = self.score(g_total, h_total);
        let mut best: Option<SplitCandidate> = None;

        for &feature_idx in self.features {
            let n_bins = self.binned.n_bins(feature_idx);
            if n_bins < 2 {
                continue;
            }

            let mut histogram = vec![(0.0f64, 0.0f64); n_bins];
            for &row in indices {
                let slot = &mut histogram[self.binned.bin(feature_idx, row)];
                slot.0 += self.gradients[row];
                slot.1 += self.hessians[row];
            }

            let (mut g_left, mut h_left) = (0.0, 0.0);
            for (cut, &(g_bin, h_bin)) in histogram[..n_bins - 1].iter().enumerate() {
                g_left += g_bin;
                h_left += h_bin;
                let g_right = g_total - g_left;
                let h_right = h_total - h_left;

                if h_left <= 0.0 || h_right <= 0.0 {
                    continue;
                }
                if h_left < self.config.min_child_weight || h_right < self.config.min_child_weight {
                    continue;
                }

                let gain =
                    0.5 * (self.score(g_left, h_left) + self.score(g_right, h_right) - parent_score);
                if gain.is_nan() || gain <= 0.0 {
                    continue;
                }

                let candidate = SplitCandidate {
                    feature_idx,
                    cut,
                    gain,
                    tie_breaker: SplitTieBreaker::new(feature_idx, cut, node_id),
                };

                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        if gain > current.gain
                            || (gain == current.gain
                                && candidate.tie_breaker < current.tie_breaker)
                        {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
        }

        best
    }

    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        indices.iter().fold((0.0, 0.0), |(g, h), &row| {
            (g + self.gradients[row], h + self.hessians[row])
        })
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.config.lambda)
    }

    /// Optimal leaf weight: -G / (H + lambda)
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.config.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -g / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::tree::Tree;

    fn separable() -> (Vec<Vec<f64>>, Vec<f64>, Vec<f64>) {
        let rows = vec![
            vec![0.0, 5.0],
            vec![1.0, 5.0],
            vec![2.0, 5.0],
            vec![10.0, 5.0],
            vec![11.0, 5.0],
            vec![12.0, 5.0],
        ];
        let gradients = vec![1.0, 1.0, 1.0, -1.0, -1.0, -1.0];
        let hessians = vec![1.0; 6];
        (rows, gradients, hessians)
    }

    #[test]
    fn cut_points_are_midpoints_of_distinct_values() {
        assert_eq!(cut_points(&[3.0, 1.0, 1.0, 2.0], 64), vec![1.5, 2.5]);
        assert!(cut_points(&[4.0, 4.0], 64).is_empty());

        let many: Vec<f64> = (0..1000).map(f64::from).collect();
        let cuts = cut_points(&many, 16);
        assert_eq!(cuts.len(), 15);
        assert!(cuts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn bins_agree_with_thresholds() {
        let (rows, _, _) = separable();
        let binned = BinnedMatrix::from_rows(&rows, 2, 4);
        for (row_idx, row) in rows.iter().enumerate() {
            for cut in 0..binned.cuts(0).len() {
                let by_bin = binned.bin(0, row_idx) <= cut;
                let by_value = row[0] <= binned.cuts(0)[cut];
                assert_eq!(by_bin, by_value);
            }
        }
        assert_eq!(binned.n_bins(1), 1);
    }

    #[test]
    fn splits_separable_feature() {
        let (rows, gradients, hessians) = separable();
        let binned = BinnedMatrix::from_rows(&rows, 2, 64);
        let features = [0, 1];
        let config = TreeConfig {
            max_depth: 1,
            min_child_weight: 0.0,
            lambda: 1.0,
        };
        let grown = CartBuilder::new(&binned, &gradients, &hessians, &features, config)
            .build(&(0..6).collect::<Vec<_>>());

        assert_eq!(grown.nodes.len(), 3);
        assert!(matches!(grown.nodes[0], Node::Split { feature: 0, .. }));
        assert!(grown.gains[0] > 0.0);
        assert_eq!(grown.gains[1], 0.0);

        let tree = Tree::new(grown.nodes, 1.0);
        assert!(tree.validate().is_ok());
        assert!(tree.evaluate(&[1.0, 5.0]) < 0.0);
        assert!(tree.evaluate(&[11.0, 5.0]) > 0.0);
    }

    #[test]
    fn min_child_weight_blocks_split() {
        let (rows, gradients, hessians) = separable();
        let binned = BinnedMatrix::from_rows(&rows, 2, 64);
        let features = [0, 1];
        let config = TreeConfig {
            max_depth: 3,
            min_child_weight: 4.0,
            lambda: 1.0,
        };
        let grown = CartBuilder::new(&binned, &gradients, &hessians, &features, config)
            .build(&(0..6).collect::<Vec<_>>());
        assert_eq!(grown.nodes.len(), 1);
        assert!(grown.nodes[0].is_leaf());
    }

    #[test]
    fn leaf_value_is_regularized_newton_step() {
        let rows = vec![vec![1.0]];
        let binned = BinnedMatrix::from_rows(&rows, 1, 64);
        let features = [0];
        let grown = CartBuilder::new(&binned, &[2.0], &[1.0], &features, TreeConfig::default())
            .build(&[0]);
        assert_eq!(grown.nodes.len(), 1);
        assert_eq!(grown.nodes[0].leaf_value(), Some(-1.0));
    }

    #[test]
    fn very_deep_growth_does_not_overflow_node_ids() {
        let rows: Vec<Vec<f64>> = (0..300).map(|i| vec![f64::from(i)]).collect();
        let gradients: Vec<f64> = (0..300)
            .map(|i| {
                let magnitude = 1.1f64.powi(i);
                if i % 2 == 0 {
                    magnitude
                } else {
                    -magnitude
                }
            })
            .collect();
        let hessians = vec![1.0; 300];
        let binned = BinnedMatrix::from_rows(&rows, 1, 512);
        let features = [0];
        let config = TreeConfig {
            max_depth: 200,
            min_child_weight: 0.0,
            lambda: 1.0,
        };

        let grown = CartBuilder::new(&binned, &gradients, &hessians, &features, config)
            .build(&(0..300).collect::<Vec<_>>());

        let tree = Tree::new(grown.nodes, 1.0);
        assert!(tree.validate().is_ok());
        assert!(tree.nodes.len() > 2 * MAX_TREE_DEPTH);
    }
}
