// 🌳 Regression Tree - Shared learner for boosting and forests
//
// Variance-reduction splits over dense f64 features. The caller decides
// what a leaf predicts (mean label for forests, Newton step for boosting).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split (None = all)
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fit on `targets` over the rows in `indices`; `leaf` turns a row set into a prediction
    pub fn fit(
        x: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
        leaf: &dyn Fn(&[usize]) -> f64,
    ) -> Self {
        let root = grow(x, targets, indices.to_vec(), 0, params, rng, leaf);
        RegressionTree { root }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(f64::NAN);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn grow(
    x: &[Vec<f64>],
    targets: &[f64],
    indices: Vec<usize>,
    depth: usize,
    params: TreeParams,
    rng: &mut StdRng,
    leaf: &dyn Fn(&[usize]) -> f64,
) -> TreeNode {
    if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf.max(1) {
        return TreeNode::Leaf {
            value: leaf(&indices),
        };
    }

    match best_split(x, targets, &indices, params, rng) {
        Some(split) => {
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| x[i][split.feature] <= split.threshold);
            TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(grow(x, targets, left, depth + 1, params, rng, leaf)),
                right: Box::new(grow(x, targets, right, depth + 1, params, rng, leaf)),
            }
        }
        None => TreeNode::Leaf {
            value: leaf(&indices),
        },
    }
}

fn best_split(
    x: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: TreeParams,
    rng: &mut StdRng,
) -> Option<Split> {
    let n_features = x.first().map_or(0, |row| row.len());
    let mut features: Vec<usize> = (0..n_features).collect();
    if let Some(k) = params.max_features {
        features.shuffle(rng);
        features.truncate(k.clamp(1, n_features.max(1)));
        // Deterministic evaluation order once the subset is drawn
        features.sort_unstable();
    }

    let n = indices.len() as f64;
    let total: f64 = indices.iter().map(|&i| targets[i]).sum();
    let min_leaf = params.min_samples_leaf.max(1);

    let mut best: Option<Split> = None;
    let mut sorted = indices.to_vec();

    for feature in features {
        sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        for pos in 0..sorted.len() - 1 {
            left_sum += targets[sorted[pos]];
            let left_n = (pos + 1) as f64;
            let right_n = n - left_n;

            let here = x[sorted[pos]][feature];
            let next = x[sorted[pos + 1]][feature];
            if here == next || pos + 1 < min_leaf || sorted.len() - pos - 1 < min_leaf {
                continue;
            }

            // SSE reduction = L²/nL + R²/nR - T²/n
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n + right_sum * right_sum / right_n
                - total * total / n;

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature,
                    threshold: (here + next) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_tree_learns_threshold() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { 1.0 }).collect();
        let indices: Vec<usize> = (0..20).collect();
        let mean = |rows: &[usize]| rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64;

        let mut rng = StdRng::seed_from_u64(1);
        let params = TreeParams {
            max_depth: 3,
            min_samples_leaf: 1,
            max_features: None,
        };
        let tree = RegressionTree::fit(&x, &y, &indices, params, &mut rng, &mean);

        assert_eq!(tree.predict(&[2.0, 0.0]), 0.0);
        assert_eq!(tree.predict(&[15.0, 0.0]), 1.0);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_constant_targets_make_a_leaf() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![1.0; 6];
        let indices: Vec<usize> = (0..6).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let params = TreeParams {
            max_depth: 4,
            min_samples_leaf: 1,
            max_features: None,
        };
        let tree = RegressionTree::fit(&x, &y, &indices, params, &mut rng, &|_: &[usize]| 0.75);

        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict(&[3.0]), 0.75);
    }
}
