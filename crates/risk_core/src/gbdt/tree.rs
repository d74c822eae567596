//! Decision tree structures for GBDT inference
//!
//! Nodes are stored in a flat vector, node 0 is the root. Traversal goes left
//! when `feature <= threshold`.

use serde::{Deserialize, Serialize};

/// One node of a regression tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Routes a row to `left` when `features[feature] <= threshold`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Raw (unweighted) output
    Leaf { value: f64 },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn leaf_value(&self) -> Option<f64> {
        match self {
            Node::Leaf { value } => Some(*value),
            Node::Split { .. } => None,
        }
    }
}

/// A single regression tree of the ensemble
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,

    /// Shrinkage applied to this tree's output
    pub weight: f64,
}

impl Tree {
    pub fn new(nodes: Vec<Node>, weight: f64) -> Self {
        Self { nodes, weight }
    }

    /// Raw leaf value reached by `features` (0 on malformed structure)
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;

        loop {
            match self.nodes.get(idx) {
                None => return 0.0,
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let Some(&value) = features.get(*feature) else {
                        return 0.0;
                    };
                    let next = if value <= *threshold { *left } else { *right };
                    // Children always follow their parent
                    if next <= idx {
                        return 0.0;
                    }
                    idx = next;
                }
            }
        }
    }

    /// Weighted contribution of this tree
    pub fn contribution(&self, features: &[f64]) -> f64 {
        self.weight * self.evaluate(features)
    }

    /// Validate tree structure
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }

        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("Leaf node {i} has non-finite value {value}"));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if threshold.is_nan() {
                        return Err(format!("Split node {i} has a NaN threshold"));
                    }
                    // Forward-only links also rule out cycles
                    for (side, child) in [("left", *left), ("right", *right)] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("Node {i} has invalid {side} child: {child}"));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Largest feature index referenced by any split
    pub fn max_feature_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }
}
