//! Structural checks for a built [`KdTree`].

use crate::kdtree::{high_child, low_child, KdTree, TreeNode};

/// A broken invariant found by [`verify_tree`].
#[derive(Debug, Clone, PartialEq)]
pub enum TreeViolation {
    /// The tree has not been built.
    NotBuilt,

    /// A split node is missing one of its children.
    MissingChild { parent: usize, slot: usize },

    /// A point lies outside the region its ancestors' splits allow.
    PointOutOfBounds { slot: usize, source_index: usize },

    /// A same-axis split below a node crosses that node's discriminator.
    CrossedDiscriminator { parent: usize, slot: usize },

    /// Number of leaves differs from the number of indexed points.
    LeafCountMismatch { expected: usize, found: usize },
}

/// The lon/lat region a subtree is allowed to occupy.
#[derive(Clone, Copy)]
struct Region {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
}

impl Region {
    fn everything() -> Self {
        Self {
            lat_min: f64::NEG_INFINITY,
            lat_max: f64::INFINITY,
            lon_min: f64::NEG_INFINITY,
            lon_max: f64::INFINITY,
        }
    }

    fn bounds(&self, on_latitude: bool) -> (f64, f64) {
        if on_latitude {
            (self.lat_min, self.lat_max)
        } else {
            (self.lon_min, self.lon_max)
        }
    }

    fn split(&self, on_latitude: bool, discriminator: f64) -> (Region, Region) {
        let (mut low, mut high) = (*self, *self);
        if on_latitude {
            low.lat_max = discriminator;
            high.lat_min = discriminator;
        } else {
            low.lon_max = discriminator;
            high.lon_min = discriminator;
        }
        (low, high)
    }
}

/// Walk the whole tree and report every broken invariant.
///
/// An empty result means every point sits on the correct side of every
/// split above it and every split has two children.
pub fn verify_tree(tree: &KdTree) -> Vec<TreeViolation> {
    if !tree.is_built() {
        return vec![TreeViolation::NotBuilt];
    }

    let mut violations = Vec::new();
    let leaves = verify_recurse(tree, 0, Region::everything(), &mut violations);
    if leaves != tree.len() {
        violations.push(TreeViolation::LeafCountMismatch {
            expected: tree.len(),
            found: leaves,
        });
    }
    violations
}

fn verify_recurse(
    tree: &KdTree,
    index: usize,
    region: Region,
    violations: &mut Vec<TreeViolation>,
) -> usize {
    match tree.slot(index) {
        None => 0,
        Some(TreeNode::Leaf(point)) => {
            let inside = point.latitude >= region.lat_min
                && point.latitude <= region.lat_max
                && point.longitude >= region.lon_min
                && point.longitude <= region.lon_max;
            if !inside {
                violations.push(TreeViolation::PointOutOfBounds {
                    slot: index,
                    source_index: point.source_index,
                });
            }
            1
        }
        Some(TreeNode::Split(node)) => {
            let (min, max) = region.bounds(node.splits_on_latitude);
            if node.discriminator < min || node.discriminator > max {
                violations.push(TreeViolation::CrossedDiscriminator {
                    parent: parent_of(index),
                    slot: index,
                });
            }

            let (low, high) = region.split(node.splits_on_latitude, node.discriminator);
            let mut leaves = 0;
            for (child, child_region) in [(low_child(index), low), (high_child(index), high)] {
                if tree.slot(child).is_none() {
                    violations.push(TreeViolation::MissingChild {
                        parent: index,
                        slot: child,
                    });
                    continue;
                }
                leaves += verify_recurse(tree, child, child_region, violations);
            }
            leaves
        }
    }
}

fn parent_of(index: usize) -> usize {
    index.saturating_sub(1) / 2
}
