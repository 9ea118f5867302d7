//! Goal-region bookkeeping and the published solution chain
//!
//! Members of the solution set are never removed during an episode; their
//! eligibility is re-checked against the goal every time the best node is
//! selected. The published chain is a root-to-node list of ids that the
//! coordinator walks from the sub-root.

use std::collections::HashSet;

use ordered_float::OrderedFloat;

use crate::common::{distance, NodeId, PlannerResult, Point3};
use crate::path_planning::tree::Tree;

const COST_EPSILON: f64 = 1e-9;

/// Result of merging a freshly extracted chain into the published one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First chain, or a true solution replacing a temporary one. Carries the
    /// new sub-root when the old one is not on the chain.
    Published { sub_root: Option<NodeId> },
    /// New suffix spliced in after the sub-root
    Spliced,
    /// Candidate matches the published chain
    Unchanged,
    /// Cheaper chain not containing the sub-root; sub-root re-targeted
    Replaced { sub_root: NodeId },
    /// Candidate was not cheaper, published chain kept
    Kept,
    /// Published chain no longer follows parent links and was rebuilt
    Recomputed { sub_root: Option<NodeId> },
    /// No goal-region node yet, chain ends at a nearby tree node
    Temporary,
}

#[derive(Debug, Clone, Default)]
pub struct SolutionTracker {
    members: Vec<NodeId>,
    member_set: HashSet<NodeId>,
    published: Vec<NodeId>,
    temporary: bool,
}

impl SolutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the solution set if it lies within `radius` of `goal`
    pub fn consider(&mut self, tree: &Tree, id: NodeId, goal: &Point3, radius: f64) -> PlannerResult<bool> {
        let position = tree.position(id)?;
        if distance(&position, goal) < radius && self.member_set.insert(id) {
            self.members.push(id);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn published(&self) -> &[NodeId] {
        &self.published
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn has_published(&self) -> bool {
        !self.published.is_empty()
    }

    /// Member with the shortest root-to-goal path, closest to the goal on ties
    pub fn best(&self, tree: &Tree, goal: &Point3, radius: f64) -> Option<NodeId> {
        self.members
            .iter()
            .filter_map(|&id| tree.node(id).ok().map(|n| (id, n)))
            .map(|(id, n)| (id, n.cost, distance(&n.position, goal)))
            .filter(|&(_, _, dist)| dist < radius)
            .min_by_key(|&(_, cost, dist)| (OrderedFloat(cost + dist), OrderedFloat(dist)))
            .map(|(id, _, _)| id)
    }

    /// Length of the best root-to-goal path, infinite when no member is
    /// eligible
    pub fn best_cost(&self, tree: &Tree, goal: &Point3, radius: f64) -> f64 {
        self.best(tree, goal, radius)
            .and_then(|id| solution_length(tree, id, goal).ok())
            .unwrap_or(f64::INFINITY)
    }

    /// Node of the published chain following `sub_root`
    pub fn next_after(&self, sub_root: NodeId) -> Option<NodeId> {
        let pos = self.published.iter().position(|&id| id == sub_root)?;
        self.published.get(pos + 1).copied()
    }

    /// Published nodes from `sub_root` onward still follow parent links
    pub fn is_consistent(&self, tree: &Tree, sub_root: NodeId) -> bool {
        let Some(pos) = self.published.iter().position(|&id| id == sub_root) else {
            return false;
        };
        self.published[pos..].windows(2).all(|pair| {
            tree.node(pair[1])
                .map(|n| n.parent == Some(pair[0]))
                .unwrap_or(false)
        })
    }

    /// `id` ends a published chain that reaches the goal
    pub fn is_chain_end(&self, id: NodeId) -> bool {
        !self.temporary && self.published.last() == Some(&id)
    }

    /// True if `id` is among the last `count` published nodes
    pub fn is_near_chain_end(&self, id: NodeId, count: usize) -> bool {
        let skip = self.published.len().saturating_sub(count);
        self.published[skip..].contains(&id)
    }

    /// Positions from the sub-root to the goal; the goal is appended only for
    /// a true solution
    pub fn chain_positions(&self, tree: &Tree, sub_root: NodeId, goal: &Point3) -> Vec<Point3> {
        let start = self
            .published
            .iter()
            .position(|&id| id == sub_root)
            .unwrap_or(0);
        let mut points: Vec<Point3> = self.published[start..]
            .iter()
            .filter_map(|&id| tree.position(id).ok())
            .collect();
        if !points.is_empty() && !self.temporary {
            points.push(*goal);
        }
        points
    }

    /// Descendant of the sub-root within `radius` with the highest cost,
    /// or the sub-root itself
    fn temporary_target(&self, tree: &Tree, sub_root: NodeId, radius: f64) -> PlannerResult<NodeId> {
        let origin = tree.position(sub_root)?;
        let target = tree
            .within_radius(&origin, radius)
            .into_iter()
            .filter(|&id| id != sub_root && tree.is_ancestor(sub_root, id))
            .filter_map(|id| tree.cost(id).ok().map(|c| (id, c)))
            .max_by_key(|&(_, cost)| OrderedFloat(cost))
            .map(|(id, _)| id)
            .unwrap_or(sub_root);
        Ok(target)
    }

    /// Episode-tick merge of the best candidate chain into the published one
    pub fn update(
        &mut self,
        tree: &Tree,
        sub_root: NodeId,
        goal: &Point3,
        goal_radius: f64,
        temporary_radius: f64,
    ) -> PlannerResult<MergeOutcome> {
        let Some(best) = self.best(tree, goal, goal_radius) else {
            let target = self.temporary_target(tree, sub_root, temporary_radius)?;
            self.published = tree.path_from_root(target)?;
            self.temporary = true;
            return Ok(MergeOutcome::Temporary);
        };

        let candidate = tree.path_from_root(best)?;
        if self.published.is_empty() || self.temporary {
            let retarget = if candidate.contains(&sub_root) {
                None
            } else {
                Some(Self::nearest_in(tree, &candidate, sub_root)?)
            };
            self.published = candidate;
            self.temporary = false;
            return Ok(MergeOutcome::Published { sub_root: retarget });
        }

        if !self.is_consistent(tree, sub_root) {
            let retarget = if candidate.contains(&sub_root) {
                None
            } else {
                Some(Self::nearest_in(tree, &candidate, sub_root)?)
            };
            self.published = candidate;
            return Ok(MergeOutcome::Recomputed { sub_root: retarget });
        }

        if let Some(cand_pos) = candidate.iter().position(|&id| id == sub_root) {
            let pub_pos = self
                .published
                .iter()
                .position(|&id| id == sub_root)
                .unwrap_or(0);
            let mut spliced = self.published[..=pub_pos].to_vec();
            spliced.extend_from_slice(&candidate[cand_pos + 1..]);
            if spliced == self.published {
                return Ok(MergeOutcome::Unchanged);
            }
            self.published = spliced;
            return Ok(MergeOutcome::Spliced);
        }

        let published_cost = match self.published.last() {
            Some(&last) => solution_length(tree, last, goal)?,
            None => f64::INFINITY,
        };
        let candidate_cost = solution_length(tree, best, goal)?;
        if candidate_cost < published_cost - COST_EPSILON {
            let retarget = Self::nearest_in(tree, &candidate, sub_root)?;
            self.published = candidate;
            Ok(MergeOutcome::Replaced { sub_root: retarget })
        } else {
            Ok(MergeOutcome::Kept)
        }
    }

    fn nearest_in(tree: &Tree, chain: &[NodeId], sub_root: NodeId) -> PlannerResult<NodeId> {
        let origin = tree.position(sub_root)?;
        Ok(chain
            .iter()
            .filter_map(|&id| tree.position(id).ok().map(|p| (id, distance(&p, &origin))))
            .min_by_key(|&(_, d)| OrderedFloat(d))
            .map(|(id, _)| id)
            .unwrap_or(sub_root))
    }

    /// Forget goal-region members after the goal moved; the next update
    /// republishes
    pub fn invalidate_goal(&mut self) {
        self.members.clear();
        self.member_set.clear();
        if !self.published.is_empty() {
            self.temporary = true;
        }
    }

    /// Drop the published chain so the next update starts from scratch
    pub fn clear_published(&mut self) {
        self.published.clear();
        self.temporary = false;
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.member_set.clear();
        self.clear_published();
    }
}

/// Root cost of `id` plus the final leg to the goal
fn solution_length(tree: &Tree, id: NodeId, goal: &Point3) -> PlannerResult<f64> {
    let node = tree.node(id)?;
    Ok(node.cost + distance(&node.position, goal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    #[test]
    fn test_consider_and_best() {
        let goal = p(4.0, 0.0, 0.0);
        let mut tree = Tree::new(p(0.0, 0.0, 0.0));
        let a = tree.insert(tree.root(), p(2.0, 0.0, 0.0)).unwrap();
        let b = tree.insert(a, p(3.5, 0.0, 0.0)).unwrap();
        let c = tree.insert(tree.root(), p(1.0, 2.0, 0.0)).unwrap();
        let d = tree.insert(c, p(3.0, 1.0, 0.0)).unwrap();

        let mut tracker = SolutionTracker::new();
        assert!(!tracker.consider(&tree, a, &goal, 1.5).unwrap());
        assert!(tracker.consider(&tree, b, &goal, 1.5).unwrap());
        assert!(tracker.consider(&tree, d, &goal, 1.5).unwrap());
        assert!(!tracker.consider(&tree, d, &goal, 1.5).unwrap());
        assert_eq!(tracker.members().len(), 2);
        assert_eq!(tracker.best(&tree, &goal, 1.5), Some(b));
        assert!((tracker.best_cost(&tree, &goal, 1.5) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_temporary_then_published() {
        let goal = p(10.0, 0.0, 0.0);
        let mut tree = Tree::new(p(0.0, 0.0, 0.0));
        let a = tree.insert(tree.root(), p(0.5, 0.0, 0.0)).unwrap();
        let b = tree.insert(a, p(1.0, 0.0, 0.0)).unwrap();
        let mut tracker = SolutionTracker::new();

        let outcome = tracker.update(&tree, tree.root(), &goal, 1.5, 2.0).unwrap();
        assert_eq!(outcome, MergeOutcome::Temporary);
        assert!(tracker.is_temporary());
        assert_eq!(tracker.published(), &[tree.root(), a, b]);
        // Temporary chains do not reach for the goal
        assert_eq!(tracker.chain_positions(&tree, tree.root(), &goal).len(), 3);

        let mut last = b;
        for i in 3..=19 {
            last = tree.insert(last, p(i as f64 * 0.5, 0.0, 0.0)).unwrap();
        }
        tracker.consider(&tree, last, &goal, 1.5).unwrap();
        let outcome = tracker.update(&tree, tree.root(), &goal, 1.5, 2.0).unwrap();
        assert_eq!(outcome, MergeOutcome::Published { sub_root: None });
        assert!(!tracker.is_temporary());
        assert!(tracker.is_chain_end(last));
        let chain = tracker.chain_positions(&tree, tree.root(), &goal);
        assert_eq!(chain.last(), Some(&goal));
    }

    #[test]
    fn test_temporary_without_descendants_is_sub_root() {
        let goal = p(10.0, 0.0, 0.0);
        let tree = Tree::new(p(0.0, 0.0, 0.0));
        let mut tracker = SolutionTracker::new();
        tracker.update(&tree, tree.root(), &goal, 1.5, 2.0).unwrap();
        assert_eq!(tracker.published(), &[tree.root()]);
    }

    #[test]
    fn test_splice_after_sub_root() {
        let goal = p(4.0, 0.0, 0.0);
        let mut tree = Tree::new(p(0.0, 0.0, 0.0));
        let a = tree.insert(tree.root(), p(1.0, 0.0, 0.0)).unwrap();
        let b = tree.insert(a, p(2.0, 1.0, 0.0)).unwrap();
        let c = tree.insert(b, p(3.5, 1.0, 0.0)).unwrap();
        let mut tracker = SolutionTracker::new();
        tracker.consider(&tree, c, &goal, 1.5).unwrap();
        assert_eq!(tracker.update(&tree, a, &goal, 1.5, 2.0).unwrap(), MergeOutcome::Published { sub_root: None });
        assert_eq!(tracker.update(&tree, a, &goal, 1.5, 2.0).unwrap(), MergeOutcome::Unchanged);

        // A cheaper branch from the sub-root
        let d = tree.insert(a, p(2.0, 0.0, 0.0)).unwrap();
        let e = tree.insert(d, p(3.2, 0.0, 0.0)).unwrap();
        tracker.consider(&tree, e, &goal, 1.5).unwrap();
        assert_eq!(tracker.update(&tree, a, &goal, 1.5, 2.0).unwrap(), MergeOutcome::Spliced);
        assert_eq!(tracker.published(), &[tree.root(), a, d, e]);
        assert_eq!(tracker.next_after(a), Some(d));
        assert!(tracker.is_near_chain_end(d, 3));
    }

    #[test]
    fn test_replace_only_when_cheaper() {
        let goal = p(4.0, 0.0, 0.0);
        let mut tree = Tree::new(p(0.0, 0.0, 0.0));
        let a = tree.insert(tree.root(), p(1.0, 1.0, 0.0)).unwrap();
        let b = tree.insert(a, p(3.0, 1.0, 0.0)).unwrap();
        let mut tracker = SolutionTracker::new();
        tracker.consider(&tree, b, &goal, 1.5).unwrap();
        tracker.update(&tree, a, &goal, 1.5, 2.0).unwrap();

        // Cheaper branch that bypasses the sub-root
        let c = tree.insert(tree.root(), p(1.0, 0.0, 0.0)).unwrap();
        let d = tree.insert(c, p(3.0, 0.0, 0.0)).unwrap();
        tracker.consider(&tree, d, &goal, 1.5).unwrap();
        let outcome = tracker.update(&tree, a, &goal, 1.5, 2.0).unwrap();
        assert_eq!(outcome, MergeOutcome::Replaced { sub_root: c });
        assert_eq!(tracker.published(), &[tree.root(), c, d]);

        // A more expensive member never displaces the published chain
        let e = tree.insert(a, p(3.0, 2.0, 0.0)).unwrap();
        tracker.consider(&tree, e, &goal, 2.5).unwrap();
        assert_eq!(tracker.update(&tree, c, &goal, 2.5, 2.0).unwrap(), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_inconsistent_chain_is_recomputed() {
        let goal = p(4.0, 0.0, 0.0);
        let mut tree = Tree::new(p(0.0, 0.0, 0.0));
        let a = tree.insert(tree.root(), p(1.0, 1.0, 0.0)).unwrap();
        let b = tree.insert(a, p(2.0, 1.0, 0.0)).unwrap();
        let c = tree.insert(b, p(3.0, 0.5, 0.0)).unwrap();
        let mut tracker = SolutionTracker::new();
        tracker.consider(&tree, c, &goal, 1.5).unwrap();
        tracker.update(&tree, b, &goal, 1.5, 2.0).unwrap();

        // Rewire pulls c off b
        let d = tree.insert(tree.root(), p(2.0, 0.0, 0.0)).unwrap();
        tree.reparent(c, d).unwrap();
        assert!(!tracker.is_consistent(&tree, b));
        let outcome = tracker.update(&tree, b, &goal, 1.5, 2.0).unwrap();
        assert!(matches!(outcome, MergeOutcome::Recomputed { sub_root: Some(_) }));
        assert_eq!(tracker.published(), &[tree.root(), d, c]);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_invalidate_goal_forces_republish() {
        let goal = p(2.0, 0.0, 0.0);
        let mut tree = Tree::new(p(0.0, 0.0, 0.0));
        let a = tree.insert(tree.root(), p(1.5, 0.0, 0.0)).unwrap();
        let mut tracker = SolutionTracker::new();
        tracker.consider(&tree, a, &goal, 1.0).unwrap();
        tracker.update(&tree, tree.root(), &goal, 1.0, 2.0).unwrap();
        tracker.invalidate_goal();
        assert!(tracker.members().is_empty());
        assert!(tracker.is_temporary());
        tracker.clear();
        assert!(!tracker.has_published());
    }
}
