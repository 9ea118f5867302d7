//! Node arena for the RRT* tree
//!
//! Nodes are stored in a `Vec` and addressed by `NodeId`. Links are indices,
//! nodes are never removed individually.

use ordered_float::OrderedFloat;

use crate::common::{distance, Edge, NodeId, PlannerError, PlannerResult, Point3};

const COST_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct Node {
    pub position: Point3,
    /// Accumulated path length from the root
    pub cost: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    fn root(position: Point3) -> Self {
        Node {
            position,
            cost: 0.0,
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(root: Point3) -> Self {
        Tree {
            nodes: vec![Node::root(root)],
        }
    }

    /// Node count, root included; never zero
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> PlannerResult<&Node> {
        self.nodes.get(id.0).ok_or(PlannerError::UnknownNode(id))
    }

    pub fn position(&self, id: NodeId) -> PlannerResult<Point3> {
        self.node(id).map(|n| n.position)
    }

    pub fn cost(&self, id: NodeId) -> PlannerResult<f64> {
        self.node(id).map(|n| n.cost)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Create a child of `parent`; cost is derived from the edge length
    pub fn insert(&mut self, parent: NodeId, position: Point3) -> PlannerResult<NodeId> {
        let parent_node = self.node(parent)?;
        let cost = parent_node.cost + distance(&parent_node.position, &position);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            position,
            cost,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Linear scan for the node closest to `point`
    pub fn nearest(&self, point: &Point3) -> NodeId {
        self.nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| OrderedFloat(distance(&n.position, point)))
            .map(|(i, _)| NodeId(i))
            .unwrap_or(NodeId(0))
    }

    /// All nodes strictly closer than `radius` to `point`
    pub fn within_radius(&self, point: &Point3, radius: f64) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| distance(&n.position, point) < radius)
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// True if `ancestor` lies on the parent chain of `node` (or is `node`)
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            if steps > self.nodes.len() {
                return false;
            }
            steps += 1;
            current = self.nodes.get(id.0).and_then(|n| n.parent);
        }
        false
    }

    /// Move `node` under `new_parent` and propagate the cost change to its subtree
    pub fn reparent(&mut self, node: NodeId, new_parent: NodeId) -> PlannerResult<()> {
        self.node(node)?;
        self.node(new_parent)?;
        if node == self.root() || self.is_ancestor(node, new_parent) {
            return Err(PlannerError::CycleDetected { node, new_parent });
        }

        if let Some(old_parent) = self.nodes[node.0].parent {
            let siblings = &mut self.nodes[old_parent.0].children;
            if let Some(pos) = siblings.iter().position(|&c| c == node) {
                siblings.swap_remove(pos);
            }
        }

        let new_cost = self.nodes[new_parent.0].cost
            + distance(&self.nodes[new_parent.0].position, &self.nodes[node.0].position);
        self.nodes[node.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.push(node);
        self.set_cost(node, new_cost);
        Ok(())
    }

    fn set_cost(&mut self, node: NodeId, cost: f64) {
        let delta = cost - self.nodes[node.0].cost;
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            self.nodes[id.0].cost += delta;
            stack.extend(self.nodes[id.0].children.iter().copied());
        }
        // Re-anchor the subtree root exactly to avoid drift
        self.nodes[node.0].cost = cost;
    }

    /// Positions from the root to `node`
    pub fn path_from_root(&self, node: NodeId) -> PlannerResult<Vec<NodeId>> {
        self.node(node)?;
        let mut chain = vec![node];
        let mut current = node;
        while let Some(parent) = self.nodes[current.0].parent {
            if chain.len() > self.nodes.len() {
                return Err(PlannerError::InvalidChain);
            }
            chain.push(parent);
            current = parent;
        }
        if current != self.root() {
            return Err(PlannerError::InvalidChain);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Parent-child edges; `active` marks edges whose child is in `highlighted`
    pub fn edges(&self, highlighted: &[NodeId]) -> Vec<Edge> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                n.parent.map(|p| Edge {
                    parent: self.nodes[p.0].position,
                    child: n.position,
                    active: highlighted.contains(&NodeId(i)) && highlighted.contains(&p),
                })
            })
            .collect()
    }

    /// Check the cost invariant and that every node reaches the root
    pub fn validate(&self) -> PlannerResult<()> {
        for (i, n) in self.nodes.iter().enumerate() {
            if let Some(p) = n.parent {
                let parent = self.node(p)?;
                let expected = parent.cost + distance(&parent.position, &n.position);
                if (expected - n.cost).abs() > COST_TOLERANCE * (1.0 + expected.abs()) {
                    return Err(PlannerError::InvalidParameter(format!(
                        "cost invariant violated at node {}: {} != {}",
                        i, n.cost, expected
                    )));
                }
                if !parent.children.contains(&NodeId(i)) {
                    return Err(PlannerError::InvalidChain);
                }
            }
            self.path_from_root(NodeId(i))?;
        }
        Ok(())
    }
}

/// Move from `from` toward `to` by at most `step`
pub fn steer(from: &Point3, to: &Point3, step: f64) -> Point3 {
    let delta = to - from;
    let dist = delta.norm();
    if dist <= step {
        *to
    } else {
        from + delta * (step / dist)
    }
}
