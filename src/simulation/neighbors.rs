//! Spatial neighbor index.
//!
//! Every node keeps a list of `(distance, neighbor)` pairs covering all other
//! nodes, sorted by distance and then by node id. Range queries walk the list
//! from the front and stop at the first neighbor outside the requested range,
//! so a reachability check costs O(k) for k reachable neighbors.
//!
//! Moving (or adding) a node updates every other list in place and rebuilds the
//! moving node's own list, so no list is ever partially stale.

use std::cmp::Ordering;

use super::geometry::{Point, distance};
use super::types::NodeId;
use crate::error::{SimError, SimResult};

/// One entry of a neighbor distance list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f64,
    pub id: NodeId,
}

impl Neighbor {
    fn order(&self, other: &Neighbor) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeighborIndex {
    positions: Vec<Point>,
    lists: Vec<Vec<Neighbor>>,
}

impl NeighborIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, id: NodeId) -> Option<Point> {
        self.positions.get(id as usize).copied()
    }

    /// Register node `id` at `position`, or move it there if it already exists.
    ///
    /// New nodes must be added with the next dense id.
    ///
    /// # Parameters
    ///
    /// * `id` - Node to add or move
    /// * `position` - New position, must be finite
    ///
    /// # Returns
    ///
    /// `Err` for a non-finite position or an id that would leave a gap.
    pub fn add_or_move(&mut self, id: NodeId, position: Point) -> SimResult<()> {
        if !position.is_finite() {
            return Err(SimError::InvalidPosition { node: id, x: position.x, y: position.y });
        }
        let idx = id as usize;
        match idx.cmp(&self.positions.len()) {
            Ordering::Less => self.positions[idx] = position,
            Ordering::Equal => {
                self.positions.push(position);
                self.lists.push(Vec::new());
            }
            Ordering::Greater => return Err(SimError::UnknownNode(id)),
        }

        for (other, list) in self.lists.iter_mut().enumerate() {
            if other == idx {
                continue;
            }
            if let Some(stale) = list.iter().position(|n| n.id == id) {
                list.remove(stale);
            }
            let entry = Neighbor { distance: distance(&self.positions[other], &position), id };
            let at = list.partition_point(|n| n.order(&entry) == Ordering::Less);
            list.insert(at, entry);
        }

        let mut own: Vec<Neighbor> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != idx)
            .map(|(other, p)| Neighbor { distance: distance(&position, p), id: other as NodeId })
            .collect();
        own.sort_by(Neighbor::order);
        self.lists[idx] = own;
        Ok(())
    }

    /// Full distance list of `id`, nearest first. Empty for unknown ids.
    pub fn neighbors(&self, id: NodeId) -> &[Neighbor] {
        self.lists.get(id as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Neighbors of `id` no farther than `range`, nearest first.
    pub fn within(&self, id: NodeId, range: f64) -> impl Iterator<Item = &Neighbor> {
        self.neighbors(id).iter().take_while(move |n| n.distance <= range)
    }
}
