//! Axis-aligned obstacles carved out of the navmesh

use std::collections::BTreeMap;

use tilenav_common::Aabb;

/// World-space box that blocks walking
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Obstacle {
    pub id: u32,
    pub bounds: Aabb,
}

/// Live obstacles keyed by id
///
/// Ids start at 1 and increase with every added obstacle.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleManager {
    obstacles: BTreeMap<u32, Obstacle>,
    next_id: u32,
}

impl Default for ObstacleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObstacleManager {
    pub fn new() -> Self {
        Self {
            obstacles: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Restores a manager from stored obstacles.
    ///
    /// Returns `None` when ids repeat or reach `next_id`.
    pub fn from_parts(obstacles: Vec<Obstacle>, next_id: u32) -> Option<Self> {
        if next_id == 0 {
            return None;
        }
        let mut map = BTreeMap::new();
        for obstacle in obstacles {
            if obstacle.id == 0 || obstacle.id >= next_id {
                return None;
            }
            if map.insert(obstacle.id, obstacle).is_some() {
                return None;
            }
        }
        Some(Self {
            obstacles: map,
            next_id,
        })
    }

    /// Stores a new obstacle and returns its id
    pub fn add(&mut self, bounds: Aabb) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.obstacles.insert(id, Obstacle { id, bounds });
        id
    }

    pub fn remove(&mut self, id: u32) -> Option<Obstacle> {
        self.obstacles.remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Obstacle> {
        self.obstacles.get(&id)
    }

    /// Obstacles in id order
    pub fn iter(&self) -> impl Iterator<Item = &Obstacle> + '_ {
        self.obstacles.values()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Id the next added obstacle receives
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Bounds of every obstacle overlapping `area` on the xz plane, in id order
    pub fn overlapping(&self, area: &Aabb) -> Vec<Aabb> {
        self.obstacles
            .values()
            .filter(|o| o.bounds.intersects_xz(area))
            .map(|o| o.bounds)
            .collect()
    }
}
