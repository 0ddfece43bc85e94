//! Tracked-target state.

use crate::scene::{NodeId, SceneNode};
use crate::shapes::Uniform;
use serde::{Deserialize, Serialize};

/// Geometry of a node as last seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometrySnapshot {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub corner_radius: Uniform<f64>,
}

impl GeometrySnapshot {
    /// Snapshot from the absolute transform, or the local position when the
    /// transform is unavailable.
    pub fn from_node(node: &SceneNode) -> Self {
        let bounds = node.absolute_bounds().unwrap_or_else(|| node.local_bounds());
        Self {
            x: bounds.x0,
            y: bounds.y0,
            width: node.width,
            height: node.height,
            corner_radius: node.corner_radius,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedTarget {
    pub node: NodeId,
    pub last_observed: GeometrySnapshot,
}

/// At most one tracked glass element.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    tracked: Option<TrackedTarget>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> Option<&TrackedTarget> {
        self.tracked.as_ref()
    }

    pub fn tracked_node(&self) -> Option<NodeId> {
        self.tracked.map(|t| t.node)
    }

    pub fn is_tracking(&self, node: NodeId) -> bool {
        self.tracked_node() == Some(node)
    }

    /// Start tracking `node`, replacing any previous target.
    pub fn track(&mut self, node: NodeId, snapshot: GeometrySnapshot) {
        self.tracked = Some(TrackedTarget {
            node,
            last_observed: snapshot,
        });
    }

    pub fn clear(&mut self) {
        self.tracked = None;
    }

    /// Record a geometry observation for `node`.
    ///
    /// Returns true when `node` is the tracked target and its geometry
    /// differs from the last observation. Observations of other nodes are
    /// ignored.
    pub fn observe(&mut self, node: NodeId, snapshot: GeometrySnapshot) -> bool {
        match &mut self.tracked {
            Some(target) if target.node == node => {
                if target.last_observed == snapshot {
                    false
                } else {
                    target.last_observed = snapshot;
                    true
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(x: f64, radius: f64) -> GeometrySnapshot {
        GeometrySnapshot {
            x,
            y: 0.0,
            width: 100.0,
            height: 50.0,
            corner_radius: Uniform::Single(radius),
        }
    }

    #[test]
    fn test_observe_detects_changes_once() {
        let node = Uuid::new_v4();
        let mut state = SyncState::new();
        state.track(node, snapshot(0.0, 10.0));

        assert!(!state.observe(node, snapshot(0.0, 10.0)));
        assert!(state.observe(node, snapshot(5.0, 10.0)));
        assert!(!state.observe(node, snapshot(5.0, 10.0)));
        assert!(state.observe(node, snapshot(5.0, 12.0)));
        assert_eq!(state.tracked().unwrap().last_observed, snapshot(5.0, 12.0));
    }

    #[test]
    fn test_observe_ignores_other_nodes() {
        let mut state = SyncState::new();
        let tracked = Uuid::new_v4();
        assert!(!state.observe(tracked, snapshot(0.0, 0.0)));

        state.track(tracked, snapshot(0.0, 0.0));
        assert!(!state.observe(Uuid::new_v4(), snapshot(9.0, 0.0)));
        assert!(state.is_tracking(tracked));

        state.clear();
        assert!(state.tracked_node().is_none());
    }
}
