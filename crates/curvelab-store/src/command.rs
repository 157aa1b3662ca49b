//! The closed family of reversible commands over the curve store.
//!
//! Commands hold value copies of the points and curves they touch, taken at
//! construction, so later mutation of the originals cannot alter undo
//! behavior. Deserialization pattern-matches on the `kind` tag; the reserved
//! `ChangeCurveColor` kind is accepted but yields no command.

use curvelab_common::{color_name, Curve, Point};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::CurveStore;

/// A reversible mutation of the curve store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum CurveCommand {
    /// Append a point to a curve; undo pops it.
    AddPoint {
        #[serde(rename = "curveId")]
        curve_id: String,
        point: Point,
    },
    /// Remove the point at `index`; undo re-inserts the removed value.
    RemovePoint {
        #[serde(rename = "curveId")]
        curve_id: String,
        index: usize,
        point: Point,
    },
    /// Overwrite the point at `index`; undo restores the old value.
    MovePoint {
        #[serde(rename = "curveId")]
        curve_id: String,
        index: usize,
        #[serde(rename = "oldPoint")]
        old_point: Point,
        #[serde(rename = "newPoint")]
        new_point: Point,
    },
    /// Append a new curve. The curve is always added with empty points;
    /// only the id and color of the argument are used.
    AddCurve { curve: Curve },
    /// Splice a curve out; undo re-inserts the original at `index`.
    RemoveCurve { curve: Curve, index: usize },
    /// Atomically replace the whole curve sequence; undo restores the
    /// previous sequence and active selection.
    LoadCurves {
        #[serde(rename = "newCurves")]
        new_curves: Vec<Curve>,
        #[serde(rename = "oldCurves")]
        old_curves: Vec<Curve>,
        #[serde(rename = "oldActiveCurveId")]
        old_active_curve_id: Option<String>,
    },
    /// Replace the curve sequence with a remotely merged state. Never
    /// entered into the local history tree, and therefore not undoable.
    RemoteOverwrite {
        #[serde(rename = "newCurves")]
        new_curves: Vec<Curve>,
    },
}

impl CurveCommand {
    /// Apply the command to the store. Commands whose target curve has
    /// disappeared are silent no-ops; they still enter history for shape
    /// symmetry.
    pub fn execute(&self, store: &mut CurveStore) {
        match self {
            CurveCommand::AddPoint { curve_id, point } => {
                match store.curve_mut(curve_id) {
                    Some(curve) => curve.points.push(*point),
                    None => debug!("add point: curve {curve_id} is gone"),
                }
            }
            CurveCommand::RemovePoint {
                curve_id, index, ..
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    if *index < curve.points.len() {
                        curve.points.remove(*index);
                    }
                }
            }
            CurveCommand::MovePoint {
                curve_id,
                index,
                new_point,
                ..
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    if let Some(slot) = curve.points.get_mut(*index) {
                        *slot = *new_point;
                    }
                }
            }
            CurveCommand::AddCurve { curve } => {
                store
                    .curves
                    .push(Curve::new(curve.id.clone(), curve.color.clone()));
            }
            CurveCommand::RemoveCurve { curve, .. } => {
                store.curves.retain(|c| c.id != curve.id);
            }
            CurveCommand::LoadCurves { new_curves, .. } => {
                store.curves = new_curves.clone();
                store.active_id = new_curves.first().map(|c| c.id.clone());
            }
            CurveCommand::RemoteOverwrite { new_curves } => {
                store.curves = new_curves.clone();
                let active = store.active_id.clone();
                store.reconcile_active(active.as_deref());
            }
        }
    }

    /// Reverse the command.
    ///
    /// # Panics
    ///
    /// Panics for [`CurveCommand::RemoteOverwrite`]: remote overwrites are
    /// never stored in the history tree, so undoing one is a programming
    /// error.
    pub fn undo(&self, store: &mut CurveStore) {
        match self {
            CurveCommand::AddPoint { curve_id, .. } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    curve.points.pop();
                }
            }
            CurveCommand::RemovePoint {
                curve_id,
                index,
                point,
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    let at = (*index).min(curve.points.len());
                    curve.points.insert(at, *point);
                }
            }
            CurveCommand::MovePoint {
                curve_id,
                index,
                old_point,
                ..
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    if let Some(slot) = curve.points.get_mut(*index) {
                        *slot = *old_point;
                    }
                }
            }
            CurveCommand::AddCurve { curve } => {
                store.curves.retain(|c| c.id != curve.id);
            }
            CurveCommand::RemoveCurve { curve, index } => {
                let at = (*index).min(store.curves.len());
                store.curves.insert(at, curve.clone());
            }
            CurveCommand::LoadCurves {
                old_curves,
                old_active_curve_id,
                ..
            } => {
                store.curves = old_curves.clone();
                store.active_id = old_active_curve_id.clone();
            }
            CurveCommand::RemoteOverwrite { .. } => {
                panic!("remote overwrite commands are never undoable");
            }
        }
    }

    /// The curve the coordinator should make active after this command is
    /// executed, undone into, or redone.
    pub fn affected_curve_id(&self) -> Option<&str> {
        match self {
            CurveCommand::AddPoint { curve_id, .. }
            | CurveCommand::RemovePoint { curve_id, .. }
            | CurveCommand::MovePoint { curve_id, .. } => Some(curve_id),
            CurveCommand::AddCurve { curve } | CurveCommand::RemoveCurve { curve, .. } => {
                Some(&curve.id)
            }
            CurveCommand::LoadCurves { new_curves, .. }
            | CurveCommand::RemoteOverwrite { new_curves } => {
                new_curves.first().map(|c| c.id.as_str())
            }
        }
    }

    /// Human-readable description, naming the target curve by its palette
    /// color.
    pub fn description(&self, store: &CurveStore) -> String {
        let curve_color = |id: &str| {
            store
                .curve(id)
                .map(|c| color_name(&c.color))
                .unwrap_or("unknown")
        };
        match self {
            CurveCommand::AddPoint { curve_id, .. } => {
                format!("Add point to {} curve", curve_color(curve_id))
            }
            CurveCommand::RemovePoint { curve_id, .. } => {
                format!("Remove point from {} curve", curve_color(curve_id))
            }
            CurveCommand::MovePoint { curve_id, .. } => {
                format!("Move point on {} curve", curve_color(curve_id))
            }
            CurveCommand::AddCurve { curve } => {
                format!("Add {} curve", color_name(&curve.color))
            }
            CurveCommand::RemoveCurve { curve, .. } => {
                format!("Remove {} curve", color_name(&curve.color))
            }
            CurveCommand::LoadCurves { new_curves, .. } => {
                format!("Load {} curves", new_curves.len())
            }
            CurveCommand::RemoteOverwrite { .. } => "Apply remote update".to_string(),
        }
    }

    /// Serialize into the `{kind, payload}` form stored in the shared
    /// history tree.
    pub fn serialize(&self) -> SerializedCommand {
        let value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        SerializedCommand {
            kind: value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or_default()
                .to_string(),
            payload: value.get("payload").cloned().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// The `{kind, payload}` wire form of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedCommand {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl SerializedCommand {
    /// Deserialize back into the closed command family. Returns `None` for
    /// the reserved `ChangeCurveColor` kind and for anything malformed.
    pub fn deserialize(&self) -> Option<CurveCommand> {
        if self.kind == "ChangeCurveColor" {
            return None;
        }
        let value = serde_json::json!({ "kind": self.kind, "payload": self.payload });
        match serde_json::from_value(value) {
            Ok(command) => Some(command),
            Err(e) => {
                debug!("discarding unparseable {} command: {e}", self.kind);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curvelab_common::CURVE_PALETTE;

    fn store_with_points(points: Vec<Point>) -> (CurveStore, String) {
        let mut store = CurveStore::new();
        store.set_active_points(points);
        let id = store.curves()[0].id.clone();
        (store, id)
    }

    fn assert_round_trips(command: &CurveCommand, store: &CurveStore) {
        let mut scratch = store.clone();
        command.execute(&mut scratch);
        command.undo(&mut scratch);
        assert_eq!(scratch.snapshot(), store.snapshot());
        assert_eq!(scratch.active_curve_id(), store.active_curve_id());
    }

    #[test]
    fn test_add_point_execute_and_undo() {
        let (mut store, id) = store_with_points(vec![Point::new(1.0, 1.0)]);
        let command = CurveCommand::AddPoint {
            curve_id: id.clone(),
            point: Point::new(2.0, 2.0),
        };
        assert_round_trips(&command, &store);

        command.execute(&mut store);
        assert_eq!(store.curve(&id).unwrap().points.len(), 2);
    }

    #[test]
    fn test_add_point_missing_curve_is_noop() {
        let (store, _) = store_with_points(vec![]);
        let command = CurveCommand::AddPoint {
            curve_id: "gone".to_string(),
            point: Point::new(2.0, 2.0),
        };
        let mut scratch = store.clone();
        command.execute(&mut scratch);
        assert_eq!(scratch.snapshot(), store.snapshot());
    }

    #[test]
    fn test_remove_point_round_trip() {
        let (store, id) = store_with_points(vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
        let command = CurveCommand::RemovePoint {
            curve_id: id,
            index: 0,
            point: Point::new(1.0, 1.0),
        };
        assert_round_trips(&command, &store);
    }

    #[test]
    fn test_move_point_round_trip() {
        let (store, id) = store_with_points(vec![Point::new(1.0, 1.0)]);
        let command = CurveCommand::MovePoint {
            curve_id: id,
            index: 0,
            old_point: Point::new(1.0, 1.0),
            new_point: Point::new(9.0, 9.0),
        };
        assert_round_trips(&command, &store);
    }

    #[test]
    fn test_add_curve_strips_points() {
        let (mut store, _) = store_with_points(vec![]);
        let mut incoming = Curve::new("curve-x".to_string(), CURVE_PALETTE[1].to_string());
        incoming.points.push(Point::new(5.0, 5.0));
        let command = CurveCommand::AddCurve { curve: incoming };
        assert_round_trips(&command, &store);

        command.execute(&mut store);
        let added = store.curve("curve-x").unwrap();
        assert!(added.points.is_empty());
    }

    #[test]
    fn test_remove_curve_round_trip() {
        let mut store = CurveStore::new();
        store.set_active_points(vec![Point::new(1.0, 1.0)]);
        let removed = store.curves()[0].clone();
        let command = CurveCommand::RemoveCurve {
            curve: removed,
            index: 0,
        };
        store.add_curve();
        assert_round_trips(&command, &store);
    }

    #[test]
    fn test_load_curves_round_trip_restores_active() {
        let (store, _) = store_with_points(vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
        let replacement = Curve {
            id: "curve-new".to_string(),
            color: CURVE_PALETTE[1].to_string(),
            points: vec![Point::new(100.0, 200.0), Point::new(300.0, 400.0)],
        };
        let command = CurveCommand::LoadCurves {
            new_curves: vec![replacement],
            old_curves: store.snapshot(),
            old_active_curve_id: store.active_curve_id().map(String::from),
        };
        assert_round_trips(&command, &store);

        let mut scratch = store.clone();
        command.execute(&mut scratch);
        assert_eq!(scratch.active_curve_id(), Some("curve-new"));
    }

    #[test]
    fn test_remote_overwrite_reconciles_active() {
        let (mut store, _) = store_with_points(vec![Point::new(1.0, 1.0)]);
        let replacement = Curve::new("curve-remote".to_string(), CURVE_PALETTE[2].to_string());
        CurveCommand::RemoteOverwrite {
            new_curves: vec![replacement],
        }
        .execute(&mut store);
        assert_eq!(store.active_curve_id(), Some("curve-remote"));
    }

    #[test]
    #[should_panic(expected = "never undoable")]
    fn test_remote_overwrite_undo_panics() {
        let mut store = CurveStore::new();
        CurveCommand::RemoteOverwrite { new_curves: vec![] }.undo(&mut store);
    }

    #[test]
    fn test_affected_curve_ids() {
        let curve = Curve::new("curve-a".to_string(), CURVE_PALETTE[0].to_string());
        assert_eq!(
            CurveCommand::AddPoint {
                curve_id: "curve-a".to_string(),
                point: Point::new(0.0, 0.0)
            }
            .affected_curve_id(),
            Some("curve-a")
        );
        assert_eq!(
            CurveCommand::AddCurve {
                curve: curve.clone()
            }
            .affected_curve_id(),
            Some("curve-a")
        );
        assert_eq!(
            CurveCommand::LoadCurves {
                new_curves: vec![curve],
                old_curves: vec![],
                old_active_curve_id: None,
            }
            .affected_curve_id(),
            Some("curve-a")
        );
        assert_eq!(
            CurveCommand::RemoteOverwrite { new_curves: vec![] }.affected_curve_id(),
            None
        );
    }

    #[test]
    fn test_descriptions_name_the_color() {
        let (store, id) = store_with_points(vec![]);
        let command = CurveCommand::AddPoint {
            curve_id: id,
            point: Point::new(0.0, 0.0),
        };
        assert_eq!(command.description(&store), "Add point to blue curve");

        let unknown = CurveCommand::AddPoint {
            curve_id: "gone".to_string(),
            point: Point::new(0.0, 0.0),
        };
        assert_eq!(unknown.description(&store), "Add point to unknown curve");
    }

    #[test]
    fn test_serialize_deserialize_every_kind() {
        let curve = Curve {
            id: "curve-a".to_string(),
            color: CURVE_PALETTE[0].to_string(),
            points: vec![Point::new(1.0, 2.0)],
        };
        let commands = vec![
            CurveCommand::AddPoint {
                curve_id: "curve-a".to_string(),
                point: Point::new(1.0, 2.0),
            },
            CurveCommand::RemovePoint {
                curve_id: "curve-a".to_string(),
                index: 1,
                point: Point::new(3.0, 4.0),
            },
            CurveCommand::MovePoint {
                curve_id: "curve-a".to_string(),
                index: 0,
                old_point: Point::new(1.0, 2.0),
                new_point: Point::new(5.0, 6.0),
            },
            CurveCommand::AddCurve {
                curve: curve.clone(),
            },
            CurveCommand::RemoveCurve {
                curve: curve.clone(),
                index: 2,
            },
            CurveCommand::LoadCurves {
                new_curves: vec![curve.clone()],
                old_curves: vec![],
                old_active_curve_id: Some("curve-b".to_string()),
            },
            CurveCommand::RemoteOverwrite {
                new_curves: vec![curve],
            },
        ];
        for command in commands {
            let serialized = command.serialize();
            assert!(!serialized.kind.is_empty());
            assert_eq!(serialized.deserialize(), Some(command));
        }
    }

    #[test]
    fn test_deserialize_change_curve_color_is_none() {
        let serialized = SerializedCommand {
            kind: "ChangeCurveColor".to_string(),
            payload: serde_json::json!({ "curveId": "curve-a", "color": "#000000" }),
        };
        assert_eq!(serialized.deserialize(), None);
    }

    #[test]
    fn test_deserialize_garbage_is_none() {
        let serialized = SerializedCommand {
            kind: "AddPoint".to_string(),
            payload: serde_json::json!({ "nope": true }),
        };
        assert_eq!(serialized.deserialize(), None);
    }
}
