//! # Curvelab Store Crate
//!
//! The curve store holds the shared document's curves and the active
//! selection, and enforces the store invariants: curve ids are unique, the
//! active id always names a stored curve, and user actions never leave the
//! store empty. All user-visible mutations flow through the reversible
//! command family in [`command`].

use curvelab_common::{
    evaluate, fresh_curve_id, parse_document, persist::document_to_json, CommonResult, Curve,
    CurveDocument, Point, TimeProvider, CURVE_PALETTE,
};

pub mod command;

pub use command::{CurveCommand, SerializedCommand};

/// Number of parameter steps sampled for hit testing.
const HIT_TEST_SAMPLES: usize = 50;

/// The set of curves under edit plus the active selection.
#[derive(Debug, Clone)]
pub struct CurveStore {
    pub(crate) curves: Vec<Curve>,
    pub(crate) active_id: Option<String>,
    next_color: usize,
}

impl CurveStore {
    /// Create a store seeded with a single empty curve in the first palette
    /// color, matching the state the engine starts from.
    pub fn new() -> Self {
        let mut store = Self::empty();
        store.add_curve();
        store
    }

    /// Create a store with no curves at all. Only used as the initial state
    /// for history replay; user-facing stores start via [`CurveStore::new`].
    pub fn empty() -> Self {
        Self {
            curves: Vec::new(),
            active_id: None,
            next_color: 0,
        }
    }

    /// Append a fresh empty curve with the next palette color and make it
    /// active. Returns the new curve's id.
    pub fn add_curve(&mut self) -> String {
        let color = self.next_palette_color();
        let curve = Curve::new(fresh_curve_id(), color);
        let id = curve.id.clone();
        self.curves.push(curve);
        self.active_id = Some(id.clone());
        id
    }

    /// Mint a curve with a fresh id and the next palette color without
    /// inserting it, for callers that append through an `AddCurve`
    /// command.
    pub fn allocate_curve(&mut self) -> Curve {
        let color = self.next_palette_color();
        Curve::new(fresh_curve_id(), color)
    }

    /// Remove a curve by id. If it was active, the first remaining curve
    /// becomes active; if none remain, a fresh empty curve is created.
    pub fn remove_curve(&mut self, id: &str) {
        self.curves.retain(|c| c.id != id);
        if self.curves.is_empty() {
            self.add_curve();
        } else if self.active_id.as_deref() == Some(id) {
            self.active_id = Some(self.curves[0].id.clone());
        }
    }

    /// Set the active curve. Unknown ids are ignored.
    pub fn set_active(&mut self, id: &str) {
        if self.curves.iter().any(|c| c.id == id) {
            self.active_id = Some(id.to_string());
        }
    }

    pub fn active_curve_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_curve(&self) -> Option<&Curve> {
        let id = self.active_id.as_deref()?;
        self.curves.iter().find(|c| c.id == id)
    }

    /// Control points of the active curve; empty when nothing is active.
    pub fn active_points(&self) -> Vec<Point> {
        self.active_curve().map(|c| c.points.clone()).unwrap_or_default()
    }

    /// Replace the active curve's control points.
    pub fn set_active_points(&mut self, points: Vec<Point>) {
        if let Some(id) = self.active_id.clone() {
            if let Some(curve) = self.curve_mut(&id) {
                curve.points = points;
            }
        }
    }

    /// Drop every curve and start over with one empty curve.
    pub fn clear_all(&mut self) {
        self.curves.clear();
        self.active_id = None;
        self.add_curve();
    }

    pub fn curves(&self) -> &[Curve] {
        &self.curves
    }

    pub fn curve(&self, id: &str) -> Option<&Curve> {
        self.curves.iter().find(|c| c.id == id)
    }

    pub(crate) fn curve_mut(&mut self, id: &str) -> Option<&mut Curve> {
        self.curves.iter_mut().find(|c| c.id == id)
    }

    /// Deep-copied snapshot of the stored curves.
    pub fn snapshot(&self) -> Vec<Curve> {
        self.curves.clone()
    }

    /// Find the first curve whose sampled evaluation comes within
    /// `threshold` of `position`.
    pub fn find_curve_at_position(&self, position: Point, threshold: f64) -> Option<&str> {
        for curve in &self.curves {
            for step in 0..=HIT_TEST_SAMPLES {
                let t = step as f64 / HIT_TEST_SAMPLES as f64;
                if let Some(sample) = evaluate(&curve.points, t) {
                    if sample.distance_to(&position) <= threshold {
                        return Some(&curve.id);
                    }
                }
            }
        }
        None
    }

    /// Serialize the store to the persisted JSON document shape.
    pub fn to_json(&self) -> CommonResult<String> {
        document_to_json(&CurveDocument {
            curves: self.curves.clone(),
            active_curve_id: self.active_id.clone(),
        })
    }

    /// Load the store from persisted JSON. On any validation failure the
    /// store is left unchanged.
    pub fn from_json(&mut self, json: &str, time: &dyn TimeProvider) -> CommonResult<()> {
        let document = parse_document(json, time)?;
        self.load_document(document);
        Ok(())
    }

    /// Replace the store contents with a parsed document, restoring the
    /// never-empty invariant if the document carried no curves.
    pub fn load_document(&mut self, document: CurveDocument) {
        self.curves = document.curves;
        self.active_id = document
            .active_curve_id
            .or_else(|| self.curves.first().map(|c| c.id.clone()));
        if self.curves.is_empty() {
            self.add_curve();
        }
    }

    /// Keep the active selection valid: prefer `id` if it is stored,
    /// otherwise fall back to the first curve.
    pub fn reconcile_active(&mut self, id: Option<&str>) {
        match id {
            Some(id) if self.curves.iter().any(|c| c.id == id) => {
                self.active_id = Some(id.to_string());
            }
            _ => {
                if self
                    .active_id
                    .as_deref()
                    .map(|a| !self.curves.iter().any(|c| c.id == a))
                    .unwrap_or(true)
                {
                    self.active_id = self.curves.first().map(|c| c.id.clone());
                }
            }
        }
    }

    fn next_palette_color(&mut self) -> String {
        let color = CURVE_PALETTE[self.next_color % CURVE_PALETTE.len()];
        self.next_color += 1;
        color.to_string()
    }
}

impl Default for CurveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curvelab_common::FixedTimeProvider;

    #[test]
    fn test_new_store_seeds_one_blue_curve() {
        let store = CurveStore::new();
        assert_eq!(store.curves().len(), 1);
        assert_eq!(store.curves()[0].color, CURVE_PALETTE[0]);
        assert!(store.curves()[0].points.is_empty());
        assert_eq!(store.active_curve_id(), Some(store.curves()[0].id.as_str()));
    }

    #[test]
    fn test_palette_cycles_in_order() {
        let mut store = CurveStore::new();
        for expected in CURVE_PALETTE.iter().cycle().skip(1).take(7) {
            let id = store.add_curve();
            assert_eq!(store.curve(&id).unwrap().color, *expected);
        }
    }

    #[test]
    fn test_add_curve_sets_active() {
        let mut store = CurveStore::new();
        let id = store.add_curve();
        assert_eq!(store.active_curve_id(), Some(id.as_str()));
    }

    #[test]
    fn test_remove_last_curve_recreates_one() {
        let mut store = CurveStore::new();
        let first = store.curves()[0].id.clone();
        store.remove_curve(&first);
        assert_eq!(store.curves().len(), 1);
        assert_ne!(store.curves()[0].id, first);
        // The replacement continues the palette cycle.
        assert_eq!(store.curves()[0].color, CURVE_PALETTE[1]);
        assert_eq!(store.active_curve_id(), Some(store.curves()[0].id.as_str()));
    }

    #[test]
    fn test_remove_active_falls_back_to_first() {
        let mut store = CurveStore::new();
        let first = store.curves()[0].id.clone();
        let second = store.add_curve();
        store.remove_curve(&second);
        assert_eq!(store.active_curve_id(), Some(first.as_str()));
    }

    #[test]
    fn test_set_active_ignores_unknown() {
        let mut store = CurveStore::new();
        let id = store.curves()[0].id.clone();
        store.set_active("nope");
        assert_eq!(store.active_curve_id(), Some(id.as_str()));
    }

    #[test]
    fn test_active_points_round_trip() {
        let mut store = CurveStore::new();
        store.set_active_points(vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        assert_eq!(store.active_points().len(), 2);
        assert_eq!(store.active_points()[1], Point::new(3.0, 4.0));
    }

    #[test]
    fn test_clear_all_keeps_one_curve() {
        let mut store = CurveStore::new();
        store.add_curve();
        store.add_curve();
        store.clear_all();
        assert_eq!(store.curves().len(), 1);
        assert!(store.curves()[0].points.is_empty());
    }

    #[test]
    fn test_find_curve_at_position() {
        let mut store = CurveStore::new();
        store.set_active_points(vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)]);
        let id = store.curves()[0].id.clone();
        assert_eq!(
            store.find_curve_at_position(Point::new(50.0, 3.0), 5.0),
            Some(id.as_str())
        );
        assert_eq!(store.find_curve_at_position(Point::new(50.0, 30.0), 5.0), None);
    }

    #[test]
    fn test_find_curve_single_point() {
        let mut store = CurveStore::new();
        store.set_active_points(vec![Point::new(10.0, 10.0)]);
        let id = store.curves()[0].id.clone();
        assert_eq!(
            store.find_curve_at_position(Point::new(11.0, 10.0), 2.0),
            Some(id.as_str())
        );
    }

    #[test]
    fn test_from_json_failure_leaves_store_unchanged() {
        let time = FixedTimeProvider::new(0);
        let mut store = CurveStore::new();
        store.set_active_points(vec![Point::new(1.0, 1.0)]);
        let before = store.snapshot();
        assert!(store.from_json("{\"curves\": 12}", &time).is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_json_round_trip() {
        let time = FixedTimeProvider::new(0);
        let mut store = CurveStore::new();
        store.set_active_points(vec![Point::new(1.0, 2.0)]);
        let json = store.to_json().unwrap();

        let mut other = CurveStore::new();
        other.from_json(&json, &time).unwrap();
        assert_eq!(other.snapshot(), store.snapshot());
        assert_eq!(other.active_curve_id(), store.active_curve_id());
    }

    #[test]
    fn test_reconcile_active_falls_back_to_first() {
        let mut store = CurveStore::new();
        let first = store.curves()[0].id.clone();
        store.reconcile_active(Some("gone"));
        assert_eq!(store.active_curve_id(), Some(first.as_str()));
    }
}
