//! Bezier curve evaluation.
//!
//! Curve mathematics is an external collaborator to the editing engine: the
//! engine only needs a pure `evaluate` function for hit testing and smoke
//! tests. Evaluation uses de Casteljau's algorithm, which is numerically
//! stable for arbitrary degree.

use crate::Point;

/// Evaluate a bezier curve at parameter `t` using de Casteljau's algorithm.
///
/// `t` is clamped to `[0, 1]`. Returns `None` for an empty control polygon.
/// A single control point evaluates to itself for every `t`.
pub fn evaluate(control_points: &[Point], t: f64) -> Option<Point> {
    if control_points.is_empty() {
        return None;
    }
    let t = t.clamp(0.0, 1.0);

    let mut working: Vec<Point> = control_points.to_vec();
    let mut len = working.len();
    while len > 1 {
        for i in 0..len - 1 {
            working[i] = Point::new(
                working[i].x + t * (working[i + 1].x - working[i].x),
                working[i].y + t * (working[i + 1].y - working[i].y),
            );
        }
        len -= 1;
    }
    Some(working[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_empty_is_none() {
        assert_eq!(evaluate(&[], 0.5), None);
    }

    #[test]
    fn test_evaluate_single_point_is_constant() {
        let p = Point::new(7.0, -3.0);
        for t in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(evaluate(&[p], t), Some(p));
        }
    }

    #[test]
    fn test_evaluate_endpoints() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 20.0),
            Point::new(30.0, 5.0),
        ];
        assert_eq!(evaluate(&pts, 0.0), Some(pts[0]));
        assert_eq!(evaluate(&pts, 1.0), Some(pts[2]));
    }

    #[test]
    fn test_evaluate_linear_midpoint() {
        let pts = [Point::new(0.0, 0.0), Point::new(10.0, 20.0)];
        let mid = evaluate(&pts, 0.5).unwrap();
        assert_eq!(mid, Point::new(5.0, 10.0));
    }

    #[test]
    fn test_evaluate_clamps_parameter() {
        let pts = [Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        assert_eq!(evaluate(&pts, -1.0), Some(pts[0]));
        assert_eq!(evaluate(&pts, 2.0), Some(pts[1]));
    }
}
