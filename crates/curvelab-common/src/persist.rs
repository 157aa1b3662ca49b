//! JSON persistence format for curve documents.
//!
//! Two shapes are accepted: the current multi-curve document and the legacy
//! single-curve shape (`{"points": [...]}`). Validation failures reject the
//! whole load with a specific reason so callers can leave their state
//! untouched.

use serde::{Deserialize, Serialize};

use crate::{color_name, CommonError, CommonResult, Curve, Point, TimeProvider, CURVE_PALETTE};

/// Plain-value form of a persisted curve document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveDocument {
    pub curves: Vec<Curve>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_curve_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    points: Vec<Point>,
}

/// Parse a persisted document, accepting both the current and the legacy
/// shape. The legacy shape produces a fresh curve stamped with the load
/// time and the default palette color.
pub fn parse_document(json: &str, time: &dyn TimeProvider) -> CommonResult<CurveDocument> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| CommonError::InvalidDocument(format!("not valid JSON: {e}")))?;

    let document = if value.get("curves").is_some() {
        serde_json::from_value::<CurveDocument>(value)
            .map_err(|e| CommonError::InvalidDocument(format!("bad document shape: {e}")))?
    } else if value.get("points").is_some() {
        log::debug!("loading legacy single-curve document");
        let legacy = serde_json::from_value::<LegacyDocument>(value)
            .map_err(|e| CommonError::InvalidDocument(format!("bad legacy shape: {e}")))?;
        let curve = Curve {
            id: format!("curve-{}", time.unix_millis()),
            color: CURVE_PALETTE[0].to_string(),
            points: legacy.points,
        };
        CurveDocument {
            active_curve_id: Some(curve.id.clone()),
            curves: vec![curve],
        }
    } else {
        return Err(CommonError::InvalidDocument(
            "expected a \"curves\" or \"points\" field".to_string(),
        ));
    };

    validate_document(&document)?;
    Ok(document)
}

/// Serialize a document to its current persisted shape.
pub fn document_to_json(document: &CurveDocument) -> CommonResult<String> {
    serde_json::to_string(document).map_err(|e| CommonError::Serialization(e.to_string()))
}

fn validate_document(document: &CurveDocument) -> CommonResult<()> {
    let mut seen = std::collections::HashSet::new();
    for curve in &document.curves {
        if curve.id.is_empty() {
            return Err(CommonError::InvalidDocument("empty curve id".to_string()));
        }
        if !seen.insert(curve.id.as_str()) {
            return Err(CommonError::InvalidDocument(format!(
                "duplicate curve id {}",
                curve.id
            )));
        }
        for point in &curve.points {
            if !point.is_finite() {
                return Err(CommonError::InvalidDocument(format!(
                    "non-finite coordinate in {} curve {}",
                    color_name(&curve.color),
                    curve.id
                )));
            }
        }
    }
    if let Some(active) = &document.active_curve_id {
        if !document.curves.iter().any(|c| &c.id == active) {
            return Err(CommonError::InvalidDocument(format!(
                "active curve {active} not present"
            )));
        }
    }
    Ok(())
}
