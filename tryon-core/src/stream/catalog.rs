//! Built-in list of selectable try-on targets.
//!
//! The catalog is read-only. Identifiers are forwarded to the remote
//! service as-is and never validated against it.

use crate::stream::types::{Calibration, FrameOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Glasses,
    Hat,
}

impl TargetKind {
    /// Value sent as `product_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Glasses => "glasses",
            TargetKind::Hat => "hat",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One selectable target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: TargetKind,
    pub category: &'static str,
    /// Physical frame size, when known.
    pub calibration: Option<CalibrationMm>,
}

/// Millimetre dimensions in a `const`-friendly form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationMm {
    pub frame_width: f32,
    pub frame_height: f32,
    pub lens_width: f32,
    pub lens_height: f32,
    pub bridge_width: f32,
    pub temple_length: f32,
}

impl From<CalibrationMm> for Calibration {
    fn from(mm: CalibrationMm) -> Self {
        Calibration {
            frame_width_mm: Some(mm.frame_width),
            frame_height_mm: Some(mm.frame_height),
            lens_width_mm: Some(mm.lens_width),
            lens_height_mm: Some(mm.lens_height),
            bridge_width_mm: Some(mm.bridge_width),
            temple_length_mm: Some(mm.temple_length),
        }
    }
}

pub const TARGETS: &[Target] = &[
    Target {
        id: "product_1",
        name: "Classic Aviator",
        kind: TargetKind::Glasses,
        category: "Glasses",
        calibration: Some(CalibrationMm {
            frame_width: 145.0,
            frame_height: 55.0,
            lens_width: 62.0,
            lens_height: 42.0,
            bridge_width: 20.0,
            temple_length: 145.0,
        }),
    },
    Target {
        id: "product_2",
        name: "Raider Sunglasses",
        kind: TargetKind::Glasses,
        category: "Glasses",
        calibration: None,
    },
    Target {
        id: "product_3",
        name: "Winter Sport Glasses",
        kind: TargetKind::Glasses,
        category: "Glasses",
        calibration: None,
    },
    Target {
        id: "product_4",
        name: "Polo Hat",
        kind: TargetKind::Hat,
        category: "Hats",
        calibration: None,
    },
];

/// Look up a target by its stable id.
pub fn find(id: &str) -> Option<&'static Target> {
    TARGETS.iter().find(|t| t.id == id)
}

/// All targets in `category` (case-insensitive).
pub fn by_category(category: &str) -> impl Iterator<Item = &'static Target> + '_ {
    TARGETS
        .iter()
        .filter(move |t| t.category.eq_ignore_ascii_case(category))
}

impl FrameOptions {
    /// Options selecting `target`. Calibration is attached only when
    /// measurements are requested.
    pub fn for_target(target: &Target, show_measurements: bool) -> Self {
        FrameOptions {
            product_type: target.kind.as_str().to_string(),
            product_id: target.id.to_string(),
            show_measurements,
            calibration: if show_measurements {
                target.calibration.map(Calibration::from)
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        for (i, a) in TARGETS.iter().enumerate() {
            assert!(TARGETS[i + 1..].iter().all(|b| b.id != a.id));
        }
    }

    #[test]
    fn lookup_and_filter() {
        assert_eq!(find("product_4").unwrap().kind, TargetKind::Hat);
        assert!(find("product_99").is_none());
        assert_eq!(by_category("glasses").count(), 3);
        assert_eq!(by_category("Hats").count(), 1);
    }

    #[test]
    fn options_for_target() {
        let aviator = find("product_1").unwrap();
        let plain = FrameOptions::for_target(aviator, false);
        assert_eq!(plain.product_type, "glasses");
        assert_eq!(plain.product_id, "product_1");
        assert!(plain.calibration.is_none());

        let measured = FrameOptions::for_target(aviator, true);
        assert_eq!(
            measured.calibration.unwrap().frame_width_mm,
            Some(145.0)
        );

        let hat = FrameOptions::for_target(find("product_4").unwrap(), true);
        assert_eq!(hat.product_type, "hat");
        assert!(hat.calibration.is_none());
    }
}
