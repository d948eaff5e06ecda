//! Grid layout for the stage
//!
//! For `count` tiles every column count from 1 to `count` is tried, rows
//! follow as `ceil(count / cols)`, and the pair whose cell aspect ratio is
//! closest to the target wins. Closeness is `|ln(cell_aspect / target)|`
//! so a cell twice too wide and one twice too tall score the same.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Inputs of one layout computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutInput {
    pub count: usize,
    pub container_width: f64,
    pub container_height: f64,
}

impl LayoutInput {
    #[must_use]
    pub const fn new(count: usize, container_width: f64, container_height: f64) -> Self {
        Self {
            count,
            container_width,
            container_height,
        }
    }

    fn is_measured(&self) -> bool {
        self.container_width.is_finite()
            && self.container_height.is_finite()
            && self.container_width > 0.0
            && self.container_height > 0.0
    }
}

/// Grid geometry, `rows * cols >= count`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutGeometry {
    pub rows: usize,
    pub cols: usize,
    pub cell_width: f64,
    pub cell_height: f64,
}

impl LayoutGeometry {
    #[must_use]
    pub const fn cells(&self) -> usize {
        self.rows * self.cols
    }
}

/// Compute the best grid for `input`
///
/// Returns `None` for zero tiles; the caller renders nothing. An unmeasured
/// container (zero, negative or non-finite size) gets a single column with
/// empty cells until a real measurement arrives.
#[must_use]
pub fn compute_layout(input: LayoutInput, target_aspect_ratio: f64) -> Option<LayoutGeometry> {
    let count = input.count;
    if count == 0 {
        return None;
    }

    if !input.is_measured() {
        return Some(LayoutGeometry {
            rows: count,
            cols: 1,
            cell_width: 0.0,
            cell_height: 0.0,
        });
    }

    if count == 1 {
        return Some(LayoutGeometry {
            rows: 1,
            cols: 1,
            cell_width: input.container_width,
            cell_height: input.container_height,
        });
    }

    let target = if target_aspect_ratio.is_finite() && target_aspect_ratio > 0.0 {
        target_aspect_ratio
    } else {
        16.0 / 9.0
    };

    let mut best: Option<(f64, LayoutGeometry)> = None;
    for cols in 1..=count {
        let rows = count.div_ceil(cols);
        let cell_width = input.container_width / cols as f64;
        let cell_height = input.container_height / rows as f64;
        let deviation = ((cell_width / cell_height) / target).ln().abs();

        if best.as_ref().map_or(true, |(d, _)| deviation < *d) {
            best = Some((
                deviation,
                LayoutGeometry {
                    rows,
                    cols,
                    cell_width,
                    cell_height,
                },
            ));
        }
    }

    best.map(|(_, geometry)| geometry)
}

/// Memoizes `compute_layout` on `(count, width, height)`
#[derive(Debug)]
pub struct LayoutEngine {
    target_aspect_ratio: f64,
    cached: Option<(LayoutKey, Option<LayoutGeometry>)>,
    computations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayoutKey {
    count: usize,
    width_bits: u64,
    height_bits: u64,
}

impl From<LayoutInput> for LayoutKey {
    fn from(input: LayoutInput) -> Self {
        Self {
            count: input.count,
            width_bits: input.container_width.to_bits(),
            height_bits: input.container_height.to_bits(),
        }
    }
}

impl LayoutEngine {
    #[must_use]
    pub const fn new(target_aspect_ratio: f64) -> Self {
        Self {
            target_aspect_ratio,
            cached: None,
            computations: 0,
        }
    }

    /// Geometry for `input`, recomputed only when the key changed
    pub fn layout(&mut self, input: LayoutInput) -> Option<LayoutGeometry> {
        let key = LayoutKey::from(input);
        if let Some((cached_key, geometry)) = &self.cached {
            if *cached_key == key {
                return *geometry;
            }
        }

        let geometry = compute_layout(input, self.target_aspect_ratio);
        self.computations += 1;
        debug!(
            count = input.count,
            width = input.container_width,
            height = input.container_height,
            geometry = ?geometry,
            "Layout recomputed"
        );
        self.cached = Some((key, geometry));
        geometry
    }

    /// How many times the geometry was actually computed
    #[must_use]
    pub const fn computations(&self) -> u64 {
        self.computations
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDESCREEN: f64 = 16.0 / 9.0;

    fn layout(count: usize, width: f64, height: f64) -> Option<LayoutGeometry> {
        compute_layout(LayoutInput::new(count, width, height), WIDESCREEN)
    }

    #[test]
    fn test_zero_participants_has_no_geometry() {
        assert!(layout(0, 1280.0, 720.0).is_none());
    }

    #[test]
    fn test_single_participant_fills_container() {
        let geometry = layout(1, 1280.0, 720.0).unwrap();
        assert_eq!((geometry.rows, geometry.cols), (1, 1));
        assert_eq!(geometry.cell_width, 1280.0);
        assert_eq!(geometry.cell_height, 720.0);
    }

    #[test]
    fn test_unmeasured_container_defaults_to_single_column() {
        for (width, height) in [(0.0, 0.0), (-5.0, 300.0), (f64::NAN, 200.0), (640.0, 0.0)] {
            let geometry = layout(3, width, height).unwrap();
            assert_eq!((geometry.rows, geometry.cols), (3, 1));
        }
    }

    #[test]
    fn test_wide_container_prefers_columns() {
        let geometry = layout(4, 1920.0, 1080.0).unwrap();
        assert_eq!((geometry.rows, geometry.cols), (2, 2));

        let geometry = layout(2, 1920.0, 600.0).unwrap();
        assert_eq!((geometry.rows, geometry.cols), (1, 2));
    }

    #[test]
    fn test_tall_container_prefers_rows() {
        let geometry = layout(2, 400.0, 900.0).unwrap();
        assert_eq!((geometry.rows, geometry.cols), (2, 1));
    }

    #[test]
    fn test_grid_always_fits_everyone() {
        let viewports = [(1920.0, 1080.0), (375.0, 812.0), (1.0, 1.0), (3000.0, 200.0)];
        for count in 0..=40 {
            for (width, height) in viewports {
                match layout(count, width, height) {
                    None => assert_eq!(count, 0),
                    Some(geometry) => {
                        assert!(geometry.rows >= 1 && geometry.cols >= 1);
                        assert!(geometry.cells() >= count);
                    }
                }
            }
        }
    }

    #[test]
    fn test_layout_is_deterministic() {
        for count in 1..=16 {
            assert_eq!(layout(count, 1366.0, 768.0), layout(count, 1366.0, 768.0));
        }
    }

    #[test]
    fn test_engine_memoizes_on_inputs() {
        let mut engine = LayoutEngine::default();
        let input = LayoutInput::new(6, 1280.0, 720.0);

        let first = engine.layout(input);
        let second = engine.layout(input);
        assert_eq!(first, second);
        assert_eq!(engine.computations(), 1);

        engine.layout(LayoutInput::new(6, 1280.0, 800.0));
        assert_eq!(engine.computations(), 2);
    }
}
