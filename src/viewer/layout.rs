//! Placement of models within one scene.

use super::scene::Aabb;

/// Where to put the `index`-th of `count` models
pub trait LayoutStrategy: Send + Sync {
    fn place(&self, index: usize, count: usize, bounds: Option<&Aabb>) -> [f32; 3];
}

/// Rows of `columns` cells, `spacing` apart, centred on the origin along x
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub spacing: f32,
    pub columns: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            spacing: 2.5,
            columns: 3,
        }
    }
}

impl LayoutStrategy for GridLayout {
    fn place(&self, index: usize, count: usize, bounds: Option<&Aabb>) -> [f32; 3] {
        let columns = self.columns.max(1);
        let used = count.clamp(1, columns);
        let row = index / columns;
        let col = index % columns;

        let x = (col as f32 - (used - 1) as f32 / 2.0) * self.spacing;
        let z = row as f32 * self.spacing;

        // Centre each model in its cell
        let center = bounds.map(Aabb::center).unwrap_or([0.0; 3]);
        [x - center[0], -center[1], z - center[2]]
    }
}

/// Moves a model's centre to the origin
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CenteredLayout;

impl LayoutStrategy for CenteredLayout {
    fn place(&self, _index: usize, _count: usize, bounds: Option<&Aabb>) -> [f32; 3] {
        let center = bounds.map(Aabb::center).unwrap_or([0.0; 3]);
        [-center[0], -center[1], -center[2]]
    }
}

/// Bounding sphere a camera should keep in view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    pub center: [f32; 3],
    pub radius: f32,
}

impl Framing {
    pub fn of(bounds: &Aabb) -> Self {
        Self {
            center: bounds.center(),
            radius: bounds.radius(),
        }
    }

    /// Distance at which the sphere fills a vertical field of view
    pub fn camera_distance(&self, fov_y_radians: f32) -> f32 {
        let half = (fov_y_radians / 2.0).sin();
        if half <= f32::EPSILON {
            return self.radius;
        }
        self.radius / half
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_rows_and_columns() {
        let grid = GridLayout {
            spacing: 2.0,
            columns: 2,
        };
        assert_eq!(grid.place(0, 3, None), [-1.0, 0.0, 0.0]);
        assert_eq!(grid.place(1, 3, None), [1.0, 0.0, 0.0]);
        assert_eq!(grid.place(2, 3, None), [-1.0, 0.0, 2.0]);

        // A single model sits on the origin
        assert_eq!(grid.place(0, 1, None), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_grid_positions_do_not_overlap() {
        let grid = GridLayout::default();
        let offsets: Vec<[f32; 3]> = (0..7).map(|i| grid.place(i, 7, None)).collect();
        for (i, a) in offsets.iter().enumerate() {
            for b in &offsets[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_centered_layout_and_framing() {
        let bounds = Aabb {
            min: [0.0, 0.0, 0.0],
            max: [2.0, 4.0, 0.0],
        };
        assert_eq!(CenteredLayout.place(0, 1, Some(&bounds)), [-1.0, -2.0, 0.0]);

        let framing = Framing::of(&bounds.translated([-1.0, -2.0, 0.0]));
        assert_eq!(framing.center, [0.0, 0.0, 0.0]);
        assert!((framing.radius - 5.0f32.sqrt()).abs() < 1e-5);
        assert!(framing.camera_distance(std::f32::consts::FRAC_PI_2) > framing.radius);
    }
}
