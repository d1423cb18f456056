// initial particle layouts
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SpawnLayout {
    /// Row-major grid with a fixed spacing, centred in the simulation box.
    Grid { spacing: f32 },
    /// Rows and columns stretched over a rectangle, matching its aspect ratio.
    Region { centre: Vec2, size: Vec2 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnSettings {
    pub layout: SpawnLayout,
    /// Maximum random offset per axis, zero keeps the layout exact.
    pub jitter: f32,
    pub seed: u64,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            layout: SpawnLayout::Grid { spacing: 0.1 },
            jitter: 0.0,
            seed: 0,
        }
    }
}

impl SpawnSettings {
    pub fn positions(&self, count: usize, bounds_size: Vec2) -> Vec<Vec2> {
        let mut positions = match self.layout {
            SpawnLayout::Grid { spacing } => grid_layout(count, spacing, bounds_size * 0.5),
            SpawnLayout::Region { centre, size } => region_layout(count, centre, size),
        };

        if self.jitter > 0.0 {
            let mut rng = StdRng::seed_from_u64(self.seed);
            for p in &mut positions {
                *p += Vec2::new(
                    rng.random_range(-self.jitter..=self.jitter),
                    rng.random_range(-self.jitter..=self.jitter),
                );
            }
        }
        positions
    }
}

/// `count` positions on a square-ish grid, row by row from the bottom, centred on `centre`.
pub fn grid_layout(count: usize, spacing: f32, centre: Vec2) -> Vec<Vec2> {
    if count == 0 {
        return Vec::new();
    }
    let n_x = (count as f32).sqrt().ceil() as usize;
    let n_y = count.div_ceil(n_x);
    let extent = Vec2::new((n_x - 1) as f32, (n_y - 1) as f32) * spacing;
    let origin = centre - extent * 0.5;

    (0..count)
        .map(|i| {
            let ix = i % n_x;
            let iy = i / n_x;
            origin + Vec2::new(ix as f32, iy as f32) * spacing
        })
        .collect()
}

/// Spreads `count` positions over a `size` rectangle around `centre`, picking the column
/// count so the spacing comes out roughly equal on both axes.
pub fn region_layout(count: usize, centre: Vec2, size: Vec2) -> Vec<Vec2> {
    if count == 0 {
        return Vec::new();
    }
    let (w, h) = (size.x, size.y.max(f32::EPSILON));
    let n = count as f32;
    let n_x = ((w / h * n + (w - h) * (w - h) / (4.0 * h * h)).sqrt() - (w - h) / (2.0 * h))
        .ceil()
        .max(1.0) as usize;
    let n_y = count.div_ceil(n_x);

    let mut positions = Vec::with_capacity(count);
    'rows: for y in 0..n_y {
        for x in 0..n_x {
            if positions.len() >= count {
                break 'rows;
            }
            let tx = if n_x <= 1 { 0.5 } else { x as f32 / (n_x - 1) as f32 };
            let ty = if n_y <= 1 { 0.5 } else { y as f32 / (n_y - 1) as f32 };
            positions.push(Vec2::new((tx - 0.5) * size.x, (ty - 0.5) * size.y) + centre);
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_row_major_and_centred() {
        let p = grid_layout(9, 0.5, Vec2::new(4.0, 2.0));
        assert_eq!(p.len(), 9);
        assert_eq!(p[0], Vec2::new(3.5, 1.5));
        assert_eq!(p[1], Vec2::new(4.0, 1.5)); // next column
        assert_eq!(p[3], Vec2::new(3.5, 2.0)); // next row
        assert_eq!(p[4], Vec2::new(4.0, 2.0)); // middle particle on the centre
    }

    #[test]
    fn grid_handles_partial_last_row() {
        let p = grid_layout(10, 1.0, Vec2::ZERO);
        assert_eq!(p.len(), 10);
        // 4 columns, 3 rows
        assert_eq!(p[0], Vec2::new(-1.5, -1.0));
        assert_eq!(p[9], Vec2::new(-0.5, 1.0));
    }

    #[test]
    fn region_fills_its_rectangle() {
        let centre = Vec2::new(5.0, 3.0);
        let size = Vec2::new(4.0, 2.0);
        let p = region_layout(200, centre, size);
        assert_eq!(p.len(), 200);
        let min = centre - size * 0.5 - Vec2::splat(1e-4);
        let max = centre + size * 0.5 + Vec2::splat(1e-4);
        assert!(p.iter().all(|q| q.cmpge(min).all() && q.cmple(max).all()));
        assert_eq!(p[0], centre - size * 0.5);
    }

    #[test]
    fn jitter_is_seeded() {
        let settings = SpawnSettings { jitter: 0.01, seed: 7, ..Default::default() };
        let a = settings.positions(50, Vec2::new(10.0, 10.0));
        let b = settings.positions(50, Vec2::new(10.0, 10.0));
        assert_eq!(a, b);
        let exact = grid_layout(50, 0.1, Vec2::new(5.0, 5.0));
        assert!(a.iter().zip(&exact).all(|(j, e)| (*j - *e).abs().max_element() <= 0.01));
        assert_ne!(a, exact);
    }
}
