use super::GridError;
use nalgebra::{Point3, Vector3};

/// Integer voxel coordinates `[x, y, z]`.
pub type Voxel = [usize; 3];

const AXIS_OFFSETS: [[isize; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];

/// A fixed-resolution boolean voxel grid over an axis-aligned box.
///
/// Voxel `[i, j, k]` sits at `origin + resolution * (i, j, k)`. Real coordinates map to
/// the nearest voxel. The grid is allocated once and never resized.
#[derive(Debug, Clone)]
pub struct SpatialOccupancyGrid {
    origin: Point3<f64>,
    resolution: f64,
    dims: [usize; 3],
    cells: Vec<bool>,
}

impl SpatialOccupancyGrid {
    pub const DEFAULT_MARGIN: f64 = 5.0;
    pub const DEFAULT_RESOLUTION: f64 = 0.5;

    pub fn new(
        origin: Point3<f64>,
        extent: Vector3<f64>,
        resolution: f64,
    ) -> Result<Self, GridError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(GridError::InvalidResolution(resolution));
        }
        let mut dims = [0usize; 3];
        for (axis, name) in ['x', 'y', 'z'].into_iter().enumerate() {
            let size = extent[axis];
            if !(size.is_finite() && size > 0.0) {
                return Err(GridError::DegenerateExtent {
                    axis: name,
                    extent: size,
                });
            }
            dims[axis] = (size / resolution).ceil() as usize;
        }
        Ok(Self {
            origin,
            resolution,
            dims,
            cells: vec![false; dims[0] * dims[1] * dims[2]],
        })
    }

    /// A grid covering the box `[min, max]` padded by `margin` on every side.
    pub fn around(
        min: Point3<f64>,
        max: Point3<f64>,
        margin: f64,
        resolution: f64,
    ) -> Result<Self, GridError> {
        let pad = Vector3::repeat(margin);
        let origin = min - pad;
        let extent = (max + pad) - origin;
        Self::new(origin, extent, resolution)
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Nearest voxel to `point`, or `None` if it falls outside the grid.
    pub fn point_to_grid(&self, point: &Point3<f64>) -> Option<Voxel> {
        let mut voxel = [0usize; 3];
        for axis in 0..3 {
            let index = ((point[axis] - self.origin[axis]) / self.resolution).round();
            if !(index >= 0.0 && index < self.dims[axis] as f64) {
                return None;
            }
            voxel[axis] = index as usize;
        }
        Some(voxel)
    }

    pub fn grid_to_point(&self, voxel: Voxel) -> Point3<f64> {
        Point3::new(
            voxel[0] as f64 * self.resolution + self.origin.x,
            voxel[1] as f64 * self.resolution + self.origin.y,
            voxel[2] as f64 * self.resolution + self.origin.z,
        )
    }

    /// Whether `point` lies in marked space. Points outside the grid are never marked.
    pub fn is_marked(&self, point: &Point3<f64>) -> bool {
        self.point_to_grid(point)
            .is_some_and(|voxel| self.is_voxel_marked(voxel))
    }

    pub fn is_voxel_marked(&self, voxel: Voxel) -> bool {
        self.index(voxel).is_some_and(|i| self.cells[i])
    }

    pub fn marked_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Sets every voxel inside the sphere to `value`.
    ///
    /// The sphere is rasterized as a stack of YZ discs along x, each disc as a stack of
    /// z-chords along y, each chord filled as one contiguous voxel run.
    pub fn mark_sphere(&mut self, center: &Point3<f64>, radius: f64, value: bool) {
        for d in offsets_within(radius, self.resolution) {
            let disc = chord_radius(radius, d);
            self.mark_yz_disc(center.x + d, center.y, center.z, disc, value);
            if d != 0.0 {
                self.mark_yz_disc(center.x - d, center.y, center.z, disc, value);
            }
        }
    }

    fn mark_yz_disc(&mut self, x: f64, y: f64, z: f64, radius: f64, value: bool) {
        for d in offsets_within(radius, self.resolution) {
            let chord = chord_radius(radius, d);
            self.mark_z_chord(x, y + d, z, chord, value);
            if d != 0.0 {
                self.mark_z_chord(x, y - d, z, chord, value);
            }
        }
    }

    fn mark_z_chord(&mut self, x: f64, y: f64, z: f64, half_length: f64, value: bool) {
        let (Some(i), Some(j)) = (self.axis_index(x, 0), self.axis_index(y, 1)) else {
            return;
        };
        let last = self.dims[2] as f64 - 1.0;
        let start = ((z - half_length - self.origin.z) / self.resolution)
            .round()
            .max(0.0);
        let end = ((z + half_length - self.origin.z) / self.resolution)
            .round()
            .min(last);
        if start > end {
            return;
        }
        let base = (i * self.dims[1] + j) * self.dims[2];
        self.cells[base + start as usize..=base + end as usize].fill(value);
    }

    /// Dilates the marked region by `amount`: `ceil(amount / resolution)` rounds, each
    /// marking every unmarked axis-neighbour of a marked voxel.
    pub fn grow(&mut self, amount: f64) {
        for _ in 0..self.steps_for(amount) {
            let frontier: Vec<Voxel> = self
                .marked_voxels()
                .flat_map(|v| self.neighbors(v))
                .filter(|&n| !self.is_voxel_marked(n))
                .collect();
            if frontier.is_empty() {
                break;
            }
            self.set_all(&frontier, true);
        }
    }

    /// Erodes the marked region by `amount`, implemented as dilation of the complement.
    pub fn shrink(&mut self, amount: f64) {
        if self.steps_for(amount) == 0 {
            return;
        }
        self.invert();
        self.grow(amount);
        self.invert();
    }

    /// Rolls a probe sphere over the surface: every marked voxel with an unmarked
    /// neighbour has a probe-sized sphere cleared around it.
    pub fn scrape_probe(&mut self, probe_radius: f64) {
        let exposed: Vec<Voxel> = self
            .marked_voxels()
            .filter(|&v| self.is_exposed(v))
            .collect();
        for voxel in exposed {
            let center = self.grid_to_point(voxel);
            self.mark_sphere(&center, probe_radius, false);
        }
    }

    pub fn is_exposed(&self, voxel: Voxel) -> bool {
        self.neighbors(voxel).any(|n| !self.is_voxel_marked(n))
    }

    fn invert(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = !*c);
    }

    fn set_all(&mut self, voxels: &[Voxel], value: bool) {
        for &voxel in voxels {
            if let Some(i) = self.index(voxel) {
                self.cells[i] = value;
            }
        }
    }

    fn steps_for(&self, amount: f64) -> usize {
        if amount <= 0.0 || !amount.is_finite() {
            return 0;
        }
        (amount / self.resolution).ceil() as usize
    }

    fn axis_index(&self, coordinate: f64, axis: usize) -> Option<usize> {
        let index = ((coordinate - self.origin[axis]) / self.resolution).round();
        (index >= 0.0 && index < self.dims[axis] as f64).then_some(index as usize)
    }

    fn index(&self, [x, y, z]: Voxel) -> Option<usize> {
        (x < self.dims[0] && y < self.dims[1] && z < self.dims[2])
            .then(|| (x * self.dims[1] + y) * self.dims[2] + z)
    }

    fn marked_voxels(&self) -> impl Iterator<Item = Voxel> + '_ {
        let [_, ny, nz] = self.dims;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, marked)| **marked)
            .map(move |(i, _)| [i / (ny * nz), (i / nz) % ny, i % nz])
    }

    fn neighbors(&self, voxel: Voxel) -> impl Iterator<Item = Voxel> + '_ {
        AXIS_OFFSETS.iter().filter_map(move |offset| {
            let mut n = [0usize; 3];
            for axis in 0..3 {
                let value = voxel[axis].checked_add_signed(offset[axis])?;
                if value >= self.dims[axis] {
                    return None;
                }
                n[axis] = value;
            }
            Some(n)
        })
    }
}

/// Offsets `0, step, 2*step, ...` not exceeding `radius`.
fn offsets_within(radius: f64, step: f64) -> impl Iterator<Item = f64> {
    (0..)
        .map(move |k| k as f64 * step)
        .take_while(move |&d| d <= radius)
}

#[inline]
fn chord_radius(radius: f64, d: f64) -> f64 {
    if d > radius {
        return 0.0;
    }
    (radius * radius - d * d).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_grid(side: f64) -> SpatialOccupancyGrid {
        SpatialOccupancyGrid::new(Point3::origin(), Vector3::repeat(side), 0.5).unwrap()
    }

    #[test]
    fn dimensions_are_ceiling_of_extent_over_resolution() {
        let grid =
            SpatialOccupancyGrid::new(Point3::origin(), Vector3::new(10.0, 5.2, 1.0), 0.5)
                .unwrap();
        assert_eq!(grid.dims(), [20, 11, 2]);
    }

    #[test]
    fn construction_rejects_bad_inputs() {
        assert_eq!(
            SpatialOccupancyGrid::new(Point3::origin(), Vector3::repeat(1.0), 0.0).unwrap_err(),
            GridError::InvalidResolution(0.0)
        );
        assert!(matches!(
            SpatialOccupancyGrid::new(Point3::origin(), Vector3::new(1.0, 0.0, 1.0), 0.5),
            Err(GridError::DegenerateExtent { axis: 'y', .. })
        ));
    }

    #[test]
    fn around_pads_the_box_on_every_side() {
        let grid = SpatialOccupancyGrid::around(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 2.0),
            5.0,
            0.5,
        )
        .unwrap();
        assert_eq!(grid.origin(), Point3::new(-5.0, -5.0, -5.0));
        assert_eq!(grid.dims(), [24, 24, 24]);
    }

    #[test]
    fn grid_coordinates_round_trip() {
        let grid = SpatialOccupancyGrid::new(
            Point3::new(-3.25, 1.5, 7.0),
            Vector3::new(4.0, 3.0, 2.0),
            0.5,
        )
        .unwrap();
        let [nx, ny, nz] = grid.dims();
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let point = grid.grid_to_point([x, y, z]);
                    assert_eq!(grid.point_to_grid(&point), Some([x, y, z]));
                }
            }
        }
    }

    #[test]
    fn out_of_range_points_are_unmarked_not_errors() {
        let mut grid = cube_grid(4.0);
        grid.mark_sphere(&Point3::new(2.0, 2.0, 2.0), 10.0, true);
        assert!(!grid.is_marked(&Point3::new(-50.0, 2.0, 2.0)));
        assert!(!grid.is_marked(&Point3::new(2.0, 2.0, 400.0)));
        assert_eq!(grid.point_to_grid(&Point3::new(2.0, -1.0, 2.0)), None);
    }

    #[test]
    fn sphere_marks_center_and_leaves_far_points_unmarked() {
        let mut grid = cube_grid(10.0);
        let center = Point3::new(5.0, 5.0, 5.0);
        let radius = 2.0;
        grid.mark_sphere(&center, radius, true);

        assert!(grid.is_marked(&center));
        let beyond = radius + grid.resolution() + 0.01;
        let directions = [
            Vector3::x(),
            -Vector3::x(),
            Vector3::y(),
            -Vector3::y(),
            Vector3::z(),
            -Vector3::z(),
            Vector3::new(1.0, 1.0, 1.0).normalize(),
            Vector3::new(-1.0, 1.0, -1.0).normalize(),
        ];
        for direction in directions {
            assert!(!grid.is_marked(&(center + direction * beyond)));
            assert!(grid.is_marked(&(center + direction * (radius * 0.5))));
        }
    }

    #[test]
    fn sphere_with_false_value_clears_voxels() {
        let mut grid = cube_grid(10.0);
        let center = Point3::new(5.0, 5.0, 5.0);
        grid.mark_sphere(&center, 3.0, true);
        let before = grid.marked_count();
        grid.mark_sphere(&center, 1.0, false);
        assert!(!grid.is_marked(&center));
        assert!(grid.marked_count() < before);
    }

    #[test]
    fn sphere_partially_outside_grid_marks_the_inside_part() {
        let mut grid = cube_grid(4.0);
        grid.mark_sphere(&Point3::new(0.0, 0.0, 0.0), 1.0, true);
        assert!(grid.is_marked(&Point3::new(0.0, 0.0, 0.0)));
        assert!(grid.is_marked(&Point3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn grow_by_one_resolution_marks_every_axis_neighbour() {
        let mut grid = cube_grid(5.0);
        let seeds = [[4usize, 4, 4], [6, 5, 4]];
        for seed in seeds {
            let point = grid.grid_to_point(seed);
            grid.mark_sphere(&point, 0.0, true);
        }
        assert_eq!(grid.marked_count(), 2);

        grid.grow(grid.resolution());

        for seed in seeds {
            assert!(grid.is_voxel_marked(seed));
            for n in grid.neighbors(seed).collect::<Vec<_>>() {
                assert!(grid.is_voxel_marked(n), "neighbour {:?} of {:?}", n, seed);
            }
        }
        assert!(!grid.is_voxel_marked([4, 4, 6]));
        assert!(!grid.is_voxel_marked([5, 5, 5]));
    }

    #[test]
    fn grow_zero_is_a_no_op() {
        let mut grid = cube_grid(5.0);
        grid.mark_sphere(&Point3::new(2.5, 2.5, 2.5), 1.0, true);
        let before = grid.cells.clone();
        grid.grow(0.0);
        assert_eq!(grid.cells, before);
        grid.shrink(0.0);
        assert_eq!(grid.cells, before);
    }

    #[test]
    fn grow_never_writes_outside_the_grid() {
        let mut grid = cube_grid(1.0);
        grid.mark_sphere(&Point3::new(0.0, 0.0, 0.0), 0.0, true);
        grid.grow(5.0);
        assert_eq!(grid.marked_count(), 8);
    }

    #[test]
    fn shrink_erodes_exposed_voxels() {
        let mut grid = cube_grid(5.0);
        for x in 3..6 {
            for y in 3..6 {
                for z in 3..6 {
                    grid.set_all(&[[x, y, z]], true);
                }
            }
        }
        assert_eq!(grid.marked_count(), 27);

        grid.shrink(grid.resolution());

        assert_eq!(grid.marked_count(), 1);
        assert!(grid.is_voxel_marked([4, 4, 4]));
    }

    #[test]
    fn scrape_probe_removes_surface_layer() {
        let mut grid = cube_grid(10.0);
        let center = Point3::new(5.0, 5.0, 5.0);
        grid.mark_sphere(&center, 3.0, true);
        let before = grid.marked_count();

        grid.scrape_probe(0.5);

        assert!(grid.marked_count() < before);
        assert!(grid.is_marked(&center));
        assert!(!grid.is_marked(&(center + Vector3::x() * 3.0)));
    }
}
