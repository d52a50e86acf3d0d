//! Planning logic for the aggregate packing run.
//!
//! Turns the size/fraction distribution into concrete instance counts and a
//! spawn grid. Every count is anchored on the class with the largest
//! nominal volume:
//!
//! ```text
//! total_volume = largest.volume / largest.max_volume_friction
//! count_i      = round(max_volume_friction_i * total_volume / volume_i)
//! ```
//!
//! so smaller classes automatically receive proportionally more instances.

use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{AggregateClass, Container, ellipsoid_volume};

/// Number of grid cells per axis.
///
/// `x` and `z` span one horizontal layer, `y` is the number of layers the
/// container can ever hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Grid {
    pub x: usize,
    pub z: usize,
    pub y: usize,
}

impl Grid {
    pub const fn new(x: usize, z: usize, y: usize) -> Self {
        Self { x, z, y }
    }

    /// Cells per horizontal layer.
    #[inline]
    pub fn layer_size(&self) -> usize {
        self.x * self.z
    }

    /// A grid without a single cell cannot receive any instance.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.z == 0 || self.y == 0
    }
}

/// Cursor into the spawn grid, advanced x first, then z, then y.
///
/// Terminal once `y == grid.y`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct GridCursor {
    pub x: usize,
    pub z: usize,
    pub y: usize,
}

impl GridCursor {
    pub const fn new(x: usize, z: usize, y: usize) -> Self {
        Self { x, z, y }
    }

    /// No cell is left once the cursor reached the top layer.
    #[inline]
    pub fn is_full(&self, grid: &Grid) -> bool {
        grid.is_empty() || self.y >= grid.y
    }

    /// Moves to the next cell; a full cursor stays where it is.
    pub fn advance(&mut self, grid: &Grid) {
        if self.is_full(grid) {
            return;
        }

        if self.x + 1 < grid.x {
            self.x += 1;
        } else if self.z + 1 < grid.z {
            self.x = 0;
            self.z += 1;
        } else {
            self.x = 0;
            self.z = 0;
            self.y = (self.y + 1).min(grid.y);
        }
    }
}

/// Result of planning: classes with derived fields plus the spawn grid.
///
/// Immutable once built; the controller and sequencer only read from it.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingPlan {
    classes: Vec<AggregateClass>,
    container: Container,
    grid: Grid,
    /// Largest semi-axis over all classes; the edge length of a grid cell.
    max_dimension: f64,
    /// Implied total fill volume anchored on the largest class.
    total_volume: Option<f64>,
    /// Sum of all defined counts, for diagnostics only.
    total_count: usize,
    /// Ids of classes whose volume or count could not be derived.
    excluded: Vec<String>,
}

impl PackingPlan {
    pub fn classes(&self) -> &[AggregateClass] {
        &self.classes
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn max_dimension(&self) -> f64 {
        self.max_dimension
    }

    pub fn total_volume(&self) -> Option<f64> {
        self.total_volume
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }
}

/// Derives volumes, counts and the spawn grid.
///
/// # Parameters
/// * `classes` - The input distribution, in input order
/// * `container` - The container the run packs into
///
/// # Returns
/// A `PackingPlan`. Degenerate input (no class with a positive volume) is not
/// an error: counts simply stay undefined.
pub fn plan(classes: Vec<AggregateClass>, container: Container) -> PackingPlan {
    let mut classes = classes;
    for class in &mut classes {
        class.volume = ellipsoid_volume(class.a, class.b, class.c);
    }

    let total_volume = largest_class(&classes).and_then(|largest| {
        let volume = largest.volume?;
        let total = volume / largest.max_volume_friction;
        (total.is_finite() && total > 0.0).then_some(total)
    });

    if let Some(total_volume) = total_volume {
        for class in &mut classes {
            class.count = class.volume.and_then(|volume| {
                let count = (class.max_volume_friction * total_volume / volume).round();
                (count.is_finite() && count >= 0.0).then_some(count as usize)
            });
        }
    }

    let excluded: Vec<String> = classes
        .iter()
        .filter(|class| class.count.is_none())
        .map(|class| class.id.clone())
        .collect();
    if !excluded.is_empty() {
        log::warn!(
            "⚠️ {} aggregate classes excluded from count derivation: {}",
            excluded.len(),
            excluded.join(", ")
        );
    }

    let max_dimension = max_dimension(&classes);
    let grid = grid_for(&container, max_dimension);
    let total_count = classes.iter().filter_map(|class| class.count).sum();

    log::info!(
        "📐 Plan: {} instances over {} classes, grid {}×{}×{} (cell {:.3})",
        total_count,
        classes.len(),
        grid.x,
        grid.z,
        grid.y,
        max_dimension
    );

    PackingPlan {
        classes,
        container,
        grid,
        max_dimension,
        total_volume,
        total_count,
        excluded,
    }
}

/// The class with the largest positive volume; the first one wins a tie.
fn largest_class(classes: &[AggregateClass]) -> Option<&AggregateClass> {
    classes.iter().fold(None, |largest, class| {
        let Some(volume) = class.volume else {
            return largest;
        };
        match largest {
            Some(current) if current.volume.unwrap_or(0.0) >= volume => Some(current),
            _ => Some(class),
        }
    })
}

/// Largest finite semi-axis over all classes, `0.0` if there is none.
fn max_dimension(classes: &[AggregateClass]) -> f64 {
    classes
        .iter()
        .flat_map(|class| [class.a, class.b, class.c])
        .filter(|value| value.is_finite() && *value > 0.0)
        .fold(0.0, f64::max)
}

/// Cells per axis for a cell edge of `max_dimension`.
///
/// The edge is a semi-axis, so an instance can be up to twice as wide as its
/// cell. Neighbours (and the outer cells against the walls) may overlap at
/// spawn; this is intended and the physics step pushes them apart.
fn grid_for(container: &Container, max_dimension: f64) -> Grid {
    if max_dimension <= 0.0 {
        return Grid::default();
    }
    let dims = container.dims;
    Grid::new(
        (dims.width / max_dimension).floor() as usize,
        (dims.depth / max_dimension).floor() as usize,
        (dims.height / max_dimension).ceil() as usize,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    fn container(w: f64, h: f64, d: f64) -> Container {
        Container::new(Dimensions::new(w, h, d)).unwrap()
    }

    #[test]
    fn single_unit_class() {
        let classes = vec![AggregateClass::new("A", (1.0, 1.0, 1.0), 0.5, 10)];
        let plan = plan(classes, container(10.0, 10.0, 10.0));

        let class = &plan.classes()[0];
        assert!((class.volume().unwrap() - 4.19).abs() < 0.01);
        assert_eq!(class.count(), Some(1));
        assert_eq!(plan.total_count(), 1);
        assert_eq!(plan.grid(), Grid::new(10, 10, 10));
        assert!((plan.total_volume().unwrap() - 8.3776).abs() < 1e-3);
    }

    #[test]
    fn smaller_classes_get_more_instances() {
        let classes = vec![
            AggregateClass::new("small", (1.0, 1.0, 1.0), 0.2, 10),
            AggregateClass::new("large", (2.0, 2.0, 2.0), 0.4, 10),
        ];
        let plan = plan(classes, container(20.0, 20.0, 20.0));

        // total = V(2) / 0.4 = 8·V(1) / 0.4 = 20·V(1); small count = 0.2·20 = 4
        assert_eq!(plan.classes()[0].count(), Some(4));
        assert_eq!(plan.classes()[1].count(), Some(1));
        assert_eq!(plan.total_count(), 5);
    }

    #[test]
    fn counts_match_shared_total_volume() {
        let classes = vec![
            AggregateClass::new("A", (3.0, 2.0, 1.5), 0.35, 12),
            AggregateClass::new("B", (1.2, 0.8, 0.7), 0.25, 12),
            AggregateClass::new("C", (0.5, 0.4, 0.3), 0.15, 12),
            AggregateClass::new("D", (0.2, 0.2, 0.1), 0.05, 12),
        ];
        let plan = plan(classes, container(100.0, 100.0, 100.0));

        let total_volume = plan.total_volume().unwrap();
        let fraction_sum: f64 = plan.classes().iter().map(|c| c.max_volume_friction).sum();
        let realized: f64 = plan
            .classes()
            .iter()
            .map(|c| c.count().unwrap() as f64 * c.volume().unwrap())
            .sum();
        let tolerance: f64 = plan
            .classes()
            .iter()
            .map(|c| 0.5 * c.volume().unwrap())
            .sum();

        assert!((realized - total_volume * fraction_sum).abs() <= tolerance + 1e-9);
    }

    #[test]
    fn equal_volumes_anchor_on_first_class() {
        let classes = vec![
            AggregateClass::new("first", (1.0, 2.0, 3.0), 0.5, 10),
            AggregateClass::new("second", (3.0, 2.0, 1.0), 0.25, 10),
        ];
        let plan = plan(classes, container(30.0, 30.0, 30.0));

        // Anchored on "first": total = 2·V; "second" gets round(0.25·2) = 1 (0.5 rounds away).
        let total = plan.total_volume().unwrap();
        let volume = plan.classes()[0].volume().unwrap();
        assert!((total - 2.0 * volume).abs() < 1e-9);
        assert_eq!(plan.classes()[0].count(), Some(1));
        assert_eq!(plan.classes()[1].count(), Some(1));
    }

    #[test]
    fn invalid_classes_are_excluded() {
        let classes = vec![
            AggregateClass::new("broken", (f64::NAN, 1.0, 1.0), 0.5, 10),
            AggregateClass::new("ok", (1.0, 1.0, 1.0), 0.5, 10),
        ];
        let plan = plan(classes, container(10.0, 10.0, 10.0));

        assert_eq!(plan.classes()[0].volume(), None);
        assert_eq!(plan.classes()[0].count(), None);
        assert_eq!(plan.classes()[1].count(), Some(1));
        assert_eq!(plan.excluded(), &["broken".to_string()]);
    }

    #[test]
    fn no_positive_volume_is_a_no_op() {
        let classes = vec![AggregateClass::new("zero", (0.0, 1.0, 1.0), 0.5, 10)];
        let plan = plan(classes, container(10.0, 10.0, 10.0));

        assert_eq!(plan.total_volume(), None);
        assert_eq!(plan.classes()[0].count(), None);
        assert_eq!(plan.total_count(), 0);
    }

    #[test]
    fn grid_uses_largest_semi_axis() {
        let classes = vec![
            AggregateClass::new("A", (2.5, 1.0, 1.0), 0.5, 10),
            AggregateClass::new("B", (1.0, 1.0, 1.0), 0.5, 10),
        ];
        let plan = plan(classes, container(10.0, 11.0, 12.0));

        assert!((plan.max_dimension() - 2.5).abs() < 1e-12);
        assert_eq!(plan.grid(), Grid::new(4, 4, 5));
        assert_eq!(plan.grid().layer_size(), 16);
    }

    #[test]
    fn cursor_wraps_x_then_z_then_y() {
        let grid = Grid::new(2, 2, 3);
        let mut cursor = GridCursor::default();

        let mut visited = Vec::new();
        for _ in 0..4 {
            visited.push(cursor);
            cursor.advance(&grid);
        }

        assert_eq!(
            visited,
            vec![
                GridCursor::new(0, 0, 0),
                GridCursor::new(1, 0, 0),
                GridCursor::new(0, 1, 0),
                GridCursor::new(1, 1, 0),
            ]
        );
        assert_eq!(cursor, GridCursor::new(0, 0, 1));
    }

    #[test]
    fn cursor_clamps_at_full() {
        let grid = Grid::new(1, 1, 2);
        let mut cursor = GridCursor::default();
        cursor.advance(&grid);
        cursor.advance(&grid);
        assert!(cursor.is_full(&grid));
        cursor.advance(&grid);
        assert_eq!(cursor, GridCursor::new(0, 0, 2));
    }
}
