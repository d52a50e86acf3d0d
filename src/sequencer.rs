//! Spawn ordering and spawn positions.
//!
//! Each pass is a freshly shuffled sequence holding every planned instance
//! once (class index repeated `count` times). Consumption only moves an
//! index forward, so every planned instance is handed out exactly once per
//! pass before the next shuffle.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::model::AggregateClass;
use crate::planner::{Grid, GridCursor, PackingPlan};
use crate::types::Point3;

/// Hands out classes in random order and maps grid cells to positions.
#[derive(Debug, Clone)]
pub struct SpawnSequencer {
    classes: Vec<AggregateClass>,
    grid: Grid,
    cell_size: f64,
    origin: Point3,
    pass: Vec<usize>,
    next: usize,
    refills: usize,
}

impl SpawnSequencer {
    /// Creates a sequencer whose grid starts at `origin` (the minimum corner
    /// of cell `(0, 0, 0)`).
    pub fn new(plan: &PackingPlan, origin: Point3) -> Self {
        Self {
            classes: plan.classes().to_vec(),
            grid: plan.grid(),
            cell_size: plan.max_dimension(),
            origin,
            pass: Vec::new(),
            next: 0,
            refills: 0,
        }
    }

    /// Next class to instantiate, `None` if no class has a positive count.
    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<&AggregateClass> {
        if self.next >= self.pass.len() {
            self.refill(rng);
        }
        let class_idx = *self.pass.get(self.next)?;
        self.next += 1;
        self.classes.get(class_idx)
    }

    /// Instances left in the current pass.
    pub fn remaining(&self) -> usize {
        self.pass.len() - self.next
    }

    /// How many passes have been generated so far.
    pub fn refills(&self) -> usize {
        self.refills
    }

    /// World-space center of the cell under `cursor`, then advances the cursor.
    ///
    /// Returns `None` once the cursor is full; the cursor is left untouched.
    pub fn position(&self, cursor: &mut GridCursor) -> Option<Point3> {
        if cursor.is_full(&self.grid) {
            return None;
        }

        let half = self.cell_size / 2.0;
        let center = Point3::new(
            self.origin.x + cursor.x as f64 * self.cell_size + half,
            self.origin.y + cursor.y as f64 * self.cell_size + half,
            self.origin.z + cursor.z as f64 * self.cell_size + half,
        );
        cursor.advance(&self.grid);
        Some(center)
    }

    fn refill<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut pass: Vec<usize> = self
            .classes
            .iter()
            .enumerate()
            .flat_map(|(idx, class)| std::iter::repeat_n(idx, class.count().unwrap_or(0)))
            .collect();
        pass.shuffle(rng);

        self.pass = pass;
        self.next = 0;
        if !self.pass.is_empty() {
            self.refills += 1;
            log::debug!("🔀 New spawn pass with {} instances", self.pass.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Container;
    use crate::planner::plan;
    use crate::types::Dimensions;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn two_to_one_plan() -> PackingPlan {
        // B anchors the plan: total = V_B / 0.5 = 4·V_A, so A gets 2 and B gets 1.
        let classes = vec![
            AggregateClass::new("A", (1.0, 1.0, 1.0), 0.5, 10),
            AggregateClass::new("B", (2.0, 1.0, 1.0), 0.5, 10),
        ];
        plan(
            classes,
            Container::new(Dimensions::new(8.0, 8.0, 8.0)).unwrap(),
        )
    }

    #[test]
    fn two_a_one_b_then_refill() {
        let plan = two_to_one_plan();
        assert_eq!(plan.classes()[0].count(), Some(2));
        assert_eq!(plan.classes()[1].count(), Some(1));

        let mut rng = StdRng::seed_from_u64(42);
        let mut sequencer = SpawnSequencer::new(&plan, Point3::origin());

        let mut drawn = HashMap::new();
        for _ in 0..3 {
            let id = sequencer.next(&mut rng).unwrap().id.clone();
            *drawn.entry(id).or_insert(0) += 1;
        }
        assert_eq!(drawn.get("A"), Some(&2));
        assert_eq!(drawn.get("B"), Some(&1));
        assert_eq!(sequencer.remaining(), 0);
        assert_eq!(sequencer.refills(), 1);

        sequencer.next(&mut rng).unwrap();
        assert_eq!(sequencer.refills(), 2);
        assert_eq!(sequencer.remaining(), 2);
    }

    #[test]
    fn every_pass_is_a_permutation_of_the_plan() {
        let plan = two_to_one_plan();
        let mut rng = StdRng::seed_from_u64(7);
        let mut sequencer = SpawnSequencer::new(&plan, Point3::origin());

        for _ in 0..10 {
            let mut ids: Vec<String> = (0..3)
                .map(|_| sequencer.next(&mut rng).unwrap().id.clone())
                .collect();
            ids.sort();
            assert_eq!(ids, vec!["A", "A", "B"]);
        }
        assert_eq!(sequencer.refills(), 10);
    }

    #[test]
    fn empty_plan_yields_nothing() {
        let classes = vec![AggregateClass::new("zero", (0.0, 1.0, 1.0), 0.5, 10)];
        let plan = plan(
            classes,
            Container::new(Dimensions::new(8.0, 8.0, 8.0)).unwrap(),
        );
        let mut rng = StdRng::seed_from_u64(1);
        let mut sequencer = SpawnSequencer::new(&plan, Point3::origin());

        assert!(sequencer.next(&mut rng).is_none());
        assert_eq!(sequencer.refills(), 0);
    }

    #[test]
    fn positions_are_cell_centers() {
        let classes = vec![AggregateClass::new("A", (1.0, 1.0, 1.0), 0.5, 10)];
        let plan = plan(
            classes,
            Container::new(Dimensions::new(2.0, 3.0, 2.0)).unwrap(),
        );
        assert_eq!(plan.grid(), Grid::new(2, 2, 3));

        let sequencer = SpawnSequencer::new(&plan, Point3::new(0.0, 10.0, 0.0));
        let mut cursor = GridCursor::default();

        let first = sequencer.position(&mut cursor).unwrap();
        assert_eq!(first, Point3::new(0.5, 10.5, 0.5));
        let second = sequencer.position(&mut cursor).unwrap();
        assert_eq!(second, Point3::new(1.5, 10.5, 0.5));
        sequencer.position(&mut cursor).unwrap();
        let fourth = sequencer.position(&mut cursor).unwrap();
        assert_eq!(fourth, Point3::new(1.5, 10.5, 1.5));
        assert_eq!(cursor, GridCursor::new(0, 0, 1));

        let fifth = sequencer.position(&mut cursor).unwrap();
        assert_eq!(fifth, Point3::new(0.5, 11.5, 0.5));
    }

    #[test]
    fn full_cursor_has_no_position() {
        let classes = vec![AggregateClass::new("A", (1.0, 1.0, 1.0), 0.5, 10)];
        let plan = plan(
            classes,
            Container::new(Dimensions::new(1.0, 1.0, 1.0)).unwrap(),
        );
        let sequencer = SpawnSequencer::new(&plan, Point3::origin());
        let mut cursor = GridCursor::default();

        assert!(sequencer.position(&mut cursor).is_some());
        assert!(sequencer.position(&mut cursor).is_none());
        assert_eq!(cursor, GridCursor::new(0, 0, 1));
    }
}
