//! Spatial index over collider and trigger geometry.
//!
//! The fine grid covers the current background grid window with `fine_grid_scale`
//! cells per background cell along each axis. Every cell lists the shapes that may
//! overlap it (conservative rasterisation); exact containment is decided by the
//! shape's SDF at query time.

use std::collections::BTreeMap;

use crate::{
    background_grid::GridWindow,
    collider::{Collider, ColliderHandle, CollisionPenalty},
    floating_type_mod::FT,
    shape::{Kinematics, Shape},
    trigger::{Trigger, TriggerHandle},
    vec2f, vec2i, V, V2, V2D, VI2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeKey {
    Collider(ColliderHandle),
    Trigger(TriggerHandle),
}

#[derive(Debug, Clone)]
pub struct FineGrid {
    scale: usize,
    fine_cell_size: FT,

    /// Fine cell coordinates of the lower-left cell.
    grid_min: VI2,
    size: V<usize, 2>,

    cells: Vec<Vec<ShapeKey>>,
}

impl FineGrid {
    pub fn new(cell_size: FT, scale: usize, window: &GridWindow) -> FineGrid {
        let mut grid = FineGrid {
            scale,
            fine_cell_size: cell_size / scale as FT,
            grid_min: vec2i(0, 0),
            size: V::<usize, 2>::zeros(),
            cells: Vec::new(),
        };
        grid.resize(window);
        grid
    }

    /// Covers `window` and drops all shapes.
    pub fn resize(&mut self, window: &GridWindow) {
        self.grid_min = window.origin_cell * self.scale as i32;
        self.size = window.dims * self.scale;
        let num_cells = self.size.x * self.size.y;
        self.cells.clear();
        self.cells.resize_with(num_cells, Vec::new);
    }

    /// Re-rasterises every collider and trigger over `window`, in handle order.
    pub fn rebuild(
        &mut self,
        window: &GridWindow,
        colliders: &BTreeMap<ColliderHandle, Collider>,
        triggers: &BTreeMap<TriggerHandle, Trigger>,
        offset: V2D,
    ) {
        self.resize(window);
        for (&handle, collider) in colliders {
            self.insert(ShapeKey::Collider(handle), &collider.shape, &collider.kinematics, offset);
        }
        for (&handle, trigger) in triggers {
            self.insert(ShapeKey::Trigger(handle), &trigger.shape, &trigger.kinematics, offset);
        }
    }

    pub fn size(&self) -> V<usize, 2> {
        self.size
    }

    pub fn fine_cell_size(&self) -> FT {
        self.fine_cell_size
    }

    /// Local position of the lower-left corner.
    pub fn origin(&self) -> V2 {
        self.grid_min.map(|c| c as FT) * self.fine_cell_size
    }

    fn cell_pos(&self, x: V2) -> VI2 {
        (x / self.fine_cell_size).map(|c| c.floor() as i32)
    }

    fn pos_to_idx(&self, cell_pos: VI2) -> Option<usize> {
        let rel = cell_pos - self.grid_min;
        if rel.x < 0 || rel.y < 0 || rel.x as usize >= self.size.x || rel.y as usize >= self.size.y {
            return None;
        }
        Some(rel.y as usize * self.size.x + rel.x as usize)
    }

    fn cell_center(&self, cell_pos: VI2) -> V2 {
        (cell_pos.map(|c| c as FT) + vec2f(0.5, 0.5)) * self.fine_cell_size
    }

    /// Registers `key` in every cell the placed shape may touch.
    pub fn insert(&mut self, key: ShapeKey, shape: &Shape, kinematics: &Kinematics, offset: V2D) {
        let (min, max) = shape.aabb(kinematics, offset);
        let lo = self.cell_pos(min).sup(&self.grid_min);
        let grid_max = self.grid_min + self.size.map(|s| s as i32) - vec2i(1, 1);
        let hi = self.cell_pos(max).inf(&grid_max);

        // a full diagonal keeps the test conservative for SDFs that are only approximately euclidean
        let margin = self.fine_cell_size * 2. * std::f64::consts::SQRT_2 as FT;

        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let cell_pos = vec2i(x, y);
                if shape.sdf(kinematics, offset, self.cell_center(cell_pos)) > margin {
                    continue;
                }
                if let Some(idx) = self.pos_to_idx(cell_pos) {
                    self.cells[idx].push(key);
                }
            }
        }
    }

    pub fn remove(&mut self, key: ShapeKey) {
        for cell in &mut self.cells {
            cell.retain(|k| *k != key);
        }
    }

    /// Candidate shapes at local position `x`. Outside of the window nothing is found.
    pub fn query(&self, x: V2) -> &[ShapeKey] {
        match self.pos_to_idx(self.cell_pos(x)) {
            Some(idx) => &self.cells[idx],
            None => &[],
        }
    }

    /// Shapes that actually contain `x`. Keys without a registered shape are skipped.
    pub fn query_overlapping(
        &self,
        x: V2,
        colliders: &BTreeMap<ColliderHandle, Collider>,
        triggers: &BTreeMap<TriggerHandle, Trigger>,
        offset: V2D,
    ) -> Vec<ShapeKey> {
        self.query(x)
            .iter()
            .copied()
            .filter(|key| match key {
                ShapeKey::Collider(handle) => colliders
                    .get(handle)
                    .map_or(false, |c| c.shape.contains(&c.kinematics, offset, x)),
                ShapeKey::Trigger(handle) => triggers
                    .get(handle)
                    .map_or(false, |t| t.shape.contains(&t.kinematics, offset, x)),
            })
            .collect()
    }

    /// Triggers containing `x`.
    pub fn triggers_at<'a>(
        &'a self,
        x: V2,
        triggers: &'a BTreeMap<TriggerHandle, Trigger>,
        offset: V2D,
    ) -> impl Iterator<Item = TriggerHandle> + 'a {
        self.query(x).iter().filter_map(move |key| match key {
            ShapeKey::Trigger(handle) => triggers
                .get(handle)
                .filter(|t| t.shape.contains(&t.kinematics, offset, x))
                .map(|_| *handle),
            ShapeKey::Collider(_) => None,
        })
    }

    /// Resolves a particle against every collider registered at its position.
    ///
    /// Returns the corrected position and velocity if any collider was touched.
    pub fn resolve(
        &self,
        colliders: &BTreeMap<ColliderHandle, Collider>,
        offset: V2D,
        position: V2,
        velocity: V2,
    ) -> Option<(V2, V2)> {
        let mut result: Option<(V2, V2)> = None;
        for key in self.query(position) {
            let collider = match key {
                ShapeKey::Collider(handle) => match colliders.get(handle) {
                    Some(collider) => collider,
                    None => continue,
                },
                ShapeKey::Trigger(_) => continue,
            };
            let (x, v) = result.unwrap_or((position, velocity));
            if let Some(resolved) = collider.resolve(offset, x, v) {
                result = Some(resolved);
            }
        }
        result
    }

    /// Velocity boundary condition for a grid node at `position`.
    pub fn resolve_velocity(
        &self,
        colliders: &BTreeMap<ColliderHandle, Collider>,
        offset: V2D,
        position: V2,
        velocity: V2,
        penalty: &CollisionPenalty,
        dt: FT,
    ) -> V2 {
        let mut v = velocity;
        for key in self.query(position) {
            if let ShapeKey::Collider(handle) = key {
                if let Some(collider) = colliders.get(handle) {
                    if let Some(resolved) = collider.resolve_velocity(offset, position, v, penalty, dt) {
                        v = resolved;
                    }
                }
            }
        }
        v
    }

    /// Number of colliders per cell, row-major with x varying fastest.
    pub fn collider_count_buffer(&self) -> Vec<u32> {
        self.cells
            .iter()
            .map(|cell| cell.iter().filter(|k| matches!(k, ShapeKey::Collider(_))).count() as u32)
            .collect()
    }

    /// Most recently registered trigger per cell, row-major with x varying fastest.
    pub fn trigger_id_buffer(&self) -> Vec<Option<TriggerHandle>> {
        self.cells
            .iter()
            .map(|cell| {
                cell.iter().rev().find_map(|k| match k {
                    ShapeKey::Trigger(handle) => Some(*handle),
                    ShapeKey::Collider(_) => None,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collider::{CollisionParameter, CollisionType},
        shape::{BoxShape, CircleShape, Mobility},
        vec2d,
    };

    fn window() -> GridWindow {
        GridWindow::new(vec2i(0, 0), V::<usize, 2>::new(16, 16))
    }

    fn setup() -> (FineGrid, BTreeMap<ColliderHandle, Collider>, BTreeMap<TriggerHandle, Trigger>) {
        let mut colliders = BTreeMap::new();
        colliders.insert(
            ColliderHandle(0),
            Collider::new(
                BoxShape::new(vec2f(1., 0.25)).into(),
                Kinematics::new(vec2d(0.5, 0.), Mobility::Static),
                CollisionParameter::new(CollisionType::Slip, 0., 0.),
            ),
        );
        let mut triggers = BTreeMap::new();
        triggers.insert(
            TriggerHandle(0),
            Trigger::new(
                CircleShape::new(0.2).into(),
                Kinematics::new(vec2d(0.5, 0.6), Mobility::Static),
            ),
        );
        let mut grid = FineGrid::new(1. / 16., 4, &window());
        grid.rebuild(&window(), &colliders, &triggers, vec2d(0., 0.));
        (grid, colliders, triggers)
    }

    #[test]
    fn query_finds_overlapping_shapes() {
        let (grid, colliders, triggers) = setup();
        let offset = vec2d(0., 0.);

        assert_eq!(
            grid.query_overlapping(vec2f(0.5, 0.1), &colliders, &triggers, offset),
            vec![ShapeKey::Collider(ColliderHandle(0))]
        );
        assert_eq!(
            grid.query_overlapping(vec2f(0.55, 0.6), &colliders, &triggers, offset),
            vec![ShapeKey::Trigger(TriggerHandle(0))]
        );
        assert!(grid
            .query_overlapping(vec2f(0.5, 0.35), &colliders, &triggers, offset)
            .is_empty());
        assert!(grid.query(vec2f(-3., 0.5)).is_empty());
    }

    #[test]
    fn removed_shapes_are_no_ops() {
        let (mut grid, mut colliders, triggers) = setup();
        let offset = vec2d(0., 0.);

        // handle still rasterised, but the collider is gone
        colliders.clear();
        assert_eq!(grid.resolve(&colliders, offset, vec2f(0.5, 0.1), vec2f(0., -1.)), None);
        assert!(grid
            .query_overlapping(vec2f(0.5, 0.1), &colliders, &triggers, offset)
            .is_empty());

        grid.remove(ShapeKey::Trigger(TriggerHandle(0)));
        assert_eq!(grid.triggers_at(vec2f(0.5, 0.6), &triggers, offset).count(), 0);
    }

    #[test]
    fn resolve_pushes_particles_out() {
        let (grid, colliders, _) = setup();
        let (x, v) = grid
            .resolve(&colliders, vec2d(0., 0.), vec2f(0.5, 0.2), vec2f(1., -1.))
            .unwrap();
        assert!((x.y - 0.25).abs() < 1e-5);
        assert!(v.y.abs() < 1e-6);
        assert!((v.x - 1.).abs() < 1e-6);
    }

    #[test]
    fn debug_buffers_cover_the_window() {
        let (grid, _, _) = setup();
        let counts = grid.collider_count_buffer();
        let ids = grid.trigger_id_buffer();
        assert_eq!(counts.len(), 64 * 64);
        assert_eq!(ids.len(), 64 * 64);
        assert!(counts.iter().any(|&c| c == 1));
        assert!(ids.iter().any(|id| *id == Some(TriggerHandle(0))));
        // the top row is far away from every shape
        assert_eq!(counts[63 * 64 + 10], 0);
        assert_eq!(ids[63 * 64 + 10], None);
    }
}
