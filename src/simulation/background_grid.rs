//! Uniform transfer grid between particles.
//!
//! The grid is a finite window of nodes over the unbounded lattice `cell * cell_size`
//! in the local frame. Node buffers are reused between substeps and cleared before
//! every scatter.

use std::collections::BTreeMap;

use crate::{
    boundary_policy::BoundaryPolicy,
    collider::{Collider, ColliderHandle, CollisionPenalty},
    concurrency::par_iter_mut2,
    error::ConfigError,
    fine_grid::FineGrid,
    floating_type_mod::FT,
    kernels::{apic_inv_d, StencilWeights, STENCIL_WIDTH},
    particle::ParticleVec,
    scheduler::{Scheduler, BLOCK_SIZE},
    thread_safe_ptr::ThreadSafeMutPtr,
    vec2i,
    world_config::LocalExtent,
    V, V2, V2D, VI2, M2,
};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GridNode {
    pub mass: FT,
    pub momentum: V2,

    /// Mass, momentum and mass gradient of static and kinematic bodies around the node.
    pub rigid_mass: FT,
    pub rigid_momentum: V2,
    pub rigid_gradient: V2,

    /// Valid after `solve`.
    pub velocity: V2,
}

/// The allocated part of the lattice: nodes `origin_cell .. origin_cell + dims`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridWindow {
    pub origin_cell: VI2,
    pub dims: V<usize, 2>,
}

impl GridWindow {
    pub fn new(origin_cell: VI2, dims: V<usize, 2>) -> GridWindow {
        GridWindow { origin_cell, dims }
    }

    pub fn num_nodes(&self) -> usize {
        self.dims.x * self.dims.y
    }

    /// Row-major index of the node at lattice coordinate `cell`.
    #[inline(always)]
    pub fn node_index(&self, cell: VI2) -> Option<usize> {
        let rel = cell - self.origin_cell;
        if rel.x < 0 || rel.y < 0 || rel.x as usize >= self.dims.x || rel.y as usize >= self.dims.y {
            return None;
        }
        Some(rel.y as usize * self.dims.x + rel.x as usize)
    }

    pub fn node_cell(&self, idx: usize) -> VI2 {
        self.origin_cell + vec2i((idx % self.dims.x) as i32, (idx / self.dims.x) as i32)
    }

    /// Lattice cells `[lo, hi]` (inclusive) touched by the stencils of particles inside `[min, max]`.
    pub fn stencil_cells(min: V2, max: V2, inv_dx: FT) -> (VI2, VI2) {
        let lo = min.map(|c| (c * inv_dx - 0.5).floor() as i32);
        let hi = max.map(|c| (c * inv_dx - 0.5).floor() as i32 + STENCIL_WIDTH as i32 - 1);
        (lo, hi)
    }

    /// Whether nodes `[lo - margin, hi + margin]` are all inside the window.
    pub fn covers(&self, lo: VI2, hi: VI2, margin: usize) -> bool {
        let m = margin as i32;
        let max = self.origin_cell + self.dims.map(|d| d as i32) - vec2i(1, 1);
        lo.x - m >= self.origin_cell.x && lo.y - m >= self.origin_cell.y && hi.x + m <= max.x && hi.y + m <= max.y
    }

    /// A window around `[lo, hi]` with `margin` free nodes on each side.
    ///
    /// The window never shrinks below `self.dims`, grows in multiples of `BLOCK_SIZE`
    /// and fails when an axis would need more than `max_resolution` nodes.
    pub fn fit(&self, lo: VI2, hi: VI2, margin: usize, max_resolution: usize) -> Result<GridWindow, ConfigError> {
        let mut dims = self.dims;
        let mut origin_cell = self.origin_cell;
        for d in 0..2 {
            let required = (hi[d] - lo[d] + 1) as usize + 2 * margin;
            if required > max_resolution {
                return Err(ConfigError::ActiveRegionExceedsGridLimit {
                    required,
                    limit: max_resolution,
                });
            }
            if required > dims[d] {
                let grown = usize::max(required, dims[d] * 2);
                dims[d] = usize::min(((grown + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE, max_resolution);
            }
            // centre the active region
            let slack = dims[d] as i32 - (hi[d] - lo[d] + 1);
            origin_cell[d] = lo[d] - slack / 2;
        }
        Ok(GridWindow { origin_cell, dims })
    }
}

pub struct BackgroundGrid {
    cell_size: FT,
    inv_dx: FT,
    window: GridWindow,
    nodes: Vec<GridNode>,
}

impl BackgroundGrid {
    pub fn new(cell_size: FT, window: GridWindow) -> BackgroundGrid {
        BackgroundGrid {
            cell_size,
            inv_dx: 1. / cell_size,
            window,
            nodes: vec![GridNode::default(); window.num_nodes()],
        }
    }

    pub fn cell_size(&self) -> FT {
        self.cell_size
    }

    pub fn inv_dx(&self) -> FT {
        self.inv_dx
    }

    pub fn window(&self) -> &GridWindow {
        &self.window
    }

    pub fn nodes(&self) -> &[GridNode] {
        &self.nodes
    }

    pub fn node(&self, cell: VI2) -> Option<&GridNode> {
        self.window.node_index(cell).map(|idx| &self.nodes[idx])
    }

    pub fn node_position(&self, cell: VI2) -> V2 {
        cell.map(|c| c as FT) * self.cell_size
    }

    pub fn clear(&mut self) {
        self.nodes.par_iter_mut().for_each(|node| *node = GridNode::default());
    }

    /// Moves the window. Nodes inside both windows keep their values, all others start empty.
    pub fn relocate(&mut self, new_window: GridWindow) {
        if new_window == self.window {
            return;
        }
        let mut nodes = vec![GridNode::default(); new_window.num_nodes()];
        for (idx, node) in nodes.iter_mut().enumerate() {
            if let Some(old_idx) = self.window.node_index(new_window.node_cell(idx)) {
                *node = self.nodes[old_idx];
            }
        }
        self.window = new_window;
        self.nodes = nodes;
    }

    /// Shifts the lattice coordinates after the World Offset moved by `shift_cells` cells.
    /// Node values stay with their nodes.
    pub fn rebase(&mut self, shift_cells: VI2) {
        self.window.origin_cell -= shift_cells;
    }

    /// Distributes the mass and APIC momentum of every dynamic particle onto its stencil,
    /// together with the stress (or element) force impulse of this substep.
    ///
    /// Particles of static and kinematic bodies go into the rigid channel of the nodes instead.
    pub fn scatter(&mut self, particles: &ParticleVec, scheduler: &Scheduler, dt: FT) {
        let inv_dx = self.inv_dx;
        let dx = self.cell_size;
        let inv_d = apic_inv_d(inv_dx);
        let window = self.window;
        let nodes = ThreadSafeMutPtr::new(&mut self.nodes);

        let scatter_particle = |p: usize| {
            let x = particles.position[p];
            let mass = particles.mass[p];
            let weights = StencilWeights::new(x, inv_dx);

            if !particles.dynamic[p] {
                let momentum = particles.velocity[p] * mass;
                for i in 0..STENCIL_WIDTH {
                    for j in 0..STENCIL_WIDTH {
                        let cell = weights.base + vec2i(i as i32, j as i32);
                        if let Some(idx) = window.node_index(cell) {
                            let w = weights.weight(i, j);
                            // SAFETY: blocks of one colour own disjoint nodes, serial particles run alone
                            let node = unsafe { nodes.get_mut(idx) };
                            node.rigid_mass += w * mass;
                            node.rigid_momentum += momentum * w;
                            node.rigid_gradient += weights.weight_gradient(i, j) * (mass * inv_dx);
                        }
                    }
                }
                return;
            }

            let (affine, force) = if particles.mesh_vertex[p] {
                (particles.affine[p] * mass, particles.element_force[p] * dt)
            } else {
                let stress = particles.deformation[p].stress * (-dt * particles.volume0[p] * inv_d);
                (stress + particles.affine[p] * mass, V2::zeros())
            };
            let momentum = particles.velocity[p] * mass;

            weights.for_each_node(|cell, w, dpos| {
                if let Some(idx) = window.node_index(cell) {
                    // SAFETY: blocks of one colour own disjoint nodes, serial particles run alone
                    let node = unsafe { nodes.get_mut(idx) };
                    node.mass += w * mass;
                    node.momentum += (momentum + affine * (dpos * dx) + force) * w;
                }
            });
        };

        scheduler.for_each_block(|block| {
            for &p in block {
                scatter_particle(p);
            }
        });

        for &p in scheduler.serial_particles() {
            scatter_particle(p);
        }
    }

    /// Turns momentum into velocity, adds gravity and applies body, collider and world
    /// extent boundary conditions.
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        dt: FT,
        gravity: V2,
        extent: &LocalExtent,
        policy: BoundaryPolicy,
        fine_grid: &FineGrid,
        colliders: &BTreeMap<ColliderHandle, Collider>,
        penalty: &CollisionPenalty,
        offset: V2D,
    ) {
        let window = self.window;
        let dx = self.cell_size;
        let inv_dx = self.inv_dx;

        self.nodes.par_iter_mut().enumerate().for_each(|(idx, node)| {
            if node.mass <= 0. {
                node.velocity = V2::zeros();
                return;
            }

            let mut v = node.momentum / node.mass + gravity * dt;
            let x = window.node_cell(idx).map(|c| c as FT) * dx;

            if node.rigid_mass > 0. {
                v = separate_from_rigid(node, v, inv_dx);
            }
            v = fine_grid.resolve_velocity(colliders, offset, x, v, penalty, dt);

            if policy == BoundaryPolicy::Clamp {
                // nodes on or beyond the extent act as slip walls
                for d in 0..2 {
                    if x[d] <= extent.min[d] {
                        v[d] = FT::max(v[d], 0.);
                    }
                    if x[d] >= extent.max[d] {
                        v[d] = FT::min(v[d], 0.);
                    }
                }
            }

            node.velocity = v;
        });
    }

    /// Interpolates velocity and the APIC affine matrix (= velocity gradient) back onto
    /// every dynamic particle, using the scatter weights.
    pub fn gather(&self, particles: &mut ParticleVec) {
        let inv_dx = self.inv_dx;
        let dx = self.cell_size;
        let inv_d = apic_inv_d(inv_dx);
        let window = self.window;
        let nodes = &self.nodes;
        let positions = &particles.position;
        let dynamic = &particles.dynamic;

        par_iter_mut2(&mut particles.velocity, &mut particles.affine, |p, v_p, c_p| {
            if !dynamic[p] {
                return;
            }
            let weights = StencilWeights::new(positions[p], inv_dx);
            let mut v = V2::zeros();
            let mut b = M2::zeros();
            weights.for_each_node(|cell, w, dpos| {
                if let Some(idx) = window.node_index(cell) {
                    let v_i = nodes[idx].velocity;
                    v += v_i * w;
                    b += v_i * (dpos * dx).transpose() * w;
                }
            });
            *v_p = v;
            *c_p = b * inv_d;
        });
    }

    /// Mass of dynamic particles on the grid.
    pub fn total_mass(&self) -> FT {
        self.nodes.iter().map(|n| n.mass).sum()
    }

    pub fn total_momentum(&self) -> V2 {
        self.nodes.iter().fold(V2::zeros(), |acc, n| acc + n.momentum)
    }
}

/// Removes the part of `v` that moves into the static or kinematic material around `node`.
///
/// Inside that material the node simply follows it.
fn separate_from_rigid(node: &GridNode, v: V2, inv_dx: FT) -> V2 {
    let v_rigid = node.rigid_momentum / node.rigid_mass;
    let gradient = node.rigid_gradient;
    let gradient_norm = gradient.norm();
    if gradient_norm <= 1e-2 * node.rigid_mass * inv_dx {
        return v_rigid;
    }
    // the rigid mass grows towards the body
    let n = -gradient / gradient_norm;
    let v_rel = v - v_rigid;
    let vn = v_rel.dot(&n);
    if vn < 0. {
        v_rigid + v_rel - n * vn
    } else {
        v
    }
}
