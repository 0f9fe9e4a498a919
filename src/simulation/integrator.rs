//! The Updated Lagrangian step.
//!
//! A step runs `substeps` times: scatter, solve, gather, material update, advect,
//! collision resolve. Trigger containment is evaluated once, after the last
//! substep has committed. Any error restores the state the step started from.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::{
    background_grid::{BackgroundGrid, GridWindow},
    body::{Body, BodyHandle},
    boundary_policy::{BoundaryOutcome, BoundaryPolicy},
    collider::{Collider, ColliderHandle},
    concurrency::{par_iter_mut2, par_iter_reduce2, par_map_reduce},
    counters::ValueCounters,
    error::{ConfigError, Result, SimulationError},
    fine_grid::FineGrid,
    floating_type_mod::FT,
    material::{update_deformation, Material},
    mesh_forces::accumulate_element_forces,
    particle::ParticleVec,
    scheduler::{Phase, Scheduler},
    shape::Kinematics,
    trigger::{Trigger, TriggerEvent, TriggerHandle},
    world_config::{LocalExtent, WorldConfig},
    V, V2, V2D, VI2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    Idle,
    Scattering,
    Solving,
    Gathering,
    MaterialUpdating,
    Advecting,
    ResolvingCollisions,
    EvaluatingTriggers,
}

impl From<Phase> for IntegratorState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Scatter => IntegratorState::Scattering,
            Phase::Solve => IntegratorState::Solving,
            Phase::Gather => IntegratorState::Gathering,
            Phase::MaterialUpdate => IntegratorState::MaterialUpdating,
            Phase::Advect => IntegratorState::Advecting,
            Phase::CollisionResolve => IntegratorState::ResolvingCollisions,
            Phase::TriggerEvaluate => IntegratorState::EvaluatingTriggers,
        }
    }
}

/// Everything a step reads and writes.
pub struct WorldState {
    pub config: WorldConfig,
    pub materials: Vec<Material>,
    pub bodies: BTreeMap<BodyHandle, Body>,
    pub colliders: BTreeMap<ColliderHandle, Collider>,
    pub triggers: BTreeMap<TriggerHandle, Trigger>,
    pub particles: ParticleVec,

    /// World Offset: particle positions are stored relative to it.
    pub offset: V2D,

    pub grid: BackgroundGrid,
    pub fine_grid: FineGrid,
}

impl WorldState {
    /// An empty state with a grid window centred on the world extent.
    pub fn new(config: WorldConfig) -> std::result::Result<WorldState, ConfigError> {
        config.validate()?;

        let offset = config.offset;
        let extent = config.extent.to_local(offset);
        let centre = (extent.min + extent.max) * 0.5;
        let res = config.grid_resolution;
        let origin_cell = centre.map(|c| (c / config.cell_size).floor() as i32) - VI2::repeat(res as i32 / 2);
        let window = GridWindow::new(origin_cell, V::<usize, 2>::repeat(res));

        Ok(WorldState {
            grid: BackgroundGrid::new(config.cell_size, window),
            fine_grid: FineGrid::new(config.cell_size, config.fine_grid_scale, &window),
            config,
            materials: Vec::new(),
            bodies: BTreeMap::new(),
            colliders: BTreeMap::new(),
            triggers: BTreeMap::new(),
            particles: ParticleVec::default(),
            offset,
        })
    }

    pub fn rebuild_fine_grid(&mut self) {
        let window = *self.grid.window();
        self.fine_grid
            .rebuild(&window, &self.colliders, &self.triggers, self.offset);
    }

    /// Local bounding box of all dynamic particles.
    fn dynamic_bounds(&self) -> Option<(V2, V2)> {
        let particles = &self.particles;
        par_map_reduce(
            particles.len(),
            || None,
            |a: Option<(V2, V2)>, b| match (a, b) {
                (Some(a), Some(b)) => Some((a.0.inf(&b.0), a.1.sup(&b.1))),
                (a, b) => a.or(b),
            },
            |i| {
                let x = particles.position[i];
                (particles.dynamic[i] && !particles.removed[i]).then(|| (x, x))
            },
        )
    }

    /// Moves the World Offset by `shift_cells` whole cells.
    fn rebase(&mut self, shift_cells: VI2) {
        let h = self.config.cell_size;
        let shift_local = shift_cells.map(|c| c as FT) * h;
        self.offset += shift_cells.map(|c| c as f64 * h as f64);
        self.particles
            .position
            .par_iter_mut()
            .for_each(|x| *x -= shift_local);
        self.grid.rebase(shift_cells);
        debug!("rebased world offset to ({}, {})", self.offset.x, self.offset.y);
    }

    /// Moves the World Offset to `offset` without moving anything in world space.
    pub fn set_offset(&mut self, offset: V2D) -> std::result::Result<(), ConfigError> {
        let delta = (offset - self.offset).map(|c| c as FT);
        self.particles.position.par_iter_mut().for_each(|x| *x -= delta);
        self.offset = offset;
        self.ensure_window()?;
        self.rebuild_fine_grid();
        Ok(())
    }

    /// Rebases the World Offset and relocates the grid window when the active region
    /// drifted too far or too close to the window edge.
    ///
    /// Returns whether the window changed. The fine grid is rebuilt in that case.
    pub fn ensure_window(&mut self) -> std::result::Result<bool, ConfigError> {
        let (mut min, mut max) = match self.dynamic_bounds() {
            Some(bounds) => bounds,
            None => return Ok(false),
        };

        let inv_dx = self.grid.inv_dx();
        let mut changed = false;

        let centre = (min + max) * 0.5;
        if centre.amax() > self.config.rebase_distance {
            let shift_cells = (centre * inv_dx).map(|c| c.round() as i32);
            let shift_local = shift_cells.map(|c| c as FT) * self.config.cell_size;
            self.rebase(shift_cells);
            min -= shift_local;
            max -= shift_local;
            changed = true;
        }

        let (lo, hi) = GridWindow::stencil_cells(min, max, inv_dx);
        let window = *self.grid.window();
        if !window.covers(lo, hi, self.config.relocation_margin) {
            let new_window = window.fit(lo, hi, self.config.relocation_margin, self.config.max_grid_resolution)?;
            debug!(
                "relocating grid window from {:?} {:?} to {:?} {:?}",
                window.origin_cell.as_slice(),
                window.dims.as_slice(),
                new_window.origin_cell.as_slice(),
                new_window.dims.as_slice()
            );
            self.grid.relocate(new_window);
            changed = true;
        }

        if changed {
            self.rebuild_fine_grid();
        }
        Ok(changed)
    }
}

/// Placement state that a rejected step has to put back.
struct Checkpoint {
    offset: V2D,
    window: GridWindow,
    bodies: Vec<(BodyHandle, Kinematics)>,
    colliders: Vec<(ColliderHandle, Kinematics)>,
    triggers: Vec<(TriggerHandle, Kinematics)>,
}

impl Checkpoint {
    fn take(state: &WorldState) -> Checkpoint {
        Checkpoint {
            offset: state.offset,
            window: *state.grid.window(),
            bodies: state.bodies.iter().map(|(&h, b)| (h, b.kinematics)).collect(),
            colliders: state.colliders.iter().map(|(&h, c)| (h, c.kinematics)).collect(),
            triggers: state.triggers.iter().map(|(&h, t)| (h, t.kinematics)).collect(),
        }
    }

    fn restore(self, state: &mut WorldState) {
        state.offset = self.offset;
        state.grid.relocate(self.window);
        for (h, kinematics) in self.bodies {
            if let Some(body) = state.bodies.get_mut(&h) {
                body.kinematics = kinematics;
            }
        }
        for (h, kinematics) in self.colliders {
            if let Some(collider) = state.colliders.get_mut(&h) {
                collider.kinematics = kinematics;
            }
        }
        for (h, kinematics) in self.triggers {
            if let Some(trigger) = state.triggers.get_mut(&h) {
                trigger.kinematics = kinematics;
            }
        }
        state.rebuild_fine_grid();
    }
}

/// Index of the first particle with a non-finite position, velocity or affine velocity.
fn first_non_finite(particles: &ParticleVec) -> Option<usize> {
    par_map_reduce(
        particles.len(),
        || None,
        |a: Option<usize>, b| match (a, b) {
            (Some(a), Some(b)) => Some(usize::min(a, b)),
            (a, b) => a.or(b),
        },
        |i| {
            let finite = particles.position[i].iter().all(|c| c.is_finite())
                && particles.velocity[i].iter().all(|c| c.is_finite())
                && particles.affine[i].iter().all(|c| c.is_finite());
            (!finite).then(|| i)
        },
    )
}

fn check_finite(particles: &ParticleVec, phase: Phase) -> Result<()> {
    match first_non_finite(particles) {
        Some(i) => Err(SimulationError::NonFiniteState {
            particle_id: particles.id[i],
            phase,
        }),
        None => Ok(()),
    }
}

pub struct Integrator {
    state: IntegratorState,
    scheduler: Scheduler,
    vcounters: ValueCounters,

    /// particles as they were at the beginning of the current step
    backup: ParticleVec,
}

impl Integrator {
    pub fn new(statistics_enabled: bool) -> Integrator {
        Integrator {
            state: IntegratorState::Idle,
            scheduler: Scheduler::new(statistics_enabled),
            vcounters: ValueCounters::new(statistics_enabled),
            backup: ParticleVec::default(),
        }
    }

    pub fn state(&self) -> IntegratorState {
        self.state
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn vcounters(&self) -> &ValueCounters {
        &self.vcounters
    }

    /// Advances `world` by `dt`. On success the trigger transitions of this step are
    /// returned, otherwise `world` is left exactly as it was.
    pub fn step(&mut self, world: &mut WorldState, dt: FT) -> Result<Vec<TriggerEvent>> {
        if !(dt > 0.) || !dt.is_finite() {
            return Err(SimulationError::InvalidTimeStep(dt));
        }

        let substeps = world.config.substep_count(dt);
        let sub_dt = dt / substeps as FT;
        debug!(
            "step dt={} substeps={} particles={}",
            dt,
            substeps,
            world.particles.len()
        );

        self.vcounters.add_value("particle-count", world.particles.len() as FT);
        self.vcounters.add_value("substeps", substeps as FT);

        let checkpoint = Checkpoint::take(world);
        self.backup.copy_from(&world.particles);

        self.scheduler.pcounters_mut().begin("step");
        let result = self.advance(world, substeps, sub_dt);
        self.scheduler.pcounters_mut().end("step");

        if let Err(err) = result {
            warn!("step rejected: {}", err);
            std::mem::swap(&mut world.particles, &mut self.backup);
            checkpoint.restore(world);
            self.state = IntegratorState::Idle;
            return Err(err);
        }

        let events = self.evaluate_triggers(world);
        self.state = IntegratorState::Idle;
        Ok(events)
    }

    fn advance(&mut self, world: &mut WorldState, substeps: u32, dt: FT) -> Result<()> {
        world.ensure_window()?;

        let num_particles = world.particles.len();
        for substep in 0..substeps {
            trace!("substep {}/{}", substep + 1, substeps);
            self.substep(world, dt)?;
        }

        let removed = num_particles - world.particles.len();
        if removed > 0 {
            let alive: HashSet<u32> = world.particles.id.iter().copied().collect();
            for body in world.bodies.values_mut() {
                body.retain_particles(|id| alive.contains(&id));
            }
        }
        Ok(())
    }

    fn enter<R>(&mut self, phase: Phase, f: impl FnOnce(&Scheduler) -> R) -> R {
        self.state = phase.into();
        self.scheduler.run_phase(phase, f)
    }

    fn substep(&mut self, world: &mut WorldState, dt: FT) -> Result<()> {
        // kinematic colliders and triggers move before the particles see them
        let mut moved = false;
        for collider in world.colliders.values_mut() {
            moved |= collider.kinematics.is_moving();
            collider.kinematics.advance(dt);
        }
        for trigger in world.triggers.values_mut() {
            moved |= trigger.kinematics.is_moving();
            trigger.kinematics.advance(dt);
        }
        if moved {
            world.rebuild_fine_grid();
        }

        accumulate_element_forces(
            &mut world.particles,
            &world.bodies,
            &world.materials,
            world.config.mesh_body_force_scale,
        );

        {
            let particles = &world.particles;
            self.scheduler
                .partition(world.grid.window(), world.grid.inv_dx(), &particles.position, |i| {
                    !particles.removed[i]
                });
        }

        let WorldState {
            config,
            materials,
            bodies,
            colliders,
            particles,
            offset,
            grid,
            fine_grid,
            ..
        } = world;
        let offset = *offset;

        self.enter(Phase::Scatter, |scheduler| {
            grid.clear();
            grid.scatter(particles, scheduler, dt);
        });

        self.enter(Phase::Solve, |_| {
            let extent = config.extent.to_local(offset);
            grid.solve(
                dt,
                config.gravity,
                &extent,
                config.boundary_policy,
                fine_grid,
                colliders,
                &config.collision_penalty,
                offset,
            );
        });

        self.enter(Phase::Gather, |_| grid.gather(particles));
        check_finite(particles, Phase::Gather)?;

        let regularized = self.enter(Phase::MaterialUpdate, |_| {
            update_materials(particles, materials, dt)
        });
        if regularized > 0 {
            warn!(
                "{} particles had a degenerate deformation gradient and were regularized",
                regularized
            );
        }
        self.vcounters.add_value("regularized-particles", regularized as FT);

        self.enter(Phase::Advect, |_| advect(particles, bodies, offset, dt));

        let contacts = self.enter(Phase::CollisionResolve, |_| {
            let contacts = resolve_collisions(particles, fine_grid, colliders, offset);
            let extent = config.extent.to_local(offset);
            let removed = apply_boundary_policy(particles, config.boundary_policy, &extent);
            if removed > 0 {
                warn!("{} particles left the world extent and were removed", removed);
                particles.compact();
            }
            contacts
        });
        self.vcounters.add_value("collider-contacts", contacts as FT);
        check_finite(particles, Phase::CollisionResolve)?;

        world.ensure_window()?;
        Ok(())
    }

    /// Containment is tested in parallel, transitions are collected per trigger in handle order.
    fn evaluate_triggers(&mut self, world: &mut WorldState) -> Vec<TriggerEvent> {
        if world.triggers.is_empty() {
            return Vec::new();
        }

        let WorldState {
            particles,
            triggers,
            fine_grid,
            offset,
            ..
        } = world;
        let offset = *offset;

        self.enter(Phase::TriggerEvaluate, |_| {
            let hits = par_map_reduce(
                particles.len(),
                Vec::new,
                |mut a, mut b| {
                    a.append(&mut b);
                    a
                },
                |i| {
                    fine_grid
                        .triggers_at(particles.position[i], triggers, offset)
                        .map(|handle| (handle, particles.id[i], particles.tag[i]))
                        .collect::<Vec<_>>()
                },
            );

            let mut inside: BTreeMap<TriggerHandle, BTreeMap<u32, u32>> =
                triggers.keys().map(|&h| (h, BTreeMap::new())).collect();
            for (handle, id, tag) in hits {
                if let Some(set) = inside.get_mut(&handle) {
                    set.insert(id, tag);
                }
            }

            let mut events = Vec::new();
            for (handle, now_inside) in inside {
                if let Some(trigger) = triggers.get_mut(&handle) {
                    events.extend(trigger.update(handle, now_inside));
                }
            }
            events
        })
    }
}

/// Returns the number of regularized particles.
fn update_materials(particles: &mut ParticleVec, materials: &[Material], dt: FT) -> usize {
    let affine = &particles.affine;
    let dynamic = &particles.dynamic;
    let mesh_vertex = &particles.mesh_vertex;
    let material_ids = &particles.material;

    particles
        .deformation
        .par_iter_mut()
        .enumerate()
        .map(|(p, deformation)| {
            if !dynamic[p] || mesh_vertex[p] {
                return 0;
            }
            let material = match materials.get(material_ids[p].0 as usize) {
                Some(material) => material,
                None => return 0,
            };
            let update = update_deformation(deformation, &affine[p], dt, material);
            *deformation = update.deformation;
            update.regularized as usize
        })
        .sum()
}

/// Dynamic particles move with their velocity, particles of other bodies follow their body rigidly.
fn advect(particles: &mut ParticleVec, bodies: &mut BTreeMap<BodyHandle, Body>, offset: V2D, dt: FT) {
    let moving: HashMap<BodyHandle, (Kinematics, Kinematics)> = bodies
        .iter_mut()
        .filter(|(_, body)| !body.is_dynamic() && body.kinematics.is_moving())
        .map(|(&handle, body)| {
            let before = body.kinematics;
            body.kinematics.advance(dt);
            (handle, (before, body.kinematics))
        })
        .collect();

    let dynamic = &particles.dynamic;
    let body = &particles.body;
    par_iter_mut2(&mut particles.position, &mut particles.velocity, |p, x, v| {
        if dynamic[p] {
            *x += *v * dt;
        } else if let Some((before, after)) = moving.get(&body[p]) {
            let local = before.to_body_frame(offset, *x);
            *x = after.from_body_frame(offset, local);
            *v = after.velocity_at(offset, *x);
        }
    });
}

/// Returns the number of particles that touched a collider.
fn resolve_collisions(
    particles: &mut ParticleVec,
    fine_grid: &FineGrid,
    colliders: &BTreeMap<ColliderHandle, Collider>,
    offset: V2D,
) -> usize {
    if colliders.is_empty() {
        return 0;
    }
    let dynamic = &particles.dynamic;
    par_iter_reduce2(
        &mut particles.position,
        &mut particles.velocity,
        || 0,
        |a, b| a + b,
        |p, x, v| {
            if !dynamic[p] {
                return 0;
            }
            match fine_grid.resolve(colliders, offset, *x, *v) {
                Some((new_x, new_v)) => {
                    *x = new_x;
                    *v = new_v;
                    1
                }
                None => 0,
            }
        },
    )
}

/// Flags particles outside of the extent as removed or moves them back in.
///
/// Returns the number of removed particles.
fn apply_boundary_policy(
    particles: &mut ParticleVec,
    policy: BoundaryPolicy,
    extent: &LocalExtent,
) -> usize {
    (
        &mut particles.position,
        &mut particles.velocity,
        &mut particles.removed,
    )
        .into_par_iter()
        .map(|(x, v, removed)| match policy.apply(extent, *x, *v) {
            BoundaryOutcome::Inside => 0,
            BoundaryOutcome::Moved { position, velocity } => {
                *x = position;
                *v = velocity;
                0
            }
            BoundaryOutcome::Removed => {
                *removed = true;
                1
            }
        })
        .sum()
}
