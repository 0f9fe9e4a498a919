use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    body::{Body, BodyHandle, BodyKind, BodySource, MeshElement},
    collider::{Collider, ColliderHandle, CollisionParameter, CollisionPenalty},
    counters::write_statistics,
    error::{ConfigError, Result, SimulationError},
    export::{AttributeSelection, FineGridBuffers, GridWindowInfo, ParticleSnapshot},
    fine_grid::ShapeKey,
    floating_type_mod::FT,
    integrator::{Integrator, IntegratorState, WorldState},
    local_to_world,
    material::{Material, MaterialId},
    particle::ParticleVec,
    sampling::sample,
    shape::{Kinematics, Mobility, Shape, ShapeTrait},
    trigger::{Trigger, TriggerCallbacks, TriggerEvent, TriggerHandle},
    world_config::{Capacity, WorldConfig, WorldExtent},
    world_to_local, vec2f, V2, V2D,
};

/// `(tag & mask) == (query & mask)`
pub fn tag_matches(tag: u32, query: u32, mask: u32) -> bool {
    (tag & mask) == (query & mask)
}

/// A particle handed to [`World::manipulate_particles_in_trigger`]. Changes are written back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleView {
    pub id: u32,
    pub position: V2D,
    pub velocity: V2,
    pub tag: u32,
    pub remove: bool,
}

/// The simulation context: particles, bodies, colliders, triggers and the grids they are
/// simulated on. Owned by the caller, no global state is involved.
pub struct World {
    state: WorldState,
    integrator: Integrator,
    callbacks: BTreeMap<TriggerHandle, TriggerCallbacks>,
    last_events: Vec<TriggerEvent>,

    next_particle_id: u32,
    next_body: u32,
    next_collider: u32,
    next_trigger: u32,
}

impl World {
    pub fn new(config: WorldConfig) -> std::result::Result<World, ConfigError> {
        let state = WorldState::new(config)?;
        info!(
            "created world: cell size {}, extent ({}, {})..({}, {}), boundary policy {:?}",
            config.cell_size,
            config.extent.min.x,
            config.extent.min.y,
            config.extent.max.x,
            config.extent.max.y,
            config.boundary_policy
        );
        Ok(World {
            state,
            integrator: Integrator::new(config.statistics_enabled),
            callbacks: BTreeMap::new(),
            last_events: Vec::new(),
            next_particle_id: 0,
            next_body: 0,
            next_collider: 0,
            next_trigger: 0,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.state.config
    }

    pub fn offset(&self) -> V2D {
        self.state.offset
    }

    pub fn num_particles(&self) -> usize {
        self.state.particles.len()
    }

    /// Particle store. Positions are relative to [`World::offset`].
    pub fn particles(&self) -> &ParticleVec {
        &self.state.particles
    }

    pub fn integrator_state(&self) -> IntegratorState {
        self.integrator.state()
    }

    // ---------------------------------------------------------------------------------------
    // materials

    pub fn add_material(&mut self, material: Material) -> std::result::Result<MaterialId, ConfigError> {
        material.validate()?;
        let id = MaterialId(self.state.materials.len() as u32);
        self.state.materials.push(material);
        debug!("added material {:?}: {:?}", id, material);
        Ok(id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.state.materials.get(id.0 as usize)
    }

    // ---------------------------------------------------------------------------------------
    // bodies

    /// Samples `source` into particles placed by `kinematics`.
    ///
    /// Fails without changing the world if the source is invalid, a capacity limit would be
    /// exceeded or the new particles cannot be covered by the grid.
    pub fn add_body(
        &mut self,
        source: &BodySource,
        kinematics: Kinematics,
        material: MaterialId,
        tag: u32,
    ) -> Result<BodyHandle> {
        let density = self
            .material(material)
            .ok_or(SimulationError::UnknownMaterial(material))?
            .density;

        let capacity = self.state.config.capacity;
        Capacity::check("bodies", self.state.bodies.len(), 1, capacity.max_bodies)?;

        let sampled = sample(source, self.state.config.cell_size * 0.5)?;
        Capacity::check("particles", self.state.particles.len(), sampled.len(), capacity.max_particles)?;
        Capacity::check(
            "mesh elements",
            self.num_mesh_elements(),
            sampled.elements.len(),
            capacity.max_elements,
        )?;
        for (index, &volume) in sampled.volumes.iter().enumerate() {
            if !(volume > 0.) || !volume.is_finite() {
                return Err(ConfigError::NonPositiveParticleVolume { index, volume }.into());
            }
            let mass = volume * density;
            if !(mass > 0.) || !mass.is_finite() {
                return Err(ConfigError::NonPositiveParticleMass { index, mass }.into());
            }
        }

        let handle = BodyHandle(self.next_body);
        let offset = self.state.offset;
        let is_mesh = matches!(source, BodySource::Mesh { .. });
        let first_id = self.next_particle_id;

        let backup = self.state.particles.clone();
        let window = *self.state.grid.window();

        let particles = &mut self.state.particles;
        let start = particles.len();
        particles.extend(sampled.len());
        for (k, (&x, &volume)) in sampled.positions.iter().zip(sampled.volumes.iter()).enumerate() {
            let p = start + k;
            let position = kinematics.from_body_frame(offset, x);
            particles.id[p] = first_id + k as u32;
            particles.position[p] = position;
            particles.velocity[p] = kinematics.velocity_at(offset, position);
            particles.volume0[p] = volume;
            particles.mass[p] = volume * density;
            particles.material[p] = material;
            particles.body[p] = handle;
            particles.tag[p] = tag;
            particles.dynamic[p] = kinematics.mobility == Mobility::Dynamic;
            particles.mesh_vertex[p] = is_mesh;
        }

        let kind = if is_mesh {
            BodyKind::Mesh {
                elements: sampled
                    .elements
                    .iter()
                    .map(|e| MeshElement {
                        particle_ids: e.vertices.map(|v| first_id + v as u32),
                        dm_inv: e.dm_inv,
                        rest_area: e.rest_area,
                    })
                    .collect(),
            }
        } else {
            BodyKind::Sampled
        };

        self.state.bodies.insert(
            handle,
            Body {
                kind,
                kinematics,
                material,
                tag,
                particle_ids: (first_id..first_id + sampled.len() as u32).collect(),
            },
        );

        if let Err(err) = self.state.ensure_window() {
            self.state.bodies.remove(&handle);
            self.state.particles = backup;
            self.state.offset = offset;
            self.state.grid.relocate(window);
            self.state.rebuild_fine_grid();
            return Err(err.into());
        }

        self.next_body += 1;
        self.next_particle_id += sampled.len() as u32;
        info!("added body {:?} with {} particles", handle, sampled.len());
        Ok(handle)
    }

    fn num_mesh_elements(&self) -> usize {
        self.state
            .bodies
            .values()
            .map(|body| match &body.kind {
                BodyKind::Mesh { elements } => elements.len(),
                BodyKind::Sampled => 0,
            })
            .sum()
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.state.bodies.get(&handle)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &Body)> {
        self.state.bodies.iter().map(|(&h, b)| (h, b))
    }

    /// Removes the body and all of its particles. Triggers report the exits on the next step.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<()> {
        if self.state.bodies.remove(&handle).is_none() {
            return Err(SimulationError::UnknownBody(handle));
        }
        self.state.particles.mark_body_removed(handle);
        let removed = self.state.particles.compact();
        info!("removed body {:?} with {} particles", handle, removed);
        Ok(())
    }

    /// Switches the material of all particles of the body. Masses follow the new density.
    pub fn set_body_material(&mut self, handle: BodyHandle, material: MaterialId) -> Result<()> {
        let density = self
            .material(material)
            .ok_or(SimulationError::UnknownMaterial(material))?
            .density;
        let body = self
            .state
            .bodies
            .get_mut(&handle)
            .ok_or(SimulationError::UnknownBody(handle))?;
        body.material = material;

        let particles = &mut self.state.particles;
        for p in 0..particles.len() {
            if particles.body[p] == handle {
                particles.material[p] = material;
                particles.mass[p] = particles.volume0[p] * density;
            }
        }
        Ok(())
    }

    pub fn set_body_tag(&mut self, handle: BodyHandle, tag: u32) -> Result<()> {
        let body = self
            .state
            .bodies
            .get_mut(&handle)
            .ok_or(SimulationError::UnknownBody(handle))?;
        body.tag = tag;

        let particles = &mut self.state.particles;
        for (b, t) in particles.body.iter().zip(particles.tag.iter_mut()) {
            if *b == handle {
                *t = tag;
            }
        }
        Ok(())
    }

    fn body_particles(&self, handle: BodyHandle) -> Result<Vec<usize>> {
        if !self.state.bodies.contains_key(&handle) {
            return Err(SimulationError::UnknownBody(handle));
        }
        Ok((0..self.state.particles.len())
            .filter(|&p| self.state.particles.body[p] == handle)
            .collect())
    }

    /// Changes the momentum of the body by `impulse`, spread evenly over its mass.
    pub fn apply_linear_impulse(&mut self, handle: BodyHandle, impulse: V2) -> Result<()> {
        let indices = self.body_particles(handle)?;
        let particles = &mut self.state.particles;
        let mass: FT = indices.iter().map(|&p| particles.mass[p]).sum();
        if mass <= 0. {
            return Ok(());
        }
        let dv = impulse / mass;
        for &p in &indices {
            particles.velocity[p] += dv;
        }
        Ok(())
    }

    /// Changes the angular momentum of the body around its centre of mass by `impulse`.
    pub fn apply_angular_impulse(&mut self, handle: BodyHandle, impulse: FT) -> Result<()> {
        let indices = self.body_particles(handle)?;
        let particles = &mut self.state.particles;

        let mass: FT = indices.iter().map(|&p| particles.mass[p]).sum();
        if mass <= 0. {
            return Ok(());
        }
        let centre = indices
            .iter()
            .fold(V2::zeros(), |acc, &p| acc + particles.position[p] * particles.mass[p])
            / mass;
        let inertia: FT = indices
            .iter()
            .map(|&p| particles.mass[p] * (particles.position[p] - centre).norm_squared())
            .sum();
        if inertia <= 0. {
            return Ok(());
        }

        let omega = impulse / inertia;
        for &p in &indices {
            let r = particles.position[p] - centre;
            particles.velocity[p] += vec2f(-r.y, r.x) * omega;
        }
        Ok(())
    }

    /// Spreads `impulse` over all dynamic particles within `radius` of `centre`.
    ///
    /// Returns the number of affected particles.
    pub fn apply_impulse_in_circular_area(&mut self, impulse: V2, centre: V2D, radius: FT) -> usize {
        let centre = world_to_local(self.state.offset, centre);
        let particles = &mut self.state.particles;
        let indices: Vec<usize> = (0..particles.len())
            .filter(|&p| particles.dynamic[p] && (particles.position[p] - centre).norm() <= radius)
            .collect();

        let mass: FT = indices.iter().map(|&p| particles.mass[p]).sum();
        if mass <= 0. {
            return 0;
        }
        let dv = impulse / mass;
        for &p in &indices {
            particles.velocity[p] += dv;
        }
        indices.len()
    }

    // ---------------------------------------------------------------------------------------
    // colliders

    pub fn add_collider(
        &mut self,
        shape: Shape,
        kinematics: Kinematics,
        parameter: CollisionParameter,
    ) -> std::result::Result<ColliderHandle, ConfigError> {
        shape.validate()?;
        let handle = ColliderHandle(self.next_collider);
        self.next_collider += 1;

        self.state
            .fine_grid
            .insert(ShapeKey::Collider(handle), &shape, &kinematics, self.state.offset);
        self.state
            .colliders
            .insert(handle, Collider::new(shape, kinematics, parameter));
        info!("added collider {:?} ({:?})", handle, parameter.collision_type);
        Ok(handle)
    }

    /// Returns `false` if there was no such collider.
    pub fn remove_collider(&mut self, handle: ColliderHandle) -> bool {
        self.state.fine_grid.remove(ShapeKey::Collider(handle));
        self.state.colliders.remove(&handle).is_some()
    }

    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.state.colliders.get(&handle)
    }

    fn update_collider(&mut self, handle: ColliderHandle, f: impl FnOnce(&mut Collider)) -> bool {
        let collider = match self.state.colliders.get_mut(&handle) {
            Some(collider) => collider,
            None => return false,
        };
        f(collider);
        let key = ShapeKey::Collider(handle);
        self.state.fine_grid.remove(key);
        self.state
            .fine_grid
            .insert(key, &collider.shape, &collider.kinematics, self.state.offset);
        true
    }

    pub fn set_collider_position(&mut self, handle: ColliderHandle, center: V2D) -> bool {
        self.update_collider(handle, |c| c.kinematics.center = center)
    }

    pub fn set_collider_rotation(&mut self, handle: ColliderHandle, rotation: FT) -> bool {
        self.update_collider(handle, |c| c.kinematics.rotation = rotation)
    }

    pub fn set_collider_linear_velocity(&mut self, handle: ColliderHandle, velocity: V2) -> bool {
        self.update_collider(handle, |c| c.kinematics.linear_velocity = velocity)
    }

    pub fn set_collider_angular_velocity(&mut self, handle: ColliderHandle, velocity: FT) -> bool {
        self.update_collider(handle, |c| c.kinematics.angular_velocity = velocity)
    }

    pub fn set_collider_parameter(&mut self, handle: ColliderHandle, parameter: CollisionParameter) -> bool {
        self.update_collider(handle, |c| c.parameter = parameter)
    }

    // ---------------------------------------------------------------------------------------
    // triggers

    pub fn add_trigger(
        &mut self,
        shape: Shape,
        kinematics: Kinematics,
        callbacks: TriggerCallbacks,
    ) -> std::result::Result<TriggerHandle, ConfigError> {
        shape.validate()?;
        Capacity::check(
            "triggers",
            self.state.triggers.len(),
            1,
            self.state.config.capacity.max_triggers,
        )?;
        let handle = TriggerHandle(self.next_trigger);
        self.next_trigger += 1;

        self.state
            .fine_grid
            .insert(ShapeKey::Trigger(handle), &shape, &kinematics, self.state.offset);
        self.state.triggers.insert(handle, Trigger::new(shape, kinematics));
        self.callbacks.insert(handle, callbacks);
        info!("added trigger {:?}", handle);
        Ok(handle)
    }

    /// Drops the trigger together with its callbacks. No exit events are reported.
    pub fn remove_trigger(&mut self, handle: TriggerHandle) -> bool {
        self.state.fine_grid.remove(ShapeKey::Trigger(handle));
        self.callbacks.remove(&handle);
        self.state.triggers.remove(&handle).is_some()
    }

    pub fn trigger(&self, handle: TriggerHandle) -> Option<&Trigger> {
        self.state.triggers.get(&handle)
    }

    fn update_trigger(&mut self, handle: TriggerHandle, f: impl FnOnce(&mut Trigger)) -> bool {
        let trigger = match self.state.triggers.get_mut(&handle) {
            Some(trigger) => trigger,
            None => return false,
        };
        f(trigger);
        let key = ShapeKey::Trigger(handle);
        self.state.fine_grid.remove(key);
        self.state
            .fine_grid
            .insert(key, &trigger.shape, &trigger.kinematics, self.state.offset);
        true
    }

    pub fn set_trigger_position(&mut self, handle: TriggerHandle, center: V2D) -> bool {
        self.update_trigger(handle, |t| t.kinematics.center = center)
    }

    pub fn set_trigger_rotation(&mut self, handle: TriggerHandle, rotation: FT) -> bool {
        self.update_trigger(handle, |t| t.kinematics.rotation = rotation)
    }

    /// Particle ids inside the trigger as of the last step.
    pub fn query(&self, handle: TriggerHandle) -> Option<Vec<u32>> {
        self.trigger(handle).map(|t| t.inside().keys().copied().collect())
    }

    /// Indices of the particles the trigger currently contains, optionally filtered by `(query, mask)`.
    fn particles_in_trigger(&self, handle: TriggerHandle, tag_filter: Option<(u32, u32)>) -> Vec<usize> {
        let trigger = match self.trigger(handle) {
            Some(trigger) => trigger,
            None => return Vec::new(),
        };
        let particles = &self.state.particles;
        let offset = self.state.offset;
        (0..particles.len())
            .into_par_iter()
            .filter(|&p| {
                tag_filter.map_or(true, |(query, mask)| tag_matches(particles.tag[p], query, mask))
                    && trigger
                        .shape
                        .contains(&trigger.kinematics, offset, particles.position[p])
            })
            .collect()
    }

    /// Ids of the particles currently inside the trigger volume.
    pub fn query_trigger_overlapped(&self, handle: TriggerHandle) -> Vec<u32> {
        self.particles_in_trigger(handle, None)
            .into_iter()
            .map(|p| self.state.particles.id[p])
            .collect()
    }

    pub fn query_trigger_overlapped_by_tag(&self, handle: TriggerHandle, tag: u32, mask: u32) -> Vec<u32> {
        self.particles_in_trigger(handle, Some((tag, mask)))
            .into_iter()
            .map(|p| self.state.particles.id[p])
            .collect()
    }

    pub fn query_particle_num_in_trigger(&self, handle: TriggerHandle) -> usize {
        self.particles_in_trigger(handle, None).len()
    }

    pub fn query_particle_num_in_trigger_by_tag(&self, handle: TriggerHandle, tag: u32, mask: u32) -> usize {
        self.particles_in_trigger(handle, Some((tag, mask))).len()
    }

    fn remove_particles(&mut self, indices: &[usize]) -> usize {
        if indices.is_empty() {
            return 0;
        }
        let particles = &mut self.state.particles;
        for &p in indices {
            particles.removed[p] = true;
        }
        let removed = particles.compact();
        let alive: HashSet<u32> = particles.id.iter().copied().collect();
        for body in self.state.bodies.values_mut() {
            body.retain_particles(|id| alive.contains(&id));
        }
        removed
    }

    /// Returns the number of removed particles.
    pub fn remove_particles_in_trigger(&mut self, handle: TriggerHandle) -> usize {
        let indices = self.particles_in_trigger(handle, None);
        self.remove_particles(&indices)
    }

    pub fn remove_particles_in_trigger_by_tag(&mut self, handle: TriggerHandle, tag: u32, mask: u32) -> usize {
        let indices = self.particles_in_trigger(handle, Some((tag, mask)));
        self.remove_particles(&indices)
    }

    /// Calls `f` for every particle inside the trigger volume and writes the changes back.
    ///
    /// Returns the number of visited particles.
    pub fn manipulate_particles_in_trigger(
        &mut self,
        handle: TriggerHandle,
        mut f: impl FnMut(&mut ParticleView),
    ) -> usize {
        let indices = self.particles_in_trigger(handle, None);
        let offset = self.state.offset;
        let particles = &mut self.state.particles;

        let mut removed = Vec::new();
        for &p in &indices {
            let mut view = ParticleView {
                id: particles.id[p],
                position: local_to_world(offset, particles.position[p]),
                velocity: particles.velocity[p],
                tag: particles.tag[p],
                remove: false,
            };
            f(&mut view);
            particles.position[p] = world_to_local(offset, view.position);
            particles.velocity[p] = view.velocity;
            particles.tag[p] = view.tag;
            if view.remove {
                removed.push(p);
            }
        }

        self.remove_particles(&removed);
        indices.len()
    }

    // ---------------------------------------------------------------------------------------
    // stepping

    /// Advances the world by `dt` and dispatches the trigger callbacks of this step.
    ///
    /// On error nothing changed and no callback was invoked.
    pub fn step(&mut self, dt: FT) -> Result<()> {
        let events = self.integrator.step(&mut self.state, dt)?;
        for event in &events {
            if let Some(callbacks) = self.callbacks.get_mut(&event.trigger) {
                callbacks.dispatch(event);
            }
        }
        self.last_events = events;
        Ok(())
    }

    /// Trigger transitions of the last successful step.
    pub fn last_trigger_events(&self) -> &[TriggerEvent] {
        &self.last_events
    }

    pub fn set_gravity(&mut self, gravity: V2) {
        self.state.config.gravity = gravity;
    }

    pub fn set_substeps(&mut self, substeps: u32) -> std::result::Result<(), ConfigError> {
        if substeps == 0 {
            return Err(ConfigError::ZeroSubsteps);
        }
        self.state.config.substeps = substeps;
        Ok(())
    }

    /// `None` leaves the substep length to [`World::set_substeps`] alone.
    pub fn set_max_substep_dt(&mut self, max_substep_dt: Option<FT>) -> std::result::Result<(), ConfigError> {
        self.update_config(|config| config.max_substep_dt = max_substep_dt)
    }

    pub fn set_mesh_body_force_scale(&mut self, scale: FT) -> std::result::Result<(), ConfigError> {
        self.update_config(|config| config.mesh_body_force_scale = scale)
    }

    pub fn set_collision_penalty(&mut self, penalty: CollisionPenalty) -> std::result::Result<(), ConfigError> {
        self.update_config(|config| config.collision_penalty = penalty)
    }

    /// The new extent applies from the next step on.
    pub fn set_world_extent(&mut self, extent: WorldExtent) -> std::result::Result<(), ConfigError> {
        self.update_config(|config| config.extent = extent)
    }

    fn update_config(&mut self, f: impl FnOnce(&mut WorldConfig)) -> std::result::Result<(), ConfigError> {
        let mut config = self.state.config;
        f(&mut config);
        config.validate()?;
        self.state.config = config;
        Ok(())
    }

    /// Re-anchors the local frame at `offset`. World-space positions do not change.
    pub fn set_world_offset(&mut self, offset: V2D) -> Result<()> {
        let old_offset = self.state.offset;
        let window = *self.state.grid.window();
        let backup = self.state.particles.position.clone();

        if let Err(err) = self.state.set_offset(offset) {
            self.state.particles.position = backup;
            self.state.offset = old_offset;
            self.state.grid.relocate(window);
            self.state.rebuild_fine_grid();
            return Err(err.into());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------
    // export

    pub fn export(&self, selection: AttributeSelection) -> ParticleSnapshot {
        ParticleSnapshot::capture(&self.state.particles, self.state.offset, selection)
    }

    pub fn grid_window(&self) -> GridWindowInfo {
        GridWindowInfo::capture(&self.state.grid, self.state.offset)
    }

    pub fn fine_grid_buffers(&self) -> FineGridBuffers {
        FineGridBuffers::capture(&self.state.fine_grid, self.state.offset)
    }

    /// Colliders and triggers whose shape contains the world-space point `position`.
    pub fn shapes_at(&self, position: V2D) -> Vec<ShapeKey> {
        let x = world_to_local(self.state.offset, position);
        self.state
            .fine_grid
            .query_overlapping(x, &self.state.colliders, &self.state.triggers, self.state.offset)
    }

    pub fn statistics(&self) -> String {
        write_statistics(self.integrator.scheduler().pcounters(), self.integrator.vcounters())
    }
}
