use crate::{
    boundary_policy::BoundaryPolicy, collider::CollisionPenalty, error::ConfigError, floating_type_mod::FT,
    kernels::STENCIL_WIDTH, scheduler::BLOCK_SIZE, vec2d, vec2f, world_to_local, V2, V2D,
};
use serde::{Deserialize, Serialize};

/// The declared bounds of the world in world space.
///
/// Particles leaving this rectangle are handled by the [`BoundaryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldExtent {
    pub min: V2D,
    pub max: V2D,
}

impl WorldExtent {
    pub fn new(min: V2D, max: V2D) -> WorldExtent {
        WorldExtent { min, max }
    }

    /// The extent expressed in the local frame anchored at `offset`.
    pub fn to_local(&self, offset: V2D) -> LocalExtent {
        LocalExtent {
            min: world_to_local(offset, self.min),
            max: world_to_local(offset, self.max),
        }
    }

    pub fn size(&self) -> V2D {
        self.max - self.min
    }
}

/// [`WorldExtent`] relative to the current World Offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalExtent {
    pub min: V2,
    pub max: V2,
}

impl LocalExtent {
    pub fn contains(&self, x: V2) -> bool {
        x.x >= self.min.x && x.y >= self.min.y && x.x <= self.max.x && x.y <= self.max.y
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Edge length of a background grid cell in meters.
    pub cell_size: FT,

    #[serde(default = "default_gravity")]
    pub gravity: V2,

    /// Substeps per call of `World::step`.
    #[serde(default = "default_substeps")]
    pub substeps: u32,

    /// Upper bound for a single substep. Raises the substep count to `ceil(dt / max_substep_dt)` when set.
    /// Defaults to `1e-4`.
    #[serde(default = "default_max_substep_dt")]
    pub max_substep_dt: Option<FT>,

    /// Initial World Offset: the world-space point the local frame is anchored at.
    #[serde(default = "default_offset")]
    pub offset: V2D,

    pub extent: WorldExtent,

    /// Has no default on purpose: every world must choose how particles leaving the extent are treated.
    pub boundary_policy: BoundaryPolicy,

    /// Initial background grid window size in cells along each axis.
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: usize,

    /// Hard limit for the window size. Relocations that need more cells reject the step.
    #[serde(default = "default_max_grid_resolution")]
    pub max_grid_resolution: usize,

    /// Distance (in cells) from the window edge at which the window is relocated.
    #[serde(default = "default_relocation_margin")]
    pub relocation_margin: usize,

    /// Local-frame distance from the origin beyond which positions are rebased onto a new World Offset.
    #[serde(default = "default_rebase_distance")]
    pub rebase_distance: FT,

    /// Fine grid cells per background grid cell along each axis.
    #[serde(default = "default_fine_grid_scale")]
    pub fine_grid_scale: usize,

    /// Scale of the internal element force of mesh bodies.
    #[serde(default = "default_mesh_body_force_scale")]
    pub mesh_body_force_scale: FT,

    /// Penetration penalty on grid nodes inside colliders. Disabled by default.
    #[serde(default)]
    pub collision_penalty: CollisionPenalty,

    #[serde(default)]
    pub capacity: Capacity,

    #[serde(default)]
    pub statistics_enabled: bool,
}

/// Upper limits for the content of a world. Adding beyond them is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacity {
    pub max_particles: usize,
    pub max_bodies: usize,
    /// Triangles over all mesh bodies.
    pub max_elements: usize,
    pub max_triggers: usize,
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity {
            max_particles: 90_000,
            max_bodies: 10_000,
            max_elements: 10_000,
            max_triggers: 10_000,
        }
    }
}

impl Capacity {
    /// Fails with [`ConfigError::CapacityExceeded`] when `current + added` is above `limit`.
    pub fn check(what: &'static str, current: usize, added: usize, limit: usize) -> Result<(), ConfigError> {
        if current + added > limit {
            return Err(ConfigError::CapacityExceeded { what, limit });
        }
        Ok(())
    }
}

fn default_gravity() -> V2 {
    vec2f(0., -9.8)
}

fn default_substeps() -> u32 {
    1
}

fn default_max_substep_dt() -> Option<FT> {
    Some(1e-4)
}

fn default_offset() -> V2D {
    vec2d(0., 0.)
}

fn default_grid_resolution() -> usize {
    128
}

fn default_max_grid_resolution() -> usize {
    4096
}

fn default_relocation_margin() -> usize {
    4
}

fn default_rebase_distance() -> FT {
    1024.
}

fn default_fine_grid_scale() -> usize {
    4
}

fn default_mesh_body_force_scale() -> FT {
    1.
}

/// Smallest window that still fits one particle stencil plus a relocation margin on both sides.
pub fn min_grid_resolution(relocation_margin: usize) -> usize {
    let min = STENCIL_WIDTH + 2 * relocation_margin;
    ((min + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE
}

impl WorldConfig {
    /// A unit world with the given policy.
    pub fn new(boundary_policy: BoundaryPolicy) -> WorldConfig {
        WorldConfig {
            cell_size: 1. / 128.,
            gravity: default_gravity(),
            substeps: default_substeps(),
            max_substep_dt: default_max_substep_dt(),
            offset: default_offset(),
            extent: WorldExtent::new(vec2d(0., 0.), vec2d(1., 1.)),
            boundary_policy,
            grid_resolution: default_grid_resolution(),
            max_grid_resolution: default_max_grid_resolution(),
            relocation_margin: default_relocation_margin(),
            rebase_distance: default_rebase_distance(),
            fine_grid_scale: default_fine_grid_scale(),
            mesh_body_force_scale: default_mesh_body_force_scale(),
            collision_penalty: CollisionPenalty::default(),
            capacity: Capacity::default(),
            statistics_enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size > 0.) || !self.cell_size.is_finite() {
            return Err(ConfigError::NonPositiveCellSize(self.cell_size));
        }

        if self.substeps == 0 {
            return Err(ConfigError::ZeroSubsteps);
        }

        if let Some(max_substep_dt) = self.max_substep_dt {
            if !(max_substep_dt > 0.) || !max_substep_dt.is_finite() {
                return Err(ConfigError::InvalidMaxSubstepDt(max_substep_dt));
            }
        }

        let min_resolution = min_grid_resolution(self.relocation_margin);
        if self.grid_resolution < min_resolution || self.grid_resolution > self.max_grid_resolution {
            return Err(ConfigError::InvalidGridResolution {
                resolution: self.grid_resolution,
                min: min_resolution,
                max: self.max_grid_resolution,
            });
        }

        let size = self.extent.size();
        if !(size.x > 0.) || !(size.y > 0.) || !size.x.is_finite() || !size.y.is_finite() {
            return Err(ConfigError::DegenerateExtent {
                min_x: self.extent.min.x,
                min_y: self.extent.min.y,
                max_x: self.extent.max.x,
                max_y: self.extent.max.y,
            });
        }

        if self.fine_grid_scale == 0 {
            return Err(ConfigError::ZeroFineGridScale);
        }

        if !(self.mesh_body_force_scale >= 0.) || !self.mesh_body_force_scale.is_finite() {
            return Err(ConfigError::InvalidForceScale(self.mesh_body_force_scale));
        }

        let CollisionPenalty {
            along_normal,
            along_velocity,
        } = self.collision_penalty;
        let valid = |scale: FT| scale >= 0. && scale.is_finite();
        if !valid(along_normal) || !valid(along_velocity) {
            return Err(ConfigError::InvalidCollisionPenalty {
                along_normal,
                along_velocity,
            });
        }

        Ok(())
    }

    /// Number of substeps used to advance by `dt`.
    pub fn substep_count(&self, dt: FT) -> u32 {
        let by_dt = match self.max_substep_dt {
            Some(max_substep_dt) => (dt / max_substep_dt).ceil() as u32,
            None => 1,
        };
        u32::max(self.substeps, by_dt)
    }
}
