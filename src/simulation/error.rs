//! Error types of the simulation kernel.
//!
//! - **ConfigError**: rejected configuration or body/shape input. Nothing is created.
//! - **SimulationError**: a rejected `World` operation. The world stays in its last committed state.

use thiserror::Error;

use crate::{
    body::BodyHandle, floating_type_mod::FT, material::MaterialId, scheduler::Phase,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("cell size must be positive and finite, got {0}")]
    NonPositiveCellSize(FT),

    #[error("substep count must be at least 1")]
    ZeroSubsteps,

    #[error("maximum substep time step must be positive and finite, got {0}")]
    InvalidMaxSubstepDt(FT),

    #[error("grid resolution {resolution} is outside of the allowed range {min}..={max}")]
    InvalidGridResolution { resolution: usize, min: usize, max: usize },

    #[error("world extent is degenerate: min=({min_x}, {min_y}) max=({max_x}, {max_y})")]
    DegenerateExtent { min_x: f64, min_y: f64, max_x: f64, max_y: f64 },

    #[error("fine grid scale must be at least 1")]
    ZeroFineGridScale,

    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    #[error("particle {index} has non-positive mass {mass}")]
    NonPositiveParticleMass { index: usize, mass: FT },

    #[error("particle {index} has non-positive volume {volume}")]
    NonPositiveParticleVolume { index: usize, volume: FT },

    #[error("body source produced no particles")]
    EmptyBody,

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("mesh body force scale must be non-negative and finite, got {0}")]
    InvalidForceScale(FT),

    #[error("collision penalty scales must be non-negative and finite, got ({along_normal}, {along_velocity})")]
    InvalidCollisionPenalty { along_normal: FT, along_velocity: FT },

    #[error("the world already holds the maximum of {limit} {what}")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("active region needs {required} grid cells along an axis, the configured limit is {limit}")]
    ActiveRegionExceedsGridLimit { required: usize, limit: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(FT),

    #[error("unknown body {0:?}")]
    UnknownBody(BodyHandle),

    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialId),

    #[error("particle {particle_id} reached a non-finite state during {phase:?}")]
    NonFiniteState { particle_id: u32, phase: Phase },
}

pub type Result<T> = std::result::Result<T, SimulationError>;
