pub mod background_grid;
pub mod body;
pub mod boundary_policy;
pub mod collider;
pub mod concurrency;
pub mod counters;
pub mod error;
pub mod export;
pub mod fine_grid;
pub mod integrator;
pub mod kernels;
pub mod material;
pub mod mesh_forces;
pub mod particle;
pub mod sampling;
pub mod scene;
pub mod scheduler;
pub mod shape;
pub mod thread_safe_ptr;
pub mod trigger;
pub mod world;
pub mod world_config;

pub type IT = i32;

#[cfg(feature = "double-precision")]
pub mod floating_type_mod {
    pub type FT = f64;
    pub use std::f64::consts::PI;
}

#[cfg(not(feature = "double-precision"))]
pub mod floating_type_mod {
    pub type FT = f32;
    pub use std::f32::consts::PI;
}

use floating_type_mod::FT;

use nalgebra::{Matrix2, SVector};
use num_traits::Float;
use std::fmt::Display;

pub type V<T, const D: usize> = SVector<T, D>;

pub type V2 = V<FT, 2>;
pub type M2 = Matrix2<FT>;
pub type VI2 = V<IT, 2>;

/// World-space anchors (offset, extent, shape centres) always use double precision.
pub type V2D = V<f64, 2>;

pub fn vec2f(x: FT, y: FT) -> V2 {
    [x, y].into()
}

pub fn vec2d(x: f64, y: f64) -> V2D {
    [x, y].into()
}

pub fn vec2i(x: IT, y: IT) -> VI2 {
    [x, y].into()
}

/// Converts a local (offset-relative) position into world space.
pub fn local_to_world(offset: V2D, x: V2) -> V2D {
    offset + x.map(|c| c as f64)
}

/// Converts a world-space position into the local frame anchored at `offset`.
pub fn world_to_local(offset: V2D, x: V2D) -> V2 {
    (x - offset).map(|c| c as FT)
}

pub fn is_ft_approx_eq<FT: Float>(a: FT, b: FT, tolerance: FT) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<FT: Float + Display>(a: FT, b: FT, tolerance: FT, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}

pub use body::{BodyHandle, BodyKind, BodySource};
pub use boundary_policy::BoundaryPolicy;
pub use collider::{CollisionParameter, CollisionType, ColliderHandle};
pub use error::{ConfigError, SimulationError};
pub use export::{AttributeSelection, ParticleSnapshot};
pub use material::{Material, MaterialId, MaterialType};
pub use shape::{Kinematics, Mobility, Shape};
pub use trigger::{TriggerCallbacks, TriggerEvent, TriggerEventKind, TriggerHandle};
pub use world::World;
pub use world_config::{WorldConfig, WorldExtent};
