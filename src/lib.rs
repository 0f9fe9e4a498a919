/*!
2D soft-body simulation on the Material Point Method.

A [`World`] owns the particle store, the background transfer grid, the fine
collision grid, colliders and triggers. [`World::step`] advances everything
by one frame.
*/

mod platform;
mod simulation;

pub use simulation::*;

/// Avoids 'unused' warnings.
pub use platform::start;
