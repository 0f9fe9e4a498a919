use crate::{floating_type_mod::FT, world_config::LocalExtent, V2};
use serde::{Deserialize, Serialize};

/// What happens to a particle whose position falls outside the World Extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Put the particle back onto the boundary and drop the outward velocity.
    Clamp,
    /// Remove the particle from the world.
    Remove,
    /// Re-enter on the opposite side of the extent.
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryOutcome {
    Inside,
    Moved { position: V2, velocity: V2 },
    Removed,
}

impl BoundaryPolicy {
    /// Decides the fate of a particle at `position` moving with `velocity`.
    ///
    /// Particles inside (or exactly on) the extent are always `Inside`.
    pub fn apply(self, extent: &LocalExtent, position: V2, velocity: V2) -> BoundaryOutcome {
        if extent.contains(position) {
            return BoundaryOutcome::Inside;
        }

        match self {
            BoundaryPolicy::Clamp => {
                let mut p = position;
                let mut v = velocity;
                for d in 0..2 {
                    if p[d] < extent.min[d] {
                        p[d] = extent.min[d];
                        v[d] = FT::max(v[d], 0.);
                    } else if p[d] > extent.max[d] {
                        p[d] = extent.max[d];
                        v[d] = FT::min(v[d], 0.);
                    }
                }
                BoundaryOutcome::Moved { position: p, velocity: v }
            }
            BoundaryPolicy::Remove => BoundaryOutcome::Removed,
            BoundaryPolicy::Wrap => {
                let mut p = position;
                for d in 0..2 {
                    let size = extent.max[d] - extent.min[d];
                    let rel = (p[d] - extent.min[d]).rem_euclid(size);
                    p[d] = extent.min[d] + rel;
                }
                BoundaryOutcome::Moved {
                    position: p,
                    velocity,
                }
            }
        }
    }
}
