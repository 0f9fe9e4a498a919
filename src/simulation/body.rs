use serde::{Deserialize, Serialize};

use crate::{
    floating_type_mod::FT,
    material::MaterialId,
    shape::{Kinematics, Mobility, Shape},
    M2, V2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

/// Where the particles of a new body come from. Coordinates are in the body frame
/// (relative to the body's [`Kinematics`] centre, before rotation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodySource {
    /// The shape's interior is sampled on a regular lattice.
    Shape(Shape),
    /// One particle per point.
    Points(Vec<V2>),
    /// One particle per vertex, held together by triangle elements.
    Mesh { vertices: Vec<V2>, indices: Vec<[u32; 3]> },
}

/// A triangle of a mesh body with its rest configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshElement {
    pub particle_ids: [u32; 3],

    /// Inverse of the rest edge matrix `[x1 - x0, x2 - x0]`.
    pub dm_inv: M2,

    pub rest_area: FT,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyKind {
    Sampled,
    Mesh { elements: Vec<MeshElement> },
}

#[derive(Debug, Clone)]
pub struct Body {
    pub kind: BodyKind,

    /// Initial placement. Non-dynamic bodies keep moving by it.
    pub kinematics: Kinematics,

    pub material: MaterialId,
    pub tag: u32,

    /// Ids of the particles still owned by this body.
    pub particle_ids: Vec<u32>,
}

impl Body {
    pub fn is_dynamic(&self) -> bool {
        self.kinematics.mobility == Mobility::Dynamic
    }

    /// Drops particle ids (and mesh elements referencing them) for which `alive` is false.
    pub fn retain_particles(&mut self, alive: impl Fn(u32) -> bool) {
        self.particle_ids.retain(|&id| alive(id));
        if let BodyKind::Mesh { elements } = &mut self.kind {
            elements.retain(|e| e.particle_ids.iter().all(|&id| alive(id)));
        }
    }
}
