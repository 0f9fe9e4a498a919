//! In-memory snapshots of the simulation state.
//!
//! Only the attributes that were asked for are copied. Positions are converted to
//! world space, stresses to Cauchy stress.

use serde::{Deserialize, Serialize};

use crate::{
    background_grid::BackgroundGrid,
    body::BodyHandle,
    fine_grid::FineGrid,
    floating_type_mod::FT,
    local_to_world,
    material::MaterialId,
    particle::ParticleVec,
    trigger::TriggerHandle,
    M2, V, V2, V2D, VI2,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSelection {
    pub id: bool,
    pub position: bool,
    pub velocity: bool,
    pub tag: bool,
    pub mass: bool,

    /// Current volume `V0 * det(F)`.
    pub volume: bool,

    /// Cauchy stress `tau / det(F)`.
    pub stress: bool,

    pub deformation_gradient: bool,
    pub material: bool,
    pub body: bool,
}

impl AttributeSelection {
    pub fn all() -> AttributeSelection {
        AttributeSelection {
            id: true,
            position: true,
            velocity: true,
            tag: true,
            mass: true,
            volume: true,
            stress: true,
            deformation_gradient: true,
            material: true,
            body: true,
        }
    }

    pub fn positions() -> AttributeSelection {
        AttributeSelection {
            id: true,
            position: true,
            ..Default::default()
        }
    }
}

/// Column-wise particle attributes. A column is `None` if it was not selected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParticleSnapshot {
    pub len: usize,
    pub ids: Option<Vec<u32>>,
    pub positions: Option<Vec<V2D>>,
    pub velocities: Option<Vec<V2>>,
    pub tags: Option<Vec<u32>>,
    pub masses: Option<Vec<FT>>,
    pub volumes: Option<Vec<FT>>,
    pub stresses: Option<Vec<M2>>,
    pub deformation_gradients: Option<Vec<M2>>,
    pub materials: Option<Vec<MaterialId>>,
    pub bodies: Option<Vec<BodyHandle>>,
}

fn column<T>(selected: bool, f: impl FnOnce() -> Vec<T>) -> Option<Vec<T>> {
    if selected {
        Some(f())
    } else {
        None
    }
}

impl ParticleSnapshot {
    pub fn capture(particles: &ParticleVec, offset: V2D, selection: AttributeSelection) -> ParticleSnapshot {
        let deformation = &particles.deformation;
        ParticleSnapshot {
            len: particles.len(),
            ids: column(selection.id, || particles.id.clone()),
            positions: column(selection.position, || {
                particles.position.iter().map(|&x| local_to_world(offset, x)).collect()
            }),
            velocities: column(selection.velocity, || particles.velocity.clone()),
            tags: column(selection.tag, || particles.tag.clone()),
            masses: column(selection.mass, || particles.mass.clone()),
            volumes: column(selection.volume, || {
                particles
                    .volume0
                    .iter()
                    .zip(deformation.iter())
                    .map(|(&v0, d)| v0 * d.f.determinant())
                    .collect()
            }),
            stresses: column(selection.stress, || {
                deformation
                    .iter()
                    .map(|d| {
                        let j = d.f.determinant();
                        if j.abs() > 0. {
                            d.stress / j
                        } else {
                            M2::zeros()
                        }
                    })
                    .collect()
            }),
            deformation_gradients: column(selection.deformation_gradient, || {
                deformation.iter().map(|d| d.f).collect()
            }),
            materials: column(selection.material, || particles.material.clone()),
            bodies: column(selection.body, || particles.body.clone()),
        }
    }
}

/// Placement of the background grid window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridWindowInfo {
    pub origin_cell: VI2,
    pub resolution: V<usize, 2>,
    pub cell_size: FT,

    /// World-space position of node `origin_cell`.
    pub origin: V2D,
}

impl GridWindowInfo {
    pub fn capture(grid: &BackgroundGrid, offset: V2D) -> GridWindowInfo {
        let window = grid.window();
        GridWindowInfo {
            origin_cell: window.origin_cell,
            resolution: window.dims,
            cell_size: grid.cell_size(),
            origin: local_to_world(offset, grid.node_position(window.origin_cell)),
        }
    }
}

/// Per-cell debug view of the fine grid, row-major with x varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FineGridBuffers {
    pub size: V<usize, 2>,
    pub cell_size: FT,

    /// World-space position of the lower-left corner.
    pub origin: V2D,

    pub collider_count: Vec<u32>,

    /// Most recently added trigger of each cell.
    pub trigger_id: Vec<Option<TriggerHandle>>,
}

impl FineGridBuffers {
    pub fn capture(fine_grid: &FineGrid, offset: V2D) -> FineGridBuffers {
        FineGridBuffers {
            size: fine_grid.size(),
            cell_size: fine_grid.fine_cell_size(),
            origin: local_to_world(offset, fine_grid.origin()),
            collider_count: fine_grid.collider_count_buffer(),
            trigger_id: fine_grid.trigger_id_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_ft_approx_eq, vec2d, vec2f};

    fn particles() -> ParticleVec {
        let mut particles = ParticleVec::with_len(2);
        particles.id = vec![7, 9];
        particles.position = vec![vec2f(0.5, 0.25), vec2f(-1., 2.)];
        particles.volume0 = vec![0.5, 0.5];
        particles.deformation[1].f = M2::identity() * 2.;
        particles.deformation[1].stress = M2::identity() * 8.;
        particles
    }

    #[test]
    fn only_selected_columns_are_filled() {
        let snapshot = ParticleSnapshot::capture(&particles(), vec2d(100., 0.), AttributeSelection::positions());
        assert_eq!(snapshot.len, 2);
        assert_eq!(snapshot.ids, Some(vec![7, 9]));
        assert_eq!(snapshot.positions, Some(vec![vec2d(100.5, 0.25), vec2d(99., 2.)]));
        assert!(snapshot.velocities.is_none());
        assert!(snapshot.stresses.is_none());
    }

    #[test]
    fn volumes_and_stresses_use_the_current_configuration() {
        let snapshot = ParticleSnapshot::capture(&particles(), vec2d(0., 0.), AttributeSelection::all());
        let volumes = snapshot.volumes.unwrap();
        assert_ft_approx_eq(volumes[0], 0.5, 1e-6, || "undeformed volume".to_string());
        assert_ft_approx_eq(volumes[1], 2., 1e-6, || "stretched volume".to_string());

        let stresses = snapshot.stresses.unwrap();
        assert_eq!(stresses[0], M2::zeros());
        assert_ft_approx_eq(stresses[1][(0, 0)], 2., 1e-6, || "cauchy stress".to_string());
    }
}
