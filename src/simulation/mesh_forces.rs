use std::collections::{BTreeMap, HashMap};

use crate::{
    body::{Body, BodyHandle, BodyKind, MeshElement},
    floating_type_mod::FT,
    material::{fixed_corotated_piola, Material},
    particle::ParticleVec,
    M2, V2,
};

/// Forces of one triangle on its three vertices (fixed corotated, linear FEM).
pub fn element_forces(element: &MeshElement, x: [V2; 3], mu: FT, lambda: FT) -> [V2; 3] {
    let ds = M2::from_columns(&[x[1] - x[0], x[2] - x[0]]);
    let f = ds * element.dm_inv;
    let p = fixed_corotated_piola(&f, mu, lambda);
    let h = p * element.dm_inv.transpose() * -element.rest_area;
    let f1: V2 = h.column(0).into();
    let f2: V2 = h.column(1).into();
    [-(f1 + f2), f1, f2]
}

/// Recomputes `element_force` of every mesh vertex. Other particles get zero.
///
/// Returns the number of elements that were evaluated.
pub fn accumulate_element_forces(
    particles: &mut ParticleVec,
    bodies: &BTreeMap<BodyHandle, Body>,
    materials: &[Material],
    scale: FT,
) -> usize {
    for f in particles.element_force.iter_mut() {
        *f = V2::zeros();
    }

    let has_mesh = bodies
        .values()
        .any(|b| b.is_dynamic() && matches!(b.kind, BodyKind::Mesh { .. }));
    if !has_mesh {
        return 0;
    }

    let index_of: HashMap<u32, usize> = particles.id.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut evaluated = 0;

    for body in bodies.values() {
        let elements = match &body.kind {
            BodyKind::Mesh { elements } if body.is_dynamic() => elements,
            _ => continue,
        };
        let (lambda, mu) = match materials.get(body.material.0 as usize) {
            Some(material) => material.lame(),
            None => continue,
        };

        for element in elements {
            let mut idx = [0usize; 3];
            let mut complete = true;
            for k in 0..3 {
                match index_of.get(&element.particle_ids[k]) {
                    Some(&i) if !particles.removed[i] => idx[k] = i,
                    _ => complete = false,
                }
            }
            if !complete {
                continue;
            }

            let x = [
                particles.position[idx[0]],
                particles.position[idx[1]],
                particles.position[idx[2]],
            ];
            let forces = element_forces(element, x, mu, lambda);
            for k in 0..3 {
                particles.element_force[idx[k]] += forces[k] * scale;
            }
            evaluated += 1;
        }
    }

    evaluated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{material::MaterialType, vec2f};

    fn unit_element() -> MeshElement {
        MeshElement {
            particle_ids: [0, 1, 2],
            dm_inv: M2::identity(),
            rest_area: 0.5,
        }
    }

    fn lame() -> (FT, FT) {
        Material::new(MaterialType::Elastic, 1., 1e3, 0.3).lame()
    }

    #[test]
    fn rest_shape_has_no_forces() {
        let (lambda, mu) = lame();
        let forces = element_forces(&unit_element(), [vec2f(0., 0.), vec2f(1., 0.), vec2f(0., 1.)], mu, lambda);
        for f in forces {
            assert!(f.norm() < 1e-3);
        }

        // rigid rotations are free as well
        let r = nalgebra::Rotation2::new(0.7 as FT).into_inner();
        let x = [V2::zeros(), r * vec2f(1., 0.), r * vec2f(0., 1.)];
        for f in element_forces(&unit_element(), x, mu, lambda) {
            assert!(f.norm() < 1e-2);
        }
    }

    #[test]
    fn stretched_element_pulls_back_without_net_force() {
        let (lambda, mu) = lame();
        let forces = element_forces(&unit_element(), [vec2f(0., 0.), vec2f(1.5, 0.), vec2f(0., 1.)], mu, lambda);
        assert!(forces[1].x < 0.);
        let net = forces[0] + forces[1] + forces[2];
        assert!(net.norm() < 1e-2);
    }
}
