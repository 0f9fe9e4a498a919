//! Turns a [`BodySource`] into particles in the body frame.

use crate::{
    body::BodySource,
    error::ConfigError,
    floating_type_mod::FT,
    shape::{Shape, ShapeTrait},
    vec2f, M2, V2,
};

/// A triangle of a sampled mesh, indexing into [`SampledBody::positions`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledElement {
    pub vertices: [usize; 3],
    pub dm_inv: M2,
    pub rest_area: FT,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampledBody {
    pub positions: Vec<V2>,
    pub volumes: Vec<FT>,
    pub elements: Vec<SampledElement>,
}

impl SampledBody {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// `spacing` is the lattice distance used for shapes and the particle size of point sources.
pub fn sample(source: &BodySource, spacing: FT) -> Result<SampledBody, ConfigError> {
    let sampled = match source {
        BodySource::Shape(shape) => sample_shape(shape, spacing)?,
        BodySource::Points(points) => SampledBody {
            positions: points.clone(),
            volumes: vec![spacing * spacing; points.len()],
            elements: Vec::new(),
        },
        BodySource::Mesh { vertices, indices } => sample_mesh(vertices, indices)?,
    };

    if sampled.is_empty() {
        return Err(ConfigError::EmptyBody);
    }
    Ok(sampled)
}

/// Lattice points inside the shape, placed symmetrically around the body origin.
pub fn sample_shape(shape: &Shape, spacing: FT) -> Result<SampledBody, ConfigError> {
    shape.validate()?;

    let h = shape.half_extent_local();
    let n = (h / spacing).map(|c| c.ceil() as i32);
    let mut positions = Vec::new();
    for j in -n.y..n.y {
        for i in -n.x..n.x {
            let x = vec2f((i as FT + 0.5) * spacing, (j as FT + 0.5) * spacing);
            if shape.sdf_local(x) < 0. {
                positions.push(x);
            }
        }
    }

    Ok(SampledBody {
        volumes: vec![spacing * spacing; positions.len()],
        positions,
        elements: Vec::new(),
    })
}

/// One particle per vertex. Each vertex gets a third of the area of every adjacent triangle.
pub fn sample_mesh(vertices: &[V2], indices: &[[u32; 3]]) -> Result<SampledBody, ConfigError> {
    if indices.is_empty() {
        return Err(ConfigError::InvalidMesh("mesh has no triangles".to_string()));
    }

    let mut volumes = vec![0.; vertices.len()];
    let mut elements = Vec::with_capacity(indices.len());

    for (t, triangle) in indices.iter().enumerate() {
        let mut idx = [0usize; 3];
        for k in 0..3 {
            idx[k] = triangle[k] as usize;
            if idx[k] >= vertices.len() {
                return Err(ConfigError::InvalidMesh(format!(
                    "triangle {} references vertex {}, but the mesh has {} vertices",
                    t,
                    triangle[k],
                    vertices.len()
                )));
            }
        }

        let e1 = vertices[idx[1]] - vertices[idx[0]];
        let e2 = vertices[idx[2]] - vertices[idx[0]];
        let dm = M2::from_columns(&[e1, e2]);
        let rest_area = 0.5 * dm.determinant().abs();
        let dm_inv = match dm.try_inverse() {
            Some(dm_inv) if rest_area > 1e-12 => dm_inv,
            _ => return Err(ConfigError::InvalidMesh(format!("triangle {} is degenerate", t))),
        };

        for &i in &idx {
            volumes[i] += rest_area / 3.;
        }
        elements.push(SampledElement {
            vertices: idx,
            dm_inv,
            rest_area,
        });
    }

    if let Some(unused) = volumes.iter().position(|&v| v <= 0.) {
        return Err(ConfigError::InvalidMesh(format!(
            "vertex {} is not part of any triangle",
            unused
        )));
    }

    Ok(SampledBody {
        positions: vertices.to_vec(),
        volumes,
        elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assert_ft_approx_eq,
        shape::{BoxShape, CircleShape},
    };

    #[test]
    fn box_sampling_fills_the_area() {
        let spacing = 0.05;
        let sampled = sample(&BodySource::Shape(BoxShape::new(vec2f(0.5, 0.25)).into()), spacing).unwrap();
        assert_eq!(sampled.len(), 20 * 10);
        let volume: FT = sampled.volumes.iter().sum();
        assert_ft_approx_eq(volume, 0.5, 1e-4, || "sampled volume".to_string());

        // symmetric around the origin
        let centroid = sampled.positions.iter().fold(V2::zeros(), |acc, x| acc + x) / sampled.len() as FT;
        assert!(centroid.norm() < 1e-5);
    }

    #[test]
    fn circle_sampling_approximates_area() {
        let spacing = 0.01;
        let shape: Shape = CircleShape::new(0.2).into();
        let sampled = sample_shape(&shape, spacing).unwrap();
        let volume: FT = sampled.volumes.iter().sum();
        assert_ft_approx_eq(volume, shape.area(), shape.area() * 0.03, || "circle volume".to_string());
    }

    #[test]
    fn tiny_shapes_are_empty_bodies() {
        let source = BodySource::Shape(CircleShape::new(0.001).into());
        assert_eq!(sample(&source, 0.1), Err(ConfigError::EmptyBody));
        assert_eq!(sample(&BodySource::Points(Vec::new()), 0.1), Err(ConfigError::EmptyBody));
    }

    #[test]
    fn mesh_volumes_are_lumped() {
        let vertices = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(1., 1.), vec2f(0., 1.)];
        let sampled = sample_mesh(&vertices, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        assert_eq!(sampled.elements.len(), 2);
        assert_ft_approx_eq(sampled.volumes[0], 1. / 3., 1e-6, || "shared vertex".to_string());
        assert_ft_approx_eq(sampled.volumes[1], 1. / 6., 1e-6, || "corner vertex".to_string());
        assert_ft_approx_eq(sampled.volumes.iter().sum::<FT>(), 1., 1e-6, || "total".to_string());
    }

    #[test]
    fn malformed_meshes_are_rejected() {
        let vertices = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(2., 0.), vec2f(5., 5.)];
        assert!(matches!(
            sample_mesh(&vertices, &[[0, 1, 7]]),
            Err(ConfigError::InvalidMesh(_))
        ));
        assert!(matches!(
            sample_mesh(&vertices, &[[0, 1, 2]]),
            Err(ConfigError::InvalidMesh(_))
        ));
        // vertex 3 is left over
        let vertices = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(0., 1.), vec2f(5., 5.)];
        assert!(matches!(
            sample_mesh(&vertices, &[[0, 1, 2]]),
            Err(ConfigError::InvalidMesh(_))
        ));
    }
}
