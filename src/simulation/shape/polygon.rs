use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use super::ShapeTrait;
use crate::{error::ConfigError, floating_type_mod::FT, vec2f, V2};

/// Closed polygon in the body frame.
///
/// Edges run between points (0, 1), (1, 2), ..., (n-1, 0). Vertices are stored in
/// counter-clockwise order so that the interior lies on the left of every edge;
/// clockwise input is reversed on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolygonVertices", into = "PolygonVertices")]
pub struct PolygonShape {
    vertices: Vec<V2>,

    /// Sum of the outward normals of both edges adjacent to a vertex.
    vertex_pseudo_normal: Vec<V2>,

    normalized_edge_dir: Vec<V2>,

    half_extent: V2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolygonVertices {
    vertices: Vec<V2>,
}

impl TryFrom<PolygonVertices> for PolygonShape {
    type Error = ConfigError;

    fn try_from(value: PolygonVertices) -> Result<Self, Self::Error> {
        PolygonShape::new(value.vertices)
    }
}

impl From<PolygonShape> for PolygonVertices {
    fn from(value: PolygonShape) -> Self {
        PolygonVertices {
            vertices: value.vertices,
        }
    }
}

enum ClosestFeature {
    Vertex { vertex_idx: usize, dist_sq: FT, dir: V2 },

    // outward normal of the edge starting at the given vertex
    Edge { dist: FT, outward_normal: V2 },
}

fn rotate_right_90_degrees(v: V2) -> V2 {
    vec2f(v.y, -v.x)
}

fn signed_area(vertices: &[V2]) -> FT {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum::<FT>()
        * 0.5
}

impl PolygonShape {
    pub fn new(mut vertices: Vec<V2>) -> Result<PolygonShape, ConfigError> {
        if vertices.len() < 3 {
            return Err(ConfigError::InvalidShape(format!(
                "a polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !v.x.is_finite() || !v.y.is_finite()) {
            return Err(ConfigError::InvalidShape("polygon vertex is not finite".to_string()));
        }
        if signed_area(&vertices) < 0. {
            vertices.reverse();
        }

        let n = vertices.len();
        let mut normalized_edge_dir = Vec::with_capacity(n);
        for i in 0..n {
            let edge = vertices[(i + 1) % n] - vertices[i];
            if edge.norm_squared() <= 1e-10 {
                return Err(ConfigError::InvalidShape(format!("polygon edge {} has zero length", i)));
            }
            normalized_edge_dir.push(edge.normalize());
        }

        let mut vertex_pseudo_normal = Vec::with_capacity(n);
        for i in 0..n {
            let prev_edge_dir = normalized_edge_dir[if i == 0 { n - 1 } else { i - 1 }];
            let next_edge_dir = normalized_edge_dir[i];
            let pseudo_normal = rotate_right_90_degrees(prev_edge_dir) + rotate_right_90_degrees(next_edge_dir);

            // adjacent edges running back over each other enclose nothing
            if pseudo_normal.norm_squared() <= 1e-10 {
                return Err(ConfigError::InvalidShape(format!(
                    "polygon folds back onto itself at vertex {}",
                    i
                )));
            }
            vertex_pseudo_normal.push(pseudo_normal);
        }

        let half_extent = vertices.iter().fold(V2::zeros(), |acc, v| acc.sup(&v.abs()));

        Ok(PolygonShape {
            vertices,
            vertex_pseudo_normal,
            normalized_edge_dir,
            half_extent,
        })
    }

    pub fn vertices(&self) -> &[V2] {
        &self.vertices
    }

    fn find_closest_feature(&self, x: V2) -> ClosestFeature {
        let n = self.vertices.len();
        let mut closest = ClosestFeature::Vertex {
            vertex_idx: 0,
            dist_sq: FT::INFINITY,
            dir: V2::zeros(),
        };
        let mut min_dist_sq = FT::INFINITY;

        for edge_start_idx in 0..n {
            let edge_start = self.vertices[edge_start_idx];
            let edge_end = self.vertices[(edge_start_idx + 1) % n];
            let edge_len_sq = (edge_end - edge_start).norm_squared();
            let edge_dir = self.normalized_edge_dir[edge_start_idx];
            let dir = x - edge_start;
            let outward_normal = rotate_right_90_degrees(edge_dir);

            let projection_len = dir.dot(&edge_dir);
            if projection_len > 0. && projection_len * projection_len < edge_len_sq {
                let dist = dir.dot(&outward_normal);
                if dist * dist < min_dist_sq {
                    closest = ClosestFeature::Edge { dist, outward_normal };
                    min_dist_sq = dist * dist;
                }
            }

            let vertex_dist_sq = dir.norm_squared();
            if vertex_dist_sq < min_dist_sq {
                closest = ClosestFeature::Vertex {
                    vertex_idx: edge_start_idx,
                    dist_sq: vertex_dist_sq,
                    dir,
                };
                min_dist_sq = vertex_dist_sq;
            }
        }

        closest
    }

    /// Signed distance and outward normal.
    fn distance_with_normal(&self, x: V2) -> (FT, V2) {
        match self.find_closest_feature(x) {
            ClosestFeature::Vertex {
                vertex_idx,
                dist_sq,
                dir,
            } => {
                let sign = if self.vertex_pseudo_normal[vertex_idx].dot(&dir) >= 0. {
                    1.
                } else {
                    -1.
                };
                let dist = dist_sq.sqrt();
                if dist > 0. {
                    (dist * sign, dir * (sign / dist))
                } else {
                    (0., self.vertex_pseudo_normal[vertex_idx].normalize())
                }
            }
            ClosestFeature::Edge { dist, outward_normal } => (dist, outward_normal),
        }
    }
}

impl ShapeTrait for PolygonShape {
    fn sdf_local(&self, x: V2) -> FT {
        self.distance_with_normal(x).0
    }

    fn normal_local(&self, x: V2) -> V2 {
        self.distance_with_normal(x).1
    }

    fn half_extent_local(&self) -> V2 {
        self.half_extent
    }

    fn area(&self) -> FT {
        signed_area(&self.vertices)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // construction already validated the vertices
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_ft_approx_eq;

    fn unit_square_cw() -> Vec<V2> {
        vec![vec2f(-1., -1.), vec2f(-1., 1.), vec2f(1., 1.), vec2f(1., -1.)]
    }

    #[test]
    fn clockwise_input_is_reversed() {
        let polygon = PolygonShape::new(unit_square_cw()).unwrap();
        assert!(polygon.area() > 0.);
        assert_ft_approx_eq(polygon.area(), 4., 1e-5, || "area".to_string());
    }

    #[test]
    fn square_distances_and_normals() {
        let polygon = PolygonShape::new(unit_square_cw()).unwrap();
        assert_ft_approx_eq(polygon.sdf_local(vec2f(0., 0.)), -1., 1e-6, || "centre".to_string());
        assert_ft_approx_eq(polygon.sdf_local(vec2f(0.5, 3.)), 2., 1e-6, || "above".to_string());
        assert_ft_approx_eq(polygon.sdf_local(vec2f(4., 5.)), 5., 1e-5, || "corner".to_string());

        let n = polygon.normal_local(vec2f(0.2, -1.5));
        assert_ft_approx_eq(n.y, -1., 1e-6, || "bottom normal".to_string());
        let n = polygon.normal_local(vec2f(0.8, 0.1));
        assert_ft_approx_eq(n.x, 1., 1e-6, || "inside normal points to nearest edge".to_string());
    }

    #[test]
    fn degenerate_polygons_are_rejected() {
        assert!(PolygonShape::new(vec![vec2f(0., 0.), vec2f(1., 0.)]).is_err());
        assert!(PolygonShape::new(vec![vec2f(0., 0.), vec2f(0., 0.), vec2f(1., 1.)]).is_err());
    }
}
