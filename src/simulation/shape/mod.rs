//! Rigid shapes used by colliders, triggers and shape-sampled bodies.
//!
//! Every shape is described in its own body frame (centred at the origin, unrotated)
//! by a signed distance function that is negative inside. [`Kinematics`] places it
//! in the world.

mod polygon;
mod primitives;

pub use polygon::PolygonShape;
pub use primitives::{BoxShape, CapsuleShape, CircleShape, EllipseShape};

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, floating_type_mod::FT, vec2d, vec2f, world_to_local, V2, V2D};

#[enum_dispatch]
pub trait ShapeTrait {
    /// Signed distance in the body frame. Negative inside.
    fn sdf_local(&self, x: V2) -> FT;

    /// Half size of the axis aligned bounding box in the body frame.
    fn half_extent_local(&self) -> V2;

    fn area(&self) -> FT;

    fn validate(&self) -> Result<(), ConfigError>;

    /// Outward unit normal in the body frame.
    fn normal_local(&self, x: V2) -> V2 {
        let eps = 1e-3 * self.half_extent_local().min().max(1e-3);
        let inv_2eps = 1. / (2. * eps);
        let gradient = vec2f(
            (self.sdf_local(x + vec2f(eps, 0.)) - self.sdf_local(x - vec2f(eps, 0.))) * inv_2eps,
            (self.sdf_local(x + vec2f(0., eps)) - self.sdf_local(x - vec2f(0., eps))) * inv_2eps,
        );
        let norm = gradient.norm();
        if norm > 0. {
            gradient / norm
        } else {
            vec2f(0., 1.)
        }
    }
}

#[enum_dispatch(ShapeTrait)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Box(BoxShape),
    Circle(CircleShape),
    Ellipse(EllipseShape),
    Capsule(CapsuleShape),
    Polygon(PolygonShape),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mobility {
    /// Never moves.
    Static,
    /// Moves with its prescribed velocities, unaffected by the simulation.
    Kinematic,
    /// Moves with the simulation.
    Dynamic,
}

/// Placement and motion of a body, collider or trigger.
///
/// For bodies only the initial state is meaningful: once simulated, every particle
/// carries its own velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    /// World-space centre.
    pub center: V2D,

    /// Radians, counter-clockwise.
    #[serde(default)]
    pub rotation: FT,

    #[serde(default = "zero_velocity")]
    pub linear_velocity: V2,

    #[serde(default)]
    pub angular_velocity: FT,

    pub mobility: Mobility,
}

fn zero_velocity() -> V2 {
    V2::zeros()
}

fn rotate(x: V2, angle: FT) -> V2 {
    let (s, c) = angle.sin_cos();
    vec2f(c * x.x - s * x.y, s * x.x + c * x.y)
}

impl Kinematics {
    pub fn new(center: V2D, mobility: Mobility) -> Kinematics {
        Kinematics {
            center,
            rotation: 0.,
            linear_velocity: V2::zeros(),
            angular_velocity: 0.,
            mobility,
        }
    }

    pub fn with_rotation(mut self, rotation: FT) -> Kinematics {
        self.rotation = rotation;
        self
    }

    pub fn with_velocity(mut self, linear_velocity: V2, angular_velocity: FT) -> Kinematics {
        self.linear_velocity = linear_velocity;
        self.angular_velocity = angular_velocity;
        self
    }

    /// Centre in the local frame anchored at `offset`.
    pub fn center_local(&self, offset: V2D) -> V2 {
        world_to_local(offset, self.center)
    }

    /// Local-frame point `x` expressed in the body frame.
    pub fn to_body_frame(&self, offset: V2D, x: V2) -> V2 {
        rotate(x - self.center_local(offset), -self.rotation)
    }

    /// Body-frame point `x` expressed in the local frame.
    pub fn from_body_frame(&self, offset: V2D, x: V2) -> V2 {
        rotate(x, self.rotation) + self.center_local(offset)
    }

    /// Rigid velocity `v + ω × r` at local-frame point `x`.
    pub fn velocity_at(&self, offset: V2D, x: V2) -> V2 {
        let r = x - self.center_local(offset);
        self.linear_velocity + vec2f(-r.y, r.x) * self.angular_velocity
    }

    pub fn is_moving(&self) -> bool {
        self.mobility != Mobility::Static && (self.linear_velocity != V2::zeros() || self.angular_velocity != 0.)
    }

    /// Moves the placement by its velocities. Static placements never move.
    pub fn advance(&mut self, dt: FT) {
        if self.mobility == Mobility::Static {
            return;
        }
        self.center += vec2d(self.linear_velocity.x as f64, self.linear_velocity.y as f64) * dt as f64;
        self.rotation += self.angular_velocity * dt;
    }
}

impl Shape {
    /// Signed distance of local-frame point `x` to the shape placed by `kinematics`.
    pub fn sdf(&self, kinematics: &Kinematics, offset: V2D, x: V2) -> FT {
        self.sdf_local(kinematics.to_body_frame(offset, x))
    }

    /// Outward unit normal at local-frame point `x`.
    pub fn normal(&self, kinematics: &Kinematics, offset: V2D, x: V2) -> V2 {
        rotate(self.normal_local(kinematics.to_body_frame(offset, x)), kinematics.rotation)
    }

    pub fn contains(&self, kinematics: &Kinematics, offset: V2D, x: V2) -> bool {
        self.sdf(kinematics, offset, x) <= 0.
    }

    /// Local-frame bounding box `(min, max)` of the placed shape.
    pub fn aabb(&self, kinematics: &Kinematics, offset: V2D) -> (V2, V2) {
        let h = self.half_extent_local();
        let mut min = vec2f(FT::INFINITY, FT::INFINITY);
        let mut max = vec2f(FT::NEG_INFINITY, FT::NEG_INFINITY);
        for corner in [vec2f(-h.x, -h.y), vec2f(h.x, -h.y), vec2f(h.x, h.y), vec2f(-h.x, h.y)] {
            let p = kinematics.from_body_frame(offset, corner);
            min = min.inf(&p);
            max = max.sup(&p);
        }
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_ft_approx_eq, floating_type_mod::PI};

    fn all_shapes() -> Vec<Shape> {
        vec![
            BoxShape::new(vec2f(0.5, 0.25)).into(),
            CircleShape::new(0.3).into(),
            EllipseShape::new(0.4, 0.2).into(),
            CapsuleShape::new(0.3, 0.1).into(),
            PolygonShape::new(vec![vec2f(-0.3, -0.2), vec2f(0.3, -0.2), vec2f(0., 0.4)])
                .unwrap()
                .into(),
        ]
    }

    #[test]
    fn centre_is_inside_every_shape() {
        for shape in all_shapes() {
            assert!(shape.sdf_local(V2::zeros()) < 0., "{:?}", shape);
            assert!(shape.sdf_local(vec2f(5., 5.)) > 0., "{:?}", shape);
            assert!(shape.validate().is_ok());
        }
    }

    #[test]
    fn normals_point_outwards() {
        for shape in all_shapes() {
            let h = shape.half_extent_local();
            let outside = vec2f(h.x * 2., 0.);
            let n = shape.normal_local(outside);
            assert!(n.x > 0.5, "{:?} has normal {:?}", shape, n);
            assert_ft_approx_eq(n.norm(), 1., 1e-4, || format!("normal length of {:?}", shape));
        }
    }

    #[test]
    fn placement_rotates_and_translates() {
        let shape: Shape = BoxShape::new(vec2f(1., 0.1)).into();
        let kinematics = Kinematics::new(vec2d(10., 5.), Mobility::Static).with_rotation(PI / 2.);
        let offset = vec2d(8., 0.);
        // the long axis now points along y
        assert!(shape.contains(&kinematics, offset, vec2f(2., 5.8)));
        assert!(!shape.contains(&kinematics, offset, vec2f(2.8, 5.)));

        let (min, max) = shape.aabb(&kinematics, offset);
        assert_ft_approx_eq(min.y, 4., 1e-4, || "aabb min".to_string());
        assert_ft_approx_eq(max.x, 2.1, 1e-4, || "aabb max".to_string());
    }

    #[test]
    fn rigid_velocity_includes_rotation() {
        let kinematics = Kinematics::new(vec2d(0., 0.), Mobility::Kinematic).with_velocity(vec2f(1., 0.), 2.);
        let v = kinematics.velocity_at(vec2d(0., 0.), vec2f(0., 1.));
        assert_ft_approx_eq(v.x, -1., 1e-6, || "v.x".to_string());
        assert_ft_approx_eq(v.y, 0., 1e-6, || "v.y".to_string());
    }

    #[test]
    fn static_placements_do_not_advance() {
        let mut static_kinematics = Kinematics::new(vec2d(1., 1.), Mobility::Static).with_velocity(vec2f(1., 0.), 1.);
        static_kinematics.advance(1.);
        assert_eq!(static_kinematics.center, vec2d(1., 1.));

        let mut moving = static_kinematics;
        moving.mobility = Mobility::Kinematic;
        moving.advance(0.5);
        assert_eq!(moving.center, vec2d(1.5, 1.));
        assert_eq!(moving.rotation, 0.5);
    }

    #[test]
    fn shapes_deserialize_from_tagged_yaml() {
        let shape: Shape = serde_yaml::from_str("type: circle\nradius: 0.5\n").unwrap();
        assert_eq!(shape, CircleShape::new(0.5).into());

        let shape: Shape = serde_yaml::from_str("type: polygon\nvertices: [[0, 0], [1, 0], [0, 1]]\n").unwrap();
        assert!(matches!(shape, Shape::Polygon(_)));

        assert!(serde_yaml::from_str::<Shape>("type: polygon\nvertices: [[0, 0], [1, 0]]\n").is_err());
    }
}
