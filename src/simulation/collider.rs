use serde::{Deserialize, Serialize};

use crate::{
    floating_type_mod::FT,
    shape::{Kinematics, Shape},
    V2, V2D,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColliderHandle(pub u32);

/// How a particle reacts on contact with a collider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionType {
    /// The relative velocity is removed completely.
    Sticky,
    /// The relative normal velocity is removed, the particle slides along the surface.
    Slip,
    /// Only approaching relative normal velocity is removed (and reflected by the restitution coefficient).
    Separate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionParameter {
    pub collision_type: CollisionType,

    /// Coulomb friction coefficient, commonly in [0, 1].
    #[serde(default)]
    pub friction_coeff: FT,

    /// Share of the approaching normal velocity that is reflected, commonly in [0, 1].
    #[serde(default)]
    pub restitution_coeff: FT,
}

impl CollisionParameter {
    pub fn new(collision_type: CollisionType, friction_coeff: FT, restitution_coeff: FT) -> CollisionParameter {
        CollisionParameter {
            collision_type,
            friction_coeff,
            restitution_coeff,
        }
    }
}

/// Penalty that drives grid nodes out of colliders they penetrate.
///
/// Both scales are the share of the penetration depth corrected per substep: `along_normal`
/// pushes the node outwards, `along_velocity` slows its motion relative to the collider.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionPenalty {
    pub along_normal: FT,
    pub along_velocity: FT,
}

impl CollisionPenalty {
    pub fn new(along_normal: FT, along_velocity: FT) -> CollisionPenalty {
        CollisionPenalty {
            along_normal,
            along_velocity,
        }
    }

    pub fn is_active(&self) -> bool {
        self.along_normal > 0. || self.along_velocity > 0.
    }
}

#[derive(Debug, Clone)]
pub struct Collider {
    pub shape: Shape,
    pub kinematics: Kinematics,
    pub parameter: CollisionParameter,
}

/// Scales the tangential velocity `vt` down by the Coulomb friction of an impact with normal speed `vn`.
fn apply_friction(vt: V2, vn: FT, friction_coeff: FT) -> V2 {
    let vt_len = vt.norm();
    if vt_len <= 0. {
        return vt;
    }
    vt * FT::max(0., 1. - friction_coeff * vn.abs() / vt_len)
}

impl Collider {
    pub fn new(shape: Shape, kinematics: Kinematics, parameter: CollisionParameter) -> Collider {
        Collider {
            shape,
            kinematics,
            parameter,
        }
    }

    /// Projects `velocity` of a grid node at `position` that lies inside (or on) the collider
    /// and applies the penetration `penalty` of a substep of length `dt`.
    ///
    /// Returns `None` if the point is outside.
    pub fn resolve_velocity(
        &self,
        offset: V2D,
        position: V2,
        velocity: V2,
        penalty: &CollisionPenalty,
        dt: FT,
    ) -> Option<V2> {
        let phi = self.shape.sdf(&self.kinematics, offset, position);
        if phi > 0. {
            return None;
        }
        let v = self.project_velocity(offset, position, velocity);
        if !penalty.is_active() || !(dt > 0.) {
            return Some(v);
        }

        let depth = -phi;
        let collider_velocity = self.kinematics.velocity_at(offset, position);
        let mut v_rel = v - collider_velocity;
        let speed = v_rel.norm();
        if speed > 0. {
            v_rel -= v_rel * (FT::min(speed, penalty.along_velocity * depth / dt) / speed);
        }
        let n = self.shape.normal(&self.kinematics, offset, position);
        v_rel += n * (penalty.along_normal * depth / dt);
        Some(v_rel + collider_velocity)
    }

    /// Resolves a penetrating particle: pushes it back onto the surface along the normal
    /// and projects its velocity.
    ///
    /// Returns `None` if the particle does not touch the collider.
    pub fn resolve(&self, offset: V2D, position: V2, velocity: V2) -> Option<(V2, V2)> {
        let phi = self.shape.sdf(&self.kinematics, offset, position);
        if phi > 0. {
            return None;
        }
        let n = self.shape.normal(&self.kinematics, offset, position);
        let new_position = position - n * phi;
        Some((new_position, self.project_velocity(offset, position, velocity)))
    }

    fn project_velocity(&self, offset: V2D, position: V2, velocity: V2) -> V2 {
        let collider_velocity = self.kinematics.velocity_at(offset, position);
        let v_rel = velocity - collider_velocity;
        let n = self.shape.normal(&self.kinematics, offset, position);
        let vn = v_rel.dot(&n);
        let vt = v_rel - n * vn;
        let p = self.parameter;

        let v_rel = match p.collision_type {
            CollisionType::Sticky => V2::zeros(),
            CollisionType::Slip => apply_friction(vt, vn, p.friction_coeff),
            CollisionType::Separate => {
                if vn < 0. {
                    apply_friction(vt, vn, p.friction_coeff) - n * (vn * p.restitution_coeff)
                } else {
                    v_rel
                }
            }
        };

        v_rel + collider_velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assert_ft_approx_eq,
        shape::{BoxShape, Mobility},
        vec2d, vec2f,
    };

    fn ground(collision_type: CollisionType, friction_coeff: FT, restitution_coeff: FT) -> Collider {
        Collider::new(
            BoxShape::new(vec2f(10., 1.)).into(),
            Kinematics::new(vec2d(0., -1.), Mobility::Static),
            CollisionParameter::new(collision_type, friction_coeff, restitution_coeff),
        )
    }

    #[test]
    fn particles_outside_are_untouched() {
        let collider = ground(CollisionType::Sticky, 0., 0.);
        assert_eq!(collider.resolve(vec2d(0., 0.), vec2f(0., 0.1), vec2f(0., -1.)), None);
    }

    #[test]
    fn sticky_removes_velocity_and_penetration() {
        let collider = ground(CollisionType::Sticky, 0., 0.);
        let (x, v) = collider.resolve(vec2d(0., 0.), vec2f(1., -0.05), vec2f(2., -1.)).unwrap();
        assert_ft_approx_eq(x.y, 0., 1e-6, || "pushed out".to_string());
        assert_eq!(v, V2::zeros());
    }

    #[test]
    fn slip_keeps_tangential_velocity_without_friction() {
        let collider = ground(CollisionType::Slip, 0., 0.);
        let (_, v) = collider.resolve(vec2d(0., 0.), vec2f(1., -0.05), vec2f(2., 1.)).unwrap();
        assert_ft_approx_eq(v.x, 2., 1e-6, || "tangential".to_string());
        assert_ft_approx_eq(v.y, 0., 1e-6, || "normal".to_string());
    }

    #[test]
    fn friction_is_bounded_by_normal_impact() {
        let collider = ground(CollisionType::Separate, 0.5, 0.);
        let (_, v) = collider.resolve(vec2d(0., 0.), vec2f(1., -0.01), vec2f(2., -1.)).unwrap();
        assert_ft_approx_eq(v.x, 1.5, 1e-6, || "friction".to_string());
        assert_ft_approx_eq(v.y, 0., 1e-6, || "normal".to_string());

        // strong friction stops the particle, but never reverses it
        let collider = ground(CollisionType::Separate, 10., 0.);
        let (_, v) = collider.resolve(vec2d(0., 0.), vec2f(1., -0.01), vec2f(2., -1.)).unwrap();
        assert_eq!(v.x, 0.);
    }

    #[test]
    fn separate_lets_particles_leave_and_bounce() {
        let collider = ground(CollisionType::Separate, 0., 0.5);
        let (_, v) = collider.resolve(vec2d(0., 0.), vec2f(1., -0.01), vec2f(0., 3.)).unwrap();
        assert_eq!(v, vec2f(0., 3.));

        let (_, v) = collider.resolve(vec2d(0., 0.), vec2f(1., -0.01), vec2f(0., -2.)).unwrap();
        assert_ft_approx_eq(v.y, 1., 1e-6, || "bounce".to_string());
    }

    #[test]
    fn moving_collider_drags_sticky_particles() {
        let mut collider = ground(CollisionType::Sticky, 0., 0.);
        collider.kinematics.mobility = Mobility::Kinematic;
        collider.kinematics.linear_velocity = vec2f(3., 0.);
        let v = collider
            .resolve_velocity(
                vec2d(0., 0.),
                vec2f(0., -0.5),
                vec2f(0., 0.),
                &CollisionPenalty::default(),
                1e-3,
            )
            .unwrap();
        assert_eq!(v, vec2f(3., 0.));
    }

    #[test]
    fn penalty_pushes_penetrating_nodes_out() {
        let collider = ground(CollisionType::Slip, 0., 0.);
        let offset = vec2d(0., 0.);
        let node = vec2f(1., -0.05);

        let v = collider
            .resolve_velocity(offset, node, vec2f(2., -1.), &CollisionPenalty::default(), 0.01)
            .unwrap();
        assert_ft_approx_eq(v.x, 2., 1e-5, || "no penalty, tangential".to_string());
        assert_ft_approx_eq(v.y, 0., 1e-5, || "no penalty, normal".to_string());

        // depth / dt = 5
        let penalty = CollisionPenalty::new(0.1, 0.1);
        let v = collider
            .resolve_velocity(offset, node, vec2f(2., -1.), &penalty, 0.01)
            .unwrap();
        assert_ft_approx_eq(v.x, 1.5, 1e-4, || "slowed along the velocity".to_string());
        assert_ft_approx_eq(v.y, 0.5, 1e-4, || "pushed along the normal".to_string());

        // the velocity part never reverses the motion
        let penalty = CollisionPenalty::new(0., 10.);
        let v = collider
            .resolve_velocity(offset, node, vec2f(2., 0.), &penalty, 0.01)
            .unwrap();
        assert_eq!(v, V2::zeros());
    }
}
