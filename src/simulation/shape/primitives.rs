use serde::{Deserialize, Serialize};

use super::ShapeTrait;
use crate::{error::ConfigError, floating_type_mod::FT, floating_type_mod::PI, vec2f, V2};

fn check_positive(name: &str, value: FT) -> Result<(), ConfigError> {
    if value > 0. && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidShape(format!("{} must be positive, got {}", name, value)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    pub half_extent: V2,
}

impl BoxShape {
    pub fn new(half_extent: V2) -> BoxShape {
        BoxShape { half_extent }
    }
}

impl ShapeTrait for BoxShape {
    fn sdf_local(&self, x: V2) -> FT {
        let q = x.abs() - self.half_extent;
        let outside = q.sup(&V2::zeros()).norm();
        let inside = FT::min(FT::max(q.x, q.y), 0.);
        outside + inside
    }

    fn normal_local(&self, x: V2) -> V2 {
        let q = x.abs() - self.half_extent;
        let n = if q.x > 0. || q.y > 0. {
            let outside = q.sup(&V2::zeros());
            outside / outside.norm()
        } else if q.x > q.y {
            vec2f(1., 0.)
        } else {
            vec2f(0., 1.)
        };
        vec2f(n.x * sign(x.x), n.y * sign(x.y))
    }

    fn half_extent_local(&self) -> V2 {
        self.half_extent
    }

    fn area(&self) -> FT {
        4. * self.half_extent.x * self.half_extent.y
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("box half extent x", self.half_extent.x)?;
        check_positive("box half extent y", self.half_extent.y)
    }
}

fn sign(x: FT) -> FT {
    if x < 0. {
        -1.
    } else {
        1.
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleShape {
    pub radius: FT,
}

impl CircleShape {
    pub fn new(radius: FT) -> CircleShape {
        CircleShape { radius }
    }
}

impl ShapeTrait for CircleShape {
    fn sdf_local(&self, x: V2) -> FT {
        x.norm() - self.radius
    }

    fn normal_local(&self, x: V2) -> V2 {
        let len = x.norm();
        if len > 0. {
            x / len
        } else {
            vec2f(0., 1.)
        }
    }

    fn half_extent_local(&self) -> V2 {
        vec2f(self.radius, self.radius)
    }

    fn area(&self) -> FT {
        PI * self.radius * self.radius
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("circle radius", self.radius)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipseShape {
    pub radius_x: FT,
    pub radius_y: FT,
}

impl EllipseShape {
    pub fn new(radius_x: FT, radius_y: FT) -> EllipseShape {
        EllipseShape { radius_x, radius_y }
    }
}

impl ShapeTrait for EllipseShape {
    /// Approximation that is exact on the boundary and has the correct sign everywhere.
    fn sdf_local(&self, x: V2) -> FT {
        let r = vec2f(self.radius_x, self.radius_y);
        let k0 = x.component_div(&r).norm();
        let k1 = x.component_div(&r.component_mul(&r)).norm();
        if k1 <= 0. {
            return -FT::min(self.radius_x, self.radius_y);
        }
        k0 * (k0 - 1.) / k1
    }

    fn half_extent_local(&self) -> V2 {
        vec2f(self.radius_x, self.radius_y)
    }

    fn area(&self) -> FT {
        PI * self.radius_x * self.radius_y
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("ellipse radius x", self.radius_x)?;
        check_positive("ellipse radius y", self.radius_y)
    }
}

/// Rectangle with two round caps, lying along the x-axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleShape {
    pub rect_half_length: FT,
    pub cap_radius: FT,
}

impl CapsuleShape {
    pub fn new(rect_half_length: FT, cap_radius: FT) -> CapsuleShape {
        CapsuleShape {
            rect_half_length,
            cap_radius,
        }
    }

    fn segment_offset(&self, x: V2) -> V2 {
        let a = self.rect_half_length;
        vec2f(x.x - x.x.max(-a).min(a), x.y)
    }
}

impl ShapeTrait for CapsuleShape {
    fn sdf_local(&self, x: V2) -> FT {
        self.segment_offset(x).norm() - self.cap_radius
    }

    fn normal_local(&self, x: V2) -> V2 {
        let q = self.segment_offset(x);
        let len = q.norm();
        if len > 0. {
            q / len
        } else {
            vec2f(0., 1.)
        }
    }

    fn half_extent_local(&self) -> V2 {
        vec2f(self.rect_half_length + self.cap_radius, self.cap_radius)
    }

    fn area(&self) -> FT {
        4. * self.rect_half_length * self.cap_radius + PI * self.cap_radius * self.cap_radius
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_positive("capsule cap radius", self.cap_radius)?;
        if !(self.rect_half_length >= 0.) || !self.rect_half_length.is_finite() {
            return Err(ConfigError::InvalidShape(format!(
                "capsule half length must not be negative, got {}",
                self.rect_half_length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_ft_approx_eq;

    #[test]
    fn box_distances() {
        let b = BoxShape::new(vec2f(1., 0.5));
        assert_ft_approx_eq(b.sdf_local(vec2f(0., 0.)), -0.5, 1e-6, || "centre".to_string());
        assert_ft_approx_eq(b.sdf_local(vec2f(2., 0.)), 1., 1e-6, || "side".to_string());
        assert_ft_approx_eq(b.sdf_local(vec2f(4., 4.5)), 5., 1e-5, || "corner".to_string());
        assert_eq!(b.normal_local(vec2f(0.2, -0.45)), vec2f(0., -1.));
    }

    #[test]
    fn ellipse_is_exact_on_axes() {
        let e = EllipseShape::new(2., 1.);
        assert_ft_approx_eq(e.sdf_local(vec2f(2., 0.)), 0., 1e-6, || "on boundary".to_string());
        assert!(e.sdf_local(vec2f(0., 0.)) < 0.);
        assert!(e.sdf_local(vec2f(1.9, 0.)) < 0.);
        assert!(e.sdf_local(vec2f(0., 1.1)) > 0.);
    }

    #[test]
    fn capsule_distances() {
        let c = CapsuleShape::new(1., 0.5);
        assert_ft_approx_eq(c.sdf_local(vec2f(0., 1.)), 0.5, 1e-6, || "above".to_string());
        assert_ft_approx_eq(c.sdf_local(vec2f(2., 0.)), 0.5, 1e-6, || "beside cap".to_string());
        assert_eq!(c.normal_local(vec2f(0.3, -2.)), vec2f(0., -1.));
    }

    #[test]
    fn invalid_primitives_are_rejected() {
        assert!(CircleShape::new(0.).validate().is_err());
        assert!(BoxShape::new(vec2f(1., -1.)).validate().is_err());
        assert!(EllipseShape::new(1., FT::NAN).validate().is_err());
        assert!(CapsuleShape::new(-1., 1.).validate().is_err());
        assert!(CapsuleShape::new(0., 1.).validate().is_ok());
    }
}
