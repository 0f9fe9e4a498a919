//! Constitutive models.
//!
//! [`update_deformation`] is a pure function: previous deformation, velocity
//! gradient, time step and material parameters in, corrected deformation
//! gradient and Kirchhoff stress out. It never produces a singular `F`.

use crate::{
    error::ConfigError,
    floating_type_mod::{FT, PI},
    particle::Deformation,
    vec2f, M2, V2,
};
use serde::{Deserialize, Serialize};

/// Singular values of `F` are never allowed below this value.
pub const MIN_SINGULAR_VALUE: FT = 1e-3;

// snow plasticity, "A material point method for snow simulation" (Stomakhin et al. 2013)
const SNOW_CRITICAL_COMPRESSION: FT = 2.5e-2;
const SNOW_CRITICAL_STRETCH: FT = 4.5e-3;
const SNOW_HARDENING: FT = 10.;

// drucker-prager hardening parameters in degrees
const SAND_H0: FT = 35.;
const SAND_H1: FT = 9.;
const SAND_H2: FT = 0.2;
const SAND_H3: FT = 10.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialType {
    Fluid,
    Elastic,
    Snow,
    Sand,
}

/// Immutable material record, shared by id between particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub r#type: MaterialType,
    /// kg/m^2 (areal density in 2D)
    pub density: FT,
    pub youngs_modulus: FT,
    pub poissons_ratio: FT,
}

impl Material {
    pub fn new(r#type: MaterialType, density: FT, youngs_modulus: FT, poissons_ratio: FT) -> Material {
        Material {
            r#type,
            density,
            youngs_modulus,
            poissons_ratio,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.density > 0.) || !self.density.is_finite() {
            return Err(ConfigError::InvalidMaterial(format!(
                "density must be positive, got {}",
                self.density
            )));
        }
        if !(self.youngs_modulus > 0.) || !self.youngs_modulus.is_finite() {
            return Err(ConfigError::InvalidMaterial(format!(
                "Young's modulus must be positive, got {}",
                self.youngs_modulus
            )));
        }
        if !(self.poissons_ratio >= 0. && self.poissons_ratio < 0.5) {
            return Err(ConfigError::InvalidMaterial(format!(
                "Poisson's ratio must be in [0, 0.5), got {}",
                self.poissons_ratio
            )));
        }
        Ok(())
    }

    /// Lamé parameters (λ, μ).
    pub fn lame(&self) -> (FT, FT) {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;
        (e * nu / ((1. + nu) * (1. - 2. * nu)), e / (2. * (1. + nu)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialUpdate {
    pub deformation: Deformation,

    /// Set when `F` had to be regularized because it became (nearly) singular or non-finite.
    pub regularized: bool,
}

/**
 * Advances the deformation gradient by `F' = (I + dt * grad_v) * F`, applies the
 * plastic projection of the material and derives the Kirchhoff stress from the result.
 */
pub fn update_deformation(prev: &Deformation, velocity_gradient: &M2, dt: FT, material: &Material) -> MaterialUpdate {
    let mut f = (M2::identity() + velocity_gradient * dt) * prev.f;
    let mut regularized = false;

    if !f.iter().all(|x| x.is_finite()) {
        f = prev.f;
        regularized = true;
    }

    let (lambda, mu) = material.lame();
    let mut plastic = prev.plastic;

    let stress = match material.r#type {
        MaterialType::Fluid => {
            let mut j = f.determinant();
            let min_j = MIN_SINGULAR_VALUE * MIN_SINGULAR_VALUE;
            if !(j >= min_j) {
                j = min_j;
                regularized = true;
            }
            // fluids keep no shear memory
            let s = j.sqrt();
            if regularized || !is_isotropic(&f) {
                f = M2::identity() * s;
            }
            let bulk = lambda + mu;
            M2::identity() * (bulk * j * (j - 1.))
        }
        MaterialType::Elastic => {
            let (u, mut sigma, v) = signed_svd(&f);
            if clamp_min_singular_values(&mut sigma) {
                f = reconstruct(&u, sigma, &v);
                regularized = true;
            }
            fixed_corotated_kirchhoff(&u, sigma, &v, &f, mu, lambda)
        }
        MaterialType::Snow => {
            let (u, mut sigma, v) = signed_svd(&f);
            let mut changed = clamp_min_singular_values(&mut sigma);
            regularized |= changed;

            let old_j = sigma.x * sigma.y;
            let clamped = sigma.map(|s| s.max(1. - SNOW_CRITICAL_COMPRESSION).min(1. + SNOW_CRITICAL_STRETCH));
            if clamped != sigma {
                let new_j = clamped.x * clamped.y;
                plastic.jp = (plastic.jp * old_j / new_j).max(MIN_SINGULAR_VALUE);
                sigma = clamped;
                changed = true;
            }
            if changed {
                f = reconstruct(&u, sigma, &v);
            }

            let hardening = FT::exp(SNOW_HARDENING * (1. - plastic.jp)).max(0.1).min(5.);
            fixed_corotated_kirchhoff(&u, sigma, &v, &f, mu * hardening, lambda * hardening)
        }
        MaterialType::Sand => {
            let (u, mut sigma, v) = signed_svd(&f);
            if clamp_min_singular_values(&mut sigma) {
                regularized = true;
                f = reconstruct(&u, sigma, &v);
            }

            let alpha = drucker_prager_alpha(plastic.hardening);
            let projection = project_drucker_prager(sigma, plastic.log_vol_gain, alpha, lambda, mu);
            plastic.hardening += projection.delta_q;
            plastic.log_vol_gain = projection.log_vol_gain;
            if projection.sigma != sigma {
                sigma = projection.sigma;
                f = reconstruct(&u, sigma, &v);
            }

            hencky_kirchhoff(&u, sigma, mu, lambda)
        }
    };

    MaterialUpdate {
        deformation: Deformation { f, stress, plastic },
        regularized,
    }
}

fn is_isotropic(f: &M2) -> bool {
    f[(0, 1)] == 0. && f[(1, 0)] == 0. && f[(0, 0)] == f[(1, 1)]
}

/// SVD with rotations `U`, `V` (det = +1). An inversion shows up as a negative last singular value.
pub fn signed_svd(f: &M2) -> (M2, V2, M2) {
    let svd = f.svd(true, true);
    let mut u = svd.u.unwrap_or_else(M2::identity);
    let mut v = svd.v_t.map(|v_t| v_t.transpose()).unwrap_or_else(M2::identity);
    let mut sigma = svd.singular_values;

    if u.determinant() < 0. {
        u[(0, 1)] = -u[(0, 1)];
        u[(1, 1)] = -u[(1, 1)];
        sigma.y = -sigma.y;
    }
    if v.determinant() < 0. {
        v[(0, 1)] = -v[(0, 1)];
        v[(1, 1)] = -v[(1, 1)];
        sigma.y = -sigma.y;
    }

    (u, sigma, v)
}

pub fn reconstruct(u: &M2, sigma: V2, v: &M2) -> M2 {
    u * M2::from_diagonal(&sigma) * v.transpose()
}

/// Returns whether a singular value had to be raised.
fn clamp_min_singular_values(sigma: &mut V2) -> bool {
    let mut changed = false;
    for d in 0..2 {
        if !(sigma[d] >= MIN_SINGULAR_VALUE) {
            sigma[d] = MIN_SINGULAR_VALUE;
            changed = true;
        }
    }
    changed
}

/// Kirchhoff stress of the fixed corotated model: `2μ(F - R)Fᵀ + λ(J - 1)J I`.
fn fixed_corotated_kirchhoff(u: &M2, sigma: V2, v: &M2, f: &M2, mu: FT, lambda: FT) -> M2 {
    let r = u * v.transpose();
    let j = sigma.x * sigma.y;
    (f - r) * f.transpose() * (2. * mu) + M2::identity() * (lambda * (j - 1.) * j)
}

/// First Piola–Kirchhoff stress of the fixed corotated model, used by mesh elements.
pub fn fixed_corotated_piola(f: &M2, mu: FT, lambda: FT) -> M2 {
    let (u, sigma, v) = signed_svd(f);
    let r = u * v.transpose();
    let j = sigma.x * sigma.y;
    // cofactor matrix J F^-T, well defined even for singular F
    let cofactor = M2::new(f[(1, 1)], -f[(1, 0)], -f[(0, 1)], f[(0, 0)]);
    (f - r) * (2. * mu) + cofactor * (lambda * (j - 1.))
}

/// St. Venant–Kirchhoff with Hencky strain, expressed in the principal frame.
fn hencky_kirchhoff(u: &M2, sigma: V2, mu: FT, lambda: FT) -> M2 {
    let eps = sigma.map(|s| s.abs().ln());
    let tr = eps.sum();
    let tau = vec2f(2. * mu * eps.x + lambda * tr, 2. * mu * eps.y + lambda * tr);
    u * M2::from_diagonal(&tau) * u.transpose()
}

fn drucker_prager_alpha(q: FT) -> FT {
    let phi_deg = SAND_H0 + (SAND_H1 * q - SAND_H3) * FT::exp(-SAND_H2 * q);
    let sin_phi = (phi_deg * PI / 180.).sin();
    FT::sqrt(2. / 3.) * 2. * sin_phi / (3. - sin_phi)
}

struct DruckerPragerProjection {
    sigma: V2,
    delta_q: FT,
    log_vol_gain: FT,
}

/// Return mapping onto the Drucker–Prager cone in log-strain space ("Drucker-Prager Elastoplasticity for Sand Animation", Klar et al. 2016).
///
/// Volume lost to the projection in tension is kept in `log_vol_gain` and given back to the
/// Hencky strain on the next compression (volume correction of Tampubolon et al. 2017).
fn project_drucker_prager(sigma: V2, log_vol_gain: FT, alpha: FT, lambda: FT, mu: FT) -> DruckerPragerProjection {
    let eps = sigma.map(|s| s.ln()) + vec2f(1., 1.) * (log_vol_gain * 0.5);
    let tr = eps.sum();

    // separated grains carry no stress
    if tr > 0. {
        return DruckerPragerProjection {
            sigma: vec2f(1., 1.),
            delta_q: eps.norm(),
            log_vol_gain: tr,
        };
    }

    let eps_hat = eps - vec2f(tr, tr) * 0.5;
    let eps_hat_norm = eps_hat.norm();
    let d = 2.;
    let delta_gamma = eps_hat_norm + (d * lambda + 2. * mu) / (2. * mu) * tr * alpha;

    let (h, delta_q) = if eps_hat_norm > 0. && delta_gamma > 0. {
        (eps - eps_hat * (delta_gamma / eps_hat_norm), delta_gamma)
    } else if log_vol_gain != 0. {
        (eps, 0.)
    } else {
        return DruckerPragerProjection {
            sigma,
            delta_q: 0.,
            log_vol_gain: 0.,
        };
    };

    DruckerPragerProjection {
        sigma: h.map(|x| x.exp()),
        delta_q,
        log_vol_gain: 0.,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_ft_approx_eq;

    fn all_models() -> Vec<Material> {
        vec![
            Material::new(MaterialType::Fluid, 1000., 1e4, 0.2),
            Material::new(MaterialType::Elastic, 1000., 1e4, 0.2),
            Material::new(MaterialType::Snow, 400., 1.4e5, 0.2),
            Material::new(MaterialType::Sand, 1600., 3.5e5, 0.3),
        ]
    }

    fn assert_matrix_eq(a: &M2, b: &M2, tolerance: FT) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_ft_approx_eq(*x, *y, tolerance, || format!("matrices differ: {} vs {}", a, b));
        }
    }

    #[test]
    fn zero_velocity_gradient_keeps_identity() {
        for material in all_models() {
            let update = update_deformation(&Deformation::default(), &M2::zeros(), 1e-3, &material);
            assert_eq!(update.deformation.f, M2::identity(), "{:?}", material.r#type);
            assert!(!update.regularized);
        }
    }

    #[test]
    fn zero_velocity_gradient_keeps_elastic_deformation() {
        let material = Material::new(MaterialType::Elastic, 1000., 1e4, 0.3);
        let prev = Deformation {
            f: M2::new(1.1, 0.2, -0.05, 0.9),
            ..Deformation::default()
        };
        let update = update_deformation(&prev, &M2::zeros(), 1e-2, &material);
        assert_eq!(update.deformation.f, prev.f);
        assert!(!update.regularized);
    }

    #[test]
    fn deformation_gradient_is_advanced() {
        let material = Material::new(MaterialType::Elastic, 1000., 1e4, 0.3);
        let grad_v = M2::new(0.5, 0.1, 0., -0.2);
        let dt = 0.01;
        let update = update_deformation(&Deformation::default(), &grad_v, dt, &material);
        assert_matrix_eq(&update.deformation.f, &(M2::identity() + grad_v * dt), 1e-6);
    }

    #[test]
    fn undeformed_elastic_material_is_stress_free() {
        let material = Material::new(MaterialType::Elastic, 1000., 1e4, 0.3);
        let rotation = nalgebra::Rotation2::new(0.3 as FT).into_inner();
        let prev = Deformation {
            f: rotation,
            ..Deformation::default()
        };
        let update = update_deformation(&prev, &M2::zeros(), 1e-3, &material);
        assert_matrix_eq(&update.deformation.stress, &M2::zeros(), 1e-2);
    }

    #[test]
    fn compressed_fluid_pushes_outwards() {
        let material = Material::new(MaterialType::Fluid, 1000., 1e4, 0.2);
        let update = update_deformation(&Deformation::default(), &(M2::identity() * -1.), 0.05, &material);
        let j = update.deformation.f.determinant();
        assert!(j < 1.);
        // negative pressure term: tau = K J (J - 1) < 0 means the grid gets an outward force
        assert!(update.deformation.stress[(0, 0)] < 0.);
        assert!(is_isotropic(&update.deformation.f));
    }

    #[test]
    fn collapsed_deformation_is_regularized() {
        for material in all_models() {
            let grad_v = M2::new(-1000., 0., 0., -1000.);
            let update = update_deformation(&Deformation::default(), &grad_v, 1e-3, &material);
            assert!(update.regularized, "{:?}", material.r#type);
            let (_, sigma, _) = signed_svd(&update.deformation.f);
            assert!(sigma.x.abs() >= MIN_SINGULAR_VALUE * 0.99, "{:?}", material.r#type);
            assert!(sigma.y.abs() >= MIN_SINGULAR_VALUE * 0.99, "{:?}", material.r#type);
            assert!(update.deformation.f.determinant() > 0.);
        }
    }

    #[test]
    fn inverted_deformation_is_regularized() {
        let material = Material::new(MaterialType::Elastic, 1000., 1e4, 0.3);
        let prev = Deformation {
            f: M2::new(1., 0., 0., -0.5),
            ..Deformation::default()
        };
        let update = update_deformation(&prev, &M2::zeros(), 1e-3, &material);
        assert!(update.regularized);
        assert!(update.deformation.f.determinant() > 0.);
    }

    #[test]
    fn non_finite_gradient_falls_back_to_previous_state() {
        let material = Material::new(MaterialType::Elastic, 1000., 1e4, 0.3);
        let grad_v = M2::new(FT::NAN, 0., 0., 0.);
        let update = update_deformation(&Deformation::default(), &grad_v, 1e-3, &material);
        assert!(update.regularized);
        assert_eq!(update.deformation.f, M2::identity());
    }

    #[test]
    fn snow_plasticity_clamps_stretch() {
        let material = Material::new(MaterialType::Snow, 400., 1.4e5, 0.2);
        let grad_v = M2::new(10., 0., 0., 0.);
        let update = update_deformation(&Deformation::default(), &grad_v, 0.01, &material);
        let (_, sigma, _) = signed_svd(&update.deformation.f);
        assert!(sigma.x <= 1. + SNOW_CRITICAL_STRETCH + 1e-5);
        // stretching beyond the limit loses plastic volume
        assert!(update.deformation.plastic.jp > 1.);
    }

    #[test]
    fn sand_in_tension_loses_all_stress() {
        let material = Material::new(MaterialType::Sand, 1600., 3.5e5, 0.3);
        let grad_v = M2::new(5., 0., 0., 5.);
        let update = update_deformation(&Deformation::default(), &grad_v, 0.01, &material);
        assert_matrix_eq(&update.deformation.f, &M2::identity(), 1e-5);
        assert_matrix_eq(&update.deformation.stress, &M2::zeros(), 1e-2);
        assert!(update.deformation.plastic.hardening > 0.);
    }

    #[test]
    fn sand_regains_volume_lost_in_tension() {
        let material = Material::new(MaterialType::Sand, 1600., 3.5e5, 0.3);
        let expanded = update_deformation(&Deformation::default(), &M2::new(5., 0., 0., 5.), 0.01, &material);
        let gain = expanded.deformation.plastic.log_vol_gain;
        assert_ft_approx_eq(gain, 2. * FT::ln(1.05), 1e-4, || "stored volume".to_string());

        let compressed = update_deformation(&expanded.deformation, &M2::new(-5., 0., 0., -5.), 0.01, &material);
        let j = compressed.deformation.f.determinant();
        // without the correction J would be 0.95^2
        assert_ft_approx_eq(j, (1.05 * 0.95) * (1.05 * 0.95), 1e-3, || "volume after the cycle".to_string());
        assert_eq!(compressed.deformation.plastic.log_vol_gain, 0.);
    }

    #[test]
    fn sand_yields_under_shear() {
        let material = Material::new(MaterialType::Sand, 1600., 3.5e5, 0.3);
        // pure shear without compression lies outside the cone
        let grad_v = M2::new(2., 0., 0., -2.);
        let update = update_deformation(&Deformation::default(), &grad_v, 0.01, &material);
        let (_, sigma, _) = signed_svd(&update.deformation.f);
        let eps = sigma.map(|s| s.ln());
        let tr = eps.sum();
        let dev = (eps - vec2f(tr, tr) * 0.5).norm();
        assert!(dev < 1e-3, "deviatoric strain {} should have been projected away", dev);
    }

    #[test]
    fn lame_parameters() {
        let material = Material::new(MaterialType::Elastic, 1., 1e5, 0.25);
        let (lambda, mu) = material.lame();
        assert_ft_approx_eq(lambda, 4e4, 1e-1, || "lambda".to_string());
        assert_ft_approx_eq(mu, 4e4, 1e-1, || "mu".to_string());
    }

    #[test]
    fn invalid_materials_are_rejected() {
        assert!(Material::new(MaterialType::Elastic, 0., 1., 0.2).validate().is_err());
        assert!(Material::new(MaterialType::Elastic, 1., -1., 0.2).validate().is_err());
        assert!(Material::new(MaterialType::Elastic, 1., 1., 0.5).validate().is_err());
        assert!(Material::new(MaterialType::Sand, 1., 1., 0.3).validate().is_ok());
    }

    #[test]
    fn corotated_piola_matches_kirchhoff() {
        let f = M2::new(1.2, 0.1, 0.05, 0.95);
        let (lambda, mu) = Material::new(MaterialType::Elastic, 1., 1e3, 0.3).lame();
        let p = fixed_corotated_piola(&f, mu, lambda);
        let (u, sigma, v) = signed_svd(&f);
        let tau = fixed_corotated_kirchhoff(&u, sigma, &v, &f, mu, lambda);
        assert_matrix_eq(&(p * f.transpose()), &tau, 1e-2);
    }
}
