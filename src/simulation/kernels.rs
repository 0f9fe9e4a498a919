use crate::{floating_type_mod::FT, vec2f, vec2i, V2, VI2};

/// Number of grid nodes a particle touches along one axis.
pub const STENCIL_WIDTH: usize = 3;

/// Quadratic B-spline. `x` is the distance to the node in units of cells.
pub fn quadratic_bspline(x: FT) -> FT {
    let x = x.abs();
    if x < 0.5 {
        0.75 - x * x
    } else if x < 1.5 {
        let v = 1.5 - x;
        0.5 * v * v
    } else {
        0.
    }
}

pub fn quadratic_bspline_deriv(x: FT) -> FT {
    let s = x.signum();
    let x = x.abs();
    if x < 0.5 {
        -2. * x * s
    } else if x < 1.5 {
        -(1.5 - x) * s
    } else {
        0.
    }
}

/**
 * Interpolation weights of a single particle over its 3x3 node stencil.
 *
 * Scatter and gather both build their weights through this struct so that
 * the two transfers always use the same stencil with the same weights.
 */
#[derive(Debug, Clone, Copy)]
pub struct StencilWeights {
    /// Cell index of the lower-left stencil node.
    pub base: VI2,

    /// Particle position relative to `base`, in units of cells.
    pub fx: V2,

    /// Per-axis weights `w[axis][node]`.
    w: [[FT; STENCIL_WIDTH]; 2],
}

impl StencilWeights {
    /// `x` is a local position, `inv_dx` the inverse cell size.
    pub fn new(x: V2, inv_dx: FT) -> StencilWeights {
        let xs = x * inv_dx;
        let base = vec2i((xs.x - 0.5).floor() as i32, (xs.y - 0.5).floor() as i32);
        let fx = xs - base.map(|c| c as FT);

        let mut w = [[0.; STENCIL_WIDTH]; 2];
        for d in 0..2 {
            let f = fx[d];
            w[d][0] = 0.5 * (1.5 - f) * (1.5 - f);
            w[d][1] = 0.75 - (f - 1.) * (f - 1.);
            w[d][2] = 0.5 * (f - 0.5) * (f - 0.5);
        }

        StencilWeights { base, fx, w }
    }

    #[inline(always)]
    pub fn weight(&self, i: usize, j: usize) -> FT {
        self.w[0][i] * self.w[1][j]
    }

    /// Vector from the particle to stencil node `(i, j)` in units of cells.
    #[inline(always)]
    pub fn dpos(&self, i: usize, j: usize) -> V2 {
        vec2f(i as FT, j as FT) - self.fx
    }

    /// Gradient of the weight of node `(i, j)` with respect to the node position, per cell.
    #[inline(always)]
    pub fn weight_gradient(&self, i: usize, j: usize) -> V2 {
        let d = self.dpos(i, j);
        vec2f(
            quadratic_bspline_deriv(d.x) * self.w[1][j],
            self.w[0][i] * quadratic_bspline_deriv(d.y),
        )
    }

    /// Calls `f(node_cell, weight, dpos)` for each of the nine nodes.
    #[inline(always)]
    pub fn for_each_node(&self, mut f: impl FnMut(VI2, FT, V2)) {
        for i in 0..STENCIL_WIDTH {
            for j in 0..STENCIL_WIDTH {
                f(self.base + vec2i(i as i32, j as i32), self.weight(i, j), self.dpos(i, j));
            }
        }
    }

    pub fn weight_sum(&self) -> FT {
        let mut sum = 0.;
        self.for_each_node(|_, w, _| sum += w);
        sum
    }
}

/// APIC scaling of the affine term for the quadratic kernel: `D^-1 = 4 / dx^2`.
pub fn apic_inv_d(inv_dx: FT) -> FT {
    4. * inv_dx * inv_dx
}

#[test]
fn quadratic_bspline_integrates_to_one() {
    let steps = 3000;
    let len = 3.;
    let dx = len / steps as FT;
    let mut integral = 0.;
    for i in 0..steps {
        let x = (i as FT + 0.5) * dx - 1.5;
        integral += quadratic_bspline(x) * dx;
    }
    crate::assert_ft_approx_eq(integral, 1., 1e-4, || "integral of quadratic b-spline".to_string());
}

#[test]
fn quadratic_bspline_derivative_test() {
    let eps = 1e-3;
    for i in -140..=140 {
        let x = i as FT / 100.;
        // the kernel is only C1 at the piece boundaries
        if ((x.abs() - 0.5).abs()) < 2. * eps || ((x.abs() - 1.5).abs()) < 2. * eps {
            continue;
        }
        let numerical = (quadratic_bspline(x + eps) - quadratic_bspline(x - eps)) / (2. * eps);
        crate::assert_ft_approx_eq(quadratic_bspline_deriv(x), numerical, 1e-2, || {
            format!("derivative of quadratic b-spline at x={}", x)
        });
    }
}

#[test]
fn stencil_weights_partition_of_unity() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..1000 {
        let x = vec2f(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0));
        let inv_dx = rng.gen_range(0.5..64.0);
        let weights = StencilWeights::new(x, inv_dx);
        crate::assert_ft_approx_eq(weights.weight_sum(), 1., 1e-5, || {
            format!("weight sum for x={:?} inv_dx={}", x, inv_dx)
        });
    }
}

#[test]
fn stencil_weights_match_kernel() {
    let inv_dx = 4.;
    let x = vec2f(1.13, 0.71);
    let weights = StencilWeights::new(x, inv_dx);
    weights.for_each_node(|node, w, dpos| {
        let expected = quadratic_bspline(dpos.x) * quadratic_bspline(dpos.y);
        crate::assert_ft_approx_eq(w, expected, 1e-6, || format!("weight of node {:?}", node));
        let node_pos = node.map(|c| c as FT) / inv_dx;
        let dpos_cells = (node_pos - x) * inv_dx;
        crate::assert_ft_approx_eq(dpos.x, dpos_cells.x, 1e-5, || "dpos.x".to_string());
        crate::assert_ft_approx_eq(dpos.y, dpos_cells.y, 1e-5, || "dpos.y".to_string());
    });
}

#[test]
fn stencil_weights_first_moment_vanishes() {
    // sum_i w_i (x_i - x_p) = 0 for the quadratic b-spline, needed for APIC momentum conservation
    let weights = StencilWeights::new(vec2f(0.337, 2.91), 8.);
    let mut moment = vec2f(0., 0.);
    weights.for_each_node(|_, w, dpos| moment += dpos * w);
    crate::assert_ft_approx_eq(moment.norm(), 0., 1e-5, || "first moment".to_string());
}

#[test]
fn weight_gradient_matches_finite_differences() {
    let h = 1e-2;
    let x = vec2f(3.37, -1.81);
    let weights = StencilWeights::new(x, 1.);
    for i in 0..STENCIL_WIDTH {
        for j in 0..STENCIL_WIDTH {
            let d = weights.dpos(i, j);
            let node_weight = |d: V2| quadratic_bspline(d.x) * quadratic_bspline(d.y);
            let numerical = vec2f(
                (node_weight(d + vec2f(h, 0.)) - node_weight(d - vec2f(h, 0.))) / (2. * h),
                (node_weight(d + vec2f(0., h)) - node_weight(d - vec2f(0., h))) / (2. * h),
            );
            let gradient = weights.weight_gradient(i, j);
            for k in 0..2 {
                crate::assert_ft_approx_eq(gradient[k], numerical[k], 2e-2, || {
                    format!("weight gradient of node ({}, {}) along axis {}", i, j, k)
                });
            }
        }
    }
}
