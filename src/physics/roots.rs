// Closed-form polynomial root finding
//
// Used by the kinematics solver to find the time at which a position
// is reached under a linearly varying acceleration (cubic in time).

use std::f64::consts::PI;

/// Coefficients below this magnitude are treated as zero when deciding the
/// degree of a polynomial.
const DEGENERATE_EPSILON: f64 = 1e-14;

/// Real roots of a polynomial: `count` valid entries at the front of `roots`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roots {
    pub count: usize,
    pub roots: [f64; 3],
}

impl Roots {
    fn none() -> Self {
        Self {
            count: 0,
            roots: [0.0; 3],
        }
    }

    fn one(r: f64) -> Self {
        Self {
            count: 1,
            roots: [r, 0.0, 0.0],
        }
    }

    fn two(r0: f64, r1: f64) -> Self {
        Self {
            count: 2,
            roots: [r0, r1, 0.0],
        }
    }

    fn three(r0: f64, r1: f64, r2: f64) -> Self {
        Self {
            count: 3,
            roots: [r0, r1, r2],
        }
    }

    /// The valid roots
    pub fn as_slice(&self) -> &[f64] {
        &self.roots[..self.count]
    }

    /// Smallest root inside `[lower, upper]`
    pub fn smallest_in(&self, lower: f64, upper: f64) -> Option<f64> {
        self.as_slice()
            .iter()
            .copied()
            .filter(|r| *r >= lower && *r <= upper)
            .fold(None, |acc: Option<f64>, r| match acc {
                Some(best) if best <= r => Some(best),
                _ => Some(r),
            })
    }
}

/// Solves `a1 * x + a0 = 0`
pub fn solve_linear(a1: f64, a0: f64) -> Roots {
    if a1.abs() < DEGENERATE_EPSILON {
        Roots::none()
    } else {
        Roots::one(-a0 / a1)
    }
}

/// Solves `a2 * x² + a1 * x + a0 = 0`
///
/// Uses the cancellation-free form: the root with the larger magnitude is
/// computed first and the second one is derived from Vieta's product.
pub fn solve_quadratic(a2: f64, a1: f64, a0: f64) -> Roots {
    if a2.abs() < DEGENERATE_EPSILON {
        return solve_linear(a1, a0);
    }

    let discriminant = a1 * a1 - 4.0 * a2 * a0;
    if discriminant < 0.0 {
        return Roots::none();
    }

    let sqrt_d = discriminant.sqrt();
    let q = if a1 >= 0.0 {
        -0.5 * (a1 + sqrt_d)
    } else {
        -0.5 * (a1 - sqrt_d)
    };

    if q == 0.0 {
        // a1 == 0 and a0 == 0: double root at zero
        return Roots::two(0.0, 0.0);
    }

    Roots::two(q / a2, a0 / q)
}

/// Solves `a3 * x³ + a2 * x² + a1 * x + a0 = 0`
///
/// The cubic is normalized and reduced to the depressed form `t³ + p t + q`.
/// A positive discriminant yields one real root (hyperbolic substitution),
/// otherwise three real roots are returned (trigonometric substitution).
///
/// Repeated roots fall into the three-root branch and are reported as
/// (numerically) duplicated values.
pub fn solve_cubic(a3: f64, a2: f64, a1: f64, a0: f64) -> Roots {
    if a3.abs() < DEGENERATE_EPSILON {
        return solve_quadratic(a2, a1, a0);
    }

    let a = a2 / a3;
    let b = a1 / a3;
    let c = a0 / a3;

    let shift = a / 3.0;
    let p = b - a * a / 3.0;
    let q = 2.0 * a * a * a / 27.0 - a * b / 3.0 + c;

    let discriminant = q * q / 4.0 + p * p * p / 27.0;

    if p.abs() < DEGENERATE_EPSILON {
        // t³ = -q
        return Roots::one((-q).cbrt() - shift);
    }

    if discriminant > 0.0 {
        let t = if p < 0.0 {
            let m = (-p / 3.0).sqrt();
            let arg = (-3.0 * q.abs() / (2.0 * p) * (-3.0 / p).sqrt()).max(1.0);
            -2.0 * q.signum() * m * ((1.0 / 3.0) * arg.acosh()).cosh()
        } else {
            let m = (p / 3.0).sqrt();
            let arg = 3.0 * q / (2.0 * p) * (3.0 / p).sqrt();
            -2.0 * m * ((1.0 / 3.0) * arg.asinh()).sinh()
        };
        return Roots::one(t - shift);
    }

    // three real roots, p < 0
    let m = 2.0 * (-p / 3.0).sqrt();
    let arg = (3.0 * q / (2.0 * p) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0);
    let theta = arg.acos() / 3.0;

    Roots::three(
        m * theta.cos() - shift,
        m * (theta - 2.0 * PI / 3.0).cos() - shift,
        m * (theta - 4.0 * PI / 3.0).cos() - shift,
    )
}
