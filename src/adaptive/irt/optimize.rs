//! Bounded optimizers used by ability estimation and item calibration.
//!
//! - `minimize_scalar`: Brent's method on a closed interval (golden section
//!   with parabolic interpolation), no derivatives required.
//! - `minimize_box`: Nelder-Mead simplex with every vertex projected onto a
//!   box, for the 2-3 parameter calibration problem.
//!
//! Both stop on tolerance, iteration cap, or an optional wall-clock deadline.

use std::time::Instant;

const GOLDEN: f64 = 0.381_966_011_250_105_1;
const SQRT_EPS: f64 = 1.490_116_119_384_765_6e-8;

#[derive(Debug, Clone, Copy)]
pub struct OptimizerOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub deadline: Option<Instant>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-6,
            deadline: None,
        }
    }
}

impl OptimizerOptions {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarMinimum {
    pub x: f64,
    pub fx: f64,
    pub iterations: usize,
    pub converged: bool,
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxMinimum {
    pub x: Vec<f64>,
    pub fx: f64,
    pub iterations: usize,
    pub converged: bool,
    pub timed_out: bool,
}

pub fn minimize_scalar<F>(mut f: F, lower: f64, upper: f64, options: &OptimizerOptions) -> ScalarMinimum
where
    F: FnMut(f64) -> f64,
{
    let (mut a, mut b) = if lower <= upper {
        (lower, upper)
    } else {
        (upper, lower)
    };
    let xatol = options.tolerance.max(f64::EPSILON);

    let mut fulc = a + GOLDEN * (b - a);
    let mut nfc = fulc;
    let mut xf = fulc;
    let mut rat: f64 = 0.0;
    let mut e: f64 = 0.0;
    let mut fx = f(xf);
    let mut ffulc = fx;
    let mut fnfc = fx;
    let mut xm = 0.5 * (a + b);
    let mut tol1 = SQRT_EPS * xf.abs() + xatol / 3.0;
    let mut tol2 = 2.0 * tol1;
    let mut iterations = 0;
    let mut converged = true;
    let mut timed_out = false;

    while (xf - xm).abs() > tol2 - 0.5 * (b - a) {
        if iterations >= options.max_iterations {
            converged = false;
            break;
        }
        if options.expired() {
            converged = false;
            timed_out = true;
            break;
        }

        let mut golden = true;
        if e.abs() > tol1 {
            golden = false;
            let mut r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                let x = xf + rat;
                if (x - a) < tol2 || (b - x) < tol2 {
                    rat = tol1 * signum_or_one(xm - xf);
                }
            } else {
                golden = true;
            }
        }

        if golden {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = GOLDEN * e;
        }

        let x = xf + signum_or_one(rat) * rat.abs().max(tol1);
        let fu = f(x);
        iterations += 1;

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = SQRT_EPS * xf.abs() + xatol / 3.0;
        tol2 = 2.0 * tol1;
    }

    ScalarMinimum {
        x: xf,
        fx,
        iterations,
        converged: converged && fx.is_finite(),
        timed_out,
    }
}

fn signum_or_one(v: f64) -> f64 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

pub fn minimize_box<F>(
    mut f: F,
    start: &[f64],
    lower: &[f64],
    upper: &[f64],
    options: &OptimizerOptions,
) -> BoxMinimum
where
    F: FnMut(&[f64]) -> f64,
{
    let n = start.len();
    debug_assert_eq!(lower.len(), n);
    debug_assert_eq!(upper.len(), n);

    let project = |x: &mut [f64]| {
        for i in 0..x.len() {
            x[i] = x[i].clamp(lower[i], upper[i]);
        }
    };

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    let mut x0 = start.to_vec();
    project(&mut x0);
    simplex.push(x0.clone());
    for i in 0..n {
        let mut vertex = x0.clone();
        let span = (upper[i] - lower[i]).abs();
        let step = (0.1 * span).max(1e-3);
        // step inward when the start sits on the upper bound
        vertex[i] = if vertex[i] + step <= upper[i] {
            vertex[i] + step
        } else {
            vertex[i] - step
        };
        project(&mut vertex);
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| f(v)).collect();

    let mut iterations = 0;
    let mut converged = false;
    let mut timed_out = false;

    loop {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let f_spread = (values[n] - values[0]).abs();
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        if f_spread <= options.tolerance && x_spread <= options.tolerance.sqrt() {
            converged = true;
            break;
        }
        if iterations >= options.max_iterations {
            break;
        }
        if options.expired() {
            timed_out = true;
            break;
        }
        iterations += 1;

        let mut centroid = vec![0.0; n];
        for vertex in &simplex[..n] {
            for (c, v) in centroid.iter_mut().zip(vertex) {
                *c += v / n as f64;
            }
        }
        let along = |t: f64| -> Vec<f64> {
            let mut point: Vec<f64> = centroid
                .iter()
                .zip(&simplex[n])
                .map(|(c, w)| c + t * (c - w))
                .collect();
            project(&mut point);
            point
        };

        let reflected = along(1.0);
        let f_reflected = f(&reflected);

        if f_reflected < values[0] {
            let expanded = along(2.0);
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }
        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let point = along(0.5);
            let value = f(&point);
            (point, value)
        } else {
            let point = along(-0.5);
            let value = f(&point);
            (point, value)
        };
        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let best = simplex[0].clone();
        for i in 1..=n {
            for (x, b) in simplex[i].iter_mut().zip(&best) {
                *x = b + 0.5 * (*x - b);
            }
            values[i] = f(&simplex[i]);
        }
    }

    BoxMinimum {
        x: simplex[0].clone(),
        fx: values[0],
        iterations,
        converged: converged && values[0].is_finite(),
        timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scalar_interior_minimum() {
        let result = minimize_scalar(|x| (x - 1.25).powi(2) + 3.0, -3.0, 3.0, &OptimizerOptions::default());
        assert!(result.converged);
        assert!((result.x - 1.25).abs() < 1e-4);
        assert!((result.fx - 3.0).abs() < 1e-8);
    }

    #[test]
    fn test_scalar_boundary_minimum() {
        let result = minimize_scalar(|x| -x, -3.0, 3.0, &OptimizerOptions::default());
        assert!(result.converged);
        assert!(result.x > 2.99);
        assert!(result.x <= 3.0);
    }

    #[test]
    fn test_scalar_iteration_cap_reports_non_convergence() {
        let options = OptimizerOptions {
            max_iterations: 2,
            tolerance: 1e-12,
            deadline: None,
        };
        let result = minimize_scalar(|x| (x - 0.3).powi(2), -3.0, 3.0, &options);
        assert!(!result.converged);
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn test_scalar_expired_deadline() {
        let options = OptimizerOptions {
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            ..Default::default()
        };
        let result = minimize_scalar(|x| (x - 0.3).powi(2), -3.0, 3.0, &options);
        assert!(result.timed_out);
        assert!(!result.converged);
    }

    #[test]
    fn test_box_quadratic() {
        let options = OptimizerOptions {
            max_iterations: 2000,
            tolerance: 1e-12,
            deadline: None,
        };
        let result = minimize_box(
            |x| (x[0] - 1.2).powi(2) + 2.0 * (x[1] + 0.4).powi(2),
            &[1.0, 0.0],
            &[0.1, -3.0],
            &[3.0, 3.0],
            &options,
        );
        assert!(result.converged);
        assert!((result.x[0] - 1.2).abs() < 1e-3);
        assert!((result.x[1] + 0.4).abs() < 1e-3);
    }

    #[test]
    fn test_box_respects_bounds() {
        let options = OptimizerOptions {
            max_iterations: 2000,
            tolerance: 1e-12,
            deadline: None,
        };
        let result = minimize_box(
            |x| (x[0] - 10.0).powi(2) + (x[1] + 10.0).powi(2),
            &[0.5, 0.5],
            &[0.0, -1.0],
            &[2.0, 1.0],
            &options,
        );
        assert!((result.x[0] - 2.0).abs() < 1e-3);
        assert!((result.x[1] + 1.0).abs() < 1e-3);
    }
}
