//! Gated recurrent unit layer with forward caching and backpropagation.
//!
//! r  = σ(W_ir·x + W_hr·h + b_r)
//! z  = σ(W_iz·x + W_hz·h + b_z)
//! n  = tanh(W_in·x + b_in + r ⊙ (W_hn·h + b_hn))
//! h' = (1 - z) ⊙ n + z ⊙ h
//!
//! Matrices are flat row-major `rows × cols` vectors.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    w_ir: Vec<f64>,
    w_iz: Vec<f64>,
    w_in: Vec<f64>,
    w_hr: Vec<f64>,
    w_hz: Vec<f64>,
    w_hn: Vec<f64>,
    b_r: Vec<f64>,
    b_z: Vec<f64>,
    b_in: Vec<f64>,
    b_hn: Vec<f64>,
}

/// Activations of one forward step, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct GruCache {
    x: Vec<f64>,
    h_prev: Vec<f64>,
    r: Vec<f64>,
    z: Vec<f64>,
    n: Vec<f64>,
    hn: Vec<f64>,
}

impl GruLayer {
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let k = 1.0 / (hidden_size.max(1) as f64).sqrt();
        let mut init = |len: usize| -> Vec<f64> { (0..len).map(|_| rng.random_range(-k..k)).collect() };
        Self {
            input_size,
            hidden_size,
            w_ir: init(hidden_size * input_size),
            w_iz: init(hidden_size * input_size),
            w_in: init(hidden_size * input_size),
            w_hr: init(hidden_size * hidden_size),
            w_hz: init(hidden_size * hidden_size),
            w_hn: init(hidden_size * hidden_size),
            b_r: init(hidden_size),
            b_z: init(hidden_size),
            b_in: init(hidden_size),
            b_hn: init(hidden_size),
        }
    }

    pub fn zeros_like(&self) -> Self {
        let h = self.hidden_size;
        let i = self.input_size;
        Self {
            input_size: i,
            hidden_size: h,
            w_ir: vec![0.0; h * i],
            w_iz: vec![0.0; h * i],
            w_in: vec![0.0; h * i],
            w_hr: vec![0.0; h * h],
            w_hz: vec![0.0; h * h],
            w_hn: vec![0.0; h * h],
            b_r: vec![0.0; h],
            b_z: vec![0.0; h],
            b_in: vec![0.0; h],
            b_hn: vec![0.0; h],
        }
    }

    pub fn tensors(&self) -> Vec<&Vec<f64>> {
        vec![
            &self.w_ir, &self.w_iz, &self.w_in, &self.w_hr, &self.w_hz, &self.w_hn, &self.b_r,
            &self.b_z, &self.b_in, &self.b_hn,
        ]
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Vec<f64>> {
        vec![
            &mut self.w_ir,
            &mut self.w_iz,
            &mut self.w_in,
            &mut self.w_hr,
            &mut self.w_hz,
            &mut self.w_hn,
            &mut self.b_r,
            &mut self.b_z,
            &mut self.b_in,
            &mut self.b_hn,
        ]
    }

    pub fn forward(&self, x: &[f64], h_prev: &[f64]) -> Vec<f64> {
        self.forward_cached(x, h_prev).0
    }

    pub fn forward_cached(&self, x: &[f64], h_prev: &[f64]) -> (Vec<f64>, GruCache) {
        let h = self.hidden_size;
        let i = self.input_size;

        let mut r = matvec(&self.w_ir, h, i, x);
        add_assign(&mut r, &matvec(&self.w_hr, h, h, h_prev));
        add_assign(&mut r, &self.b_r);
        r.iter_mut().for_each(|v| *v = sigmoid(*v));

        let mut z = matvec(&self.w_iz, h, i, x);
        add_assign(&mut z, &matvec(&self.w_hz, h, h, h_prev));
        add_assign(&mut z, &self.b_z);
        z.iter_mut().for_each(|v| *v = sigmoid(*v));

        let mut hn = matvec(&self.w_hn, h, h, h_prev);
        add_assign(&mut hn, &self.b_hn);

        let mut n = matvec(&self.w_in, h, i, x);
        for k in 0..h {
            n[k] = (n[k] + self.b_in[k] + r[k] * hn[k]).tanh();
        }

        let h_next: Vec<f64> = (0..h)
            .map(|k| (1.0 - z[k]) * n[k] + z[k] * h_prev[k])
            .collect();

        let cache = GruCache {
            x: x.to_vec(),
            h_prev: h_prev.to_vec(),
            r,
            z,
            n,
            hn,
        };
        (h_next, cache)
    }

    /// Accumulates parameter gradients into `grads` and returns `(dx, dh_prev)`.
    pub fn backward(&self, cache: &GruCache, dh: &[f64], grads: &mut GruLayer) -> (Vec<f64>, Vec<f64>) {
        let h = self.hidden_size;
        let i = self.input_size;
        let GruCache {
            x,
            h_prev,
            r,
            z,
            n,
            hn,
        } = cache;

        let mut dx = vec![0.0; i];
        let mut dh_prev: Vec<f64> = (0..h).map(|k| dh[k] * z[k]).collect();

        let dn_pre: Vec<f64> = (0..h)
            .map(|k| dh[k] * (1.0 - z[k]) * (1.0 - n[k] * n[k]))
            .collect();
        let dz_pre: Vec<f64> = (0..h)
            .map(|k| dh[k] * (h_prev[k] - n[k]) * z[k] * (1.0 - z[k]))
            .collect();
        let dhn: Vec<f64> = (0..h).map(|k| dn_pre[k] * r[k]).collect();
        let dr_pre: Vec<f64> = (0..h)
            .map(|k| dn_pre[k] * hn[k] * r[k] * (1.0 - r[k]))
            .collect();

        outer_acc(&mut grads.w_in, h, i, &dn_pre, x);
        add_assign(&mut grads.b_in, &dn_pre);
        matvec_t_acc(&self.w_in, h, i, &dn_pre, &mut dx);

        outer_acc(&mut grads.w_hn, h, h, &dhn, h_prev);
        add_assign(&mut grads.b_hn, &dhn);
        matvec_t_acc(&self.w_hn, h, h, &dhn, &mut dh_prev);

        outer_acc(&mut grads.w_iz, h, i, &dz_pre, x);
        outer_acc(&mut grads.w_hz, h, h, &dz_pre, h_prev);
        add_assign(&mut grads.b_z, &dz_pre);
        matvec_t_acc(&self.w_iz, h, i, &dz_pre, &mut dx);
        matvec_t_acc(&self.w_hz, h, h, &dz_pre, &mut dh_prev);

        outer_acc(&mut grads.w_ir, h, i, &dr_pre, x);
        outer_acc(&mut grads.w_hr, h, h, &dr_pre, h_prev);
        add_assign(&mut grads.b_r, &dr_pre);
        matvec_t_acc(&self.w_ir, h, i, &dr_pre, &mut dx);
        matvec_t_acc(&self.w_hr, h, h, &dr_pre, &mut dh_prev);

        (dx, dh_prev)
    }
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn matvec(w: &[f64], rows: usize, cols: usize, x: &[f64]) -> Vec<f64> {
    (0..rows)
        .map(|r| {
            let row = &w[r * cols..(r + 1) * cols];
            row.iter().zip(x).map(|(a, b)| a * b).sum()
        })
        .collect()
}

/// out += Wᵀ·d
pub fn matvec_t_acc(w: &[f64], rows: usize, cols: usize, d: &[f64], out: &mut [f64]) {
    for r in 0..rows {
        let dr = d[r];
        if dr == 0.0 {
            continue;
        }
        let row = &w[r * cols..(r + 1) * cols];
        for (o, wv) in out.iter_mut().zip(row) {
            *o += wv * dr;
        }
    }
}

/// g += d·xᵀ
pub fn outer_acc(g: &mut [f64], rows: usize, cols: usize, d: &[f64], x: &[f64]) {
    for r in 0..rows {
        let dr = d[r];
        if dr == 0.0 {
            continue;
        }
        let row = &mut g[r * cols..(r + 1) * cols];
        for (gv, xv) in row.iter_mut().zip(x) {
            *gv += dr * xv;
        }
    }
}

pub fn add_assign(a: &mut [f64], b: &[f64]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
}
