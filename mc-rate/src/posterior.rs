use anyhow::{bail, Error};
use log::{debug, info};
use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, Zip};
use rayon::prelude::*;

/// Per-cell beta prior over methylation rates, fit by the method of moments
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BetaPrior {
    /// alpha (pseudo methylated count)
    pub alpha: f64,
    /// beta (pseudo unmethylated count)
    pub beta: f64,
}

impl BetaPrior {
    /// Fit the prior of one cell from its raw `mc / cov` rates. Features with zero coverage
    /// are ignored.
    pub fn from_counts(mc: &ArrayView1<f64>, cov: &ArrayView1<f64>) -> BetaPrior {
        let raw = mc
            .iter()
            .zip(cov)
            .map(|(&m, &c)| if c == 0.0 { f64::NAN } else { m / c });
        let (mean, var) = nan_mean_var(raw);
        let alpha = (1.0 - mean) * mean * mean / var - mean;
        let beta = alpha * (1.0 / mean - 1.0);
        BetaPrior { alpha, beta }
    }

    /// Prior mean `alpha / (alpha + beta)`
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Posterior mean rate of one feature
    pub fn posterior(&self, mc: f64, cov: f64) -> f64 {
        (mc + self.alpha) / (cov + self.alpha + self.beta)
    }
}

/// Mean and population variance of the non-NaN values
fn nan_mean_var(xs: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for x in xs.filter(|x| !x.is_nan()) {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    (mean, m2 / n as f64)
}

/// Posterior methylation rate of each cell x feature entry.
///
/// `mc` and `cov` hold methylated and total basecalls with cells as rows. With
/// `normalize_per_cell` every rate is divided by the cell's prior mean, so zero-coverage
/// features come out as 1.0; `clip_norm_value` then caps the normalized rates (NaN
/// included). `clip_norm_value` has no effect without normalization.
pub fn calculate_posterior_mc_rate(
    mc: &ArrayView2<f64>,
    cov: &ArrayView2<f64>,
    normalize_per_cell: bool,
    clip_norm_value: Option<f64>,
) -> Result<Array2<f64>, Error> {
    if mc.dim() != cov.dim() {
        bail!(
            "mc matrix has shape {:?} but cov matrix has shape {:?}",
            mc.shape(),
            cov.shape()
        );
    }

    let mut post = Array2::zeros(mc.dim());
    fill_posterior_mc_rate(mc, cov, normalize_per_cell, clip_norm_value, post.view_mut());
    debug!("posterior rate of {} cells x {} features", post.nrows(), post.ncols());
    Ok(post)
}

/// Write the posterior rates of `mc` / `cov` into `out`, which has the same shape
fn fill_posterior_mc_rate(
    mc: &ArrayView2<f64>,
    cov: &ArrayView2<f64>,
    normalize_per_cell: bool,
    clip_norm_value: Option<f64>,
    mut out: ArrayViewMut2<f64>,
) {
    Zip::from(out.rows_mut())
        .and(mc.rows())
        .and(cov.rows())
        .for_each(|mut out, mc_row, cov_row| {
            let prior = BetaPrior::from_counts(&mc_row, &cov_row);
            let scale = if normalize_per_cell { prior.mean() } else { 1.0 };
            Zip::from(&mut out)
                .and(&mc_row)
                .and(&cov_row)
                .for_each(|o, &m, &c| {
                    let rate = prior.posterior(m, c) / scale;
                    *o = match clip_norm_value {
                        Some(clip) if normalize_per_cell && !(rate < clip) => clip,
                        _ => rate,
                    };
                });
        });
}

/// Same result as [`calculate_posterior_mc_rate`], computed on blocks of at most
/// `cell_chunk` cells in parallel. The output is allocated once and every block fills
/// its own rows.
pub fn calculate_posterior_mc_rate_chunked(
    mc: &ArrayView2<f64>,
    cov: &ArrayView2<f64>,
    normalize_per_cell: bool,
    clip_norm_value: Option<f64>,
    cell_chunk: usize,
) -> Result<Array2<f64>, Error> {
    if cell_chunk == 0 {
        bail!("cell_chunk must be > 0");
    }
    if mc.dim() != cov.dim() {
        bail!(
            "mc matrix has shape {:?} but cov matrix has shape {:?}",
            mc.shape(),
            cov.shape()
        );
    }

    let n_cells = mc.nrows();
    info!(
        "posterior mc rate of {} cells in chunks of up to {} cells",
        n_cells, cell_chunk
    );

    let mut post = Array2::zeros(mc.dim());
    post.axis_chunks_iter_mut(Axis(0), cell_chunk)
        .into_par_iter()
        .enumerate()
        .for_each(|(i, out)| {
            let start = i * cell_chunk;
            let end = start + out.nrows();
            fill_posterior_mc_rate(
                &mc.slice(s![start..end, ..]),
                &cov.slice(s![start..end, ..]),
                normalize_per_cell,
                clip_norm_value,
                out,
            );
        });
    Ok(post)
}
