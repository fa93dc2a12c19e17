use anyhow::{bail, Error};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};

/// GpC rate corrected for the HpC background and normalized per cell.
///
/// The corrected rate is `(GCH - HCH) / (1 - HCH)` with negative values set to 0 (NaN is
/// kept). Each row is then divided by the cell's overall corrected rate, computed the same
/// way from `gch_overall` and `hch_overall`.
pub fn calculate_gch_rate(
    gch_rate: &ArrayView2<f64>,
    hch_rate: &ArrayView2<f64>,
    gch_overall: &ArrayView1<f64>,
    hch_overall: &ArrayView1<f64>,
) -> Result<Array2<f64>, Error> {
    if gch_rate.dim() != hch_rate.dim() {
        bail!(
            "GCH rate has shape {:?} but HCH rate has shape {:?}",
            gch_rate.shape(),
            hch_rate.shape()
        );
    }
    let n_cells = gch_rate.nrows();
    if gch_overall.len() != n_cells || hch_overall.len() != n_cells {
        bail!(
            "expected {} overall rates, got {} GCH and {} HCH",
            n_cells,
            gch_overall.len(),
            hch_overall.len()
        );
    }

    let mut rate = Zip::from(gch_rate)
        .and(hch_rate)
        .map_collect(|&g, &h| match corrected(g, h) {
            c if c < 0.0 => 0.0,
            c => c,
        });
    let overall = Zip::from(gch_overall).and(hch_overall).map_collect(|&g, &h| corrected(g, h));
    rate /= &overall.insert_axis(Axis(1));
    Ok(rate)
}

fn corrected(gch: f64, hch: f64) -> f64 {
    (gch - hch) / (1.0 - hch)
}
