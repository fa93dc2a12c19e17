use anyhow::{bail, Error};
use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Arguments for mini-batch k-means
#[derive(Clone, Debug, PartialEq)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Number of passes over the data, expressed in units of `n / batch_size` steps
    pub max_iter: usize,
    /// Rows sampled per mini-batch step
    pub batch_size: usize,
    /// Stop after this many consecutive steps without improvement of the smoothed inertia.
    /// Zero disables early stopping.
    pub max_no_improvement: usize,
    /// Size of the random subsample used for k-means++ seeding. `None` means `3 * num_clusters`
    pub init_size: Option<usize>,
    /// Number of k-means++ seedings to try; the one with the lowest inertia is kept
    pub n_init: usize,
    /// Centers with fewer than `reassignment_ratio * max_count` assigned rows are moved
    pub reassignment_ratio: f64,
    /// Seed of the random generator
    pub seed: u64,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        KmeansArgs {
            num_clusters: 1,
            max_iter: 100,
            batch_size: 100,
            max_no_improvement: 10,
            init_size: None,
            n_init: 5,
            reassignment_ratio: 0.1,
            seed: 0,
        }
    }
}

impl KmeansArgs {
    /// Default arguments with `num_clusters` clusters
    pub fn with_clusters(num_clusters: usize) -> Self {
        KmeansArgs {
            num_clusters,
            ..Default::default()
        }
    }
}

/// Result of a k-means fit
#[derive(Clone, Debug)]
pub struct KmeansFit {
    /// Cluster index of each row, in `[0, centers.nrows())`
    pub labels: Vec<usize>,
    /// Cluster centers, one per row
    pub centers: Array2<f64>,
    /// Sum of squared distances of each row to its center
    pub inertia: f64,
    /// Number of mini-batch steps taken
    pub n_steps: usize,
}

/// Cluster the rows of `data` with k-means++ seeding followed by mini-batch updates.
///
/// All randomness is drawn from a generator seeded with `args.seed`, so identical inputs
/// produce identical labels. Ties between equidistant centers go to the lower index.
pub fn mini_batch_kmeans(data: &ArrayView2<f64>, args: &KmeansArgs) -> Result<KmeansFit, Error> {
    if args.batch_size == 0 {
        bail!("k-means batch_size must be > 0");
    }
    if args.n_init == 0 {
        bail!("k-means n_init must be > 0");
    }

    let (n, d) = data.dim();
    if args.num_clusters <= 1 || n == 0 {
        let centers = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| ndarray::Array1::zeros(d))
            .insert_axis(Axis(0));
        let inertia = data.outer_iter().map(|row| sq_dist(row, centers.row(0))).sum();
        return Ok(KmeansFit {
            labels: vec![0; n],
            centers,
            inertia,
            n_steps: 0,
        });
    }

    let k = args.num_clusters.min(n);
    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);

    // seedings are compared on one shared validation subsample
    let init_size = args.init_size.unwrap_or(3 * k).clamp(k, n);
    let validation = data.select(Axis(0), &sample(&mut rng, n, init_size).into_vec());
    let mut best: Option<(f64, Array2<f64>)> = None;
    for run in 0..args.n_init {
        let idx = sample(&mut rng, n, init_size).into_vec();
        let subset = data.select(Axis(0), &idx);
        let centers = kmeans_plus_plus(&subset.view(), k, &mut rng);
        let inertia: f64 = validation
            .outer_iter()
            .map(|row| nearest_center(row, &centers.view()).1)
            .sum();
        debug!("k-means++ init {}: inertia {:.4} on {} rows", run, inertia, init_size);
        if best.as_ref().map_or(true, |(b, _)| inertia < *b) {
            best = Some((inertia, centers));
        }
    }
    let Some((_, mut centers)) = best else {
        bail!("no k-means++ initialization succeeded")
    };

    let batch_size = args.batch_size.min(n);
    let max_steps = (args.max_iter * n / batch_size).max(1);
    let alpha = (2.0 * batch_size as f64 / (n as f64 + 1.0)).min(1.0);

    let mut counts = vec![0.0_f64; k];
    let mut ewa_inertia: Option<f64> = None;
    let mut best_ewa = f64::INFINITY;
    let mut no_improvement = 0;
    let mut n_steps = 0;
    let mut batch = Vec::with_capacity(batch_size);
    let mut assigned = Vec::with_capacity(batch_size);

    for step in 0..max_steps {
        batch.clear();
        batch.extend((0..batch_size).map(|_| rng.gen_range(0..n)));

        assigned.clear();
        let mut batch_inertia = 0.0;
        for &i in &batch {
            let (j, dist) = nearest_center(data.row(i), &centers.view());
            batch_inertia += dist;
            assigned.push(j);
        }

        for (&i, &j) in batch.iter().zip(&assigned) {
            counts[j] += 1.0;
            let eta = 1.0 / counts[j];
            centers
                .row_mut(j)
                .zip_mut_with(&data.row(i), |c, &x| *c += eta * (x - *c));
        }

        if args.reassignment_ratio > 0.0 && (step + 1) % 10 == 0 {
            reassign_small_centers(data, &batch, &mut centers, &mut counts, args.reassignment_ratio, &mut rng);
        }

        n_steps = step + 1;
        let batch_inertia = batch_inertia / batch_size as f64;
        let ewa = match ewa_inertia {
            None => batch_inertia,
            Some(prev) => prev * (1.0 - alpha) + batch_inertia * alpha,
        };
        ewa_inertia = Some(ewa);

        if ewa < best_ewa {
            best_ewa = ewa;
            no_improvement = 0;
        } else {
            no_improvement += 1;
        }
        if args.max_no_improvement > 0 && no_improvement >= args.max_no_improvement {
            debug!(
                "k-means converged after {} steps: no improvement in {} steps",
                n_steps, no_improvement
            );
            break;
        }
    }

    let mut labels = Vec::with_capacity(n);
    let mut inertia = 0.0;
    for row in data.outer_iter() {
        let (j, dist) = nearest_center(row, &centers.view());
        labels.push(j);
        inertia += dist;
    }

    Ok(KmeansFit {
        labels,
        centers,
        inertia,
        n_steps,
    })
}

#[inline]
fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of and squared distance to the closest center; ties go to the lower index.
fn nearest_center(row: ArrayView1<f64>, centers: &ArrayView2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, center) in centers.outer_iter().enumerate() {
        let dist = sq_dist(row, center);
        if dist < best.1 {
            best = (j, dist);
        }
    }
    best
}

/// k-means++ seeding: each new center is drawn with probability proportional to the
/// squared distance to the closest center chosen so far.
fn kmeans_plus_plus<R: Rng>(data: &ArrayView2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut centers = Array2::zeros((k, d));

    let first = rng.gen_range(0..n);
    centers.row_mut(0).assign(&data.row(first));
    let mut closest: Vec<f64> = data.outer_iter().map(|row| sq_dist(row, centers.row(0))).collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 && total.is_finite() {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &w) in closest.iter().enumerate() {
                if target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // all remaining rows coincide with a chosen center
            rng.gen_range(0..n)
        };

        centers.row_mut(c).assign(&data.row(pick));
        for (i, row) in data.outer_iter().enumerate() {
            let dist = sq_dist(row, centers.row(c));
            if dist < closest[i] {
                closest[i] = dist;
            }
        }
    }
    centers
}

fn reassign_small_centers<R: Rng>(
    data: &ArrayView2<f64>,
    batch: &[usize],
    centers: &mut Array2<f64>,
    counts: &mut [f64],
    ratio: f64,
    rng: &mut R,
) {
    let max_count = counts.iter().cloned().fold(0.0, f64::max);
    let threshold = ratio * max_count;
    let small: Vec<usize> = (0..counts.len()).filter(|&j| counts[j] < threshold).collect();
    if small.is_empty() || small.len() == counts.len() {
        return;
    }
    let kept_min = (0..counts.len())
        .filter(|&j| counts[j] >= threshold)
        .map(|j| counts[j])
        .fold(f64::INFINITY, f64::min);

    debug!("reassigning {} k-means centers with < {:.1} rows", small.len(), threshold);
    for j in small {
        let i = batch[rng.gen_range(0..batch.len())];
        centers.row_mut(j).assign(&data.row(i));
        counts[j] = kept_min;
    }
}
