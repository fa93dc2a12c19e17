//! # pseudo-cell: size-bounded pseudo-cell aggregation for single-cell methylation data
//!
//! Cells inside each biological cluster are recursively split with seeded mini-batch
//! k-means until every group fits a cluster-specific size cap, then the rows of each
//! group are collapsed into one "pseudo-cell".

#![deny(missing_docs)]

/// Seeded mini-batch k-means
pub mod kmeans;

/// Size-bounded recursive partitioning of a cell embedding
pub mod partition;

/// Per-cluster size caps and pseudo-cell label assignment
pub mod pseudo_group;

/// Collapse rows sharing a pseudo-cell label
pub mod aggregate;

/// Run configuration
pub mod config;

/// Dense and sparse aggregation matrices
pub mod matrix;

/// MTX loading routine
pub mod mtx;

pub mod stats;


use anyhow::{bail, Error};
use log::info;
use ndarray::ArrayView2;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use std::fmt::Display;

pub use aggregate::{aggregate, AggregateFunc, PseudoCellObs, ReducedDataset};
pub use config::PseudoCellConfig;
pub use matrix::{AggregationMat, ReducedMatrix};
pub use partition::Partitioner;
pub use pseudo_group::{calculate_pseudo_groups, plan_and_partition};

/// Assign every cell a pseudo-cell label and collapse `features` by label.
///
/// `clusters`, the rows of `embedding` and the rows of `features` must all be in the
/// same cell order. Returns the reduced dataset and the per-cell label column.
pub fn generate_pseudo_cells<L, M>(
    clusters: &[L],
    embedding: &ArrayView2<f64>,
    features: &M,
    config: &PseudoCellConfig,
) -> Result<(ReducedDataset, Vec<String>), Error>
where
    L: Ord + Display,
    M: AggregationMat,
{
    let [n_rows, _] = features.shape();
    if n_rows != clusters.len() {
        bail!(
            "aggregation matrix has {} rows but {} cells have a cluster assignment",
            n_rows,
            clusters.len()
        );
    }

    let labels = calculate_pseudo_groups(clusters, embedding, config)?;
    let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
    let reduced = aggregate(features, &labels, config.aggregate_func, &mut rng)?;
    info!(
        "collapsed {} cells into {} pseudo-cells ({})",
        clusters.len(),
        reduced.obs.len(),
        config.aggregate_func
    );
    Ok((reduced, labels))
}
