use crate::matrix::{AggregationMat, ReducedMatrix};
use crate::partition::group_by_label;
use crate::stats::column_medians;
use anyhow::{bail, format_err, Error};
use log::debug;
use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How the rows of one pseudo-cell are combined
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    /// Column-wise sum
    Sum,
    /// Column-wise mean
    Mean,
    /// Column-wise median
    Median,
    /// Row of one member drawn uniformly at random, copied unmodified
    Downsample,
}

impl FromStr for AggregateFunc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(AggregateFunc::Sum),
            "mean" => Ok(AggregateFunc::Mean),
            "median" => Ok(AggregateFunc::Median),
            "downsample" => Ok(AggregateFunc::Downsample),
            _ => bail!(
                "aggregate_func can only be [\"sum\", \"mean\", \"median\", \"downsample\"], got \"{}\"",
                s
            ),
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateFunc::Sum => "sum",
            AggregateFunc::Mean => "mean",
            AggregateFunc::Median => "median",
            AggregateFunc::Downsample => "downsample",
        })
    }
}

/// Metadata of one pseudo-cell
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PseudoCellObs {
    /// Pseudo-cell label, `<cluster>::<path>`
    pub label: String,
    /// Number of source cells
    pub n_cells: usize,
    /// Cluster the source cells belong to
    pub cluster: String,
}

/// One row per pseudo-cell, with its metadata in `obs` at the same position
#[derive(Clone, Debug)]
pub struct ReducedDataset {
    /// Aggregated feature rows
    pub matrix: ReducedMatrix,
    /// Pseudo-cell metadata, aligned with the rows of `matrix`
    pub obs: Vec<PseudoCellObs>,
}

impl ReducedDataset {
    /// Total source cells per cluster
    pub fn cluster_cell_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for o in &self.obs {
            *counts.entry(o.cluster.as_str()).or_insert(0) += o.n_cells;
        }
        counts
    }
}

/// Cluster part of a pseudo-cell label: everything before the last `::`
pub fn cluster_of_label(label: &str) -> &str {
    label.rsplit_once("::").map_or(label, |(cluster, _)| cluster)
}

/// Collapse the rows of `matrix` that share a label.
///
/// `labels[i]` is the pseudo-cell label of row `i`. A pseudo-cell with a single member keeps
/// that member's row. `Downsample` draws its member from `rng`. The reduced matrix is sparse
/// if and only if `matrix` is.
pub fn aggregate<M, R>(
    matrix: &M,
    labels: &[String],
    method: AggregateFunc,
    rng: &mut R,
) -> Result<ReducedDataset, Error>
where
    M: AggregationMat + ?Sized,
    R: Rng,
{
    // column-major sparse input is converted once so every group reads whole rows
    match matrix.row_major_copy() {
        Some(csr) => collapse_groups(&csr, labels, method, rng),
        None => collapse_groups(matrix, labels, method, rng),
    }
}

fn collapse_groups<M, R>(
    matrix: &M,
    labels: &[String],
    method: AggregateFunc,
    rng: &mut R,
) -> Result<ReducedDataset, Error>
where
    M: AggregationMat + ?Sized,
    R: Rng,
{
    let sparse = matrix.is_sparse();
    let [n_rows, n_cols] = matrix.shape();
    if labels.len() != n_rows {
        bail!(
            "{} pseudo-cell labels given for a matrix with {} rows",
            labels.len(),
            n_rows
        );
    }

    let groups = group_by_label(labels);
    debug!(
        "aggregating {} rows into {} groups by {} ({} input)",
        n_rows,
        groups.len(),
        method,
        if sparse { "sparse" } else { "dense" }
    );

    let mut rows = Vec::with_capacity(groups.len());
    let mut obs = Vec::with_capacity(groups.len());
    for (label, members) in groups {
        let row = if members.len() == 1 {
            matrix.row_dense(members[0])
        } else {
            match method {
                AggregateFunc::Sum => sum_rows(matrix, &members, n_cols),
                AggregateFunc::Mean => sum_rows(matrix, &members, n_cols) / members.len() as f64,
                AggregateFunc::Median => column_medians(matrix, &members)
                    .map_err(|e| format_err!("median of pseudo-cell {}: {:?}", label, e))?,
                AggregateFunc::Downsample => matrix.row_dense(members[rng.gen_range(0..members.len())]),
            }
        };
        rows.push(row);
        obs.push(PseudoCellObs {
            label: label.to_string(),
            n_cells: members.len(),
            cluster: cluster_of_label(label).to_string(),
        });
    }

    Ok(ReducedDataset {
        matrix: ReducedMatrix::from_rows(&rows, n_cols, sparse),
        obs,
    })
}

fn sum_rows<M: AggregationMat + ?Sized>(matrix: &M, rows: &[usize], n_cols: usize) -> Array1<f64> {
    let mut acc = Array1::zeros(n_cols);
    for &row in rows {
        matrix.add_row_to(row, &mut acc);
    }
    acc
}
