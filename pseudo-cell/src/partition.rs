use crate::kmeans::{mini_batch_kmeans, KmeansArgs};
use anyhow::{bail, Error};
use log::{debug, warn};
use ndarray::{ArrayView2, Axis};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// Upper bound on the number of clusters requested from a single k-means split
pub const DEFAULT_MAX_BRANCHING: usize = 50;

/// Recursively splits a set of cells with k-means until every group holds at most
/// `max_group_size` cells.
///
/// Labels record the path through the split tree, e.g. `|0|2|1`: one `|<index>` token per
/// split, root first.
#[derive(Clone, Debug)]
pub struct Partitioner {
    max_branching: usize,
    seed: u64,
}

impl Default for Partitioner {
    fn default() -> Self {
        Partitioner::new(0)
    }
}

impl Partitioner {
    /// New partitioner whose k-means calls are seeded with `seed`
    pub fn new(seed: u64) -> Partitioner {
        Partitioner {
            max_branching: DEFAULT_MAX_BRANCHING,
            seed,
        }
    }

    /// Bound the number of clusters requested from one k-means split
    pub fn with_max_branching(mut self, max_branching: usize) -> Partitioner {
        self.max_branching = max_branching;
        self
    }

    /// Split factor for a subset of `n` rows
    fn split_factor(&self, n: usize, max_group_size: usize) -> usize {
        (n / max_group_size + 1).min(self.max_branching).min(n)
    }

    /// Label each row of `matrix`. The returned vector is aligned with the rows.
    ///
    /// With `max_group_size <= 1` no clustering is done and row `i` gets the label `|i`.
    pub fn partition_rows(&self, matrix: &ArrayView2<f64>, max_group_size: usize) -> Result<Vec<String>, Error> {
        let n = matrix.nrows();
        if max_group_size <= 1 {
            return Ok((0..n).map(|i| format!("|{i}")).collect());
        }
        if self.max_branching == 0 {
            bail!("max_branching must be >= 1");
        }

        let mut labels = vec![String::new(); n];
        let mut to_process: Vec<(Vec<usize>, String)> = Vec::new();
        if n > 0 {
            to_process.push(((0..n).collect(), String::new()));
        }

        while let Some((rows, prefix)) = to_process.pop() {
            let k = self.split_factor(rows.len(), max_group_size);
            let sub_matrix = matrix.select(Axis(0), &rows);
            let args = KmeansArgs {
                seed: self.seed,
                ..KmeansArgs::with_clusters(k)
            };
            let fit = mini_batch_kmeans(&sub_matrix.view(), &args)?;

            let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for (&row, &cluster) in rows.iter().zip(fit.labels.iter()) {
                groups.entry(cluster).or_default().push(row);
            }

            if groups.len() == 1 && rows.len() > max_group_size {
                // k-means put everything in one cluster (e.g. duplicated points)
                warn!(
                    "k-means with k={} did not split {} cells under '{}'; bisecting by input order",
                    k,
                    rows.len(),
                    prefix
                );
                let (left, right) = rows.split_at(rows.len() / 2);
                groups = BTreeMap::from([(0, left.to_vec()), (1, right.to_vec())]);
            }

            debug!(
                "split {} cells under '{}' into {} groups (k={})",
                rows.len(),
                prefix,
                groups.len(),
                k
            );

            for (cluster, members) in groups {
                let label = format!("{prefix}|{cluster}");
                for &row in &members {
                    labels[row].clone_from(&label);
                }
                if members.len() > max_group_size {
                    to_process.push((members, label));
                }
            }
        }

        Ok(labels)
    }

    /// Label each cell. `cell_ids` name the rows of `matrix` in order and must be unique.
    pub fn partition<C>(
        &self,
        matrix: &ArrayView2<f64>,
        cell_ids: &[C],
        max_group_size: usize,
    ) -> Result<HashMap<C, String>, Error>
    where
        C: Clone + Eq + Hash + Debug,
    {
        if matrix.nrows() != cell_ids.len() {
            bail!(
                "matrix has {} rows but {} cell ids were given",
                matrix.nrows(),
                cell_ids.len()
            );
        }

        let labels = self.partition_rows(matrix, max_group_size)?;
        let mut result = HashMap::with_capacity(cell_ids.len());
        for (cell, label) in cell_ids.iter().zip(labels) {
            if result.insert(cell.clone(), label).is_some() {
                bail!("duplicate cell id {:?}", cell);
            }
        }
        Ok(result)
    }
}

/// Group row indices by label
pub fn group_by_label(labels: &[String]) -> BTreeMap<&str, Vec<usize>> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(label.as_str()).or_default().push(i);
    }
    groups
}
