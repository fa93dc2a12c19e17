use crate::config::PseudoCellConfig;
use crate::partition::Partitioner;
use anyhow::{bail, Error};
use itertools::Itertools;
use log::{debug, info};
use ndarray::{ArrayView2, Axis};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Label every cell `<cluster>::<path>`, partitioning each cluster separately.
///
/// `clusters[i]` is the cluster of row `i` of `embedding`. Clusters are processed in
/// sorted order, one embedding subset at a time. The returned labels are aligned with
/// the rows.
pub fn calculate_pseudo_groups<L>(
    clusters: &[L],
    embedding: &ArrayView2<f64>,
    config: &PseudoCellConfig,
) -> Result<Vec<String>, Error>
where
    L: Ord + Display,
{
    config.validate()?;
    if embedding.nrows() != clusters.len() {
        bail!(
            "embedding has {} rows but {} cells have a cluster assignment",
            embedding.nrows(),
            clusters.len()
        );
    }

    let mut by_cluster: BTreeMap<&L, Vec<usize>> = BTreeMap::new();
    for (row, cluster) in clusters.iter().enumerate() {
        by_cluster.entry(cluster).or_default().push(row);
    }
    debug!(
        "cluster sizes: {}",
        by_cluster
            .iter()
            .map(|(cluster, rows)| format!("{}={}", cluster, rows.len()))
            .join(", ")
    );

    let partitioner = Partitioner::new(config.seed).with_max_branching(config.max_branching);
    let mut labels = vec![String::new(); clusters.len()];
    for (cluster, rows) in by_cluster {
        let cap = config.cluster_cap(rows.len());
        let sub_embedding = embedding.select(Axis(0), &rows);
        let paths = partitioner.partition_rows(&sub_embedding.view(), cap)?;

        let n_groups = paths.iter().unique().count();
        info!(
            "cluster {}: {} cells, max pseudo-cell size {}, {} pseudo-cells",
            cluster,
            rows.len(),
            cap,
            n_groups
        );

        for (row, path) in rows.into_iter().zip(paths) {
            labels[row] = format!("{cluster}::{path}");
        }
    }
    Ok(labels)
}

/// Map each cell to its pseudo-cell label.
///
/// `cells`, `clusters` and the rows of `embedding` are aligned by position. Cell ids must
/// be unique.
pub fn plan_and_partition<C, L>(
    cells: &[C],
    clusters: &[L],
    embedding: &ArrayView2<f64>,
    config: &PseudoCellConfig,
) -> Result<HashMap<C, String>, Error>
where
    C: Clone + Eq + Hash + Debug,
    L: Ord + Display,
{
    if cells.len() != clusters.len() {
        bail!(
            "{} cell ids given for {} cluster assignments",
            cells.len(),
            clusters.len()
        );
    }

    let labels = calculate_pseudo_groups(clusters, embedding, config)?;
    let mut result = HashMap::with_capacity(cells.len());
    for (cell, label) in cells.iter().zip(labels) {
        if result.insert(cell.clone(), label).is_some() {
            bail!("duplicate cell id {:?}", cell);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregate::cluster_of_label;
    use ndarray::{array, Array2};

    fn config(pseudoable_cluster_size: usize, max_pseudo_size: usize) -> PseudoCellConfig {
        PseudoCellConfig {
            pseudoable_cluster_size,
            max_pseudo_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_labels_carry_cluster() {
        let embedding = Array2::from_shape_fn((40, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let clusters: Vec<_> = (0..40).map(|i| if i % 3 == 0 { "A" } else { "B" }).collect();
        let labels = calculate_pseudo_groups(&clusters, &embedding.view(), &config(5, 3)).unwrap();
        assert_eq!(labels.len(), 40);
        for (label, cluster) in labels.iter().zip(&clusters) {
            assert_eq!(cluster_of_label(label), *cluster);
            assert!(label.starts_with(&format!("{cluster}::|")));
        }
    }

    #[test]
    fn test_small_cluster_gets_singletons() {
        // fewer cells than pseudoable_cluster_size: cap 1, one pseudo-cell per cell
        let embedding = Array2::from_shape_fn((6, 3), |(i, j)| (i + j) as f64);
        let clusters = vec![1u32; 6];
        let labels = calculate_pseudo_groups(&clusters, &embedding.view(), &PseudoCellConfig::default()).unwrap();
        let expected: Vec<_> = (0..6).map(|i| format!("1::|{i}")).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_rejects_bad_input() {
        let embedding = array![[0.0], [1.0]];
        assert!(calculate_pseudo_groups(&["a"], &embedding.view(), &config(5, 3)).is_err());
        assert!(calculate_pseudo_groups(&["a", "a"], &embedding.view(), &config(0, 3)).is_err());
        assert!(calculate_pseudo_groups(&["a", "a"], &embedding.view(), &config(5, 0)).is_err());
    }

    #[test]
    fn test_plan_and_partition() {
        let embedding = array![[0.0, 0.0], [0.1, 0.0], [5.0, 5.0], [5.1, 5.0], [9.0, 0.0]];
        let cells = ["c0", "c1", "c2", "c3", "c4"];
        let clusters = ["x", "x", "x", "x", "y"];
        let map = plan_and_partition(&cells, &clusters, &embedding.view(), &config(2, 3)).unwrap();
        assert_eq!(map.len(), 5);
        assert_eq!(map["c0"], map["c1"]);
        assert_eq!(map["c2"], map["c3"]);
        assert_ne!(map["c0"], map["c2"]);
        assert_eq!(map["c4"], "y::|0");

        assert!(plan_and_partition(&cells[..4], &clusters, &embedding.view(), &config(2, 3)).is_err());
        let dup = ["c0", "c1", "c2", "c3", "c0"];
        assert!(plan_and_partition(&dup, &clusters, &embedding.view(), &config(2, 3)).is_err());
    }
}
