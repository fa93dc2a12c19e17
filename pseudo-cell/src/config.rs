use crate::aggregate::AggregateFunc;
use crate::partition::DEFAULT_MAX_BRANCHING;
use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Parameters of a pseudo-cell run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PseudoCellConfig {
    /// Number of cells a cluster needs per unit of pseudo-cell size
    pub pseudoable_cluster_size: usize,
    /// Upper bound on the size cap of any cluster
    pub max_pseudo_size: usize,
    /// How rows of one pseudo-cell are combined
    pub aggregate_func: AggregateFunc,
    /// Seed for k-means and for the downsample draw
    pub seed: u64,
    /// Upper bound on k for a single k-means split
    pub max_branching: usize,
}

impl Default for PseudoCellConfig {
    fn default() -> Self {
        PseudoCellConfig {
            pseudoable_cluster_size: 100,
            max_pseudo_size: 25,
            aggregate_func: AggregateFunc::Downsample,
            seed: 0,
            max_branching: DEFAULT_MAX_BRANCHING,
        }
    }
}

impl PseudoCellConfig {
    /// Read a JSON config. Missing keys take their default value.
    pub fn from_json(path: impl AsRef<Path>) -> Result<PseudoCellConfig, Error> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
        let config: PseudoCellConfig =
            serde_json::from_reader(reader).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters that cannot produce a partition
    pub fn validate(&self) -> Result<(), Error> {
        if self.pseudoable_cluster_size == 0 {
            bail!("pseudoable_cluster_size must be >= 1");
        }
        if self.max_pseudo_size == 0 {
            bail!("max_pseudo_size must be >= 1");
        }
        if self.max_branching < 2 {
            bail!("max_branching must be >= 2, got {}", self.max_branching);
        }
        Ok(())
    }

    /// Size cap for a cluster of `n_cells` cells
    pub fn cluster_cap(&self, n_cells: usize) -> usize {
        (n_cells / self.pseudoable_cluster_size + 1).min(self.max_pseudo_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cluster_cap() {
        let config = PseudoCellConfig {
            pseudoable_cluster_size: 5,
            max_pseudo_size: 3,
            ..Default::default()
        };
        assert_eq!(config.cluster_cap(12), 3);
        assert_eq!(config.cluster_cap(1), 1);
        assert_eq!(config.cluster_cap(5), 2);
        assert_eq!(config.cluster_cap(1000), 3);

        let default = PseudoCellConfig::default();
        assert_eq!(default.cluster_cap(99), 1);
        assert_eq!(default.cluster_cap(250), 3);
        assert_eq!(default.cluster_cap(100_000), 25);
    }

    #[test]
    fn test_validate() {
        assert!(PseudoCellConfig::default().validate().is_ok());
        for bad in [
            PseudoCellConfig {
                pseudoable_cluster_size: 0,
                ..Default::default()
            },
            PseudoCellConfig {
                max_pseudo_size: 0,
                ..Default::default()
            },
            PseudoCellConfig {
                max_branching: 1,
                ..Default::default()
            },
        ] {
            assert!(bad.validate().is_err());
        }
    }

    #[test]
    fn test_from_json() -> Result<(), Error> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, r#"{{"max_pseudo_size": 10, "aggregate_func": "mean"}}"#)?;
        let config = PseudoCellConfig::from_json(file.path())?;
        assert_eq!(config.max_pseudo_size, 10);
        assert_eq!(config.aggregate_func, AggregateFunc::Mean);
        assert_eq!(config.pseudoable_cluster_size, 100);

        let mut bad = tempfile::NamedTempFile::new()?;
        writeln!(bad, r#"{{"aggregate_func": "max"}}"#)?;
        assert!(PseudoCellConfig::from_json(bad.path()).is_err());
        Ok(())
    }
}
