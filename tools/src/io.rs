use anyhow::{bail, Context, Error};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array2, ArrayView2};
use pseudo_cell::PseudoCellObs;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Open a file for reading, decompressing it if the name ends in `.gz`
pub fn open_maybe_gz(path: impl AsRef<Path>) -> Result<Box<dyn Read>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    Ok(if is_gz(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    })
}

fn create_maybe_gz(path: &Path) -> Result<Box<dyn Write>, Error> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    Ok(if is_gz(path) {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    })
}

/// A numeric matrix with named rows and columns
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledMatrix {
    /// Row names, usually cell ids
    pub rows: Vec<String>,
    /// Column names
    pub cols: Vec<String>,
    /// Values, `rows.len() x cols.len()`
    pub data: Array2<f64>,
}

/// Read a CSV with a header line and the row name in the first column
pub fn read_labeled_csv(path: impl AsRef<Path>) -> Result<LabeledMatrix, Error> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_reader(open_maybe_gz(path)?);
    let cols: Vec<String> = reader.headers()?.iter().skip(1).map(str::to_string).collect();

    let mut rows = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        let Some(name) = record.get(0) else { bail!("empty line in {}", path.display()) };
        if record.len() != cols.len() + 1 {
            bail!(
                "row {} of {} has {} values, expected {}",
                name,
                path.display(),
                record.len() - 1,
                cols.len()
            );
        }
        rows.push(name.to_string());
        for v in record.iter().skip(1) {
            values.push(
                v.trim()
                    .parse::<f64>()
                    .with_context(|| format!("value '{}' in row {} of {}", v, name, path.display()))?,
            );
        }
    }

    let data = Array2::from_shape_vec((rows.len(), cols.len()), values)?;
    Ok(LabeledMatrix { rows, cols, data })
}

/// Read a two column `cell,cluster` CSV with a header line
pub fn read_clusters(path: impl AsRef<Path>) -> Result<Vec<(String, String)>, Error> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_reader(open_maybe_gz(path)?);
    let mut clusters = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        match (record.get(0), record.get(1)) {
            (Some(cell), Some(cluster)) => clusters.push((cell.to_string(), cluster.to_string())),
            _ => bail!("{}: expected cell and cluster columns", path.display()),
        }
    }
    Ok(clusters)
}

/// Write a CSV with a header line and row names in the first column; gzipped if the name
/// ends in `.gz`
pub fn write_labeled_csv(
    path: impl AsRef<Path>,
    index_name: &str,
    rows: &[String],
    cols: &[String],
    data: &ArrayView2<f64>,
) -> Result<(), Error> {
    let path = path.as_ref();
    if data.dim() != (rows.len(), cols.len()) {
        bail!(
            "matrix of shape {:?} does not match {} row and {} column names",
            data.shape(),
            rows.len(),
            cols.len()
        );
    }
    let mut writer = csv::Writer::from_writer(create_maybe_gz(path)?);
    writer.write_record(std::iter::once(index_name).chain(cols.iter().map(String::as_str)))?;
    for (name, row) in rows.iter().zip(data.outer_iter()) {
        writer.write_record(std::iter::once(name.clone()).chain(row.iter().map(f64::to_string)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write pseudo-cell metadata
pub fn write_obs(path: impl AsRef<Path>, obs: &[PseudoCellObs]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(create_maybe_gz(path.as_ref())?);
    writer.write_record(["pseudo_cell", "n_cells", "cluster"])?;
    for o in obs {
        writer.write_record([o.label.as_str(), o.n_cells.to_string().as_str(), o.cluster.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the pseudo-cell label of each cell
pub fn write_cell_labels(path: impl AsRef<Path>, cells: &[String], labels: &[String]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(create_maybe_gz(path.as_ref())?);
    writer.write_record(["cell", "pseudo_cell"])?;
    for (cell, label) in cells.iter().zip(labels) {
        writer.write_record([cell, label])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_labeled_csv() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let data = array![[0.5, -1.0, 3.0], [2.0, 0.0, 1e-3]];
        let rows = names(&["cell_a", "cell_b"]);
        let cols = names(&["PC1", "PC2", "PC3"]);

        for file in ["pcs.csv", "pcs.csv.gz"] {
            let path = dir.path().join(file);
            write_labeled_csv(&path, "cell", &rows, &cols, &data.view())?;
            let m = read_labeled_csv(&path)?;
            assert_eq!(m.rows, rows);
            assert_eq!(m.cols, cols);
            assert_eq!(m.data, data);
        }

        assert!(write_labeled_csv(dir.path().join("x.csv"), "cell", &rows[..1], &cols, &data.view()).is_err());
        Ok(())
    }

    #[test]
    fn test_bad_csv() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "cell,PC1\na,1.0\nb,x\n")?;
        assert!(read_labeled_csv(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_clusters_and_labels() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clusters.csv");
        std::fs::write(&path, "cell,cluster\na,L2/3\nb,Pvalb\n")?;
        let clusters = read_clusters(&path)?;
        assert_eq!(
            clusters,
            vec![
                ("a".to_string(), "L2/3".to_string()),
                ("b".to_string(), "Pvalb".to_string())
            ]
        );

        let out = dir.path().join("labels.csv");
        write_cell_labels(&out, &names(&["a", "b"]), &names(&["L2/3::|0", "Pvalb::|0"]))?;
        assert_eq!(
            std::fs::read_to_string(&out)?,
            "cell,pseudo_cell\na,L2/3::|0\nb,Pvalb::|0\n"
        );

        let obs_path = dir.path().join("obs.csv");
        let obs = vec![PseudoCellObs {
            label: "L2/3::|0".to_string(),
            n_cells: 4,
            cluster: "L2/3".to_string(),
        }];
        write_obs(&obs_path, &obs)?;
        assert_eq!(
            std::fs::read_to_string(&obs_path)?,
            "pseudo_cell,n_cells,cluster\nL2/3::|0,4,L2/3\n"
        );
        Ok(())
    }
}
