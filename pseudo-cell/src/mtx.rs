use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Load a real-valued MatrixMarket coordinate file, gzipped if the name ends in `.gz`.
///
/// Rows are cells and columns are features. Entries listed more than once are summed.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CsMat<f64>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(file)
    };
    read_mtx(reader).with_context(|| format!("reading {}", path.display()))
}

fn read_mtx(mut reader: impl BufRead) -> Result<CsMat<f64>, Error> {
    let mut line = String::new();
    let mut mat: Option<TriMat<f64>> = None;
    let mut line_no = 0;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        line_no += 1;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), nnz));
            }
            Some(m) => {
                let row = data
                    .next()
                    .ok_or_else(|| format_err!("missing ROW on line {}", line_no))?
                    .parse::<usize>()?;
                let col = data
                    .next()
                    .ok_or_else(|| format_err!("missing COL on line {}", line_no))?
                    .parse::<usize>()?;
                let val = data
                    .next()
                    .ok_or_else(|| format_err!("missing VAL on line {}", line_no))?
                    .parse::<f64>()?;
                if row == 0 || col == 0 || row > m.rows() || col > m.cols() {
                    bail!(
                        "entry ({}, {}) on line {} is outside a {}x{} matrix",
                        row,
                        col,
                        line_no,
                        m.rows(),
                        m.cols()
                    );
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
    }

    let Some(matrix) = mat else { bail!("no matrix found") };
    Ok(matrix.to_csr())
}

/// Write `matrix` as a gzipped MatrixMarket coordinate file
pub fn write_mtx_gz(path: impl AsRef<Path>, matrix: &CsMat<f64>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut gz = BufWriter::new(GzEncoder::new(file, Compression::default()));
    writeln!(gz, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(gz, "{} {} {}", matrix.rows(), matrix.cols(), matrix.nnz())?;
    for (&val, (row, col)) in matrix.iter() {
        writeln!(gz, "{} {} {}", row + 1, col + 1, val)?;
    }
    gz.into_inner()
        .map_err(|e| format_err!("flushing {}: {}", path.display(), e.error()))?
        .finish()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_round_trip() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("features.mtx.gz");
        let mut tri = TriMat::new((3, 4));
        tri.add_triplet(0, 1, 2.5);
        tri.add_triplet(2, 3, 1.0);
        tri.add_triplet(2, 0, 7.0);
        let m: CsMat<f64> = tri.to_csr();

        write_mtx_gz(&path, &m)?;
        let loaded = load_mtx(&path)?;
        assert_eq!(loaded.to_dense(), m.to_dense());
        Ok(())
    }

    #[test]
    fn test_plain_text() -> Result<(), Error> {
        let mut file = tempfile::Builder::new().suffix(".mtx").tempfile()?;
        write!(
            file,
            "%%MatrixMarket matrix coordinate real general\n% comment\n2 2 3\n1 1 1\n2 2 0.5\n1 1 2\n"
        )?;
        let loaded = load_mtx(file.path())?;
        assert_eq!(loaded.to_dense(), array![[3.0, 0.0], [0.0, 0.5]]);
        Ok(())
    }

    #[test]
    fn test_bad_input() {
        assert!(read_mtx("% only a comment\n".as_bytes()).is_err());
        assert!(read_mtx("2 2 1\n3 1 1.0\n".as_bytes()).is_err());
        assert!(read_mtx("2 2 1\n1 1\n".as_bytes()).is_err());
    }
}
