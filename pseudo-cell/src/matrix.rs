use ndarray::{Array1, Array2, ArrayView2, Axis};
use sprs::{CsMat, CsMatBase, SpIndex, TriMat};
use std::ops::Deref;

/// Row access needed to collapse a cell x feature matrix, for dense and sparse storage alike.
pub trait AggregationMat {
    /// `[rows, cols]`
    fn shape(&self) -> [usize; 2];

    /// true if the matrix is stored sparse. Decides the storage of the reduced matrix.
    fn is_sparse(&self) -> bool;

    /// Add row `row` into `acc`, which has one entry per column
    fn add_row_to(&self, row: usize, acc: &mut Array1<f64>);

    /// Row `row` as a dense vector
    fn row_dense(&self, row: usize) -> Array1<f64> {
        let mut acc = Array1::zeros(self.shape()[1]);
        self.add_row_to(row, &mut acc);
        acc
    }

    /// Row-major copy of a matrix whose rows are slow to read, `None` if rows are already
    /// cheap to access
    fn row_major_copy(&self) -> Option<CsMat<f64>> {
        None
    }

    /// Dense copy of the selected rows
    fn select_rows_dense(&self, rows: &[usize]) -> Array2<f64> {
        let mut out = Array2::zeros((rows.len(), self.shape()[1]));
        for (mut dst, &row) in out.outer_iter_mut().zip(rows) {
            dst.assign(&self.row_dense(row));
        }
        out
    }
}

impl AggregationMat for ArrayView2<'_, f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }

    fn is_sparse(&self) -> bool {
        false
    }

    fn add_row_to(&self, row: usize, acc: &mut Array1<f64>) {
        *acc += &self.row(row);
    }

    fn select_rows_dense(&self, rows: &[usize]) -> Array2<f64> {
        self.select(Axis(0), rows)
    }
}

impl AggregationMat for Array2<f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }

    fn is_sparse(&self) -> bool {
        false
    }

    fn add_row_to(&self, row: usize, acc: &mut Array1<f64>) {
        *acc += &self.row(row);
    }

    fn select_rows_dense(&self, rows: &[usize]) -> Array2<f64> {
        self.select(Axis(0), rows)
    }
}

impl<I, IptrStorage, IndStorage, DataStorage> AggregationMat for CsMatBase<f64, I, IptrStorage, IndStorage, DataStorage>
where
    I: SpIndex,
    IptrStorage: Deref<Target = [I]>,
    IndStorage: Deref<Target = [I]>,
    DataStorage: Deref<Target = [f64]>,
{
    fn shape(&self) -> [usize; 2] {
        [self.rows(), self.cols()]
    }

    fn is_sparse(&self) -> bool {
        true
    }

    fn add_row_to(&self, row: usize, acc: &mut Array1<f64>) {
        if self.is_csr() {
            if let Some(v) = self.outer_view(row) {
                for (col, &x) in v.iter() {
                    acc[col] += x;
                }
            }
        } else {
            // one binary search per column; see row_major_copy
            for col in 0..self.cols() {
                if let Some(&x) = self.get(row, col) {
                    acc[col] += x;
                }
            }
        }
    }

    fn row_major_copy(&self) -> Option<CsMat<f64>> {
        if self.is_csr() {
            return None;
        }
        let mut tri = TriMat::with_capacity((self.rows(), self.cols()), self.nnz());
        for (&x, (row, col)) in self.iter() {
            tri.add_triplet(row.index(), col.index(), x);
        }
        Some(tri.to_csr())
    }
}

/// Reduced matrix, stored the same way as the matrix it was built from
#[derive(Clone, Debug, PartialEq)]
pub enum ReducedMatrix {
    /// Dense rows
    Dense(Array2<f64>),
    /// CSR rows
    Sparse(CsMat<f64>),
}

impl ReducedMatrix {
    /// Stack dense rows of length `cols`, sparsifying when `sparse` is set
    pub fn from_rows(rows: &[Array1<f64>], cols: usize, sparse: bool) -> ReducedMatrix {
        if sparse {
            let nnz = rows.iter().map(|r| r.iter().filter(|&&x| x != 0.0).count()).sum();
            let mut tri = TriMat::with_capacity((rows.len(), cols), nnz);
            for (i, row) in rows.iter().enumerate() {
                for (j, &x) in row.iter().enumerate() {
                    if x != 0.0 {
                        tri.add_triplet(i, j, x);
                    }
                }
            }
            ReducedMatrix::Sparse(tri.to_csr())
        } else {
            let mut out = Array2::zeros((rows.len(), cols));
            for (mut dst, row) in out.outer_iter_mut().zip(rows) {
                dst.assign(row);
            }
            ReducedMatrix::Dense(out)
        }
    }

    /// `[rows, cols]`
    pub fn shape(&self) -> [usize; 2] {
        match self {
            ReducedMatrix::Dense(m) => [m.nrows(), m.ncols()],
            ReducedMatrix::Sparse(m) => [m.rows(), m.cols()],
        }
    }

    /// true for sparse storage
    pub fn is_sparse(&self) -> bool {
        matches!(self, ReducedMatrix::Sparse(_))
    }

    /// Dense copy
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            ReducedMatrix::Dense(m) => m.clone(),
            ReducedMatrix::Sparse(m) => m.to_dense(),
        }
    }
}
