//! Statistics functions

use crate::matrix::AggregationMat;
use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;

/// Return the median. Sorts its argument in place; any NaN makes the median NaN.
pub fn median_mut<S>(xs: &mut ArrayBase<S, Ix1>) -> Result<f64, QuantileError>
where
    S: DataMut<Elem = f64>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    if xs.iter().any(|x| x.is_nan()) {
        return Ok(f64::NAN);
    }
    match xs.as_slice_mut() {
        Some(vector) => vector.sort_unstable_by(f64::total_cmp),
        None => panic!("An attempt was made to calculate a median value for non-contiguous data"),
    }
    let n = xs.len();
    Ok(if n % 2 == 0 {
        (xs[n / 2] + xs[n / 2 - 1]) / 2.0
    } else {
        xs[n / 2]
    })
}

/// Column-wise median over the selected rows of `matrix`.
///
/// The rows are copied into a feature-major buffer so that each column is contiguous
/// and can be sorted in place.
pub(crate) fn column_medians<M>(matrix: &M, rows: &[usize]) -> Result<Array1<f64>, QuantileError>
where
    M: AggregationMat + ?Sized,
{
    let selected = matrix.select_rows_dense(rows);
    let mut buf = selected.t().as_standard_layout().into_owned();
    buf.axis_iter_mut(Axis(0))
        .map(|mut column| median_mut(&mut column))
        .collect()
}

#[cfg(test)]
mod test_stats {
    use super::*;
    use ndarray::prelude::array;

    #[test]
    fn test_median_mut() {
        assert_eq!(
            median_mut(&mut Array1::<f64>::from(vec![])),
            Err(QuantileError::EmptyInput)
        );
        assert_eq!(median_mut(&mut array![1.]), Ok(1.0));
        assert_eq!(median_mut(&mut array![10., 1.]), Ok(5.5));
        assert_eq!(median_mut(&mut array![100., 1., 10.]), Ok(10.0));
        assert_eq!(median_mut(&mut array![1., 1000., 10., 100.]), Ok(55.0));
        assert!(median_mut(&mut array![1., f64::NAN, 3.]).unwrap().is_nan());
    }

    #[test]
    fn test_column_medians() {
        let m = array![[1.0, 0.0, 7.0], [3.0, 0.0, 5.0], [2.0, 9.0, 6.0], [100.0, 1.0, 1.0]];
        assert_eq!(column_medians(&m, &[0, 1, 2]).unwrap(), array![2.0, 0.0, 6.0]);
        assert_eq!(column_medians(&m, &[0, 3]).unwrap(), array![50.5, 0.5, 4.0]);
        assert_eq!(column_medians(&m, &[]), Err(QuantileError::EmptyInput));
    }
}
