use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use thiserror::Error;

/// Pivots smaller than this (relative to the largest element) count as zero
/// when inverting.
pub const SINGULAR_EPSILON: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    #[error("Index ({row}, {col}) out of range for {rows} x {cols} matrix")]
    IndexOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Dimensions {0} x {1} and {2} x {3} do not match")]
    DimensionMismatch(usize, usize, usize, usize),
    #[error("Matrix must be square, is {0} x {1}")]
    NotSquare(usize, usize),
    #[error("Matrix is singular")]
    Singular,
    #[error("Matrix is empty")]
    Empty,
}

///
/// A small dense matrix of f64, stored row-major.
///
/// Arithmetic never panics: operands with mismatched dimensions give
/// an empty (0 x 0) matrix and an error in the log.
///
#[derive(Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Matrix {
            rows,
            cols,
            data: vec![0.; rows * cols],
        }
    }

    pub fn empty() -> Self {
        Matrix::new(0, 0)
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Matrix::new(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.;
        }
        m
    }

    pub fn diag(values: &[f64]) -> Self {
        let n = values.len();
        let mut m = Matrix::new(n, n);
        for (i, v) in values.iter().enumerate() {
            m.data[i * n + i] = *v;
        }
        m
    }

    /// Build from rows; rows of unequal length give an empty matrix.
    pub fn from_rows(rows: &[&[f64]]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            log::error!("Matrix rows have unequal length");
            return Matrix::empty();
        }
        Matrix {
            rows: rows.len(),
            cols,
            data: rows.iter().flat_map(|r| r.iter().copied()).collect(),
        }
    }

    pub fn column(values: &[f64]) -> Self {
        Matrix {
            rows: values.len(),
            cols: 1,
            data: values.to_vec(),
        }
    }

    pub fn from_array4(a: &[[f64; 4]; 4]) -> Self {
        Matrix {
            rows: 4,
            cols: 4,
            data: a.iter().flatten().copied().collect(),
        }
    }

    /// The 4 x 4 covariance as sent to other radars. Elements outside the
    /// matrix are NaN.
    pub fn to_array4(&self) -> [[f64; 4]; 4] {
        let mut a = [[f64::NAN; 4]; 4];
        for (r, row) in a.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                if r < self.rows && c < self.cols {
                    *v = self.data[r * self.cols + c];
                }
            }
        }
        a
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    fn check(&self, row: usize, col: usize) -> Result<usize, MatrixError> {
        if row < self.rows && col < self.cols {
            Ok(row * self.cols + col)
        } else {
            Err(MatrixError::IndexOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            })
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, MatrixError> {
        self.check(row, col).map(|i| self.data[i])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        let i = self.check(row, col)?;
        self.data[i] = value;
        Ok(())
    }

    /// Element access for callers that know their dimensions.
    /// Out of range gives NaN and an error in the log.
    pub fn at(&self, row: usize, col: usize) -> f64 {
        match self.get(row, col) {
            Ok(v) => v,
            Err(e) => {
                log::error!("{}", e);
                f64::NAN
            }
        }
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::new(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                res.data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        res
    }

    /// The matrix with `row` and `col` removed.
    pub fn minor(&self, row: usize, col: usize) -> Result<Matrix, MatrixError> {
        self.check(row, col)?;
        let mut res = Matrix::new(self.rows - 1, self.cols - 1);
        let mut i = 0;
        for r in (0..self.rows).filter(|r| *r != row) {
            for c in (0..self.cols).filter(|c| *c != col) {
                res.data[i] = self.data[r * self.cols + c];
                i += 1;
            }
        }
        Ok(res)
    }

    /// Determinant by cofactor expansion along the first row.
    pub fn det(&self) -> Result<f64, MatrixError> {
        if !self.is_square() {
            return Err(MatrixError::NotSquare(self.rows, self.cols));
        }
        let d = &self.data;
        match self.rows {
            0 => Err(MatrixError::Empty),
            1 => Ok(d[0]),
            2 => Ok(d[0] * d[3] - d[2] * d[1]),
            n => {
                let mut det = 0.;
                for c in 0..n {
                    if d[c] == 0. {
                        continue;
                    }
                    let sign = if c % 2 == 0 { 1. } else { -1. };
                    det += sign * d[c] * self.minor(0, c)?.det()?;
                }
                Ok(det)
            }
        }
    }

    /// Gauss-Jordan elimination with partial pivoting.
    pub fn inverse(&self) -> Result<Matrix, MatrixError> {
        if !self.is_square() {
            return Err(MatrixError::NotSquare(self.rows, self.cols));
        }
        let n = self.rows;
        if n == 0 {
            return Err(MatrixError::Empty);
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(MatrixError::Singular);
        }
        let scale = self.data.iter().fold(0., |m: f64, v| m.max(v.abs()));
        if scale == 0. {
            return Err(MatrixError::Singular);
        }

        let mut a = self.clone();
        let mut res = Matrix::identity(n);

        for c in 0..n {
            let pivot = (c..n)
                .max_by(|x, y| a.data[x * n + c].abs().total_cmp(&a.data[y * n + c].abs()))
                .unwrap_or(c);
            if a.data[pivot * n + c].abs() <= SINGULAR_EPSILON * scale {
                return Err(MatrixError::Singular);
            }
            if pivot != c {
                a.swap_rows(pivot, c);
                res.swap_rows(pivot, c);
            }

            let f = a.data[c * n + c];
            for s in 0..n {
                a.data[c * n + s] /= f;
                res.data[c * n + s] /= f;
            }
            for r in (0..n).filter(|r| *r != c) {
                let f = a.data[r * n + c];
                if f != 0. {
                    for s in 0..n {
                        a.data[r * n + s] -= f * a.data[c * n + s];
                        res.data[r * n + s] -= f * res.data[c * n + s];
                    }
                }
            }
        }
        Ok(res)
    }

    /// Zero out a row, used to drop one measurement axis.
    pub fn zero_row(&mut self, row: usize) -> Result<(), MatrixError> {
        self.check(row, 0)?;
        for c in 0..self.cols {
            self.data[row * self.cols + c] = 0.;
        }
        Ok(())
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        for c in 0..self.cols {
            self.data.swap(a * self.cols + c, b * self.cols + c);
        }
    }

    fn zip_with(&self, other: &Matrix, op: &str, f: impl Fn(f64, f64) -> f64) -> Matrix {
        if self.rows != other.rows || self.cols != other.cols {
            log::error!(
                "{}: {}",
                op,
                MatrixError::DimensionMismatch(self.rows, self.cols, other.rows, other.cols)
            );
            return Matrix::empty();
        }
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        }
    }

    fn multiply(&self, other: &Matrix) -> Matrix {
        if self.cols != other.rows {
            log::error!(
                "*: {}",
                MatrixError::DimensionMismatch(self.rows, self.cols, other.rows, other.cols)
            );
            return Matrix::empty();
        }
        let mut res = Matrix::new(self.rows, other.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let v = self.data[r * self.cols + k];
                if v == 0. {
                    continue;
                }
                for c in 0..other.cols {
                    res.data[r * other.cols + c] += v * other.data[k * other.cols + c];
                }
            }
        }
        res
    }

    fn scale(&self, f: f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| v * f).collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::empty()
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix {}x{} [", self.rows, self.cols)?;
        for r in 0..self.rows {
            if r > 0 {
                write!(f, "; ")?;
            }
            for c in 0..self.cols {
                if c > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", self.data[r * self.cols + c])?;
            }
        }
        write!(f, "]")
    }
}

impl Add for &Matrix {
    type Output = Matrix;

    fn add(self, other: &Matrix) -> Matrix {
        self.zip_with(other, "+", |a, b| a + b)
    }
}

impl Sub for &Matrix {
    type Output = Matrix;

    fn sub(self, other: &Matrix) -> Matrix {
        self.zip_with(other, "-", |a, b| a - b)
    }
}

impl Mul for &Matrix {
    type Output = Matrix;

    fn mul(self, other: &Matrix) -> Matrix {
        self.multiply(other)
    }
}

impl Mul<f64> for &Matrix {
    type Output = Matrix;

    fn mul(self, f: f64) -> Matrix {
        self.scale(f)
    }
}

impl Neg for &Matrix {
    type Output = Matrix;

    fn neg(self) -> Matrix {
        self.scale(-1.)
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(self, other: Matrix) -> Matrix {
        &self + &other
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(self, other: Matrix) -> Matrix {
        &self - &other
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, other: Matrix) -> Matrix {
        &self * &other
    }
}

impl Mul<f64> for Matrix {
    type Output = Matrix;

    fn mul(self, f: f64) -> Matrix {
        &self * f
    }
}

impl Neg for Matrix {
    type Output = Matrix;

    fn neg(self) -> Matrix {
        -&self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, Matrix4};

    fn assert_near(a: &Matrix, b: &Matrix, eps: f64) {
        assert_eq!(a.rows(), b.rows());
        assert_eq!(a.cols(), b.cols());
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert!((x - y).abs() < eps, "{:?} != {:?}", a, b);
        }
    }

    fn sample4() -> Matrix {
        Matrix::from_rows(&[
            &[4., 7., 2., 0.5],
            &[3., 6., 1., -2.],
            &[2., 5., 3., 1.],
            &[0., 1., -1., 8.],
        ])
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut m = Matrix::new(2, 3);
        assert!(m.get(1, 2).is_ok());
        assert_eq!(
            m.get(2, 0),
            Err(MatrixError::IndexOutOfRange {
                row: 2,
                col: 0,
                rows: 2,
                cols: 3
            })
        );
        assert!(m.set(0, 3, 1.).is_err());
        assert!(m.at(5, 5).is_nan());
    }

    #[test]
    fn mismatched_dimensions_give_empty() {
        let a = Matrix::new(2, 3);
        let b = Matrix::new(3, 2);
        assert!((&a + &b).is_empty());
        assert!((&a - &b).is_empty());
        assert!((&a * &a).is_empty());
        assert_eq!((&a * &b).rows(), 2);
        assert_eq!((&a * &b).cols(), 2);
    }

    #[test]
    fn det_2x2_closed_form() {
        let m = Matrix::from_rows(&[&[3., 8.], &[4., 6.]]);
        assert_eq!(m.det(), Ok(3. * 6. - 8. * 4.));
        assert_eq!(Matrix::new(2, 3).det(), Err(MatrixError::NotSquare(2, 3)));
    }

    #[test]
    fn det_matches_nalgebra() {
        let m = sample4();
        let n = Matrix4::from_row_slice(m.as_slice());
        assert!((m.det().unwrap() - n.determinant()).abs() < 1e-9);
    }

    #[test]
    fn minor_removes_row_and_col() {
        let m = Matrix::from_rows(&[&[1., 2., 3.], &[4., 5., 6.], &[7., 8., 9.]]);
        let expected = Matrix::from_rows(&[&[1., 3.], &[7., 9.]]);
        assert_eq!(m.minor(1, 1).unwrap(), expected);
        assert!(m.minor(3, 0).is_err());
    }

    #[test]
    fn inverse_gives_identity() {
        let m = sample4();
        let inv = m.inverse().unwrap();
        assert_near(&(&m * &inv), &Matrix::identity(4), 1e-9);
        assert_near(&(&inv * &m), &Matrix::identity(4), 1e-9);

        let n = DMatrix::from_row_slice(4, 4, m.as_slice())
            .try_inverse()
            .unwrap();
        for r in 0..4 {
            for c in 0..4 {
                assert!((inv.at(r, c) - n[(r, c)]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn inverse_needs_pivoting() {
        let m = Matrix::from_rows(&[&[0., 1., 0.], &[1., 0., 0.], &[0., 0., 2.]]);
        let inv = m.inverse().unwrap();
        assert_near(&(&m * &inv), &Matrix::identity(3), 1e-12);
    }

    #[test]
    fn inverse_fails_on_singular_and_non_square() {
        let m = Matrix::from_rows(&[&[1., 2.], &[2., 4.]]);
        assert_eq!(m.inverse(), Err(MatrixError::Singular));
        assert_eq!(
            Matrix::new(2, 3).inverse(),
            Err(MatrixError::NotSquare(2, 3))
        );
        assert_eq!(Matrix::new(3, 3).inverse(), Err(MatrixError::Singular));
    }

    #[test]
    fn nearly_singular_is_rejected_by_epsilon() {
        // The determinant is not exactly zero, an exact zero test would
        // invert this matrix.
        let m = Matrix::from_rows(&[&[1., 2.], &[2., 4. + 1e-14]]);
        assert_ne!(m.det().unwrap(), 0.);
        assert_eq!(m.inverse(), Err(MatrixError::Singular));
    }

    #[test]
    fn scalar_and_negation() {
        let m = Matrix::from_rows(&[&[1., -2.], &[3., 0.]]);
        assert_eq!(&m * 2., Matrix::from_rows(&[&[2., -4.], &[6., 0.]]));
        assert_eq!(-&m, Matrix::from_rows(&[&[-1., 2.], &[-3., 0.]]));
        assert_eq!(m.transpose(), Matrix::from_rows(&[&[1., 3.], &[-2., 0.]]));
    }
}
