use crate::value::{ArrayData, AxisEntries, DafType, ScalarValue};
use std::collections::BTreeSet;

/// Physical major-axis orientation of a stored matrix, relative to a
/// `(rows, columns)` axis pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixLayout {
    RowMajor,
    ColumnMajor,
}

/// A numeric matrix handed out by a reader, row-major aligned to the
/// requested `(rows, columns)` axis pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatrix {
    pub dtype: DafType,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl StoredMatrix {
    /// The same matrix with its major axis flipped.
    pub fn transposed(&self) -> Self {
        let mut values = vec![0.0; self.values.len()];
        for row in 0..self.rows {
            for col in 0..self.cols {
                values[col * self.rows + row] = self.values[row * self.cols + col];
            }
        }
        Self {
            dtype: self.dtype,
            rows: self.cols,
            cols: self.rows,
            values,
        }
    }
}

/// Identity of one named entity of a data set, used for cache
/// dependency tracking. The matrix axis pair is normalized so both
/// orientations share one key; `Schema` stands for the name sets
/// themselves and is bumped by any create or delete.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    Scalar(String),
    Axis(String),
    Vector(String, String),
    Matrix(String, String, String),
    Schema,
}

impl EntityKey {
    pub fn scalar(name: &str) -> Self {
        Self::Scalar(name.to_string())
    }

    pub fn axis(name: &str) -> Self {
        Self::Axis(name.to_string())
    }

    pub fn vector(axis: &str, name: &str) -> Self {
        Self::Vector(axis.to_string(), name.to_string())
    }

    pub fn matrix(rows_axis: &str, cols_axis: &str, name: &str) -> Self {
        if rows_axis <= cols_axis {
            Self::Matrix(rows_axis.to_string(), cols_axis.to_string(), name.to_string())
        } else {
            Self::Matrix(cols_axis.to_string(), rows_axis.to_string(), name.to_string())
        }
    }
}

/// Schema-only view of a data set: the analyzer consults names and
/// layouts, never values.
pub trait DafSchema {
    /// The data set name appended to evaluation errors.
    fn name(&self) -> &str;

    fn has_scalar(&self, name: &str) -> bool;
    fn scalar_names(&self) -> BTreeSet<String>;

    fn has_axis(&self, axis: &str) -> bool;
    fn axis_names(&self) -> BTreeSet<String>;

    fn has_vector(&self, axis: &str, name: &str) -> bool;
    fn vector_names(&self, axis: &str) -> BTreeSet<String>;

    /// True when the matrix exists under the axis pair in either
    /// orientation.
    fn has_matrix(&self, rows_axis: &str, cols_axis: &str, name: &str) -> bool;
    fn matrix_names(&self, rows_axis: &str, cols_axis: &str) -> BTreeSet<String>;

    /// Stored orientation relative to `(rows_axis, cols_axis)`; `None`
    /// when the matrix does not exist under this axis pair. A
    /// `ColumnMajor` answer means satisfying a row-major request
    /// requires a relayout.
    fn matrix_layout(&self, rows_axis: &str, cols_axis: &str, name: &str)
        -> Option<MatrixLayout>;
}

/// Read path consumed by the evaluator.
pub trait DafReader: DafSchema {
    fn get_scalar(&self, name: &str) -> Option<ScalarValue>;

    /// Ordered unique entry names of an axis.
    fn axis_entries(&self, axis: &str) -> Option<AxisEntries>;

    /// A vector aligned to the axis entry order.
    fn get_vector(&self, axis: &str, name: &str) -> Option<ArrayData>;

    /// A matrix row-major aligned to `(rows_axis, cols_axis)`. With
    /// `relayout` false the request fails instead of materializing a
    /// transposed copy when the stored orientation differs.
    fn get_matrix(
        &self,
        rows_axis: &str,
        cols_axis: &str,
        name: &str,
        relayout: bool,
    ) -> Option<StoredMatrix>;

    /// Monotonic per-entity mutation counter; `None` when the backend
    /// does not track versions (callers must then clear caches
    /// explicitly on mutation).
    fn entity_version(&self, key: &EntityKey) -> Option<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_keys_normalize_axis_order() {
        assert_eq!(
            EntityKey::matrix("gene", "cell", "umi"),
            EntityKey::matrix("cell", "gene", "umi")
        );
    }

    #[test]
    fn transpose_flips_row_major_data() {
        let matrix = StoredMatrix {
            dtype: DafType::I32,
            rows: 2,
            cols: 3,
            values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        };
        let flipped = matrix.transposed();
        assert_eq!(flipped.rows, 3);
        assert_eq!(flipped.cols, 2);
        assert_eq!(flipped.values, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
