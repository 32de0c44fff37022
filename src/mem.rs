use crate::storage::{DafReader, DafSchema, EntityKey, MatrixLayout, StoredMatrix};
use crate::value::{ArrayData, AxisEntries, ScalarValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemDafError {
    #[error("the axis: {0} already exists")]
    AxisExists(String),
    #[error("missing axis: {0}")]
    MissingAxis(String),
    #[error("duplicate entry: {entry} in the axis: {axis}")]
    DuplicateEntry { axis: String, entry: String },
    #[error(
        "the vector: {name} length: {actual} does not match the axis: {axis} length: {expected}"
    )]
    VectorLength {
        axis: String,
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "the matrix: {name} size: {actual} does not match the axes: {rows} and {cols} size: {expected}"
    )]
    MatrixSize {
        rows: String,
        cols: String,
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// The reference in-memory backend: scalars, axes, vectors and matrices
/// held in ordered maps, with a per-entity mutation counter driving
/// cache invalidation.
#[derive(Debug, Default)]
pub struct MemDaf {
    name: String,
    scalars: BTreeMap<String, ScalarValue>,
    axes: BTreeMap<String, AxisEntries>,
    axis_indices: BTreeMap<String, Arc<HashMap<String, usize>>>,
    vectors: BTreeMap<(String, String), ArrayData>,
    /// Keyed by the orientation the matrix was written in; data is
    /// row-major relative to that orientation.
    matrices: BTreeMap<(String, String, String), StoredMatrix>,
    versions: BTreeMap<EntityKey, u64>,
    clock: u64,
}

impl MemDaf {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn bump(&mut self, key: EntityKey) {
        self.clock += 1;
        self.versions.insert(key, self.clock);
    }

    fn bump_schema(&mut self) {
        self.bump(EntityKey::Schema);
    }

    pub fn set_scalar(&mut self, name: &str, value: ScalarValue) {
        let created = self.scalars.insert(name.to_string(), value).is_none();
        self.bump(EntityKey::scalar(name));
        if created {
            self.bump_schema();
        }
    }

    pub fn delete_scalar(&mut self, name: &str) {
        if self.scalars.remove(name).is_some() {
            self.bump(EntityKey::scalar(name));
            self.bump_schema();
        }
    }

    pub fn create_axis(&mut self, axis: &str, entries: Vec<String>) -> Result<(), MemDafError> {
        if self.axes.contains_key(axis) {
            return Err(MemDafError::AxisExists(axis.to_string()));
        }
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if index.insert(entry.clone(), position).is_some() {
                return Err(MemDafError::DuplicateEntry {
                    axis: axis.to_string(),
                    entry: entry.clone(),
                });
            }
        }
        self.axes.insert(axis.to_string(), Arc::new(entries));
        self.axis_indices.insert(axis.to_string(), Arc::new(index));
        self.bump(EntityKey::axis(axis));
        self.bump_schema();
        Ok(())
    }

    pub fn delete_axis(&mut self, axis: &str) {
        if self.axes.remove(axis).is_none() {
            return;
        }
        self.axis_indices.remove(axis);
        let vector_keys: Vec<(String, String)> = self
            .vectors
            .keys()
            .filter(|(vector_axis, _)| vector_axis == axis)
            .cloned()
            .collect();
        for key in vector_keys {
            self.vectors.remove(&key);
            self.bump(EntityKey::vector(&key.0, &key.1));
        }
        let matrix_keys: Vec<(String, String, String)> = self
            .matrices
            .keys()
            .filter(|(rows, cols, _)| rows == axis || cols == axis)
            .cloned()
            .collect();
        for key in matrix_keys {
            self.matrices.remove(&key);
            self.bump(EntityKey::matrix(&key.0, &key.1, &key.2));
        }
        self.bump(EntityKey::axis(axis));
        self.bump_schema();
    }

    pub fn set_vector(
        &mut self,
        axis: &str,
        name: &str,
        data: ArrayData,
    ) -> Result<(), MemDafError> {
        let expected = self
            .axes
            .get(axis)
            .ok_or_else(|| MemDafError::MissingAxis(axis.to_string()))?
            .len();
        if data.len() != expected {
            return Err(MemDafError::VectorLength {
                axis: axis.to_string(),
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }
        let created = self
            .vectors
            .insert((axis.to_string(), name.to_string()), data)
            .is_none();
        self.bump(EntityKey::vector(axis, name));
        if created {
            self.bump_schema();
        }
        Ok(())
    }

    pub fn delete_vector(&mut self, axis: &str, name: &str) {
        if self
            .vectors
            .remove(&(axis.to_string(), name.to_string()))
            .is_some()
        {
            self.bump(EntityKey::vector(axis, name));
            self.bump_schema();
        }
    }

    /// Store a matrix row-major relative to `(rows_axis, cols_axis)`;
    /// the flipped orientation is served through relayout.
    pub fn set_matrix(
        &mut self,
        rows_axis: &str,
        cols_axis: &str,
        name: &str,
        matrix: StoredMatrix,
    ) -> Result<(), MemDafError> {
        let rows = self
            .axes
            .get(rows_axis)
            .ok_or_else(|| MemDafError::MissingAxis(rows_axis.to_string()))?
            .len();
        let cols = self
            .axes
            .get(cols_axis)
            .ok_or_else(|| MemDafError::MissingAxis(cols_axis.to_string()))?
            .len();
        if matrix.rows != rows || matrix.cols != cols || matrix.values.len() != rows * cols {
            return Err(MemDafError::MatrixSize {
                rows: rows_axis.to_string(),
                cols: cols_axis.to_string(),
                name: name.to_string(),
                expected: rows * cols,
                actual: matrix.values.len(),
            });
        }
        // One stored orientation per matrix: drop a previous flipped copy.
        let flipped_key = (
            cols_axis.to_string(),
            rows_axis.to_string(),
            name.to_string(),
        );
        if rows_axis != cols_axis {
            self.matrices.remove(&flipped_key);
        }
        let created = self
            .matrices
            .insert(
                (
                    rows_axis.to_string(),
                    cols_axis.to_string(),
                    name.to_string(),
                ),
                matrix,
            )
            .is_none();
        self.bump(EntityKey::matrix(rows_axis, cols_axis, name));
        if created {
            self.bump_schema();
        }
        Ok(())
    }

    pub fn delete_matrix(&mut self, rows_axis: &str, cols_axis: &str, name: &str) {
        let mut removed = self
            .matrices
            .remove(&(
                rows_axis.to_string(),
                cols_axis.to_string(),
                name.to_string(),
            ))
            .is_some();
        removed |= self
            .matrices
            .remove(&(
                cols_axis.to_string(),
                rows_axis.to_string(),
                name.to_string(),
            ))
            .is_some();
        if removed {
            self.bump(EntityKey::matrix(rows_axis, cols_axis, name));
            self.bump_schema();
        }
    }

    pub fn axis_index(&self, axis: &str) -> Option<Arc<HashMap<String, usize>>> {
        self.axis_indices.get(axis).cloned()
    }
}

impl DafSchema for MemDaf {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_scalar(&self, name: &str) -> bool {
        self.scalars.contains_key(name)
    }

    fn scalar_names(&self) -> BTreeSet<String> {
        self.scalars.keys().cloned().collect()
    }

    fn has_axis(&self, axis: &str) -> bool {
        self.axes.contains_key(axis)
    }

    fn axis_names(&self) -> BTreeSet<String> {
        self.axes.keys().cloned().collect()
    }

    fn has_vector(&self, axis: &str, name: &str) -> bool {
        self.vectors
            .contains_key(&(axis.to_string(), name.to_string()))
    }

    fn vector_names(&self, axis: &str) -> BTreeSet<String> {
        self.vectors
            .keys()
            .filter(|(vector_axis, _)| vector_axis == axis)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn has_matrix(&self, rows_axis: &str, cols_axis: &str, name: &str) -> bool {
        self.matrix_layout(rows_axis, cols_axis, name).is_some()
    }

    fn matrix_names(&self, rows_axis: &str, cols_axis: &str) -> BTreeSet<String> {
        self.matrices
            .keys()
            .filter(|(rows, cols, _)| {
                (rows == rows_axis && cols == cols_axis)
                    || (rows == cols_axis && cols == rows_axis)
            })
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    fn matrix_layout(
        &self,
        rows_axis: &str,
        cols_axis: &str,
        name: &str,
    ) -> Option<MatrixLayout> {
        if self.matrices.contains_key(&(
            rows_axis.to_string(),
            cols_axis.to_string(),
            name.to_string(),
        )) {
            return Some(MatrixLayout::RowMajor);
        }
        if self.matrices.contains_key(&(
            cols_axis.to_string(),
            rows_axis.to_string(),
            name.to_string(),
        )) {
            return Some(MatrixLayout::ColumnMajor);
        }
        None
    }
}

impl DafReader for MemDaf {
    fn get_scalar(&self, name: &str) -> Option<ScalarValue> {
        self.scalars.get(name).cloned()
    }

    fn axis_entries(&self, axis: &str) -> Option<AxisEntries> {
        self.axes.get(axis).cloned()
    }

    fn get_vector(&self, axis: &str, name: &str) -> Option<ArrayData> {
        self.vectors
            .get(&(axis.to_string(), name.to_string()))
            .cloned()
    }

    fn get_matrix(
        &self,
        rows_axis: &str,
        cols_axis: &str,
        name: &str,
        relayout: bool,
    ) -> Option<StoredMatrix> {
        if let Some(matrix) = self.matrices.get(&(
            rows_axis.to_string(),
            cols_axis.to_string(),
            name.to_string(),
        )) {
            return Some(matrix.clone());
        }
        let flipped = self.matrices.get(&(
            cols_axis.to_string(),
            rows_axis.to_string(),
            name.to_string(),
        ))?;
        if relayout {
            Some(flipped.transposed())
        } else {
            None
        }
    }

    fn entity_version(&self, key: &EntityKey) -> Option<u64> {
        Some(self.versions.get(key).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DafType;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn axis_creation_rejects_duplicates() {
        let mut daf = MemDaf::new("test!");
        let err = daf
            .create_axis("cell", strings(&["A", "B", "A"]))
            .expect_err("duplicate entry");
        assert!(matches!(err, MemDafError::DuplicateEntry { .. }));
    }

    #[test]
    fn vector_length_is_validated() {
        let mut daf = MemDaf::new("test!");
        daf.create_axis("cell", strings(&["A", "B"]))
            .expect("axis should create");
        let err = daf
            .set_vector(
                "cell",
                "age",
                ArrayData::Num {
                    dtype: DafType::I32,
                    values: vec![1.0],
                },
            )
            .expect_err("length mismatch");
        assert!(matches!(err, MemDafError::VectorLength { .. }));
    }

    #[test]
    fn flipped_matrix_requires_relayout() {
        let mut daf = MemDaf::new("test!");
        daf.create_axis("cell", strings(&["A", "B"]))
            .expect("axis should create");
        daf.create_axis("gene", strings(&["X", "Y", "Z"]))
            .expect("axis should create");
        daf.set_matrix(
            "gene",
            "cell",
            "umi",
            StoredMatrix {
                dtype: DafType::U32,
                rows: 3,
                cols: 2,
                values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            },
        )
        .expect("matrix should store");

        assert_eq!(
            daf.matrix_layout("cell", "gene", "umi"),
            Some(MatrixLayout::ColumnMajor)
        );
        assert_eq!(daf.get_matrix("cell", "gene", "umi", false), None);
        let relayouted = daf
            .get_matrix("cell", "gene", "umi", true)
            .expect("relayout should materialize");
        assert_eq!(relayouted.rows, 2);
        assert_eq!(relayouted.values, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn versions_advance_on_every_mutation() {
        let mut daf = MemDaf::new("test!");
        let key = EntityKey::scalar("depth");
        assert_eq!(daf.entity_version(&key), Some(0));
        daf.set_scalar(
            "depth",
            ScalarValue::Num {
                dtype: DafType::I64,
                value: 3.0,
            },
        );
        let first = daf.entity_version(&key);
        daf.set_scalar(
            "depth",
            ScalarValue::Num {
                dtype: DafType::I64,
                value: 4.0,
            },
        );
        let second = daf.entity_version(&key);
        assert!(second > first);
        daf.delete_scalar("depth");
        assert!(daf.entity_version(&key) > second);
    }

    #[test]
    fn deleting_an_axis_cascades_to_its_properties() {
        let mut daf = MemDaf::new("test!");
        daf.create_axis("cell", strings(&["A"])).expect("axis");
        daf.set_vector("cell", "age", ArrayData::Str(strings(&["x"])))
            .expect("vector");
        daf.delete_axis("cell");
        assert!(!daf.has_axis("cell"));
        assert!(!daf.has_vector("cell", "age"));
    }
}
