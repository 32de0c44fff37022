use daf_query::{ArrayData, DafType, MemDaf, ScalarValue, StoredMatrix};
use serde::Deserialize;

/// One table-driven query case decoded from the embedded JSON payload.
#[derive(Debug, Deserialize)]
pub struct QueryCase {
    pub query: String,
    /// Expected `result_dimensions` answer, when the query is valid.
    #[serde(default)]
    pub dims: Option<i8>,
    pub expect: Expected,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expected {
    Scalar {
        value: serde_json::Value,
    },
    Vector {
        names: Vec<String>,
        values: Vec<serde_json::Value>,
    },
    Matrix {
        rows: Vec<String>,
        cols: Vec<String>,
        values: Vec<Vec<f64>>,
    },
    Names {
        names: Vec<String>,
    },
    /// The first line of the rendered error.
    Error {
        message: String,
    },
}

pub fn scalar_matches(scalar: &ScalarValue, expected: &serde_json::Value) -> bool {
    match (scalar, expected) {
        (ScalarValue::Str(value), serde_json::Value::String(expected)) => value == expected,
        (ScalarValue::Num { value, .. }, expected) => expected
            .as_f64()
            .is_some_and(|expected| (value - expected).abs() < 1e-9),
        _ => false,
    }
}

pub fn array_matches(data: &ArrayData, expected: &[serde_json::Value]) -> bool {
    if data.len() != expected.len() {
        return false;
    }
    (0..data.len()).all(|index| scalar_matches(&data.scalar_at(index), &expected[index]))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Cells with ages, batches and types; batches with donors; donors with
/// sexes; a cell x gene UMIs matrix; a square cell adjacency matrix.
pub fn fixture() -> MemDaf {
    let mut daf = MemDaf::new("fixture!");
    daf.set_scalar(
        "depth",
        ScalarValue::Num {
            dtype: DafType::I64,
            value: 7.0,
        },
    );

    daf.create_axis("cell", strings(&["A", "B", "C"]))
        .expect("axis should create");
    daf.create_axis("gene", strings(&["X", "Y"]))
        .expect("axis should create");
    daf.create_axis("batch", strings(&["U", "V"]))
        .expect("axis should create");
    daf.create_axis("donor", strings(&["M", "N"]))
        .expect("axis should create");

    daf.set_vector(
        "cell",
        "age",
        ArrayData::Num {
            dtype: DafType::I32,
            values: vec![1.0, 2.0, 3.0],
        },
    )
    .expect("vector should store");
    daf.set_vector("cell", "batch", ArrayData::Str(strings(&["U", "V", "U"])))
        .expect("vector should store");
    daf.set_vector("cell", "type", ArrayData::Str(strings(&["T", "T", "B"])))
        .expect("vector should store");
    daf.set_vector("batch", "donor", ArrayData::Str(strings(&["M", "N"])))
        .expect("vector should store");
    daf.set_vector(
        "donor",
        "sex",
        ArrayData::Str(strings(&["Male", "Female"])),
    )
    .expect("vector should store");

    daf.set_matrix(
        "cell",
        "gene",
        "umi",
        StoredMatrix {
            dtype: DafType::U32,
            rows: 3,
            cols: 2,
            values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        },
    )
    .expect("matrix should store");
    daf.set_matrix(
        "cell",
        "cell",
        "touching",
        StoredMatrix {
            dtype: DafType::Bool,
            rows: 3,
            cols: 3,
            values: vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
        },
    )
    .expect("matrix should store");

    daf
}
