use crate::mem::MemDaf;
use crate::storage::StoredMatrix;
use crate::value::{ArrayData, DafType, ScalarValue};


pub(crate) fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub(crate) fn i32_vector(values: &[f64]) -> ArrayData {
    ArrayData::Num {
        dtype: DafType::I32,
        values: values.to_vec(),
    }
}

/// The shared fixture: cells with ages, batches, types; batches with
/// donors; donors with sexes; a cell x gene UMIs matrix stored row-major
/// and a gene x cell copy of it stored the other way around; a square
/// cell x cell connectivity matrix.
pub(crate) fn sample_daf() -> MemDaf {
    let mut daf = MemDaf::new("cells!");
    daf.set_scalar(
        "depth",
        ScalarValue::Num {
            dtype: DafType::I64,
            value: 7.0,
        },
    );
    daf.set_scalar("organism", ScalarValue::Str("mouse".to_string()));

    daf.create_axis("cell", strings(&["A", "B", "C"]))
        .expect("axis should create");
    daf.create_axis("gene", strings(&["X", "Y"]))
        .expect("axis should create");
    daf.create_axis("batch", strings(&["U", "V"]))
        .expect("axis should create");
    daf.create_axis("donor", strings(&["M", "N"]))
        .expect("axis should create");

    daf.set_vector("cell", "age", i32_vector(&[1.0, 2.0, 3.0]))
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
        "gene",
        "cell",
        "umi_flipped",
        StoredMatrix {
            dtype: DafType::U32,
            rows: 2,
            cols: 3,
            values: vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0],
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
