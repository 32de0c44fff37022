//! Table-driven end-to-end cases: each JSON entry is parsed, analyzed
//! and evaluated against the shared fixture, checking dimensions,
//! values and error texts in one sweep.

mod common;

use common::{array_matches, fixture, scalar_matches, Expected, QueryCase};
use daf_query::{evaluate, parse, result_dimensions, QueryError, QueryResult};

const CASES: &str = r#"[
    {
        "query": ": depth",
        "dims": 0,
        "expect": { "kind": "scalar", "value": 7 }
    },
    {
        "query": ": missing || -1",
        "dims": 0,
        "expect": { "kind": "scalar", "value": -1 }
    },
    {
        "query": "/ cell",
        "dims": 1,
        "expect": {
            "kind": "vector",
            "names": ["A", "B", "C"],
            "values": ["A", "B", "C"]
        }
    },
    {
        "query": "/ cell & age > 1 & type = T",
        "dims": 1,
        "expect": { "kind": "vector", "names": ["B"], "values": ["B"] }
    },
    {
        "query": "/ cell & touching , B",
        "dims": 1,
        "expect": { "kind": "vector", "names": ["A", "C"], "values": ["A", "C"] }
    },
    {
        "query": "/ cell : age",
        "dims": 1,
        "expect": {
            "kind": "vector",
            "names": ["A", "B", "C"],
            "values": [1, 2, 3]
        }
    },
    {
        "query": "/ cell : bogus || -1",
        "dims": 1,
        "expect": {
            "kind": "vector",
            "names": ["A", "B", "C"],
            "values": [-1, -1, -1]
        }
    },
    {
        "query": "/ cell = B : age",
        "dims": 0,
        "expect": { "kind": "scalar", "value": 2 }
    },
    {
        "query": "/ cell : batch => donor => sex",
        "dims": 1,
        "expect": {
            "kind": "vector",
            "names": ["A", "B", "C"],
            "values": ["Male", "Female", "Male"]
        }
    },
    {
        "query": "/ cell : age % Abs dtype F64 %> Mean",
        "dims": 0,
        "expect": { "kind": "scalar", "value": 2 }
    },
    {
        "query": "/ cell & age > 9 : age %> Sum || 0",
        "dims": 0,
        "expect": { "kind": "scalar", "value": 0 }
    },
    {
        "query": "/ cell & age > 9 : age %> Sum",
        "expect": {
            "kind": "error",
            "message": "empty input for the reduction operation: Sum (specify a || default)"
        }
    },
    {
        "query": "/ cell : age @ batch %> Mean",
        "dims": 1,
        "expect": { "kind": "vector", "names": ["U", "V"], "values": [2, 2] }
    },
    {
        "query": "/ cell : batch * type",
        "dims": 2,
        "expect": {
            "kind": "matrix",
            "rows": ["U", "V"],
            "cols": ["B", "T"],
            "values": [[1, 1], [0, 1]]
        }
    },
    {
        "query": "/ cell / gene : umi",
        "dims": 2,
        "expect": {
            "kind": "matrix",
            "rows": ["A", "B", "C"],
            "cols": ["X", "Y"],
            "values": [[1, 2], [3, 4], [5, 6]]
        }
    },
    {
        "query": "/ cell / gene : umi %> Sum",
        "dims": 1,
        "expect": { "kind": "vector", "names": ["X", "Y"], "values": [9, 12] }
    },
    {
        "query": "/ cell ?",
        "dims": -1,
        "expect": { "kind": "names", "names": ["age", "batch", "type"] }
    },
    {
        "query": "/ cell : bogus",
        "expect": {
            "kind": "error",
            "message": "missing vector: bogus of the axis: cell"
        }
    },
    {
        "query": "/ gene : age",
        "expect": {
            "kind": "error",
            "message": "missing vector: age of the axis: gene"
        }
    }
]"#;

#[test]
fn table_driven_query_cases() {
    let cases: Vec<QueryCase> = serde_json::from_str(CASES).expect("cases should decode");
    let daf = fixture();

    for case in &cases {
        let pipeline = parse(&case.query).expect("case query should parse");
        if let Some(dims) = case.dims {
            let inferred =
                result_dimensions(&pipeline).expect("case query should analyze");
            assert_eq!(inferred, dims, "dims of {}", case.query);
        }
        let outcome = evaluate(&pipeline, &daf, None);
        match (&case.expect, outcome) {
            (Expected::Scalar { value }, Ok(QueryResult::Scalar(scalar))) => {
                assert!(
                    scalar_matches(&scalar, value),
                    "scalar of {}: got {scalar:?}",
                    case.query
                );
            }
            (Expected::Vector { names, values }, Ok(QueryResult::Vector(vector))) => {
                assert_eq!(&vector.names, names, "names of {}", case.query);
                assert!(
                    array_matches(&vector.data, values),
                    "values of {}: got {:?}",
                    case.query,
                    vector.data
                );
            }
            (
                Expected::Matrix { rows, cols, values },
                Ok(QueryResult::Matrix(matrix)),
            ) => {
                assert_eq!(&matrix.row_names, rows, "rows of {}", case.query);
                assert_eq!(&matrix.col_names, cols, "cols of {}", case.query);
                for (row, expected_row) in values.iter().enumerate() {
                    for (col, expected) in expected_row.iter().enumerate() {
                        assert_eq!(
                            matrix.at(row, col),
                            *expected,
                            "value ({row}, {col}) of {}",
                            case.query
                        );
                    }
                }
            }
            (Expected::Names { names }, Ok(QueryResult::Names(set))) => {
                let got: Vec<String> = set.into_iter().collect();
                assert_eq!(&got, names, "names of {}", case.query);
            }
            (Expected::Error { message }, Err(QueryError::Eval(err))) => {
                assert_eq!(&err.message, message, "error of {}", case.query);
            }
            (expected, outcome) => {
                panic!(
                    "case {}: expected {expected:?}, got {outcome:?}",
                    case.query
                );
            }
        }
    }
}

#[test]
fn round_trip_through_canonical_text() {
    let cases: Vec<QueryCase> = serde_json::from_str(CASES).expect("cases should decode");
    for case in &cases {
        let pipeline = parse(&case.query).expect("case query should parse");
        let canonical = pipeline.canonicalize();
        let reparsed =
            parse(&canonical.canonical_text()).expect("canonical text should re-parse");
        assert_eq!(
            reparsed.canonicalize(),
            canonical,
            "round trip of {}",
            case.query
        );
        assert_eq!(
            canonical.canonicalize(),
            canonical,
            "idempotence of {}",
            case.query
        );
    }
}
