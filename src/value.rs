use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Element types storable in a daf data set.
///
/// Numeric values are carried as `f64` at runtime; the tag preserves the
/// logical element type for dtype inference and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DafType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
}

impl DafType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::U8 => "U8",
            Self::U16 => "U16",
            Self::U32 => "U32",
            Self::U64 => "U64",
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::Str => "Str",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Bool" => Some(Self::Bool),
            "I8" => Some(Self::I8),
            "I16" => Some(Self::I16),
            "I32" => Some(Self::I32),
            "I64" => Some(Self::I64),
            "U8" => Some(Self::U8),
            "U16" => Some(Self::U16),
            "U32" => Some(Self::U32),
            "U64" => Some(Self::U64),
            "F32" => Some(Self::F32),
            "F64" => Some(Self::F64),
            "Str" => Some(Self::Str),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Str)
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[inline]
    pub const fn is_signed_int(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Unsigned counterpart of a signed integer type; identity otherwise.
    pub const fn unsigned_counterpart(self) -> Self {
        match self {
            Self::I8 => Self::U8,
            Self::I16 => Self::U16,
            Self::I32 => Self::U32,
            Self::I64 => Self::U64,
            other => other,
        }
    }

    /// 64-bit widening used by `Sum` dtype inference.
    pub const fn widen_to_64(self) -> Self {
        match self {
            Self::Bool | Self::U8 | Self::U16 | Self::U32 | Self::U64 => Self::U64,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => Self::I64,
            Self::F32 => Self::F32,
            Self::F64 | Self::Str => Self::F64,
        }
    }

    /// Float type preserving a narrow input (`F32` stays `F32`).
    pub const fn float_counterpart(self) -> Self {
        match self {
            Self::F32 => Self::F32,
            _ => Self::F64,
        }
    }
}

impl fmt::Display for DafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output element type of an operation: explicit, or inferred per-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtypeSpec {
    Auto,
    Fixed(DafType),
}

impl DtypeSpec {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::Fixed(dtype) => dtype.name(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        if name == "Auto" {
            return Some(Self::Auto);
        }
        DafType::parse(name).map(Self::Fixed)
    }

    /// Resolve against the per-op inference rule for `Auto`.
    #[inline]
    pub fn resolve(self, auto: DafType) -> DafType {
        match self {
            Self::Auto => auto,
            Self::Fixed(dtype) => dtype,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Num { dtype: DafType, value: f64 },
    Str(String),
}

impl ScalarValue {
    #[inline]
    pub fn dtype(&self) -> DafType {
        match self {
            Self::Num { dtype, .. } => *dtype,
            Self::Str(_) => DafType::Str,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num { value, .. } => Some(*value),
            Self::Str(_) => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Num { .. } => None,
            Self::Str(value) => Some(value),
        }
    }

    /// Parse a query literal under an explicit or `Auto` dtype.
    ///
    /// `Auto` infers `I64` for integer literals, `F64` for float literals,
    /// `Bool` for `true`/`false`, and falls back to a string.
    pub fn from_literal(literal: &str, dtype: DtypeSpec) -> Result<Self, String> {
        match dtype {
            DtypeSpec::Fixed(DafType::Str) => Ok(Self::Str(literal.to_string())),
            DtypeSpec::Fixed(DafType::Bool) => match literal {
                "true" => Ok(Self::Num {
                    dtype: DafType::Bool,
                    value: 1.0,
                }),
                "false" => Ok(Self::Num {
                    dtype: DafType::Bool,
                    value: 0.0,
                }),
                _ => Err(format!("invalid Bool literal: {literal}")),
            },
            DtypeSpec::Fixed(dtype) => literal
                .parse::<f64>()
                .map(|value| Self::Num { dtype, value })
                .map_err(|_| format!("invalid {} literal: {literal}", dtype.name())),
            DtypeSpec::Auto => {
                if let Ok(value) = literal.parse::<i64>() {
                    return Ok(Self::Num {
                        dtype: DafType::I64,
                        value: value as f64,
                    });
                }
                if let Ok(value) = literal.parse::<f64>() {
                    return Ok(Self::Num {
                        dtype: DafType::F64,
                        value,
                    });
                }
                match literal {
                    "true" => Ok(Self::Num {
                        dtype: DafType::Bool,
                        value: 1.0,
                    }),
                    "false" => Ok(Self::Num {
                        dtype: DafType::Bool,
                        value: 0.0,
                    }),
                    _ => Ok(Self::Str(literal.to_string())),
                }
            }
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num { value, .. } => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

/// A 1-D value array: numeric (with a logical dtype tag) or string.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Num { dtype: DafType, values: Vec<f64> },
    Str(Vec<String>),
}

impl ArrayData {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Num { values, .. } => values.len(),
            Self::Str(values) => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn dtype(&self) -> DafType {
        match self {
            Self::Num { dtype, .. } => *dtype,
            Self::Str(_) => DafType::Str,
        }
    }

    pub fn scalar_at(&self, index: usize) -> ScalarValue {
        match self {
            Self::Num { dtype, values } => ScalarValue::Num {
                dtype: *dtype,
                value: values[index],
            },
            Self::Str(values) => ScalarValue::Str(values[index].clone()),
        }
    }

    /// Sub-array at the given positions, preserving order.
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Num { dtype, values } => Self::Num {
                dtype: *dtype,
                values: indices.iter().map(|&i| values[i]).collect(),
            },
            Self::Str(values) => {
                Self::Str(indices.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }
}

/// A vector aligned to a (possibly filtered) axis.
///
/// `names` and `indices` are aligned to `data`: `indices[i]` is the
/// position of `names[i]` within the full underlying axis (or `i` itself
/// for derived axes such as group-by results).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorValue {
    pub axis: String,
    pub names: Vec<String>,
    pub indices: Vec<usize>,
    pub data: ArrayData,
}

/// A numeric matrix aligned row-major to a (rows, columns) axis pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixValue {
    pub row_axis: String,
    pub col_axis: String,
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
    pub dtype: DafType,
    pub values: Vec<f64>,
}

impl MatrixValue {
    #[inline]
    pub fn rows(&self) -> usize {
        self.row_names.len()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.col_names.len()
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols() + col]
    }
}

/// The dimensioned outcome of evaluating a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Scalar(ScalarValue),
    Vector(VectorValue),
    Matrix(MatrixValue),
    Names(BTreeSet<String>),
}

impl QueryResult {
    /// Result dimensionality: -1 for a name set, else the array rank.
    #[inline]
    pub fn rank(&self) -> i8 {
        match self {
            Self::Names(_) => -1,
            Self::Scalar(_) => 0,
            Self::Vector(_) => 1,
            Self::Matrix(_) => 2,
        }
    }
}

/// Shared axis entry list as handed out by readers.
pub type AxisEntries = Arc<Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_literal_inference_prefers_integers() {
        let v = ScalarValue::from_literal("-3", DtypeSpec::Auto).expect("literal should parse");
        assert_eq!(
            v,
            ScalarValue::Num {
                dtype: DafType::I64,
                value: -3.0
            }
        );
        let v = ScalarValue::from_literal("2.5", DtypeSpec::Auto).expect("literal should parse");
        assert_eq!(v.dtype(), DafType::F64);
        let v = ScalarValue::from_literal("Outlier", DtypeSpec::Auto)
            .expect("literal should parse");
        assert_eq!(v, ScalarValue::Str("Outlier".to_string()));
    }

    #[test]
    fn fixed_dtype_literal_rejects_garbage() {
        let err = ScalarValue::from_literal("zebra", DtypeSpec::Fixed(DafType::I32))
            .expect_err("non-numeric literal");
        assert!(err.contains("zebra"));
    }

    #[test]
    fn unsigned_counterparts_cover_all_signed_types() {
        assert_eq!(DafType::I8.unsigned_counterpart(), DafType::U8);
        assert_eq!(DafType::I64.unsigned_counterpart(), DafType::U64);
        assert_eq!(DafType::F32.unsigned_counterpart(), DafType::F32);
    }

    #[test]
    fn take_preserves_order_and_dtype() {
        let data = ArrayData::Num {
            dtype: DafType::I32,
            values: vec![1.0, 2.0, 3.0, 4.0],
        };
        let sub = data.take(&[3, 1]);
        assert_eq!(
            sub,
            ArrayData::Num {
                dtype: DafType::I32,
                values: vec![4.0, 2.0]
            }
        );
    }
}
