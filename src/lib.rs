pub mod analyze;
pub mod cache;
pub mod error;
pub mod eval;
pub mod mem;
pub mod ops;
pub mod parse;
pub mod query;
pub mod storage;
mod tokens;
pub mod value;

pub use analyze::{axis_name, is_axis_query, requires_relayout, result_dimensions};
pub use cache::{CacheCategory, ClearScope, QueryCache};
pub use error::{
    AnalysisError, EvalError, EvalErrorKind, ParseError, QueryError, Span,
};
pub use eval::evaluate;
pub use mem::{MemDaf, MemDafError};
pub use parse::parse;
pub use query::{Pipeline, Step};
pub use storage::{DafReader, DafSchema, EntityKey, MatrixLayout, StoredMatrix};
pub use value::{
    ArrayData, AxisEntries, DafType, DtypeSpec, MatrixValue, QueryResult, ScalarValue,
    VectorValue,
};

#[cfg(test)]
mod tests;
