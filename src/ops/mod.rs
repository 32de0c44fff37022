//! Operation layer: the closed registries of element-wise and reduction
//! operations, their parameter specs, and the numeric kernels.

pub mod arg_spec;
pub mod catalog;
pub mod elem;
pub mod reduce;
pub mod spec;

pub use arg_spec::{ParamKind, ParamSpec, ParamValue, ParamValues};
pub use catalog::{OpKind, OpMeta, OperatorRegistry};
pub use spec::{EltwiseOp, ReduceOp};
