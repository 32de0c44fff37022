//! Operation registry.
//!
//! Extension path (minimal touch points):
//! 1) add the variant in `spec.rs` and its kernel in `elem.rs` / `reduce.rs`,
//! 2) register meta in `OP_METAS` below,
//! 3) add parse and evaluation tests.

use crate::ops::arg_spec::{ParamKind, ParamSpec, ParamValues};
use crate::ops::spec::{EltwiseOp, ReduceOp};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Eltwise,
    Reduce,
}

#[derive(Debug, Clone, Copy)]
pub struct OpMeta {
    /// Query-surface operation name.
    pub name: &'static str,
    pub kind: OpKind,
    /// Accepted parameters in canonical rendering order.
    pub params: &'static [ParamSpec],
    pub build_eltwise: Option<fn(&ParamValues) -> EltwiseOp>,
    pub build_reduce: Option<fn(&ParamValues) -> ReduceOp>,
}

const DTYPE: ParamSpec = ParamSpec::optional("dtype", ParamKind::Dtype, 0.0);

const ABS_PARAMS: &[ParamSpec] = &[DTYPE];
const CLAMP_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("min", ParamKind::Float),
    ParamSpec::required("max", ParamKind::Float),
    DTYPE,
];
const CONVERT_PARAMS: &[ParamSpec] = &[ParamSpec::required("dtype", ParamKind::NumericDtype)];
const LOG_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("base", ParamKind::LogBase, std::f64::consts::E),
    ParamSpec::optional("eps", ParamKind::NonNegFloat, 0.0),
    DTYPE,
];
const QUANTILE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("p", ParamKind::UnitFloat),
    DTYPE,
];
const DTYPE_ONLY: &[ParamSpec] = &[DTYPE];

const fn dtype_only_reduce(
    name: &'static str,
    build: fn(&ParamValues) -> ReduceOp,
) -> OpMeta {
    OpMeta {
        name,
        kind: OpKind::Reduce,
        params: DTYPE_ONLY,
        build_eltwise: None,
        build_reduce: Some(build),
    }
}

static OP_METAS: &[OpMeta] = &[
    OpMeta {
        name: "Abs",
        kind: OpKind::Eltwise,
        params: ABS_PARAMS,
        build_eltwise: Some(|p| EltwiseOp::Abs {
            dtype: p.dtype("dtype"),
        }),
        build_reduce: None,
    },
    OpMeta {
        name: "Clamp",
        kind: OpKind::Eltwise,
        params: CLAMP_PARAMS,
        build_eltwise: Some(|p| EltwiseOp::Clamp {
            min: p.float(&CLAMP_PARAMS[0]),
            max: p.float(&CLAMP_PARAMS[1]),
            dtype: p.dtype("dtype"),
        }),
        build_reduce: None,
    },
    OpMeta {
        name: "Convert",
        kind: OpKind::Eltwise,
        params: CONVERT_PARAMS,
        build_eltwise: Some(|p| EltwiseOp::Convert {
            dtype: p.fixed_dtype("dtype"),
        }),
        build_reduce: None,
    },
    OpMeta {
        name: "Fraction",
        kind: OpKind::Eltwise,
        params: DTYPE_ONLY,
        build_eltwise: Some(|p| EltwiseOp::Fraction {
            dtype: p.dtype("dtype"),
        }),
        build_reduce: None,
    },
    OpMeta {
        name: "Log",
        kind: OpKind::Eltwise,
        params: LOG_PARAMS,
        build_eltwise: Some(|p| EltwiseOp::Log {
            base: p.float(&LOG_PARAMS[0]),
            eps: p.float(&LOG_PARAMS[1]),
            dtype: p.dtype("dtype"),
        }),
        build_reduce: None,
    },
    OpMeta {
        name: "Round",
        kind: OpKind::Eltwise,
        params: DTYPE_ONLY,
        build_eltwise: Some(|p| EltwiseOp::Round {
            dtype: p.dtype("dtype"),
        }),
        build_reduce: None,
    },
    dtype_only_reduce("Sum", |p| ReduceOp::Sum {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("Mean", |p| ReduceOp::Mean {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("Median", |p| ReduceOp::Median {
        dtype: p.dtype("dtype"),
    }),
    OpMeta {
        name: "Quantile",
        kind: OpKind::Reduce,
        params: QUANTILE_PARAMS,
        build_eltwise: None,
        build_reduce: Some(|p| ReduceOp::Quantile {
            p: p.float(&QUANTILE_PARAMS[0]),
            dtype: p.dtype("dtype"),
        }),
    },
    dtype_only_reduce("Min", |p| ReduceOp::Min {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("Max", |p| ReduceOp::Max {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("Std", |p| ReduceOp::Std {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("StdN", |p| ReduceOp::StdN {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("Var", |p| ReduceOp::Var {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("VarN", |p| ReduceOp::VarN {
        dtype: p.dtype("dtype"),
    }),
    dtype_only_reduce("Count", |p| ReduceOp::Count {
        dtype: p.dtype("dtype"),
    }),
];

pub struct OperatorRegistry;

impl OperatorRegistry {
    pub fn get(name: &str) -> Option<&'static OpMeta> {
        let index = REGISTRY_INDEX.get_or_init(build_registry_index);
        index.get(name).map(|idx| &OP_METAS[*idx])
    }

    pub fn eltwise_names() -> Vec<&'static str> {
        OP_METAS
            .iter()
            .filter(|meta| meta.kind == OpKind::Eltwise)
            .map(|meta| meta.name)
            .collect()
    }

    pub fn reduce_names() -> Vec<&'static str> {
        OP_METAS
            .iter()
            .filter(|meta| meta.kind == OpKind::Reduce)
            .map(|meta| meta.name)
            .collect()
    }
}

static REGISTRY_INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();

fn build_registry_index() -> HashMap<&'static str, usize> {
    let mut by_name = HashMap::with_capacity(OP_METAS.len());
    for (idx, meta) in OP_METAS.iter().enumerate() {
        validate_meta(meta);
        if by_name.insert(meta.name, idx).is_some() {
            panic!("duplicate operation name in registry: {}", meta.name);
        }
    }
    by_name
}

fn validate_meta(meta: &OpMeta) {
    match meta.kind {
        OpKind::Eltwise => {
            if meta.build_eltwise.is_none() || meta.build_reduce.is_some() {
                panic!("operation `{}` must build exactly an eltwise op", meta.name);
            }
        }
        OpKind::Reduce => {
            if meta.build_reduce.is_none() || meta.build_eltwise.is_some() {
                panic!("operation `{}` must build exactly a reduce op", meta.name);
            }
        }
    }
    let mut seen: Vec<&str> = Vec::with_capacity(meta.params.len());
    for param in meta.params {
        if seen.contains(&param.name) {
            panic!(
                "operation `{}` declares parameter `{}` twice",
                meta.name, param.name
            );
        }
        seen.push(param.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DtypeSpec;

    #[test]
    fn registry_resolves_every_meta_by_name() {
        for meta in OP_METAS {
            let found = OperatorRegistry::get(meta.name).expect("registered name");
            assert_eq!(found.name, meta.name);
        }
        assert!(OperatorRegistry::get("Bogus").is_none());
    }

    #[test]
    fn kinds_partition_the_registry() {
        let eltwise = OperatorRegistry::eltwise_names();
        let reduce = OperatorRegistry::reduce_names();
        assert_eq!(eltwise.len() + reduce.len(), OP_METAS.len());
        assert!(eltwise.contains(&"Log"));
        assert!(reduce.contains(&"Quantile"));
    }

    #[test]
    fn builders_fill_defaults() {
        let meta = OperatorRegistry::get("Log").expect("Log registered");
        let values = ParamValues::default();
        let build = meta.build_eltwise.expect("eltwise builder");
        let op = build(&values);
        assert_eq!(
            op,
            EltwiseOp::Log {
                base: std::f64::consts::E,
                eps: 0.0,
                dtype: DtypeSpec::Auto,
            }
        );
    }
}
