use crate::value::{DafType, DtypeSpec};
use std::collections::BTreeMap;

/// Kinds of operation parameters the parser can validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Any finite float.
    Float,
    /// A finite float in `[0, 1]` (quantile fraction).
    UnitFloat,
    /// A finite float `>= 0`.
    NonNegFloat,
    /// A finite float `> 0` and `!= 1`; accepts the symbolic value `e`.
    LogBase,
    /// Any dtype name or `Auto`.
    Dtype,
    /// A concrete numeric dtype; `Auto` and `Str` are rejected.
    NumericDtype,
}

/// One named parameter of an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Default for optional float-kinded parameters; dtype-kinded
    /// parameters default to `Auto`.
    pub default: f64,
}

impl ParamSpec {
    pub(crate) const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: 0.0,
        }
    }

    pub(crate) const fn optional(name: &'static str, kind: ParamKind, default: f64) -> Self {
        Self {
            name,
            kind,
            required: false,
            default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Dtype(DtypeSpec),
}

/// Validated parameter assignments for one operation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues {
    values: BTreeMap<&'static str, ParamValue>,
}

impl ParamValues {
    pub(crate) fn insert(&mut self, name: &'static str, value: ParamValue) {
        self.values.insert(name, value);
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Float parameter, falling back to the spec default.
    pub fn float(&self, spec: &ParamSpec) -> f64 {
        match self.values.get(spec.name) {
            Some(ParamValue::Float(value)) => *value,
            _ => spec.default,
        }
    }

    /// Dtype parameter, falling back to `Auto`.
    pub fn dtype(&self, name: &str) -> DtypeSpec {
        match self.values.get(name) {
            Some(ParamValue::Dtype(spec)) => *spec,
            _ => DtypeSpec::Auto,
        }
    }

    /// Concrete dtype parameter; only called for validated
    /// `NumericDtype` parameters, which can never hold `Auto`.
    pub fn fixed_dtype(&self, name: &str) -> DafType {
        match self.values.get(name) {
            Some(ParamValue::Dtype(DtypeSpec::Fixed(dtype))) => *dtype,
            _ => DafType::F64,
        }
    }
}

/// Parse and validate one raw parameter value against its spec.
pub(crate) fn parse_param_value(kind: ParamKind, raw: &str) -> Result<ParamValue, String> {
    match kind {
        ParamKind::Float => parse_float(raw).map(ParamValue::Float),
        ParamKind::UnitFloat => {
            let value = parse_float(raw)?;
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("parameter value out of [0, 1]: {raw}"));
            }
            Ok(ParamValue::Float(value))
        }
        ParamKind::NonNegFloat => {
            let value = parse_float(raw)?;
            if value < 0.0 {
                return Err(format!("negative parameter value: {raw}"));
            }
            Ok(ParamValue::Float(value))
        }
        ParamKind::LogBase => {
            if raw == "e" {
                return Ok(ParamValue::Float(std::f64::consts::E));
            }
            let value = parse_float(raw)?;
            if value <= 0.0 || value == 1.0 {
                return Err(format!(
                    "logarithm base must be positive and not 1: {raw}"
                ));
            }
            Ok(ParamValue::Float(value))
        }
        ParamKind::Dtype => DtypeSpec::parse(raw)
            .map(ParamValue::Dtype)
            .ok_or_else(|| format!("invalid dtype: {raw}")),
        ParamKind::NumericDtype => match DtypeSpec::parse(raw) {
            Some(DtypeSpec::Fixed(dtype)) if dtype.is_numeric() => {
                Ok(ParamValue::Dtype(DtypeSpec::Fixed(dtype)))
            }
            Some(_) => Err(format!("expected a concrete numeric dtype: {raw}")),
            None => Err(format!("invalid dtype: {raw}")),
        },
    }
}

fn parse_float(raw: &str) -> Result<f64, String> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| format!("invalid numeric parameter value: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("non-finite parameter value: {raw}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_base_accepts_e_and_rejects_one() {
        let value = parse_param_value(ParamKind::LogBase, "e").expect("e should parse");
        assert_eq!(value, ParamValue::Float(std::f64::consts::E));
        assert!(parse_param_value(ParamKind::LogBase, "1").is_err());
        assert!(parse_param_value(ParamKind::LogBase, "0").is_err());
        assert!(parse_param_value(ParamKind::LogBase, "-2").is_err());
    }

    #[test]
    fn unit_float_enforces_range() {
        assert!(parse_param_value(ParamKind::UnitFloat, "0.5").is_ok());
        assert!(parse_param_value(ParamKind::UnitFloat, "1.1").is_err());
    }

    #[test]
    fn numeric_dtype_rejects_auto_and_str() {
        assert!(parse_param_value(ParamKind::NumericDtype, "I32").is_ok());
        assert!(parse_param_value(ParamKind::NumericDtype, "Auto").is_err());
        assert!(parse_param_value(ParamKind::NumericDtype, "Str").is_err());
        assert!(parse_param_value(ParamKind::NumericDtype, "Zebra").is_err());
    }
}
