use crate::analyze;
use crate::cache::QueryCache;
use crate::error::{EvalError, EvalErrorKind, QueryError, Span};
use crate::ops::{elem, reduce, EltwiseOp, ReduceOp};
use crate::query::{
    CanonicalText, CmpOp, CountByStep, DefaultValue, FetchSegment, GroupByStep, LookupStep,
    MaskClause, MaskCombinator, MaskSlice, NamesKind, NamesStep, Pipeline, ReduceStep, Step,
};
use crate::storage::{DafReader, EntityKey, StoredMatrix};
use crate::value::{
    ArrayData, AxisEntries, DafType, MatrixValue, QueryResult, ScalarValue, VectorValue,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::trace;

/// Evaluate a pipeline against a data source, producing a fresh,
/// independently-owned result. A cache, when given, only accelerates the
/// derived axis name-to-index dictionaries; memoized full results are
/// the business of [`QueryCache::get_or_evaluate`].
pub fn evaluate(
    pipeline: &Pipeline,
    reader: &dyn DafReader,
    cache: Option<&QueryCache>,
) -> Result<QueryResult, QueryError> {
    match run(pipeline, reader, cache) {
        Ok(evaluation) => Ok(evaluation.result),
        Err(QueryError::Eval(err)) => Err(QueryError::Eval(err.with_data_name(reader.name()))),
        Err(other) => Err(other),
    }
}

pub(crate) struct Evaluation {
    pub result: QueryResult,
    /// Entity versions observed while evaluating, for cache validation.
    pub deps: Vec<(EntityKey, Option<u64>)>,
}

pub(crate) fn run(
    pipeline: &Pipeline,
    reader: &dyn DafReader,
    cache: Option<&QueryCache>,
) -> Result<Evaluation, QueryError> {
    let canonical = pipeline.canonicalize();
    let canon = canonical.render_with_spans();
    analyze::check(&canonical, &canon)?;
    trace!(query = %canon.text, "evaluating query");

    let mut evaluator = Evaluator {
        reader,
        cache,
        canon: &canon,
        deps: BTreeMap::new(),
        matrices: HashMap::new(),
        indices: HashMap::new(),
    };
    let mut current = Current::Start;
    for (idx, step) in canonical.steps.iter().enumerate() {
        let span = canon.spans[idx];
        current = evaluator.apply(current, step, span)?;
    }
    let result = evaluator.finish(current)?;
    Ok(Evaluation {
        result,
        deps: evaluator.deps.into_iter().collect(),
    })
}

/// The tagged value carried between steps.
enum Current {
    Start,
    Scalar(ScalarValue),
    Frame(Frame),
    Vector(VectorValue),
    Matrix(MatrixValue),
    Names(BTreeSet<String>),
}

impl Current {
    fn describe(&self) -> &'static str {
        match self {
            Self::Start => "the start of the query",
            Self::Scalar(_) => "a scalar value",
            Self::Frame(frame) => {
                if frame.axes.len() == 1 {
                    "axis entries"
                } else {
                    "a two-axes frame"
                }
            }
            Self::Vector(_) => "a vector value",
            Self::Matrix(_) => "a matrix value",
            Self::Names(_) => "a name set",
        }
    }
}

struct Frame {
    axes: Vec<AxisScope>,
}

struct AxisScope {
    name: String,
    entries: AxisEntries,
    /// Entry positions surviving the mask clauses so far, in axis order.
    keep: Vec<usize>,
    selected: Option<usize>,
}

impl AxisScope {
    /// The positions a property lookup covers: the selected entry alone,
    /// or every kept entry.
    fn positions(&self) -> Vec<usize> {
        match self.selected {
            Some(position) => vec![position],
            None => self.keep.clone(),
        }
    }
}

struct Evaluator<'a> {
    reader: &'a dyn DafReader,
    cache: Option<&'a QueryCache>,
    canon: &'a CanonicalText,
    deps: BTreeMap<EntityKey, Option<u64>>,
    /// Relayouted matrices materialized once per evaluation.
    matrices: HashMap<(String, String, String), StoredMatrix>,
    indices: HashMap<String, Arc<HashMap<String, usize>>>,
}

impl<'a> Evaluator<'a> {
    fn err(&self, kind: EvalErrorKind, message: String, span: Span) -> EvalError {
        EvalError::new(kind, message, &self.canon.text, span)
    }

    fn record(&mut self, key: EntityKey) {
        let version = self.reader.entity_version(&key);
        self.deps.insert(key, version);
    }

    fn axis_scope(&mut self, name: &str, span: Span) -> Result<AxisScope, EvalError> {
        self.record(EntityKey::axis(name));
        let entries = self.reader.axis_entries(name).ok_or_else(|| {
            self.err(
                EvalErrorKind::MissingName,
                format!("missing axis: {name}"),
                span,
            )
        })?;
        let keep = (0..entries.len()).collect();
        Ok(AxisScope {
            name: name.to_string(),
            entries,
            keep,
            selected: None,
        })
    }

    fn axis_index(
        &mut self,
        axis: &str,
        span: Span,
    ) -> Result<Arc<HashMap<String, usize>>, EvalError> {
        self.record(EntityKey::axis(axis));
        if let Some(index) = self.indices.get(axis) {
            return Ok(index.clone());
        }
        let index = match self.cache {
            Some(cache) => cache.axis_index(self.reader, axis),
            None => self.reader.axis_entries(axis).map(|entries| {
                Arc::new(
                    entries
                        .iter()
                        .enumerate()
                        .map(|(position, entry)| (entry.clone(), position))
                        .collect::<HashMap<String, usize>>(),
                )
            }),
        };
        let index = index.ok_or_else(|| {
            self.err(
                EvalErrorKind::MissingName,
                format!("missing axis: {axis}"),
                span,
            )
        })?;
        self.indices.insert(axis.to_string(), index.clone());
        Ok(index)
    }

    fn vector_data(&mut self, axis: &str, name: &str) -> Option<ArrayData> {
        self.record(EntityKey::vector(axis, name));
        self.reader.get_vector(axis, name)
    }

    fn matrix_data(&mut self, rows: &str, cols: &str, name: &str) -> Option<StoredMatrix> {
        self.record(EntityKey::matrix(rows, cols, name));
        let key = (rows.to_string(), cols.to_string(), name.to_string());
        if let Some(matrix) = self.matrices.get(&key) {
            return Some(matrix.clone());
        }
        let matrix = self.reader.get_matrix(rows, cols, name, true)?;
        self.matrices.insert(key, matrix.clone());
        Some(matrix)
    }

    fn apply(&mut self, current: Current, step: &Step, span: Span) -> Result<Current, EvalError> {
        match (current, step) {
            (Current::Start, Step::Axis(axis)) => {
                let scope = self.axis_scope(&axis.name, span)?;
                Ok(Current::Frame(Frame { axes: vec![scope] }))
            }
            (Current::Frame(mut frame), Step::Axis(axis)) => {
                let scope = self.axis_scope(&axis.name, span)?;
                frame.axes.push(scope);
                Ok(Current::Frame(frame))
            }
            (Current::Frame(mut frame), Step::Entry(entry)) => {
                let axis_name = match frame.axes.last() {
                    Some(scope) => scope.name.clone(),
                    None => String::new(),
                };
                let index = self.axis_index(&axis_name, span)?;
                let position = index.get(&entry.value).copied().ok_or_else(|| {
                    self.err(
                        EvalErrorKind::MissingEntry,
                        format!(
                            "missing entry: {} of the axis: {axis_name}",
                            entry.value
                        ),
                        span,
                    )
                })?;
                if let Some(scope) = frame.axes.last_mut() {
                    scope.selected = Some(position);
                }
                Ok(Current::Frame(frame))
            }
            (Current::Frame(frame), Step::Mask(clause)) => {
                self.eval_mask(frame, clause, span).map(Current::Frame)
            }
            (Current::Start, Step::Lookup(lookup)) => {
                self.eval_scalar_lookup(lookup, span).map(Current::Scalar)
            }
            (Current::Frame(frame), Step::Lookup(lookup)) => {
                self.eval_frame_lookup(&frame, lookup, span)
            }
            (Current::Start, Step::Names(names)) => self.eval_names(&[], names, span),
            (Current::Frame(frame), Step::Names(names)) => {
                let axes: Vec<String> =
                    frame.axes.iter().map(|scope| scope.name.clone()).collect();
                self.eval_names(&axes, names, span)
            }
            (Current::Scalar(scalar), Step::Eltwise(op)) => {
                self.eval_eltwise_scalar(scalar, op, span).map(Current::Scalar)
            }
            (Current::Vector(vector), Step::Eltwise(op)) => {
                self.eval_eltwise_vector(vector, op, span).map(Current::Vector)
            }
            (Current::Matrix(matrix), Step::Eltwise(op)) => {
                self.eval_eltwise_matrix(matrix, op, span).map(Current::Matrix)
            }
            (Current::Vector(vector), Step::Reduce(step)) => {
                self.eval_reduce_vector(&vector, step, span).map(Current::Scalar)
            }
            (Current::Matrix(matrix), Step::Reduce(step)) => {
                self.eval_reduce_matrix(&matrix, step, span).map(Current::Vector)
            }
            (Current::Vector(vector), Step::GroupBy(step)) => {
                self.eval_group_by(&vector, step, span).map(Current::Vector)
            }
            (Current::Vector(vector), Step::CountBy(step)) => {
                self.eval_count_by(&vector, step, span).map(Current::Matrix)
            }
            (current, step) => Err(self.err(
                EvalErrorKind::TypeMismatch,
                format!(
                    "unexpected operation: {} applied to {}",
                    step.describe(),
                    current.describe()
                ),
                span,
            )),
        }
    }

    fn eval_names(
        &mut self,
        axes: &[String],
        names: &NamesStep,
        _span: Span,
    ) -> Result<Current, EvalError> {
        self.record(EntityKey::Schema);
        let kind = names.kind.unwrap_or(match axes.len() {
            0 => NamesKind::Scalars,
            1 => NamesKind::Vectors,
            _ => NamesKind::Matrices,
        });
        let set = match kind {
            NamesKind::Scalars => self.reader.scalar_names(),
            NamesKind::Axes => self.reader.axis_names(),
            NamesKind::Vectors => match axes.first() {
                Some(axis) => self.reader.vector_names(axis),
                None => BTreeSet::new(),
            },
            NamesKind::Matrices => match (axes.first(), axes.get(1)) {
                (Some(rows), Some(cols)) => self.reader.matrix_names(rows, cols),
                _ => BTreeSet::new(),
            },
        };
        Ok(Current::Names(set))
    }

    fn eval_scalar_lookup(
        &mut self,
        lookup: &LookupStep,
        span: Span,
    ) -> Result<ScalarValue, EvalError> {
        let base = &lookup.segments[0];
        self.record(EntityKey::scalar(&base.name));
        let mut value = match self.reader.get_scalar(&base.name) {
            Some(value) => value,
            None => match &base.if_missing {
                Some(default) => self.default_scalar(default, span)?,
                None => {
                    return Err(self.err(
                        EvalErrorKind::MissingName,
                        format!("missing scalar: {}", base.name),
                        span,
                    ));
                }
            },
        };

        for hop in 1..lookup.segments.len() {
            let prev = &lookup.segments[hop - 1];
            let segment = &lookup.segments[hop];
            let key = match value.as_str() {
                Some(key) => key.to_string(),
                None => {
                    return Err(self.err(
                        EvalErrorKind::TypeMismatch,
                        "type mismatch: fetch requires a string value".to_string(),
                        span,
                    ));
                }
            };
            let key = if key.is_empty() {
                match prev.if_not.as_ref().and_then(|if_not| if_not.value.clone()) {
                    Some(substitute) => substitute,
                    None => {
                        return Err(self.err(
                            EvalErrorKind::EmptyValue,
                            format!(
                                "empty value of the property: {} (specify a ?? default)",
                                prev.name
                            ),
                            span,
                        ));
                    }
                }
            } else {
                key
            };
            let target = prev.target_axis().to_string();
            let index = self.axis_index(&target, span)?;
            let position = index.get(&key).copied().ok_or_else(|| {
                self.err(
                    EvalErrorKind::InvalidValue,
                    format!(
                        "invalid value: {key} of the property: {}, which is missing from the fetched axis: {target}",
                        prev.name
                    ),
                    span,
                )
            })?;
            value = match self.vector_data(&target, &segment.name) {
                Some(data) => data.scalar_at(position),
                None => match &segment.if_missing {
                    Some(default) => self.default_scalar(default, span)?,
                    None => {
                        return Err(self.err(
                            EvalErrorKind::MissingName,
                            format!(
                                "missing vector: {} of the axis: {target}",
                                segment.name
                            ),
                            span,
                        ));
                    }
                },
            };
        }
        Ok(value)
    }

    fn eval_frame_lookup(
        &mut self,
        frame: &Frame,
        lookup: &LookupStep,
        span: Span,
    ) -> Result<Current, EvalError> {
        if frame.axes.len() == 2 {
            return self.eval_matrix_lookup(frame, lookup, span);
        }
        let scope = &frame.axes[0];
        let scalar_mode = scope.selected.is_some();
        let positions = scope.positions();
        let axis_name = scope.name.clone();
        let mut names: Vec<String> = positions
            .iter()
            .map(|&position| scope.entries[position].clone())
            .collect();
        let mut indices = positions;

        let base = &lookup.segments[0];
        let mut data = self.load_axis_vector(&axis_name, base, &indices, span)?;
        self.apply_if_not(base, &mut names, &mut indices, &mut data, scalar_mode, span)?;

        for hop in 1..lookup.segments.len() {
            let prev = &lookup.segments[hop - 1];
            let segment = &lookup.segments[hop];
            let keys = match &data {
                ArrayData::Str(values) => values.clone(),
                ArrayData::Num { .. } => {
                    return Err(self.err(
                        EvalErrorKind::TypeMismatch,
                        "type mismatch: fetch requires a string vector".to_string(),
                        span,
                    ));
                }
            };
            let target = prev.target_axis().to_string();
            let index = self.axis_index(&target, span)?;
            let mut target_positions = Vec::with_capacity(keys.len());
            for (position, key) in keys.iter().enumerate() {
                if key.is_empty() {
                    return Err(self.err(
                        EvalErrorKind::EmptyValue,
                        format!(
                            "empty value of the vector: {} at the entry: {} of the axis: {axis_name} (specify a ?? default)",
                            prev.name, names[position]
                        ),
                        span,
                    ));
                }
                let target_position = index.get(key).copied().ok_or_else(|| {
                    self.err(
                        EvalErrorKind::InvalidValue,
                        format!(
                            "invalid value: {key} of the vector: {} at the entry: {} (index {position}) of the axis: {axis_name}, which is missing from the fetched axis: {target}",
                            prev.name, names[position]
                        ),
                        span,
                    )
                })?;
                target_positions.push(target_position);
            }
            data = match self.vector_data(&target, &segment.name) {
                Some(full) => full.take(&target_positions),
                None => match &segment.if_missing {
                    Some(default) => {
                        self.broadcast_default(default, target_positions.len(), span)?
                    }
                    None => {
                        return Err(self.err(
                            EvalErrorKind::MissingName,
                            format!(
                                "missing vector: {} of the axis: {target}",
                                segment.name
                            ),
                            span,
                        ));
                    }
                },
            };
            self.apply_if_not(segment, &mut names, &mut indices, &mut data, scalar_mode, span)?;
        }

        if scalar_mode {
            if data.is_empty() {
                // apply_if_not forbids dropping in scalar mode, so a
                // selected entry always survives to this point.
                return Err(self.err(
                    EvalErrorKind::EmptyValue,
                    "empty value for a selected entry".to_string(),
                    span,
                ));
            }
            return Ok(Current::Scalar(data.scalar_at(0)));
        }
        Ok(Current::Vector(VectorValue {
            axis: axis_name,
            names,
            indices,
            data,
        }))
    }

    fn eval_matrix_lookup(
        &mut self,
        frame: &Frame,
        lookup: &LookupStep,
        span: Span,
    ) -> Result<Current, EvalError> {
        let segment = &lookup.segments[0];
        let rows_scope = &frame.axes[0];
        let cols_scope = &frame.axes[1];
        let row_positions = rows_scope.positions();
        let col_positions = cols_scope.positions();

        let (dtype, full_cols, values) =
            match self.matrix_data(&rows_scope.name, &cols_scope.name, &segment.name) {
                Some(matrix) => (matrix.dtype, matrix.cols, matrix.values),
                None => match &segment.if_missing {
                    Some(default) => {
                        let scalar = self.default_scalar(default, span)?;
                        let Some(value) = scalar.as_f64() else {
                            return Err(self.err(
                                EvalErrorKind::InvalidLiteral,
                                format!("invalid numeric literal: {}", default.value),
                                span,
                            ));
                        };
                        let total = rows_scope.entries.len() * cols_scope.entries.len();
                        (scalar.dtype(), cols_scope.entries.len(), vec![value; total])
                    }
                    None => {
                        return Err(self.err(
                            EvalErrorKind::MissingName,
                            format!(
                                "missing matrix: {} of the axes: {} and {}",
                                segment.name, rows_scope.name, cols_scope.name
                            ),
                            span,
                        ));
                    }
                },
            };

        let gather = |rows: &[usize], cols: &[usize]| -> Vec<f64> {
            let mut out = Vec::with_capacity(rows.len() * cols.len());
            for &row in rows {
                for &col in cols {
                    out.push(values[row * full_cols + col]);
                }
            }
            out
        };

        match (rows_scope.selected, cols_scope.selected) {
            (Some(_), Some(_)) => {
                let gathered = gather(&row_positions, &col_positions);
                Ok(Current::Scalar(ScalarValue::Num {
                    dtype,
                    value: gathered[0],
                }))
            }
            (Some(_), None) => Ok(Current::Vector(VectorValue {
                axis: cols_scope.name.clone(),
                names: col_positions
                    .iter()
                    .map(|&position| cols_scope.entries[position].clone())
                    .collect(),
                data: ArrayData::Num {
                    dtype,
                    values: gather(&row_positions, &col_positions),
                },
                indices: col_positions,
            })),
            (None, Some(_)) => Ok(Current::Vector(VectorValue {
                axis: rows_scope.name.clone(),
                names: row_positions
                    .iter()
                    .map(|&position| rows_scope.entries[position].clone())
                    .collect(),
                data: ArrayData::Num {
                    dtype,
                    values: gather(&row_positions, &col_positions),
                },
                indices: row_positions,
            })),
            (None, None) => Ok(Current::Matrix(MatrixValue {
                row_axis: rows_scope.name.clone(),
                col_axis: cols_scope.name.clone(),
                row_names: row_positions
                    .iter()
                    .map(|&position| rows_scope.entries[position].clone())
                    .collect(),
                col_names: col_positions
                    .iter()
                    .map(|&position| cols_scope.entries[position].clone())
                    .collect(),
                dtype,
                values: gather(&row_positions, &col_positions),
            })),
        }
    }

    /// Load one segment's vector over the given axis positions, applying
    /// the `||` default when the vector is missing.
    fn load_axis_vector(
        &mut self,
        axis: &str,
        segment: &FetchSegment,
        positions: &[usize],
        span: Span,
    ) -> Result<ArrayData, EvalError> {
        match self.vector_data(axis, &segment.name) {
            Some(full) => Ok(full.take(positions)),
            None => match &segment.if_missing {
                Some(default) => self.broadcast_default(default, positions.len(), span),
                None => Err(self.err(
                    EvalErrorKind::MissingName,
                    format!("missing vector: {} of the axis: {axis}", segment.name),
                    span,
                )),
            },
        }
    }

    fn default_scalar(
        &self,
        default: &DefaultValue,
        span: Span,
    ) -> Result<ScalarValue, EvalError> {
        ScalarValue::from_literal(&default.value, default.dtype).map_err(|message| {
            self.err(EvalErrorKind::InvalidLiteral, message, span)
        })
    }

    fn broadcast_default(
        &self,
        default: &DefaultValue,
        len: usize,
        span: Span,
    ) -> Result<ArrayData, EvalError> {
        let scalar = self.default_scalar(default, span)?;
        Ok(match scalar {
            ScalarValue::Num { dtype, value } => ArrayData::Num {
                dtype,
                values: vec![value; len],
            },
            ScalarValue::Str(value) => ArrayData::Str(vec![value; len]),
        })
    }

    /// Apply a segment's `??` default to its string values: substitute
    /// empty values, or (bare `??`) drop the affected entries. Dropping
    /// is forbidden for a single selected entry.
    fn apply_if_not(
        &self,
        segment: &FetchSegment,
        names: &mut Vec<String>,
        indices: &mut Vec<usize>,
        data: &mut ArrayData,
        scalar_mode: bool,
        span: Span,
    ) -> Result<(), EvalError> {
        let Some(if_not) = &segment.if_not else {
            return Ok(());
        };
        let ArrayData::Str(values) = data else {
            return Err(self.err(
                EvalErrorKind::TypeMismatch,
                "type mismatch: the ?? default requires a string vector".to_string(),
                span,
            ));
        };
        match &if_not.value {
            Some(substitute) => {
                for value in values.iter_mut() {
                    if value.is_empty() {
                        *value = substitute.clone();
                    }
                }
                Ok(())
            }
            None => {
                if scalar_mode {
                    if values.first().is_some_and(|value| value.is_empty()) {
                        return Err(self.err(
                            EvalErrorKind::EmptyValue,
                            format!(
                                "empty value of the property: {} (specify a ?? default)",
                                segment.name
                            ),
                            span,
                        ));
                    }
                    return Ok(());
                }
                let kept: Vec<usize> = values
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| !value.is_empty())
                    .map(|(position, _)| position)
                    .collect();
                if kept.len() != values.len() {
                    *names = kept.iter().map(|&position| names[position].clone()).collect();
                    *indices = kept.iter().map(|&position| indices[position]).collect();
                    *values = kept
                        .iter()
                        .map(|&position| values[position].clone())
                        .collect();
                }
                Ok(())
            }
        }
    }

    fn eval_mask(
        &mut self,
        mut frame: Frame,
        clause: &MaskClause,
        span: Span,
    ) -> Result<Frame, EvalError> {
        let (axis_name, entry_count) = match frame.axes.last() {
            Some(scope) => (scope.name.clone(), scope.entries.len()),
            None => (String::new(), 0),
        };

        let data = match &clause.slice {
            None => match self.vector_data(&axis_name, &clause.name) {
                Some(data) => data,
                None => {
                    if self.reader.has_matrix(&axis_name, &axis_name, &clause.name) {
                        return Err(self.err(
                            EvalErrorKind::TypeMismatch,
                            format!(
                                "mask over the matrix: {} requires a ; or , slice selector",
                                clause.name
                            ),
                            span,
                        ));
                    }
                    return Err(self.err(
                        EvalErrorKind::MissingName,
                        format!(
                            "missing vector: {} of the axis: {axis_name}",
                            clause.name
                        ),
                        span,
                    ));
                }
            },
            Some(slice) => {
                let matrix = self
                    .matrix_data(&axis_name, &axis_name, &clause.name)
                    .ok_or_else(|| {
                        self.err(
                            EvalErrorKind::MissingName,
                            format!(
                                "missing matrix: {} of the axes: {axis_name} and {axis_name}",
                                clause.name
                            ),
                            span,
                        )
                    })?;
                let entry = match slice {
                    MaskSlice::Row(entry) | MaskSlice::Column(entry) => entry,
                };
                let index = self.axis_index(&axis_name, span)?;
                let position = index.get(entry).copied().ok_or_else(|| {
                    self.err(
                        EvalErrorKind::MissingEntry,
                        format!("missing entry: {entry} of the axis: {axis_name}"),
                        span,
                    )
                })?;
                let values = match slice {
                    MaskSlice::Row(_) => {
                        matrix.values[position * entry_count..(position + 1) * entry_count]
                            .to_vec()
                    }
                    MaskSlice::Column(_) => (0..entry_count)
                        .map(|row| matrix.values[row * entry_count + position])
                        .collect(),
                };
                ArrayData::Num {
                    dtype: matrix.dtype,
                    values,
                }
            }
        };

        let mut bools = self.clause_bools(&data, clause, span)?;
        if clause.negate {
            for value in bools.iter_mut() {
                *value = !*value;
            }
        }

        if let Some(scope) = frame.axes.last_mut() {
            let mut current = vec![false; scope.entries.len()];
            for &position in &scope.keep {
                current[position] = true;
            }
            for (position, value) in current.iter_mut().enumerate() {
                let clause_value = bools.get(position).copied().unwrap_or(false);
                *value = match clause.combinator {
                    MaskCombinator::And => *value && clause_value,
                    MaskCombinator::Or => *value || clause_value,
                    MaskCombinator::Xor => *value != clause_value,
                };
            }
            scope.keep = current
                .iter()
                .enumerate()
                .filter(|(_, &value)| value)
                .map(|(position, _)| position)
                .collect();
        }
        Ok(frame)
    }

    fn clause_bools(
        &self,
        data: &ArrayData,
        clause: &MaskClause,
        span: Span,
    ) -> Result<Vec<bool>, EvalError> {
        match data {
            ArrayData::Num { values, .. } => {
                let Some((op, literal)) = &clause.cmp else {
                    return Ok(values.iter().map(|&value| value != 0.0).collect());
                };
                if op.is_regex() {
                    return Err(self.err(
                        EvalErrorKind::TypeMismatch,
                        format!(
                            "type mismatch: regex match of the numeric vector: {}",
                            clause.name
                        ),
                        span,
                    ));
                }
                let rhs = literal.parse::<f64>().map_err(|_| {
                    self.err(
                        EvalErrorKind::InvalidLiteral,
                        format!("invalid numeric literal: {literal}"),
                        span,
                    )
                })?;
                Ok(values
                    .iter()
                    .map(|&value| match op {
                        CmpOp::Eq => value == rhs,
                        CmpOp::Ne => value != rhs,
                        CmpOp::Lt => value < rhs,
                        CmpOp::Le => value <= rhs,
                        CmpOp::Gt => value > rhs,
                        CmpOp::Ge => value >= rhs,
                        CmpOp::Match | CmpOp::NotMatch => false,
                    })
                    .collect())
            }
            ArrayData::Str(values) => {
                let Some((op, literal)) = &clause.cmp else {
                    return Ok(values.iter().map(|value| !value.is_empty()).collect());
                };
                if op.is_regex() {
                    let pattern = regex::Regex::new(literal).map_err(|_| {
                        self.err(
                            EvalErrorKind::InvalidRegex,
                            format!("malformed regex pattern: {literal}"),
                            span,
                        )
                    })?;
                    let negate = *op == CmpOp::NotMatch;
                    return Ok(values
                        .iter()
                        .map(|value| pattern.is_match(value) != negate)
                        .collect());
                }
                Ok(values
                    .iter()
                    .map(|value| match op {
                        CmpOp::Eq => value == literal,
                        CmpOp::Ne => value != literal,
                        CmpOp::Lt => value.as_str() < literal.as_str(),
                        CmpOp::Le => value.as_str() <= literal.as_str(),
                        CmpOp::Gt => value.as_str() > literal.as_str(),
                        CmpOp::Ge => value.as_str() >= literal.as_str(),
                        CmpOp::Match | CmpOp::NotMatch => false,
                    })
                    .collect())
            }
        }
    }

    fn eval_eltwise_scalar(
        &self,
        scalar: ScalarValue,
        op: &EltwiseOp,
        span: Span,
    ) -> Result<ScalarValue, EvalError> {
        match scalar {
            ScalarValue::Num { dtype, value } => Ok(ScalarValue::Num {
                dtype: elem::output_dtype(op, dtype),
                value: elem::apply_scalar(op, value),
            }),
            ScalarValue::Str(_) => Err(self.eltwise_type_error(op, span)),
        }
    }

    fn eval_eltwise_vector(
        &self,
        vector: VectorValue,
        op: &EltwiseOp,
        span: Span,
    ) -> Result<VectorValue, EvalError> {
        match vector.data {
            ArrayData::Num { dtype, mut values } => {
                elem::apply_vector(op, &mut values);
                Ok(VectorValue {
                    data: ArrayData::Num {
                        dtype: elem::output_dtype(op, dtype),
                        values,
                    },
                    ..vector
                })
            }
            ArrayData::Str(_) => Err(self.eltwise_type_error(op, span)),
        }
    }

    fn eval_eltwise_matrix(
        &self,
        mut matrix: MatrixValue,
        op: &EltwiseOp,
        _span: Span,
    ) -> Result<MatrixValue, EvalError> {
        let cols = matrix.cols();
        elem::apply_matrix(op, &mut matrix.values, cols);
        matrix.dtype = elem::output_dtype(op, matrix.dtype);
        Ok(matrix)
    }

    fn eltwise_type_error(&self, op: &EltwiseOp, span: Span) -> EvalError {
        self.err(
            EvalErrorKind::TypeMismatch,
            format!(
                "type mismatch: the eltwise operation: {} requires a numeric input",
                op.name()
            ),
            span,
        )
    }

    fn numeric_reduce_input<'v>(
        &self,
        data: &'v ArrayData,
        op: &ReduceOp,
        span: Span,
    ) -> Result<(DafType, &'v [f64]), EvalError> {
        match data {
            ArrayData::Num { dtype, values } => Ok((*dtype, values)),
            ArrayData::Str(_) => Err(self.err(
                EvalErrorKind::TypeMismatch,
                format!(
                    "type mismatch: the reduction operation: {} requires a numeric input",
                    op.name()
                ),
                span,
            )),
        }
    }

    fn reduce_or_default(
        &self,
        op: &ReduceOp,
        values: &[f64],
        if_missing: &Option<DefaultValue>,
        span: Span,
    ) -> Result<f64, EvalError> {
        if let Some(value) = reduce::reduce_slice(op, values) {
            return Ok(value);
        }
        match if_missing {
            Some(default) => self.numeric_default(default, span),
            None => Err(self.err(
                EvalErrorKind::EmptyReduction,
                format!(
                    "empty input for the reduction operation: {} (specify a || default)",
                    op.name()
                ),
                span,
            )),
        }
    }

    fn numeric_default(&self, default: &DefaultValue, span: Span) -> Result<f64, EvalError> {
        default.value.parse::<f64>().map_err(|_| {
            self.err(
                EvalErrorKind::InvalidLiteral,
                format!("invalid numeric literal: {}", default.value),
                span,
            )
        })
    }

    fn eval_reduce_vector(
        &mut self,
        vector: &VectorValue,
        step: &ReduceStep,
        span: Span,
    ) -> Result<ScalarValue, EvalError> {
        let (dtype, values) = self.numeric_reduce_input(&vector.data, &step.op, span)?;
        let out_dtype = reduce::output_dtype(&step.op, dtype);
        let value = self.reduce_or_default(&step.op, values, &step.if_missing, span)?;
        Ok(ScalarValue::Num {
            dtype: out_dtype,
            value,
        })
    }

    /// Matrix reductions collapse the rows axis, one value per column.
    fn eval_reduce_matrix(
        &mut self,
        matrix: &MatrixValue,
        step: &ReduceStep,
        span: Span,
    ) -> Result<VectorValue, EvalError> {
        let out_dtype = reduce::output_dtype(&step.op, matrix.dtype);
        let rows = matrix.rows();
        let cols = matrix.cols();
        let mut values = Vec::with_capacity(cols);
        let mut column = Vec::with_capacity(rows);
        for col in 0..cols {
            column.clear();
            for row in 0..rows {
                column.push(matrix.values[row * cols + col]);
            }
            values.push(self.reduce_or_default(&step.op, &column, &step.if_missing, span)?);
        }
        Ok(VectorValue {
            axis: matrix.col_axis.clone(),
            names: matrix.col_names.clone(),
            indices: (0..cols).collect(),
            data: ArrayData::Num {
                dtype: out_dtype,
                values,
            },
        })
    }

    /// Load the string key vector of a group-by/count-by segment,
    /// aligned to the current vector, applying `||` and `??` defaults.
    /// Returns the surviving positions (into the current vector) and
    /// their keys.
    fn load_key_strings(
        &mut self,
        vector: &VectorValue,
        segment: &FetchSegment,
        what: &str,
        span: Span,
    ) -> Result<(Vec<usize>, Vec<String>), EvalError> {
        let mut keys = match self.vector_data(&vector.axis, &segment.name) {
            Some(full) => match full.take(&vector.indices) {
                ArrayData::Str(values) => values,
                ArrayData::Num { .. } => {
                    return Err(self.err(
                        EvalErrorKind::TypeMismatch,
                        format!("type mismatch: {what} requires a string vector"),
                        span,
                    ));
                }
            },
            None => match &segment.if_missing {
                Some(default) => vec![default.value.clone(); vector.indices.len()],
                None => {
                    return Err(self.err(
                        EvalErrorKind::MissingName,
                        format!(
                            "missing vector: {} of the axis: {}",
                            segment.name, vector.axis
                        ),
                        span,
                    ));
                }
            },
        };

        let mut positions: Vec<usize> = (0..keys.len()).collect();
        match segment.if_not.as_ref() {
            Some(if_not) => match &if_not.value {
                Some(substitute) => {
                    for key in keys.iter_mut() {
                        if key.is_empty() {
                            *key = substitute.clone();
                        }
                    }
                }
                None => {
                    let kept: Vec<usize> = keys
                        .iter()
                        .enumerate()
                        .filter(|(_, key)| !key.is_empty())
                        .map(|(position, _)| position)
                        .collect();
                    keys = kept.iter().map(|&position| keys[position].clone()).collect();
                    positions = kept;
                }
            },
            None => {
                if let Some(position) = keys.iter().position(|key| key.is_empty()) {
                    return Err(self.err(
                        EvalErrorKind::EmptyValue,
                        format!(
                            "empty value of the vector: {} at the entry: {} of the axis: {} (specify a ?? default)",
                            segment.name, vector.names[position], vector.axis
                        ),
                        span,
                    ));
                }
            }
        }
        Ok((positions, keys))
    }

    fn eval_group_by(
        &mut self,
        vector: &VectorValue,
        step: &GroupByStep,
        span: Span,
    ) -> Result<VectorValue, EvalError> {
        let (in_dtype, in_values) = self.numeric_reduce_input(&vector.data, &step.op, span)?;
        let in_values = in_values.to_vec();
        let out_dtype = reduce::output_dtype(&step.op, in_dtype);
        let (positions, keys) =
            self.load_key_strings(vector, &step.group, "group-by", span)?;

        match &step.group.as_axis {
            Some(target) => {
                let target = target.clone();
                let entries = self.reader.axis_entries(&target).ok_or_else(|| {
                    self.err(
                        EvalErrorKind::MissingName,
                        format!("missing axis: {target}"),
                        span,
                    )
                })?;
                let index = self.axis_index(&target, span)?;
                let mut partitions: Vec<Vec<f64>> = vec![Vec::new(); entries.len()];
                for (key, &position) in keys.iter().zip(positions.iter()) {
                    let group_position = index.get(key).copied().ok_or_else(|| {
                        self.err(
                            EvalErrorKind::InvalidValue,
                            format!(
                                "invalid value: {key} of the vector: {} at the entry: {} (index {position}) of the axis: {}, which is missing from the fetched axis: {target}",
                                step.group.name, vector.names[position], vector.axis
                            ),
                            span,
                        )
                    })?;
                    partitions[group_position].push(in_values[position]);
                }
                let mut values = Vec::with_capacity(entries.len());
                for (group_position, partition) in partitions.iter().enumerate() {
                    if partition.is_empty() && !matches!(step.op, ReduceOp::Count { .. }) {
                        match &step.if_missing {
                            Some(default) => values.push(self.numeric_default(default, span)?),
                            None => {
                                return Err(self.err(
                                    EvalErrorKind::UnusedGroup,
                                    format!(
                                        "unused entry: {} of the group-by axis: {target} (specify a || default)",
                                        entries[group_position]
                                    ),
                                    span,
                                ));
                            }
                        }
                    } else {
                        values.push(self.reduce_or_default(
                            &step.op,
                            partition,
                            &step.if_missing,
                            span,
                        )?);
                    }
                }
                Ok(VectorValue {
                    axis: target,
                    names: entries.as_ref().clone(),
                    indices: (0..entries.len()).collect(),
                    data: ArrayData::Num {
                        dtype: out_dtype,
                        values,
                    },
                })
            }
            None => {
                let mut partitions: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
                for (key, &position) in keys.iter().zip(positions.iter()) {
                    partitions
                        .entry(key.as_str())
                        .or_default()
                        .push(in_values[position]);
                }
                let mut names = Vec::with_capacity(partitions.len());
                let mut values = Vec::with_capacity(partitions.len());
                for (key, partition) in &partitions {
                    names.push(key.to_string());
                    values.push(self.reduce_or_default(
                        &step.op,
                        partition,
                        &step.if_missing,
                        span,
                    )?);
                }
                Ok(VectorValue {
                    axis: step.group.name.clone(),
                    indices: (0..names.len()).collect(),
                    names,
                    data: ArrayData::Num {
                        dtype: out_dtype,
                        values,
                    },
                })
            }
        }
    }

    fn eval_count_by(
        &mut self,
        vector: &VectorValue,
        step: &CountByStep,
        span: Span,
    ) -> Result<MatrixValue, EvalError> {
        let row_values = match &vector.data {
            ArrayData::Str(values) => values.clone(),
            ArrayData::Num { .. } => {
                return Err(self.err(
                    EvalErrorKind::TypeMismatch,
                    "type mismatch: count-by requires a string vector".to_string(),
                    span,
                ));
            }
        };
        let (positions, col_keys) =
            self.load_key_strings(vector, &step.other, "count-by", span)?;

        let row_names: Vec<String> = positions
            .iter()
            .map(|&position| row_values[position].clone())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        let row_index: HashMap<&str, usize> = row_names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index))
            .collect();

        let (col_axis, col_names, col_index) = match &step.other.as_axis {
            Some(target) => {
                let target = target.clone();
                let entries = self.reader.axis_entries(&target).ok_or_else(|| {
                    self.err(
                        EvalErrorKind::MissingName,
                        format!("missing axis: {target}"),
                        span,
                    )
                })?;
                self.record(EntityKey::axis(&target));
                let index: HashMap<String, usize> = entries
                    .iter()
                    .enumerate()
                    .map(|(position, entry)| (entry.clone(), position))
                    .collect();
                (target, entries.as_ref().clone(), index)
            }
            None => {
                let names: Vec<String> = col_keys
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<String>>()
                    .into_iter()
                    .collect();
                let index: HashMap<String, usize> = names
                    .iter()
                    .enumerate()
                    .map(|(position, name)| (name.clone(), position))
                    .collect();
                (step.other.name.clone(), names, index)
            }
        };

        let mut values = vec![0.0; row_names.len() * col_names.len()];
        for (key, &position) in col_keys.iter().zip(positions.iter()) {
            let col = col_index.get(key.as_str()).copied().ok_or_else(|| {
                self.err(
                    EvalErrorKind::InvalidValue,
                    format!(
                        "invalid value: {key} of the vector: {} at the entry: {} (index {position}) of the axis: {}, which is missing from the fetched axis: {col_axis}",
                        step.other.name, vector.names[position], vector.axis
                    ),
                    span,
                )
            })?;
            let row = row_index[row_values[position].as_str()];
            values[row * col_names.len() + col] += 1.0;
        }

        Ok(MatrixValue {
            row_axis: vector.axis.clone(),
            col_axis,
            row_names,
            col_names,
            dtype: DafType::U32,
            values,
        })
    }

    fn finish(&mut self, current: Current) -> Result<QueryResult, EvalError> {
        let end_span = self
            .canon
            .spans
            .last()
            .copied()
            .unwrap_or(Span::new(0, 0));
        match current {
            Current::Scalar(scalar) => Ok(QueryResult::Scalar(scalar)),
            Current::Vector(vector) => Ok(QueryResult::Vector(vector)),
            Current::Matrix(matrix) => Ok(QueryResult::Matrix(matrix)),
            Current::Names(names) => Ok(QueryResult::Names(names)),
            Current::Frame(frame) if frame.axes.len() == 1 => {
                let scope = &frame.axes[0];
                let names: Vec<String> = scope
                    .keep
                    .iter()
                    .map(|&position| scope.entries[position].clone())
                    .collect();
                Ok(QueryResult::Vector(VectorValue {
                    axis: scope.name.clone(),
                    names: names.clone(),
                    indices: scope.keep.clone(),
                    data: ArrayData::Str(names),
                }))
            }
            // The structural check rejects incomplete pipelines before
            // any step runs.
            current => Err(self.err(
                EvalErrorKind::TypeMismatch,
                format!("incomplete query ending at {}", current.describe()),
                end_span,
            )),
        }
    }
}
