//! Static analysis: everything that can be decided from a pipeline and
//! schema names alone, without touching values.
//!
//! The shape machine here is also re-run by the evaluator before it
//! walks any step, so structural error texts cannot diverge between the
//! two passes.

use crate::error::{AnalysisError, Span};
use crate::query::{CanonicalText, MaskSlice, NamesKind, Pipeline, Step};
use crate::storage::{DafSchema, MatrixLayout};

/// Value kind carried between steps, as far as it is statically known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Start,
    Scalar,
    Frame { axes: u8, selected: [bool; 2] },
    Vector,
    Matrix,
    Names,
}

impl Shape {
    pub(crate) const fn describe(self) -> &'static str {
        match self {
            Self::Start => "the start of the query",
            Self::Scalar => "a scalar value",
            Self::Frame { axes: 1, .. } => "axis entries",
            Self::Frame { .. } => "a two-axes frame",
            Self::Vector => "a vector value",
            Self::Matrix => "a matrix value",
            Self::Names => "a name set",
        }
    }

    const fn selected_count(self) -> u8 {
        match self {
            Self::Frame { axes, selected } => {
                let mut count = 0;
                if selected[0] {
                    count += 1;
                }
                if axes > 1 && selected[1] {
                    count += 1;
                }
                count
            }
            _ => 0,
        }
    }
}

fn unexpected(step: &Step, shape: Shape, canon: &CanonicalText, span: Span) -> AnalysisError {
    AnalysisError::new(
        format!(
            "unexpected operation: {} applied to {}",
            step.describe(),
            shape.describe()
        ),
        &canon.text,
        span,
    )
}

/// One transition of the shape machine; a total match over `(shape, step)`.
pub(crate) fn transition(
    shape: Shape,
    step: &Step,
    canon: &CanonicalText,
    span: Span,
) -> Result<Shape, AnalysisError> {
    match (shape, step) {
        (Shape::Start, Step::Lookup(_)) => Ok(Shape::Scalar),
        (Shape::Start, Step::Axis(_)) => Ok(Shape::Frame {
            axes: 1,
            selected: [false, false],
        }),
        (Shape::Start, Step::Names(names)) => match names.kind {
            None | Some(NamesKind::Scalars) | Some(NamesKind::Axes) => Ok(Shape::Names),
            Some(kind) => Err(invalid_names_kind(kind, shape, canon, span)),
        },

        (Shape::Frame { axes: 1, selected }, Step::Axis(_)) => Ok(Shape::Frame {
            axes: 2,
            selected: [selected[0], false],
        }),
        (Shape::Frame { axes: 1, selected }, Step::Entry(_)) if !selected[0] => {
            Ok(Shape::Frame {
                axes: 1,
                selected: [true, false],
            })
        }
        (Shape::Frame { axes: 1, selected }, Step::Mask(_)) if !selected[0] => Ok(shape),
        (Shape::Frame { axes: 1, selected }, Step::Lookup(_)) => {
            if selected[0] {
                Ok(Shape::Scalar)
            } else {
                Ok(Shape::Vector)
            }
        }
        (Shape::Frame { axes: 1, selected }, Step::Names(names)) if !selected[0] => {
            match names.kind {
                None | Some(NamesKind::Vectors) => Ok(Shape::Names),
                Some(kind) => Err(invalid_names_kind(kind, shape, canon, span)),
            }
        }

        (Shape::Frame { axes: 2, selected }, Step::Entry(_)) if !selected[1] => {
            Ok(Shape::Frame {
                axes: 2,
                selected: [selected[0], true],
            })
        }
        (Shape::Frame { axes: 2, selected }, Step::Mask(_)) if !selected[1] => Ok(shape),
        (Shape::Frame { axes: 2, .. }, Step::Lookup(lookup)) => {
            if lookup.segments.len() > 1 {
                return Err(AnalysisError::new(
                    "unexpected operation: fetch applied to a matrix property",
                    &canon.text,
                    span,
                ));
            }
            match shape.selected_count() {
                0 => Ok(Shape::Matrix),
                1 => Ok(Shape::Vector),
                _ => Ok(Shape::Scalar),
            }
        }
        (
            Shape::Frame {
                axes: 2,
                selected: [false, false],
            },
            Step::Names(names),
        ) => match names.kind {
            None | Some(NamesKind::Matrices) => Ok(Shape::Names),
            Some(kind) => Err(invalid_names_kind(kind, shape, canon, span)),
        },
        (Shape::Frame { axes: 2, .. }, Step::Axis(_)) => Err(AnalysisError::new(
            "unexpected operation: a query uses at most two axes",
            &canon.text,
            span,
        )),

        (Shape::Scalar, Step::Eltwise(_)) => Ok(Shape::Scalar),
        (Shape::Vector, Step::Eltwise(_)) => Ok(Shape::Vector),
        (Shape::Vector, Step::Reduce(_)) => Ok(Shape::Scalar),
        (Shape::Vector, Step::GroupBy(_)) => Ok(Shape::Vector),
        (Shape::Vector, Step::CountBy(_)) => Ok(Shape::Matrix),
        (Shape::Matrix, Step::Eltwise(_)) => Ok(Shape::Matrix),
        (Shape::Matrix, Step::Reduce(_)) => Ok(Shape::Vector),

        _ => Err(unexpected(step, shape, canon, span)),
    }
}

fn invalid_names_kind(
    kind: NamesKind,
    shape: Shape,
    canon: &CanonicalText,
    span: Span,
) -> AnalysisError {
    AnalysisError::new(
        format!(
            "invalid names kind: {} for {}",
            kind.name(),
            shape.describe()
        ),
        &canon.text,
        span,
    )
}

/// Rank of a terminal shape, or the structural error evaluation would
/// raise for an incomplete pipeline.
pub(crate) fn finish(
    shape: Shape,
    canon: &CanonicalText,
) -> Result<i8, AnalysisError> {
    let end_span = canon
        .spans
        .last()
        .copied()
        .unwrap_or(Span::new(0, 0));
    match shape {
        Shape::Start => Err(AnalysisError::new("empty query", &canon.text, end_span)),
        Shape::Scalar => Ok(0),
        Shape::Vector => Ok(1),
        Shape::Matrix => Ok(2),
        Shape::Names => Ok(-1),
        Shape::Frame { axes: 1, selected } => {
            if selected[0] {
                Err(AnalysisError::new(
                    "incomplete query: entry selection must be followed by a property lookup",
                    &canon.text,
                    end_span,
                ))
            } else {
                Ok(1)
            }
        }
        Shape::Frame { .. } => Err(AnalysisError::new(
            "incomplete query: a two-axes query requires a property lookup",
            &canon.text,
            end_span,
        )),
    }
}

/// Walk the whole pipeline through the shape machine.
pub(crate) fn check(pipeline: &Pipeline, canon: &CanonicalText) -> Result<i8, AnalysisError> {
    let mut shape = Shape::Start;
    for (idx, step) in pipeline.steps.iter().enumerate() {
        let span = canon.spans.get(idx).copied().unwrap_or(Span::new(0, 0));
        shape = transition(shape, step, canon, span)?;
    }
    finish(shape, canon)
}

/// Result dimensionality without data access: -1 for a name set, 0 for a
/// scalar, 1 for a vector, 2 for a matrix. Structural errors match the
/// ones evaluation raises, anchored to the canonical text.
pub fn result_dimensions(pipeline: &Pipeline) -> Result<i8, AnalysisError> {
    let canonical = pipeline.canonicalize();
    let canon = canonical.render_with_spans();
    check(&canonical, &canon)
}

/// Whether the pipeline denotes a bare (possibly masked) axis.
pub fn is_axis_query(pipeline: &Pipeline) -> bool {
    axis_name(pipeline).is_some()
}

/// The axis of an axis query, if the pipeline is one.
pub fn axis_name(pipeline: &Pipeline) -> Option<&str> {
    let mut name = None;
    for step in &pipeline.steps {
        match step {
            Step::Axis(axis) if name.is_none() => name = Some(axis.name.as_str()),
            Step::Mask(_) if name.is_some() => {}
            _ => return None,
        }
    }
    name
}

/// Whether evaluating the pipeline needs a matrix in an orientation that
/// differs from the stored one, forcing the storage collaborator to
/// materialize a relayouted copy. Consults only the schema.
pub fn requires_relayout(
    pipeline: &Pipeline,
    schema: &dyn DafSchema,
) -> Result<bool, AnalysisError> {
    let canonical = pipeline.canonicalize();
    let canon = canonical.render_with_spans();
    check(&canonical, &canon)?;

    let mut axes: Vec<&str> = Vec::with_capacity(2);
    for step in &canonical.steps {
        match step {
            Step::Axis(axis) => axes.push(axis.name.as_str()),
            Step::Mask(clause) => {
                let Some(slice) = &clause.slice else { continue };
                let Some(axis) = axes.last() else { continue };
                let layout = schema.matrix_layout(axis, axis, &clause.name);
                let needed = match slice {
                    MaskSlice::Row(_) => MatrixLayout::RowMajor,
                    MaskSlice::Column(_) => MatrixLayout::ColumnMajor,
                };
                if layout.is_some_and(|stored| stored != needed) {
                    return Ok(true);
                }
            }
            Step::Lookup(lookup) => {
                if axes.len() == 2 {
                    let layout =
                        schema.matrix_layout(axes[0], axes[1], &lookup.segments[0].name);
                    if layout == Some(MatrixLayout::ColumnMajor) {
                        return Ok(true);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemDaf;
    use crate::parse::parse;
    use crate::storage::StoredMatrix;
    use crate::value::DafType;

    fn dims(query: &str) -> Result<i8, AnalysisError> {
        result_dimensions(&parse(query).expect("parse should succeed"))
    }

    #[test]
    fn dimensions_cover_all_result_kinds() {
        assert_eq!(dims(": depth"), Ok(0));
        assert_eq!(dims("/ cell"), Ok(1));
        assert_eq!(dims("/ cell & age > 1"), Ok(1));
        assert_eq!(dims("/ cell : age"), Ok(1));
        assert_eq!(dims("/ cell = A : age"), Ok(0));
        assert_eq!(dims("/ cell / gene : umi"), Ok(2));
        assert_eq!(dims("/ cell = A / gene : umi"), Ok(1));
        assert_eq!(dims("/ cell / gene = G : umi %> Sum"), Ok(0));
        assert_eq!(dims("/ cell : age %> Sum"), Ok(0));
        assert_eq!(dims("/ cell : age @ batch %> Mean"), Ok(1));
        assert_eq!(dims("/ cell : batch * type"), Ok(2));
        assert_eq!(dims("?"), Ok(-1));
        assert_eq!(dims("/ cell ? vectors"), Ok(-1));
    }

    #[test]
    fn incomplete_queries_are_structural_errors() {
        let err = dims("/ cell = A").expect_err("selected entry without lookup");
        assert!(err.message.contains("entry selection"));
        let err = dims("/ cell / gene").expect_err("two axes without lookup");
        assert!(err.message.contains("two-axes"));
    }

    #[test]
    fn unexpected_operations_name_step_and_shape() {
        let err = dims(": depth %> Sum").expect_err("reduce on a scalar");
        assert_eq!(
            err.message,
            "unexpected operation: reduction applied to a scalar value"
        );
        let err = dims("/ cell / gene : umi * other").expect_err("count-by on a matrix");
        assert_eq!(
            err.message,
            "unexpected operation: count-by applied to a matrix value"
        );
    }

    #[test]
    fn fetch_of_a_matrix_property_is_rejected() {
        let err = dims("/ cell / gene : umi => donor").expect_err("matrix fetch");
        assert_eq!(
            err.message,
            "unexpected operation: fetch applied to a matrix property"
        );
    }

    #[test]
    fn names_kinds_are_context_checked() {
        let err = dims("? vectors").expect_err("vectors without axis");
        assert_eq!(
            err.message,
            "invalid names kind: vectors for the start of the query"
        );
        let err = dims("/ cell ? axes").expect_err("axes inside axis scope");
        assert_eq!(err.message, "invalid names kind: axes for axis entries");
    }

    #[test]
    fn axis_queries_are_detected_with_masks() {
        let pipeline = parse("/ cell & age > 1").expect("parse should succeed");
        assert!(is_axis_query(&pipeline));
        assert_eq!(axis_name(&pipeline), Some("cell"));
        let pipeline = parse("/ cell : age").expect("parse should succeed");
        assert!(!is_axis_query(&pipeline));
    }

    #[test]
    fn relayout_tracks_stored_orientation() {
        let mut daf = MemDaf::new("test!");
        daf.create_axis("cell", vec!["A".into(), "B".into()])
            .expect("axis");
        daf.create_axis("gene", vec!["X".into()])
            .expect("axis");
        daf.set_matrix(
            "gene",
            "cell",
            "umi",
            StoredMatrix {
                dtype: DafType::U32,
                rows: 1,
                cols: 2,
                values: vec![1.0, 2.0],
            },
        )
        .expect("matrix");

        let native = parse("/ gene / cell : umi").expect("parse should succeed");
        assert_eq!(requires_relayout(&native, &daf), Ok(false));
        let flipped = parse("/ cell / gene : umi").expect("parse should succeed");
        assert_eq!(requires_relayout(&flipped, &daf), Ok(true));
        let absent = parse("/ cell / gene : missing").expect("parse should succeed");
        assert_eq!(requires_relayout(&absent, &daf), Ok(false));
    }
}
