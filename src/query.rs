use crate::error::Span;
use crate::ops::{EltwiseOp, ReduceOp};
use crate::tokens::escape_name;
use crate::value::DtypeSpec;
use std::fmt;

/// An `||` default: the value to substitute when a name is missing, with
/// an explicit or `Auto` dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultValue {
    pub value: String,
    pub dtype: DtypeSpec,
}

/// A `??` default for empty-string values: substitute the given value,
/// or (bare `??`) drop the affected entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfNot {
    pub value: Option<String>,
}

/// One segment of a lookup/fetch chain, also used as the key of group-by
/// and count-by steps.
///
/// `as_axis` overrides the axis the segment's values resolve through;
/// without it the axis is derived from `name` by stripping a `.suffix`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSegment {
    pub name: String,
    pub as_axis: Option<String>,
    pub if_missing: Option<DefaultValue>,
    pub if_not: Option<IfNot>,
}

impl FetchSegment {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            as_axis: None,
            if_missing: None,
            if_not: None,
        }
    }

    /// The axis this segment's values resolve through when fetched.
    pub fn target_axis(&self) -> &str {
        match &self.as_axis {
            Some(axis) => axis,
            None => match self.name.split_once('.') {
                Some((prefix, _)) => prefix,
                None => &self.name,
            },
        }
    }

    fn render(&self, out: &mut String) {
        out.push_str(&escape_name(&self.name));
        if let Some(axis) = &self.as_axis {
            out.push_str(" ! ");
            out.push_str(&escape_name(axis));
        }
        if let Some(default) = &self.if_missing {
            out.push_str(" || ");
            out.push_str(&escape_name(&default.value));
            out.push(' ');
            out.push_str(default.dtype.name());
        }
        if let Some(if_not) = &self.if_not {
            out.push_str(" ??");
            if let Some(value) = &if_not.value {
                out.push(' ');
                out.push_str(&escape_name(value));
            }
        }
    }
}

/// `: name [=> name]*` — property lookup, optionally chained as a fetch
/// through foreign-key vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupStep {
    pub segments: Vec<FetchSegment>,
}

/// `/ name` — switch to the entries of an axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisStep {
    pub name: String,
}

/// `= value` — select a single entry of the preceding axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStep {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskCombinator {
    And,
    Or,
    Xor,
}

impl MaskCombinator {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
}

impl CmpOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Match => "~",
            Self::NotMatch => "!~",
        }
    }

    pub const fn is_regex(self) -> bool {
        matches!(self, Self::Match | Self::NotMatch)
    }
}

/// Projection of a same-axis square matrix to one of its slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskSlice {
    /// `; entry` — the entry's row.
    Row(String),
    /// `, entry` — the entry's column.
    Column(String),
}

/// One boolean filter clause over the current axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskClause {
    pub combinator: MaskCombinator,
    /// `&!`/`|!`/`^!` — negate the clause before combining.
    pub negate: bool,
    pub name: String,
    pub slice: Option<MaskSlice>,
    pub cmp: Option<(CmpOp, String)>,
}

impl MaskClause {
    fn render(&self, out: &mut String) {
        out.push_str(self.combinator.symbol());
        if self.negate {
            out.push('!');
        }
        out.push(' ');
        out.push_str(&escape_name(&self.name));
        match &self.slice {
            Some(MaskSlice::Row(entry)) => {
                out.push_str(" ; ");
                out.push_str(&escape_name(entry));
            }
            Some(MaskSlice::Column(entry)) => {
                out.push_str(" , ");
                out.push_str(&escape_name(entry));
            }
            None => {}
        }
        if let Some((op, value)) = &self.cmp {
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            out.push_str(&escape_name(value));
        }
    }

    pub(crate) fn rendered(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        out
    }
}

/// `%> Op ...` — reduction with an optional empty-input default.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceStep {
    pub op: ReduceOp,
    pub if_missing: Option<DefaultValue>,
}

/// `@ group %> Op ...` — partition by a same-axis vector, reduce each
/// partition; `if_missing` covers unused as-axis entries and doubles as
/// the empty-partition default.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByStep {
    pub group: FetchSegment,
    pub op: ReduceOp,
    pub if_missing: Option<DefaultValue>,
}

/// `* other` — cross tabulation of two same-axis string vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct CountByStep {
    pub other: FetchSegment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamesKind {
    Scalars,
    Axes,
    Vectors,
    Matrices,
}

impl NamesKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalars => "scalars",
            Self::Axes => "axes",
            Self::Vectors => "vectors",
            Self::Matrices => "matrices",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "scalars" => Some(Self::Scalars),
            "axes" => Some(Self::Axes),
            "vectors" => Some(Self::Vectors),
            "matrices" => Some(Self::Matrices),
            _ => None,
        }
    }
}

/// `? [kind]` — name introspection; a `None` kind defaults by context
/// and is made explicit by canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamesStep {
    pub kind: Option<NamesKind>,
}

/// One operation of a pipeline. The set is closed; every evaluator and
/// analyzer transition is a total match over it.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Lookup(LookupStep),
    Axis(AxisStep),
    Entry(EntryStep),
    Mask(MaskClause),
    Eltwise(EltwiseOp),
    Reduce(ReduceStep),
    GroupBy(GroupByStep),
    CountBy(CountByStep),
    Names(NamesStep),
}

impl Step {
    pub(crate) const fn describe(&self) -> &'static str {
        match self {
            Self::Lookup(_) => "lookup",
            Self::Axis(_) => "axis",
            Self::Entry(_) => "entry selection",
            Self::Mask(_) => "mask",
            Self::Eltwise(_) => "eltwise operation",
            Self::Reduce(_) => "reduction",
            Self::GroupBy(_) => "group-by",
            Self::CountBy(_) => "count-by",
            Self::Names(_) => "names",
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Self::Lookup(lookup) => {
                out.push_str(": ");
                for (idx, segment) in lookup.segments.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(" => ");
                    }
                    segment.render(out);
                }
            }
            Self::Axis(axis) => {
                out.push_str("/ ");
                out.push_str(&escape_name(&axis.name));
            }
            Self::Entry(entry) => {
                out.push_str("= ");
                out.push_str(&escape_name(&entry.value));
            }
            Self::Mask(clause) => clause.render(out),
            Self::Eltwise(op) => {
                out.push_str("% ");
                op.render(out);
            }
            Self::Reduce(reduce) => {
                out.push_str("%> ");
                reduce.op.render(out);
                render_if_missing(out, &reduce.if_missing);
            }
            Self::GroupBy(group_by) => {
                out.push_str("@ ");
                group_by.group.render(out);
                out.push_str(" %> ");
                group_by.op.render(out);
                render_if_missing(out, &group_by.if_missing);
            }
            Self::CountBy(count_by) => {
                out.push_str("* ");
                count_by.other.render(out);
            }
            Self::Names(names) => {
                out.push('?');
                if let Some(kind) = names.kind {
                    out.push(' ');
                    out.push_str(kind.name());
                }
            }
        }
    }
}

fn render_if_missing(out: &mut String, if_missing: &Option<DefaultValue>) {
    if let Some(default) = if_missing {
        out.push_str(" || ");
        out.push_str(&escape_name(&default.value));
        out.push(' ');
        out.push_str(default.dtype.name());
    }
}

/// The rendered form of a pipeline plus the byte span each step occupies
/// within it; evaluation and analysis errors anchor to these spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalText {
    pub text: String,
    pub spans: Vec<Span>,
}

/// An ordered, immutable sequence of steps describing a computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Render the pipeline with per-step spans.
    pub fn render_with_spans(&self) -> CanonicalText {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if !text.is_empty() {
                text.push(' ');
            }
            let start = text.len();
            step.render(&mut text);
            spans.push(Span::new(start, text.len() - start));
        }
        CanonicalText { text, spans }
    }

    /// Rewrite into the unique normal form: explicit defaults (already
    /// carried by parsed steps), an explicit names kind, and maximal runs
    /// of same-combinator mask clauses sorted by their rendered text.
    ///
    /// Idempotent: canonicalizing a canonical pipeline is a no-op.
    pub fn canonicalize(&self) -> Pipeline {
        let mut steps = self.steps.clone();

        let mut axes_seen = 0_u8;
        for step in steps.iter_mut() {
            match step {
                Step::Axis(_) => axes_seen = axes_seen.saturating_add(1),
                Step::Names(names) => {
                    if names.kind.is_none() {
                        names.kind = Some(match axes_seen {
                            0 => NamesKind::Scalars,
                            1 => NamesKind::Vectors,
                            _ => NamesKind::Matrices,
                        });
                    }
                }
                _ => {}
            }
        }

        sort_mask_runs(&mut steps);
        Pipeline { steps }
    }

    /// The canonical text used as the cache key.
    pub fn canonical_text(&self) -> String {
        self.canonicalize().render_with_spans().text
    }
}

/// Sort each maximal run of consecutive mask clauses sharing a combinator
/// by rendered text. Clauses with different combinators are never
/// reordered: the combinator chain folds left-to-right and only
/// same-operator runs commute.
fn sort_mask_runs(steps: &mut [Step]) {
    let mut idx = 0;
    while idx < steps.len() {
        let combinator = match &steps[idx] {
            Step::Mask(clause) => clause.combinator,
            _ => {
                idx += 1;
                continue;
            }
        };
        let mut end = idx + 1;
        while end < steps.len() {
            match &steps[end] {
                Step::Mask(clause) if clause.combinator == combinator => end += 1,
                _ => break,
            }
        }
        if end - idx > 1 {
            let mut run: Vec<MaskClause> = steps[idx..end]
                .iter()
                .filter_map(|step| match step {
                    Step::Mask(clause) => Some(clause.clone()),
                    _ => None,
                })
                .collect();
            run.sort_by_key(|clause| clause.rendered());
            for (offset, clause) in run.into_iter().enumerate() {
                steps[idx + offset] = Step::Mask(clause);
            }
        }
        idx = end;
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_with_spans().text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(combinator: MaskCombinator, name: &str) -> Step {
        Step::Mask(MaskClause {
            combinator,
            negate: false,
            name: name.to_string(),
            slice: None,
            cmp: None,
        })
    }

    #[test]
    fn target_axis_strips_one_suffix() {
        assert_eq!(FetchSegment::named("batch").target_axis(), "batch");
        assert_eq!(FetchSegment::named("batch.fixed").target_axis(), "batch");
        let mut segment = FetchSegment::named("type");
        segment.as_axis = Some("cluster".to_string());
        assert_eq!(segment.target_axis(), "cluster");
    }

    #[test]
    fn canonicalize_sorts_only_same_combinator_runs() {
        let pipeline = Pipeline {
            steps: vec![
                Step::Axis(AxisStep {
                    name: "cell".to_string(),
                }),
                clause(MaskCombinator::And, "b"),
                clause(MaskCombinator::And, "a"),
                clause(MaskCombinator::Or, "z"),
                clause(MaskCombinator::Or, "y"),
                clause(MaskCombinator::And, "c"),
            ],
        };
        let canonical = pipeline.canonicalize();
        assert_eq!(
            canonical.render_with_spans().text,
            "/ cell & a & b | y | z & c"
        );
        assert_eq!(canonical.canonicalize(), canonical);
    }

    #[test]
    fn canonicalize_fills_names_kind_by_context() {
        let pipeline = Pipeline {
            steps: vec![
                Step::Axis(AxisStep {
                    name: "cell".to_string(),
                }),
                Step::Names(NamesStep { kind: None }),
            ],
        };
        assert_eq!(pipeline.canonical_text(), "/ cell ? vectors");
    }

    #[test]
    fn spans_cover_each_step() {
        let pipeline = Pipeline {
            steps: vec![
                Step::Axis(AxisStep {
                    name: "cell".to_string(),
                }),
                Step::Lookup(LookupStep {
                    segments: vec![FetchSegment::named("age")],
                }),
            ],
        };
        let canonical = pipeline.render_with_spans();
        assert_eq!(canonical.text, "/ cell : age");
        assert_eq!(canonical.spans, vec![Span::new(0, 6), Span::new(7, 5)]);
    }

    #[test]
    fn names_render_with_escapes() {
        let pipeline = Pipeline {
            steps: vec![Step::Axis(AxisStep {
                name: "weird axis".to_string(),
            })],
        };
        assert_eq!(pipeline.to_string(), "/ weird\\ axis");
    }
}
