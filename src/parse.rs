use crate::error::{ParseError, Span};
use crate::ops::arg_spec::parse_param_value;
use crate::ops::catalog::{OpKind, OpMeta, OperatorRegistry};
use crate::ops::{ParamValues, ReduceOp};
use crate::query::{
    AxisStep, CmpOp, CountByStep, DefaultValue, EntryStep, FetchSegment, GroupByStep, IfNot,
    LookupStep, MaskClause, MaskCombinator, MaskSlice, NamesKind, NamesStep, Pipeline, ReduceStep,
    Step,
};
use crate::tokens::{tokenize, Token, TokenKind};
use crate::value::DtypeSpec;

/// Parse a query string into a pipeline.
///
/// Tokens are consumed strictly left-to-right; at each position only a
/// fixed set of next tokens is legal given what was parsed so far, and
/// the first illegal token fails with an offset-annotated error. Parsing
/// never touches a data source.
pub fn parse(text: &str) -> Result<Pipeline, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        query: text,
        tokens,
        pos: 0,
        can_entry: false,
        can_mask: false,
        mask_started: false,
    };
    let mut steps = Vec::new();
    while !parser.at_eof() {
        steps.push(parser.parse_step()?);
    }
    if steps.is_empty() {
        return Err(ParseError::new("empty query", text, Span::new(0, 0)));
    }
    Ok(Pipeline { steps })
}

struct Parser<'a> {
    query: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    /// An entry selection is only legal directly after an axis step.
    can_entry: bool,
    /// Mask clauses are only legal after an axis or another mask.
    can_mask: bool,
    /// Whether the current axis already has mask clauses; the first
    /// clause must use `&` or `&!`.
    mask_started: bool,
}

impl<'a> Parser<'a> {
    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|token| token.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        self.pos += 1;
        token
    }

    fn here_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some(token) => token.span,
            None => Span::new(self.query.len(), 0),
        }
    }

    fn error(&self, message: impl Into<String>, span: Span) -> ParseError {
        ParseError::new(message, self.query, span)
    }

    fn expect_name(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Name) => {
                let token = self.advance();
                Ok((token.text, token.span))
            }
            _ => Err(self.error(format!("missing {what}"), self.here_span())),
        }
    }

    fn parse_step(&mut self) -> Result<Step, ParseError> {
        let kind = match self.peek_kind() {
            Some(kind) => kind,
            None => return Err(self.error("missing operation", self.here_span())),
        };
        let step = match kind {
            TokenKind::Slash => self.parse_axis()?,
            TokenKind::Colon => self.parse_lookup()?,
            TokenKind::Percent => self.parse_eltwise()?,
            TokenKind::PercentGt => self.parse_reduce()?,
            TokenKind::At => self.parse_group_by()?,
            TokenKind::Star => self.parse_count_by()?,
            TokenKind::Question => self.parse_names()?,
            TokenKind::Assign => self.parse_entry()?,
            TokenKind::Amp
            | TokenKind::AmpBang
            | TokenKind::Pipe
            | TokenKind::PipeBang
            | TokenKind::Caret
            | TokenKind::CaretBang => self.parse_mask()?,
            TokenKind::Name => {
                let token = self.advance();
                return Err(self.error(
                    format!("unexpected name: {}", token.text),
                    token.span,
                ));
            }
            other => {
                let token = self.advance();
                return Err(self.error(
                    format!("unexpected token: {}", other.describe()),
                    token.span,
                ));
            }
        };
        match &step {
            Step::Axis(_) => {
                self.can_entry = true;
                self.can_mask = true;
                self.mask_started = false;
            }
            Step::Entry(_) => {
                self.can_entry = false;
                self.can_mask = false;
            }
            Step::Mask(_) => {
                self.can_entry = false;
                self.mask_started = true;
            }
            _ => {
                self.can_entry = false;
                self.can_mask = false;
                self.mask_started = false;
            }
        }
        Ok(step)
    }

    fn parse_axis(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let (name, _) = self.expect_name("axis name")?;
        Ok(Step::Axis(AxisStep { name }))
    }

    fn parse_entry(&mut self) -> Result<Step, ParseError> {
        let token = self.advance();
        if !self.can_entry {
            return Err(self.error("entry selection must directly follow an axis", token.span));
        }
        let (value, _) = self.expect_name("entry value")?;
        Ok(Step::Entry(EntryStep { value }))
    }

    fn parse_mask(&mut self) -> Result<Step, ParseError> {
        let token = self.advance();
        if !self.can_mask {
            return Err(self.error("mask clauses must follow an axis", token.span));
        }
        let (combinator, negate) = match token.kind {
            TokenKind::Amp => (MaskCombinator::And, false),
            TokenKind::AmpBang => (MaskCombinator::And, true),
            TokenKind::Pipe => (MaskCombinator::Or, false),
            TokenKind::PipeBang => (MaskCombinator::Or, true),
            TokenKind::Caret => (MaskCombinator::Xor, false),
            _ => (MaskCombinator::Xor, true),
        };
        if !self.mask_started && combinator != MaskCombinator::And {
            return Err(self.error(
                "the first mask clause must use & or &!",
                token.span,
            ));
        }
        let (name, _) = self.expect_name("mask property name")?;
        let slice = match self.peek_kind() {
            Some(TokenKind::Semicolon) => {
                self.advance();
                let (entry, _) = self.expect_name("row entry of the mask slice")?;
                Some(MaskSlice::Row(entry))
            }
            Some(TokenKind::Comma) => {
                self.advance();
                let (entry, _) = self.expect_name("column entry of the mask slice")?;
                Some(MaskSlice::Column(entry))
            }
            _ => None,
        };
        let cmp = match self.peek_kind() {
            Some(TokenKind::Assign) => Some(CmpOp::Eq),
            Some(TokenKind::NotEq) => Some(CmpOp::Ne),
            Some(TokenKind::Lt) => Some(CmpOp::Lt),
            Some(TokenKind::Le) => Some(CmpOp::Le),
            Some(TokenKind::Gt) => Some(CmpOp::Gt),
            Some(TokenKind::Ge) => Some(CmpOp::Ge),
            Some(TokenKind::Tilde) => Some(CmpOp::Match),
            Some(TokenKind::NotMatch) => Some(CmpOp::NotMatch),
            _ => None,
        };
        let cmp = match cmp {
            Some(op) => {
                self.advance();
                let (value, value_span) = self.expect_name("comparison value")?;
                if op.is_regex() && regex::Regex::new(&value).is_err() {
                    return Err(
                        self.error(format!("malformed regex pattern: {value}"), value_span)
                    );
                }
                Some((op, value))
            }
            None => None,
        };
        Ok(Step::Mask(MaskClause {
            combinator,
            negate,
            name,
            slice,
            cmp,
        }))
    }

    fn parse_lookup(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let mut segments = vec![self.parse_segment("property name")?];
        while self.peek_kind() == Some(TokenKind::Arrow) {
            self.advance();
            segments.push(self.parse_segment("fetched property name")?);
        }
        Ok(Step::Lookup(LookupStep { segments }))
    }

    fn parse_segment(&mut self, what: &str) -> Result<FetchSegment, ParseError> {
        let (name, _) = self.expect_name(what)?;
        let as_axis = match self.peek_kind() {
            Some(TokenKind::Bang) => {
                self.advance();
                let (axis, _) = self.expect_name("as-axis name")?;
                Some(axis)
            }
            _ => None,
        };
        let mut segment = FetchSegment {
            name,
            as_axis,
            if_missing: None,
            if_not: None,
        };
        loop {
            match self.peek_kind() {
                Some(TokenKind::PipePipe) => {
                    let token = self.advance();
                    if segment.if_missing.is_some() {
                        return Err(self.error("duplicate || default", token.span));
                    }
                    segment.if_missing = Some(self.parse_default_value()?);
                }
                Some(TokenKind::QQ) => {
                    let token = self.advance();
                    if segment.if_not.is_some() {
                        return Err(self.error("duplicate ?? default", token.span));
                    }
                    let value = match self.peek_kind() {
                        Some(TokenKind::Name) => Some(self.advance().text),
                        _ => None,
                    };
                    segment.if_not = Some(IfNot { value });
                }
                _ => break,
            }
        }
        Ok(segment)
    }

    fn parse_default_value(&mut self) -> Result<DefaultValue, ParseError> {
        let (value, _) = self.expect_name("value for the || default")?;
        let dtype = match self.peek_kind() {
            Some(TokenKind::Name) => {
                let token = self.advance();
                match DtypeSpec::parse(&token.text) {
                    Some(dtype) => dtype,
                    None => {
                        return Err(
                            self.error(format!("invalid dtype: {}", token.text), token.span)
                        );
                    }
                }
            }
            _ => DtypeSpec::Auto,
        };
        Ok(DefaultValue { value, dtype })
    }

    fn parse_eltwise(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let (name, name_span) = self.expect_name("eltwise operation name")?;
        let meta = OperatorRegistry::get(&name)
            .ok_or_else(|| self.error(format!("unknown eltwise operation: {name}"), name_span))?;
        let build = match meta.kind {
            OpKind::Eltwise => meta.build_eltwise,
            OpKind::Reduce => None,
        };
        let Some(build) = build else {
            return Err(self.error(format!("not an eltwise operation: {name}"), name_span));
        };
        let values = self.parse_params(meta, name_span)?;
        Ok(Step::Eltwise(build(&values)))
    }

    fn parse_reduce_op(&mut self) -> Result<ReduceOp, ParseError> {
        let (name, name_span) = self.expect_name("reduction operation name")?;
        let meta = OperatorRegistry::get(&name).ok_or_else(|| {
            self.error(format!("unknown reduction operation: {name}"), name_span)
        })?;
        let build = match meta.kind {
            OpKind::Reduce => meta.build_reduce,
            OpKind::Eltwise => None,
        };
        let Some(build) = build else {
            return Err(self.error(format!("not a reduction operation: {name}"), name_span));
        };
        let values = self.parse_params(meta, name_span)?;
        Ok(build(&values))
    }

    fn parse_reduce(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let op = self.parse_reduce_op()?;
        let if_missing = self.parse_optional_if_missing()?;
        Ok(Step::Reduce(ReduceStep { op, if_missing }))
    }

    fn parse_group_by(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let group = self.parse_segment("group vector name")?;
        if self.peek_kind() != Some(TokenKind::PercentGt) {
            return Err(self.error(
                "missing %> reduction after the group-by vector",
                self.here_span(),
            ));
        }
        self.advance();
        let op = self.parse_reduce_op()?;
        let if_missing = self.parse_optional_if_missing()?;
        Ok(Step::GroupBy(GroupByStep {
            group,
            op,
            if_missing,
        }))
    }

    fn parse_count_by(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let other = self.parse_segment("count-by vector name")?;
        Ok(Step::CountBy(CountByStep { other }))
    }

    fn parse_names(&mut self) -> Result<Step, ParseError> {
        self.advance();
        let kind = match self.peek_kind() {
            Some(TokenKind::Name) => {
                let token = self.advance();
                match NamesKind::parse(&token.text) {
                    Some(kind) => Some(kind),
                    None => {
                        return Err(self.error(
                            format!("unknown names kind: {}", token.text),
                            token.span,
                        ));
                    }
                }
            }
            _ => None,
        };
        Ok(Step::Names(NamesStep { kind }))
    }

    fn parse_optional_if_missing(&mut self) -> Result<Option<DefaultValue>, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::PipePipe) => {
                self.advance();
                Ok(Some(self.parse_default_value()?))
            }
            _ => Ok(None),
        }
    }

    fn parse_params(
        &mut self,
        meta: &'static OpMeta,
        op_span: Span,
    ) -> Result<ParamValues, ParseError> {
        let mut values = ParamValues::default();
        while self.peek_kind() == Some(TokenKind::Name) {
            let param_token = self.advance();
            let spec = meta
                .params
                .iter()
                .find(|spec| spec.name == param_token.text)
                .ok_or_else(|| {
                    self.error(
                        format!(
                            "unknown parameter: {} for the operation: {}",
                            param_token.text, meta.name
                        ),
                        param_token.span,
                    )
                })?;
            if values.contains(spec.name) {
                return Err(self.error(
                    format!("duplicate parameter: {}", spec.name),
                    param_token.span,
                ));
            }
            let (raw, value_span) =
                self.expect_name(&format!("value for the parameter: {}", spec.name))?;
            let value = parse_param_value(spec.kind, &raw)
                .map_err(|message| self.error(message, value_span))?;
            values.insert(spec.name, value);
        }
        for spec in meta.params {
            if spec.required && !values.contains(spec.name) {
                return Err(self.error(
                    format!(
                        "missing required parameter: {} for the operation: {}",
                        spec.name, meta.name
                    ),
                    op_span,
                ));
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::EltwiseOp;
    use crate::value::DafType;

    #[test]
    fn parses_axis_lookup_pipeline() {
        let pipeline = parse("/ cell : age").expect("parse should succeed");
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.to_string(), "/ cell : age");
    }

    #[test]
    fn parses_fetch_chain_with_defaults() {
        let pipeline =
            parse("/ cell : batch ?? default1 => donor ?? default2 => sex")
                .expect("parse should succeed");
        let Step::Lookup(lookup) = &pipeline.steps[1] else {
            panic!("expected a lookup step");
        };
        assert_eq!(lookup.segments.len(), 3);
        assert_eq!(
            lookup.segments[0].if_not,
            Some(IfNot {
                value: Some("default1".to_string())
            })
        );
        assert_eq!(lookup.segments[2].if_not, None);
    }

    #[test]
    fn parses_if_missing_with_explicit_dtype() {
        let pipeline = parse("/ cell : age || -1 I32").expect("parse should succeed");
        let Step::Lookup(lookup) = &pipeline.steps[1] else {
            panic!("expected a lookup step");
        };
        assert_eq!(
            lookup.segments[0].if_missing,
            Some(DefaultValue {
                value: "-1".to_string(),
                dtype: DtypeSpec::Fixed(DafType::I32),
            })
        );
    }

    #[test]
    fn parses_masks_and_rejects_leading_or() {
        let pipeline = parse("/ cell & age > 1 |! type = B").expect("parse should succeed");
        assert_eq!(pipeline.steps.len(), 3);
        let err = parse("/ cell | age > 1").expect_err("leading | should fail");
        assert!(err.message.contains("first mask clause"));
    }

    #[test]
    fn rejects_mask_after_lookup() {
        let err = parse("/ cell : age & x > 1").expect_err("mask after lookup");
        assert_eq!(err.message, "mask clauses must follow an axis");
        assert_eq!(err.span.start, 13);
    }

    #[test]
    fn parses_eltwise_params_and_rejects_bad_base() {
        let pipeline = parse("/ cell : age % Log base 2 eps 1").expect("parse should succeed");
        let Step::Eltwise(EltwiseOp::Log { base, eps, .. }) = &pipeline.steps[2] else {
            panic!("expected a Log step");
        };
        assert_eq!((*base, *eps), (2.0, 1.0));

        let err = parse("/ cell : age % Log base 0").expect_err("base 0");
        assert!(err.message.contains("logarithm base"));
    }

    #[test]
    fn rejects_unknown_and_duplicate_parameters() {
        let err = parse("/ cell : age % Log flavor 3").expect_err("unknown param");
        assert_eq!(
            err.message,
            "unknown parameter: flavor for the operation: Log"
        );
        let err = parse("/ cell : age % Log base 2 base 3").expect_err("duplicate param");
        assert_eq!(err.message, "duplicate parameter: base");
    }

    #[test]
    fn requires_quantile_p() {
        let err = parse("/ cell : age %> Quantile").expect_err("missing p");
        assert_eq!(
            err.message,
            "missing required parameter: p for the operation: Quantile"
        );
    }

    #[test]
    fn rejects_kind_mismatched_operations() {
        let err = parse("/ cell : age % Sum").expect_err("reduce after %");
        assert_eq!(err.message, "not an eltwise operation: Sum");
        let err = parse("/ cell : age %> Abs").expect_err("eltwise after %>");
        assert_eq!(err.message, "not a reduction operation: Abs");
    }

    #[test]
    fn parses_group_by_and_count_by() {
        let pipeline =
            parse("/ cell : age @ batch ! batch %> Mean || 0").expect("parse should succeed");
        let Step::GroupBy(group_by) = &pipeline.steps[2] else {
            panic!("expected a group-by step");
        };
        assert_eq!(group_by.group.as_axis.as_deref(), Some("batch"));
        assert!(group_by.if_missing.is_some());

        let pipeline = parse("/ cell : batch * type").expect("parse should succeed");
        assert!(matches!(pipeline.steps[2], Step::CountBy(_)));
    }

    #[test]
    fn rejects_malformed_regex() {
        let err = parse("/ cell & type ~ [").expect_err("bad regex");
        assert_eq!(err.message, "malformed regex pattern: [");
    }

    #[test]
    fn rejects_trailing_names() {
        let err = parse("/ cell : age extra").expect_err("trailing name");
        assert_eq!(err.message, "unexpected name: extra");
    }

    #[test]
    fn empty_query_is_rejected() {
        let err = parse("   ").expect_err("empty");
        assert_eq!(err.message, "empty query");
    }

    #[test]
    fn canonical_round_trip_is_stable() {
        let source = "/ cell & b > 1 & a = x : batch => donor ?? d => sex % Log";
        let canonical = parse(source)
            .expect("parse should succeed")
            .canonicalize();
        let text = canonical.render_with_spans().text;
        let reparsed = parse(&text).expect("canonical text should re-parse");
        assert_eq!(reparsed.canonicalize(), canonical);
        assert_eq!(reparsed.canonical_text(), text);
    }
}
