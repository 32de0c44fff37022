use crate::error::{ParseError, Span};

/// Characters with syntactic meaning; anywhere else in a name they must be
/// escaped with a backslash.
pub(crate) const SPECIAL_CHARS: &[char] = &[
    '/', ':', '=', '!', '%', '@', '*', '?', '|', '&', '^', '<', '>', '~', ';', ',', '\\',
];

#[inline]
pub(crate) fn is_special(c: char) -> bool {
    SPECIAL_CHARS.contains(&c)
}

/// Escape a name for rendering so that it tokenizes back to itself.
pub(crate) fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if is_special(c) || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Slash,      // /
    Colon,      // :
    Assign,     // =
    Arrow,      // =>
    Bang,       // !
    NotEq,      // !=
    NotMatch,   // !~
    Percent,    // %
    PercentGt,  // %>
    At,         // @
    Star,       // *
    Question,   // ?
    QQ,         // ??
    PipePipe,   // ||
    Amp,        // &
    AmpBang,    // &!
    Pipe,       // |
    PipeBang,   // |!
    Caret,      // ^
    CaretBang,  // ^!
    Lt,         // <
    Le,         // <=
    Gt,         // >
    Ge,         // >=
    Tilde,      // ~
    Semicolon,  // ;
    Comma,      // ,
    Name,
}

impl TokenKind {
    pub(crate) const fn describe(self) -> &'static str {
        match self {
            Self::Slash => "/",
            Self::Colon => ":",
            Self::Assign => "=",
            Self::Arrow => "=>",
            Self::Bang => "!",
            Self::NotEq => "!=",
            Self::NotMatch => "!~",
            Self::Percent => "%",
            Self::PercentGt => "%>",
            Self::At => "@",
            Self::Star => "*",
            Self::Question => "?",
            Self::QQ => "??",
            Self::PipePipe => "||",
            Self::Amp => "&",
            Self::AmpBang => "&!",
            Self::Pipe => "|",
            Self::PipeBang => "|!",
            Self::Caret => "^",
            Self::CaretBang => "^!",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Tilde => "~",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Name => "name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Unescaped text; only meaningful for `Name` tokens.
    pub text: String,
}

/// Tokenize a query left-to-right, tracking byte offsets against the
/// original input for error reporting.
pub(crate) fn tokenize(query: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let bytes = query.as_bytes();
    let mut chars = query.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if !is_special(c) {
            tokens.push(read_name(query, &mut chars, start)?);
            continue;
        }
        if c == '\\' {
            tokens.push(read_name(query, &mut chars, start)?);
            continue;
        }
        chars.next();
        let two = chars.peek().map(|&(_, next)| next);
        let (kind, width) = match (c, two) {
            ('=', Some('>')) => (TokenKind::Arrow, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('!', Some('~')) => (TokenKind::NotMatch, 2),
            ('!', _) => (TokenKind::Bang, 1),
            ('%', Some('>')) => (TokenKind::PercentGt, 2),
            ('%', _) => (TokenKind::Percent, 1),
            ('?', Some('?')) => (TokenKind::QQ, 2),
            ('?', _) => (TokenKind::Question, 1),
            ('|', Some('|')) => (TokenKind::PipePipe, 2),
            ('|', Some('!')) => (TokenKind::PipeBang, 2),
            ('|', _) => (TokenKind::Pipe, 1),
            ('&', Some('!')) => (TokenKind::AmpBang, 2),
            ('&', _) => (TokenKind::Amp, 1),
            ('^', Some('!')) => (TokenKind::CaretBang, 2),
            ('^', _) => (TokenKind::Caret, 1),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('>', _) => (TokenKind::Gt, 1),
            ('/', _) => (TokenKind::Slash, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('@', _) => (TokenKind::At, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('~', _) => (TokenKind::Tilde, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            (',', _) => (TokenKind::Comma, 1),
            _ => {
                return Err(ParseError::new(
                    format!("unexpected character: {c}"),
                    query,
                    Span::new(start, c.len_utf8()),
                ));
            }
        };
        if width == 2 {
            chars.next();
        }
        tokens.push(Token {
            kind,
            span: Span::new(start, width),
            text: String::new(),
        });
    }

    debug_assert!(tokens.iter().all(|t| t.span.end() <= bytes.len()));
    Ok(tokens)
}

fn read_name(
    query: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    start: usize,
) -> Result<Token, ParseError> {
    let mut text = String::new();
    let mut end = start;
    while let Some(&(offset, c)) = chars.peek() {
        if c == '\\' {
            chars.next();
            match chars.next() {
                Some((esc_offset, escaped)) => {
                    text.push(escaped);
                    end = esc_offset + escaped.len_utf8();
                }
                None => {
                    return Err(ParseError::new(
                        "trailing escape at the end of the query",
                        query,
                        Span::new(offset, 1),
                    ));
                }
            }
            continue;
        }
        if c.is_whitespace() || is_special(c) {
            break;
        }
        text.push(c);
        end = offset + c.len_utf8();
        chars.next();
    }
    Ok(Token {
        kind: TokenKind::Name,
        span: Span::new(start, end - start),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(query: &str) -> Vec<TokenKind> {
        tokenize(query)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn two_char_operators_win_over_single() {
        assert_eq!(
            kinds(": batch => donor"),
            vec![
                TokenKind::Colon,
                TokenKind::Name,
                TokenKind::Arrow,
                TokenKind::Name
            ]
        );
        assert_eq!(kinds("?? || %> &! |! ^! != !~ <= >="), vec![
            TokenKind::QQ,
            TokenKind::PipePipe,
            TokenKind::PercentGt,
            TokenKind::AmpBang,
            TokenKind::PipeBang,
            TokenKind::CaretBang,
            TokenKind::NotEq,
            TokenKind::NotMatch,
            TokenKind::Le,
            TokenKind::Ge,
        ]);
    }

    #[test]
    fn names_capture_spans_and_unescape() {
        let tokens = tokenize("/ weird\\ axis").expect("tokenize should succeed");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "weird axis");
        assert_eq!(tokens[1].span, Span::new(2, 11));
    }

    #[test]
    fn escape_round_trips_through_tokenizer() {
        let name = "a:b c/d\\e";
        let escaped = escape_name(name);
        let tokens = tokenize(&escaped).expect("tokenize should succeed");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, name);
    }

    #[test]
    fn trailing_escape_is_rejected() {
        let err = tokenize("cell\\").expect_err("trailing escape");
        assert!(err.message.contains("trailing escape"));
    }

    #[test]
    fn negative_numbers_are_plain_names() {
        let tokens = tokenize("|| -1.5").expect("tokenize should succeed");
        assert_eq!(tokens[0].kind, TokenKind::PipePipe);
        assert_eq!(tokens[1].text, "-1.5");
    }
}
