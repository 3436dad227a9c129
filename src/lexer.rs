//! Statement-boundary lexer.
//!
//! Only understands enough SQL to find top-level `;` terminators and the
//! leading keyword of a statement: string literals (including `E'...'`
//! escape strings), quoted identifiers, dollar-quoted bodies, line comments
//! and nested block comments.

use crate::StmtError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Word,
    Literal,
    LineComment,
    BlockComment,
    Terminator,
    OpenParen,
    CloseParen,
    Symbol,
}

impl TokenKind {
    fn is_comment(self) -> bool {
        matches!(self, Self::LineComment | Self::BlockComment)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

/// One statement cut out of the source text, without its terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Segment {
    pub text: String,
    /// The segment ends inside a `--` comment, so a newline must precede
    /// whatever is written after it.
    pub ends_in_line_comment: bool,
}

pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>, StmtError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let next = bytes.get(i + 1).copied();
        let kind = match bytes[i] {
            c if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'-' if next == Some(b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |offset| i + offset);
                TokenKind::LineComment
            }
            b'/' if next == Some(b'*') => {
                i = block_comment_end(bytes, i)?;
                TokenKind::BlockComment
            }
            b'\'' => {
                i = quoted_end(bytes, i, b'\'', false)?;
                TokenKind::Literal
            }
            b'"' => {
                i = quoted_end(bytes, i, b'"', false)?;
                TokenKind::Literal
            }
            b'$' => match dollar_tag_len(bytes, i) {
                Some(tag_len) => {
                    i = dollar_quoted_end(sql, i, tag_len)?;
                    TokenKind::Literal
                }
                None => {
                    i += 1;
                    TokenKind::Symbol
                }
            },
            b';' => {
                i += 1;
                TokenKind::Terminator
            }
            b'(' => {
                i += 1;
                TokenKind::OpenParen
            }
            b')' => {
                i += 1;
                TokenKind::CloseParen
            }
            c if is_word_byte(c) => {
                let mut end = i + 1;
                while end < bytes.len() && (is_word_byte(bytes[end]) || bytes[end] == b'$') {
                    end += 1;
                }
                if end == i + 1
                    && matches!(bytes[i], b'e' | b'E')
                    && bytes.get(end) == Some(&b'\'')
                {
                    i = quoted_end(bytes, end, b'\'', true)?;
                    TokenKind::Literal
                } else {
                    i = end;
                    TokenKind::Word
                }
            }
            _ => {
                i += 1;
                TokenKind::Symbol
            }
        };
        tokens.push(Token {
            kind,
            start,
            end: i,
        });
    }

    Ok(tokens)
}

/// Splits raw SQL into statements at top-level terminators.
///
/// Segments holding only whitespace or comments never become statements.
pub(crate) fn split(sql: &str) -> Result<Vec<Segment>, StmtError> {
    let tokens = tokenize(sql)?;
    let mut segments = Vec::new();
    let mut span: Option<(usize, usize)> = None;
    let mut has_code = false;
    let mut last_kind = None;

    let mut flush = |span: Option<(usize, usize)>, has_code: bool, last_kind: Option<TokenKind>| {
        if let (Some((start, end)), true) = (span, has_code) {
            segments.push(Segment {
                text: sql[start..end].to_owned(),
                ends_in_line_comment: last_kind == Some(TokenKind::LineComment),
            });
        }
    };

    for token in &tokens {
        if token.kind == TokenKind::Terminator {
            flush(span.take(), has_code, last_kind);
            has_code = false;
            last_kind = None;
            continue;
        }
        let start = span.map_or(token.start, |(start, _)| start);
        span = Some((start, token.end));
        has_code |= !token.kind.is_comment();
        last_kind = Some(token.kind);
    }
    flush(span, has_code, last_kind);

    Ok(segments)
}

/// Top-level shape of a single statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Shape {
    /// Upper-cased top-level words, in order.
    pub words: Vec<String>,
    /// Byte offset just past the last token that is not a comment.
    pub code_end: usize,
}

pub(crate) fn shape(sql: &str) -> Result<Shape, StmtError> {
    let mut depth = 0usize;
    let mut words = Vec::new();
    let mut code_end = 0;

    for token in tokenize(sql)? {
        match token.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => depth = depth.saturating_sub(1),
            TokenKind::Word if depth == 0 => {
                words.push(sql[token.start..token.end].to_ascii_uppercase());
            }
            _ => {}
        }
        if !token.kind.is_comment() {
            code_end = token.end;
        }
    }

    Ok(Shape { words, code_end })
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn syntax_error(position: usize, message: &str) -> StmtError {
    StmtError::Syntax {
        position,
        message: message.to_owned(),
    }
}

fn block_comment_end(bytes: &[u8], start: usize) -> Result<usize, StmtError> {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => i += 1,
        }
    }
    Err(syntax_error(start, "unterminated block comment"))
}

fn quoted_end(bytes: &[u8], start: usize, quote: u8, backslash: bool) -> Result<usize, StmtError> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash => i += 2,
            c if c == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return Ok(i + 1);
                }
            }
            _ => i += 1,
        }
    }
    let message = if quote == b'"' {
        "unterminated quoted identifier"
    } else {
        "unterminated string literal"
    };
    Err(syntax_error(start, message))
}

/// Length of a `$tag$` opener at `start`, or `None` for `$1`-style placeholders.
fn dollar_tag_len(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    match bytes.get(i) {
        Some(b'$') => return Some(2),
        Some(c) if c.is_ascii_alphabetic() || *c == b'_' || *c >= 0x80 => {}
        _ => return None,
    }
    while let Some(&c) = bytes.get(i) {
        if c == b'$' {
            return Some(i + 1 - start);
        }
        if !is_word_byte(c) {
            return None;
        }
        i += 1;
    }
    None
}

fn dollar_quoted_end(sql: &str, start: usize, tag_len: usize) -> Result<usize, StmtError> {
    let tag = &sql[start..start + tag_len];
    let body = start + tag_len;
    sql[body..]
        .find(tag)
        .map(|offset| body + offset + tag_len)
        .ok_or_else(|| syntax_error(start, "unterminated dollar-quoted string"))
}

#[cfg(test)]
mod tests {
    use super::{shape, split, TokenKind};
    use crate::StmtError;

    fn texts(sql: &str) -> Vec<String> {
        split(sql)
            .expect("must split")
            .into_iter()
            .map(|segment| segment.text)
            .collect()
    }

    #[test]
    fn splits_on_top_level_terminators() {
        assert_eq!(
            texts("SELECT 1; SELECT 2;\n  INSERT INTO t VALUES (3)"),
            ["SELECT 1", "SELECT 2", "INSERT INTO t VALUES (3)"]
        );
    }

    #[test]
    fn ignores_terminators_inside_quotes_and_comments() {
        let sql = concat!(
            "SELECT 'a;b', \"c;d\" /* x; /* nested; */ y; */ FROM t",
            " -- trailing; comment\n; SELECT $$e;f$$",
        );
        let parts = texts(sql);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("SELECT 'a;b'"));
        assert!(parts[0].ends_with("-- trailing; comment"));
        assert_eq!(parts[1], "SELECT $$e;f$$");
    }

    #[test]
    fn doubled_and_backslash_quotes_stay_inside_literals() {
        assert_eq!(
            texts("SELECT 'it''s; fine'; SELECT E'it\\'s; fine'"),
            ["SELECT 'it''s; fine'", "SELECT E'it\\'s; fine'"]
        );
    }

    #[test]
    fn tagged_dollar_quote_and_placeholders() {
        assert_eq!(
            texts("CREATE FUNCTION f() AS $body$ BEGIN; END $body$; SELECT $1"),
            ["CREATE FUNCTION f() AS $body$ BEGIN; END $body$", "SELECT $1"]
        );
    }

    #[test]
    fn whitespace_and_comment_only_segments_are_dropped() {
        assert!(texts("").is_empty());
        assert!(texts("  ;\n ; ").is_empty());
        assert_eq!(texts("SELECT 1;;  \n"), ["SELECT 1"]);
        assert_eq!(texts("SELECT 1; -- done\n"), ["SELECT 1"]);
    }

    #[test]
    fn reports_line_comment_tail() {
        let segments = split("SELECT 1 -- one").expect("must split");
        assert!(segments[0].ends_in_line_comment);
    }

    #[test]
    fn unterminated_constructs_are_syntax_errors() {
        for (sql, position) in [
            ("SELECT 'open", 7),
            ("SELECT \"open", 7),
            ("SELECT 1 /* open", 9),
            ("SELECT $x$ open", 7),
        ] {
            match split(sql) {
                Err(StmtError::Syntax { position: at, .. }) => assert_eq!(at, position, "{sql}"),
                other => panic!("expected syntax error for {sql}, got {other:?}"),
            }
        }
    }

    #[test]
    fn shape_collects_top_level_words_only() {
        let shape = shape("INSERT INTO t (a) SELECT x FROM (SELECT 1) s -- c").expect("must lex");
        assert_eq!(shape.words, ["INSERT", "INTO", "T", "SELECT", "X", "FROM", "S"]);
        assert_eq!(shape.code_end, "INSERT INTO t (a) SELECT x FROM (SELECT 1) s".len());
    }

    #[test]
    fn comment_tokens_are_classified() {
        let tokens = super::tokenize("/* a */ -- b").expect("must lex");
        assert_eq!(tokens[0].kind, TokenKind::BlockComment);
        assert_eq!(tokens[1].kind, TokenKind::LineComment);
    }
}
