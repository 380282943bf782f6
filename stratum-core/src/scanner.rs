//! Finds quoted identifiers and string literals in raw SQL.
//!
//! This is a single left-to-right pass, not a parser. A doubled quote inside
//! a span is one embedded quote character, so `"""table"""` is one identifier.
//! `--` and `/* */` comments are skipped so quotes inside them open nothing.
//! Dialects with backslash escapes (MySQL) also skip the character after a
//! backslash inside a literal.

use std::ops::Range;

use crate::dialect::SqlDialect;
use crate::error::{ScanError, SpanKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedSpan {
    pub kind: SpanKind,
    /// Byte offset of the opening quote.
    pub start: usize,
    /// Byte offset just past the closing quote.
    pub end: usize,
}

impl QuotedSpan {
    /// Range between the delimiters.
    pub fn content(&self) -> Range<usize> {
        self.start + 1..self.end - 1
    }

    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Normal,
    Identifier(usize),
    Literal(usize),
    LineComment,
    BlockComment(usize),
}

struct Scan {
    spans: Vec<QuotedSpan>,
    in_line_comment: bool,
}

fn closed(kind: SpanKind, start: usize, offset: usize, quote: char) -> QuotedSpan {
    QuotedSpan {
        kind,
        start,
        end: offset + quote.len_utf8(),
    }
}

fn run(sql: &str, dialect: &dyn SqlDialect) -> Result<Scan, ScanError> {
    let identifier_quote = dialect.identifier_quote();
    let literal_quote = dialect.literal_quote();
    let backslash_escapes = dialect.backslash_escapes();
    let mut spans = Vec::new();
    let mut state = State::Normal;
    let mut chars = sql.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let next = chars.peek().map(|(_, next)| *next);
        state = match state {
            State::Normal if c == identifier_quote => State::Identifier(offset),
            State::Normal if c == literal_quote => State::Literal(offset),
            State::Normal if c == '-' && next == Some('-') => {
                chars.next();
                State::LineComment
            }
            State::Normal if c == '/' && next == Some('*') => {
                chars.next();
                State::BlockComment(offset)
            }
            State::Identifier(start) if c == identifier_quote => {
                if next == Some(c) {
                    chars.next();
                    state
                } else {
                    spans.push(closed(SpanKind::Identifier, start, offset, c));
                    State::Normal
                }
            }
            State::Literal(_) if c == '\\' && backslash_escapes => {
                chars.next();
                state
            }
            State::Literal(start) if c == literal_quote => {
                if next == Some(c) {
                    chars.next();
                    state
                } else {
                    spans.push(closed(SpanKind::Literal, start, offset, c));
                    State::Normal
                }
            }
            State::LineComment if c == '\n' => State::Normal,
            State::BlockComment(_) if c == '*' && next == Some('/') => {
                chars.next();
                State::Normal
            }
            unchanged => unchanged,
        };
    }

    match state {
        State::Identifier(offset) => Err(ScanError::Unterminated {
            kind: SpanKind::Identifier,
            offset,
        }),
        State::Literal(offset) => Err(ScanError::Unterminated {
            kind: SpanKind::Literal,
            offset,
        }),
        State::BlockComment(offset) => Err(ScanError::Unterminated {
            kind: SpanKind::BlockComment,
            offset,
        }),
        State::LineComment => Ok(Scan {
            spans,
            in_line_comment: true,
        }),
        State::Normal => Ok(Scan {
            spans,
            in_line_comment: false,
        }),
    }
}

/// Quoted spans of `sql` in order of appearance.
pub fn scan(sql: &str, dialect: &dyn SqlDialect) -> Result<Vec<QuotedSpan>, ScanError> {
    run(sql, dialect).map(|scan| scan.spans)
}

/// True when `sql` ends inside a `--` comment, which would swallow anything appended.
pub fn ends_in_line_comment(sql: &str, dialect: &dyn SqlDialect) -> Result<bool, ScanError> {
    run(sql, dialect).map(|scan| scan.in_line_comment)
}

fn clear(sql: &str, dialect: &dyn SqlDialect, kind: SpanKind) -> Result<String, ScanError> {
    let spans = scan(sql, dialect)?;
    let mut cleared = String::with_capacity(sql.len());
    let mut copied = 0;
    for span in spans.iter().filter(|span| span.kind == kind) {
        let content = span.content();
        cleared.push_str(&sql[copied..content.start]);
        copied = content.end;
    }
    cleared.push_str(&sql[copied..]);
    Ok(cleared)
}

/// Empties every quoted identifier, keeping its delimiters; literals are untouched.
pub fn clear_quoted_identifiers(sql: &str, dialect: &dyn SqlDialect) -> Result<String, ScanError> {
    clear(sql, dialect, SpanKind::Identifier)
}

/// Empties every string literal, keeping its delimiters; identifiers are untouched.
pub fn clear_string_literals(sql: &str, dialect: &dyn SqlDialect) -> Result<String, ScanError> {
    clear(sql, dialect, SpanKind::Literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{AnsiDialect, MySqlDialect};

    const SIMPLE: &str = r#"SELECT * FROM "table" WHERE column = 'value'"#;
    const DOUBLED: &str = r#"SELECT * FROM """table""" WHERE column = '''value'''"#;

    #[test]
    fn clears_identifiers_only() {
        assert_eq!(
            clear_quoted_identifiers(SIMPLE, &AnsiDialect).unwrap(),
            r#"SELECT * FROM "" WHERE column = 'value'"#
        );
        assert_eq!(
            clear_quoted_identifiers(DOUBLED, &AnsiDialect).unwrap(),
            r#"SELECT * FROM "" WHERE column = '''value'''"#
        );
    }

    #[test]
    fn clears_literals_only() {
        assert_eq!(
            clear_string_literals(SIMPLE, &AnsiDialect).unwrap(),
            r#"SELECT * FROM "table" WHERE column = ''"#
        );
        assert_eq!(
            clear_string_literals(DOUBLED, &AnsiDialect).unwrap(),
            r#"SELECT * FROM """table""" WHERE column = ''"#
        );
    }

    #[test]
    fn doubled_quotes_stay_inside_one_span() {
        let spans = scan(DOUBLED, &AnsiDialect).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text(DOUBLED), r#""""table""""#);
        assert_eq!(spans[1].text(DOUBLED), "'''value'''");
    }

    #[test]
    fn quotes_in_comments_are_ignored() {
        let sql = "SELECT 1 -- it's fine\nFROM t /* \"odd */ WHERE a = 'x'";
        let spans = scan(sql, &AnsiDialect).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, SpanKind::Literal);
        assert!(ends_in_line_comment("WHERE a = 1 -- note", &AnsiDialect).unwrap());
    }

    #[test]
    fn unterminated_spans_are_errors() {
        assert_eq!(
            scan("SELECT 'abc", &AnsiDialect).unwrap_err(),
            ScanError::Unterminated {
                kind: SpanKind::Literal,
                offset: 7
            }
        );
        assert!(matches!(
            scan("SELECT /* x", &AnsiDialect),
            Err(ScanError::Unterminated {
                kind: SpanKind::BlockComment,
                ..
            })
        ));
    }

    #[test]
    fn dialect_decides_identifier_quote() {
        let sql = "SELECT `a``b`, \"text\"";
        let spans = scan(sql, &MySqlDialect).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text(sql), "`a``b`");
        assert_eq!(
            clear_quoted_identifiers(sql, &MySqlDialect).unwrap(),
            "SELECT ``, \"text\""
        );
    }

    #[test]
    fn mysql_backslashes_escape_inside_literals() {
        let sql = r"SELECT `name` FROM pet WHERE note = 'it\'s' AND tag = 'a\\'";
        assert_eq!(
            clear_string_literals(sql, &MySqlDialect).unwrap(),
            "SELECT `name` FROM pet WHERE note = '' AND tag = ''"
        );
        assert_eq!(scan(sql, &MySqlDialect).unwrap().len(), 3);

        // Standard SQL keeps the backslash as text.
        let ansi = r"SELECT 1 WHERE note = 'a\'";
        assert_eq!(
            clear_string_literals(ansi, &AnsiDialect).unwrap(),
            "SELECT 1 WHERE note = ''"
        );
    }
}
