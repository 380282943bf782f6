use std::fmt;
use std::sync::Arc;

use crate::value::BindValue;

/// Row lock requested by a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Share,
    Update,
}

/// Words every dialect treats as reserved.
const ANSI_KEYWORDS: &[&str] = &[
    "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "CHECK", "COLUMN",
    "CONSTRAINT", "CREATE", "CROSS", "CURRENT", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP",
    "ELSE", "END", "EXCEPT", "EXISTS", "FALSE", "FETCH", "FOR", "FOREIGN", "FROM", "FULL",
    "GRANT", "GROUP", "HAVING", "IN", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY",
    "LEFT", "LIKE", "NOT", "NULL", "OF", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES",
    "RIGHT", "SELECT", "SET", "SOME", "TABLE", "THEN", "TO", "TRUE", "UNION", "UNIQUE", "UPDATE",
    "USER", "USING", "VALUES", "WHEN", "WHERE", "WITH",
];

const POSTGRES_KEYWORDS: &[&str] = &[
    "ANALYSE", "ANALYZE", "ARRAY", "ASYMMETRIC", "BOTH", "COLLATE", "DO", "LIMIT", "OFFSET",
    "ONLY", "PLACING", "RETURNING", "SYMMETRIC", "VARIADIC", "WINDOW",
];

const MYSQL_KEYWORDS: &[&str] = &[
    "DATABASE", "DIV", "DUAL", "INDEX", "INTERVAL", "KEYS", "LIMIT", "LOCK", "MATCH", "MOD",
    "RANGE", "RANK", "READ", "REGEXP", "RLIKE", "ROW", "ROWS", "SCHEMA", "SHOW", "STATUS",
    "WRITE",
];

const SQLITE_KEYWORDS: &[&str] = &[
    "ABORT", "AUTOINCREMENT", "GLOB", "INDEX", "LIMIT", "OFFSET", "PRAGMA", "RAISE", "REGEXP",
    "ROWID", "TEMP", "VACUUM",
];

fn contains_keyword(list: &[&str], word: &str) -> bool {
    list.iter().any(|keyword| keyword.eq_ignore_ascii_case(word))
}

/// True when `ident` can be written without quotes in any dialect.
fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// SQL syntax capabilities of a database.
///
/// One implementation per supported database, selected by configuration.
/// Placeholders are numbered from 1.
pub trait SqlDialect: Send + Sync + fmt::Debug {
    /// Stable name, part of every template cache key.
    fn name(&self) -> &'static str;

    fn identifier_quote(&self) -> char {
        '"'
    }

    fn literal_quote(&self) -> char {
        '\''
    }

    /// Whether a backslash inside a string literal escapes the next character.
    fn backslash_escapes(&self) -> bool {
        false
    }

    /// Returns the placeholder for the `n`-th parameter in a query (e.g., "?" or "$1").
    fn placeholder(&self, _n: usize) -> String {
        "?".to_owned()
    }

    fn is_keyword(&self, word: &str) -> bool {
        contains_keyword(ANSI_KEYWORDS, word)
    }

    /// Quotes an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, ident: &str) -> String {
        let quote = self.identifier_quote();
        let mut escaped = String::with_capacity(ident.len() + 2);
        escaped.push(quote);
        for c in ident.chars() {
            if c == quote {
                escaped.push(quote);
            }
            escaped.push(c);
        }
        escaped.push(quote);
        escaped
    }

    /// Quotes `ident` only when it is reserved or not a plain identifier.
    fn escape_identifier(&self, ident: &str) -> String {
        if is_plain_identifier(ident) && !self.is_keyword(ident) {
            ident.to_owned()
        } else {
            self.quote_identifier(ident)
        }
    }

    /// Whether `(a, b) IN ((?, ?), ...)` is accepted.
    fn supports_tuple_in(&self) -> bool {
        false
    }

    fn supports_delete_alias(&self) -> bool {
        false
    }

    fn supports_update_alias(&self) -> bool {
        false
    }

    fn delete_prefix(&self, table: &str, alias: Option<&str>) -> String {
        match alias {
            Some(alias) => format!("DELETE FROM {table} {alias}"),
            None => format!("DELETE FROM {table}"),
        }
    }

    fn limit(&self, placeholder: &str) -> String {
        format!("LIMIT {placeholder}")
    }

    fn offset(&self, placeholder: &str) -> String {
        format!("OFFSET {placeholder}")
    }

    fn lock_hint(&self, mode: LockMode) -> Option<&'static str> {
        match mode {
            LockMode::Share => Some("FOR SHARE"),
            LockMode::Update => Some("FOR UPDATE"),
        }
    }

    fn sequence_next_value(&self, _sequence: &str) -> Option<String> {
        None
    }

    /// Returns the SQL function code for getting the current timestamp.
    fn current_timestamp_fn(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn quote_literal(&self, text: &str) -> String {
        let quote = self.literal_quote();
        let mut escaped = String::with_capacity(text.len() + 2);
        escaped.push(quote);
        for c in text.chars() {
            if c == quote {
                escaped.push(quote);
            }
            escaped.push(c);
        }
        escaped.push(quote);
        escaped
    }

    /// Renders a value as inline SQL text.
    fn render_literal(&self, value: &BindValue) -> String {
        render_default(self, value)
    }
}

/// Standard SQL; the default when nothing else is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn lock_hint(&self, mode: LockMode) -> Option<&'static str> {
        match mode {
            LockMode::Share => None,
            LockMode::Update => Some("FOR UPDATE"),
        }
    }

    fn sequence_next_value(&self, sequence: &str) -> Option<String> {
        Some(format!("NEXT VALUE FOR {}", self.escape_identifier(sequence)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn is_keyword(&self, word: &str) -> bool {
        contains_keyword(ANSI_KEYWORDS, word) || contains_keyword(SQLITE_KEYWORDS, word)
    }

    fn lock_hint(&self, _mode: LockMode) -> Option<&'static str> {
        None
    }

    fn render_literal(&self, value: &BindValue) -> String {
        match value {
            BindValue::Bool(v) => i64::from(*v).to_string(),
            other => render_default(self, other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn is_keyword(&self, word: &str) -> bool {
        contains_keyword(ANSI_KEYWORDS, word) || contains_keyword(POSTGRES_KEYWORDS, word)
    }

    fn supports_tuple_in(&self) -> bool {
        true
    }

    fn supports_delete_alias(&self) -> bool {
        true
    }

    fn supports_update_alias(&self) -> bool {
        true
    }

    fn sequence_next_value(&self, sequence: &str) -> Option<String> {
        Some(format!(
            "nextval({})",
            self.quote_literal(&self.escape_identifier(sequence))
        ))
    }

    fn render_literal(&self, value: &BindValue) -> String {
        match value {
            BindValue::Bytes(v) => format!("'\\x{}'::bytea", hex(v)),
            other => render_default(self, other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn is_keyword(&self, word: &str) -> bool {
        contains_keyword(ANSI_KEYWORDS, word) || contains_keyword(MYSQL_KEYWORDS, word)
    }

    fn supports_tuple_in(&self) -> bool {
        true
    }

    fn supports_delete_alias(&self) -> bool {
        true
    }

    fn supports_update_alias(&self) -> bool {
        true
    }

    fn delete_prefix(&self, table: &str, alias: Option<&str>) -> String {
        match alias {
            Some(alias) => format!("DELETE {alias} FROM {table} {alias}"),
            None => format!("DELETE FROM {table}"),
        }
    }

    fn quote_literal(&self, text: &str) -> String {
        // Backslash is an escape character unless NO_BACKSLASH_ESCAPES is set.
        let mut escaped = String::with_capacity(text.len() + 2);
        escaped.push('\'');
        for c in text.chars() {
            match c {
                '\'' => escaped.push_str("''"),
                '\\' => escaped.push_str("\\\\"),
                other => escaped.push(other),
            }
        }
        escaped.push('\'');
        escaped
    }
}

/// Default literal rendering, shared by dialects that override a few cases.
fn render_default<D: SqlDialect + ?Sized>(dialect: &D, value: &BindValue) -> String {
    match value {
        BindValue::Null => "NULL".to_owned(),
        BindValue::I64(v) => v.to_string(),
        BindValue::F64(v) if v.is_finite() => format!("{v:?}"),
        BindValue::F64(v) => dialect.quote_literal(&v.to_string()),
        BindValue::Bool(true) => "TRUE".to_owned(),
        BindValue::Bool(false) => "FALSE".to_owned(),
        BindValue::String(v) => dialect.quote_literal(v),
        BindValue::Uuid(v) => dialect.quote_literal(&v.to_string()),
        BindValue::DateTime(v) => dialect.quote_literal(&v.to_rfc3339()),
        BindValue::Json(v) => dialect.quote_literal(&v.to_string()),
        BindValue::Bytes(v) => format!("X'{}'", hex(v)),
    }
}

/// Looks up a built-in dialect by name (`ansi`, `sqlite`, `postgres`, `mysql`).
pub fn dialect_by_name(name: &str) -> Option<Arc<dyn SqlDialect>> {
    let dialect: Arc<dyn SqlDialect> = match name.trim().to_ascii_lowercase().as_str() {
        "ansi" | "default" => Arc::new(AnsiDialect),
        "sqlite" => Arc::new(SqliteDialect),
        "postgres" | "postgresql" | "pg" => Arc::new(PostgresDialect),
        "mysql" | "mariadb" => Arc::new(MySqlDialect),
        _ => return None,
    };
    Some(dialect)
}
