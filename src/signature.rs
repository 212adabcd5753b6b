//! SQL statement signatures used as span names.
//!
//! A signature is a low-cardinality summary of a statement: the leading
//! keyword plus the primary table, e.g. `SELECT FROM users` or
//! `INSERT INTO grades`. Literals, predicates and column lists never appear
//! in a signature.

use once_cell::sync::Lazy;
use regex::Regex;

/// Leading SQL keyword of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    Call,
    Other,
}

impl SqlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Replace => "REPLACE",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Call => "CALL",
            SqlOperation::Other => "QUERY",
        }
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// An optionally quoted, optionally schema-qualified identifier.
const IDENT: &str = r#"((?:[`"\[]?[\w$]+[`"\]]?\.)*[`"\[]?[\w$]+[`"\]]?)"#;

static SELECT_TABLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bFROM\s+{IDENT}")).unwrap());

static INSERT_TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^(?:INSERT|REPLACE)\s+(?:IGNORE\s+)?INTO\s+{IDENT}"
    ))
    .unwrap()
});

static UPDATE_TABLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)^UPDATE\s+(?:ONLY\s+)?{IDENT}")).unwrap());

static DELETE_TABLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)^DELETE\s+FROM\s+(?:ONLY\s+)?{IDENT}")).unwrap());

static CALL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)^CALL\s+{IDENT}")).unwrap());

static LEADING_KEYWORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]+").unwrap());

/// Skip leading whitespace and `--` / `/* */` comments.
fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(idx) => after[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(idx) => after[idx + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

/// Parse the SQL operation type from a statement.
pub fn parse_operation(sql: &str) -> SqlOperation {
    let trimmed = strip_leading_comments(sql);
    let upper_start: String = trimmed.chars().take(8).collect::<String>().to_uppercase();

    if upper_start.starts_with("SELECT") || upper_start.starts_with("WITH") {
        SqlOperation::Select
    } else if upper_start.starts_with("INSERT") {
        SqlOperation::Insert
    } else if upper_start.starts_with("REPLACE") {
        SqlOperation::Replace
    } else if upper_start.starts_with("UPDATE") {
        SqlOperation::Update
    } else if upper_start.starts_with("DELETE") {
        SqlOperation::Delete
    } else if upper_start.starts_with("CALL") {
        SqlOperation::Call
    } else {
        SqlOperation::Other
    }
}

/// Blank out everything nested inside parentheses.
///
/// Function arguments and subqueries then cannot supply the `FROM` table.
fn top_level(sql: &str) -> String {
    let mut depth = 0usize;
    sql.chars()
        .map(|c| match c {
            '(' => {
                depth += 1;
                c
            }
            ')' => {
                depth = depth.saturating_sub(1);
                c
            }
            _ if depth > 0 => ' ',
            _ => c,
        })
        .collect()
}

fn unquote(ident: &str) -> String {
    ident
        .chars()
        .filter(|c| !matches!(c, '`' | '"' | '[' | ']'))
        .collect()
}

fn capture_ident(regex: &Regex, sql: &str) -> Option<String> {
    regex
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| unquote(m.as_str()))
}

/// Compute the signature of a SQL statement.
///
/// | Statement | Signature |
/// |-----------|-----------|
/// | `SELECT * FROM users WHERE id = 1` | `SELECT FROM users` |
/// | `INSERT INTO grades (a) VALUES (?)` | `INSERT INTO grades` |
/// | `UPDATE students SET name = ?` | `UPDATE students` |
/// | `DELETE FROM assignments WHERE id = ?` | `DELETE FROM assignments` |
/// | `CALL refresh_totals(?)` | `CALL refresh_totals` |
/// | `create table foo (id int)` | `CREATE` |
pub fn signature(sql: &str) -> String {
    let sql = strip_leading_comments(sql);
    let operation = parse_operation(sql);

    let (prefix, table) = match operation {
        SqlOperation::Select => (
            "SELECT FROM",
            capture_ident(&SELECT_TABLE_REGEX, &top_level(sql)),
        ),
        SqlOperation::Insert => ("INSERT INTO", capture_ident(&INSERT_TABLE_REGEX, sql)),
        SqlOperation::Replace => ("REPLACE INTO", capture_ident(&INSERT_TABLE_REGEX, sql)),
        SqlOperation::Update => ("UPDATE", capture_ident(&UPDATE_TABLE_REGEX, sql)),
        SqlOperation::Delete => ("DELETE FROM", capture_ident(&DELETE_TABLE_REGEX, sql)),
        SqlOperation::Call => ("CALL", capture_ident(&CALL_REGEX, sql)),
        SqlOperation::Other => {
            return LEADING_KEYWORD_REGEX
                .find(sql)
                .map(|m| m.as_str().to_uppercase())
                .unwrap_or_default();
        }
    };

    match table {
        Some(table) => format!("{} {}", prefix, table),
        None => operation.as_str().to_string(),
    }
}
