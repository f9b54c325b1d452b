//! 🧾 Query: what we ask the storage provider to run, and in which dialect.
//!
//! 🧠 Knowledge graph:
//! - [`QuerySpec`] is built once per invocation and shared behind an `Arc` by every
//!   query worker. Nobody mutates it after that.
//! - [`build_query`] turns `--where` / `--limit` / `--count` into an expression.
//! - ALB and CF rows come back from the server with positional names (`_1`, `_2`, ...),
//!   so a where clause written against the friendly names gets its field references
//!   rewritten to `s._N` before it leaves the building. String literals are not touched.
//! - We never evaluate SQL locally. The rewrite is lexical and that is all it is. 🦆

use crate::error::S3sError;
use crate::transforms::{ALB_FIELDS, CF_FIELDS};

/// 📜 What runs when the user asks for nothing in particular.
pub const DEFAULT_QUERY: &str = "SELECT * FROM S3Object s";

/// 🗂️ The shape of the objects being queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatType {
    /// JSON lines.
    Json,
    Csv,
    /// Application load balancer access logs (space separated).
    AlbLogs,
    /// CloudFront access logs (tab separated).
    CfLogs,
}

impl FormatType {
    /// 📏 `(field, record)` delimiters the server should split on.
    pub fn default_delimiters(self) -> (&'static str, &'static str) {
        match self {
            FormatType::Json | FormatType::Csv => (",", "\n"),
            FormatType::AlbLogs => (" ", "\n"),
            FormatType::CfLogs => ("\t", "\n"),
        }
    }

    /// 🏷️ Named fields for the log formats, in positional order.
    pub fn schema(self) -> Option<&'static [&'static str]> {
        match self {
            FormatType::AlbLogs => Some(ALB_FIELDS),
            FormatType::CfLogs => Some(CF_FIELDS),
            FormatType::Json | FormatType::Csv => None,
        }
    }

    /// 🪵 ALB or CF. These are read as CSV on the wire and remapped on the way back.
    pub fn is_log_format(self) -> bool {
        matches!(self, FormatType::AlbLogs | FormatType::CfLogs)
    }
}

/// 📤 How the server serializes result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

/// 📦 Everything a query worker needs to know to build one remote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub format_type: FormatType,
    pub expression: String,
    pub field_delimiter: String,
    pub record_delimiter: String,
    pub count_mode: bool,
    pub output_format: OutputFormat,
}

impl QuerySpec {
    /// 🏗️ A spec with the format's default delimiters and JSON output.
    pub fn new(format_type: FormatType, expression: impl Into<String>) -> Self {
        let (field_delimiter, record_delimiter) = format_type.default_delimiters();
        Self {
            format_type,
            expression: expression.into(),
            field_delimiter: field_delimiter.to_string(),
            record_delimiter: record_delimiter.to_string(),
            count_mode: false,
            output_format: OutputFormat::Json,
        }
    }

    pub fn with_delimiters(
        mut self,
        field_delimiter: impl Into<String>,
        record_delimiter: impl Into<String>,
    ) -> Self {
        self.field_delimiter = field_delimiter.into();
        self.record_delimiter = record_delimiter.into();
        self
    }

    pub fn with_count_mode(mut self, count_mode: bool) -> Self {
        self.count_mode = count_mode;
        self
    }

    /// 📤 Only honored for CSV input. Log formats are remapped from JSON, and JSON stays JSON.
    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = match self.format_type {
            FormatType::Csv => output_format,
            FormatType::Json | FormatType::AlbLogs | FormatType::CfLogs => OutputFormat::Json,
        };
        self
    }
}

/// 🎛️ The user-facing knobs that end up as an expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// A full expression, used as-is.
    pub query: Option<String>,
    pub where_clause: Option<String>,
    pub limit: Option<u64>,
    pub count: bool,
}

impl QueryOptions {
    /// 🧾 Picks the explicit expression or builds one.
    ///
    /// An explicit expression cannot be combined with `where` or `limit`.
    pub fn resolve_expression(&self, format_type: FormatType) -> Result<String, S3sError> {
        match &self.query {
            Some(query) => {
                if self.where_clause.is_some() || self.limit.is_some() {
                    return Err(S3sError::validation(
                        "an explicit query cannot be combined with a where clause or a limit",
                    ));
                }
                if query.trim().is_empty() {
                    return Err(S3sError::validation("the query is empty"));
                }
                Ok(query.clone())
            }
            None => Ok(build_query(
                self.where_clause.as_deref(),
                self.limit,
                self.count,
                format_type,
            )),
        }
    }
}

/// 🔨 `SELECT <* | COUNT(*)> FROM S3Object s [WHERE ...] [LIMIT n]`.
///
/// Returns [`DEFAULT_QUERY`] when nothing is set. A zero limit counts as unset.
pub fn build_query(
    where_clause: Option<&str>,
    limit: Option<u64>,
    count: bool,
    format_type: FormatType,
) -> String {
    let where_clause = where_clause.map(str::trim).filter(|w| !w.is_empty());
    let limit = limit.filter(|&l| l > 0);
    if where_clause.is_none() && limit.is_none() && !count {
        return DEFAULT_QUERY.to_string();
    }

    let mut query = String::from("SELECT");
    query.push_str(if count { " COUNT(*)" } else { " *" });
    query.push_str(" FROM S3Object s");
    if let Some(where_clause) = where_clause {
        query.push_str(" WHERE ");
        match format_type.schema() {
            Some(schema) => query.push_str(&rewrite_fields(where_clause, schema)),
            None => query.push_str(where_clause),
        }
    }
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }
    query
}

/// 🔁 Rewrites named field references to `s._N` using `schema` (1-based positions).
///
/// Recognized forms: `name`, `s.name`, `` `name` ``, `` s.`name` ``. Quoted strings,
/// numbers, and identifiers that are not in the schema pass through unchanged.
pub fn rewrite_fields(clause: &str, schema: &[&str]) -> String {
    let position = |name: &str| schema.iter().position(|field| *field == name);
    let chars: Vec<char> = clause.chars().collect();
    let mut out = String::with_capacity(clause.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = closing(&chars, i + 1, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '`' => {
                let (name, end) = backquoted(&chars, i);
                match position(&name).filter(|_| !follows_dot(&out)) {
                    Some(idx) => out.push_str(&format!("s._{}", idx + 1)),
                    None => out.extend(&chars[i..end]),
                }
                i = end;
            }
            c if c.is_ascii_digit() => {
                let end = scan(&chars, i, |c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
                out.extend(&chars[i..end]);
                i = end;
            }
            c if is_ident_start(c) => {
                let end = scan(&chars, i, is_ident_char);
                let word: String = chars[i..end].iter().collect();

                // `s.` qualifier: look at what it qualifies
                if word == "s" && chars.get(end) == Some(&'.') && !follows_dot(&out) {
                    let target_start = end + 1;
                    let (target_end, name) = match chars.get(target_start) {
                        Some('`') => {
                            let (name, close) = backquoted(&chars, target_start);
                            (close, Some(name))
                        }
                        Some(&next) if is_ident_start(next) => {
                            let close = scan(&chars, target_start, is_ident_char);
                            (close, Some(chars[target_start..close].iter().collect()))
                        }
                        _ => (end, None),
                    };
                    if let Some(idx) = name.as_deref().and_then(position) {
                        out.push_str(&format!("s._{}", idx + 1));
                        i = target_end;
                        continue;
                    }
                    out.push_str(&word);
                    i = end;
                    continue;
                }

                match position(&word).filter(|_| !follows_dot(&out)) {
                    Some(idx) => out.push_str(&format!("s._{}", idx + 1)),
                    None => out.push_str(&word),
                }
                i = end;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn follows_dot(out: &str) -> bool {
    out.ends_with('.')
}

/// Index just past `from..` while `pred` holds.
fn scan(chars: &[char], from: usize, pred: impl Fn(char) -> bool) -> usize {
    chars[from..]
        .iter()
        .position(|&c| !pred(c))
        .map_or(chars.len(), |offset| from + offset)
}

/// Index just past the closing `quote`, or the end of input when unterminated.
fn closing(chars: &[char], from: usize, quote: char) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .position(|&c| c == quote)
        .map_or(chars.len(), |offset| from + offset + 1)
}

/// The name inside a backquote opened at `open`, and the index just past it.
fn backquoted(chars: &[char], open: usize) -> (String, usize) {
    let end = closing(chars, open + 1, '`');
    let inner_end = if end > open + 1 && chars.get(end - 1) == Some(&'`') {
        end - 1
    } else {
        end
    };
    (chars[open + 1..inner_end].iter().collect(), end)
}
