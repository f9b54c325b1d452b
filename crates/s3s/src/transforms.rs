//! 🔄 Transforms: giving positional log columns their names back.
//!
//! The server reads ALB and CF logs as delimited text, so every row it returns looks
//! like `{"_1":"h2","_2":"2022-09-27T12:34:56.789Z",...}`. Useful to a machine, rude to
//! a human. A [`RecordTransform`] maps each `_N` onto the N-th name of its schema and
//! re-serializes the row as one JSON line.
//!
//! ## Knowledge Graph 🧠
//! - Schemas: [`alb::ALB_FIELDS`] (29 fields), [`cf::CF_FIELDS`] (33 fields).
//! - Used by: `select` (record reassembly) and `query` (where clause rewrite).
//! - Every transform is a zero-sized marker type with a schema constant. Static dispatch,
//!   same as everywhere else we convert formats.
//! - Output lists every schema field in schema order. Missing fields are `null`,
//!   positions beyond the schema are dropped. 🦆

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::query::FormatType;

pub(crate) mod alb;
pub(crate) mod cf;

pub use alb::{ALB_FIELDS, AlbLogs};
pub use cf::{CF_FIELDS, CfLogs};

/// 🏷️ Remaps one server-side JSON record onto a named schema.
///
/// # Contract 📜
/// - Input: one complete record, without its trailing newline.
/// - Output: one JSON object, without a trailing newline.
/// - A record that is not a JSON object is an error.
pub trait RecordTransform {
    /// Field names in positional order: `SCHEMA[0]` is `_1`.
    const SCHEMA: &'static [&'static str];

    fn transform_record(raw: &[u8]) -> Result<String> {
        remap_positional(raw, Self::SCHEMA)
    }
}

/// 🎯 Picks the transform for a log format. JSON and CSV pass through untouched.
pub fn transform_record(format_type: FormatType, raw: &[u8]) -> Result<String> {
    match format_type {
        FormatType::AlbLogs => AlbLogs::transform_record(raw),
        FormatType::CfLogs => CfLogs::transform_record(raw),
        FormatType::Json | FormatType::Csv => String::from_utf8(raw.to_vec())
            .context("💀 record is not valid UTF-8"),
    }
}

fn remap_positional(raw: &[u8], schema: &[&str]) -> Result<String> {
    let mut positional: Map<String, Value> = serde_json::from_slice(raw).with_context(|| {
        format!(
            "💀 expected a JSON object with positional fields, got: {}",
            String::from_utf8_lossy(raw)
        )
    })?;

    let named: Map<String, Value> = schema
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let value = positional
                .remove(&format!("_{}", idx + 1))
                .unwrap_or(Value::Null);
            ((*name).to_string(), value)
        })
        .collect();

    serde_json::to_string(&named).context("💀 failed to serialize remapped record")
}
