//! 🔎 Remote query adapter: one object in, a stream of result chunks out.
//!
//! 🧠 Knowledge graph:
//! - [`Querying`] is the tagged union that knows how to phrase a request for each input
//!   dialect. JSON objects are read as JSON lines. CSV, ALB and CF objects are read as
//!   delimited text. Log objects have no header row, plain CSV skips its first line.
//! - [`ChunkDecoder`] turns raw payloads into [`ResultChunk`]s:
//!   - count-mode: every payload carries a row count, parsed and forwarded.
//!   - log formats: payload boundaries do not respect record boundaries, so records are
//!     reassembled on `\n` and remapped to named fields one line at a time.
//!   - everything else: bytes go straight through.
//! - The stream ends early when the run is cancelled. 🦆

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::backends::{ObjectStore, PayloadStream};
use crate::common::{ObjectDescriptor, ResultChunk};
use crate::error::S3sError;
use crate::query::{FormatType, OutputFormat, QuerySpec};
use crate::transforms::transform_record;

/// 📬 What [`query_object`] hands back.
pub type ResultStream = BoxStream<'static, Result<ResultChunk>>;

/// 🗜️ How the object bytes are compressed at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Gzip,
    Bzip2,
}

/// 🗜️ Guesses compression from the key suffix. Case-sensitive, like the keys themselves.
pub fn suggest_compression_type(key: &str) -> CompressionType {
    if key.ends_with(".gz") {
        CompressionType::Gzip
    } else if key.ends_with(".bz2") {
        CompressionType::Bzip2
    } else {
        CompressionType::None
    }
}

/// 📑 Whether the first line of a CSV object is a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvHeader {
    /// Every line is data. ALB and CF logs have no header line.
    Absent,
    /// The first line is a header and gets skipped.
    Skip,
}

impl CsvHeader {
    pub fn for_format(format_type: FormatType) -> Self {
        match format_type {
            FormatType::Csv => CsvHeader::Skip,
            FormatType::Json | FormatType::AlbLogs | FormatType::CfLogs => CsvHeader::Absent,
        }
    }
}

/// 📥 How the server should read the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSerialization {
    JsonLines,
    Csv {
        field_delimiter: String,
        record_delimiter: String,
        header: CsvHeader,
        /// Lines starting with this are skipped.
        comments: Option<String>,
    },
}

/// 🧾 A provider-neutral remote query against one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    pub bucket: String,
    pub key: String,
    pub expression: String,
    pub compression: CompressionType,
    pub input: InputSerialization,
    pub output: OutputFormat,
}

impl SelectRequest {
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRequest {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRequest {
    pub expression: String,
    pub field_delimiter: String,
    pub record_delimiter: String,
    pub header: CsvHeader,
    pub comments: Option<String>,
    pub output: OutputFormat,
}

/// 🎭 The request dialects. Delimiters are data, not types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Querying {
    Json(JsonRequest),
    Csv(CsvRequest),
}

impl Querying {
    pub fn from_spec(spec: &QuerySpec) -> Self {
        match spec.format_type {
            FormatType::Json => Querying::Json(JsonRequest {
                expression: spec.expression.clone(),
            }),
            FormatType::Csv | FormatType::AlbLogs | FormatType::CfLogs => {
                Querying::Csv(CsvRequest {
                    expression: spec.expression.clone(),
                    field_delimiter: spec.field_delimiter.clone(),
                    record_delimiter: spec.record_delimiter.clone(),
                    header: CsvHeader::for_format(spec.format_type),
                    // CF files open with `#Version` and `#Fields` lines
                    comments: (spec.format_type == FormatType::CfLogs).then(|| "#".to_string()),
                    output: spec.output_format,
                })
            }
        }
    }

    /// 🔨 The request for one object.
    pub fn build_request(&self, descriptor: &ObjectDescriptor) -> SelectRequest {
        let compression = suggest_compression_type(&descriptor.key);
        match self {
            Querying::Json(json) => SelectRequest {
                bucket: descriptor.bucket.clone(),
                key: descriptor.key.clone(),
                expression: json.expression.clone(),
                compression,
                input: InputSerialization::JsonLines,
                output: OutputFormat::Json,
            },
            Querying::Csv(csv) => SelectRequest {
                bucket: descriptor.bucket.clone(),
                key: descriptor.key.clone(),
                expression: csv.expression.clone(),
                compression,
                input: InputSerialization::Csv {
                    field_delimiter: csv.field_delimiter.clone(),
                    record_delimiter: csv.record_delimiter.clone(),
                    header: csv.header,
                    comments: csv.comments.clone(),
                },
                output: csv.output,
            },
        }
    }
}

#[derive(Deserialize)]
struct CountRecord {
    #[serde(rename = "_1")]
    count: u64,
}

/// 🧩 Payload-to-chunk decoding, one instance per object stream.
#[derive(Debug)]
pub(crate) enum ChunkDecoder {
    Passthrough,
    Count(OutputFormat),
    Records {
        format_type: FormatType,
        pending: Vec<u8>,
    },
}

impl ChunkDecoder {
    pub(crate) fn for_spec(spec: &QuerySpec) -> Self {
        if spec.count_mode {
            ChunkDecoder::Count(spec.output_format)
        } else if spec.format_type.is_log_format() {
            ChunkDecoder::Records {
                format_type: spec.format_type,
                pending: Vec::new(),
            }
        } else {
            ChunkDecoder::Passthrough
        }
    }

    /// 📦 Decodes one payload. `Ok(None)` means "nothing complete yet".
    pub(crate) fn decode(&mut self, payload: Vec<u8>) -> Result<Option<ResultChunk>> {
        match self {
            ChunkDecoder::Passthrough => {
                Ok((!payload.is_empty()).then_some(ResultChunk::Raw(payload)))
            }
            ChunkDecoder::Count(output) => parse_count(*output, &payload),
            ChunkDecoder::Records {
                format_type,
                pending,
            } => {
                pending.extend_from_slice(&payload);
                let Some(last_newline) = memchr::memrchr(b'\n', pending) else {
                    return Ok(None);
                };
                let complete: Vec<u8> = pending.drain(..=last_newline).collect();
                remap_lines(*format_type, &complete)
            }
        }
    }

    /// 🏁 Flushes a trailing record that never got its newline.
    pub(crate) fn finish(&mut self) -> Result<Option<ResultChunk>> {
        match self {
            ChunkDecoder::Records {
                format_type,
                pending,
            } => {
                let rest = std::mem::take(pending);
                remap_lines(*format_type, &rest)
            }
            ChunkDecoder::Passthrough | ChunkDecoder::Count(_) => Ok(None),
        }
    }
}

fn parse_count(output: OutputFormat, payload: &[u8]) -> Result<Option<ResultChunk>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let total = match output {
        OutputFormat::Csv => {
            let text = std::str::from_utf8(payload).context("count payload is not UTF-8")?;
            text.trim_end_matches(['\n', '\r'])
                .lines()
                .map(|line| {
                    line.trim()
                        .parse::<u64>()
                        .with_context(|| format!("'{line}' is not a row count"))
                })
                .sum::<Result<u64>>()?
        }
        // a count record is a few bytes and arrives in one event, so no reassembly here
        OutputFormat::Json => serde_json::Deserializer::from_slice(payload)
            .into_iter::<CountRecord>()
            .map(|record| {
                record
                    .map(|r| r.count)
                    .context("count record is not {\"_1\": n}")
            })
            .sum::<Result<u64>>()?,
    };
    Ok(Some(ResultChunk::Count(total)))
}

fn remap_lines(format_type: FormatType, block: &[u8]) -> Result<Option<ResultChunk>> {
    let mut out = Vec::with_capacity(block.len() * 2);
    let mut start = 0;
    let ends = memchr::memchr_iter(b'\n', block).chain(std::iter::once(block.len()));
    for end in ends {
        if start > block.len() {
            break;
        }
        let line = block[start..end].trim_ascii();
        start = end + 1;
        if line.is_empty() {
            continue;
        }
        out.extend_from_slice(transform_record(format_type, line)?.as_bytes());
        out.push(b'\n');
    }
    Ok((!out.is_empty()).then_some(ResultChunk::Raw(out)))
}

struct DecodeState {
    payloads: PayloadStream,
    decoder: ChunkDecoder,
    descriptor: ObjectDescriptor,
    finished: bool,
}

impl DecodeState {
    fn parse_error(&self, err: anyhow::Error) -> anyhow::Error {
        S3sError::PayloadParse {
            bucket: self.descriptor.bucket.clone(),
            key: self.descriptor.key.clone(),
            reason: format!("{err:#}"),
        }
        .into()
    }
}

/// 🚀 Submits the query for one object and returns its decoded result stream.
///
/// Submission failures come back as `Err` right away. Failures mid-stream arrive as the
/// last item of the stream. Once `cancel` fires the stream ends without further items.
pub async fn query_object<S: ObjectStore + ?Sized>(
    store: &S,
    descriptor: &ObjectDescriptor,
    spec: &QuerySpec,
    cancel: CancellationToken,
) -> Result<ResultStream> {
    let request = Querying::from_spec(spec).build_request(descriptor);
    trace!("🔎 submitting query against {}", request.uri());
    let payloads = store
        .select(request)
        .await
        .with_context(|| format!("💀 could not start the query against {}", descriptor.uri()))?;

    let state = DecodeState {
        payloads,
        decoder: ChunkDecoder::for_spec(spec),
        descriptor: descriptor.clone(),
        finished: false,
    };

    let chunks = stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            match state.payloads.next().await {
                Some(Ok(payload)) => match state.decoder.decode(payload) {
                    Ok(Some(chunk)) => return Some((Ok(chunk), state)),
                    Ok(None) => continue,
                    Err(err) => {
                        state.finished = true;
                        let err = state.parse_error(err);
                        return Some((Err(err), state));
                    }
                },
                Some(Err(err)) => {
                    state.finished = true;
                    let err = err.context(format!(
                        "💀 query stream from {} broke mid-flight",
                        state.descriptor.uri()
                    ));
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    return match state.decoder.finish() {
                        Ok(Some(chunk)) => Some((Ok(chunk), state)),
                        Ok(None) => None,
                        Err(err) => {
                            let err = state.parse_error(err);
                            Some((Err(err), state))
                        }
                    };
                }
            }
        }
    });

    Ok(chunks.take_until(cancel.cancelled_owned()).boxed())
}
