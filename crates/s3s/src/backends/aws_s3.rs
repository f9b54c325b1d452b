//! ☁️ AWS S3: the real thing.
//!
//! 🧠 Knowledge graph:
//! - Listing is `ListObjectsV2`, one call per page, token threaded by the caller.
//! - Queries are `SelectObjectContent`. The response is an event stream: `Records`
//!   events carry payload bytes, `Stats`/`Progress`/`Cont` are noise, `End` is the end.
//! - Retries are configured once on the client (`max_retries`) and apply per call.
//! - Every SDK failure is flattened with `DisplayErrorContext` into
//!   `S3sError::RemoteQuery`, so the whole cause chain survives the trip. 🦆

use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{
    CompressionType as S3CompressionType, CsvInput, CsvOutput, ExpressionType, FileHeaderInfo,
    InputSerialization as S3InputSerialization, JsonInput, JsonOutput, JsonType,
    OutputSerialization, SelectObjectContentEventStream,
};
use futures::StreamExt;
use futures::stream;
use tracing::{debug, trace};

use crate::app_config::AwsConfig;
use crate::backends::{ListPage, ListRequest, ListedObject, ObjectStore, PayloadStream};
use crate::error::S3sError;
use crate::query::OutputFormat;
use crate::select::{CompressionType, CsvHeader, InputSerialization, SelectRequest};

/// ☁️ An S3 client, cheap to share, expensive to build.
#[derive(Debug, Clone)]
pub struct AwsStore {
    client: Client,
}

impl AwsStore {
    /// 🚀 Builds a client from the ambient AWS environment plus our overrides.
    pub async fn new(config: &AwsConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_retries.max(1)));
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.force_path_style);
        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        debug!(
            "☁️ S3 client ready (region: {:?}, max attempts: {})",
            sdk_config.region(),
            config.max_retries
        );
        Ok(Self::from_client(Client::from_conf(builder.build())))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_s3_compression(compression: CompressionType) -> S3CompressionType {
    match compression {
        CompressionType::None => S3CompressionType::None,
        CompressionType::Gzip => S3CompressionType::Gzip,
        CompressionType::Bzip2 => S3CompressionType::Bzip2,
    }
}

fn to_s3_header(header: CsvHeader) -> FileHeaderInfo {
    match header {
        CsvHeader::Absent => FileHeaderInfo::None,
        CsvHeader::Skip => FileHeaderInfo::Ignore,
    }
}

fn to_s3_input(request: &SelectRequest) -> S3InputSerialization {
    let builder = S3InputSerialization::builder().compression_type(to_s3_compression(request.compression));
    match &request.input {
        InputSerialization::JsonLines => builder
            .json(JsonInput::builder().r#type(JsonType::Lines).build())
            .build(),
        InputSerialization::Csv {
            field_delimiter,
            record_delimiter,
            header,
            comments,
        } => builder
            .csv(
                CsvInput::builder()
                    .field_delimiter(field_delimiter)
                    .record_delimiter(record_delimiter)
                    .file_header_info(to_s3_header(*header))
                    .set_comments(comments.clone())
                    .build(),
            )
            .build(),
    }
}

fn to_s3_output(output: OutputFormat) -> OutputSerialization {
    match output {
        OutputFormat::Json => OutputSerialization::builder()
            .json(JsonOutput::builder().build())
            .build(),
        OutputFormat::Csv => OutputSerialization::builder()
            .csv(CsvOutput::builder().build())
            .build(),
    }
}

#[async_trait]
impl ObjectStore for AwsStore {
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        trace!(
            "📄 ListObjectsV2 s3://{}/{} (token: {:?})",
            request.bucket, request.prefix, request.continuation_token
        );
        let response = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| {
                S3sError::remote(
                    format!("s3://{}/{}", request.bucket, request.prefix),
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ListedObject {
                    key: key.to_string(),
                    size: u64::try_from(object.size().unwrap_or_default()).unwrap_or_default(),
                })
            })
            .collect();
        let common_prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|common| common.prefix().map(str::to_string))
            .collect();
        let next_continuation_token = if response.is_truncated() == Some(true) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| S3sError::remote("s3://", DisplayErrorContext(&e).to_string()))?;
        Ok(response
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    async fn select(&self, request: SelectRequest) -> Result<PayloadStream> {
        let target = request.uri();
        let output = self
            .client
            .select_object_content()
            .bucket(&request.bucket)
            .key(&request.key)
            .expression(&request.expression)
            .expression_type(ExpressionType::Sql)
            .input_serialization(to_s3_input(&request))
            .output_serialization(to_s3_output(request.output))
            .send()
            .await
            .map_err(|e| S3sError::remote(target.clone(), DisplayErrorContext(&e).to_string()))?;

        let payloads = stream::unfold(Some(output.payload), move |receiver| {
            let target = target.clone();
            async move {
                let mut receiver = receiver?;
                loop {
                    match receiver.recv().await {
                        Ok(Some(SelectObjectContentEventStream::Records(records))) => {
                            if let Some(blob) = records.payload {
                                return Some((Ok(blob.into_inner()), Some(receiver)));
                            }
                        }
                        Ok(Some(SelectObjectContentEventStream::End(_))) | Ok(None) => {
                            return None;
                        }
                        Ok(Some(_)) => continue,
                        Err(e) => {
                            let err = S3sError::remote(target, DisplayErrorContext(&e).to_string());
                            return Some((Err(anyhow::Error::from(err)), None));
                        }
                    }
                }
            }
        });
        Ok(payloads.boxed())
    }
}
