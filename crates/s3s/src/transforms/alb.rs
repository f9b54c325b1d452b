//! 🌐 Application load balancer access log fields.
//!
//! One line per request, space separated, quoted where a field can contain spaces.
//! The server splits on the space delimiter and hands back `_1` through `_29`.

use super::RecordTransform;

/// 🏷️ ALB access log fields, in the order the load balancer writes them.
pub const ALB_FIELDS: &[&str] = &[
    "type",
    "time",
    "elb",
    "client:port",
    "target:port",
    "request_processing_time",
    "target_processing_time",
    "response_processing_time",
    "elb_status_code",
    "target_status_code",
    "received_bytes",
    "sent_bytes",
    "request",
    "user_agent",
    "ssl_cipher",
    "ssl_protocol",
    "target_group_arn",
    "trace_id",
    "domain_name",
    "chosen_cert_arn",
    "matched_rule_priority",
    "request_creation_time",
    "actions_executed",
    "redirect_url",
    "error_reason",
    "target:port_list",
    "target_status_code_list",
    "classification",
    "classification_reason",
];

/// 🌐 Marker for ALB records.
pub struct AlbLogs;

impl RecordTransform for AlbLogs {
    const SCHEMA: &'static [&'static str] = ALB_FIELDS;
}
