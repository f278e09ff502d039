//! Response assembly: merge shield metadata into the outbound payload.

use crate::shield::pipeline::ShieldMetadata;
use serde_json::Value;

/// Reserved key for shield metadata in responses.
pub const METADATA_KEY: &str = "llm_shield";

/// Attach shield metadata to the upstream payload. The payload shape is
/// otherwise untouched; only the reserved key is added.
pub fn assemble(mut upstream: Value, metadata: &ShieldMetadata) -> Value {
    if let Some(object) = upstream.as_object_mut() {
        object.insert(
            METADATA_KEY.to_string(),
            serde_json::to_value(metadata).unwrap_or(Value::Null),
        );
    }
    upstream
}
