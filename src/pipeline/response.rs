use super::types::GenerationResponse;
use crate::errors::ParseError;

/// Bodies longer than this are truncated before being kept for diagnostics.
pub const MAX_DIAGNOSTIC_BODY: usize = 4096;

const OUTPUT_FIELD: &str = "output";

/// Extract the generated source text from a service response.
///
/// The service answers `{"output": "<text>"}` with HTTP 200. Any other
/// status is a service failure; a missing or non-string `output` is a
/// malformed response.
pub fn parse_response(response: &GenerationResponse) -> Result<String, ParseError> {
    if response.status != 200 {
        return Err(ParseError::ServiceStatus {
            status: response.status,
            body: truncate_body(&response.body),
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(&response.body).map_err(|source| ParseError::InvalidJson {
            body: truncate_body(&response.body),
            source,
        })?;

    match value.get(OUTPUT_FIELD) {
        None | Some(serde_json::Value::Null) => Err(ParseError::MissingOutput {
            body: truncate_body(&response.body),
        }),
        Some(serde_json::Value::String(output)) => Ok(output.clone()),
        Some(_) => Err(ParseError::OutputNotText {
            body: truncate_body(&response.body),
        }),
    }
}

/// Keep at most `MAX_DIAGNOSTIC_BODY` bytes, cut on a char boundary.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_DIAGNOSTIC_BODY {
        return body.to_string();
    }
    let mut end = MAX_DIAGNOSTIC_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated {} bytes]", &body[..end], body.len() - end)
}
