//! Response size limits.
//!
//! # Responsibilities
//! - Reject responses whose declared `Content-Length` exceeds the limit
//! - Stop reading bodies once they grow past the limit
//! - Tell malformed bodies apart from broken connections
//!
//! # Design Decisions
//! - Declared length checked before reading (early rejection)
//! - Bodies are read through `http_body_util::Limited`, never unbounded

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderMap, CONTENT_LENGTH};

use crate::http::error::{is_malformed_message, ClientError};

/// Fail early if the declared body length exceeds `limit`.
pub fn check_content_length(headers: &HeaderMap, limit: usize, url: &str) -> Result<(), ClientError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    match declared {
        Some(len) if len > limit as u64 => Err(ClientError::ResponseTooLarge {
            url: url.to_string(),
            limit,
        }),
        _ => Ok(()),
    }
}

/// Buffer `body`, failing with [`ClientError::ResponseTooLarge`] past `limit` bytes.
pub async fn collect_limited<B>(body: B, limit: usize, url: &str) -> Result<Bytes, ClientError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ClientError::ResponseTooLarge {
                url: url.to_string(),
                limit,
            })
        }
        Err(e) if is_malformed_message(&*e) => Err(ClientError::InvalidResponse {
            url: url.to_string(),
            message: format!("malformed response body: {e}"),
        }),
        Err(e) => Err(ClientError::Connect {
            url: url.to_string(),
            message: format!("failed to read response body: {e}"),
        }),
    }
}
