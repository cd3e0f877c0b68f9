//! JSON bodies for the outcome of a request
//!
//! Callers that answer over HTTP use [`HttpResponse::status`]; the CLI
//! prints [`HttpResponse::body`] and exits with
//! [`HttpResponse::exit_code`].

use serde::{Deserialize, Serialize};

use crate::error::{CrosspostError, Result};
use crate::types::{AggregateResponse, TargetResult};

pub const STATUS_CREATED: u16 = 201;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Created {
        message: String,
        responses: Vec<TargetResult>,
        #[serde(rename = "imageCount")]
        image_count: usize,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Vec<TargetResult>>,
    },
}

impl ResponseBody {
    fn error(message: impl Into<String>) -> Self {
        ResponseBody::Error {
            error: message.into(),
            errors: None,
            details: None,
        }
    }

    /// Per-target results, when the body carries any
    pub fn results(&self) -> &[TargetResult] {
        match self {
            ResponseBody::Created { responses, .. } => responses,
            ResponseBody::Error {
                details: Some(details),
                ..
            } => details,
            ResponseBody::Error { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: ResponseBody,
    pub exit_code: i32,
}

impl HttpResponse {
    pub fn created(response: AggregateResponse) -> Self {
        Self {
            status: STATUS_CREATED,
            body: ResponseBody::Created {
                message: AggregateResponse::MESSAGE.to_string(),
                responses: response.results,
                image_count: response.image_count,
            },
            exit_code: 0,
        }
    }

    pub fn from_error(error: CrosspostError) -> Self {
        let status = error.http_status();
        let exit_code = error.exit_code();

        let body = match error {
            CrosspostError::Validation(message) => ResponseBody::error(message),
            CrosspostError::TargetConfig { errors } => ResponseBody::Error {
                error: "Target configuration error".to_string(),
                errors: Some(errors),
                details: None,
            },
            CrosspostError::Authentication { errors } => ResponseBody::Error {
                error: "Authentication failed".to_string(),
                errors: Some(errors),
                details: None,
            },
            CrosspostError::Transcode(e) => ResponseBody::Error {
                error: "Failed to process images".to_string(),
                errors: Some(vec![e.to_string()]),
                details: None,
            },
            CrosspostError::AllTargetsFailed { results } => ResponseBody::Error {
                error: "All posts failed".to_string(),
                errors: None,
                details: Some(results),
            },
            other => ResponseBody::error(other.to_string()),
        };

        Self {
            status,
            body,
            exit_code,
        }
    }

    pub fn from_result(result: Result<AggregateResponse>) -> Self {
        match result {
            Ok(response) => Self::created(response),
            Err(error) => Self::from_error(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_CREATED
    }
}
