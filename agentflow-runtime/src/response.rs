use agentflow_core::{FlowError, TraceChunk};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug)]
pub enum ResponseBody {
    Json(Value),
    /// Newline-delimited JSON trace chunks.
    Stream(ReceiverStream<Vec<u8>>),
}

/// Transport-neutral response of one execution.
#[derive(Debug)]
pub struct ExecResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ExecResponse {
    pub fn stream(body: ReceiverStream<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: vec![
                header("Content-Type", "application/json"),
                header("Cache-Control", "no-cache"),
                header("Connection", "keep-alive"),
                header("Transfer-Encoding", "chunked"),
            ],
            body: ResponseBody::Stream(body),
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![header("Content-Type", "application/json")],
            body: ResponseBody::Json(body),
        }
    }

    /// Buffered success: the body is the `finalResponse` chunk.
    pub fn final_response(chunk: &TraceChunk) -> Self {
        Self::json(200, serde_json::to_value(chunk).unwrap_or_default())
    }

    pub fn error(err: &FlowError) -> Self {
        Self::json(
            err.status_code(),
            serde_json::to_value(err.to_chunk()).unwrap_or_default(),
        )
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ReceiverStream<Vec<u8>>> {
        match self.body {
            ResponseBody::Stream(stream) => Some(stream),
            ResponseBody::Json(_) => None,
        }
    }
}

fn header(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{QuotaExceededError, ValidationError};
    use serde_json::json;

    #[test]
    fn test_error_response_shape() {
        let err = FlowError::from(ValidationError::FlowNotFound("missing".into()));
        let response = ExecResponse::error(&err);
        assert_eq!(response.status, 400);
        let body = response.json_body().unwrap();
        assert_eq!(body["type"], json!("error"));
        assert_eq!(body["message"], json!("flow `missing` not found"));

        let quota = FlowError::QuotaExceeded(QuotaExceededError {
            reason: "budget".into(),
            used: 10,
            allowed: 10,
        });
        assert_eq!(ExecResponse::error(&quota).status, 403);
    }

    #[test]
    fn test_stream_headers() {
        let (_tx, rx) = tokio::sync::mpsc::channel::<Vec<u8>>(1);
        let response = ExecResponse::stream(ReceiverStream::new(rx));
        assert_eq!(response.status, 200);
        assert!(response.is_stream());
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("Cache-Control"), Some("no-cache"));
        assert_eq!(response.header("Connection"), Some("keep-alive"));
        assert_eq!(response.header("Transfer-Encoding"), Some("chunked"));
    }
}
