use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Deserialize;

use super::types::{AnalysisRequest, ServiceResponse, ToolCall, Usage};
use super::AgentError;
use crate::pipeline_config::AgentTuning;

const API_VERSION: &str = "2023-06-01";

/// External document-analysis service (allows mocking).
pub trait AnalysisService {
    fn respond(&self, request: &AnalysisRequest) -> Result<ServiceResponse, AgentError>;
}

/// Messages-style HTTP client with tool use.
pub struct HttpAnalysisClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, AgentError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AgentError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        })
    }

    /// Build from agent tuning; fails without an API key.
    pub fn from_tuning(tuning: &AgentTuning) -> Result<Self, AgentError> {
        let api_key = tuning.api_key.as_deref().ok_or(AgentError::MissingApiKey)?;
        Self::new(&tuning.api_base, api_key, tuning.timeout_secs)
    }
}

/// Response body from /v1/messages
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    fn into_service_response(self) -> ServiceResponse {
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                ResponseBlock::Text { text: t } => text.push(t),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall { id, name, input }),
                ResponseBlock::Other => {}
            }
        }
        ServiceResponse {
            usage: self.usage,
            tool_calls,
            text: (!text.is_empty()).then(|| text.join("\n")),
        }
    }
}

impl AnalysisService for HttpAnalysisClient {
    fn respond(&self, request: &AnalysisRequest) -> Result<ServiceResponse, AgentError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    AgentError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    AgentError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
                } else {
                    AgentError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AgentError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| AgentError::ResponseParsing(e.to_string()))?;

        Ok(parsed.into_service_response())
    }
}

/// Scripted service for tests: replays queued responses in order, then
/// repeats the fallback response (or fails) once the queue is empty.
/// Every request is recorded.
#[derive(Default)]
pub struct ScriptedService {
    queue: Mutex<VecDeque<Result<ServiceResponse, String>>>,
    repeat: Option<ServiceResponse>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedService {
    pub fn new(responses: Vec<ServiceResponse>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// Answers every request with the same response.
    pub fn repeating(response: ServiceResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    /// Queue a transport failure at the current position.
    pub fn then_fail(self, message: &str) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Err(message.to_string()));
        }
        self
    }

    pub fn then(self, response: ServiceResponse) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Ok(response));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AnalysisService for ScriptedService {
    fn respond(&self, request: &AnalysisRequest) -> Result<ServiceResponse, AgentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(AgentError::HttpClient(message)),
            None => self.repeat.clone().ok_or(AgentError::ScriptExhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_request() -> AnalysisRequest {
        AnalysisRequest {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 1024,
            system: "sys".into(),
            tools: Vec::new(),
            messages: Vec::new(),
        }
    }

    #[test]
    fn messages_response_converts() {
        let raw: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Reading page 2."},
                {"type": "tool_use", "id": "tu_1", "name": "read_page_text", "input": {"page": 2}},
                {"type": "thinking", "thinking": "..."}
            ],
            "usage": {"input_tokens": 1200, "output_tokens": 80}
        }))
        .unwrap();
        let response = raw.into_service_response();
        assert_eq!(response.usage.input_tokens, 1200);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "read_page_text");
        assert_eq!(response.text.as_deref(), Some("Reading page 2."));
    }

    #[test]
    fn scripted_service_replays_then_exhausts() {
        let service = ScriptedService::new(vec![ServiceResponse::default()]).then_fail("boom");
        let request = make_request();
        assert!(service.respond(&request).is_ok());
        assert!(matches!(service.respond(&request), Err(AgentError::HttpClient(_))));
        assert!(matches!(service.respond(&request), Err(AgentError::ScriptExhausted)));
        assert_eq!(service.calls(), 3);
    }

    #[test]
    fn repeating_service_never_runs_out() {
        let service = ScriptedService::repeating(ServiceResponse::default());
        let request = make_request();
        for _ in 0..5 {
            assert!(service.respond(&request).is_ok());
        }
        assert_eq!(service.calls(), 5);
    }

    #[test]
    fn missing_api_key_rejected() {
        let tuning = AgentTuning::default();
        assert!(matches!(
            HttpAnalysisClient::from_tuning(&tuning),
            Err(AgentError::MissingApiKey)
        ));
    }
}
