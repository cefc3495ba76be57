//! OpenAI-compatible chat-completions client for plan generation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PlanningEndpoint;
use crate::planner::{PlanningError, PlanningModel, PlanningRequest};

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 4096;

pub struct ChatPlanningModel {
    http: reqwest::Client,
    endpoint: PlanningEndpoint,
    timeout: Duration,
}

impl ChatPlanningModel {
    /// `timeout` bounds the whole HTTP exchange; the planner applies its own
    /// per-call timeout on top.
    pub fn new(endpoint: PlanningEndpoint, timeout: Duration) -> Result<Self, PlanningError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlanningError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            timeout,
        })
    }

    fn completions_url(&self) -> String {
        let base = self.endpoint.url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl PlanningModel for ChatPlanningModel {
    async fn complete(&self, request: &PlanningRequest) -> Result<String, PlanningError> {
        let context = serde_json::to_string(request)
            .map_err(|e| PlanningError::Malformed(format!("request encoding: {e}")))?;
        let model = request.model.as_deref().unwrap_or(&self.endpoint.model);

        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.instructions(),
                },
                ChatMessage {
                    role: "user",
                    content: context,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut call = self.http.post(self.completions_url()).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            call = call.bearer_auth(key);
        }
        debug!(job_id = %request.job_id, model, "Requesting fix plan");

        let response = call.send().await.map_err(|e| {
            if e.is_timeout() {
                PlanningError::Timeout(self.timeout.as_secs())
            } else {
                PlanningError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PlanningError::Status { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PlanningError::Malformed(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PlanningError::Malformed("empty completion".into()))
    }
}
