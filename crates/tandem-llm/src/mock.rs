use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tandem_core::errors::GatewayError;
use tandem_core::ids::ToolCallId;
use tandem_core::provider::{Completion, CompletionRequest, LanguageModel, ToolCall};

/// Pre-programmed answer for deterministic tests without a backend.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Reply(Completion),
    Error(GatewayError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn text(text: &str) -> Self {
        Self::Reply(Completion::text(text))
    }

    /// A single tool call with a fresh call id.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::Reply(Completion {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            }],
        })
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

type Responder = Box<dyn Fn(&CompletionRequest) -> ScriptedResponse + Send + Sync>;

enum Script {
    Sequence(Vec<ScriptedResponse>),
    Function(Responder),
}

/// Model double that replays scripted responses and records every request.
pub struct ScriptedModel {
    script: Script,
    call_count: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    /// Answer calls with `responses` in order; extra calls fail.
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self::with_script(Script::Sequence(responses))
    }

    /// Answer every call by inspecting the request.
    ///
    /// Useful when several agents share one model and call order is not
    /// deterministic.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> ScriptedResponse + Send + Sync + 'static,
    {
        Self::with_script(Script::Function(Box::new(responder)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let response = match &self.script {
            Script::Sequence(responses) => responses.get(idx).cloned().ok_or_else(|| {
                GatewayError::InvalidRequest(format!("ScriptedModel: no response configured for call {idx}"))
            })?,
            Script::Function(responder) => responder(request),
        };

        resolve(response).await
    }
}

/// Unrolls nested delays iteratively.
async fn resolve(mut response: ScriptedResponse) -> Result<Completion, GatewayError> {
    loop {
        match response {
            ScriptedResponse::Reply(completion) => return Ok(completion),
            ScriptedResponse::Error(e) => return Err(e),
            ScriptedResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                response = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::provider::ChatMessage;

    #[tokio::test]
    async fn replays_in_order_then_fails() {
        let model = ScriptedModel::new(vec![ScriptedResponse::text("first"), ScriptedResponse::text("second")]);
        let req = CompletionRequest::prompt(None, "hi");

        assert_eq!(model.complete(&req).await.unwrap().text, "first");
        assert_eq!(model.complete(&req).await.unwrap().text, "second");
        assert!(matches!(model.complete(&req).await, Err(GatewayError::InvalidRequest(_))));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn records_requests() {
        let model = ScriptedModel::new(vec![ScriptedResponse::text("ok")]);
        let req = CompletionRequest::prompt(Some("system".into()), "what buckets exist?");
        model.complete(&req).await.unwrap();

        let seen = model.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages, vec![ChatMessage::user("what buckets exist?")]);
    }

    #[tokio::test]
    async fn responder_sees_request() {
        let model = ScriptedModel::from_fn(|req| {
            let asked = match req.messages.first() {
                Some(ChatMessage::User { content }) => content.clone(),
                _ => String::new(),
            };
            ScriptedResponse::text(&asked.to_uppercase())
        });
        let out = model.complete(&CompletionRequest::prompt(None, "loud")).await.unwrap();
        assert_eq!(out.text, "LOUD");
    }

    #[tokio::test]
    async fn tool_call_response() {
        let model = ScriptedModel::new(vec![ScriptedResponse::tool_call(
            "list_buckets",
            serde_json::json!({"region": "eu-west-1"}),
        )]);
        let out = model.complete(&CompletionRequest::default()).await.unwrap();
        assert!(out.has_tool_calls());
        assert_eq!(out.tool_calls[0].name, "list_buckets");
        assert_eq!(out.tool_calls[0].arguments["region"], "eu-west-1");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_error() {
        let model = ScriptedModel::new(vec![ScriptedResponse::delayed(
            Duration::from_secs(5),
            ScriptedResponse::Error(GatewayError::RateLimited { retry_after: None }),
        )]);
        let start = tokio::time::Instant::now();
        let result = model.complete(&CompletionRequest::default()).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }
}
