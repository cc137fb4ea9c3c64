#![allow(dead_code)]

use agentflow::prelude::*;
use agentflow::{ModelError, ModelRequest, ModelResponse};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

pub const PNG_1PX: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub const WRITER_YAML: &str = r#"
id: writer
displayName: Writer
inputs:
  - name: topic
    type: shortText
    required: true
  - name: photo
    type: fileBase64
agents:
  - name: draft
    model: draft-model
    system: "You write drafts. Session {{sessionId}}."
  - name: review
    model: review-model
  - name: describe
    model: vision-model
  - name: slow
    model: slow-model
flows:
  - name: main
    flow:
      type: sequence
      steps:
        - type: agentCall
          agent: draft
          input: "Write about {{topic}}"
        - type: agentCall
          agent: review
          input: "Review this: {{draft}}"
  - name: vision
    flow:
      type: agentCall
      agent: describe
      input: "Describe {{photo}} for {{topic}}"
  - name: fanout
    flow:
      type: parallel
      steps:
        - type: agentCall
          agent: slow
          input: "first {{topic}}"
        - type: agentCall
          agent: draft
          input: "second {{topic}}"
        - type: agentCall
          agent: review
          input: "third {{topic}}"
"#;

pub const GHOST_YAML: &str = r#"
id: ghost
agents:
  - name: draft
    model: draft-model
flows:
  - name: main
    flow:
      type: sequence
      steps:
        - type: agentCall
          agent: draft
          input: hi
        - type: agentCall
          agent: phantom
          input: hi
"#;

/// Records every request; replies `"<model>: <last message text>"`.
#[derive(Default)]
pub struct RecordingModel {
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl RecordingModel {
    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().await.push(request.clone());
        if request.model == "slow-model" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let input = request.messages.last().map(Message::text).unwrap_or_default();
        Ok(ModelResponse {
            text: format!("{}: {}", request.model, input),
            usage: TokenUsage::new(12, 8),
            finish_reason: "stop".into(),
            ..ModelResponse::default()
        })
    }
}

pub async fn agents() -> Arc<MemoryAgentRepository> {
    let agents = Arc::new(MemoryAgentRepository::new());
    for definition in [WRITER_YAML, GHOST_YAML] {
        let agent = MasterAgentLoader::from_yaml_str(definition).expect("fixture parses");
        MasterAgentLoader::validate(&agent).expect("fixture is valid");
        agents.insert(agent).await;
    }
    agents
}

pub async fn engine(model: Arc<RecordingModel>) -> FlowEngine {
    engine_with(Collaborators::new(agents().await, model)).await
}

pub async fn engine_with(collaborators: Collaborators) -> FlowEngine {
    FlowEngine::new(collaborators, EngineConfig::default()).expect("engine builds")
}
