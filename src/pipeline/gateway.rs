//! Gateway strategy: one WebSocket exchange per job.

use crate::error::Pdf2CsvError;
use crate::pipeline::dispatch::{Backend, BackendReply, ExtractionJob};
use agent_gateway::client::AgentClient;
use async_trait::async_trait;

/// Sends the instruction to the supervised gateway.
#[derive(Debug, Clone)]
pub struct GatewayBackend {
    client: AgentClient,
    agent_id: String,
    session_key: String,
}

impl GatewayBackend {
    pub fn new(
        client: AgentClient,
        agent_id: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            agent_id: agent_id.into(),
            session_key: session_key.into(),
        }
    }
}

#[async_trait]
impl Backend for GatewayBackend {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn process(&self, job: &ExtractionJob) -> Result<BackendReply, Pdf2CsvError> {
        let reply = self
            .client
            .send(&self.agent_id, &self.session_key, &job.instruction)
            .await?;
        Ok(BackendReply::ok(reply))
    }
}
