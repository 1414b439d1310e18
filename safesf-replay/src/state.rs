//! Application state mirrored from session events
//!
//! [`SessionState`] is the default [`SessionSink`]: it keeps the agent graph
//! (root orchestrator plus every spawned agent, each with its tool calls),
//! the session status and the final result that renderers draw from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{SessionOutcome, SessionSink};
use crate::event::{AgentComplete, AgentSpawned, SessionResult, SessionStarted, ToolCalled, ToolResult};

/// Id of the root agent registered on `session_started`
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Session lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Complete,
    Error,
}

/// Role of an agent in the backend's execution graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Orchestrator,
    LocationResolver,
    DataAgent,
    SummaryAgent,
    SearchAgent,
    Other(String),
}

impl AgentKind {
    /// Map a backend `agent_type`, falling back to the id prefix
    /// (`LOC-001`, `DATA-002`, ...)
    pub fn infer(agent_type: Option<&str>, agent_id: &str) -> Self {
        let label = agent_type
            .map(str::to_string)
            .unwrap_or_else(|| agent_id.split('-').next().unwrap_or_default().to_string());

        match label.to_ascii_lowercase().replace('_', "-").as_str() {
            "orchestrator" | "req" => AgentKind::Orchestrator,
            "location-resolver" | "loc" => AgentKind::LocationResolver,
            "data-agent" | "data" => AgentKind::DataAgent,
            "summary-agent" | "sum" => AgentKind::SummaryAgent,
            "search-agent" | "search" => AgentKind::SearchAgent,
            _ => AgentKind::Other(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Complete,
    Failed,
    /// Any other status text the backend reported
    Other(String),
}

impl AgentStatus {
    fn from_reported(status: Option<&str>) -> Self {
        match status {
            None | Some("completed") | Some("complete") => AgentStatus::Complete,
            Some("failed") | Some("error") => AgentStatus::Failed,
            Some(other) => AgentStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Complete,
    Error,
}

/// One tool invocation by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
    pub status: ToolStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub row_count: Option<u64>,
    pub result: Option<Value>,
}

/// One node of the agent graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub id: String,
    pub kind: AgentKind,
    pub description: Option<String>,
    /// Node whose output feeds this agent
    pub input_id: Option<String>,
    pub status: AgentStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub output_summary: Option<Value>,
    pub tools: Vec<ToolCall>,
}

impl AgentNode {
    fn running(id: &str, kind: AgentKind, at: i64) -> Self {
        Self {
            id: id.to_string(),
            kind,
            description: None,
            input_id: None,
            status: AgentStatus::Running,
            started_at: at,
            completed_at: None,
            output_summary: None,
            tools: Vec::new(),
        }
    }

    pub fn running_tools(&self) -> usize {
        self.tools.iter().filter(|t| t.status == ToolStatus::Running).count()
    }
}

/// Application state for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub request_id: Option<String>,
    pub query: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Agents in registration order
    pub agents: Vec<AgentNode>,
    pub duration_ms: Option<u64>,
    pub flow_trace: Vec<String>,
    pub result: Option<SessionResult>,
    pub error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(&self, id: &str) -> Option<&AgentNode> {
        self.agents.iter().find(|a| a.id == id)
    }

    fn agent_mut(&mut self, id: &str) -> Option<&mut AgentNode> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Complete | SessionStatus::Error)
    }

    fn settle_orchestrator(&mut self, status: AgentStatus, at: i64) {
        if let Some(root) = self.agent_mut(ORCHESTRATOR_ID) {
            if root.status == AgentStatus::Running {
                root.status = status;
                root.completed_at = Some(at);
            }
        }
    }
}

impl SessionSink for SessionState {
    fn reset(&mut self) {
        *self = SessionState::default();
    }

    fn session_started(&mut self, event: &SessionStarted, at: i64) {
        self.status = SessionStatus::Running;
        self.started_at = Some(at);
        self.request_id = event.request_id.clone();
        self.query = event.query.clone();

        if self.agent(ORCHESTRATOR_ID).is_none() {
            let mut root = AgentNode::running(ORCHESTRATOR_ID, AgentKind::Orchestrator, at);
            root.description = event.description.clone();
            self.agents.push(root);
        }
    }

    fn agent_spawned(&mut self, event: &AgentSpawned, at: i64) {
        let kind = AgentKind::infer(event.agent_type.as_deref(), &event.agent_id);

        // a re-announced agent is refreshed in place, never duplicated
        let index = match self.agents.iter().position(|a| a.id == event.agent_id) {
            Some(index) => index,
            None => {
                self.agents.push(AgentNode::running(&event.agent_id, kind.clone(), at));
                self.agents.len() - 1
            }
        };

        let node = &mut self.agents[index];
        node.kind = kind;
        node.status = AgentStatus::Running;
        node.started_at = at;
        node.completed_at = None;
        node.description = event.description.clone();
        node.input_id = event.input_id.clone();
    }

    fn tool_called(&mut self, event: &ToolCalled, at: i64) {
        let Some(agent) = self.agent_mut(&event.agent_id) else {
            tracing::debug!(agent_id = %event.agent_id, "tool_called for unknown agent");
            return;
        };

        agent.tools.push(ToolCall {
            name: event.tool_name.clone(),
            input: event.tool_input.clone(),
            status: ToolStatus::Running,
            started_at: at,
            completed_at: None,
            row_count: None,
            result: None,
        });
    }

    fn tool_result(&mut self, event: &ToolResult, at: i64) {
        let Some(agent) = self.agent_mut(&event.agent_id) else {
            tracing::debug!(agent_id = %event.agent_id, "tool_result for unknown agent");
            return;
        };

        // First running call in scan order, regardless of tool name. Recorded
        // sessions were captured under this rule, so replay must keep it.
        let Some(call) = agent.tools.iter_mut().find(|t| t.status == ToolStatus::Running) else {
            tracing::debug!(agent_id = %event.agent_id, "tool_result with no running tool call");
            return;
        };

        call.status = if event.success == Some(false) {
            ToolStatus::Error
        } else {
            ToolStatus::Complete
        };
        call.completed_at = Some(at);
        call.row_count = event.row_count;
        call.result = event.tool_result.clone();
    }

    fn agent_complete(&mut self, event: &AgentComplete, at: i64) {
        let Some(agent) = self.agent_mut(&event.agent_id) else {
            tracing::debug!(agent_id = %event.agent_id, "agent_complete for unknown agent");
            return;
        };

        agent.status = AgentStatus::from_reported(event.status.as_deref());
        agent.completed_at = Some(at);
        agent.output_summary = event.output_summary.clone();
    }

    fn session_complete(&mut self, outcome: &SessionOutcome, at: i64) {
        self.status = SessionStatus::Complete;
        self.completed_at = Some(at);
        if outcome.request_id.is_some() {
            self.request_id = outcome.request_id.clone();
        }
        if outcome.duration_ms.is_some() {
            self.duration_ms = outcome.duration_ms;
        }
        if !outcome.flow_trace.is_empty() {
            self.flow_trace = outcome.flow_trace.clone();
        }
        if outcome.result.is_some() {
            self.result = outcome.result.clone();
        }
        self.settle_orchestrator(AgentStatus::Complete, at);
    }

    fn session_error(&mut self, message: &str, at: i64) {
        self.status = SessionStatus::Error;
        self.completed_at = Some(at);
        self.error = Some(message.to_string());
        self.settle_orchestrator(AgentStatus::Failed, at);
    }
}
