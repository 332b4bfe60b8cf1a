use serde::{Deserialize, Serialize};

/// Wire contract version (bumped when breaking changes are introduced)
pub const VERSION: u8 = 1;

/// Who produced a history entry, as the triage backend spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Bot,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Bot => "bot",
        }
    }
}

/// One `{type, content}` pair of the `message_history` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self { role: HistoryRole::User, content: content.into() }
    }

    pub fn bot<S: Into<String>>(content: S) -> Self {
        Self { role: HistoryRole::Bot, content: content.into() }
    }
}

/// `POST /start-session` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct StartSessionResponse {
    pub session_id: String,
    pub bot_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>, // "active" | "completed" | "inactive"
}

/// `POST /chat` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_history: Vec<HistoryEntry>,
}

/// `POST /chat` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ChatResponse {
    pub bot_message: String,
    #[serde(default)]
    pub has_enough_info: bool,
    #[serde(default)]
    pub triage_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom_dict: Option<serde_json::Value>,
}

/// Urgency classification. The string values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum UrgencyLevel {
    Emergency,
    Urgent,
    Routine,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Emergency => "Emergency",
            UrgencyLevel::Urgent => "Urgent",
            UrgencyLevel::Routine => "Routine",
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UrgencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Emergency" => Ok(UrgencyLevel::Emergency),
            "Urgent" => Ok(UrgencyLevel::Urgent),
            "Routine" => Ok(UrgencyLevel::Routine),
            other => Err(format!("unknown urgency level: {}", other)),
        }
    }
}

/// A symptom as reported by the triage endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Symptom {
    pub name: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub additional_context: Option<String>,
}

/// `GET /session/{id}/triage` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct TriageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<Symptom>,
    #[serde(alias = "triage_level")]
    pub urgency_level: UrgencyLevel,
    #[serde(default)]
    pub has_enough_info: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `GET /session/{id}` response (diagnostics only, shape is loosely held)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct SessionDetails {
    pub session_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub symptom_dict: Option<serde_json::Value>,
    #[serde(default)]
    pub triage_result: Option<serde_json::Value>,
}

/// `GET /health` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error body returned with non-2xx statuses. Either key may be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// Symptom extracted by the LLM from a lab report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct LabSymptom {
    pub name: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub related_measure: Option<String>,
}

/// Lab-report extraction output: `{"symptoms": [...], "bio-marker": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct LabExtraction {
    #[serde(default)]
    pub symptoms: Vec<LabSymptom>,
    #[serde(rename = "bio-marker", default)]
    pub bio_markers: Vec<serde_json::Value>,
}

/// Conversation extraction output: `{"symptoms": [...]}` in the triage shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ConversationExtraction {
    #[serde(default)]
    pub symptoms: Vec<Symptom>,
}
