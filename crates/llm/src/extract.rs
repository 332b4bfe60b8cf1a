//! Symptom extraction from free text: lab reports and doctor/patient
//! conversations. Both prompts ask for a single JSON object; models often wrap
//! it in prose or code fences, so the object is salvaged before parsing.

use protocol::{ConversationExtraction, HistoryEntry, HistoryRole, LabExtraction};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{ChatMessage, ChatOptions, Client, LlmError, Role};

pub const LAB_REPORT_PROMPT: &str = r#"You are given the text of a patient's lab report.

Task:
1. List every symptom or abnormal finding the report suggests the patient may have.
2. Only include findings that relate to the patient's condition. Skip test names, raw values and jargon unless they directly imply a symptom.
3. Reply with a single JSON object and nothing else, in exactly this shape:

{
  "symptoms": [
    {
      "name": "<symptom name>",
      "severity": "<severity if implied, else null>",
      "related_measure": "<lab measurement or context supporting it, else null>"
    }
  ],
  "bio-marker": []
}

Rules:
- Be concise and factual.
- If a symptom is implied but uncertain, include it and set unclear fields to null.
- Do not output diagnoses or diseases.
- If nothing relevant is found, reply {"symptoms": [], "bio-marker": []}.
"#;

pub const CONVERSATION_PROMPT: &str = r#"You are given a medical conversation between a doctor and a patient, as what the doctor said and what the patient said.

Task:
1. Extract every precise symptom the patient reports. Ignore the doctor's suggestions, assumptions and repeated confirmations.
2. Reply with a single JSON object in exactly this shape:

{
  "symptoms": [
    {
      "name": "<symptom name>",
      "duration": "<duration if mentioned, else null>",
      "severity": "<severity if mentioned, else null>",
      "additional_context": "<frequency, location, triggers etc., else null>"
    }
  ]
}

Rules:
- Stick to what the patient explicitly reports.
- If a symptom is implied by the patient, include it and set unclear fields to null.
- No diagnoses or causes.
- If no symptoms are found, reply {"symptoms": []}.
"#;

/// The outermost `{ ... }` span of `text`, from the first `{` to the last `}`.
pub fn salvage_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_salvaged<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let Some(json) = salvage_json(raw) else {
        warn!(bytes = raw.len(), "model output contained no JSON object");
        return Err(LlmError::NoJson);
    };
    Ok(serde_json::from_str(json)?)
}

pub fn lab_prompt(report: &str) -> String {
    format!("{}\nLab Report:\n{}\n", LAB_REPORT_PROMPT, report)
}

pub fn conversation_prompt(doctor: &str, patient: &str) -> String {
    format!("{}\nDoctor: {}\n\nPatient: {}\n", CONVERSATION_PROMPT, doctor, patient)
}

/// Split a chat history into (doctor, patient) utterances; the triage bot
/// plays the doctor.
pub fn split_utterances(history: &[HistoryEntry]) -> (String, String) {
    let pick = |role: HistoryRole| {
        history
            .iter()
            .filter(|e| e.role == role)
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };
    (pick(HistoryRole::Bot), pick(HistoryRole::User))
}

pub fn parse_lab_extraction(raw: &str) -> Result<LabExtraction, LlmError> {
    parse_salvaged(raw)
}

pub fn parse_conversation_extraction(raw: &str) -> Result<ConversationExtraction, LlmError> {
    parse_salvaged(raw)
}

impl Client {
    async fn extract(&self, prompt: String) -> Result<String, LlmError> {
        let msgs = vec![ChatMessage { role: Role::User, content: prompt }];
        let out = self.chat(&msgs, ChatOptions { temperature: Some(0.0), json_object: false }).await?;
        debug!(bytes = out.len(), "extraction output received");
        Ok(out)
    }

    pub async fn extract_lab_symptoms(&self, report: &str) -> Result<LabExtraction, LlmError> {
        let raw = self.extract(lab_prompt(report)).await?;
        parse_lab_extraction(&raw)
    }

    pub async fn extract_conversation_symptoms(&self, doctor: &str, patient: &str) -> Result<ConversationExtraction, LlmError> {
        let raw = self.extract(conversation_prompt(doctor, patient)).await?;
        parse_conversation_extraction(&raw)
    }

    pub async fn extract_history_symptoms(&self, history: &[HistoryEntry]) -> Result<ConversationExtraction, LlmError> {
        let (doctor, patient) = split_utterances(history);
        self.extract_conversation_symptoms(&doctor, &patient).await
    }
}
