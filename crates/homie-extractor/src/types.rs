use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEvent {
    pub kind: String,
    pub subject: String,
    pub trigger_at_ms: i64,
    pub recurrence: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub events: Vec<ExtractedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileActionType {
    Add,
    Update,
    Delete,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileAction {
    #[serde(rename = "type")]
    pub action_type: ReconcileActionType,
    pub existing_idx: Option<usize>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileResult {
    #[serde(default)]
    pub actions: Vec<ReconcileAction>,
}

/// Input to an extraction pass: the turn's plain text, with no session or
/// memory framing attached.
#[derive(Debug, Clone)]
pub struct TurnText {
    pub chat_id: String,
    pub person_id: Option<String>,
    pub is_group: bool,
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp_ms: i64,
}
