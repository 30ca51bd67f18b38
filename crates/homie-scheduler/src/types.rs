use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Reminder,
    Birthday,
    FollowUp,
    CheckIn,
    Anticipated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Reminder => "reminder",
            EventKind::Birthday => "birthday",
            EventKind::FollowUp => "follow_up",
            EventKind::CheckIn => "check_in",
            EventKind::Anticipated => "anticipated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "birthday" => EventKind::Birthday,
            "follow_up" => EventKind::FollowUp,
            "check_in" => EventKind::CheckIn,
            "anticipated" => EventKind::Anticipated,
            _ => EventKind::Reminder,
        }
    }

    /// Reminders and birthdays are never skipped by the heartbeat's
    /// anti-predictability roll, and reminders are always exempt from
    /// suppression entirely.
    pub fn is_critical(&self) -> bool {
        matches!(self, EventKind::Reminder | EventKind::Birthday)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Once,
    Yearly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Once => "once",
            Recurrence::Yearly => "yearly",
        }
    }

    pub fn parse(s: Option<&str>) -> Option<Self> {
        match s {
            Some("yearly") => Some(Recurrence::Yearly),
            Some("once") => Some(Recurrence::Once),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub kind: EventKind,
    pub subject: String,
    pub chat_id: String,
    pub trigger_at_ms: i64,
    pub recurrence: Option<Recurrence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveEvent {
    pub id: i64,
    pub kind: EventKind,
    pub subject: String,
    pub chat_id: String,
    pub trigger_at_ms: i64,
    pub recurrence: Option<Recurrence>,
    pub delivered: bool,
    pub claim_id: Option<String>,
    pub claim_until_ms: Option<i64>,
    pub created_at_ms: i64,
}

/// What the injected delivery handler reported back to the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    Delivered,
    Refused,
}
