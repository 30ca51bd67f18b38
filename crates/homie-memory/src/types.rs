use serde::{Deserialize, Serialize};

/// Coarse relationship class gating proactive cadence and tool-tier defaults.
/// Derived from `(relationship_score, sample_count)` unless a person has a
/// manual override. Ordered loosest-to-closest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    NewContact,
    GettingToKnow,
    Established,
    CloseFriend,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::NewContact => "new_contact",
            TrustTier::GettingToKnow => "getting_to_know",
            TrustTier::Established => "established",
            TrustTier::CloseFriend => "close_friend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new_contact" => Some(TrustTier::NewContact),
            "getting_to_know" => Some(TrustTier::GettingToKnow),
            "established" => Some(TrustTier::Established),
            "close_friend" => Some(TrustTier::CloseFriend),
            _ => None,
        }
    }
}

/// Rolling engagement counters kept per person, updated as turns land.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ObservationCounters {
    pub avg_reply_len: f64,
    pub avg_user_len: f64,
    /// Bit `h` set means at least one message was observed in local hour `h`.
    pub active_hours_bitmask: i64,
    pub conversation_count: i64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// `person:<channel>:<channelUserId>`.
    pub id: String,
    pub display_name: Option<String>,
    pub channel: String,
    pub channel_user_id: String,
    pub relationship_score: f64,
    pub trust_tier_override: Option<TrustTier>,
    pub capsule: Option<String>,
    pub public_style_capsule: Option<String>,
    pub counters: ObservationCounters,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Person {
    pub fn person_id(channel: &str, channel_user_id: &str) -> String {
        format!("person:{channel}:{channel_user_id}")
    }

    /// The effective trust tier: an explicit override always wins, otherwise
    /// derived from `(relationship_score, sample_count)`.
    pub fn trust_tier(&self) -> TrustTier {
        self.trust_tier_override
            .unwrap_or_else(|| derive_trust_tier(self.relationship_score, self.counters.sample_count))
    }
}

/// Thresholds chosen so a handful of exchanges don't jump straight to
/// `close_friend` — sample count gates the climb, relationship_score gates
/// how far up within what the sample count allows.
fn derive_trust_tier(relationship_score: f64, sample_count: i64) -> TrustTier {
    if sample_count < 5 {
        return TrustTier::NewContact;
    }
    if sample_count < 20 || relationship_score < 0.3 {
        return TrustTier::GettingToKnow;
    }
    if relationship_score < 0.7 {
        return TrustTier::Established;
    }
    TrustTier::CloseFriend
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Preference,
    Personal,
    Plan,
    Professional,
    Relationship,
    Misc,
}

impl FactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Preference => "preference",
            FactCategory::Personal => "personal",
            FactCategory::Plan => "plan",
            FactCategory::Professional => "professional",
            FactCategory::Relationship => "relationship",
            FactCategory::Misc => "misc",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "preference" => FactCategory::Preference,
            "personal" => FactCategory::Personal,
            "plan" => FactCategory::Plan,
            "professional" => FactCategory::Professional,
            "relationship" => FactCategory::Relationship,
            _ => FactCategory::Misc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub person_id: Option<String>,
    pub subject: String,
    pub content: String,
    pub category: FactCategory,
    pub evidence_quote: Option<String>,
    pub last_accessed_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

/// A single turn rendered as `USER: ... / FRIEND: ...` for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub chat_id: String,
    pub person_id: Option<String>,
    pub is_group: bool,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Success,
    Failure,
    Observation,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonType::Success => "success",
            LessonType::Failure => "failure",
            LessonType::Observation => "observation",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => LessonType::Success,
            "failure" => LessonType::Failure,
            _ => LessonType::Observation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub kind: LessonType,
    pub category: String,
    pub content: String,
    pub rule: Option<String>,
    pub alternative: Option<String>,
    pub person_id: Option<String>,
    pub episode_refs: Option<Vec<i64>>,
    pub confidence: f64,
    pub times_validated: i64,
    pub times_violated: i64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCapsule {
    pub chat_id: String,
    pub capsule: String,
    pub updated_at_ms: i64,
}

/// A hybrid-search hit with its fused score, highest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFact {
    pub fact: Fact,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEpisode {
    pub episode: Episode,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_tier_gates_on_sample_count_first() {
        assert_eq!(derive_trust_tier(0.95, 2), TrustTier::NewContact);
    }

    #[test]
    fn trust_tier_climbs_with_score_once_sampled() {
        assert_eq!(derive_trust_tier(0.1, 30), TrustTier::GettingToKnow);
        assert_eq!(derive_trust_tier(0.5, 30), TrustTier::Established);
        assert_eq!(derive_trust_tier(0.8, 30), TrustTier::CloseFriend);
    }

    #[test]
    fn override_wins_over_derived_tier() {
        let mut p = Person {
            id: Person::person_id("cli", "u1"),
            display_name: None,
            channel: "cli".into(),
            channel_user_id: "u1".into(),
            relationship_score: 0.0,
            trust_tier_override: None,
            capsule: None,
            public_style_capsule: None,
            counters: ObservationCounters::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        assert_eq!(p.trust_tier(), TrustTier::NewContact);
        p.trust_tier_override = Some(TrustTier::CloseFriend);
        assert_eq!(p.trust_tier(), TrustTier::CloseFriend);
    }
}
