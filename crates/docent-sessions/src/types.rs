use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Ended,
}

/// Why a session left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Explicit DELETE from the kiosk client.
    Manual,
    /// Inactivity window expired.
    Timeout,
    /// Hard session duration expired.
    Duration,
    /// An operator force-terminated the session.
    OperatorTerminated,
}

/// Point-in-time snapshot of a session, as returned by lookups and the
/// GET /session/{id} route. The live entry inside the registry carries the
/// timers and locks; this record is plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kiosk_id: String,
    pub room_id: String,
    pub created_at: DateTime<Utc>,
    pub duration_s: u64,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_reason_wire_format() {
        assert_eq!(
            serde_json::to_string(&EndReason::OperatorTerminated).unwrap(),
            "\"operator_terminated\""
        );
        assert_eq!(serde_json::to_string(&EndReason::Timeout).unwrap(), "\"timeout\"");
    }

    #[test]
    fn active_session_omits_end_fields() {
        let s = Session {
            id: "s1".into(),
            kiosk_id: "k1".into(),
            room_id: "r1".into(),
            created_at: Utc::now(),
            duration_s: 300,
            last_activity: Utc::now(),
            state: SessionState::Active,
            end_reason: None,
            ended_at: None,
        };
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("end_reason").is_none());
        assert_eq!(v["state"], "active");
    }
}
