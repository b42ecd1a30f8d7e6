//! Wire types for the activity API and the derived-state helpers used
//! when rendering them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProjectId, SectionId, UserId};

/// Kinds of trackable collaborator actions
///
/// The backend owns this vocabulary; values this client version does
/// not know about fold into `Unknown` rather than failing the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SectionCreated,
    SectionUpdated,
    SectionDeleted,
    CommentAdded,
    MemberJoined,
    MemberLeft,
    ProjectUpdated,
    ProjectPublished,
    #[serde(other)]
    Unknown,
}

impl ActivityType {
    /// Icon name for feed rendering
    pub fn icon(&self) -> &'static str {
        match self {
            Self::SectionCreated => "file-plus",
            Self::SectionUpdated => "edit",
            Self::SectionDeleted => "trash",
            Self::CommentAdded => "message-circle",
            Self::MemberJoined => "user-plus",
            Self::MemberLeft => "user-minus",
            Self::ProjectUpdated => "settings",
            Self::ProjectPublished => "send",
            Self::Unknown => "activity",
        }
    }

    /// Accent color for feed rendering, as a hex string
    pub fn color(&self) -> &'static str {
        match self {
            Self::SectionCreated => "#22C55E",
            Self::SectionUpdated => "#3B82F6",
            Self::SectionDeleted => "#EF4444",
            Self::CommentAdded => "#A855F7",
            Self::MemberJoined => "#10B981",
            Self::MemberLeft => "#6B7280",
            Self::ProjectUpdated => "#F59E0B",
            Self::ProjectPublished => "#EC4899",
            Self::Unknown => "#9CA3AF",
        }
    }
}

/// A logged, immutable collaborator action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub activity_type: ActivityType,
    pub description: String,
    #[serde(default)]
    pub section_id: Option<SectionId>,
    #[serde(default)]
    pub section_title: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Body for log-activity posts
#[derive(Debug, Clone, Serialize)]
pub struct NewActivity {
    pub activity_type: ActivityType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl NewActivity {
    pub fn new(activity_type: ActivityType, description: impl Into<String>) -> Self {
        Self {
            activity_type,
            description: description.into(),
            metadata: None,
        }
    }
}

/// A collaborator recently seen on the project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// Derived from `last_seen` on the client, never read off the wire
    #[serde(default, skip_deserializing)]
    pub is_online: bool,
}

impl OnlineUser {
    /// Recompute `is_online` against the given threshold
    pub fn refresh_online(&mut self, threshold: chrono::Duration, now: DateTime<Utc>) {
        self.is_online = self.last_seen + threshold > now;
    }
}

/// An advisory, non-exclusive claim that a user is working on a section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentlyEditing {
    pub user_id: UserId,
    pub username: String,
    pub section_id: SectionId,
    pub section_title: String,
    pub started_at: DateTime<Utc>,
}

/// Human-relative rendering of a timestamp
///
/// Buckets: under a minute "just now", then minutes, hours, days, and a
/// plain date past a week. Future timestamps clamp to "just now".
pub fn time_ago(timestamp: DateTime<Utc>) -> String {
    let secs = (Utc::now() - timestamp).num_seconds();

    if secs < 60 {
        "just now".to_string()
    } else if secs < 3_600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3_600)
    } else if secs < 604_800 {
        format!("{}d ago", secs / 86_400)
    } else {
        timestamp.format("%b %-d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ago(secs: i64) -> DateTime<Utc> {
        Utc::now() - Duration::seconds(secs)
    }

    #[test]
    fn test_time_ago_buckets() {
        assert_eq!(time_ago(ago(0)), "just now");
        assert_eq!(time_ago(ago(59)), "just now");
        assert_eq!(time_ago(ago(60)), "1m ago");
        assert_eq!(time_ago(ago(3_599)), "59m ago");
        assert_eq!(time_ago(ago(3_600)), "1h ago");
        assert_eq!(time_ago(ago(86_399)), "23h ago");
        assert_eq!(time_ago(ago(86_400)), "1d ago");
    }

    #[test]
    fn test_time_ago_past_a_week_renders_a_date() {
        let rendered = time_ago(ago(604_800));
        assert!(!rendered.ends_with("ago"), "got {:?}", rendered);
        assert!(rendered.contains(','), "got {:?}", rendered);
    }

    #[test]
    fn test_time_ago_future_clamps() {
        assert_eq!(time_ago(Utc::now() + Duration::seconds(120)), "just now");
    }

    #[test]
    fn test_unknown_activity_type_deserializes() {
        let parsed: ActivityType = serde_json::from_str("\"holo_panel_added\"").unwrap();
        assert_eq!(parsed, ActivityType::Unknown);

        let parsed: ActivityType = serde_json::from_str("\"comment_added\"").unwrap();
        assert_eq!(parsed, ActivityType::CommentAdded);
    }

    #[test]
    fn test_lookup_tables_cover_unknown() {
        assert_eq!(ActivityType::Unknown.icon(), "activity");
        assert_eq!(ActivityType::Unknown.color(), "#9CA3AF");
        assert!(ActivityType::SectionCreated.color().starts_with('#'));
    }

    #[test]
    fn test_online_derivation() {
        let mut user = OnlineUser {
            user_id: crate::UserId(1),
            username: "alice".to_string(),
            avatar: None,
            last_seen: ago(30),
            is_online: false,
        };

        user.refresh_online(Duration::seconds(60), Utc::now());
        assert!(user.is_online);

        user.last_seen = ago(61);
        user.refresh_online(Duration::seconds(60), Utc::now());
        assert!(!user.is_online);
    }

    #[test]
    fn test_is_online_never_read_from_wire() {
        let json = r#"{
            "user_id": 3,
            "username": "bob",
            "last_seen": "2026-01-01T00:00:00Z",
            "is_online": true
        }"#;

        let user: OnlineUser = serde_json::from_str(json).unwrap();
        assert!(!user.is_online);
    }
}
