//! Per-project cache of the last-fetched realtime state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{Activity, CurrentlyEditing, OnlineUser, ProjectId, SectionId, UserId};

/// Cached realtime state for one project
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    /// Most recent first
    pub activities: Vec<Activity>,
    pub online_users: Vec<OnlineUser>,
    pub currently_editing: Vec<CurrentlyEditing>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_polling: bool,
    /// Last terminal polling failure, if any
    pub error: Option<String>,
}

impl ProjectState {
    /// True if the user holds an editing claim on the section
    pub fn is_user_editing_section(&self, user_id: UserId, section_id: SectionId) -> bool {
        self.currently_editing
            .iter()
            .any(|claim| claim.user_id == user_id && claim.section_id == section_id)
    }

    /// All editing claims on the section
    ///
    /// Claims are non-exclusive; filtering out the caller's own user is
    /// the consumer's business.
    pub fn editors_for_section(&self, section_id: SectionId) -> Vec<CurrentlyEditing> {
        self.currently_editing
            .iter()
            .filter(|claim| claim.section_id == section_id)
            .cloned()
            .collect()
    }

    /// Prepend a newly-logged activity, dropping the oldest past the cap
    pub fn push_activity(&mut self, activity: Activity, cap: usize) {
        self.activities.insert(0, activity);
        self.activities.truncate(cap);
    }
}

/// Project-keyed state map
///
/// Records are created lazily on first access and removed only by
/// `reset`/`reset_all`. Cloning the store clones the handle, not the map.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<HashMap<ProjectId, ProjectState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a project's state, creating the default record if absent
    pub async fn snapshot(&self, project_id: ProjectId) -> ProjectState {
        let mut map = self.inner.write().await;
        map.entry(project_id).or_default().clone()
    }

    /// Read without creating; `None` for never-touched projects
    pub async fn get(&self, project_id: ProjectId) -> Option<ProjectState> {
        self.inner.read().await.get(&project_id).cloned()
    }

    /// Apply a mutation to a project's record, creating it if needed
    pub async fn update<F>(&self, project_id: ProjectId, f: F)
    where
        F: FnOnce(&mut ProjectState),
    {
        let mut map = self.inner.write().await;
        f(map.entry(project_id).or_default());
    }

    /// Remove a project's record entirely
    pub async fn reset(&self, project_id: ProjectId) {
        self.inner.write().await.remove(&project_id);
    }

    /// Remove every record
    pub async fn reset_all(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActivityType;

    fn activity(id: i64) -> Activity {
        Activity {
            id,
            project_id: ProjectId(1),
            user_id: UserId(1),
            username: "alice".to_string(),
            avatar: None,
            activity_type: ActivityType::SectionUpdated,
            description: "Edited a section".to_string(),
            section_id: Some(SectionId(7)),
            section_title: Some("Chapter 1".to_string()),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    fn claim(user_id: i64, section_id: i64) -> CurrentlyEditing {
        CurrentlyEditing {
            user_id: UserId(user_id),
            username: format!("user-{}", user_id),
            section_id: SectionId(section_id),
            section_title: "Chapter 1".to_string(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_creates_default() {
        let store = StateStore::new();

        assert!(store.get(ProjectId(42)).await.is_none());

        let state = store.snapshot(ProjectId(42)).await;
        assert!(state.activities.is_empty());
        assert!(!state.is_polling);
        assert!(state.error.is_none());

        // now it exists
        assert!(store.get(ProjectId(42)).await.is_some());
    }

    #[tokio::test]
    async fn test_reset_removes_entry() {
        let store = StateStore::new();
        store.update(ProjectId(1), |s| s.is_polling = true).await;
        store.update(ProjectId(2), |s| s.is_polling = true).await;

        store.reset(ProjectId(1)).await;
        assert!(store.get(ProjectId(1)).await.is_none());
        assert_eq!(store.len().await, 1);

        store.reset_all().await;
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_activity_cap() {
        let mut state = ProjectState::default();

        for id in 0..120 {
            state.push_activity(activity(id), 50);
        }

        assert_eq!(state.activities.len(), 50);
        // newest first
        assert_eq!(state.activities[0].id, 119);
        assert_eq!(state.activities[49].id, 70);
    }

    #[test]
    fn test_editing_queries() {
        let state = ProjectState {
            currently_editing: vec![claim(1, 7), claim(2, 7), claim(1, 8)],
            ..Default::default()
        };

        assert!(state.is_user_editing_section(UserId(1), SectionId(7)));
        assert!(state.is_user_editing_section(UserId(1), SectionId(8)));
        assert!(!state.is_user_editing_section(UserId(2), SectionId(8)));
        assert!(!state.is_user_editing_section(UserId(3), SectionId(7)));

        let editors = state.editors_for_section(SectionId(7));
        assert_eq!(editors.len(), 2);
        assert!(editors.iter().all(|c| c.section_id == SectionId(7)));

        assert!(state.editors_for_section(SectionId(99)).is_empty());
    }
}
