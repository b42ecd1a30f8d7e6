//! Polling orchestration: one background task per watched project.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    Activity, ActivityEvent, ApiClient, ClientConfig, ClientError, CurrentlyEditing, EventBus,
    NewActivity, OnlineUser, ProjectId, ProjectState, Result, SectionId, StateStore, Subscription,
    SubscriptionId, UserId,
};

/// Coordinates polling, cached state, and event fan-out for
/// collaborative projects
///
/// One instance per application session, shared by reference between
/// consumers. Each watched project gets its own poller task; ticks for a
/// project are serialized by construction, and stopping a project aborts
/// any request still in flight.
pub struct PresenceManager {
    config: ClientConfig,
    api: Arc<ApiClient>,
    store: StateStore,
    events: Arc<EventBus>,
    pollers: Mutex<HashMap<ProjectId, JoinHandle<()>>>,
}

impl PresenceManager {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(config.clone())?);

        Ok(Self {
            config,
            api,
            store: StateStore::new(),
            events: Arc::new(EventBus::new()),
            pollers: Mutex::new(HashMap::new()),
        })
    }

    /// Begin background polling for a project: one immediate tick, then
    /// one every `polling_interval`
    ///
    /// Idempotent — a second call while a poller is live is a warning,
    /// not a second timer.
    pub async fn start_polling(&self, project_id: ProjectId) {
        let mut pollers = self.pollers.lock().await;
        if let Some(handle) = pollers.get(&project_id) {
            if !handle.is_finished() {
                warn!("Polling already active for project {}", project_id);
                return;
            }
        }

        self.store
            .update(project_id, |state| {
                state.is_polling = true;
                state.error = None;
            })
            .await;
        self.events
            .emit(ActivityEvent::PollingStarted { project_id })
            .await;
        info!("Polling started for project {}", project_id);

        let task = PollTask {
            config: self.config.clone(),
            api: Arc::clone(&self.api),
            store: self.store.clone(),
            events: Arc::clone(&self.events),
            project_id,
        };
        pollers.insert(project_id, tokio::spawn(task.run()));
    }

    /// Stop background polling, aborting any tick still in flight
    ///
    /// No-op if the project is not polling.
    pub async fn stop_polling(&self, project_id: ProjectId) {
        let handle = self.pollers.lock().await.remove(&project_id);
        let Some(handle) = handle else {
            debug!("Stop requested for project {} which is not polling", project_id);
            return;
        };

        // a finished task already shut itself down and said so
        let was_live = !handle.is_finished();
        handle.abort();

        self.store
            .update(project_id, |state| state.is_polling = false)
            .await;

        if was_live {
            self.events
                .emit(ActivityEvent::PollingStopped { project_id })
                .await;
            info!("Polling stopped for project {}", project_id);
        }
    }

    pub async fn is_polling(&self, project_id: ProjectId) -> bool {
        self.store
            .get(project_id)
            .await
            .map(|state| state.is_polling)
            .unwrap_or(false)
    }

    /// One on-demand refresh outside the poll cadence
    ///
    /// Does not touch any poller's retry budget.
    pub async fn refresh(&self, project_id: ProjectId) -> Result<()> {
        PollTask {
            config: self.config.clone(),
            api: Arc::clone(&self.api),
            store: self.store.clone(),
            events: Arc::clone(&self.events),
            project_id,
        }
        .tick()
        .await
    }

    /// Announce an editing claim, then refresh the claim list so the
    /// caller sees its own claim without waiting for the next tick
    ///
    /// Advisory: failures are logged and swallowed.
    pub async fn start_editing_section(&self, project_id: ProjectId, section_id: SectionId) {
        if let Err(err) = self.api.start_editing(project_id, section_id).await {
            warn!(
                "start-editing failed for project {} section {}: {}",
                project_id, section_id, err
            );
        }
        self.refresh_currently_editing(project_id).await;
    }

    /// Withdraw an editing claim; same advisory semantics as
    /// `start_editing_section`
    pub async fn stop_editing_section(&self, project_id: ProjectId, section_id: SectionId) {
        if let Err(err) = self.api.stop_editing(project_id, section_id).await {
            warn!(
                "stop-editing failed for project {} section {}: {}",
                project_id, section_id, err
            );
        }
        self.refresh_currently_editing(project_id).await;
    }

    async fn refresh_currently_editing(&self, project_id: ProjectId) {
        match self.api.fetch_currently_editing(project_id).await {
            Ok(editing) => {
                let snapshot = editing.clone();
                self.store
                    .update(project_id, move |state| state.currently_editing = snapshot)
                    .await;
                self.events
                    .emit(ActivityEvent::CurrentlyEditingUpdated { project_id, editing })
                    .await;
            }
            Err(err) => {
                warn!(
                    "Currently-editing refresh failed for project {}: {}",
                    project_id, err
                );
            }
        }
    }

    /// Record an activity and prepend it to the cached feed
    pub async fn log_activity(
        &self,
        project_id: ProjectId,
        activity: NewActivity,
    ) -> Result<Activity> {
        let logged = self.api.log_activity(project_id, &activity).await?;

        let cap = self.config.max_activities;
        let stored = logged.clone();
        self.store
            .update(project_id, move |state| state.push_activity(stored, cap))
            .await;
        self.events
            .emit(ActivityEvent::ActivityLogged {
                project_id,
                activity: logged.clone(),
            })
            .await;

        Ok(logged)
    }

    /// Full cached state; default-empty for never-polled projects
    pub async fn state(&self, project_id: ProjectId) -> ProjectState {
        self.store.snapshot(project_id).await
    }

    pub async fn cached_activities(&self, project_id: ProjectId) -> Vec<Activity> {
        self.state(project_id).await.activities
    }

    pub async fn cached_online_users(&self, project_id: ProjectId) -> Vec<OnlineUser> {
        self.state(project_id).await.online_users
    }

    pub async fn cached_currently_editing(&self, project_id: ProjectId) -> Vec<CurrentlyEditing> {
        self.state(project_id).await.currently_editing
    }

    pub async fn is_user_editing_section(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        section_id: SectionId,
    ) -> bool {
        self.state(project_id)
            .await
            .is_user_editing_section(user_id, section_id)
    }

    pub async fn editors_for_section(
        &self,
        project_id: ProjectId,
        section_id: SectionId,
    ) -> Vec<CurrentlyEditing> {
        self.state(project_id).await.editors_for_section(section_id)
    }

    pub async fn subscribe(&self) -> Subscription {
        self.events.subscribe().await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id).await
    }

    /// Drop a project's poller and cached state
    pub async fn reset(&self, project_id: ProjectId) {
        self.stop_polling(project_id).await;
        self.store.reset(project_id).await;
    }

    /// Tear everything down: every poller, every cache entry, every
    /// subscription
    pub async fn reset_all(&self) {
        let handles: Vec<_> = self.pollers.lock().await.drain().collect();
        for (project_id, handle) in handles {
            handle.abort();
            debug!("Poller cancelled for project {}", project_id);
        }

        self.store.reset_all().await;
        self.events.clear().await;
        info!("Presence manager reset");
    }
}

/// The background poll loop for one project
struct PollTask {
    config: ClientConfig,
    api: Arc<ApiClient>,
    store: StateStore,
    events: Arc<EventBus>,
    project_id: ProjectId,
}

impl PollTask {
    async fn run(self) {
        let mut retries: u32 = 0;
        let mut interval = tokio::time::interval(self.config.polling_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.tick().await {
                Ok(()) => retries = 0,
                Err(err) => {
                    retries += 1;
                    warn!(
                        "Poll tick failed for project {} ({}/{}): {}",
                        self.project_id, retries, self.config.max_retries, err
                    );
                    if retries >= self.config.max_retries {
                        self.shutdown_with_error(err, retries).await;
                        return;
                    }
                }
            }

            // liveness signal; never counted against the retry budget
            if let Err(err) = self.api.heartbeat(self.project_id).await {
                debug!("Heartbeat failed for project {}: {}", self.project_id, err);
            }
        }
    }

    /// One refresh cycle
    ///
    /// The three reads run concurrently. Every slice that comes back
    /// updates the cache even when a sibling fails, but any failure
    /// marks the whole tick failed — stale data must not hide a backend
    /// outage from the retry budget.
    async fn tick(&self) -> Result<()> {
        let project_id = self.project_id;

        let (activities, users, editing) = tokio::join!(
            self.api
                .fetch_activities(project_id, self.config.activity_fetch_limit),
            self.api.fetch_online_users(project_id),
            self.api.fetch_currently_editing(project_id),
        );

        let mut failure: Option<ClientError> = None;

        match activities {
            Ok(mut activities) => {
                activities.truncate(self.config.max_activities);
                let snapshot = activities.clone();
                self.store
                    .update(project_id, move |state| state.activities = snapshot)
                    .await;
                self.events
                    .emit(ActivityEvent::ActivitiesUpdated {
                        project_id,
                        activities,
                    })
                    .await;
            }
            Err(err) => {
                warn!("Activities fetch failed for project {}: {}", project_id, err);
                failure = Some(err);
            }
        }

        match users {
            Ok(users) => {
                let snapshot = users.clone();
                self.store
                    .update(project_id, move |state| state.online_users = snapshot)
                    .await;
                self.events
                    .emit(ActivityEvent::OnlineUsersUpdated { project_id, users })
                    .await;
            }
            Err(err) => {
                warn!(
                    "Online-users fetch failed for project {}: {}",
                    project_id, err
                );
                failure = Some(err);
            }
        }

        match editing {
            Ok(editing) => {
                let snapshot = editing.clone();
                self.store
                    .update(project_id, move |state| state.currently_editing = snapshot)
                    .await;
                self.events
                    .emit(ActivityEvent::CurrentlyEditingUpdated { project_id, editing })
                    .await;
            }
            Err(err) => {
                warn!(
                    "Currently-editing fetch failed for project {}: {}",
                    project_id, err
                );
                failure = Some(err);
            }
        }

        match failure {
            None => {
                self.store
                    .update(project_id, |state| {
                        state.last_updated = Some(Utc::now());
                        state.error = None;
                    })
                    .await;
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    /// Retry budget exhausted: flip the polling flag, record the error,
    /// announce it once, and exit the loop
    async fn shutdown_with_error(&self, err: ClientError, retries: u32) {
        error!(
            "Polling disabled for project {} after {} consecutive failures: {}",
            self.project_id, retries, err
        );

        self.store
            .update(self.project_id, |state| {
                state.is_polling = false;
                state.error = Some(err.to_string());
            })
            .await;
        self.events
            .emit(ActivityEvent::PollingFailed {
                project_id: self.project_id,
                error: err.to_string(),
                retry_count: retries,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PresenceManager {
        // nothing here sends requests, so the address is never dialed
        PresenceManager::new(ClientConfig::new("http://127.0.0.1:9")).unwrap()
    }

    #[tokio::test]
    async fn test_default_state_for_unknown_project() {
        let manager = manager();

        let state = manager.state(ProjectId(404)).await;
        assert!(state.activities.is_empty());
        assert!(state.online_users.is_empty());
        assert!(state.currently_editing.is_empty());
        assert!(state.last_updated.is_none());
        assert!(!state.is_polling);
        assert!(state.error.is_none());

        assert!(!manager.is_polling(ProjectId(404)).await);
    }

    #[tokio::test]
    async fn test_stop_polling_when_idle_is_a_noop() {
        let manager = manager();
        let mut sub = manager.subscribe().await;

        manager.stop_polling(ProjectId(1)).await;

        // no PollingStopped was emitted
        manager.reset_all().await;
        assert!(sub.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_queries_on_empty_cache() {
        let manager = manager();

        assert!(
            !manager
                .is_user_editing_section(ProjectId(1), UserId(1), SectionId(1))
                .await
        );
        assert!(manager
            .editors_for_section(ProjectId(1), SectionId(1))
            .await
            .is_empty());
    }
}
