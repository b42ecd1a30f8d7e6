//! Credentialed JSON client for the collaborative-projects API.
//!
//! All requests ride the cookie-based session; POSTs additionally carry
//! the CSRF token and the `X-Requested-With` marker the backend expects.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{
    Activity, ClientConfig, ClientError, CurrentlyEditing, NewActivity, OnlineUser, ProjectId,
    Result, SectionId,
};

#[derive(Debug, serde::Deserialize)]
struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    csrf_token: String,
}

/// Thin typed wrapper over the REST endpoints
#[derive(Debug)]
pub struct ApiClient {
    config: ClientConfig,
    client: reqwest::Client,
    csrf_token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            config,
            client,
            csrf_token: RwLock::new(None),
        })
    }

    fn project_url(&self, project_id: ProjectId, tail: &str) -> String {
        format!(
            "{}/api/collaborative-projects/{}/{}",
            self.config.base_url, project_id, tail
        )
    }

    /// Session CSRF token, fetched once and cached
    async fn csrf_token(&self) -> Result<String> {
        if let Some(token) = self.csrf_token.read().await.clone() {
            return Ok(token);
        }

        let url = format!("{}/api/auth/csrf/", self.config.base_url);
        let response: CsrfResponse = self.get_json(&url).await?;

        let mut cached = self.csrf_token.write().await;
        *cached = Some(response.csrf_token.clone());
        Ok(response.csrf_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn post<B: Serialize>(&self, url: &str, body: Option<&B>) -> Result<reqwest::Response> {
        let token = self.csrf_token().await?;

        let mut request = self
            .client
            .post(url)
            .header("X-CSRFToken", token)
            .header("X-Requested-With", "XMLHttpRequest");
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(Self::error_from(response).await)
    }

    async fn read_ok(response: reqwest::Response) -> Result<()> {
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }

    /// Normalize a non-2xx response into an error carrying the
    /// backend-provided message when one exists
    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        ClientError::Api {
            status,
            message: api_error_message(status, &body),
        }
    }

    /// GET activities/?limit=N
    pub async fn fetch_activities(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<Activity>> {
        let url = self.project_url(project_id, &format!("activities/?limit={}", limit));
        self.get_json(&url).await
    }

    /// GET online-users/, deriving `is_online` from `last_seen`
    pub async fn fetch_online_users(&self, project_id: ProjectId) -> Result<Vec<OnlineUser>> {
        let url = self.project_url(project_id, "online-users/");
        let mut users: Vec<OnlineUser> = self.get_json(&url).await?;

        let now = Utc::now();
        let threshold = chrono::Duration::seconds(self.config.online_threshold.as_secs() as i64);
        for user in &mut users {
            user.refresh_online(threshold, now);
        }

        Ok(users)
    }

    /// GET currently-editing/
    pub async fn fetch_currently_editing(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<CurrentlyEditing>> {
        let url = self.project_url(project_id, "currently-editing/");
        self.get_json(&url).await
    }

    /// POST heartbeat/ — refreshes this user's last-seen on the server
    pub async fn heartbeat(&self, project_id: ProjectId) -> Result<()> {
        let url = self.project_url(project_id, "heartbeat/");
        let response = self.post::<()>(&url, None).await?;
        Self::read_ok(response).await
    }

    /// POST start-editing/ with `{"section_id": N}`
    pub async fn start_editing(&self, project_id: ProjectId, section_id: SectionId) -> Result<()> {
        let url = self.project_url(project_id, "start-editing/");
        let body = serde_json::json!({ "section_id": section_id });
        let response = self.post(&url, Some(&body)).await?;
        Self::read_ok(response).await
    }

    /// POST stop-editing/ with `{"section_id": N}`
    pub async fn stop_editing(&self, project_id: ProjectId, section_id: SectionId) -> Result<()> {
        let url = self.project_url(project_id, "stop-editing/");
        let body = serde_json::json!({ "section_id": section_id });
        let response = self.post(&url, Some(&body)).await?;
        Self::read_ok(response).await
    }

    /// POST log-activity/; the backend returns the stored record
    pub async fn log_activity(
        &self,
        project_id: ProjectId,
        activity: &NewActivity,
    ) -> Result<Activity> {
        let url = self.project_url(project_id, "log-activity/");
        let response = self.post(&url, Some(activity)).await?;
        Self::read_json(response).await
    }
}

/// Extract a human-readable message from an error body
fn api_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|key| value.get(key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| format!("request failed: {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_backend_fields() {
        assert_eq!(
            api_error_message(403, r#"{"message": "not a collaborator"}"#),
            "not a collaborator"
        );
        assert_eq!(
            api_error_message(403, r#"{"detail": "forbidden"}"#),
            "forbidden"
        );
        assert_eq!(
            api_error_message(500, r#"{"error": "boom"}"#),
            "boom"
        );
    }

    #[test]
    fn test_error_message_falls_back_to_status() {
        assert_eq!(api_error_message(502, "<html>bad gateway</html>"), "request failed: 502");
        assert_eq!(api_error_message(404, r#"{"code": 12}"#), "request failed: 404");
        assert_eq!(api_error_message(500, ""), "request failed: 500");
    }

    #[test]
    fn test_project_urls() {
        let client = ApiClient::new(ClientConfig::new("https://app.example.com/")).unwrap();

        assert_eq!(
            client.project_url(ProjectId(42), "heartbeat/"),
            "https://app.example.com/api/collaborative-projects/42/heartbeat/"
        );
        assert_eq!(
            client.project_url(ProjectId(7), "activities/?limit=20"),
            "https://app.example.com/api/collaborative-projects/7/activities/?limit=20"
        );
    }
}
