//! REST client for the AnyWork backend.
//!
//! Every request reads the credential store and attaches the bearer token
//! when a session exists; otherwise the request goes out unauthenticated and
//! the backend decides. Callers choose recovery: user-initiated actions
//! surface the error, background refreshes log and retry on the next cycle.
use crate::config::Config;
use crate::credential::{Credential, CredentialStore};
use crate::error::{ClientError, Result};
use crate::types::{
    AuthResponse, Contact, ContactList, DashboardJobs, Job, LoginRequest, Message, NewJob,
    RegisterRequest, UserId,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl ApiClient {
    pub fn new(config: &Config, credentials: Arc<CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(credential) = self.credentials.get() {
            req = req.bearer_auth(credential.token());
        }
        req
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(api_error(status, resp.text().await.ok()));
        }
        Ok(resp.json::<T>().await?)
    }

    async fn execute_ok(&self, req: RequestBuilder) -> Result<()> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(api_error(status, resp.text().await.ok()));
        }
        Ok(())
    }

    // ─── Auth ────────────────────────────────────────────────────────────────

    /// `POST /auth/login`. The returned token is stored as the session
    /// credential before this resolves.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp: AuthResponse = self
            .execute(self.request(Method::POST, "/auth/login").json(&body))
            .await?;
        let credential = Credential::new(resp.token);
        self.credentials.set(credential.clone())?;
        Ok(credential)
    }

    /// `POST /auth/register`. Same token handling as login.
    pub async fn register(&self, form: &RegisterRequest) -> Result<Credential> {
        let resp: AuthResponse = self
            .execute(self.request(Method::POST, "/auth/register").json(form))
            .await?;
        let credential = Credential::new(resp.token);
        self.credentials.set(credential.clone())?;
        Ok(credential)
    }

    // ─── Contacts & messages ────────────────────────────────────────────────

    /// `GET /contacts`
    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        let list: ContactList = self.execute(self.request(Method::GET, "/contacts")).await?;
        Ok(list.contacts)
    }

    /// `POST /contacts/add`: idempotent upsert of a conversation partner.
    pub async fn add_contact(&self, receiver_id: &str) -> Result<()> {
        let body = serde_json::json!({ "receiverId": receiver_id });
        self.execute_ok(self.request(Method::POST, "/contacts/add").json(&body))
            .await
    }

    /// `GET /messages/{selfId}/{contactId}`: full conversation history for
    /// the pair, the authoritative snapshot used by every poll refresh.
    pub async fn messages(&self, self_id: &str, contact_id: &str) -> Result<Vec<Message>> {
        self.execute(
            self.request(Method::GET, &format!("/messages/{}/{}", self_id, contact_id)),
        )
        .await
    }

    /// `POST /messages/send`: persist one message.
    pub async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "senderId": sender_id,
            "receiverId": receiver_id,
            "content": content,
        });
        self.execute_ok(self.request(Method::POST, "/messages/send").json(&body))
            .await
    }

    // ─── Jobs ────────────────────────────────────────────────────────────────

    /// `GET /jobs/dashboard`
    pub async fn dashboard_jobs(&self) -> Result<DashboardJobs> {
        self.execute(self.request(Method::GET, "/jobs/dashboard"))
            .await
    }

    /// `GET /jobs/available`, with the caller's own posts filtered out.
    pub async fn available_jobs(&self, self_id: &str) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = self
            .execute(self.request(Method::GET, "/jobs/available"))
            .await?;
        Ok(jobs
            .into_iter()
            .filter(|job| job.employer.id != self_id)
            .collect())
    }

    /// `GET /users/{id}/applied-jobs`
    pub async fn applied_jobs(&self, user_id: &UserId) -> Result<Vec<Job>> {
        self.execute(self.request(Method::GET, &format!("/users/{}/applied-jobs", user_id)))
            .await
    }

    /// `POST /jobs`. Required fields are checked client-side before any
    /// network call.
    pub async fn post_job(&self, job: &NewJob) -> Result<()> {
        if job.title.trim().is_empty()
            || job.description.trim().is_empty()
            || job.date.trim().is_empty()
            || job.time.trim().is_empty()
            || job.amount <= 0.0
        {
            return Err(ClientError::Validation(
                "Please fill in all required fields.".to_string(),
            ));
        }
        self.execute_ok(self.request(Method::POST, "/jobs").json(job))
            .await
    }

    /// `POST /jobs/{id}/apply`
    pub async fn apply(&self, job_id: &str, comments: &str) -> Result<()> {
        let body = serde_json::json!({ "comments": comments });
        self.execute_ok(
            self.request(Method::POST, &format!("/jobs/{}/apply", job_id))
                .json(&body),
        )
        .await
    }

    /// `POST /jobs/{id}/applications/{applicant}/accept`
    pub async fn accept_applicant(&self, job_id: &str, applicant_id: &str) -> Result<()> {
        self.execute_ok(self.request(
            Method::POST,
            &format!("/jobs/{}/applications/{}/accept", job_id, applicant_id),
        ))
        .await
    }

    /// `POST /jobs/{id}/applications/{applicant}/reject`
    pub async fn reject_applicant(&self, job_id: &str, applicant_id: &str) -> Result<()> {
        self.execute_ok(self.request(
            Method::POST,
            &format!("/jobs/{}/applications/{}/reject", job_id, applicant_id),
        ))
        .await
    }
}

impl crate::conversation::MessageBackend for ApiClient {
    fn fetch_history(
        &self,
        self_id: &str,
        contact_id: &str,
    ) -> futures_util::future::BoxFuture<'_, Result<Vec<Message>>> {
        let this = self.clone();
        let self_id = self_id.to_string();
        let contact_id = contact_id.to_string();
        Box::pin(async move { this.messages(&self_id, &contact_id).await })
    }

    fn persist_message(&self, message: Message) -> futures_util::future::BoxFuture<'_, Result<()>> {
        let this = self.clone();
        Box::pin(async move {
            this.send_message(&message.sender_id, &message.receiver_id, &message.content)
                .await
        })
    }
}

/// Map a non-success response to `ClientError::Api`, pulling the backend's
/// `{"error": ...}` message out of the body when present.
fn api_error(status: StatusCode, body: Option<String>) -> ClientError {
    let message = body
        .as_deref()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
        .and_then(|json| {
            json.get("error")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            debug!("API error response without an error field ({})", status);
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_backend_message() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            Some(r#"{"error":"email already taken"}"#.to_string()),
        );
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "email already taken");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn api_error_falls_back_to_status_reason() {
        let err = api_error(StatusCode::INTERNAL_SERVER_ERROR, Some("<html>".to_string()));
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
