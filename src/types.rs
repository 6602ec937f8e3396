//! Shared wire types for the AnyWork backend
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend user ids are opaque strings (`_id` on the wire).
pub type UserId = String;

/// One chat message. Immutable once created; the same shape is used for
/// server-confirmed history entries and locally optimistic sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A conversation partner. Materialized server-side the first time any
/// message is exchanged with that user (via `POST /contacts/add`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub contact_id: UserId,
    pub name: String,
    #[serde(default)]
    pub last_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContactList {
    pub contacts: Vec<Contact>,
}

/// Login/registration response: an opaque signed bearer token.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub age: u32,
    pub username: String,
    pub email: String,
    pub password: String,
}

// ─── Job domain ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

/// The backend populates `applicants[].user` with a full profile on posted
/// jobs but leaves it as a bare id on applied jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(UserId),
    Profile(UserProfile),
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Profile(p) => &p.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applicant {
    pub user: UserRef,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: f64,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    pub employer: UserProfile,
    #[serde(default)]
    pub applicants: Vec<Applicant>,
}

/// Payload for `POST /jobs` (the post-work form).
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewJob {
    pub title: String,
    pub description: String,
    pub amount: f64,
    pub date: String,
    pub time: String,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// `GET /jobs/dashboard` response: jobs the user applied to plus jobs the
/// user posted (with their applicant lists).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardJobs {
    pub applied_jobs: Vec<Job>,
    pub posted_jobs: Vec<Job>,
}
