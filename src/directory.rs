//! Contact directory: the list of known conversation partners shown in the
//! messaging sidebar, fetched once per screen mount and upserted when a
//! conversation is started from job-application context.
use crate::api::ApiClient;
use crate::error::Result;
use crate::types::Contact;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub struct ContactDirectory {
    api: Arc<ApiClient>,
    cached: RwLock<Vec<Contact>>,
}

impl ContactDirectory {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            cached: RwLock::new(Vec::new()),
        }
    }

    /// Re-fetch the directory. A background failure keeps the previous cache
    /// and is logged rather than surfaced.
    pub async fn refresh(&self) {
        match self.api.contacts().await {
            Ok(contacts) => *self.cached.write().await = contacts,
            Err(e) => warn!("Failed to refresh contacts: {}", e),
        }
    }

    /// Current directory snapshot.
    pub async fn list(&self) -> Vec<Contact> {
        self.cached.read().await.clone()
    }

    /// Look a contact up by id or (case-insensitive) name.
    pub async fn find(&self, key: &str) -> Option<Contact> {
        self.cached
            .read()
            .await
            .iter()
            .find(|c| c.contact_id == key || c.name.eq_ignore_ascii_case(key))
            .cloned()
    }

    /// Idempotent upsert of a conversation partner. Must succeed before
    /// navigation into messaging proceeds, so the error propagates; the
    /// cache is refreshed on success.
    pub async fn add_contact(&self, receiver_id: &str) -> Result<()> {
        self.api.add_contact(receiver_id).await?;
        self.refresh().await;
        Ok(())
    }
}
