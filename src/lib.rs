//! Async client library for the AnyWork gig-work marketplace backend.
//!
//! The core is the conversation store: it reconciles the authoritative
//! history fetch, a periodic poll refresh, live push events and optimistic
//! local sends into one ordered per-contact timeline. Around it sit the
//! credential store, the session gate, the REST client and the live channel.

pub mod api;
pub mod app;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod credential;
pub mod directory;
pub mod error;
pub mod session;
pub mod types;

pub use api::ApiClient;
pub use channel::{ChannelEvent, LiveChannel, UnreadFlag};
pub use config::Config;
pub use conversation::{ConversationPhase, ConversationStore, MessageBackend, TimelineState};
pub use credential::{Credential, CredentialStore};
pub use directory::ContactDirectory;
pub use error::{ClientError, Result};
pub use session::{guard, is_authenticated, Admission, Destination};
