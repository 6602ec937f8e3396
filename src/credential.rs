//! Session credential: the bearer token issued by `/auth/login` and
//! `/auth/register`, plus the process-wide persisted store that owns it.
//!
//! The token is decoded client-side only to learn the subject id and the
//! advisory expiry. The signature is NOT verified here: the client never
//! holds the signing secret; the backend remains the authority and rejects
//! bad tokens on every call.
use crate::error::{ClientError, Result};
use crate::types::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::debug;

/// Payload carried in the backend's JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Subject user id
    id: UserId,
    #[serde(default)]
    iat: Option<u64>,
    #[serde(default)]
    exp: Option<u64>,
}

/// Opaque signed bearer token proving session identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    fn decode(&self) -> Result<Claims> {
        // Expiry is checked separately so an expired token can still report
        // its subject.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        let data =
            jsonwebtoken::decode::<Claims>(&self.0, &DecodingKey::from_secret(&[]), &validation)
                .map_err(|e| ClientError::Auth(format!("Malformed token: {}", e)))?;
        Ok(data.claims)
    }

    /// The user id encoded in the token.
    pub fn subject(&self) -> Result<UserId> {
        Ok(self.decode()?.id)
    }

    /// Whether the token's `exp` claim has passed. Tokens without an expiry
    /// claim are treated as unexpired.
    pub fn is_expired(&self) -> bool {
        match self.decode() {
            Ok(claims) => match claims.exp {
                Some(exp) => chrono::Utc::now().timestamp() as u64 >= exp,
                None => false,
            },
            Err(_) => true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFileV1 {
    version: u8,
    token: String,
}

fn credential_path(data_dir: &Path) -> PathBuf {
    data_dir.join("credential.json")
}

/// Process-wide credential store.
///
/// Holds the current session credential, persists it under the data
/// directory, and broadcasts changes so long-lived components (live channel,
/// screens) can react to login/logout. Initialized empty when no file exists;
/// there is no expiry sweep, so a stale credential stays present until the
/// backend rejects it or `clear` is called.
pub struct CredentialStore {
    path: PathBuf,
    current: watch::Sender<Option<Credential>>,
}

impl CredentialStore {
    /// Open the store, loading any previously persisted credential.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = credential_path(data_dir);

        let initial = match fs::read_to_string(&path) {
            Ok(raw) => {
                let parsed: CredentialFileV1 = serde_json::from_str(&raw)?;
                if parsed.version != 1 {
                    return Err(ClientError::Config(format!(
                        "Unsupported credential file version: {}",
                        parsed.version
                    )));
                }
                Some(Credential::new(parsed.token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(ClientError::Io(e)),
        };

        let (tx, _) = watch::channel(initial);
        Ok(Self { path, current: tx })
    }

    /// Current credential, if any. Absence means logged out.
    pub fn get(&self) -> Option<Credential> {
        self.current.borrow().clone()
    }

    /// Store a new credential (on successful login/registration) and notify
    /// subscribers.
    pub fn set(&self, credential: Credential) -> Result<()> {
        let file = CredentialFileV1 {
            version: 1,
            token: credential.token().to_string(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, json)?;

        // Best-effort file permissions (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        self.current.send_replace(Some(credential));
        Ok(())
    }

    /// Drop the credential (logout) and notify subscribers.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ClientError::Io(e)),
        }
        debug!("Credential cleared");
        self.current.send_replace(None);
        Ok(())
    }

    /// Subscribe to login/logout transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.current.subscribe()
    }
}
