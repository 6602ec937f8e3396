//! Session gate: decides which screens are reachable with the current
//! credential. Pure decision logic; the caller performs the redirect.
use crate::credential::CredentialStore;

/// The client's screens, mirroring the backend's route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Public entry screen (login/registration)
    Home,
    /// Catch-all for unknown routes
    NotFound,
    Welcome,
    PostWork,
    FindWork,
    Dashboard,
    Messages,
}

impl Destination {
    /// Everything except the entry screen and the catch-all requires a
    /// session.
    pub fn is_protected(&self) -> bool {
        !matches!(self, Destination::Home | Destination::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit(Destination),
    Redirect(Destination),
}

/// True iff a credential is present. Deliberately does not validate the
/// signature or expiry; the backend rejects stale tokens on first use.
pub fn is_authenticated(credentials: &CredentialStore) -> bool {
    credentials
        .get()
        .map(|c| !c.token().is_empty())
        .unwrap_or(false)
}

/// Admit or redirect a navigation request. Protected destinations require a
/// present credential; the redirect target is always the public entry screen.
pub fn guard(destination: Destination, credentials: &CredentialStore) -> Admission {
    if destination.is_protected() && !is_authenticated(credentials) {
        Admission::Redirect(Destination::Home)
    } else {
        Admission::Admit(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;

    fn empty_store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn protected_destinations_redirect_without_credential() {
        let (_dir, store) = empty_store();
        assert!(!is_authenticated(&store));

        for dest in [
            Destination::Welcome,
            Destination::PostWork,
            Destination::FindWork,
            Destination::Dashboard,
            Destination::Messages,
        ] {
            assert_eq!(guard(dest, &store), Admission::Redirect(Destination::Home));
        }
    }

    #[test]
    fn public_destinations_always_admit() {
        let (_dir, store) = empty_store();
        assert_eq!(
            guard(Destination::Home, &store),
            Admission::Admit(Destination::Home)
        );
        assert_eq!(
            guard(Destination::NotFound, &store),
            Admission::Admit(Destination::NotFound)
        );
    }

    #[test]
    fn credential_admits_and_logout_redirects_again() {
        let (_dir, store) = empty_store();
        store.set(Credential::new("token")).unwrap();
        assert_eq!(
            guard(Destination::Dashboard, &store),
            Admission::Admit(Destination::Dashboard)
        );

        store.clear().unwrap();
        assert_eq!(
            guard(Destination::Dashboard, &store),
            Admission::Redirect(Destination::Home)
        );
    }
}
