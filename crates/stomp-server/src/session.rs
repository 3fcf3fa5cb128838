//! Process-wide login state.
//!
//! Tracks registered credentials and which connection currently holds each
//! login. Credentials are registered on first use and never forgotten while
//! the process runs; a login may be held by at most one live connection.
//!
//! All three maps sit behind one mutex so that "login not held, then take
//! it" is a single atomic step.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

/// Reasons a login attempt is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// Another live connection holds this login
    #[error("User already logged in")]
    AlreadyLoggedIn,

    /// Login is registered with a different passcode
    #[error("Wrong password")]
    WrongPassword,
}

/// Outcome of an accepted login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// First use of this login; its passcode is now registered
    Registered,
    /// Passcode matched an existing registration
    Authenticated,
}

#[derive(Debug, Default)]
struct SessionTable {
    /// Login → passcode
    credentials: HashMap<String, String>,
    /// Connection ID → login
    active_logins: HashMap<u64, String>,
    /// Login → connection ID (reverse index). Enforces one connection per login
    login_connections: HashMap<String, u64>,
}

impl SessionTable {
    fn release(&mut self, connection_id: u64) -> Option<String> {
        let login = self.active_logins.remove(&connection_id)?;
        self.login_connections.remove(&login);
        Some(login)
    }
}

/// Credentials and active logins shared by every connection.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    inner: Mutex<SessionTable>,
}

impl SessionDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `connection_id` in as `login`.
    ///
    /// The duplicate check runs before the password check. On success any
    /// different login previously held by this connection is released.
    pub fn login(
        &self,
        connection_id: u64,
        login: &str,
        passcode: &str,
    ) -> Result<LoginOutcome, LoginError> {
        let mut table = self.inner.lock();

        if table.login_connections.contains_key(login) {
            return Err(LoginError::AlreadyLoggedIn);
        }

        let password_matches = table.credentials.get(login).map(|registered| registered == passcode);
        let outcome = match password_matches {
            Some(false) => return Err(LoginError::WrongPassword),
            Some(true) => LoginOutcome::Authenticated,
            None => {
                table.credentials.insert(login.to_string(), passcode.to_string());
                LoginOutcome::Registered
            },
        };

        table.release(connection_id);
        table.active_logins.insert(connection_id, login.to_string());
        table.login_connections.insert(login.to_string(), connection_id);

        Ok(outcome)
    }

    /// Release whatever login `connection_id` holds. Idempotent.
    pub fn logout(&self, connection_id: u64) -> Option<String> {
        self.inner.lock().release(connection_id)
    }

    /// Login held by a connection.
    pub fn active_login(&self, connection_id: u64) -> Option<String> {
        self.inner.lock().active_logins.get(&connection_id).cloned()
    }

    /// Connection currently holding a login.
    pub fn connection_for(&self, login: &str) -> Option<u64> {
        self.inner.lock().login_connections.get(login).copied()
    }

    /// Check if any connection holds `login`.
    pub fn is_logged_in(&self, login: &str) -> bool {
        self.inner.lock().login_connections.contains_key(login)
    }

    /// Number of connections holding a login.
    pub fn active_count(&self) -> usize {
        self.inner.lock().active_logins.len()
    }

    /// Number of logins with registered credentials.
    pub fn registered_count(&self) -> usize {
        self.inner.lock().credentials.len()
    }
}
