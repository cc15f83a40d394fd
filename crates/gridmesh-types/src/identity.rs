//! Identity supplied by the external identity provider.
//!
//! An `Identity` is what the provider hands us after sign-in: a stable id,
//! a display name, optionally an email, and the access token used to
//! authenticate the transport. Unauthenticated sessions have no `Identity`
//! and publish an anonymous presence record keyed by their `ClientId`.

use serde::{Deserialize, Serialize};

/// Display name used when no identity is available.
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// A signed-in user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider-assigned user id.
    pub id: String,
    /// Full display name: "Ada Lovelace".
    pub name: String,
    /// Email, when the provider exposes one. Preferred as the presence key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Bearer token for the collaboration endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            access_token: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// The string peers see as this user's id. Email wins over the provider id
    /// so the same person gets the same color across providers.
    pub fn presence_key(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.presence_key())
    }
}

// ============================================================================
// Tests
// ============================================================================
