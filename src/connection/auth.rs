//! Authentication strategies for coordinator connections.
//!
//! A strategy is validated once when the connection opens and then decorates
//! every outgoing request with its `Authorization` header.

use crate::error::TrinoError;
use crate::transport::CoordinatorRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::fmt;

/// Pluggable authentication strategy.
///
/// Implementations must not perform network I/O. `validate` is called once
/// per `Connection::open`; `decorate` is called for every request and must
/// leave the request unchanged apart from its `Authorization` header.
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Check that the credential material is usable.
    ///
    /// # Errors
    ///
    /// Returns `TrinoError::InvalidCredential` if required material is
    /// missing, blank, or cannot be sent in an HTTP header.
    fn validate(&self) -> Result<(), TrinoError>;

    /// Attach credentials to an outgoing request.
    ///
    /// # Errors
    ///
    /// Returns `TrinoError::InvalidCredential` if the credential cannot be
    /// rendered as a header value.
    fn decorate(&self, request: &mut CoordinatorRequest) -> Result<(), TrinoError>;
}

/// Bearer (JWT) token authentication.
#[derive(Clone, Default)]
pub struct BearerAuth {
    token: Option<SecureString>,
}

impl BearerAuth {
    /// Create a strategy carrying the given access token.
    ///
    /// Construction never fails; the token is checked by `validate`.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: Some(SecureString::new(access_token.into())),
        }
    }

    /// Create a strategy with no token set.
    pub fn unset() -> Self {
        Self::default()
    }

    /// Replace the access token.
    pub fn set_access_token(&mut self, access_token: impl Into<String>) {
        self.token = Some(SecureString::new(access_token.into()));
    }

    /// Whether a token has been set (it may still be blank).
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn header_value(&self) -> Result<HeaderValue, TrinoError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| TrinoError::InvalidCredential("access token is not set".to_string()))?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str())).map_err(|_| {
            TrinoError::InvalidCredential(
                "access token contains characters not allowed in an HTTP header".to_string(),
            )
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl Authenticator for BearerAuth {
    fn validate(&self) -> Result<(), TrinoError> {
        match &self.token {
            None => Err(TrinoError::InvalidCredential(
                "access token is not set".to_string(),
            )),
            Some(token) if token.as_str().trim().is_empty() => Err(TrinoError::InvalidCredential(
                "access token is empty".to_string(),
            )),
            Some(_) => self.header_value().map(|_| ()),
        }
    }

    fn decorate(&self, request: &mut CoordinatorRequest) -> Result<(), TrinoError> {
        let value = self.header_value()?;
        request.set_header(AUTHORIZATION, value);
        Ok(())
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// HTTP basic authentication with user and password.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: SecureString,
}

impl BasicAuth {
    /// Create new basic credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecureString::new(password.into()),
        }
    }

    /// Get the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    fn header_value(&self) -> Result<HeaderValue, TrinoError> {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password.as_str()));
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(|_| {
            TrinoError::InvalidCredential("basic credentials cannot be encoded".to_string())
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl Authenticator for BasicAuth {
    fn validate(&self) -> Result<(), TrinoError> {
        if self.username.trim().is_empty() {
            return Err(TrinoError::InvalidCredential(
                "username is empty".to_string(),
            ));
        }
        if self.username.contains(':') {
            return Err(TrinoError::InvalidCredential(
                "username must not contain ':'".to_string(),
            ));
        }
        Ok(())
    }

    fn decorate(&self, request: &mut CoordinatorRequest) -> Result<(), TrinoError> {
        let value = self.header_value()?;
        request.set_header(AUTHORIZATION, value);
        Ok(())
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// No authentication; requests are sent without an `Authorization` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn validate(&self) -> Result<(), TrinoError> {
        Ok(())
    }

    fn decorate(&self, _request: &mut CoordinatorRequest) -> Result<(), TrinoError> {
        Ok(())
    }
}

/// Secure string that zeros memory on drop and never displays its contents.
#[derive(Clone)]
struct SecureString {
    data: Vec<u8>,
}

impl SecureString {
    fn new(s: String) -> Self {
        Self {
            data: s.into_bytes(),
        }
    }

    fn as_str(&self) -> &str {
        // Only ever constructed from a `String`
        std::str::from_utf8(&self.data).unwrap_or_default()
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        for byte in &mut self.data {
            *byte = 0;
        }
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(<redacted>)")
    }
}
