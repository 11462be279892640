//! The authentication sub-state machine and SASL PLAIN/LOGIN decoding.
//!
//! Authentication state lives beside the envelope but has its own lifecycle:
//! it survives `RSET` and post-DATA resets, and is only cleared when a login
//! attempt fails or is aborted.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// base64 of `Username:`, the first LOGIN prompt.
pub const USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
/// base64 of `Password:`, the second LOGIN prompt.
pub const PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum AuthState {
    /// No login in progress.
    Normal,
    /// A multi-round exchange is running; the next raw line is a continuation.
    Authenticating,
    /// Credentials were confirmed by the policy hook.
    Authenticated,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Mechanism {
    Plain,
    Login,
}

impl Mechanism {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Mechanism::Plain),
            "LOGIN" => Some(Mechanism::Login),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Authentication {
    pub state: AuthState,
    pub mechanism: Option<Mechanism>,
    /// The identity claimed by the client, once known.
    pub username: Option<String>,
    pub authenticated: bool,
}

impl Default for Authentication {
    fn default() -> Self {
        Authentication {
            state: AuthState::Normal,
            mechanism: None,
            username: None,
            authenticated: false,
        }
    }
}

impl Authentication {
    /// Enters a continuation exchange for `mechanism`.
    pub fn begin(&mut self, mechanism: Mechanism) {
        self.state = AuthState::Authenticating;
        self.mechanism = Some(mechanism);
        self.username = None;
    }

    pub fn succeed(&mut self, username: String) {
        self.state = AuthState::Authenticated;
        self.mechanism = None;
        self.username = Some(username);
        self.authenticated = true;
    }

    /// Drops every trace of the attempt and returns to `Normal`.
    pub fn fail(&mut self) {
        *self = Authentication::default();
    }

    pub fn is_authenticating(&self) -> bool {
        self.state == AuthState::Authenticating
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct DecodeError;

/// Decodes a SASL PLAIN response into `(username, password)`.
///
/// The decoded form is `authzid NUL authcid NUL password`; the authentication
/// identity wins over the authorization identity when both are present.
pub fn decode_plain(payload: &str) -> Result<(String, String), DecodeError> {
    let decoded = decode_base64(payload)?;
    let mut parts = decoded.split('\0');
    let authzid = parts.next().unwrap_or_default();
    let authcid = parts.next().unwrap_or_default();
    let password = parts.next().unwrap_or_default();

    let username = if authcid.is_empty() { authzid } else { authcid };
    Ok((username.to_string(), password.to_string()))
}

/// Decodes one LOGIN continuation line (username or password).
pub fn decode_login(line: &str) -> Result<String, DecodeError> {
    decode_base64(line)
}

fn decode_base64(input: &str) -> Result<String, DecodeError> {
    let bytes = STANDARD.decode(input.trim()).map_err(|_| DecodeError)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
