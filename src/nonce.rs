//! Replay-nonce bookkeeping.
//!
//! The CA hands out one anti-replay nonce per response (`Replay-Nonce`
//! header) and each signed request consumes exactly one. The keeper holds at
//! most one unconsumed value; the transport takes it when signing and absorbs
//! the replacement from the next response.

/// Holds the single unconsumed replay nonce between signed requests.
#[derive(Debug, Default)]
pub struct NonceKeeper {
    value: Option<String>,
}

impl NonceKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no unconsumed nonce is held and a fresh one must be fetched.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Consumes the held nonce, leaving the keeper empty.
    pub fn take(&mut self) -> Option<String> {
        self.value.take()
    }

    /// Replaces the held nonce.
    pub fn replace(&mut self, nonce: impl Into<String>) {
        self.value = Some(nonce.into());
    }

    /// Absorbs a `Replay-Nonce` header value when the response carried one.
    pub fn absorb(&mut self, header: Option<&str>) {
        if let Some(nonce) = header {
            self.value = Some(nonce.to_string());
        }
    }

    /// Peeks at the held nonce without consuming it.
    pub fn peek(&self) -> Option<&str> {
        self.value.as_deref()
    }
}
