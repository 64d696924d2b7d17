//! Authorization capability presented to every remote call
//!
//! Token acquisition and refresh happen outside this crate. The engine only
//! carries the capability through to the transport and never inspects it.

use std::fmt;
use std::sync::Arc;

/// An opaque, already-authorized bearer credential
///
/// Cheap to clone; `Debug` output never includes the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    token: Arc<str>,
}

impl Authorization {
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self {
            token: Arc::from(token.as_ref()),
        }
    }

    /// Value for the `Authorization` HTTP header
    pub(crate) fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let auth = Authorization::bearer("ya29.secret");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("secret"));
        assert_eq!(auth.header_value(), "Bearer ya29.secret");
    }
}
