use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one instance of the watch service. Rotates every restart so
/// clients can tell a reconnect to the same process from a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_per_instance() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
