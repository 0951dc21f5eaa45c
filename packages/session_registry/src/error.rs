use crate::registry::SessionId;

/// Errors returned by registry lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No live session is registered under this id
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_session() {
        let err = RegistryError::SessionNotFound(SessionId::from("10.1.2.3:5555"));
        assert_eq!(err.to_string(), "session not found: 10.1.2.3:5555");
    }
}
