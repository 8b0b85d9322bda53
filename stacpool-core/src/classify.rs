//! Driver error classification
//!
//! Decisions are made on the decoded SQLSTATE tag, never on message text.

use std::time::Duration;

use crate::error::{DriverError, ErrorKind, SessionError, SqlState};

pub fn classify(err: &DriverError) -> ErrorKind {
    match err {
        DriverError::Database {
            code: SqlState::UniqueViolation,
            ..
        } => ErrorKind::Conflict,
        DriverError::Database {
            code: SqlState::ForeignKeyViolation,
            ..
        } => ErrorKind::ForeignKeyViolation,
        DriverError::PoolTimedOut { .. } => ErrorKind::PoolExhausted,
        _ => ErrorKind::UnclassifiedDatabaseError,
    }
}

/// Classify and convert to the caller-facing error.
///
/// Unclassified errors are logged here with full detail; the returned
/// [`SessionError::Database`] carries none of it.
pub fn into_session_error(err: DriverError) -> SessionError {
    match classify(&err) {
        ErrorKind::Conflict => {
            tracing::debug!(error = %err, "unique constraint violated");
            SessionError::Conflict
        }
        ErrorKind::ForeignKeyViolation => {
            tracing::debug!(error = %err, "foreign key constraint violated");
            SessionError::ForeignKeyViolation
        }
        ErrorKind::PoolExhausted => {
            let waited = match err {
                DriverError::PoolTimedOut { waited } => waited,
                _ => Duration::ZERO,
            };
            SessionError::PoolExhausted { waited }
        }
        ErrorKind::UnclassifiedDatabaseError => {
            tracing::error!(error = ?err, "unhandled database error");
            SessionError::Database
        }
    }
}

impl From<DriverError> for SessionError {
    fn from(err: DriverError) -> Self {
        into_session_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a debug-level fmt subscriber and return what it logged
    fn logs_of<T>(f: impl FnOnce() -> T) -> (T, String) {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let value = tracing::subscriber::with_default(subscriber, f);
        let logged = String::from_utf8_lossy(&out.0.lock().unwrap()).into_owned();
        (value, logged)
    }

    #[test]
    fn unique_violation_is_conflict() {
        let err = DriverError::database("23505", "duplicate key value");
        assert_eq!(classify(&err), ErrorKind::Conflict);
    }

    #[test]
    fn foreign_key_violation_is_classified() {
        let err = DriverError::database("23503", "violates foreign key constraint");
        assert_eq!(classify(&err), ErrorKind::ForeignKeyViolation);
    }

    #[test]
    fn message_text_is_ignored() {
        // Another integrity error whose message mentions "duplicate"
        let err = DriverError::database("23502", "duplicate-ish null value in column");
        assert_eq!(classify(&err), ErrorKind::UnclassifiedDatabaseError);
    }

    #[test]
    fn pool_timeout_is_exhaustion() {
        let err = DriverError::PoolTimedOut {
            waited: Duration::from_secs(30),
        };
        assert_eq!(classify(&err), ErrorKind::PoolExhausted);
        match into_session_error(err) {
            SessionError::PoolExhausted { waited } => assert_eq!(waited, Duration::from_secs(30)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn everything_else_is_unclassified() {
        for err in [
            DriverError::Connection("reset by peer".into()),
            DriverError::EngineClosed,
            DriverError::Other(anyhow::anyhow!("body failed")),
        ] {
            assert_eq!(classify(&err), ErrorKind::UnclassifiedDatabaseError);
        }
    }

    #[test]
    fn unclassified_error_hides_driver_detail() {
        let err = DriverError::database("42P01", "relation \"secret_table\" does not exist");
        let session_err = into_session_error(err);
        assert!(matches!(session_err, SessionError::Database));
        assert!(!session_err.to_string().contains("secret_table"));
    }

    #[test]
    fn unclassified_error_is_logged_with_full_detail() {
        let err = DriverError::database("42P01", "relation \"secret_table\" does not exist");
        let (session_err, logged) = logs_of(|| into_session_error(err));

        assert!(matches!(session_err, SessionError::Database));
        assert!(logged.contains("ERROR"), "{logged}");
        assert!(logged.contains("unhandled database error"), "{logged}");
        assert!(logged.contains("secret_table"), "{logged}");
        assert!(logged.contains("42P01"), "{logged}");
    }

    #[test]
    fn constraint_violations_log_at_debug_only() {
        let (_, logged) = logs_of(|| {
            into_session_error(DriverError::database("23505", "duplicate key value"))
        });

        assert!(logged.contains("DEBUG"), "{logged}");
        assert!(logged.contains("unique constraint violated"), "{logged}");
        assert!(!logged.contains("ERROR"), "{logged}");
    }
}
