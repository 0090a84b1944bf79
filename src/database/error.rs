use thiserror::Error;

/// Classified database error kinds.
///
/// Unique-constraint violations are surfaced as their own kind (with the
/// violated constraint name when the driver reports one) because the payment
/// store relies on the `payments.idempotency_key` uniqueness to win or lose
/// creation races, and callers must be able to tell that apart from a real
/// fault.
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Row lookup came back empty where a row was required.
    NotFound { entity: String, id: String },
    /// Unique constraint violation (sqlstate 23505).
    UniqueViolation { constraint: Option<String> },
    /// Connection-level failure (pool exhausted, network, TLS).
    Connection { message: String },
    /// Anything else the driver reported.
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{}", self.message())]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DatabaseErrorKind::UniqueViolation {
                        constraint: db_err.constraint().map(|c| c.to_string()),
                    }
                } else {
                    DatabaseErrorKind::Unknown {
                        message: db_err.to_string(),
                    }
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    /// True when the violated constraint is the one named, or when the driver
    /// did not report a constraint at all (some poolers strip it).
    pub fn violates_constraint(&self, name: &str) -> bool {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => {
                constraint.as_deref().map_or(true, |c| c == name)
            }
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    fn message(&self) -> String {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                if id.is_empty() {
                    format!("{} not found", entity)
                } else {
                    format!("{} '{}' not found", entity, id)
                }
            }
            DatabaseErrorKind::UniqueViolation { constraint } => match constraint {
                Some(c) => format!("unique constraint '{}' violated", c),
                None => "unique constraint violated".to_string(),
            },
            DatabaseErrorKind::Connection { message } => {
                format!("database connection error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
        }
    }
}
