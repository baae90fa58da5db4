use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which script of a migration was being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("upwards"),
            Direction::Down => f.write_str("downwards"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid sql dialect '{0}'")]
    UnsupportedDialect(String),

    #[error("current migration '{0}' not found, check your config file")]
    MissingMigration(String),

    #[error("failed to execute migration '{id}' {direction}: {message}")]
    Script {
        id: String,
        direction: Direction,
        message: String,
        code: Option<i32>,
    },

    #[error("database error: {message}")]
    Database { message: String, code: Option<i32> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a `Database` error without a driver code.
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database {
            message: message.into(),
            code: None,
        }
    }

    /// The driver's numeric error code, when the failure came from the database.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Script { code, .. } | Error::Database { code, .. } => *code,
            _ => None,
        }
    }

    /// Integer status for this failure: the driver code when there is a
    /// usable one, otherwise `1`. Never `0`.
    pub fn status_code(&self) -> i32 {
        match self.code() {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, Error};

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("table name cannot be empty".into());
        assert_eq!(
            e.to_string(),
            "configuration error: table name cannot be empty"
        );

        let e = Error::UnsupportedDialect("MYSQL".into());
        assert_eq!(e.to_string(), "invalid sql dialect 'MYSQL'");

        let e = Error::MissingMigration("0003".into());
        assert_eq!(
            e.to_string(),
            "current migration '0003' not found, check your config file"
        );

        let e = Error::Script {
            id: "0001".into(),
            direction: Direction::Down,
            message: "no such table: users".into(),
            code: Some(1),
        };
        assert_eq!(
            e.to_string(),
            "failed to execute migration '0001' downwards: no such table: users"
        );

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }

    #[test]
    fn status_code_prefers_driver_code() {
        let e = Error::Database {
            message: "constraint failed".into(),
            code: Some(1555),
        };
        assert_eq!(e.status_code(), 1555);

        let e = Error::Script {
            id: "0001".into(),
            direction: Direction::Up,
            message: "syntax error".into(),
            code: None,
        };
        assert_eq!(e.status_code(), 1);
    }

    #[test]
    fn status_code_is_never_zero() {
        let e = Error::Database {
            message: "odd driver".into(),
            code: Some(0),
        };
        assert_eq!(e.status_code(), 1);
        assert_eq!(Error::MissingMigration("x".into()).status_code(), 1);
        assert_eq!(Error::database("boom").status_code(), 1);
    }
}
