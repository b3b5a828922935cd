use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corrupt,
    VersionUnsupported,
    Schema,
    OutOfPool,
    Budget,
    Interrupted,
    Config,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn corrupt(context: impl Into<String>) -> Self {
        Error { kind: ErrorKind::Corrupt, context: context.into() }
    }

    pub fn schema(context: impl Into<String>) -> Self {
        Error { kind: ErrorKind::Schema, context: context.into() }
    }

    pub fn config(context: impl Into<String>) -> Self {
        Error { kind: ErrorKind::Config, context: context.into() }
    }

    pub fn interrupted() -> Self {
        Error { kind: ErrorKind::Interrupted, context: "operation interrupted".to_string() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Schema,
            context: format!("json: {}", err),
        }
    }
}

impl From<fst::Error> for Error {
    fn from(err: fst::Error) -> Self {
        Error {
            kind: ErrorKind::Config,
            context: format!("exception trie: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
