use crate::error::CommandError;

/// Typed reply of a command invocation.
///
/// Errors normally travel in the `Err` side of `Result<Reply, CommandError>`;
/// `Reply::Error` only appears nested, e.g. inside an EXEC result array or a
/// table returned from a script.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Status(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
    Error(CommandError),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn status(s: &str) -> Self {
        Reply::Status(s.to_string())
    }

    pub fn bulk(b: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(b.into())
    }

    pub fn from_bool(b: bool) -> Self {
        Reply::Integer(if b { 1 } else { 0 })
    }

    pub fn from_usize(n: usize) -> Self {
        Reply::Integer(n as i64)
    }

    pub fn bulk_or_nil(value: Option<Vec<u8>>) -> Self {
        match value {
            Some(v) => Reply::Bulk(v),
            None => Reply::Nil,
        }
    }

    pub fn bulks<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Reply::Array(items.into_iter().map(|b| Reply::Bulk(b.into())).collect())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(b) => Some(b),
            Reply::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err)
    }
}

impl From<Result<Reply, CommandError>> for Reply {
    fn from(result: Result<Reply, CommandError>) -> Self {
        result.unwrap_or_else(Reply::Error)
    }
}
