//! Command error taxonomy.
//!
//! `Display` of every variant is the exact message a Redis client sees, so
//! callers can compare against real-server error strings directly.

use thiserror::Error;

pub const SYNTAX_ERROR: &str = "ERR syntax error";
pub const INVALID_INT: &str = "ERR value is not an integer or out of range";
pub const INVALID_FLOAT: &str = "ERR value is not a valid float";
pub const INVALID_OFFSET: &str = "ERR offset is out of range";
pub const INVALID_BIT_OFFSET: &str = "ERR bit offset is not an integer or out of range";
pub const INVALID_BIT_VALUE: &str = "ERR bit is not an integer or out of range";
pub const INVALID_DB: &str = "ERR DB index is out of range";
pub const INVALID_MIN_MAX_FLOAT: &str = "ERR min or max is not a float";
pub const INVALID_MIN_MAX_STR: &str = "ERR min or max not a valid string range item";
pub const STRING_OVERFLOW: &str = "ERR string exceeds maximum allowed size (512MB)";
pub const OVERFLOW: &str = "ERR increment or decrement would overflow";
pub const NONFINITE: &str = "ERR increment would produce NaN or Infinity";
pub const SCORE_NAN: &str = "ERR resulting score is not a number (NaN)";
pub const INVALID_SORT_FLOAT: &str = "ERR One or more scores can't be converted into double";
pub const SRC_DST_SAME: &str = "ERR source and destination objects are the same";
pub const NO_KEY: &str = "ERR no such key";
pub const INDEX_OUT_OF_RANGE: &str = "ERR index out of range";
pub const VALUE_OUT_OF_RANGE: &str = "ERR value is out of range, must be positive";
pub const ZADD_NX_XX: &str = "ERR ZADD allows either 'nx' or 'xx', not both";
pub const ZADD_INCR_LEN: &str = "ERR INCR option supports a single increment-element pair";
pub const ZUNIONSTORE_KEYS: &str =
    "ERR at least 1 input key is needed for ZUNIONSTORE/ZINTERSTORE";
pub const MULTI_NESTED: &str = "ERR MULTI calls can not be nested";
pub const WATCH_INSIDE_MULTI: &str = "ERR WATCH inside MULTI is not allowed";
pub const NEGATIVE_KEYS: &str = "ERR Number of keys can't be negative";
pub const TOO_MANY_KEYS: &str = "ERR Number of keys can't be greater than number of args";
pub const TIMEOUT_NEGATIVE: &str = "ERR timeout is negative";
pub const TIMEOUT_NOT_FLOAT: &str = "ERR timeout is not a float or out of range";
pub const TIMEOUT_OUT_OF_RANGE: &str = "ERR timeout is out of range";
pub const NO_MATCHING_SCRIPT: &str = "NOSCRIPT No matching script. Please use EVAL.";
pub const COMMAND_IN_SCRIPT: &str = "ERR This Redis command is not allowed from scripts";
pub const BAD_COMMAND_IN_PUBSUB: &str =
    "ERR only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT allowed in this context";
pub const CONNECTION_LOST: &str = "Redust is emulating a connection error.";
pub const LUA_COMMAND_ARG: &str = "ERR Lua redis() command arguments must be strings or integers";
pub const LUA_WRONG_NUMBER_ARGS: &str = "ERR wrong number or type of arguments";
pub const LOG_INVALID_LEVEL: &str = "ERR Invalid debug level.";
pub const RESTORE_KEY_EXISTS: &str = "BUSYKEY Target key name already exists.";
pub const RESTORE_INVALID_CHECKSUM: &str = "ERR DUMP payload version or checksum are wrong";
pub const RESTORE_INVALID_TTL: &str = "ERR Invalid TTL value, must be >= 0";

/// Everything a command invocation can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Carries the lower-cased command name.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Integer/float/syntax/range failures while parsing arguments or stored values.
    #[error("{0}")]
    MalformedArgument(String),

    #[error("{0}")]
    Connection(String),

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    TransactionAborted,

    #[error("ERR Error running script (call to f_{sha}): @user_script:?: {message}")]
    Script { sha: String, message: String },

    /// Any other refusal by the server (no such key, NOSCRIPT, BUSYKEY, ...).
    #[error("{0}")]
    Rejected(String),
}

impl CommandError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        CommandError::MalformedArgument(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        CommandError::Rejected(msg.into())
    }

    pub fn syntax() -> Self {
        CommandError::malformed(SYNTAX_ERROR)
    }

    pub fn invalid_int() -> Self {
        CommandError::malformed(INVALID_INT)
    }

    pub fn invalid_float() -> Self {
        CommandError::malformed(INVALID_FLOAT)
    }

    pub fn arity(name: &str) -> Self {
        CommandError::WrongArity(name.to_ascii_lowercase())
    }

    pub fn bad_subcommand(command: &str) -> Self {
        CommandError::rejected(format!(
            "ERR Unknown {} subcommand or wrong # of args.",
            command
        ))
    }

    pub fn connection_lost() -> Self {
        CommandError::Connection(CONNECTION_LOST.to_string())
    }

    /// Leading error code of the message, e.g. `ERR`, `WRONGTYPE`, `NOSCRIPT`.
    pub fn kind(&self) -> String {
        let message = self.to_string();
        match message.split_once(' ') {
            Some((code, _)) if code.chars().all(|c| c.is_ascii_uppercase()) => code.to_string(),
            _ => "ERR".to_string(),
        }
    }
}
