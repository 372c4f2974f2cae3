//! In-process emulation of a Redis-compatible server.
//!
//! ```no_run
//! # async fn demo() -> Result<(), redust_emu::CommandError> {
//! let server = redust_emu::Server::new();
//! let mut session = server.open_session();
//! session.invoke("SET", ["greeting", "hello"]).await?;
//! let reply = session.invoke("GET", ["greeting"]).await?;
//! assert_eq!(reply.as_bytes(), Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```

mod blocking;
mod command;
pub mod config;
mod dump;
pub mod error;
mod expiry;
pub mod glob;
pub mod hyperloglog;
pub mod pubsub;
pub mod reply;
pub mod scripting;
pub mod server;
pub mod session;
pub mod storage;
mod transaction;
pub mod zset;

pub use command::command_names;
pub use config::{init_logging, ServerConfig};
pub use error::CommandError;
pub use pubsub::Message;
pub use reply::Reply;
pub use scripting::{LuaExecutor, ScriptExecutor, ScriptHost, ScriptSource};
pub use server::{Server, ServerBuilder};
pub use session::Session;
