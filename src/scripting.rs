//! Script cache and the executor seam behind EVAL/EVALSHA.
//!
//! The engine never runs Lua itself: it hands the script to a
//! [`ScriptExecutor`] together with a [`ScriptHost`] that re-enters the
//! command pipeline for the calling session. [`LuaExecutor`] is the default
//! executor, built on `mlua`.

use std::cell::RefCell;

use dashmap::DashMap;
use log::{debug, info, warn};
use mlua::{Lua, MultiValue, Table, Value};
use sha1::{Digest, Sha1};

use crate::error::{CommandError, LOG_INVALID_LEVEL, LUA_COMMAND_ARG, LUA_WRONG_NUMBER_ARGS};
use crate::reply::Reply;

/// Script cache: SHA1 -> script source
pub struct ScriptCache {
    scripts: DashMap<String, Vec<u8>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
        }
    }

    /// Lower-case hex SHA1 of a script body
    pub fn compute_sha1(script: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(script);
        hex::encode(hasher.finalize())
    }

    /// Load a script into the cache, returns its SHA1
    pub fn load(&self, script: &[u8]) -> String {
        let sha1 = Self::compute_sha1(script);
        self.scripts.insert(sha1.clone(), script.to_vec());
        sha1
    }

    pub fn get(&self, sha1: &str) -> Option<Vec<u8>> {
        self.scripts.get(sha1).map(|v| v.clone())
    }

    pub fn exists(&self, sha1: &str) -> bool {
        self.scripts.contains_key(sha1)
    }

    pub fn flush(&self) {
        self.scripts.clear();
    }
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The script being run.
#[derive(Debug, Clone, Copy)]
pub struct ScriptSource<'a> {
    pub sha: &'a str,
    pub body: &'a [u8],
}

/// Runs commands on behalf of a script, as the session that called EVAL.
pub trait ScriptHost {
    fn call(&mut self, command: &[u8], args: Vec<Vec<u8>>) -> Result<Reply, CommandError>;
}

/// Pluggable script runtime.
///
/// Errors the script raises should come back as
/// [`CommandError::Script`]; a top-level `Reply::Error` is turned into an
/// error by the engine.
pub trait ScriptExecutor: Send + Sync {
    fn execute(
        &self,
        script: ScriptSource<'_>,
        keys: &[Vec<u8>],
        args: &[Vec<u8>],
        host: &mut dyn ScriptHost,
    ) -> Result<Reply, CommandError>;
}

/// Lua 5.4 executor. Every execution gets a fresh interpreter.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaExecutor;

impl LuaExecutor {
    pub fn new() -> Self {
        LuaExecutor
    }
}

const LOG_DEBUG: i64 = 0;
const LOG_VERBOSE: i64 = 1;
const LOG_NOTICE: i64 = 2;
const LOG_WARNING: i64 = 3;

/// Forbids globals once the environment is set up.
const PROTECT_GLOBALS: &str = r#"
setmetatable(_G, {
    __newindex = function(_, name)
        error("Script attempted to create global variable '" .. tostring(name) .. "'", 2)
    end,
    __index = function(_, name)
        error("Script attempted to access nonexistent global variable '" .. tostring(name) .. "'", 2)
    end,
})
"#;

impl ScriptExecutor for LuaExecutor {
    fn execute(
        &self,
        script: ScriptSource<'_>,
        keys: &[Vec<u8>],
        args: &[Vec<u8>],
        host: &mut dyn ScriptHost,
    ) -> Result<Reply, CommandError> {
        let fail = |e: mlua::Error| {
            let message = error_message(&e);
            warn!("script {} failed: {}", script.sha, message);
            CommandError::Script {
                sha: script.sha.to_string(),
                message,
            }
        };

        let lua = Lua::new();
        prepare(&lua, keys, args).map_err(fail)?;

        let host = RefCell::new(host);
        lua.scope(|scope| {
            let redis: Table = lua.globals().get("redis")?;
            let call = scope.create_function(|lua, args: MultiValue| redis_call(lua, &host, args, false))?;
            let pcall = scope.create_function(|lua, args: MultiValue| redis_call(lua, &host, args, true))?;
            redis.set("call", call)?;
            redis.set("pcall", pcall)?;
            lua.load(PROTECT_GLOBALS).exec()?;

            let value: Value = lua.load(script.body).set_name("@user_script").eval()?;
            lua_to_reply(value)
        })
        .map_err(fail)
    }
}

/// KEYS, ARGV and the `redis` table minus call/pcall, which need the host.
fn prepare(lua: &Lua, keys: &[Vec<u8>], args: &[Vec<u8>]) -> mlua::Result<()> {
    let globals = lua.globals();

    let keys_table = lua.create_table()?;
    for (i, key) in keys.iter().enumerate() {
        keys_table.set(i + 1, lua.create_string(key)?)?;
    }
    globals.set("KEYS", keys_table)?;

    let argv_table = lua.create_table()?;
    for (i, arg) in args.iter().enumerate() {
        argv_table.set(i + 1, lua.create_string(arg)?)?;
    }
    globals.set("ARGV", argv_table)?;

    let redis = lua.create_table()?;
    redis.set(
        "status_reply",
        lua.create_function(|lua, status: mlua::String| {
            let table = lua.create_table()?;
            table.set("ok", status)?;
            Ok(table)
        })?,
    )?;
    redis.set(
        "error_reply",
        lua.create_function(|lua, message: mlua::String| {
            let table = lua.create_table()?;
            table.set("err", message)?;
            Ok(table)
        })?,
    )?;
    redis.set(
        "log",
        lua.create_function(|_, (level, parts): (i64, MultiValue)| {
            let message = parts
                .iter()
                .map(|v| match v {
                    Value::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                    other => format!("{:?}", other),
                })
                .collect::<Vec<_>>()
                .join(" ");
            match level {
                LOG_DEBUG => debug!("script: {}", message),
                LOG_VERBOSE | LOG_NOTICE => info!("script: {}", message),
                LOG_WARNING => warn!("script: {}", message),
                _ => return Err(mlua::Error::RuntimeError(LOG_INVALID_LEVEL.to_string())),
            }
            Ok(())
        })?,
    )?;
    redis.set("LOG_DEBUG", LOG_DEBUG)?;
    redis.set("LOG_VERBOSE", LOG_VERBOSE)?;
    redis.set("LOG_NOTICE", LOG_NOTICE)?;
    redis.set("LOG_WARNING", LOG_WARNING)?;
    globals.set("redis", redis)?;
    Ok(())
}

/// `redis.call` raises on error; `redis.pcall` returns `{err = ...}`.
fn redis_call<'lua>(
    lua: &'lua Lua,
    host: &RefCell<&mut dyn ScriptHost>,
    args: MultiValue<'lua>,
    protected: bool,
) -> mlua::Result<Value<'lua>> {
    let mut words: Vec<Vec<u8>> = Vec::with_capacity(args.len());
    for v in args {
        match v {
            Value::String(s) => words.push(s.as_bytes().to_vec()),
            Value::Integer(n) => words.push(n.to_string().into_bytes()),
            Value::Number(n) => {
                let s = if n.fract() == 0.0 {
                    format!("{:.0}", n)
                } else {
                    n.to_string()
                };
                words.push(s.into_bytes());
            }
            _ => return make_error(lua, LUA_COMMAND_ARG, protected),
        }
    }
    if words.is_empty() {
        return make_error(lua, LUA_WRONG_NUMBER_ARGS, protected);
    }
    let name = words.remove(0);

    let result = host.borrow_mut().call(&name, words);
    match result {
        Ok(reply) => reply_to_lua(lua, reply),
        Err(err) => make_error(lua, &err.to_string(), protected),
    }
}

/// Create an error value (raises for call, returns table for pcall)
fn make_error<'lua>(lua: &'lua Lua, msg: &str, protected: bool) -> mlua::Result<Value<'lua>> {
    if protected {
        let err_table = lua.create_table()?;
        err_table.set("err", msg)?;
        Ok(Value::Table(err_table))
    } else {
        Err(mlua::Error::RuntimeError(msg.to_string()))
    }
}

/// Nil replies become `false` so they keep their slot in Lua tables.
fn reply_to_lua(lua: &Lua, reply: Reply) -> mlua::Result<Value<'_>> {
    match reply {
        Reply::Nil => Ok(Value::Boolean(false)),
        Reply::Integer(n) => Ok(Value::Integer(n)),
        Reply::Bulk(b) => Ok(Value::String(lua.create_string(&b)?)),
        Reply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                table.set(i + 1, reply_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        Reply::Status(s) => {
            let table = lua.create_table()?;
            table.set("ok", s)?;
            Ok(Value::Table(table))
        }
        Reply::Error(e) => {
            let table = lua.create_table()?;
            table.set("err", e.to_string())?;
            Ok(Value::Table(table))
        }
    }
}

fn lua_to_reply(value: Value<'_>) -> mlua::Result<Reply> {
    Ok(match value {
        Value::Nil => Reply::Nil,
        // Redis Lua: false -> nil, true -> 1
        Value::Boolean(true) => Reply::Integer(1),
        Value::Boolean(false) => Reply::Nil,
        Value::Integer(n) => Reply::Integer(n),
        // floats are truncated
        Value::Number(n) => Reply::Integer(n as i64),
        Value::String(s) => Reply::Bulk(s.as_bytes().to_vec()),
        Value::Table(t) => {
            if let Ok(Value::String(err)) = t.raw_get::<_, Value>("err") {
                let message = String::from_utf8_lossy(err.as_bytes()).into_owned();
                return Ok(Reply::Error(CommandError::rejected(message)));
            }
            if let Ok(Value::String(ok)) = t.raw_get::<_, Value>("ok") {
                return Ok(Reply::Status(String::from_utf8_lossy(ok.as_bytes()).into_owned()));
            }
            let mut items = Vec::new();
            for i in 1.. {
                match t.raw_get::<_, Value>(i)? {
                    Value::Nil => break,
                    v => items.push(lua_to_reply(v)?),
                }
            }
            Reply::Array(items)
        }
        _ => Reply::Nil,
    })
}

/// The innermost message of an mlua error, without wrapper noise.
fn error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::ExternalError(e) => e.to_string(),
        other => other.to_string(),
    }
}
