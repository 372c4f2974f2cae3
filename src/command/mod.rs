//! Command table and the validation pipeline every invocation goes through.
//!
//! Order of checks: unknown command, arity, transaction queueing, script
//! deny list, subscribed-mode restriction, key types, then the handler
//! (which parses the remaining arguments before it mutates anything).

pub mod args;
mod connection;
mod hashes;
mod hll;
mod keys;
mod lists;
mod multi;
mod pubsub;
mod scripting;
mod server;
mod sets;
mod strings;
mod zsets;

pub(crate) use lists::{list_move, list_pop, End};
pub(crate) use zsets::zset_pop;

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use log::trace;

use crate::blocking::WaitOp;
use crate::error::{CommandError, BAD_COMMAND_IN_PUBSUB, COMMAND_IN_SCRIPT};
use crate::reply::Reply;
use crate::server::{ServerState, Shared};
use crate::session::ClientState;
use crate::storage::{Database, ValueKind};

/// Where a command is being run from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Straight from `Session::invoke`.
    Direct,
    /// Replayed by EXEC.
    Exec,
    /// `redis.call` / `redis.pcall` from a script.
    Script,
}

/// Everything a handler may touch. The server lock is held for its lifetime.
pub(crate) struct Ctx<'a> {
    pub state: &'a mut ServerState,
    pub client: &'a mut ClientState,
    pub shared: &'a Shared,
    /// Clock snapshot for the whole invocation.
    pub now: i64,
    pub mode: Mode,
}

impl Ctx<'_> {
    pub fn db(&mut self) -> &mut Database {
        &mut self.state.dbs[self.client.db]
    }

    /// Blocking commands only wait when invoked directly.
    pub fn may_block(&self) -> bool {
        self.mode == Mode::Direct
    }
}

/// Outcome of a handler: a reply now, or a request to park the session.
pub(crate) enum Flow {
    Done(Reply),
    Wait(WaitRequest),
}

pub(crate) struct WaitRequest {
    pub op: WaitOp,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

pub(crate) type SyncHandler = fn(&mut Ctx<'_>, &[Vec<u8>]) -> Result<Reply, CommandError>;
pub(crate) type BlockingHandler = fn(&mut Ctx<'_>, &[Vec<u8>]) -> Result<Flow, CommandError>;

#[derive(Clone, Copy)]
pub(crate) enum Handler {
    Sync(SyncHandler),
    Blocking(BlockingHandler),
}

/// Which arguments are key names.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Keys {
    None,
    /// Arguments `first..len - back`, every `step`-th.
    Range { first: usize, back: usize, step: usize },
}

/// Type requirement applied to the key arguments before the handler runs.
#[derive(Debug, Clone, Copy)]
pub(crate) enum KeyCheck {
    Any,
    /// Every existing key must hold this kind.
    Kind(ValueKind),
    /// Like `Kind`, but the first key is a destination and is not checked.
    AfterFirst(ValueKind),
}

/// Not queued by MULTI.
pub(crate) const TX_CONTROL: u8 = 1;
/// Allowed while the session has subscriptions.
pub(crate) const PUBSUB_OK: u8 = 1 << 1;

pub(crate) struct CommandSpec {
    pub name: &'static str,
    /// Arguments after the name: exactly `fixed`, or `fixed` plus a
    /// non-zero multiple of `repeat`.
    pub fixed: usize,
    pub repeat: usize,
    pub keys: Keys,
    pub check: KeyCheck,
    pub flags: u8,
    pub handler: Handler,
}

impl CommandSpec {
    fn with_handler(name: &'static str, fixed: usize, repeat: usize, handler: Handler) -> Self {
        CommandSpec {
            name,
            fixed,
            repeat,
            keys: Keys::None,
            check: KeyCheck::Any,
            flags: 0,
            handler,
        }
    }

    pub fn sync(name: &'static str, fixed: usize, repeat: usize, handler: SyncHandler) -> Self {
        Self::with_handler(name, fixed, repeat, Handler::Sync(handler))
    }

    pub fn blocking(
        name: &'static str,
        fixed: usize,
        repeat: usize,
        handler: BlockingHandler,
    ) -> Self {
        Self::with_handler(name, fixed, repeat, Handler::Blocking(handler))
    }

    /// First argument is the only key.
    pub fn key(self) -> Self {
        self.keys(0, usize::MAX, 1)
    }

    /// Keys from `first` to the end minus `back`, every `step`.
    /// `back == usize::MAX` means just the `first` argument.
    pub fn keys(mut self, first: usize, back: usize, step: usize) -> Self {
        self.keys = Keys::Range { first, back, step };
        self
    }

    pub fn all_keys(self) -> Self {
        self.keys(0, 0, 1)
    }

    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.check = KeyCheck::Kind(kind);
        self
    }

    pub fn dest_then(mut self, kind: ValueKind) -> Self {
        self.check = KeyCheck::AfterFirst(kind);
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    fn check_arity(&self, args: &[Vec<u8>]) -> Result<(), CommandError> {
        let n = args.len();
        let ok = n == self.fixed
            || (n > self.fixed && self.repeat > 0 && (n - self.fixed) % self.repeat == 0);
        if ok {
            Ok(())
        } else {
            Err(CommandError::arity(self.name))
        }
    }

    /// Positions of the key arguments.
    fn key_positions(&self, len: usize) -> Vec<usize> {
        match self.keys {
            Keys::None => Vec::new(),
            Keys::Range { first, back, .. } if back == usize::MAX => {
                if first < len {
                    vec![first]
                } else {
                    Vec::new()
                }
            }
            Keys::Range { first, back, step } => {
                let last = len.saturating_sub(back);
                (first..last).step_by(step.max(1)).collect()
            }
        }
    }

    fn check_key_types(&self, ctx: &mut Ctx<'_>, args: &[Vec<u8>]) -> Result<(), CommandError> {
        let (kind, skip) = match self.check {
            KeyCheck::Any => return Ok(()),
            KeyCheck::Kind(kind) => (kind, 0),
            KeyCheck::AfterFirst(kind) => (kind, 1),
        };
        let now = ctx.now;
        let db = ctx.db();
        for pos in self.key_positions(args.len()).into_iter().skip(skip) {
            match db.kind_of(&args[pos], now) {
                Some(found) if found != kind => return Err(CommandError::WrongType),
                _ => {}
            }
        }
        Ok(())
    }
}

type Table = HashMap<&'static str, CommandSpec>;

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut specs = Vec::new();
        connection::register(&mut specs);
        keys::register(&mut specs);
        strings::register(&mut specs);
        hashes::register(&mut specs);
        lists::register(&mut specs);
        sets::register(&mut specs);
        zsets::register(&mut specs);
        hll::register(&mut specs);
        server::register(&mut specs);
        multi::register(&mut specs);
        pubsub::register(&mut specs);
        scripting::register(&mut specs);
        specs.into_iter().map(|spec| (spec.name, spec)).collect()
    })
}

pub(crate) fn lookup(name: &str) -> Option<&'static CommandSpec> {
    table().get(name)
}

/// Lower-cased command names, sorted.
pub fn command_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = table().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Full pipeline for one invocation, including MULTI queueing.
pub(crate) fn dispatch(
    ctx: &mut Ctx<'_>,
    name: &[u8],
    args: &[Vec<u8>],
) -> Result<Flow, CommandError> {
    let lower = String::from_utf8_lossy(name).to_ascii_lowercase();
    let queuing = ctx.mode == Mode::Direct && ctx.client.tx.is_active();

    let spec = match lookup(&lower) {
        Some(spec) => spec,
        None => {
            if queuing {
                ctx.client.tx.abort();
            }
            return Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
    };
    if let Err(err) = spec.check_arity(args) {
        if queuing {
            ctx.client.tx.abort();
        }
        return Err(err);
    }

    if queuing && !spec.has(TX_CONTROL) {
        ctx.client.tx.enqueue(spec, args.to_vec());
        return Ok(Flow::Done(Reply::status("QUEUED")));
    }

    run(ctx, spec, args)
}

/// Everything after queueing: deny list, subscribed mode, key types, handler.
pub(crate) fn run(
    ctx: &mut Ctx<'_>,
    spec: &'static CommandSpec,
    args: &[Vec<u8>],
) -> Result<Flow, CommandError> {
    if ctx.mode == Mode::Script && ctx.shared.config.denies_in_script(spec.name) {
        return Err(CommandError::rejected(COMMAND_IN_SCRIPT));
    }
    if !spec.has(PUBSUB_OK) && ctx.state.pubsub.subscription_count(ctx.client.id) > 0 {
        return Err(CommandError::rejected(BAD_COMMAND_IN_PUBSUB));
    }
    spec.check_key_types(ctx, args)?;

    trace!("session {} db {}: {}", ctx.client.id, ctx.client.db, spec.name);
    match spec.handler {
        Handler::Sync(handler) => handler(ctx, args).map(Flow::Done),
        Handler::Blocking(handler) => handler(ctx, args),
    }
}

/// Runs a command whose reply is needed right away (EXEC, scripts); those
/// modes never park the caller.
pub(crate) fn run_now(
    ctx: &mut Ctx<'_>,
    spec: &'static CommandSpec,
    args: &[Vec<u8>],
) -> Result<Reply, CommandError> {
    match run(ctx, spec, args)? {
        Flow::Done(reply) => Ok(reply),
        Flow::Wait(_) => Ok(Reply::Nil),
    }
}

/// Resolves and validates a command issued from inside a script.
pub(crate) fn dispatch_from_script(
    ctx: &mut Ctx<'_>,
    name: &[u8],
    args: &[Vec<u8>],
) -> Result<Reply, CommandError> {
    let lower = String::from_utf8_lossy(name).to_ascii_lowercase();
    let spec = lookup(&lower).ok_or_else(|| {
        CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned())
    })?;
    spec.check_arity(args)?;
    run_now(ctx, spec, args)
}
