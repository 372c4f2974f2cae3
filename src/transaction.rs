//! Per-session MULTI/EXEC state and WATCH bookkeeping.

use crate::command::CommandSpec;
use crate::storage::{Database, Key, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum TxState {
    #[default]
    Normal,
    Queuing,
    /// A queued command failed validation; EXEC will answer EXECABORT.
    Aborted,
}

pub(crate) struct QueuedCommand {
    pub spec: &'static CommandSpec,
    pub args: Vec<Vec<u8>>,
}

/// A watched key and the version it had when WATCH ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Watch {
    pub db: usize,
    pub key: Key,
    pub version: u64,
}

#[derive(Default)]
pub(crate) struct Transaction {
    state: TxState,
    queue: Vec<QueuedCommand>,
    watches: Vec<Watch>,
}

impl Transaction {
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Inside MULTI, aborted or not.
    pub fn is_active(&self) -> bool {
        self.state != TxState::Normal
    }

    pub fn begin(&mut self) {
        self.state = TxState::Queuing;
        self.queue.clear();
    }

    pub fn abort(&mut self) {
        if self.state == TxState::Queuing {
            self.state = TxState::Aborted;
        }
    }

    pub fn enqueue(&mut self, spec: &'static CommandSpec, args: Vec<Vec<u8>>) {
        self.queue.push(QueuedCommand { spec, args });
    }

    /// Leaves MULTI and hands back whatever was queued.
    pub fn take_queue(&mut self) -> Vec<QueuedCommand> {
        self.state = TxState::Normal;
        std::mem::take(&mut self.queue)
    }

    pub fn watch(&mut self, db: usize, key: Key, version: u64) {
        self.watches.push(Watch { db, key, version });
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    /// True when no watched key changed since WATCH.
    pub fn watches_intact(&self, dbs: &mut [Database], now: i64) -> bool {
        self.watches.iter().all(|w| match dbs.get_mut(w.db) {
            Some(db) => db.version_of(&w.key, now) == w.version,
            None => false,
        })
    }

    /// Drops every watch and unregisters the session from the watch indexes.
    pub fn clear_watches(&mut self, dbs: &mut [Database], session: SessionId) {
        for watch in self.watches.drain(..) {
            if let Some(db) = dbs.get_mut(watch.db) {
                db.remove_watcher(&watch.key, session);
            }
        }
    }
}
