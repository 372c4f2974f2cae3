//! Registry of sessions parked in BLPOP, BRPOPLPUSH, BZPOPMIN and friends.
//!
//! A wait is indexed by every `(db, key)` it listens on and by its session.
//! After each top-level command the server drains the touched keys of every
//! database and re-attempts the waits on those keys in registration order;
//! a successful attempt removes the wait and sends the reply through its
//! oneshot.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use tokio::sync::oneshot;

use crate::command::{list_move, list_pop, zset_pop, End};
use crate::error::CommandError;
use crate::reply::Reply;
use crate::storage::{Database, Key, SessionId};

pub(crate) type WaitId = u64;

/// The non-blocking operation a parked session retries.
#[derive(Debug, Clone)]
pub(crate) enum WaitOp {
    Pop { keys: Vec<Key>, end: End },
    Move { source: Key, dest: Key, from: End, to: End },
    ZPop { keys: Vec<Key>, highest: bool },
}

impl WaitOp {
    /// Keys whose changes can satisfy the wait.
    fn keys(&self) -> Vec<Key> {
        match self {
            WaitOp::Pop { keys, .. } | WaitOp::ZPop { keys, .. } => keys.clone(),
            WaitOp::Move { source, .. } => vec![source.clone()],
        }
    }

    /// Retries on behalf of the waiter. Keys of the wrong type are skipped
    /// rather than failing the wait.
    fn attempt(&self, db: &mut Database, now: i64) -> Result<Option<Reply>, CommandError> {
        match self {
            WaitOp::Pop { keys, end } => list_pop(db, keys, *end, now, false),
            WaitOp::Move {
                source,
                dest,
                from,
                to,
            } => list_move(db, source, dest, *from, *to, now, false),
            WaitOp::ZPop { keys, highest } => zset_pop(db, keys, *highest, now, false),
        }
    }
}

struct Waiter {
    session: SessionId,
    db: usize,
    op: WaitOp,
    sender: oneshot::Sender<Reply>,
}

#[derive(Default)]
pub(crate) struct BlockingRegistry {
    next_id: WaitId,
    waiters: HashMap<WaitId, Waiter>,
    by_key: HashMap<(usize, Key), VecDeque<WaitId>>,
    by_session: HashMap<SessionId, HashSet<WaitId>>,
}

impl BlockingRegistry {
    pub fn register(
        &mut self,
        session: SessionId,
        db: usize,
        op: WaitOp,
    ) -> (WaitId, oneshot::Receiver<Reply>) {
        self.next_id += 1;
        let id = self.next_id;
        let (sender, receiver) = oneshot::channel();
        for key in op.keys() {
            let queue = self.by_key.entry((db, key)).or_default();
            if !queue.contains(&id) {
                queue.push_back(id);
            }
        }
        self.by_session.entry(session).or_default().insert(id);
        debug!("session {} parked as wait {} on db {}", session, id, db);
        self.waiters.insert(
            id,
            Waiter {
                session,
                db,
                op,
                sender,
            },
        );
        (id, receiver)
    }

    /// Deregisters a wait. False if it was already served or removed.
    pub fn remove(&mut self, id: WaitId) -> bool {
        self.take(id).is_some()
    }

    fn take(&mut self, id: WaitId) -> Option<Waiter> {
        let waiter = self.waiters.remove(&id)?;
        for key in waiter.op.keys() {
            let slot = (waiter.db, key);
            if let Some(queue) = self.by_key.get_mut(&slot) {
                queue.retain(|w| *w != id);
                if queue.is_empty() {
                    self.by_key.remove(&slot);
                }
            }
        }
        if let Some(ids) = self.by_session.get_mut(&waiter.session) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_session.remove(&waiter.session);
            }
        }
        Some(waiter)
    }

    /// Drops every wait of a closing session.
    pub fn remove_session(&mut self, session: SessionId) {
        let ids: Vec<WaitId> = self
            .by_session
            .get(&session)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in ids {
            self.take(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Re-attempts every wait on `(db, key)` in registration order.
    /// Returns how many waits were completed.
    pub fn serve_key(&mut self, dbs: &mut [Database], db: usize, key: &[u8], now: i64) -> usize {
        let ids: Vec<WaitId> = match self.by_key.get(&(db, key.to_vec())) {
            Some(queue) => queue.iter().copied().collect(),
            None => return 0,
        };
        let mut served = 0;
        for id in ids {
            let Some(waiter) = self.waiters.get(&id) else {
                continue;
            };
            if waiter.sender.is_closed() {
                self.take(id);
                continue;
            }
            let Some(database) = dbs.get_mut(waiter.db) else {
                continue;
            };
            let reply = match waiter.op.attempt(database, now) {
                Ok(None) => continue,
                Ok(Some(reply)) => reply,
                Err(err) => Reply::Error(err),
            };
            if let Some(waiter) = self.take(id) {
                debug!("wait {} of session {} served", id, waiter.session);
                // receiver cannot go away while registered: the guard
                // deregisters under the lock first
                let _ = waiter.sender.send(reply);
                served += 1;
            }
        }
        served
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    use super::*;
    use crate::storage::Value;

    fn db_with_list(key: &[u8], items: &[&[u8]]) -> Vec<Database> {
        let mut db = Database::new(Arc::new(AtomicU64::new(0)));
        let list = items.iter().map(|i| i.to_vec()).collect();
        db.insert(key.to_vec(), Value::List(list));
        vec![db]
    }

    #[test]
    fn serves_in_registration_order() {
        let mut registry = BlockingRegistry::default();
        let op = || WaitOp::Pop {
            keys: vec![b"q".to_vec()],
            end: End::Left,
        };
        let (_, mut first) = registry.register(1, 0, op());
        let (_, mut second) = registry.register(2, 0, op());

        let mut dbs = db_with_list(b"q", &[b"a"]);
        assert_eq!(registry.serve_key(&mut dbs, 0, b"q", 0), 1);
        assert_eq!(
            first.try_recv().unwrap(),
            Reply::bulks([b"q".to_vec(), b"a".to_vec()])
        );
        assert!(second.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let mut registry = BlockingRegistry::default();
        let op = WaitOp::ZPop {
            keys: vec![b"z".to_vec()],
            highest: true,
        };
        let (_, receiver) = registry.register(3, 0, op);
        drop(receiver);
        let mut dbs = db_with_list(b"z", &[b"x"]);
        assert_eq!(registry.serve_key(&mut dbs, 0, b"z", 0), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_session_clears_indexes() {
        let mut registry = BlockingRegistry::default();
        let op = WaitOp::Move {
            source: b"s".to_vec(),
            dest: b"d".to_vec(),
            from: End::Right,
            to: End::Left,
        };
        let (id, _rx) = registry.register(9, 0, op);
        registry.remove_session(9);
        assert!(!registry.remove(id));
        assert!(registry.by_key.is_empty());
        assert!(registry.by_session.is_empty());
    }
}
