//! Channel and pattern subscriptions, and per-session message delivery.
//!
//! Lives inside the server state, so it is always accessed under the server
//! lock. Every session has one unbounded mailbox; a publish enqueues at most
//! one message per session.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::glob::glob_match;
use crate::reply::Reply;
use crate::storage::SessionId;

/// A message delivered to a subscribed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Vec<u8>,
    /// The pattern that matched, for pattern subscriptions.
    pub pattern: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Message {
    /// `["message", channel, data]` or `["pmessage", pattern, channel, data]`.
    pub fn to_reply(&self) -> Reply {
        match &self.pattern {
            None => Reply::bulks([
                b"message".to_vec(),
                self.channel.clone(),
                self.payload.clone(),
            ]),
            Some(pattern) => Reply::bulks([
                b"pmessage".to_vec(),
                pattern.clone(),
                self.channel.clone(),
                self.payload.clone(),
            ]),
        }
    }
}

#[derive(Default)]
struct Subscriptions {
    channels: BTreeSet<Vec<u8>>,
    patterns: BTreeSet<Vec<u8>>,
}

impl Subscriptions {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Default)]
pub(crate) struct PubSubRegistry {
    channels: BTreeMap<Vec<u8>, BTreeSet<SessionId>>,
    patterns: BTreeMap<Vec<u8>, BTreeSet<SessionId>>,
    by_session: HashMap<SessionId, Subscriptions>,
    mailboxes: HashMap<SessionId, UnboundedSender<Message>>,
}

/// Which index a (un)subscribe works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Channel,
    Pattern,
}

impl PubSubRegistry {
    pub fn attach(&mut self, session: SessionId, mailbox: UnboundedSender<Message>) {
        self.mailboxes.insert(session, mailbox);
    }

    /// Drops every subscription and the mailbox of a closing session.
    pub fn detach(&mut self, session: SessionId) {
        self.unsubscribe_all(session, Target::Channel);
        self.unsubscribe_all(session, Target::Pattern);
        self.by_session.remove(&session);
        self.mailboxes.remove(&session);
    }

    pub fn subscription_count(&self, session: SessionId) -> usize {
        self.by_session.get(&session).map_or(0, Subscriptions::count)
    }

    fn index(&mut self, target: Target) -> &mut BTreeMap<Vec<u8>, BTreeSet<SessionId>> {
        match target {
            Target::Channel => &mut self.channels,
            Target::Pattern => &mut self.patterns,
        }
    }

    /// Subscribes and returns the session's total subscription count.
    pub fn subscribe(&mut self, session: SessionId, target: Target, name: &[u8]) -> usize {
        self.index(target)
            .entry(name.to_vec())
            .or_default()
            .insert(session);
        let subs = self.by_session.entry(session).or_default();
        match target {
            Target::Channel => subs.channels.insert(name.to_vec()),
            Target::Pattern => subs.patterns.insert(name.to_vec()),
        };
        subs.count()
    }

    /// Unsubscribes (a no-op if not subscribed) and returns the remaining count.
    pub fn unsubscribe(&mut self, session: SessionId, target: Target, name: &[u8]) -> usize {
        let index = self.index(target);
        if let Some(sessions) = index.get_mut(name) {
            sessions.remove(&session);
            if sessions.is_empty() {
                index.remove(name);
            }
        }
        match self.by_session.get_mut(&session) {
            Some(subs) => {
                match target {
                    Target::Channel => subs.channels.remove(name),
                    Target::Pattern => subs.patterns.remove(name),
                };
                subs.count()
            }
            None => 0,
        }
    }

    /// Current channels (or patterns) of a session, sorted.
    pub fn subscriptions_of(&self, session: SessionId, target: Target) -> Vec<Vec<u8>> {
        self.by_session.get(&session).map_or_else(Vec::new, |subs| {
            let names = match target {
                Target::Channel => &subs.channels,
                Target::Pattern => &subs.patterns,
            };
            names.iter().cloned().collect()
        })
    }

    fn unsubscribe_all(&mut self, session: SessionId, target: Target) {
        for name in self.subscriptions_of(session, target) {
            self.unsubscribe(session, target, &name);
        }
    }

    /// Delivers `payload` once to every session subscribed to `channel` or to
    /// a pattern matching it. An exact subscription wins over patterns;
    /// otherwise the first matching pattern in sorted order is reported.
    /// Returns the number of sessions reached.
    pub fn publish(&mut self, channel: &[u8], payload: &[u8]) -> usize {
        let mut targets: BTreeMap<SessionId, Option<&Vec<u8>>> = BTreeMap::new();
        if let Some(sessions) = self.channels.get(channel) {
            for &session in sessions {
                targets.insert(session, None);
            }
        }
        for (pattern, sessions) in &self.patterns {
            if !glob_match(pattern, channel) {
                continue;
            }
            for &session in sessions {
                targets.entry(session).or_insert(Some(pattern));
            }
        }

        let mut delivered = 0;
        for (session, pattern) in targets {
            let Some(mailbox) = self.mailboxes.get(&session) else {
                continue;
            };
            let message = Message {
                channel: channel.to_vec(),
                pattern: pattern.cloned(),
                payload: payload.to_vec(),
            };
            if mailbox.send(message).is_ok() {
                delivered += 1;
            }
        }
        debug!(
            "publish to {:?} reached {} sessions",
            String::from_utf8_lossy(channel),
            delivered
        );
        delivered
    }

    /// Channels with at least one subscriber, optionally filtered, sorted.
    pub fn channels(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        self.channels
            .keys()
            .filter(|name| pattern.map_or(true, |p| glob_match(p, name)))
            .cloned()
            .collect()
    }

    pub fn numsub(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map_or(0, BTreeSet::len)
    }

    /// Number of distinct patterns subscribed to.
    pub fn numpat(&self) -> usize {
        self.patterns.len()
    }
}
