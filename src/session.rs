//! A client connection to the emulated server.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::oneshot;

use crate::blocking::WaitId;
use crate::command::{self, Ctx, Flow, Mode};
use crate::error::CommandError;
use crate::pubsub::Message;
use crate::reply::Reply;
use crate::server::Shared;
use crate::storage::SessionId;
use crate::transaction::Transaction;

/// Per-connection state the engine reads and writes.
pub(crate) struct ClientState {
    pub id: SessionId,
    /// Selected database.
    pub db: usize,
    pub tx: Transaction,
}

pub struct Session {
    shared: Arc<Shared>,
    client: ClientState,
    mailbox: UnboundedReceiver<Message>,
}

/// Deregisters a parked wait if the invoking future is dropped or times out.
struct WaitGuard<'a> {
    shared: &'a Shared,
    id: WaitId,
    armed: bool,
}

impl WaitGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().blocking.remove(self.id);
        }
    }
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let id = shared.next_session_id();
        let (sender, mailbox) = unbounded_channel();
        shared.lock().pubsub.attach(id, sender);
        debug!("session {} opened", id);
        Session {
            shared,
            client: ClientState {
                id,
                db: 0,
                tx: Transaction::default(),
            },
            mailbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.client.id
    }

    /// Currently selected database.
    pub fn db(&self) -> usize {
        self.client.db
    }

    /// Runs one command. Blocking commands suspend here until served or
    /// timed out; dropping the future abandons the wait.
    pub async fn invoke<I, A>(&mut self, name: &str, args: I) -> Result<Reply, CommandError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        if !self.shared.is_connected() {
            return Err(CommandError::connection_lost());
        }
        let args: Vec<Vec<u8>> = args.into_iter().map(|a| a.as_ref().to_vec()).collect();

        let (id, receiver, timeout) = {
            let mut state = self.shared.lock();
            let now = state.now();
            let flow = {
                let mut ctx = Ctx {
                    state: &mut *state,
                    client: &mut self.client,
                    shared: &*self.shared,
                    now,
                    mode: Mode::Direct,
                };
                command::dispatch(&mut ctx, name.as_bytes(), &args)
            };
            state.serve_blocked(now);
            match flow? {
                Flow::Done(reply) => return Ok(reply),
                Flow::Wait(request) => {
                    let (id, receiver) =
                        state
                            .blocking
                            .register(self.client.id, self.client.db, request.op);
                    (id, receiver, request.timeout)
                }
            }
        };

        let reply = wait(&self.shared, id, receiver, timeout).await;
        match reply {
            Reply::Error(err) => Err(err),
            reply => Ok(reply),
        }
    }

    /// Next pub/sub message, waiting for one if none is queued.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.mailbox.recv().await
    }

    pub fn try_next_message(&mut self) -> Option<Message> {
        self.mailbox.try_recv().ok()
    }

    /// Closes the session, releasing watches, subscriptions and waits.
    pub fn close(self) {}
}

/// Suspends until the wait is served, times out, or the registry drops it.
async fn wait(
    shared: &Shared,
    id: WaitId,
    mut receiver: oneshot::Receiver<Reply>,
    timeout: Option<std::time::Duration>,
) -> Reply {
    let guard = WaitGuard {
        shared,
        id,
        armed: true,
    };
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, &mut receiver).await.ok(),
        None => Some((&mut receiver).await),
    };
    let reply = match outcome {
        Some(Ok(reply)) => reply,
        // registry dropped the wait
        Some(Err(_)) => Reply::Nil,
        None => {
            let mut state = shared.lock();
            if state.blocking.remove(id) {
                Reply::Nil
            } else {
                // served while the timer fired
                receiver.try_recv().unwrap_or(Reply::Nil)
            }
        }
    };
    guard.disarm();
    reply
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        self.client
            .tx
            .clear_watches(&mut state.dbs, self.client.id);
        state.pubsub.detach(self.client.id);
        state.blocking.remove_session(self.client.id);
        debug!("session {} closed", self.client.id);
    }
}
