//! Table of callbacks awaiting an answer from the peer.
//!
//! A query registers a one-shot entry that is removed the moment it fires.
//! A subscription registers a stream entry that fires any number of times
//! and is removed only when the subscription is dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

use tether_core::{CallbackId, DiagnosticToken};

use super::error::QueryError;
use super::lock;

pub(crate) type QueryReply = Result<String, QueryError>;

pub(crate) enum PendingCallback {
    Once {
        reply: oneshot::Sender<QueryReply>,
        token: Option<DiagnosticToken>,
    },
    Stream(mpsc::UnboundedSender<String>),
}

#[derive(Default)]
pub struct CallbackTable {
    entries: Mutex<HashMap<CallbackId, PendingCallback>>,
}

impl CallbackTable {
    pub(crate) fn register(&self, id: CallbackId, callback: PendingCallback) {
        lock(&self.entries).insert(id, callback);
    }

    /// Looks up `id` for delivery.  One-shot entries are taken out of the
    /// table; stream entries stay and a sender clone is returned.  The answer
    /// is delivered by the caller, without the lock held.
    pub(crate) fn fire(&self, id: CallbackId) -> Option<PendingCallback> {
        let mut entries = lock(&self.entries);
        if let PendingCallback::Stream(tx) = entries.get(&id)? {
            return Some(PendingCallback::Stream(tx.clone()));
        }
        entries.remove(&id)
    }

    /// Fails the one-shot entry dispatched with `token` and returns its id.
    /// Stream entries are left alone: a subscription survives its failures.
    pub(crate) fn fail_by_token(&self, token: &DiagnosticToken, error: QueryError) -> Option<CallbackId> {
        let (id, reply) = {
            let mut entries = lock(&self.entries);
            let id = entries.iter().find_map(|(id, cb)| match cb {
                PendingCallback::Once { token: Some(t), .. } if t == token => Some(*id),
                _ => None,
            })?;
            match entries.remove(&id)? {
                PendingCallback::Once { reply, .. } => (id, reply),
                PendingCallback::Stream(_) => return None,
            }
        };
        let _ = reply.send(Err(error));
        Some(id)
    }

    /// Ids and diagnostic tokens of the queries still waiting, lowest id first.
    pub fn pending_queries(&self) -> Vec<(CallbackId, Option<DiagnosticToken>)> {
        let mut pending: Vec<_> = lock(&self.entries)
            .iter()
            .filter_map(|(id, cb)| match cb {
                PendingCallback::Once { token, .. } => Some((*id, token.clone())),
                PendingCallback::Stream(_) => None,
            })
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        pending
    }

    /// Removes `id` without firing it.  Returns `true` if it was present.
    pub fn forget(&self, id: CallbackId) -> bool {
        lock(&self.entries).remove(&id).is_some()
    }

    /// Removes every entry.  Waiting queries receive
    /// [`QueryError::Disconnected`]; subscription streams end.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingCallback> = lock(&self.entries).drain().map(|(_, cb)| cb).collect();
        let count = drained.len();
        for callback in drained {
            if let PendingCallback::Once { reply, .. } = callback {
                let _ = reply.send(Err(QueryError::Disconnected));
            }
        }
        count
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        lock(&self.entries).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::RemoteFailure;

    #[test]
    fn test_once_entry_is_removed_when_fired() {
        // Arrange
        let table = CallbackTable::default();
        let (tx, _rx) = oneshot::channel();
        table.register(7, PendingCallback::Once { reply: tx, token: None });

        // Act
        let first = table.fire(7);
        let second = table.fire(7);

        // Assert
        assert!(matches!(first, Some(PendingCallback::Once { .. })));
        assert!(second.is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_stream_entry_survives_firing() {
        let table = CallbackTable::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.register(3, PendingCallback::Stream(tx));

        assert!(matches!(table.fire(3), Some(PendingCallback::Stream(_))));
        assert!(matches!(table.fire(3), Some(PendingCallback::Stream(_))));
        assert!(table.contains(3));
    }

    #[test]
    fn test_fire_unknown_id_returns_none() {
        let table = CallbackTable::default();
        assert!(table.fire(99).is_none());
    }

    #[test]
    fn test_fail_all_disconnects_queries_and_ends_streams() {
        // Arrange
        let table = CallbackTable::default();
        let (once_tx, mut once_rx) = oneshot::channel();
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel::<String>();
        table.register(1, PendingCallback::Once { reply: once_tx, token: None });
        table.register(2, PendingCallback::Stream(stream_tx));

        // Act
        let failed = table.fail_all();

        // Assert
        assert_eq!(failed, 2);
        assert!(table.is_empty());
        assert_eq!(once_rx.try_recv().unwrap(), Err(QueryError::Disconnected));
        assert!(matches!(
            stream_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_forget_removes_entry() {
        let table = CallbackTable::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.register(5, PendingCallback::Stream(tx));
        assert!(table.forget(5));
        assert!(!table.forget(5));
    }

    #[test]
    fn test_fail_by_token_fails_only_the_matching_query() {
        // Arrange
        let table = CallbackTable::default();
        let token = DiagnosticToken::from("t-2");
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        table.register(1, PendingCallback::Once { reply: first_tx, token: Some("t-1".into()) });
        table.register(2, PendingCallback::Once { reply: second_tx, token: Some(token.clone()) });
        let failure = RemoteFailure::new("TypeError", "x is undefined");

        // Act
        let failed = table.fail_by_token(&token, QueryError::Remote(failure.clone()));

        // Assert
        assert_eq!(failed, Some(2));
        assert_eq!(second_rx.try_recv().unwrap(), Err(QueryError::Remote(failure)));
        assert!(first_rx.try_recv().is_err());
        assert!(table.contains(1));
        assert!(!table.contains(2));
    }

    #[test]
    fn test_fail_by_token_ignores_subscriptions() {
        let table = CallbackTable::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.register(4, PendingCallback::Stream(tx));
        let failed = table.fail_by_token(&"t".into(), QueryError::Disconnected);
        assert_eq!(failed, None);
        assert!(table.contains(4));
    }

    #[test]
    fn test_pending_queries_lists_once_entries_in_id_order() {
        let table = CallbackTable::default();
        let (a, _ra) = oneshot::channel();
        let (b, _rb) = oneshot::channel();
        let (s, _rs) = mpsc::unbounded_channel();
        table.register(9, PendingCallback::Once { reply: a, token: Some("t9".into()) });
        table.register(3, PendingCallback::Once { reply: b, token: None });
        table.register(5, PendingCallback::Stream(s));

        let pending = table.pending_queries();

        assert_eq!(pending, vec![(3, None), (9, Some(DiagnosticToken::from("t9")))]);
    }
}
