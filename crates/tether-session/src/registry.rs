//! The connection registry: which user owns which live connection.
//!
//! # Invariant
//!
//! At most one live connection per [`UserId`]. What happens when a
//! second one shows up is decided by [`DuplicatePolicy`], never left
//! implicit.
//!
//! # Concurrency note
//!
//! All mutations go through one `parking_lot::Mutex`. The lock is only
//! held for map operations; closing a displaced connection happens after
//! it is released, so no `.await` ever runs under it. Because the lock is
//! synchronous, [`RegistryGuard`] can release its entry directly in
//! `Drop`, on every exit path of the connection task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_protocol::UserId;
use tether_transport::{CloseReason, Connection, ConnectionId};

use crate::{DuplicatePolicy, Identity, SessionError};

/// Maps each authenticated user to their one live connection handle.
///
/// ## Lifecycle
///
/// ```text
/// register() ──→ [live] ──(guard dropped)──→ release() ──→ [absent]
///                  │
///                  └──(newer register, ReplaceExisting)──→ close(Replaced)
/// ```
pub struct ConnectionRegistry<C: Connection> {
    entries: Mutex<HashMap<UserId, Arc<C>>>,
    policy: DuplicatePolicy,
}

impl<C: Connection> ConnectionRegistry<C> {
    /// Creates an empty registry with the given duplicate policy.
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// How a second connection for a registered user is handled.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Registers `handle` as the live connection of `identity`.
    ///
    /// Under [`DuplicatePolicy::ReplaceExisting`] an existing connection
    /// is swapped out and then closed with [`CloseReason::Replaced`]; a
    /// failure to close it is logged, not returned.
    ///
    /// The returned guard must live as long as the connection. Dropping
    /// it removes the entry, unless a newer connection has taken its
    /// place in the meantime.
    ///
    /// # Errors
    /// [`SessionError::AlreadyConnected`] under
    /// [`DuplicatePolicy::RejectNew`] if the user is already connected.
    /// Nothing is registered in that case.
    pub async fn register(
        self: &Arc<Self>,
        identity: &Identity,
        handle: Arc<C>,
    ) -> Result<RegistryGuard<C>, SessionError> {
        let user_id = identity.user_id;
        let connection_id = handle.id();

        let displaced = {
            let mut entries = self.entries.lock();
            if self.policy == DuplicatePolicy::RejectNew
                && entries.contains_key(&user_id)
            {
                tracing::warn!(
                    %user_id,
                    %connection_id,
                    "refusing second connection"
                );
                return Err(SessionError::AlreadyConnected(user_id));
            }
            entries.insert(user_id, Arc::clone(&handle))
        };

        let guard = RegistryGuard {
            registry: Arc::clone(self),
            user_id,
            connection_id,
        };

        if let Some(old) = displaced {
            tracing::info!(
                %user_id,
                old = %old.id(),
                new = %connection_id,
                "replacing live connection"
            );
            if let Err(e) = old.close(CloseReason::Replaced).await {
                tracing::warn!(
                    %user_id,
                    old = %old.id(),
                    error = %e,
                    "failed to close displaced connection"
                );
            }
        }

        tracing::debug!(%user_id, %connection_id, "connection registered");
        Ok(guard)
    }

    /// Removes whatever connection `user_id` has. Idempotent.
    ///
    /// Returns the removed handle, if there was one. The handle is not
    /// closed.
    pub fn unregister(&self, user_id: UserId) -> Option<Arc<C>> {
        self.entries.lock().remove(&user_id)
    }

    /// Removes the entry for `user_id` only if it is still
    /// `connection_id`. Returns whether anything was removed.
    pub fn release(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&user_id) {
            Some(current) if current.id() == connection_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Returns the live connection of `user_id`, if any.
    pub fn lookup(&self, user_id: UserId) -> Option<Arc<C>> {
        self.entries.lock().get(&user_id).cloned()
    }

    /// Returns the number of live connections.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no one is connected.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of every connected user.
    pub fn connected_users(&self) -> Vec<UserId> {
        self.entries.lock().keys().copied().collect()
    }

    /// Closes every registered connection with `reason`.
    ///
    /// Entries stay until the owning tasks drop their guards. Returns the
    /// number of handles that were asked to close.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let handles: Vec<(UserId, Arc<C>)> = self
            .entries
            .lock()
            .iter()
            .map(|(user_id, handle)| (*user_id, Arc::clone(handle)))
            .collect();

        for (user_id, handle) in &handles {
            if let Err(e) = handle.close(reason).await {
                tracing::warn!(
                    %user_id,
                    connection_id = %handle.id(),
                    error = %e,
                    "failed to close connection"
                );
            }
        }
        handles.len()
    }
}

// ---------------------------------------------------------------------------
// RegistryGuard
// ---------------------------------------------------------------------------

/// Releases a registration when dropped.
///
/// Tied to one connection id, so the guard of a displaced connection
/// never removes the connection that replaced it.
pub struct RegistryGuard<C: Connection> {
    registry: Arc<ConnectionRegistry<C>>,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl<C: Connection> Drop for RegistryGuard<C> {
    fn drop(&mut self) {
        let removed = self.registry.release(self.user_id, self.connection_id);
        tracing::debug!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            removed,
            "registration released"
        );
    }
}

#[cfg(test)]
mod tests {
    //! Registry tests run against an in-memory connection that records
    //! how it was closed.

    use std::sync::atomic::{AtomicU64, Ordering};

    use tether_transport::TransportError;

    use super::*;

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    struct MockConnection {
        id: ConnectionId,
        closed_with: Mutex<Option<CloseReason>>,
        fail_close: bool,
    }

    impl MockConnection {
        fn new() -> Arc<Self> {
            Self::build(false)
        }

        fn failing_close() -> Arc<Self> {
            Self::build(true)
        }

        fn build(fail_close: bool) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                closed_with: Mutex::new(None),
                fail_close,
            })
        }

        fn closed_with(&self) -> Option<CloseReason> {
            *self.closed_with.lock()
        }
    }

    impl Connection for MockConnection {
        type Error = TransportError;

        async fn send(&self, _data: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
            Ok(None)
        }

        async fn close(&self, reason: CloseReason) -> Result<(), Self::Error> {
            *self.closed_with.lock() = Some(reason);
            if self.fail_close {
                return Err(TransportError::ConnectionClosed("peer gone".into()));
            }
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    fn registry(policy: DuplicatePolicy) -> Arc<ConnectionRegistry<MockConnection>> {
        Arc::new(ConnectionRegistry::new(policy))
    }

    fn alice() -> Identity {
        Identity {
            user_id: UserId(1),
            username: "alice".into(),
        }
    }

    // =====================================================================
    // register() / lookup()
    // =====================================================================

    #[tokio::test]
    async fn test_register_then_lookup_returns_handle() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let conn = MockConnection::new();

        let _guard = reg.register(&alice(), Arc::clone(&conn)).await.unwrap();

        let found = reg.lookup(UserId(1)).expect("should be registered");
        assert_eq!(found.id(), conn.id());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown_user_returns_none() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        assert!(reg.lookup(UserId(99)).is_none());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_register_replace_closes_old_and_keeps_new() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let old = MockConnection::new();
        let new = MockConnection::new();

        let _old_guard = reg.register(&alice(), Arc::clone(&old)).await.unwrap();
        let _new_guard = reg.register(&alice(), Arc::clone(&new)).await.unwrap();

        assert_eq!(old.closed_with(), Some(CloseReason::Replaced));
        assert_eq!(new.closed_with(), None);
        assert_eq!(reg.lookup(UserId(1)).unwrap().id(), new.id());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_register_replace_close_failure_is_not_propagated() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let old = MockConnection::failing_close();
        let new = MockConnection::new();

        let _old_guard = reg.register(&alice(), old).await.unwrap();
        let result = reg.register(&alice(), Arc::clone(&new)).await;

        assert!(result.is_ok());
        assert_eq!(reg.lookup(UserId(1)).unwrap().id(), new.id());
    }

    #[tokio::test]
    async fn test_register_reject_policy_returns_already_connected() {
        let reg = registry(DuplicatePolicy::RejectNew);
        let first = MockConnection::new();
        let second = MockConnection::new();

        let _guard = reg.register(&alice(), Arc::clone(&first)).await.unwrap();
        let result = reg.register(&alice(), second).await;

        assert!(
            matches!(result, Err(SessionError::AlreadyConnected(id)) if id == UserId(1))
        );
        assert_eq!(first.closed_with(), None);
        assert_eq!(reg.lookup(UserId(1)).unwrap().id(), first.id());
    }

    // =====================================================================
    // Guard / release()
    // =====================================================================

    #[tokio::test]
    async fn test_guard_drop_removes_entry() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);

        let guard = reg.register(&alice(), MockConnection::new()).await.unwrap();
        drop(guard);

        assert!(reg.lookup(UserId(1)).is_none());
    }

    #[tokio::test]
    async fn test_displaced_guard_drop_keeps_replacement() {
        // The old connection's task ends after it was replaced; its
        // cleanup must not unregister the new connection.
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let new = MockConnection::new();

        let old_guard = reg.register(&alice(), MockConnection::new()).await.unwrap();
        let _new_guard = reg.register(&alice(), Arc::clone(&new)).await.unwrap();
        drop(old_guard);

        assert_eq!(reg.lookup(UserId(1)).unwrap().id(), new.id());
    }

    #[tokio::test]
    async fn test_release_wrong_connection_id_is_noop() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let _guard = reg.register(&alice(), MockConnection::new()).await.unwrap();

        assert!(!reg.release(UserId(1), ConnectionId::new(u64::MAX)));
        assert!(reg.lookup(UserId(1)).is_some());
    }

    #[tokio::test]
    async fn test_guard_drop_on_panic_still_releases() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let task_reg = Arc::clone(&reg);

        let result = tokio::spawn(async move {
            let _guard = task_reg
                .register(&alice(), MockConnection::new())
                .await
                .unwrap();
            panic!("connection task blew up");
        })
        .await;

        assert!(result.is_err());
        assert!(reg.lookup(UserId(1)).is_none());
    }

    // =====================================================================
    // unregister() / close_all() / connected_users()
    // =====================================================================

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let guard = reg.register(&alice(), MockConnection::new()).await.unwrap();

        assert!(reg.unregister(UserId(1)).is_some());
        assert!(reg.unregister(UserId(1)).is_none());
        drop(guard);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_closes_every_handle() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let a = MockConnection::new();
        let b = MockConnection::new();
        let bob = Identity {
            user_id: UserId(2),
            username: "bob".into(),
        };
        let _ga = reg.register(&alice(), Arc::clone(&a)).await.unwrap();
        let _gb = reg.register(&bob, Arc::clone(&b)).await.unwrap();

        let closed = reg.close_all(CloseReason::ServerShutdown).await;

        assert_eq!(closed, 2);
        assert_eq!(a.closed_with(), Some(CloseReason::ServerShutdown));
        assert_eq!(b.closed_with(), Some(CloseReason::ServerShutdown));
    }

    #[tokio::test]
    async fn test_connected_users_lists_identities() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let bob = Identity {
            user_id: UserId(2),
            username: "bob".into(),
        };
        let _ga = reg.register(&alice(), MockConnection::new()).await.unwrap();
        let _gb = reg.register(&bob, MockConnection::new()).await.unwrap();

        let mut users = reg.connected_users();
        users.sort();

        assert_eq!(users, vec![UserId(1), UserId(2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registers_leave_exactly_one_entry() {
        let reg = registry(DuplicatePolicy::ReplaceExisting);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                let conn = MockConnection::new();
                let guard = reg.register(&alice(), Arc::clone(&conn)).await.unwrap();
                (conn, guard)
            }));
        }

        let mut kept = Vec::new();
        for handle in handles {
            kept.push(handle.await.unwrap());
        }

        assert_eq!(reg.len(), 1);
        let live = reg.lookup(UserId(1)).unwrap();
        // Everyone except the survivor was closed as replaced.
        let replaced = kept
            .iter()
            .filter(|(conn, _)| conn.closed_with() == Some(CloseReason::Replaced))
            .count();
        assert_eq!(replaced, 15);
        assert!(kept.iter().any(|(conn, _)| conn.id() == live.id()));
    }
}
