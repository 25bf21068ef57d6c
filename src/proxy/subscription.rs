//! The registry of subscribed connections.

use std::rc::Rc;

use crate::transport::{Connection, ConnectionId};
use crate::user::User;

/// One subscribed connection and the users joined through it.
pub(crate) struct Subscription {
    pub connection: Rc<dyn Connection>,
    /// Assigned by the directory at subscribe time; used to build reply seq
    /// tokens for this connection.
    pub seq_id: u32,
    /// Available users joined via this connection. Lifetime authority stays
    /// with the session's user table.
    pub users: Vec<Rc<User>>,
}

/// Linear registry keyed by connection identity. Cardinality is bounded by
/// the session's peer count.
#[derive(Default)]
pub(crate) struct SubscriptionList {
    entries: Vec<Subscription>,
}

impl SubscriptionList {
    pub fn find(&self, id: ConnectionId) -> Option<&Subscription> {
        self.entries.iter().find(|s| s.connection.id() == id)
    }

    pub fn find_mut(&mut self, id: ConnectionId) -> Option<&mut Subscription> {
        self.entries.iter_mut().find(|s| s.connection.id() == id)
    }

    pub fn add(&mut self, connection: Rc<dyn Connection>, seq_id: u32) {
        debug_assert!(self.find(connection.id()).is_none());
        self.entries.push(Subscription {
            connection,
            seq_id,
            users: Vec::new(),
        });
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Subscription> {
        let index = self.entries.iter().position(|s| s.connection.id() == id)?;
        Some(self.entries.remove(index))
    }

    pub fn first_connection(&self) -> Option<Rc<dyn Connection>> {
        self.entries.first().map(|s| s.connection.clone())
    }

    pub fn connections(&self) -> Vec<Rc<dyn Connection>> {
        self.entries.iter().map(|s| s.connection.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeConnection(u64);

    impl Connection for FakeConnection {
        fn id(&self) -> ConnectionId {
            ConnectionId(self.0)
        }
    }

    fn conn(id: u64) -> Rc<dyn Connection> {
        Rc::new(FakeConnection(id))
    }

    #[test]
    fn add_then_find_by_identity() {
        let mut list = SubscriptionList::default();
        list.add(conn(1), 7);
        list.add(conn(2), 11);

        assert_eq!(list.len(), 2);
        assert_eq!(list.find(ConnectionId(1)).unwrap().seq_id, 7);
        assert_eq!(list.find(ConnectionId(2)).unwrap().seq_id, 11);
        assert!(list.find(ConnectionId(3)).is_none());
    }

    #[test]
    fn remove_returns_the_entry() {
        let mut list = SubscriptionList::default();
        list.add(conn(1), 7);

        let removed = list.remove(ConnectionId(1)).unwrap();
        assert_eq!(removed.seq_id, 7);
        assert!(list.is_empty());
        assert!(list.remove(ConnectionId(1)).is_none());
    }

    #[test]
    fn first_connection_follows_insertion_order() {
        let mut list = SubscriptionList::default();
        assert!(list.first_connection().is_none());
        list.add(conn(5), 1);
        list.add(conn(6), 2);
        assert_eq!(list.first_connection().unwrap().id(), ConnectionId(5));
    }
}
