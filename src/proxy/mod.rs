//! The session proxy: one per live session.
//!
//! The proxy is the server-side coordination point where three concerns
//! meet: the membership of subscribed peer connections, the user
//! join/rejoin protocol, and the derived `idle` flag the directory watches
//! to decide when a session can be unloaded.

mod dispatch;
mod join;
mod subscription;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{RequestError, SubscribeError, UnsubscribeError};
use crate::io::Io;
use crate::session::{Session, SessionStatus, SyncStatus};
use crate::signal::{HandlerId, Hook, Signal};
use crate::transport::{Connection, ConnectionId, HostedGroup};
use crate::user::{User, UserProps, UserStatus};
use crate::wire;

use subscription::SubscriptionList;

/// Payload of the `add_subscription` event.
pub struct SubscriptionAdded {
    pub connection: Rc<dyn Connection>,
    pub seq_id: u32,
}

/// Input of the join rejection hook. Listeners inspect, never mutate.
pub struct RejectUserJoin {
    /// The originating connection, or `None` for a server-side join.
    pub connection: Option<Rc<dyn Connection>>,
    /// The fully filled property bag the user would be built from.
    pub props: UserProps,
    /// The unavailable user being resurrected, if this is a rejoin.
    pub rejoin: Option<Rc<User>>,
}

/// Events the proxy exposes to collaborators such as the directory.
#[derive(Default)]
pub struct ProxyEvents {
    /// Fires after a subscription has been recorded.
    pub add_subscription: Signal<SubscriptionAdded>,
    /// Fires after a subscription has been removed, on unsubscribe,
    /// connection loss and session close alike.
    pub remove_subscription: Signal<Rc<dyn Connection>>,
    /// Edge-only notification of the `idle` flag.
    pub idle_changed: Signal<bool>,
}

/// A server-initiated request handle, completed synchronously.
pub struct Request {
    kind: &'static str,
    result: RefCell<Option<Result<Rc<User>, RequestError>>>,
}

impl Request {
    fn new(kind: &'static str) -> Rc<Self> {
        Rc::new(Self {
            kind,
            result: RefCell::new(None),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn result(&self) -> Option<Result<Rc<User>, RequestError>> {
        self.result.borrow().clone()
    }

    fn finish(&self, result: Result<Rc<User>, RequestError>) {
        *self.result.borrow_mut() = Some(result);
    }
}

struct SessionWiring {
    closed: HandlerId,
    sync_begin: HandlerId,
    sync_complete: HandlerId,
    sync_failed_pre: HandlerId,
    sync_failed_post: HandlerId,
    table_added: HandlerId,
}

pub(crate) struct ProxyInner {
    io: Rc<dyn Io>,
    session: Rc<dyn Session>,
    subscription_group: RefCell<Option<Rc<dyn HostedGroup>>>,
    subscriptions: RefCell<SubscriptionList>,
    local_users: RefCell<Vec<Rc<User>>>,
    user_id_counter: Cell<u32>,
    idle: Cell<bool>,
    events: ProxyEvents,
    reject_user_join: Hook<RejectUserJoin>,
    wiring: RefCell<Option<SessionWiring>>,
    member_removed_handler: Cell<Option<HandlerId>>,
    disposed: Cell<bool>,
}

/// Server-side manager of exactly one session. Cheap to clone; clones share
/// the same proxy state.
#[derive(Clone)]
pub struct SessionProxy {
    inner: Rc<ProxyInner>,
}

impl SessionProxy {
    /// Wire a proxy onto a session and its subscription group. The group is
    /// installed on the session; every lifecycle observer the proxy needs is
    /// connected here and stays connected until [`dispose`](Self::dispose).
    pub fn new(
        io: Rc<dyn Io>,
        session: Rc<dyn Session>,
        subscription_group: Rc<dyn HostedGroup>,
    ) -> SessionProxy {
        let proxy = SessionProxy {
            inner: Rc::new(ProxyInner {
                io,
                session: session.clone(),
                subscription_group: RefCell::new(None),
                subscriptions: RefCell::new(SubscriptionList::default()),
                local_users: RefCell::new(Vec::new()),
                user_id_counter: Cell::new(1),
                idle: Cell::new(true),
                events: ProxyEvents::default(),
                reject_user_join: Hook::new(),
                wiring: RefCell::new(None),
                member_removed_handler: Cell::new(None),
                disposed: Cell::new(false),
            }),
        };

        // The next fresh user id must clear everything already in the table.
        for user in session.user_table().users() {
            proxy.note_user_id(&user);
        }

        let events = session.events();
        let wiring = SessionWiring {
            closed: events.closed.connect({
                let weak = proxy.downgrade();
                move |_| {
                    if let Some(proxy) = upgrade(&weak) {
                        proxy.on_session_closed();
                    }
                }
            }),
            sync_begin: events.synchronization_begin.connect({
                let weak = proxy.downgrade();
                move |_| {
                    if let Some(proxy) = upgrade(&weak) {
                        proxy.update_idle();
                    }
                }
            }),
            sync_complete: events.synchronization_complete.connect({
                let weak = proxy.downgrade();
                move |_| {
                    if let Some(proxy) = upgrade(&weak) {
                        proxy.update_idle();
                    }
                }
            }),
            sync_failed_pre: events.synchronization_failed_pre.connect({
                let weak = proxy.downgrade();
                move |(connection, _)| {
                    if let Some(proxy) = upgrade(&weak) {
                        proxy.on_sync_failed_pre(connection);
                    }
                }
            }),
            sync_failed_post: events.synchronization_failed_post.connect({
                let weak = proxy.downgrade();
                move |_| {
                    if let Some(proxy) = upgrade(&weak) {
                        proxy.update_idle();
                    }
                }
            }),
            table_added: session.user_table().added.connect({
                let weak = proxy.downgrade();
                move |user| {
                    if let Some(proxy) = upgrade(&weak) {
                        proxy.on_user_added(user);
                    }
                }
            }),
        };
        *proxy.inner.wiring.borrow_mut() = Some(wiring);

        let member_removed = subscription_group.events().member_removed.connect({
            let weak = proxy.downgrade();
            move |connection| {
                if let Some(proxy) = upgrade(&weak) {
                    proxy.on_member_removed(connection);
                }
            }
        });
        proxy.inner.member_removed_handler.set(Some(member_removed));

        // A session still receiving its state is not idle, observably so
        // from the first query on.
        if session.status() == SessionStatus::Synchronizing {
            proxy.inner.idle.set(false);
        }

        session.set_subscription_group(Some(subscription_group.clone()));
        *proxy.inner.subscription_group.borrow_mut() = Some(subscription_group);

        proxy
    }

    pub fn io(&self) -> &Rc<dyn Io> {
        &self.inner.io
    }

    pub fn session(&self) -> &Rc<dyn Session> {
        &self.inner.session
    }

    pub fn events(&self) -> &ProxyEvents {
        &self.inner.events
    }

    /// The join rejection hook. The join is denied as soon as any connected
    /// listener returns `true`; with no listeners every join is accepted.
    pub fn reject_user_join(&self) -> &Hook<RejectUserJoin> {
        &self.inner.reject_user_join
    }

    // ------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------

    /// Subscribe `connection` to the session. `seq_id` must be unique for
    /// the connection; it prefixes every reply seq token. With `synchronize`
    /// the whole session state is first pushed to the peer inside the
    /// subscription group.
    ///
    /// `synchronize == false` is also how the synchronizing peer itself is
    /// subscribed during session bring-up, before the session is running.
    pub fn subscribe_to(
        &self,
        connection: Rc<dyn Connection>,
        seq_id: u32,
        synchronize: bool,
    ) -> Result<(), SubscribeError> {
        if self
            .inner
            .subscriptions
            .borrow()
            .find(connection.id())
            .is_some()
        {
            return Err(SubscribeError::AlreadySubscribed);
        }
        match self.inner.session.status() {
            SessionStatus::Running => {}
            SessionStatus::Synchronizing if !synchronize => {}
            _ => return Err(SubscribeError::SessionNotRunning),
        }
        let Some(group) = self.group() else {
            return Err(SubscribeError::SessionNotRunning);
        };

        group.add_member(connection.clone());
        self.inner
            .subscriptions
            .borrow_mut()
            .add(connection.clone(), seq_id);
        self.update_idle();

        tracing::info!(conn = %connection.id(), seq_id, synchronize, "connection subscribed");
        self.inner.events.add_subscription.emit(&SubscriptionAdded {
            connection: connection.clone(),
            seq_id,
        });

        if synchronize {
            // Synchronizing within the subscription group spares a group
            // change afterwards; the peer already receives other members'
            // requests to process once its own sync completes.
            self.inner.session.synchronize_to(group, connection);
        }
        Ok(())
    }

    /// Unsubscribe a subscribed connection. Cancels a still-running
    /// synchronization to the peer; otherwise the peer is told the session
    /// is going away with a `session-close` frame. Either way the connection
    /// leaves the transport group, which drives the local teardown.
    pub fn unsubscribe(&self, connection: &Rc<dyn Connection>) -> Result<(), UnsubscribeError> {
        if self.inner.session.status() != SessionStatus::Running {
            return Err(UnsubscribeError::SessionNotRunning);
        }
        if self
            .inner
            .subscriptions
            .borrow()
            .find(connection.id())
            .is_none()
        {
            return Err(UnsubscribeError::NotSubscribed);
        }
        self.teardown_subscription_transport(connection);
        Ok(())
    }

    /// Join a user directly at the server. The returned request is of kind
    /// `"user-join"` and is already completed when this returns; an optional
    /// completion callback observes the result first.
    pub fn join_user(
        &self,
        props: UserProps,
        completion: Option<Box<dyn FnOnce(&Request)>>,
    ) -> Rc<Request> {
        let request = Request::new(wire::USER_JOIN);
        let result = self.perform_user_join(None, None, props);
        request.finish(result);
        if let Some(completion) = completion {
            completion(&request);
        }
        request
    }

    pub fn is_subscribed(&self, connection: &ConnectionId) -> bool {
        self.inner.subscriptions.borrow().find(*connection).is_some()
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.inner.subscriptions.borrow().is_empty()
    }

    /// Whether the session has no subscriptions, no local users and no
    /// running synchronizations. The directory unloads idle sessions.
    pub fn is_idle(&self) -> bool {
        self.inner.idle.get()
    }

    /// Connections currently subscribed.
    pub fn subscribed_connections(&self) -> Vec<Rc<dyn Connection>> {
        self.inner.subscriptions.borrow().connections()
    }

    /// Users joined via one connection, if it is subscribed.
    pub fn users_for_connection(&self, connection: ConnectionId) -> Option<Vec<Rc<User>>> {
        self.inner
            .subscriptions
            .borrow()
            .find(connection)
            .map(|s| s.users.clone())
    }

    /// Users joined at the server without a peer connection.
    pub fn local_users(&self) -> Vec<Rc<User>> {
        self.inner.local_users.borrow().clone()
    }

    /// The id the next fresh join would be assigned.
    pub fn next_user_id(&self) -> u32 {
        self.inner.user_id_counter.get()
    }

    /// Tear the proxy down. Closes the session if it is still open (which
    /// unsubscribes every remaining connection and releases the group), then
    /// detaches every observer the proxy registered. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        if self.inner.session.status() != SessionStatus::Closed {
            self.inner.session.close();
        }
        if let Some(wiring) = self.inner.wiring.borrow_mut().take() {
            let events = self.inner.session.events();
            events.closed.disconnect(wiring.closed);
            events.synchronization_begin.disconnect(wiring.sync_begin);
            events
                .synchronization_complete
                .disconnect(wiring.sync_complete);
            events
                .synchronization_failed_pre
                .disconnect(wiring.sync_failed_pre);
            events
                .synchronization_failed_post
                .disconnect(wiring.sync_failed_post);
            self.inner
                .session
                .user_table()
                .added
                .disconnect(wiring.table_added);
        }
        debug_assert!(self.inner.subscriptions.borrow().is_empty());
        self.inner.local_users.borrow_mut().clear();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn downgrade(&self) -> Weak<ProxyInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn group(&self) -> Option<Rc<dyn HostedGroup>> {
        self.inner.subscription_group.borrow().clone()
    }

    fn note_user_id(&self, user: &User) {
        if self.inner.user_id_counter.get() <= user.id() {
            self.inner.user_id_counter.set(user.id() + 1);
        }
    }

    /// Recompute the idle flag; notify only on an actual edge.
    fn update_idle(&self) {
        let idle = self.inner.subscriptions.borrow().is_empty()
            && self.inner.local_users.borrow().is_empty()
            && !self.inner.session.has_synchronizations();
        if idle != self.inner.idle.get() {
            self.inner.idle.set(idle);
            tracing::debug!(idle, "idle changed");
            self.inner.events.idle_changed.emit(&idle);
        }
    }

    /// Attach the one-shot status observer that cleans up the proxy's
    /// bookkeeping when the user becomes unavailable.
    pub(crate) fn watch_user(&self, user: &Rc<User>) {
        let weak_proxy = self.downgrade();
        let weak_user = Rc::downgrade(user);
        let id_cell = Rc::new(Cell::new(None::<HandlerId>));

        let cell = id_cell.clone();
        let id = user.status_changed().connect(move |status| {
            if *status != UserStatus::Unavailable {
                return;
            }
            let Some(user) = weak_user.upgrade() else {
                return;
            };
            if let Some(proxy) = upgrade(&weak_proxy) {
                proxy.on_user_unavailable(&user);
            }
            if let Some(id) = cell.get() {
                user.status_changed().disconnect(id);
            }
        });
        id_cell.set(Some(id));
    }

    /// Record a freshly joined or rejoined user under the bookkeeping its
    /// origin dictates. Runs after the join frame went out.
    pub(crate) fn register_joined_user(
        &self,
        connection: Option<&Rc<dyn Connection>>,
        user: &Rc<User>,
    ) {
        match connection {
            Some(connection) => {
                let mut subscriptions = self.inner.subscriptions.borrow_mut();
                if let Some(subscription) = subscriptions.find_mut(connection.id()) {
                    subscription.users.push(user.clone());
                } else {
                    debug_assert!(false, "joining connection is not subscribed");
                }
            }
            None => {
                self.inner.local_users.borrow_mut().push(user.clone());
                self.update_idle();
            }
        }
    }

    /// A tracked user went unavailable: detach it from the subscription or
    /// local-user bookkeeping it was registered under.
    fn on_user_unavailable(&self, user: &Rc<User>) {
        if let Some(connection) = user.connection() {
            {
                let mut subscriptions = self.inner.subscriptions.borrow_mut();
                if let Some(subscription) = subscriptions.find_mut(connection.id()) {
                    subscription.users.retain(|u| !Rc::ptr_eq(u, user));
                }
            }
            user.set_connection(None);
        } else {
            self.inner
                .local_users
                .borrow_mut()
                .retain(|u| !Rc::ptr_eq(u, user));
            self.update_idle();
        }
        tracing::debug!(user = user.id(), name = %user.name(), "user unavailable");
    }

    /// The user table announced a new user. Keeps the id counter ahead of
    /// every id ever seen; during session bring-up it also enforces that
    /// available users belong to the synchronizing connection.
    fn on_user_added(&self, user: &Rc<User>) {
        self.note_user_id(user);

        if self.inner.session.status() != SessionStatus::Synchronizing {
            return;
        }
        if !user.status().is_available() {
            return;
        }

        let sync_connection = self.inner.session.sync_connection();
        let valid = match (&sync_connection, user.connection()) {
            (Some(sync_conn), Some(user_conn)) => {
                sync_conn.id() == user_conn.id()
                    && self
                        .inner
                        .subscriptions
                        .borrow()
                        .find(sync_conn.id())
                        .is_some()
            }
            _ => false,
        };

        if !valid {
            // During synchronization, available users always belong to the
            // synchronizing connection. Anything else is a protocol
            // violation that ends the session.
            tracing::warn!(
                user = user.id(),
                name = %user.name(),
                "available user outside the synchronizing connection, closing session"
            );
            self.inner.session.close();
            return;
        }

        if let Some(sync_conn) = sync_connection {
            if let Some(subscription) = self
                .inner
                .subscriptions
                .borrow_mut()
                .find_mut(sync_conn.id())
            {
                subscription.users.push(user.clone());
            }
        }
        self.watch_user(user);
    }

    /// The transport reports a connection gone from the group. Tell the
    /// remaining subscribers about the users it carried, then tear the
    /// subscription down.
    fn on_member_removed(&self, connection: &Rc<dyn Connection>) {
        let users = {
            let subscriptions = self.inner.subscriptions.borrow();
            match subscriptions.find(connection.id()) {
                Some(subscription) => subscription.users.clone(),
                None => return,
            }
        };

        // The departing connection is no longer a group member, so these
        // reach the remaining subscribers only. The actual status change
        // happens in the teardown below.
        for user in &users {
            self.inner
                .session
                .send_to_subscriptions(wire::user_status_change(
                    user.id(),
                    UserStatus::Unavailable,
                ));
        }

        self.remove_subscription(connection);
    }

    /// Remove a recorded subscription: drive its users unavailable (their
    /// status observers detach them one by one), drop the registry entry,
    /// recompute idle, then notify listeners of the removal.
    fn remove_subscription(&self, connection: &Rc<dyn Connection>) {
        loop {
            let user = {
                let subscriptions = self.inner.subscriptions.borrow();
                subscriptions
                    .find(connection.id())
                    .and_then(|s| s.users.first().cloned())
            };
            let Some(user) = user else {
                break;
            };
            user.set_status(UserStatus::Unavailable);
        }

        let removed = self.inner.subscriptions.borrow_mut().remove(connection.id());
        debug_assert!(removed.is_some());
        self.update_idle();

        tracing::info!(conn = %connection.id(), "connection unsubscribed");
        self.inner.events.remove_subscription.emit(connection);
    }

    /// Transport-side half of an unsubscribe: cancel a cancellable
    /// synchronization or say goodbye with `session-close`, then leave the
    /// group. Removal from the group is what triggers the local teardown,
    /// through `member_removed`.
    fn teardown_subscription_transport(&self, connection: &Rc<dyn Connection>) {
        let status = self.inner.session.synchronization_status(connection);
        if status == SyncStatus::InProgress {
            self.inner.session.cancel_synchronization(connection);
        } else {
            // Past InProgress everything has been flushed already; the peer
            // will reach the running state and process the close normally.
            if let Some(group) = self.group() {
                group.send_message(connection, wire::session_close());
            }
        }
        if let Some(group) = self.group() {
            group.remove_member(connection);
        }
    }

    fn on_sync_failed_pre(&self, connection: &Rc<dyn Connection>) {
        // While the session is synchronizing itself there are no
        // subscriptions to clean up.
        if self.inner.session.status() != SessionStatus::Running {
            return;
        }
        let subscribed = self
            .inner
            .subscriptions
            .borrow()
            .find(connection.id())
            .is_some();
        if subscribed {
            if let Some(group) = self.group() {
                group.remove_member(connection);
            }
        }
    }

    /// The session is closing. Runs while its synchronization bookkeeping is
    /// still intact, so per-peer sync state can still be consulted.
    fn on_session_closed(&self) {
        // Stop reacting to group departures first: the frames the handler
        // would broadcast could never reach the peers of a closing session.
        if let Some(id) = self.inner.member_removed_handler.take() {
            if let Some(group) = self.group() {
                group.events().member_removed.disconnect(id);
            }
        }

        loop {
            let connection = self.inner.subscriptions.borrow().first_connection();
            let Some(connection) = connection else {
                break;
            };
            self.teardown_subscription_transport(&connection);
            self.remove_subscription(&connection);
        }

        loop {
            let user = self.inner.local_users.borrow().first().cloned();
            let Some(user) = user else {
                break;
            };
            user.set_status(UserStatus::Unavailable);
        }

        // Released only after every frame of the close sequence went out.
        *self.inner.subscription_group.borrow_mut() = None;
        tracing::info!("session closed, subscriptions released");
    }
}

fn upgrade(weak: &Weak<ProxyInner>) -> Option<SessionProxy> {
    weak.upgrade().map(|inner| SessionProxy { inner })
}
