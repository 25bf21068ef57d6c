//! Loopback demonstration of the session proxy.
//!
//! Builds a toy note-list session and an in-process hosted group, then
//! walks through the whole lifecycle on a single-threaded reactor:
//! subscribe with synchronization, remote user join, a forwarded session
//! frame, a server-side local join, unsubscribe, dispose. Frames and idle
//! transitions show up in the log.
//!
//! Run with `RUST_LOG=debug` to see the per-frame dispatch records.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_session::config::Config;
use tandem_session::error::RequestError;
use tandem_session::io::{Io, TokioIo};
use tandem_session::session::{Session, SessionEvents, SessionStatus, SyncStatus};
use tandem_session::transport::{Connection, ConnectionId, GroupEvents, HostedGroup, Scope};
use tandem_session::user::{
    PropValue, User, UserProps, UserStatus, UserTable, PROP_ID, PROP_NAME, PROP_STATUS,
};
use tandem_session::wire::{self, Xml};
use tandem_session::SessionProxy;

#[derive(Debug)]
struct DemoConnection(ConnectionId);

impl Connection for DemoConnection {
    fn id(&self) -> ConnectionId {
        self.0
    }
}

#[derive(Default)]
struct DemoGroup {
    members: RefCell<Vec<Rc<dyn Connection>>>,
    events: GroupEvents,
}

impl HostedGroup for DemoGroup {
    fn add_member(&self, connection: Rc<dyn Connection>) {
        tracing::debug!(conn = %connection.id(), "group member added");
        self.members.borrow_mut().push(connection);
    }

    fn remove_member(&self, connection: &Rc<dyn Connection>) {
        let removed = {
            let mut members = self.members.borrow_mut();
            let before = members.len();
            members.retain(|member| member.id() != connection.id());
            members.len() != before
        };
        if removed {
            tracing::debug!(conn = %connection.id(), "group member removed");
            self.events.member_removed.emit(connection);
        }
    }

    fn send_message(&self, connection: &Rc<dyn Connection>, frame: Xml) {
        tracing::info!(to = %connection.id(), %frame, "frame sent");
    }

    fn events(&self) -> &GroupEvents {
        &self.events
    }
}

/// A minimal session engine: the shared document is a list of notes.
struct DemoSession {
    name: String,
    status: Cell<SessionStatus>,
    table: UserTable,
    events: SessionEvents,
    group: RefCell<Option<Rc<dyn HostedGroup>>>,
    syncs: RefCell<HashMap<ConnectionId, SyncStatus>>,
    notes: RefCell<Vec<String>>,
}

impl DemoSession {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: Cell::new(SessionStatus::Running),
            table: UserTable::new(),
            events: SessionEvents::new(),
            group: RefCell::new(None),
            syncs: RefCell::new(HashMap::new()),
            notes: RefCell::new(Vec::new()),
        }
    }
}

impl Session for DemoSession {
    fn status(&self) -> SessionStatus {
        self.status.get()
    }

    fn user_table(&self) -> &UserTable {
        &self.table
    }

    fn events(&self) -> &SessionEvents {
        &self.events
    }

    fn send_to_subscriptions(&self, frame: Xml) {
        if self.group.borrow().is_none() {
            tracing::warn!(session = %self.name, "broadcast without a subscription group");
            return;
        }
        tracing::info!(session = %self.name, %frame, "broadcast");
    }

    fn get_xml_user_props(
        &self,
        _connection: Option<&Rc<dyn Connection>>,
        frame: &Xml,
    ) -> Result<UserProps, RequestError> {
        let mut props = UserProps::new();
        if let Some(name) = frame.attr(wire::ATTR_NAME) {
            props.set(PROP_NAME, PropValue::Str(name.to_string()));
        }
        if let Some(id) = frame.attr_u32(wire::ATTR_ID)? {
            props.set(PROP_ID, PropValue::Uint(id));
        }
        if let Some(status) = frame.attr(wire::ATTR_STATUS) {
            let status = UserStatus::from_wire(status).ok_or_else(|| {
                RequestError::invalid_attribute(format!("unknown status \"{status}\""))
            })?;
            props.set(PROP_STATUS, PropValue::Status(status));
        }
        Ok(props)
    }

    fn validate_user_props(
        &self,
        props: &UserProps,
        _exclude: Option<&Rc<User>>,
    ) -> Result<(), RequestError> {
        match props.get(PROP_NAME) {
            Some(PropValue::Str(name)) if !name.is_empty() => Ok(()),
            _ => Err(RequestError::invalid_attribute("user name must not be empty")),
        }
    }

    fn add_user(&self, props: &UserProps) -> Result<Rc<User>, RequestError> {
        let user = Rc::new(User::from_props(props)?);
        self.table.add(user.clone());
        Ok(user)
    }

    fn user_to_xml(&self, user: &User, frame: &mut Xml) {
        frame.set_attr_u32(wire::ATTR_ID, user.id());
        frame.set_attr(wire::ATTR_NAME, user.name());
        frame.set_attr(wire::ATTR_STATUS, user.status().as_wire());
    }

    fn has_synchronizations(&self) -> bool {
        !self.syncs.borrow().is_empty()
    }

    fn synchronization_status(&self, connection: &Rc<dyn Connection>) -> SyncStatus {
        self.syncs
            .borrow()
            .get(&connection.id())
            .copied()
            .unwrap_or(SyncStatus::None)
    }

    fn sync_connection(&self) -> Option<Rc<dyn Connection>> {
        None
    }

    fn synchronize_to(&self, group: Rc<dyn HostedGroup>, connection: Rc<dyn Connection>) {
        self.syncs.borrow_mut().insert(connection.id(), SyncStatus::InProgress);
        self.events.synchronization_begin.emit(&connection);

        // The whole state fits in one frame here, so the push completes on
        // the spot.
        let mut state = Xml::new("sync-state");
        state.set_attr_u32("notes", self.notes.borrow().len() as u32);
        group.send_message(&connection, state);

        self.syncs.borrow_mut().remove(&connection.id());
        self.events.synchronization_complete.emit(&connection);
    }

    fn cancel_synchronization(&self, connection: &Rc<dyn Connection>) {
        if self.syncs.borrow_mut().remove(&connection.id()).is_some() {
            tracing::info!(conn = %connection.id(), "synchronization cancelled");
        }
    }

    fn set_subscription_group(&self, group: Option<Rc<dyn HostedGroup>>) {
        *self.group.borrow_mut() = group;
    }

    fn close(&self) {
        if self.status.get() == SessionStatus::Closed {
            return;
        }
        self.events.closed.emit(&());
        self.status.set(SessionStatus::Closed);
        self.syncs.borrow_mut().clear();
    }

    fn receive(&self, connection: &Rc<dyn Connection>, frame: &Xml) -> Scope {
        match frame.name() {
            "note-add" => {
                let text = frame.attr("text").unwrap_or_default().to_string();
                tracing::info!(from = %connection.id(), %text, "note added");
                self.notes.borrow_mut().push(text);
                Scope::Group
            }
            other => {
                tracing::debug!(from = %connection.id(), element = other, "unhandled session frame");
                Scope::PointToPoint
            }
        }
    }

    fn sent(&self, connection: &Rc<dyn Connection>, frame: &Xml) {
        tracing::debug!(to = %connection.id(), element = frame.name(), "frame fully sent");
    }

    fn enqueued(&self, connection: &Rc<dyn Connection>, frame: &Xml) {
        tracing::debug!(to = %connection.id(), element = frame.name(), "frame enqueued");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let local = tokio::task::LocalSet::new();
    local.run_until(run(config)).await;
}

async fn run(config: Config) {
    let io: Rc<dyn Io> = TokioIo::new();
    let session = Rc::new(DemoSession::new(&config.session_name));
    let group = Rc::new(DemoGroup::default());
    let proxy = SessionProxy::new(io.clone(), session, group);

    proxy
        .events()
        .idle_changed
        .connect(|idle| tracing::info!(idle, "session idle state"));

    tracing::info!(session = %config.session_name, "session proxy ready");

    let alice: Rc<dyn Connection> = Rc::new(DemoConnection(ConnectionId(1)));
    proxy
        .subscribe_to(alice.clone(), 7, true)
        .expect("subscribing a fresh connection");

    // Inbound traffic arrives through the reactor, like frames decoded off
    // a socket would.
    {
        let proxy = proxy.clone();
        let alice = alice.clone();
        io.post(Box::new(move || {
            let join = Xml::new(wire::USER_JOIN)
                .with_attr(wire::ATTR_NAME, "alice")
                .with_attr(wire::ATTR_SEQ, "1");
            proxy.received(&alice, &join);

            let note = Xml::new("note-add").with_attr("text", "hello from alice");
            proxy.received(&alice, &note);
        }));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let request = proxy.join_user(
        UserProps::new().with(PROP_NAME, PropValue::Str(config.local_user.clone())),
        None,
    );
    match request.result() {
        Some(Ok(user)) => tracing::info!(user = user.id(), name = %user.name(), "local join complete"),
        Some(Err(error)) => tracing::warn!(%error, "local join failed"),
        None => unreachable!("join requests complete synchronously"),
    }

    proxy
        .unsubscribe(&alice)
        .expect("unsubscribing a subscribed connection");
    proxy.dispose();
}
