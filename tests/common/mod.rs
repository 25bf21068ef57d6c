#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tandem_session::error::RequestError;
use tandem_session::io::Io;
use tandem_session::session::{Session, SessionEvents, SessionStatus, SyncStatus};
use tandem_session::transport::{Connection, ConnectionId, GroupEvents, HostedGroup, Scope};
use tandem_session::user::{
    PropValue, User, UserProps, UserStatus, UserTable, PROP_ID, PROP_NAME, PROP_STATUS,
};
use tandem_session::wire::{self, Xml};
use tandem_session::SessionProxy;

#[derive(Debug)]
pub struct TestConnection(pub ConnectionId);

impl Connection for TestConnection {
    fn id(&self) -> ConnectionId {
        self.0
    }
}

pub fn conn(id: u64) -> Rc<dyn Connection> {
    Rc::new(TestConnection(ConnectionId(id)))
}

/// `Io` that runs posted work immediately; the tests are synchronous.
pub struct ImmediateIo;

impl Io for ImmediateIo {
    fn post(&self, f: Box<dyn FnOnce()>) {
        f()
    }
}

/// In-process hosted group capturing membership changes and point-to-point
/// frames.
#[derive(Default)]
pub struct TestGroup {
    pub members: RefCell<Vec<Rc<dyn Connection>>>,
    pub direct: RefCell<Vec<(ConnectionId, Xml)>>,
    events: GroupEvents,
}

impl TestGroup {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.members.borrow().iter().any(|c| c.id() == id)
    }

    /// Frames sent point-to-point to one connection.
    pub fn direct_to(&self, id: ConnectionId) -> Vec<Xml> {
        self.direct
            .borrow()
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Simulate the transport noticing a lost connection.
    pub fn drop_member(&self, connection: &Rc<dyn Connection>) {
        self.remove_member(connection);
    }
}

impl HostedGroup for TestGroup {
    fn add_member(&self, connection: Rc<dyn Connection>) {
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
            self.events.member_removed.emit(connection);
        }
    }

    fn send_message(&self, connection: &Rc<dyn Connection>, frame: Xml) {
        self.direct.borrow_mut().push((connection.id(), frame));
    }

    fn events(&self) -> &GroupEvents {
        &self.events
    }
}

/// Scriptable session engine capturing everything the proxy does to it.
pub struct TestSession {
    pub status: Cell<SessionStatus>,
    table: UserTable,
    events: SessionEvents,
    pub group: RefCell<Option<Rc<dyn HostedGroup>>>,
    pub broadcasts: RefCell<Vec<Xml>>,
    pub forwarded: RefCell<Vec<(ConnectionId, Xml)>>,
    pub sent_log: RefCell<Vec<(ConnectionId, Xml)>>,
    pub enqueued_log: RefCell<Vec<(ConnectionId, Xml)>>,
    pub syncs: RefCell<HashMap<ConnectionId, SyncStatus>>,
    pub sync_conn: RefCell<Option<Rc<dyn Connection>>>,
    pub sync_requests: RefCell<Vec<ConnectionId>>,
    pub cancelled: RefCell<Vec<ConnectionId>>,
    pub validate_error: RefCell<Option<RequestError>>,
    pub forward_scope: Cell<Scope>,
}

impl TestSession {
    pub fn new(status: SessionStatus) -> Rc<Self> {
        Rc::new(Self {
            status: Cell::new(status),
            table: UserTable::new(),
            events: SessionEvents::new(),
            group: RefCell::new(None),
            broadcasts: RefCell::new(Vec::new()),
            forwarded: RefCell::new(Vec::new()),
            sent_log: RefCell::new(Vec::new()),
            enqueued_log: RefCell::new(Vec::new()),
            syncs: RefCell::new(HashMap::new()),
            sync_conn: RefCell::new(None),
            sync_requests: RefCell::new(Vec::new()),
            cancelled: RefCell::new(Vec::new()),
            validate_error: RefCell::new(None),
            forward_scope: Cell::new(Scope::Group),
        })
    }

    pub fn broadcast_frames(&self) -> Vec<Xml> {
        self.broadcasts.borrow().clone()
    }

    pub fn last_broadcast(&self) -> Option<Xml> {
        self.broadcasts.borrow().last().cloned()
    }

    /// Register a synchronization without going through `synchronize_to`.
    pub fn set_sync(&self, connection: &Rc<dyn Connection>, status: SyncStatus) {
        self.syncs.borrow_mut().insert(connection.id(), status);
    }

    /// Finish a registered synchronization and notify observers.
    pub fn complete_sync(&self, connection: &Rc<dyn Connection>) {
        self.syncs.borrow_mut().remove(&connection.id());
        self.events.synchronization_complete.emit(connection);
    }

    /// Fail a registered synchronization, both phases.
    pub fn fail_sync(&self, connection: &Rc<dyn Connection>, error: RequestError) {
        self.events
            .synchronization_failed_pre
            .emit(&(connection.clone(), error.clone()));
        self.syncs.borrow_mut().remove(&connection.id());
        self.events
            .synchronization_failed_post
            .emit(&(connection.clone(), error));
    }
}

impl Session for TestSession {
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
        self.broadcasts.borrow_mut().push(frame);
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
        _props: &UserProps,
        _exclude: Option<&Rc<User>>,
    ) -> Result<(), RequestError> {
        match self.validate_error.borrow().clone() {
            Some(error) => Err(error),
            None => Ok(()),
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
        self.sync_conn.borrow().clone()
    }

    fn synchronize_to(&self, _group: Rc<dyn HostedGroup>, connection: Rc<dyn Connection>) {
        self.sync_requests.borrow_mut().push(connection.id());
        self.syncs
            .borrow_mut()
            .insert(connection.id(), SyncStatus::InProgress);
        self.events.synchronization_begin.emit(&connection);
    }

    fn cancel_synchronization(&self, connection: &Rc<dyn Connection>) {
        self.cancelled.borrow_mut().push(connection.id());
        self.syncs.borrow_mut().remove(&connection.id());
    }

    fn set_subscription_group(&self, group: Option<Rc<dyn HostedGroup>>) {
        *self.group.borrow_mut() = group;
    }

    fn close(&self) {
        if self.status.get() == SessionStatus::Closed {
            return;
        }
        // Observers run first, while the sync bookkeeping is still intact.
        self.events.closed.emit(&());
        self.status.set(SessionStatus::Closed);
        self.syncs.borrow_mut().clear();
    }

    fn receive(&self, connection: &Rc<dyn Connection>, frame: &Xml) -> Scope {
        self.forwarded
            .borrow_mut()
            .push((connection.id(), frame.clone()));
        self.forward_scope.get()
    }

    fn sent(&self, connection: &Rc<dyn Connection>, frame: &Xml) {
        self.sent_log
            .borrow_mut()
            .push((connection.id(), frame.clone()));
    }

    fn enqueued(&self, connection: &Rc<dyn Connection>, frame: &Xml) {
        self.enqueued_log
            .borrow_mut()
            .push((connection.id(), frame.clone()));
    }
}

pub struct Fixture {
    pub session: Rc<TestSession>,
    pub group: Rc<TestGroup>,
    pub proxy: SessionProxy,
}

pub fn fixture_with_status(status: SessionStatus) -> Fixture {
    let session = TestSession::new(status);
    let group = TestGroup::new();
    let proxy = SessionProxy::new(Rc::new(ImmediateIo), session.clone(), group.clone());
    Fixture {
        session,
        group,
        proxy,
    }
}

pub fn fixture() -> Fixture {
    fixture_with_status(SessionStatus::Running)
}

/// An inbound `user-join` frame as a peer would send it.
pub fn join_frame(name: &str, seq: Option<&str>) -> Xml {
    let mut frame = Xml::new(wire::USER_JOIN).with_attr(wire::ATTR_NAME, name);
    if let Some(seq) = seq {
        frame.set_attr(wire::ATTR_SEQ, seq);
    }
    frame
}

/// Counts emissions of the proxy's idle notification.
pub fn track_idle(proxy: &SessionProxy) -> Rc<RefCell<Vec<bool>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let tracker = seen.clone();
    proxy
        .events()
        .idle_changed
        .connect(move |idle| tracker.borrow_mut().push(*idle));
    seen
}
