//! Users, the property bag the join pipeline works on, and the session's
//! user table.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::RequestError;
use crate::signal::Signal;
use crate::transport::Connection;

/// Property names understood by the join pipeline. Session engines may
/// define further properties of their own.
pub const PROP_NAME: &str = "name";
pub const PROP_ID: &str = "id";
pub const PROP_STATUS: &str = "status";
pub const PROP_FLAGS: &str = "flags";
pub const PROP_CONNECTION: &str = "connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
    Unavailable,
}

impl UserStatus {
    /// The status name used in frame attributes.
    pub fn as_wire(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Unavailable => "unavailable",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            "unavailable" => Some(UserStatus::Unavailable),
            _ => None,
        }
    }

    /// Available users occupy their name and belong to a subscription or the
    /// local user list; unavailable users linger in the table for rejoin.
    pub fn is_available(self) -> bool {
        self != UserStatus::Unavailable
    }
}

/// User flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserFlags(u32);

impl UserFlags {
    pub const NONE: UserFlags = UserFlags(0);
    /// The user was joined directly at the server, with no peer connection.
    pub const LOCAL: UserFlags = UserFlags(1 << 0);

    pub fn contains(self, other: UserFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A user known to the session. Owned by the session's [`UserTable`]; the
/// proxy only references it. `id` and `name` are fixed at construction,
/// everything else changes across the user's lifecycle.
#[derive(Debug)]
pub struct User {
    id: u32,
    name: String,
    status: Cell<UserStatus>,
    flags: Cell<UserFlags>,
    connection: RefCell<Option<Rc<dyn Connection>>>,
    status_changed: Signal<UserStatus>,
}

impl User {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        status: UserStatus,
        flags: UserFlags,
        connection: Option<Rc<dyn Connection>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status: Cell::new(status),
            flags: Cell::new(flags),
            connection: RefCell::new(connection),
            status_changed: Signal::new(),
        }
    }

    /// Build a user from a filled property bag. Intended for session engines
    /// implementing `Session::add_user`: `id` and `name` are required, the
    /// rest default.
    pub fn from_props(props: &UserProps) -> Result<User, RequestError> {
        let id = match props.get(PROP_ID) {
            Some(PropValue::Uint(id)) => *id,
            _ => return Err(RequestError::no_such_attribute(PROP_ID)),
        };
        let name = match props.get(PROP_NAME) {
            Some(PropValue::Str(name)) => name.clone(),
            _ => return Err(RequestError::no_such_attribute(PROP_NAME)),
        };
        let status = match props.get(PROP_STATUS) {
            Some(PropValue::Status(status)) => *status,
            _ => UserStatus::Active,
        };
        let flags = match props.get(PROP_FLAGS) {
            Some(PropValue::Flags(flags)) => *flags,
            _ => UserFlags::NONE,
        };
        let connection = match props.get(PROP_CONNECTION) {
            Some(PropValue::Connection(connection)) => connection.clone(),
            _ => None,
        };
        Ok(User::new(id, name, status, flags, connection))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> UserStatus {
        self.status.get()
    }

    /// Assign a status and notify observers. Every assignment notifies, so
    /// observers see session-initiated transitions as well as proxy-initiated
    /// ones.
    pub fn set_status(&self, status: UserStatus) {
        self.status.set(status);
        self.status_changed.emit(&status);
    }

    pub fn flags(&self) -> UserFlags {
        self.flags.get()
    }

    pub fn set_flags(&self, flags: UserFlags) {
        self.flags.set(flags);
    }

    pub fn is_local(&self) -> bool {
        self.flags.get().contains(UserFlags::LOCAL)
    }

    pub fn connection(&self) -> Option<Rc<dyn Connection>> {
        self.connection.borrow().clone()
    }

    pub fn set_connection(&self, connection: Option<Rc<dyn Connection>>) {
        *self.connection.borrow_mut() = connection;
    }

    pub fn status_changed(&self) -> &Signal<UserStatus> {
        &self.status_changed
    }
}

/// A value in the user property bag.
#[derive(Debug, Clone)]
pub enum PropValue {
    Str(String),
    Uint(u32),
    Status(UserStatus),
    Flags(UserFlags),
    Connection(Option<Rc<dyn Connection>>),
}

/// The heterogeneous keyed bag passed through the join pipeline. The
/// coordinator reads `name`, `id` and `status`, and fills `id`, `status`,
/// `flags` and `connection`; session engines may contribute further
/// properties of their own.
#[derive(Debug, Clone, Default)]
pub struct UserProps {
    props: Vec<(String, PropValue)>,
}

impl UserProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: PropValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.props.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a property, replacing any previous value of the same name.
    pub fn set(&mut self, name: &str, value: PropValue) {
        if let Some(prop) = self.props.iter_mut().find(|(n, _)| n == name) {
            prop.1 = value;
        } else {
            self.props.push((name.to_string(), value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.props.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// The session's user registry. Users are added once and never removed;
/// unavailable users keep their slot so a later rejoin can resurrect them
/// under the same id.
#[derive(Default)]
pub struct UserTable {
    users: RefCell<Vec<Rc<User>>>,
    /// Fires after a user has been inserted.
    pub added: Signal<Rc<User>>,
}

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user: Rc<User>) {
        debug_assert!(
            self.lookup(user.id()).is_none(),
            "duplicate user id {}",
            user.id()
        );
        self.users.borrow_mut().push(user.clone());
        self.added.emit(&user);
    }

    pub fn lookup(&self, id: u32) -> Option<Rc<User>> {
        self.users.borrow().iter().find(|u| u.id() == id).cloned()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Rc<User>> {
        self.users
            .borrow()
            .iter()
            .find(|u| u.name() == name)
            .cloned()
    }

    /// Snapshot of every user in the table, available or not.
    pub fn users(&self) -> Vec<Rc<User>> {
        self.users.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.users.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.borrow().is_empty()
    }
}
