//! The capability interface the proxy requires from a session engine.

use std::rc::Rc;

use crate::error::RequestError;
use crate::signal::Signal;
use crate::transport::{Connection, HostedGroup, Scope};
use crate::user::{User, UserProps, UserTable};
use crate::wire::Xml;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session state is still being received from a remote peer.
    Synchronizing,
    Running,
    Closed,
}

/// State of a synchronization between the session and one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    None,
    /// Still streaming; the synchronization can be cancelled.
    InProgress,
    /// Fully sent, waiting for the peer's acknowledgement. Too late to
    /// cancel.
    AwaitingAck,
}

/// Lifecycle notifications a session engine delivers to its observers.
///
/// `closed` fires while the session's synchronization bookkeeping is still
/// intact, before the status flips to [`SessionStatus::Closed`], so close
/// handlers can still consult it. Synchronization failure is reported in two
/// phases: `_pre` before the session discards its own record of the failed
/// synchronization, `_post` after.
#[derive(Default)]
pub struct SessionEvents {
    pub closed: Signal<()>,
    pub synchronization_begin: Signal<Rc<dyn Connection>>,
    pub synchronization_complete: Signal<Rc<dyn Connection>>,
    pub synchronization_failed_pre: Signal<(Rc<dyn Connection>, RequestError)>,
    pub synchronization_failed_post: Signal<(Rc<dyn Connection>, RequestError)>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A live collaborative session, seen through the operations the proxy
/// needs. The document model, operational transformation and the sync
/// protocol all stay behind this interface.
pub trait Session {
    fn status(&self) -> SessionStatus;

    fn user_table(&self) -> &UserTable;

    fn events(&self) -> &SessionEvents;

    /// Broadcast a frame to every subscribed connection through the
    /// session's subscription group.
    fn send_to_subscriptions(&self, frame: Xml);

    /// Extract the session-specific user properties carried by a `user-join`
    /// frame. Implementations map only wire-visible properties (`name`,
    /// `status`, a client-supplied `id`, …); `flags` and `connection` are
    /// filled by the coordinator.
    fn get_xml_user_props(
        &self,
        connection: Option<&Rc<dyn Connection>>,
        frame: &Xml,
    ) -> Result<UserProps, RequestError>;

    /// Validate a filled property bag against session rules. `exclude` names
    /// a rejoin candidate whose own name and id must not count as conflicts.
    fn validate_user_props(
        &self,
        props: &UserProps,
        exclude: Option<&Rc<User>>,
    ) -> Result<(), RequestError>;

    /// Construct a user from a validated property bag and insert it into the
    /// user table (which announces it through `added`).
    fn add_user(&self, props: &UserProps) -> Result<Rc<User>, RequestError>;

    /// Serialize the full user state onto a frame.
    fn user_to_xml(&self, user: &User, frame: &mut Xml);

    fn has_synchronizations(&self) -> bool;

    fn synchronization_status(&self, connection: &Rc<dyn Connection>) -> SyncStatus;

    /// The connection this session is being synchronized from, while the
    /// status is [`SessionStatus::Synchronizing`].
    fn sync_connection(&self) -> Option<Rc<dyn Connection>>;

    /// Start pushing the session state to `connection` within `group`.
    fn synchronize_to(&self, group: Rc<dyn HostedGroup>, connection: Rc<dyn Connection>);

    fn cancel_synchronization(&self, connection: &Rc<dyn Connection>);

    fn set_subscription_group(&self, group: Option<Rc<dyn HostedGroup>>);

    /// Close the session. Emits `closed` (observers first, then internal
    /// teardown) and flips the status to [`SessionStatus::Closed`].
    fn close(&self);

    /// Process a frame the proxy forwards instead of handling itself.
    fn receive(&self, connection: &Rc<dyn Connection>, frame: &Xml) -> Scope;

    /// Delivery bookkeeping forwarded from the transport.
    fn sent(&self, connection: &Rc<dyn Connection>, frame: &Xml);

    fn enqueued(&self, connection: &Rc<dyn Connection>, frame: &Xml);
}
