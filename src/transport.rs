//! Transport capabilities: peer connections and the hosted multicast group
//! that delivers session frames to every subscriber.

use std::fmt;
use std::rc::Rc;

use crate::signal::Signal;
use crate::wire::Xml;

/// Stable identity of a peer connection within one proxy's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A remote peer connection. The proxy never reads or writes the connection
/// directly; frames travel through the hosted group. Only identity matters
/// here.
pub trait Connection: fmt::Debug {
    fn id(&self) -> ConnectionId;
}

/// How a received frame is propagated by the transport after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Handled between the two endpoints only; never relayed.
    PointToPoint,
    /// Relayed to the rest of the group.
    Group,
}

/// Events a hosted group reports to its communication object.
#[derive(Default)]
pub struct GroupEvents {
    /// A member connection left the group, voluntarily or by connection loss.
    pub member_removed: Signal<Rc<dyn Connection>>,
}

impl GroupEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The transport-level multicast group owning frame delivery to all
/// subscribed peers of one session.
pub trait HostedGroup {
    fn add_member(&self, connection: Rc<dyn Connection>);

    /// Remove a member. Implementations emit `member_removed` for members
    /// actually present and treat unknown connections as a no-op.
    fn remove_member(&self, connection: &Rc<dyn Connection>);

    /// Send a frame to a single member, point-to-point.
    fn send_message(&self, connection: &Rc<dyn Connection>, frame: Xml);

    fn events(&self) -> &GroupEvents;
}
