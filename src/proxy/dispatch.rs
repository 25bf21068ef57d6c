//! Inbound frame classification and reply emission.

use std::rc::Rc;

use crate::error::RequestError;
use crate::session::{Session, SyncStatus};
use crate::transport::{Connection, HostedGroup, Scope};
use crate::wire::{self, Xml};

use super::SessionProxy;

impl SessionProxy {
    /// Process a frame the transport delivered to this proxy.
    ///
    /// Frames from a connection the session is synchronizing with go to the
    /// session untouched. Everything else is either proxy-owned
    /// (`user-join`, `session-unsubscribe`) or forwarded. Proxy-owned
    /// traffic is never relayed; a failed proxy-owned request is answered
    /// with `request-failed` to the sender alone.
    pub fn received(&self, connection: &Rc<dyn Connection>, frame: &Xml) -> Scope {
        if self.session().synchronization_status(connection) != SyncStatus::None {
            return self.session().receive(connection, frame);
        }

        if !self.is_subscribed(&connection.id()) {
            tracing::warn!(
                conn = %connection.id(),
                element = frame.name(),
                "frame from unsubscribed connection"
            );
            return Scope::PointToPoint;
        }

        let result = match frame.name() {
            wire::USER_JOIN => self.handle_user_join(connection, frame),
            wire::SESSION_UNSUBSCRIBE => self.handle_session_unsubscribe(connection),
            _ => return self.session().receive(connection, frame),
        };

        if let Err(error) = result {
            tracing::debug!(
                conn = %connection.id(),
                element = frame.name(),
                domain = error.domain(),
                code = error.code(),
                "request failed: {}",
                error.message()
            );
            let seq = self.make_seq(connection, frame).unwrap_or(None);
            let reply = wire::request_failed(&error, seq.as_deref());
            if let Some(group) = self.group() {
                group.send_message(connection, reply);
            }
        }

        Scope::PointToPoint
    }

    /// Outbound delivery notification from the transport; the session keeps
    /// its own bookkeeping of both.
    pub fn sent(&self, connection: &Rc<dyn Connection>, frame: &Xml) {
        self.session().sent(connection, frame);
    }

    pub fn enqueued(&self, connection: &Rc<dyn Connection>, frame: &Xml) {
        self.session().enqueued(connection, frame);
    }

    fn handle_user_join(
        &self,
        connection: &Rc<dyn Connection>,
        frame: &Xml,
    ) -> Result<(), RequestError> {
        let seq = self.make_seq(connection, frame)?;
        let props = self.session().get_xml_user_props(Some(connection), frame)?;
        self.perform_user_join(Some(connection), seq.as_deref(), props)?;
        Ok(())
    }

    fn handle_session_unsubscribe(&self, connection: &Rc<dyn Connection>) -> Result<(), RequestError> {
        // Dropping the membership is enough; the group's member-removed
        // event drives the rest of the unsubscription.
        if let Some(group) = self.group() {
            group.remove_member(connection);
        }
        Ok(())
    }

    /// Derive the reply seq token. An inbound frame carrying numeric `seq`
    /// is answered with `"{seq_id}/{seq}"`; a frame without `seq` is
    /// answered without one. A malformed `seq` is a protocol error.
    pub(crate) fn make_seq(
        &self,
        connection: &Rc<dyn Connection>,
        frame: &Xml,
    ) -> Result<Option<String>, RequestError> {
        let Some(seq_num) = frame.attr_u32(wire::ATTR_SEQ)? else {
            return Ok(None);
        };
        let subscriptions = self.inner.subscriptions.borrow();
        let Some(subscription) = subscriptions.find(connection.id()) else {
            return Ok(None);
        };
        Ok(Some(format!("{}/{}", subscription.seq_id, seq_num)))
    }
}
