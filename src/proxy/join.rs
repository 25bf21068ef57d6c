//! The user join/rejoin pipeline.

use std::rc::Rc;

use crate::error::RequestError;
use crate::session::Session;
use crate::transport::Connection;
use crate::user::{
    PropValue, User, UserFlags, UserProps, UserStatus, PROP_CONNECTION, PROP_FLAGS, PROP_ID,
    PROP_NAME, PROP_STATUS,
};
use crate::wire::{self, Xml};

use super::{RejectUserJoin, SessionProxy};

impl SessionProxy {
    /// Run the join protocol. `connection` is the originating peer, or
    /// `None` for a server-side join; `seq` is the already-derived reply
    /// token for remote joins.
    ///
    /// The bag is validated and filled in a fixed order; the first failing
    /// step wins. On success the join or rejoin frame is broadcast before
    /// the proxy's own bookkeeping changes.
    pub(crate) fn perform_user_join(
        &self,
        connection: Option<&Rc<dyn Connection>>,
        seq: Option<&str>,
        mut props: UserProps,
    ) -> Result<Rc<User>, RequestError> {
        let name = match props.get(PROP_NAME) {
            Some(PropValue::Str(name)) => name.clone(),
            _ => return Err(RequestError::no_such_attribute(PROP_NAME)),
        };

        // A user of the same name that went unavailable is resurrected
        // under its old id; an available one blocks the name.
        let rejoin = self.session().user_table().lookup_by_name(&name);
        if let Some(user) = &rejoin {
            if user.status().is_available() {
                return Err(RequestError::name_in_use(&name));
            }
        }

        // Ids are chosen on this side, never by the requester.
        if props.contains(PROP_ID) {
            return Err(RequestError::invalid_attribute(
                "\"id\" attribute must not be present in a user join request",
            ));
        }
        let id = match &rejoin {
            Some(user) => user.id(),
            None => self.next_user_id(),
        };
        props.set(PROP_ID, PropValue::Uint(id));

        match props.get(PROP_STATUS) {
            Some(PropValue::Status(UserStatus::Unavailable)) => {
                return Err(RequestError::invalid_attribute(
                    "\"status\" attribute is \"unavailable\" in user join request",
                ));
            }
            Some(PropValue::Status(_)) => {}
            Some(_) => {
                return Err(RequestError::invalid_attribute(
                    "\"status\" attribute has an invalid type",
                ));
            }
            None => props.set(PROP_STATUS, PropValue::Status(UserStatus::Active)),
        }

        // Flags and connection are derived here, never supplied.
        if props.contains(PROP_FLAGS) {
            return Err(RequestError::invalid_attribute(
                "\"flags\" attribute must not be present in a user join request",
            ));
        }
        let flags = if connection.is_none() {
            UserFlags::LOCAL
        } else {
            UserFlags::NONE
        };
        props.set(PROP_FLAGS, PropValue::Flags(flags));

        if props.contains(PROP_CONNECTION) {
            return Err(RequestError::invalid_attribute(
                "\"connection\" attribute must not be present in a user join request",
            ));
        }
        props.set(PROP_CONNECTION, PropValue::Connection(connection.cloned()));

        // Excluding the rejoin candidate avoids conflicts of the request
        // with the user it is about to resurrect.
        self.session().validate_user_props(&props, rejoin.as_ref())?;

        let rejected = self.reject_user_join().emit(&RejectUserJoin {
            connection: connection.cloned(),
            props: props.clone(),
            rejoin: rejoin.clone(),
        });
        if rejected {
            return Err(RequestError::not_authorized());
        }

        let rejoining = rejoin.is_some();
        let user = match rejoin {
            None => {
                // The table's `added` observer advances the id counter.
                self.session().add_user(&props)?
            }
            Some(user) => {
                // Name did not change and id is construct-only; apply the
                // rest onto the existing user.
                for (prop_name, value) in props.iter() {
                    match prop_name {
                        PROP_NAME | PROP_ID => {}
                        PROP_STATUS => {
                            if let PropValue::Status(status) = value {
                                user.set_status(*status);
                            }
                        }
                        PROP_FLAGS => {
                            if let PropValue::Flags(flags) = value {
                                user.set_flags(*flags);
                            }
                        }
                        PROP_CONNECTION => {
                            if let PropValue::Connection(conn) = value {
                                user.set_connection(conn.clone());
                            }
                        }
                        other => {
                            tracing::debug!(prop = other, "unapplied rejoin property");
                        }
                    }
                }
                user
            }
        };

        let mut frame = Xml::new(if rejoining {
            wire::USER_REJOIN
        } else {
            wire::USER_JOIN
        });
        self.session().user_to_xml(&user, &mut frame);
        if let Some(seq) = seq {
            frame.set_attr(wire::ATTR_SEQ, seq);
        }

        self.watch_user(&user);
        self.session().send_to_subscriptions(frame);

        self.register_joined_user(connection, &user);

        tracing::info!(
            user = user.id(),
            name = %user.name(),
            rejoin = rejoining,
            local = connection.is_none(),
            "user joined"
        );
        Ok(user)
    }
}
