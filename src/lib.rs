//! Server-side session proxy for the Tandem collaborative editing substrate.
//!
//! A [`SessionProxy`] manages exactly one live session. It tracks the peer
//! connections subscribed to the session's change-stream, runs the user
//! join/rejoin protocol, keeps the derived `idle` flag that the directory
//! uses to decide when a session can be unloaded, and routes inbound frames
//! between proxy-owned handling and the underlying session engine.

pub mod config;
pub mod error;
pub mod io;
pub mod proxy;
pub mod session;
pub mod signal;
pub mod transport;
pub mod user;
pub mod wire;

pub use proxy::{Request, SessionProxy};
