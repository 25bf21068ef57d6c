//! Reactor capability. All proxy state lives on one thread; callers on
//! other threads marshal their work through the session's `Io` handle.

use std::rc::Rc;

/// Handle to the reactor driving the session's callbacks.
pub trait Io {
    /// Run `f` on the reactor, after the current handler has returned.
    fn post(&self, f: Box<dyn FnOnce()>);
}

/// `Io` implementation dispatching onto the current tokio [`LocalSet`].
///
/// [`LocalSet`]: tokio::task::LocalSet
#[derive(Default)]
pub struct TokioIo;

impl TokioIo {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl Io for TokioIo {
    fn post(&self, f: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move { f() });
    }
}
