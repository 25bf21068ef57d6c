//! Listener lists for the proxy's observable events.
//!
//! `Signal` is a plain multi-listener event: connect, disconnect, emit.
//! `Hook` is the boolean-accumulating variant used for join rejection: the
//! emission result is `true` as soon as any listener returns `true`.
//!
//! Emission snapshots the handler list first, so a listener may disconnect
//! itself (or any other listener) while the event is being delivered.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Token identifying a connected listener, used to disconnect it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub struct Signal<A: 'static> {
    next_id: Cell<u64>,
    handlers: RefCell<Vec<(HandlerId, Rc<dyn Fn(&A)>)>>,
}

impl<A: 'static> std::fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("next_id", &self.next_id)
            .field("handler_count", &self.handlers.borrow().len())
            .finish()
    }
}

impl<A: 'static> Signal<A> {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            handlers: RefCell::new(Vec::new()),
        }
    }

    pub fn connect(&self, handler: impl Fn(&A) + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Returns `false` when the handler was already gone.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn emit(&self, arg: &A) {
        let snapshot: Vec<Rc<dyn Fn(&A)>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(arg);
        }
    }
}

impl<A: 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// A boolean-accumulating listener list. Listeners are consulted in
/// connection order; the first one to return `true` wins and the remaining
/// listeners are not called. With no listeners the result is `false`.
pub struct Hook<A: 'static> {
    next_id: Cell<u64>,
    handlers: RefCell<Vec<(HandlerId, Rc<dyn Fn(&A) -> bool>)>>,
}

impl<A: 'static> Hook<A> {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            handlers: RefCell::new(Vec::new()),
        }
    }

    pub fn connect(&self, handler: impl Fn(&A) -> bool + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn emit(&self, arg: &A) -> bool {
        let snapshot: Vec<Rc<dyn Fn(&A) -> bool>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        snapshot.into_iter().any(|handler| handler(arg))
    }
}

impl<A: 'static> Default for Hook<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_calls_listeners_in_connection_order() {
        let signal = Signal::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s1 = seen.clone();
        signal.connect(move |v| s1.borrow_mut().push(("a", *v)));
        let s2 = seen.clone();
        signal.connect(move |v| s2.borrow_mut().push(("b", *v)));

        signal.emit(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn disconnect_removes_listener() {
        let signal = Signal::<()>::new();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let id = signal.connect(move |_| c.set(c.get() + 1));

        signal.emit(&());
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&());

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn listener_can_disconnect_itself_during_emission() {
        let signal = Rc::new(Signal::<()>::new());
        let count = Rc::new(Cell::new(0));

        let id_cell = Rc::new(Cell::new(None));
        let c = count.clone();
        let sig = signal.clone();
        let cell = id_cell.clone();
        let id = signal.connect(move |_| {
            c.set(c.get() + 1);
            if let Some(id) = cell.get() {
                sig.disconnect(id);
            }
        });
        id_cell.set(Some(id));

        signal.emit(&());
        signal.emit(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn hook_defaults_to_accept() {
        let hook = Hook::<u32>::new();
        assert!(!hook.emit(&1));
    }

    #[test]
    fn hook_short_circuits_on_first_reject() {
        let hook = Hook::<u32>::new();
        let later_called = Rc::new(Cell::new(false));

        hook.connect(|_| false);
        hook.connect(|_| true);
        let flag = later_called.clone();
        hook.connect(move |_| {
            flag.set(true);
            false
        });

        assert!(hook.emit(&1));
        assert!(!later_called.get());
    }
}
