use std::cell::RefCell;
use std::rc::Rc;

pub type ListenerId = u64;

struct Listeners<T> {
    next_id: ListenerId,
    entries: Vec<(ListenerId, Rc<dyn Fn(&T)>)>,
}

/// A shared list of callbacks for one kind of event.
///
/// Clones share the same listener list. Listeners may add or remove
/// listeners (including themselves) while the event is being triggered;
/// a listener removed mid-trigger is not called afterwards, and a listener
/// added mid-trigger first runs on the next trigger.
pub struct EventWrapper<T> {
    inner: Rc<RefCell<Listeners<T>>>,
}

impl<T> EventWrapper<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Listeners {
                next_id: 1,
                entries: Vec::new(),
            })),
        }
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, Rc::new(listener)));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|(entry_id, _)| *entry_id != id);
        inner.entries.len() != before
    }

    pub fn trigger(&self, args: &T) {
        let snapshot: Vec<(ListenerId, Rc<dyn Fn(&T)>)> = self
            .inner
            .borrow()
            .entries
            .iter()
            .map(|(id, listener)| (*id, Rc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            if self.contains(id) {
                listener(args);
            }
        }
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.inner.borrow().entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().entries.clear();
    }
}

impl<T> Clone for EventWrapper<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventWrapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventWrapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWrapper")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
