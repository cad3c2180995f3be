use std::cell::RefCell;
use std::rc::Rc;

pub type HookId = u64;

type Hook = Rc<RefCell<dyn FnMut(f64)>>;

struct SchedulerState {
    next_id: HookId,
    hooks: Vec<(HookId, Hook)>,
    frame: u64,
}

/// Runs registered per-frame hooks once per [`tick`](UpdateScheduler::tick).
///
/// Clones share the same hook list. A hook removed during a tick is skipped
/// if it has not run yet; a hook added during a tick first runs on the next.
#[derive(Clone)]
pub struct UpdateScheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SchedulerState {
                next_id: 1,
                hooks: Vec::new(),
                frame: 0,
            })),
        }
    }

    pub fn add<F>(&self, hook: F) -> HookId
    where
        F: FnMut(f64) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.hooks.push((id, Rc::new(RefCell::new(hook))));
        id
    }

    pub fn remove(&self, id: HookId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.hooks.len();
        state.hooks.retain(|(hook_id, _)| *hook_id != id);
        state.hooks.len() != before
    }

    pub fn contains(&self, id: HookId) -> bool {
        self.state.borrow().hooks.iter().any(|(hook_id, _)| *hook_id == id)
    }

    /// Runs every hook with the frame's elapsed time in seconds.
    pub fn tick(&self, delta: f64) {
        let snapshot: Vec<(HookId, Hook)> = self
            .state
            .borrow()
            .hooks
            .iter()
            .map(|(id, hook)| (*id, Rc::clone(hook)))
            .collect();

        for (id, hook) in snapshot {
            if !self.contains(id) {
                continue;
            }
            // A hook that re-enters tick from inside itself is skipped.
            if let Ok(mut hook) = hook.try_borrow_mut() {
                (&mut *hook)(delta);
            }
        }

        self.state.borrow_mut().frame += 1;
    }

    pub fn frame_count(&self) -> u64 {
        self.state.borrow().frame
    }

    pub fn len(&self) -> usize {
        self.state.borrow().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.borrow_mut().hooks.clear();
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hooks_run_in_order() {
        let scheduler = UpdateScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            scheduler.add(move |_| log.borrow_mut().push(name));
        }

        scheduler.tick(1.0 / 60.0);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(scheduler.frame_count(), 1);
    }

    #[test]
    fn test_delta_is_forwarded() {
        let scheduler = UpdateScheduler::new();
        let seen = Rc::new(Cell::new(0.0));
        {
            let seen = Rc::clone(&seen);
            scheduler.add(move |dt| seen.set(seen.get() + dt));
        }

        scheduler.tick(0.25);
        scheduler.tick(0.5);
        assert_eq!(seen.get(), 0.75);
    }

    #[test]
    fn test_remove_during_tick() {
        let scheduler = UpdateScheduler::new();
        let later_calls = Rc::new(Cell::new(0));
        let later_id = Rc::new(Cell::new(0));

        {
            let handle = scheduler.clone();
            let later_id = Rc::clone(&later_id);
            scheduler.add(move |_| {
                handle.remove(later_id.get());
            });
        }
        let id = {
            let later_calls = Rc::clone(&later_calls);
            scheduler.add(move |_| later_calls.set(later_calls.get() + 1))
        };
        later_id.set(id);

        scheduler.tick(0.016);
        assert_eq!(later_calls.get(), 0);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_add_during_tick_runs_next_frame() {
        let scheduler = UpdateScheduler::new();
        let added_calls = Rc::new(Cell::new(0));

        {
            let handle = scheduler.clone();
            let added_calls = Rc::clone(&added_calls);
            let mut added = false;
            scheduler.add(move |_| {
                if !added {
                    added = true;
                    let added_calls = Rc::clone(&added_calls);
                    handle.add(move |_| added_calls.set(added_calls.get() + 1));
                }
            });
        }

        scheduler.tick(0.016);
        assert_eq!(added_calls.get(), 0);
        scheduler.tick(0.016);
        assert_eq!(added_calls.get(), 1);
    }
}
