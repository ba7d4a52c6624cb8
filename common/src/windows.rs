use crate::types::{WindowCommand, WindowId};

/// Last instructed state of every window id, alias slot included.
///
/// This is what we told the covers to do, not where they are. Accepted
/// commands are tracked separately so a command still queued for the remote
/// counts when the next one for the same id arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStates {
    commanded_open: Vec<bool>,
    accepted_open: Vec<bool>,
}

impl WindowStates {
    /// Every cover starts out believed closed.
    pub fn new(window_count: usize) -> Self {
        Self {
            commanded_open: vec![false; window_count],
            accepted_open: vec![false; window_count],
        }
    }

    pub fn len(&self) -> usize {
        self.commanded_open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commanded_open.is_empty()
    }

    pub fn is_open(&self, id: WindowId) -> bool {
        self.commanded_open
            .get(id.index())
            .copied()
            .unwrap_or(false)
    }

    /// Takes `command` for `id` in arrival order. Returns false when the last
    /// accepted command for `id` already asked for the same state.
    pub fn accept(&mut self, id: WindowId, command: WindowCommand) -> bool {
        let open = command.is_open();
        if self.accepted_open.get(id.index()).copied().unwrap_or(false) == open {
            return false;
        }
        if id.is_alias(self.len()) {
            self.accepted_open.fill(open);
        } else if let Some(slot) = self.accepted_open.get_mut(id.index()) {
            *slot = open;
        }
        true
    }

    /// Whether `command` would change the applied state of `id`.
    pub fn needs_change(&self, id: WindowId, command: WindowCommand) -> bool {
        self.is_open(id) != command.is_open()
    }

    /// Records `command` for `id`, or for every id when `id` is the alias.
    pub fn apply(&mut self, id: WindowId, command: WindowCommand) {
        let open = command.is_open();
        if id.is_alias(self.len()) {
            self.commanded_open.fill(open);
        } else if let Some(slot) = self.commanded_open.get_mut(id.index()) {
            *slot = open;
        }
    }

    pub fn snapshot(&self) -> Vec<bool> {
        self.commanded_open.clone()
    }
}
