//! Debounce state machine for watch mode.
//!
//! Pure state transitions with no timers or I/O. Each started timer is tagged
//! with a generation; an expiry whose generation is not the latest is stale
//! and ignored, which is how a restarted timer cancels the previous one.

/// Where the debouncer currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// Nothing pending
    Idle,
    /// Waiting for the quiet period to elapse
    Pending,
    /// A synchronization is in progress
    Running {
        /// Another change arrived while running
        rerun: bool,
    },
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceAction {
    None,
    /// Start a timer for the given generation
    StartTimer(u64),
    /// Start a synchronization
    RunSync,
}

#[derive(Debug)]
pub struct WatchDebouncer {
    state: DebounceState,
    generation: u64,
}

impl WatchDebouncer {
    pub fn new() -> Self {
        Self {
            state: DebounceState::Idle,
            generation: 0,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, DebounceState::Running { .. })
    }

    /// A change notification arrived.
    pub fn on_change(&mut self) -> DebounceAction {
        match self.state {
            DebounceState::Idle | DebounceState::Pending => self.restart_timer(),
            DebounceState::Running { .. } => {
                self.state = DebounceState::Running { rerun: true };
                DebounceAction::None
            }
        }
    }

    /// The timer tagged `generation` fired.
    pub fn on_timer(&mut self, generation: u64) -> DebounceAction {
        if self.state == DebounceState::Pending && generation == self.generation {
            self.state = DebounceState::Running { rerun: false };
            DebounceAction::RunSync
        } else {
            DebounceAction::None
        }
    }

    /// The running synchronization completed (successfully or not).
    pub fn on_sync_finished(&mut self) -> DebounceAction {
        match self.state {
            DebounceState::Running { rerun: true } => self.restart_timer(),
            DebounceState::Running { rerun: false } => {
                self.state = DebounceState::Idle;
                DebounceAction::None
            }
            DebounceState::Idle | DebounceState::Pending => DebounceAction::None,
        }
    }

    fn restart_timer(&mut self) -> DebounceAction {
        self.generation += 1;
        self.state = DebounceState::Pending;
        DebounceAction::StartTimer(self.generation)
    }
}

impl Default for WatchDebouncer {
    fn default() -> Self {
        Self::new()
    }
}
