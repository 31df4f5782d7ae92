use std::fmt;

/// Agent's relationship to the management server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Startup, before the first configuration fetch
    Initializing,
    /// A configuration fetch is in progress
    Configuring,
    /// Last fetch or submission succeeded
    Online,
    /// Last fetch or submission failed; waiting for the next config poll
    Offline,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "INITIALIZING",
            Self::Configuring => "CONFIGURING",
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
        };
        f.write_str(name)
    }
}

/// Connectivity state machine.
///
/// There is no backoff or retry timer here: an offline agent recovers only
/// when the scheduler's next configuration poll succeeds.
#[derive(Debug)]
pub struct Connectivity {
    state: ConnectionState,
    transitions: u64,
}

impl Connectivity {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Initializing,
            transitions: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == ConnectionState::Online
    }

    /// Number of actual state changes since startup
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Move to `next`. Logs once per real change; returns false when the
    /// agent was already in that state.
    pub fn set(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }

        tracing::info!("State change: {} -> {}", self.state, next);
        self.state = next;
        self.transitions += 1;
        true
    }

    pub fn begin_fetch(&mut self) {
        self.set(ConnectionState::Configuring);
    }

    pub fn fetch_succeeded(&mut self) {
        self.set(ConnectionState::Online);
    }

    pub fn fetch_failed(&mut self) {
        self.set(ConnectionState::Offline);
    }

    /// Submission failures are treated as a connectivity signal
    pub fn submission_failed(&mut self) {
        self.set(ConnectionState::Offline);
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}
