use tokio::sync::broadcast;

/// Capacity of the launcher event channel. Events are tiny and consumers are
/// fast, so lagging only happens if a subscriber stops polling entirely.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Notifications broadcast by the supervision stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// A provider finished initializing; network functionality is available.
    Ready,
    /// The supervised client process exited unexpectedly.
    Exited { exit_code: Option<i32> },
}

/// Create the launcher event channel.
pub fn channel() -> broadcast::Sender<ClientEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
