use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Quiet window after which a typing indicator is considered stale.
/// Receivers enforce this client-side; the tracker exposes the same policy
/// so it can be tested in one place.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

/// Ephemeral (conversation, user) typing state. Nothing here is persisted;
/// entries are invalidated by an explicit stop or by the TTL. The server
/// never schedules expiry timers: a client that vanishes mid-keystroke
/// simply leaves an entry that lapses on its own.
#[derive(Default)]
pub struct TypingTracker {
    entries: Mutex<HashMap<(Uuid, Uuid), Instant>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, conversation_id: Uuid, user_id: Uuid) {
        self.start_at(conversation_id, user_id, Instant::now());
    }

    /// Explicit stop. Returns whether the user was still marked as typing.
    pub fn stop(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(conversation_id, user_id)).is_some()
    }

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.is_typing_at(conversation_id, user_id, Instant::now())
    }

    fn start_at(&self, conversation_id: Uuid, user_id: Uuid, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((conversation_id, user_id), now + TYPING_TTL);
    }

    fn is_typing_at(&self, conversation_id: Uuid, user_id: Uuid, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&(conversation_id, user_id)) {
            Some(expiry) if *expiry > now => true,
            Some(_) => {
                // Lapsed without an explicit stop; drop it lazily
                entries.remove(&(conversation_id, user_id));
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_lapses_after_quiet_window() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.start_at(conv, user, t0);
        assert!(tracker.is_typing_at(conv, user, t0 + Duration::from_secs(2)));
        // 4 seconds of silence with no stop event: stale
        assert!(!tracker.is_typing_at(conv, user, t0 + Duration::from_secs(4)));
        // And the lapsed entry is gone, not lingering
        assert!(!tracker.is_typing_at(conv, user, t0));
    }

    #[test]
    fn explicit_stop_clears_state() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.start(conv, user);
        assert!(tracker.stop(conv, user));
        assert!(!tracker.is_typing(conv, user));
        // Stop without a start is a no-op
        assert!(!tracker.stop(conv, user));
    }

    #[test]
    fn restart_refreshes_expiry() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.start_at(conv, user, t0);
        tracker.start_at(conv, user, t0 + Duration::from_secs(2));
        assert!(tracker.is_typing_at(conv, user, t0 + Duration::from_secs(4)));
    }
}
