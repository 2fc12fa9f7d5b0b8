use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum interval between successive timestamp refreshes for one label.
pub const COOLDOWN: Duration = Duration::from_secs(2);

/// How many labels the most-recent-first list retains.
const RECENT_CAP: usize = 8;

/// Cooldown bookkeeping is pruned once it grows past this many entries.
const EVICTION_CHECK_LEN: usize = 256;
const EVICTION_AGE_FACTOR: u32 = 8;

/// Process-lifetime set of identities marked present this session.
///
/// Mutated by the recognition worker, read by status and export collaborators.
/// Membership is idempotent; the cooldown only gates how often a label's
/// last-seen timestamp refreshes, never whether the label is a member.
/// Stopping and restarting the pipeline does not clear it; reset is an
/// explicit external operation.
pub struct PresenceSet {
    inner: Mutex<Inner>,
}

struct Inner {
    present: HashSet<String>,
    recent: VecDeque<String>,
    last_seen: HashMap<String, Instant>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                present: HashSet::new(),
                recent: VecDeque::new(),
                last_seen: HashMap::new(),
            }),
        }
    }

    /// Marks a label present. Returns `true` when the registration refreshed
    /// the label's timestamp (first sighting, or cooldown elapsed), `false`
    /// when the cooldown swallowed it.
    pub fn register(&self, label: &str) -> bool {
        self.register_at(label, Instant::now())
    }

    fn register_at(&self, label: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("presence lock poisoned");

        if let Some(last) = inner.last_seen.get(label) {
            if now.duration_since(*last) < COOLDOWN {
                return false;
            }
        }

        inner.present.insert(label.to_owned());

        inner.recent.retain(|l| l != label);
        inner.recent.push_front(label.to_owned());
        inner.recent.truncate(RECENT_CAP);

        inner.last_seen.insert(label.to_owned(), now);

        if inner.last_seen.len() > EVICTION_CHECK_LEN {
            let horizon = COOLDOWN * EVICTION_AGE_FACTOR;
            inner
                .last_seen
                .retain(|_, seen| now.duration_since(*seen) <= horizon);
        }

        true
    }

    pub fn contains(&self, label: &str) -> bool {
        self.inner
            .lock()
            .expect("presence lock poisoned")
            .present
            .contains(label)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("presence lock poisoned").present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All present labels, sorted for stable output.
    pub fn labels(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("presence lock poisoned");
        let mut labels: Vec<String> = inner.present.iter().cloned().collect();
        labels.sort_unstable();
        labels
    }

    /// Recently registered labels, most recent first, capped at eight.
    pub fn recent(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("presence lock poisoned");
        inner.recent.iter().cloned().collect()
    }

    /// Clears membership and all bookkeeping. Ownership of when to reset
    /// belongs to the surrounding application, not the pipeline lifecycle.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        inner.present.clear();
        inner.recent.clear();
        inner.last_seen.clear();
    }
}

impl Default for PresenceSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_idempotent_within_cooldown() {
        let set = PresenceSet::new();
        let t0 = Instant::now();

        assert!(set.register_at("A", t0));
        assert!(!set.register_at("A", t0 + Duration::from_secs(1)));

        assert_eq!(set.len(), 1);
        assert!(set.contains("A"));
    }

    #[test]
    fn cooldown_expiry_refreshes_timestamp_not_membership() {
        let set = PresenceSet::new();
        let t0 = Instant::now();

        assert!(set.register_at("A", t0));
        assert!(!set.register_at("A", t0 + Duration::from_secs(1)));
        // 2.5s after the first registration the cooldown has elapsed
        assert!(set.register_at("A", t0 + Duration::from_millis(2500)));

        assert_eq!(set.len(), 1);
    }

    #[test]
    fn first_registration_governs_next_allowed_refresh() {
        let set = PresenceSet::new();
        let t0 = Instant::now();

        assert!(set.register_at("A", t0));
        // swallowed attempts do not push the window forward
        assert!(!set.register_at("A", t0 + Duration::from_millis(1900)));
        assert!(set.register_at("A", t0 + Duration::from_millis(2000)));
    }

    #[test]
    fn recent_is_most_recent_first_and_bounded() {
        let set = PresenceSet::new();
        let t0 = Instant::now();

        for i in 0..10 {
            set.register_at(&format!("S{i}"), t0 + Duration::from_secs(i));
        }

        let recent = set.recent();
        assert_eq!(recent.len(), RECENT_CAP);
        assert_eq!(recent[0], "S9");
        assert_eq!(recent[RECENT_CAP - 1], "S2");
        assert_eq!(set.len(), 10);
    }

    #[test]
    fn re_registration_moves_label_to_front() {
        let set = PresenceSet::new();
        let t0 = Instant::now();

        set.register_at("A", t0);
        set.register_at("B", t0);
        set.register_at("A", t0 + Duration::from_secs(3));

        assert_eq!(set.recent()[0], "A");
        assert_eq!(set.recent().len(), 2);
    }

    #[test]
    fn stale_cooldown_entries_are_evicted_without_touching_membership() {
        let set = PresenceSet::new();
        let t0 = Instant::now();

        for i in 0..300 {
            set.register_at(&format!("S{i}"), t0);
        }

        let later = t0 + COOLDOWN * (EVICTION_AGE_FACTOR + 1);
        set.register_at("fresh", later);

        let inner = set.inner.lock().unwrap();
        assert_eq!(inner.last_seen.len(), 1);
        assert!(inner.last_seen.contains_key("fresh"));
        assert_eq!(inner.present.len(), 301);
    }

    #[test]
    fn reset_clears_everything() {
        let set = PresenceSet::new();
        set.register("A");
        set.reset();
        assert!(set.is_empty());
        assert!(set.recent().is_empty());
        // a reset label may register again immediately
        assert!(set.register("A"));
    }
}
