use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

/// Tracks the content the server announced and what has actually arrived.
/// Together with the node/item definition flags this gates the
/// AuthAccepted → Ready transition: gameplay systems initialize exactly
/// once, after everything they depend on exists locally.
pub struct MediaTracker {
    announced: FxHashMap<String, String>,
    outstanding: FxHashSet<String>,
    received_tokens: Vec<u32>,
    announce_seen: bool,
}

impl MediaTracker {
    pub fn new() -> Self {
        Self {
            announced: FxHashMap::default(),
            outstanding: FxHashSet::default(),
            received_tokens: Vec::new(),
            announce_seen: false,
        }
    }

    /// Records the server's media announcement. Returns the names that
    /// still need fetching (nothing is cached locally in this client).
    pub fn announce(&mut self, files: Vec<(String, String)>) -> Vec<String> {
        if self.announce_seen {
            warn!("duplicate media announcement, ignoring");
            return Vec::new();
        }
        self.announce_seen = true;

        let mut wanted = Vec::with_capacity(files.len());
        for (name, digest) in files {
            self.outstanding.insert(name.clone());
            self.announced.insert(name.clone(), digest);
            wanted.push(name);
        }
        debug!("media announced: {} file(s)", wanted.len());
        wanted
    }

    /// Records one received media item; unknown names are logged and
    /// ignored. Returns true if this was the last outstanding item.
    pub fn receive(&mut self, name: &str, token: u32) -> bool {
        if !self.outstanding.remove(name) {
            warn!("received media '{name}' that was never announced");
            return false;
        }
        self.received_tokens.push(token);
        self.is_finished()
    }

    pub fn is_downloading(&self) -> bool {
        self.announce_seen && !self.outstanding.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.announce_seen && self.outstanding.is_empty()
    }

    /// Tokens to acknowledge via HaveMedia, drained on read.
    pub fn take_received_tokens(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.received_tokens)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

impl Default for MediaTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::MediaTracker;

    #[test]
    fn download_finishes_when_every_announced_file_arrives() {
        let mut tracker = MediaTracker::new();
        assert!(!tracker.is_downloading());
        assert!(!tracker.is_finished());

        let wanted = tracker.announce(vec![
            ("stone.png".into(), "abc".into()),
            ("dirt.png".into(), "def".into()),
        ]);
        assert_eq!(wanted.len(), 2);
        assert!(tracker.is_downloading());

        assert!(!tracker.receive("stone.png", 1));
        assert!(tracker.receive("dirt.png", 2));
        assert!(tracker.is_finished());
        assert!(!tracker.is_downloading());

        assert_eq!(tracker.take_received_tokens(), vec![1, 2]);
        assert!(tracker.take_received_tokens().is_empty());
    }

    #[test]
    fn unannounced_media_is_ignored() {
        let mut tracker = MediaTracker::new();
        tracker.announce(vec![("stone.png".into(), "abc".into())]);
        assert!(!tracker.receive("lava.png", 7));
        assert_eq!(tracker.outstanding_count(), 1);
    }

    #[test]
    fn empty_announcement_is_immediately_finished() {
        let mut tracker = MediaTracker::new();
        tracker.announce(Vec::new());
        assert!(tracker.is_finished());
    }
}
