use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::Barcode;

/// Tracks when each code was last seen so repeated sightings of a code that
/// stays in view are reported once.
///
/// A code is new when it was not seen during the preceding `window` of wall
/// clock time, independent of the stream's frame rate. With a zero window
/// every sighting is new.
#[derive(Debug)]
pub struct RecognitionHistory {
    window: Duration,
    last_seen: HashMap<Barcode, Instant>,
}

impl RecognitionHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Forget everything seen so far.
    pub fn start_new_sequence(&mut self) {
        self.last_seen.clear();
    }

    /// Record the codes seen in a frame scanned now and return those that are new.
    pub fn observe(&mut self, codes: impl IntoIterator<Item = Barcode>) -> Vec<Barcode> {
        self.observe_at(Instant::now(), codes)
    }

    /// Same as `observe`, for a frame scanned at `now`.
    pub fn observe_at(
        &mut self,
        now: Instant,
        codes: impl IntoIterator<Item = Barcode>,
    ) -> Vec<Barcode> {
        let mut in_frame = HashSet::new();
        let mut fresh = Vec::new();
        for code in codes {
            if !in_frame.insert(code.clone()) {
                continue;
            }
            let is_new = match self.last_seen.get(&code) {
                Some(&last) => now.saturating_duration_since(last) >= self.window,
                None => true,
            };
            self.last_seen.insert(code.clone(), now);
            if is_new {
                fresh.push(code);
            }
        }

        let window = self.window;
        self.last_seen
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        fresh
    }

    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}
