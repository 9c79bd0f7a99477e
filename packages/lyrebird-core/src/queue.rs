//! Per-guild ordered track list with cursor, loop, and reordering.

use rand::seq::SliceRandom;

use crate::error::EngineError;
use crate::track::Track;

/// Thread-safety for `Queue` is provided by the caller (`PlayerState` holds
/// it behind a `parking_lot::RwLock`, matching the rest of per-player state).
#[derive(Debug, Default)]
pub struct Queue {
    tracks: Vec<Track>,
    /// −1 when nothing is current; otherwise a valid index into `tracks`.
    cursor: i64,
    pub loop_enabled: bool,
}

impl Queue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            cursor: -1,
            loop_enabled: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Appends a track to the end of the queue.
    pub fn add(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Appends several tracks (e.g. a resolved playlist).
    pub fn add_all(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current_index().map(|i| &self.tracks[i])
    }

    #[must_use]
    pub fn current_mut(&mut self) -> Option<&mut Track> {
        match self.current_index() {
            Some(i) => Some(&mut self.tracks[i]),
            None => None,
        }
    }

    fn current_index(&self) -> Option<usize> {
        if self.cursor < 0 {
            None
        } else {
            Some(self.cursor as usize)
        }
    }

    /// The current track's position, if any (for callers that need to
    /// compare a queue index against the currently playing slot, e.g. a
    /// `remove` at the current position should also skip playback).
    #[must_use]
    pub fn current_position(&self) -> Option<usize> {
        self.current_index()
    }

    /// Clones the full track list, in order, for read-only rendering
    /// (e.g. a `/queue` listing). Not on any hot path.
    #[must_use]
    pub fn tracks_snapshot(&self) -> Vec<Track> {
        self.tracks.clone()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Track> {
        let next = self.cursor + 1;
        if next >= 0 && (next as usize) < self.tracks.len() {
            Some(&self.tracks[next as usize])
        } else {
            None
        }
    }

    /// Advances the cursor, respecting `loop_enabled`. Returns the new
    /// current track, or `None` once the queue is exhausted (in which case
    /// the cursor resets to −1).
    pub fn advance(&mut self) -> Option<&Track> {
        if self.loop_enabled && self.cursor >= 0 {
            return self.current();
        }
        let next = self.cursor + 1;
        if next >= 0 && (next as usize) < self.tracks.len() {
            self.cursor = next;
            self.current()
        } else {
            self.cursor = -1;
            None
        }
    }

    /// Advances to the next track unconditionally, ignoring `loop_enabled`.
    /// Used by an explicit skip, which always moves forward even when
    /// looping the current track would otherwise apply.
    pub fn force_advance(&mut self) -> Option<&Track> {
        let next = self.cursor + 1;
        if next >= 0 && (next as usize) < self.tracks.len() {
            self.cursor = next;
            self.current()
        } else {
            self.cursor = -1;
            None
        }
    }

    /// Drops every track except the current one.
    pub fn clear_upcoming(&mut self) {
        if let Some(i) = self.current_index() {
            self.tracks.truncate(i + 1);
        }
    }

    /// Empties the queue entirely and resets the cursor.
    pub fn clear_all(&mut self) {
        self.tracks.clear();
        self.cursor = -1;
    }

    /// Removes the track at index `i`, adjusting the cursor so the track
    /// that was current remains current. Removing the currently playing
    /// track itself is handled by the caller observing `current()` changed.
    pub fn remove(&mut self, i: usize) -> Result<Track, EngineError> {
        if i >= self.tracks.len() {
            return Err(EngineError::User(format!(
                "invalid queue position {i}"
            )));
        }
        let removed = self.tracks.remove(i);
        let i = i as i64;
        if i < self.cursor {
            self.cursor -= 1;
        } else if i == self.cursor {
            // The removed track was current. If it was the last element,
            // cursor now points past the end; advance() on the next call
            // will see an exhausted queue. Otherwise the track that shifted
            // into this slot becomes current.
            if self.cursor as usize >= self.tracks.len() {
                self.cursor = -1;
            }
        }
        Ok(removed)
    }

    /// Moves the track at index `i` to index `j`, preserving which track is
    /// current even when the move relocates the current track itself.
    ///
    /// Cursor relocation mirrors the physical remove-then-insert by index
    /// rather than re-finding "the current track" by `Track::id` — ids are
    /// not unique across the queue (the same track can be enqueued twice),
    /// so an identity rescan can land on the wrong occurrence.
    pub fn move_track(&mut self, i: usize, j: usize) -> Result<(), EngineError> {
        if i >= self.tracks.len() || j >= self.tracks.len() {
            return Err(EngineError::User(format!(
                "invalid queue positions ({i}, {j})"
            )));
        }
        if i == j {
            return Ok(());
        }
        let current_index = self.current_index();

        let track = self.tracks.remove(i);
        self.tracks.insert(j, track);

        if let Some(old_index) = current_index {
            let new_index = if old_index == i {
                j
            } else {
                let after_removal = if old_index > i {
                    old_index - 1
                } else {
                    old_index
                };
                if after_removal >= j {
                    after_removal + 1
                } else {
                    after_removal
                }
            };
            self.cursor = new_index as i64;
        }
        Ok(())
    }

    /// Fisher–Yates shuffle over `tracks[cursor+1..]`. A no-op on queues of
    /// length ≤ 1 after the cursor; the currently playing track is never
    /// reordered.
    pub fn shuffle_upcoming(&mut self) -> Result<(), EngineError> {
        if self.tracks.is_empty() {
            return Err(EngineError::User("queue is empty".into()));
        }
        let start = (self.cursor + 1).max(0) as usize;
        if start >= self.tracks.len() {
            return Ok(());
        }
        let mut rng = rand::rng();
        self.tracks[start..].shuffle(&mut rng);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackSource;
    use std::time::Duration;

    fn track(id: &str) -> Track {
        track_titled(id, id)
    }

    /// Same shape as `track`, but lets the caller set a distinguishing
    /// title while keeping `id` (and everything else) possibly duplicated
    /// across queue entries, e.g. the same song enqueued twice.
    fn track_titled(id: &str, title: &str) -> Track {
        Track {
            id: id.to_string(),
            title: title.to_string(),
            artist: None,
            thumbnail: None,
            duration: Duration::from_secs(30),
            source: TrackSource::Direct,
            canonical_url: format!("https://media.example/{id}"),
            stream_url: None,
            local_path: None,
            is_live: false,
            requested_by: None,
        }
    }

    #[test]
    fn new_queue_has_no_current() {
        let q = Queue::new();
        assert!(q.current().is_none());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn advance_walks_forward_and_exhausts() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.add(track("b"));

        assert_eq!(q.advance().unwrap().id, "a");
        assert_eq!(q.advance().unwrap().id, "b");
        assert!(q.advance().is_none());
        assert!(q.current().is_none());
    }

    #[test]
    fn loop_replays_current() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.loop_enabled = true;

        assert_eq!(q.advance().unwrap().id, "a");
        assert_eq!(q.advance().unwrap().id, "a");
        assert_eq!(q.advance().unwrap().id, "a");
    }

    #[test]
    fn peek_returns_next_without_advancing() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.add(track("b"));
        q.advance();

        assert_eq!(q.peek().unwrap().id, "b");
        assert_eq!(q.current().unwrap().id, "a");
    }

    #[test]
    fn clear_upcoming_keeps_only_current() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.add(track("b"));
        q.add(track("c"));
        q.advance();

        q.clear_upcoming();
        assert_eq!(q.len(), 1);
        assert_eq!(q.current().unwrap().id, "a");
    }

    #[test]
    fn clear_all_resets_cursor() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.advance();
        q.clear_all();

        assert!(q.is_empty());
        assert!(q.current().is_none());
    }

    #[test]
    fn remove_before_cursor_decrements_cursor() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.add(track("b"));
        q.add(track("c"));
        q.advance();
        q.advance(); // current = b, index 1

        q.remove(0).unwrap(); // remove a
        assert_eq!(q.current().unwrap().id, "b");
    }

    #[test]
    fn remove_current_last_element_exhausts_queue() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.advance();

        q.remove(0).unwrap();
        assert!(q.current().is_none());
    }

    #[test]
    fn move_preserves_current_identity() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.add(track("b"));
        q.add(track("c"));
        q.advance();
        q.advance(); // current = b

        q.move_track(1, 2).unwrap();
        assert_eq!(q.current().unwrap().id, "b");
    }

    #[test]
    fn move_preserves_current_identity_with_duplicate_ids() {
        // Same song enqueued twice: both entries share `id = "x"`, so
        // resolving "the current track" must not fall back to a by-id scan.
        let mut q = Queue::new();
        q.add(track_titled("x", "first x"));
        q.add(track_titled("y", "y"));
        q.add(track_titled("x", "second x"));
        q.advance(); // current = first x, index 0
        q.advance(); // current = y, index 1
        q.advance(); // current = second x, index 2
        assert_eq!(q.current().unwrap().title, "second x");

        // [x0, y, x1] -> remove(0) -> [y, x1] -> insert(1, x0) -> [y, x0, x1]
        q.move_track(0, 1).unwrap();

        assert_eq!(
            q.current().unwrap().title,
            "second x",
            "the track that was current must remain current, not whichever id=x \
             track a rescan happens to match first"
        );
        assert_eq!(q.current_position(), Some(2));
    }

    #[test]
    fn shuffle_on_empty_queue_is_user_error() {
        let mut q = Queue::new();
        assert!(q.shuffle_upcoming().is_err());
    }

    #[test]
    fn shuffle_single_remaining_track_is_noop() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.advance();
        // Only the current track remains after the cursor — nothing to shuffle.
        assert!(q.shuffle_upcoming().is_ok());
        assert_eq!(q.current().unwrap().id, "a");
    }

    #[test]
    fn shuffle_never_touches_current_track() {
        let mut q = Queue::new();
        q.add(track("a"));
        q.add(track("b"));
        q.add(track("c"));
        q.advance();

        q.shuffle_upcoming().unwrap();
        assert_eq!(q.current().unwrap().id, "a");
    }
}
