//! Ordered playlist with shuffle and repeat
//!
//! The playlist only decides *which* entry comes next; opening and decoding
//! tracks is the transport's job.

use crate::error::{PlaybackError, Result};
use crate::types::RepeatMode;
use rand::seq::IteratorRandom;
use rand::thread_rng;
use retro_audio::Track;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
    current: Option<usize>,
    repeat: RepeatMode,
    shuffle: bool,
    /// Entries already played in this shuffle pass
    played: HashSet<usize>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        self.played.clear();
        if let Some(current) = self.current {
            self.played.insert(current);
        }
    }

    /// Append a track, returning its index
    pub fn push(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Remove an entry. The current index follows its track; removing the
    /// current track leaves nothing selected.
    pub fn remove(&mut self, index: usize) -> Result<Track> {
        if index >= self.tracks.len() {
            return Err(PlaybackError::IndexOutOfBounds(index));
        }
        let track = self.tracks.remove(index);
        self.current = match self.current {
            Some(c) if c == index => None,
            Some(c) if c > index => Some(c - 1),
            other => other,
        };
        self.played = self
            .played
            .iter()
            .filter(|&&i| i != index)
            .map(|&i| if i > index { i - 1 } else { i })
            .collect();
        Ok(track)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = None;
        self.played.clear();
    }

    /// Make `index` the current entry
    pub fn select(&mut self, index: usize) -> Result<&Track> {
        if index >= self.tracks.len() {
            return Err(PlaybackError::IndexOutOfBounds(index));
        }
        self.current = Some(index);
        self.played.insert(index);
        Ok(&self.tracks[index])
    }

    /// Entry `next` would move to, without moving
    pub fn peek_next(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        let Some(current) = self.current else {
            return Some(0);
        };

        if self.shuffle {
            return self.random_pick(current);
        }

        if current + 1 < self.tracks.len() {
            Some(current + 1)
        } else if self.repeat == RepeatMode::All {
            Some(0)
        } else {
            None
        }
    }

    /// Move to the next entry (user skip). Returns `None` at the end of the
    /// playlist unless repeat is All.
    pub fn next_entry(&mut self) -> Option<usize> {
        let next = self.peek_next()?;
        if self.shuffle && self.played.len() >= self.tracks.len() {
            self.played.clear();
        }
        self.current = Some(next);
        self.played.insert(next);
        Some(next)
    }

    /// Move back one entry, wrapping to the last
    ///
    /// With shuffle on this picks any other entry at random, ignoring
    /// which ones were already played in the current pass.
    pub fn previous_entry(&mut self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        let previous = match (self.shuffle, self.current) {
            (true, Some(current)) => (0..self.tracks.len())
                .filter(|i| *i != current)
                .choose(&mut thread_rng())
                .unwrap_or(current),
            (_, Some(0) | None) => self.tracks.len() - 1,
            (false, Some(i)) => i - 1,
        };
        self.played.insert(previous);
        self.current = Some(previous);
        Some(previous)
    }

    /// Entry to play after the current one ended on its own
    pub fn advance_after_end(&mut self) -> Option<usize> {
        match (self.repeat, self.current) {
            (RepeatMode::One, Some(current)) => Some(current),
            _ => self.next_entry(),
        }
    }

    fn random_pick(&self, current: usize) -> Option<usize> {
        let mut rng = thread_rng();
        let unplayed = (0..self.tracks.len())
            .filter(|i| *i != current && !self.played.contains(i))
            .choose(&mut rng);

        if unplayed.is_some() || self.repeat != RepeatMode::All {
            return unplayed;
        }
        (0..self.tracks.len())
            .filter(|i| *i != current)
            .choose(&mut rng)
            .or(Some(current))
    }
}
