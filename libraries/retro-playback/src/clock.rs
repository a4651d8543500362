//! Playback clock
//!
//! Position is counted in sample frames the sink has actually consumed. The
//! clock packs the epoch (low 16 bits) and the position (48 bits) in one
//! word, so a rebase on seek and an advance from the audio thread can never
//! interleave into a mixed value.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EPOCH_BITS: u32 = 16;
const EPOCH_MASK: u64 = (1 << EPOCH_BITS) - 1;
const POSITION_MAX: u64 = (1 << (64 - EPOCH_BITS)) - 1;

fn pack(epoch: u64, position: u64) -> u64 {
    (position.min(POSITION_MAX) << EPOCH_BITS) | (epoch & EPOCH_MASK)
}

fn unpack(word: u64) -> (u64, u64) {
    (word & EPOCH_MASK, word >> EPOCH_BITS)
}

/// Shared position of the audible stream
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    word: Arc<AtomicU64>,
    sample_rate: Arc<AtomicU32>,
}

impl PlaybackClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            word: Arc::new(AtomicU64::new(0)),
            sample_rate: Arc::new(AtomicU32::new(sample_rate.max(1))),
        }
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate.max(1), Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    /// Jump to `position` under a new epoch. Only the transport calls this.
    pub fn rebase(&self, epoch: u64, position: u64) {
        self.word.store(pack(epoch, position), Ordering::Release);
    }

    /// Move forward to `position` if `epoch` is still current.
    ///
    /// Returns `false` for updates from a stale epoch and for positions
    /// behind the current one; the clock never goes backwards outside a
    /// rebase.
    pub fn advance(&self, epoch: u64, position: u64) -> bool {
        let epoch = epoch & EPOCH_MASK;
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let (cur_epoch, cur_position) = unpack(current);
            if cur_epoch != epoch || position <= cur_position {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                pack(epoch, position),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Position in sample frames
    pub fn frames(&self) -> u64 {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    /// Low bits of the epoch the clock is following
    pub fn epoch(&self) -> u64 {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    /// Whether the clock is still following `epoch`
    pub fn follows(&self, epoch: u64) -> bool {
        self.epoch() == epoch & EPOCH_MASK
    }

    pub fn position(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_forward_only() {
        let clock = PlaybackClock::new(44_100);
        assert!(clock.advance(0, 1024));
        assert!(clock.advance(0, 2048));
        assert!(!clock.advance(0, 1500));
        assert_eq!(clock.frames(), 2048);
    }

    #[test]
    fn rebase_rejects_old_epoch() {
        let clock = PlaybackClock::new(44_100);
        clock.advance(0, 88_200);

        clock.rebase(1, 22_050);
        assert_eq!(clock.frames(), 22_050);
        assert_eq!(clock.epoch(), 1);

        // Audio written before the seek arrives late
        assert!(!clock.advance(0, 90_000));
        assert_eq!(clock.frames(), 22_050);

        assert!(clock.follows(1));
        assert!(!clock.follows(0));
        assert!(clock.advance(1, 23_074));
        assert_eq!(clock.position(), Duration::from_secs_f64(23_074.0 / 44_100.0));
    }

    #[test]
    fn rebase_may_move_backwards() {
        let clock = PlaybackClock::new(48_000);
        clock.advance(0, 480_000);
        clock.rebase(1, 0);
        assert_eq!(clock.position(), Duration::ZERO);
    }

    #[test]
    fn epoch_wraps_in_sixteen_bits() {
        let clock = PlaybackClock::new(44_100);
        clock.rebase(0x1_0003, 10);
        assert_eq!(clock.epoch(), 3);
        assert!(clock.advance(0x1_0003, 20));
        assert!(clock.advance(3, 30));
    }

    #[test]
    fn concurrent_advances_stay_monotonic() {
        let clock = PlaybackClock::new(44_100);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        clock.advance(0, i * 4 + t);
                    }
                })
            })
            .collect();

        let mut last = 0;
        for _ in 0..1000 {
            let now = clock.frames();
            assert!(now >= last);
            last = now;
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(clock.frames(), 999 * 4 + 3);
    }
}
