//! Single-slot handoff between the decode thread and the renderer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;

use crate::frame::DecodedFrame;

struct SlotState {
    epoch: u64,
    frame: Option<Arc<DecodedFrame>>,
}

/// Holds the most recent decoded frame, nothing else.
///
/// Publishing swaps one `Arc` pointer, so readers never see a half-written
/// frame and never wait on the decoder. A frame is only accepted if it
/// belongs to the current epoch and is newer than the occupant; the
/// previous occupant is freed once the last reader drops its snapshot.
pub struct LatestFrame {
    state: ArcSwap<SlotState>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    published: AtomicU64,
    rejected: AtomicU64,
    cleared: AtomicU64,
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub published: u64,
    pub rejected: u64,
    pub cleared: u64,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(SlotState {
                epoch: 0,
                frame: None,
            }),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.state.load().epoch
    }

    /// Empty the slot and start a new epoch. Frames published under older
    /// epochs are refused from here on.
    pub fn begin_epoch(&self) -> u64 {
        let previous = self.state.rcu(|current| SlotState {
            epoch: current.epoch + 1,
            frame: None,
        });
        self.stats.cleared.fetch_add(1, Ordering::Relaxed);
        previous.epoch + 1
    }

    /// Producer: replace the occupant with `frame`.
    pub fn publish(&self, epoch: u64, frame: Arc<DecodedFrame>) -> bool {
        let mut accepted = false;
        self.state.rcu(|current| {
            let newer = current
                .frame
                .as_ref()
                .map_or(true, |f| f.sequence < frame.sequence);
            accepted = current.epoch == epoch && newer;
            if accepted {
                Arc::new(SlotState {
                    epoch,
                    frame: Some(Arc::clone(&frame)),
                })
            } else {
                Arc::clone(current)
            }
        });

        if accepted {
            self.stats.published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Consumer: the current occupant, if any.
    pub fn snapshot(&self) -> Option<Arc<DecodedFrame>> {
        self.state.load().frame.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.load().frame.is_none()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            published: self.stats.published.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            cleared: self.stats.cleared.load(Ordering::Relaxed),
        }
    }
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self::new()
    }
}
