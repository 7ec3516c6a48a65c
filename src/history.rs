use std::collections::VecDeque;

use crate::bitrate::Bitrate;

/// Width of the sliding window in milliseconds.
pub(crate) const WINDOW_MS: i64 = 1_000;

/// Sliding lower envelope of recently emitted bitrates.
///
/// Classic monotone min-deque: entries are ascending in time and
/// non-decreasing in bitrate from front to back, which makes both insertion
/// amortized O(1) and the windowed minimum an O(1) front read.
#[derive(Debug, Default)]
pub(crate) struct MinHistory {
    entries: VecDeque<(i64, Bitrate)>,
}

impl MinHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inserts a data point and returns the minimum bitrate over the window.
    pub fn push(&mut self, now_ms: i64, bitrate: Bitrate) -> Bitrate {
        // Expire old data points. History precision is whole milliseconds, so
        // the extra +1 keeps a point exactly WINDOW_MS old in-window. Reports
        // arriving on an exact one second cadence still see the previous
        // point and can grow the rate.
        while self
            .entries
            .front()
            .map(|(t, _)| now_ms - t + 1 > WINDOW_MS)
            .unwrap_or(false)
        {
            self.entries.pop_front();
        }

        // Pop values higher than the new data point before pushing it.
        while self
            .entries
            .back()
            .map(|(_, b)| bitrate <= *b)
            .unwrap_or(false)
        {
            self.entries.pop_back();
        }

        self.entries.push_back((now_ms, bitrate));

        // The deque is never empty here, the new point was just pushed.
        self.entries.front().map(|(_, b)| *b).unwrap_or(bitrate)
    }

    /// Minimum bitrate over the window, or `None` when no point has been
    /// recorded.
    pub fn min(&self) -> Option<Bitrate> {
        self.entries.front().map(|(_, b)| *b)
    }
}
