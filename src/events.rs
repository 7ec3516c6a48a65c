use crate::bitrate::Bitrate;

/// Sink for loss-based estimator updates.
///
/// Fire-and-forget. The estimator holds a borrowed reference, so the sink
/// must outlive it; implementations are expected to be cheap enough to call
/// on every published update.
pub trait EventLog {
    /// A new loss-based target was published.
    ///
    /// `expected_packets` is the number of packets accumulated toward the
    /// next smoothed loss sample at the time of the update.
    fn loss_based_update(&self, bitrate: Bitrate, fraction_loss: u8, expected_packets: i64);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvents;

impl EventLog for NullEvents {
    fn loss_based_update(&self, _bitrate: Bitrate, _fraction_loss: u8, _expected_packets: i64) {}
}
