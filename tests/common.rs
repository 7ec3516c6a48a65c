#![allow(unused)]
use std::cell::RefCell;
use std::sync::Once;

use sendside_bwe::{Bitrate, EventLog, MetricsSink};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

/// Event sink recording every published update.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub updates: RefCell<Vec<(Bitrate, u8, i64)>>,
}

impl EventLog for RecordingEvents {
    fn loss_based_update(&self, bitrate: Bitrate, fraction_loss: u8, expected_packets: i64) {
        self.updates
            .borrow_mut()
            .push((bitrate, fraction_loss, expected_packets));
    }
}

/// Metrics sink recording every histogram sample.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub samples: RefCell<Vec<(&'static str, i64)>>,
}

impl MetricsSink for RecordingMetrics {
    fn counts_100000(&self, name: &'static str, value: i64) {
        self.samples.borrow_mut().push((name, value));
    }

    fn counts(&self, name: &'static str, value: i64, _min: i64, _max: i64, _buckets: u32) {
        self.samples.borrow_mut().push((name, value));
    }
}

impl RecordingMetrics {
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.samples
            .borrow()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}
