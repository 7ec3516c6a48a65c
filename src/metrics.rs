use crate::bitrate::Bitrate;

/// How long after the first receiver report the estimate is considered
/// converged.
pub(crate) const CONVERGENCE_MS: i64 = 20_000;

struct RampupMetric {
    name: &'static str,
    kbps: i64,
}

const RAMPUP_METRICS: [RampupMetric; 3] = [
    RampupMetric {
        name: "Bwe.RampUpTimeTo500kbpsInMs",
        kbps: 500,
    },
    RampupMetric {
        name: "Bwe.RampUpTimeTo1000kbpsInMs",
        kbps: 1000,
    },
    RampupMetric {
        name: "Bwe.RampUpTimeTo2000kbpsInMs",
        kbps: 2000,
    },
];

/// Sink for one-shot session histograms.
///
/// The estimator holds a borrowed reference; the sink must outlive it.
pub trait MetricsSink {
    /// Counter histogram bucketed over `[0, 100_000]`.
    fn counts_100000(&self, name: &'static str, value: i64);

    /// Counter histogram with explicit bounds and bucket count.
    fn counts(&self, name: &'static str, value: i64, min: i64, max: i64, buckets: u32);
}

/// Discards all histogram samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn counts_100000(&self, _name: &'static str, _value: i64) {}

    fn counts(&self, _name: &'static str, _value: i64, _min: i64, _max: i64, _buckets: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UmaState {
    NoUpdate,
    FirstDone,
    Done,
}

/// One-shot startup and convergence metrics.
///
/// Tracks how fast a session ramps up and how far the early estimate ends up
/// from the converged one. Each histogram is emitted at most once per
/// session; once `Done` is reached nothing is ever re-emitted.
#[derive(Debug)]
pub(crate) struct StartupStats {
    state: UmaState,
    initially_lost_packets: i64,
    bitrate_at_2s_kbps: i64,
    rampup_reached: [bool; 3],
}

impl StartupStats {
    pub fn new() -> Self {
        Self {
            state: UmaState::NoUpdate,
            initially_lost_packets: 0,
            bitrate_at_2s_kbps: 0,
            rampup_reached: [false; 3],
        }
    }

    /// Runs after a receiver report has been folded into the estimator.
    ///
    /// `since_first_report` is the time since the session's first receiver
    /// report, `in_start_phase` whether that time is still within the
    /// startup window.
    pub fn update(
        &mut self,
        since_first_report: i64,
        in_start_phase: bool,
        bitrate: Bitrate,
        rtt_ms: i64,
        lost_packets: i64,
        sink: &dyn MetricsSink,
    ) {
        let bitrate_kbps = bitrate.as_kbps_rounded();

        for (metric, reached) in RAMPUP_METRICS.iter().zip(self.rampup_reached.iter_mut()) {
            if !*reached && bitrate_kbps >= metric.kbps {
                sink.counts_100000(metric.name, since_first_report);
                *reached = true;
            }
        }

        if in_start_phase {
            self.initially_lost_packets += lost_packets;
        } else if self.state == UmaState::NoUpdate {
            self.state = UmaState::FirstDone;
            self.bitrate_at_2s_kbps = bitrate_kbps;
            sink.counts(
                "Bwe.InitiallyLostPackets",
                self.initially_lost_packets,
                0,
                100,
                50,
            );
            sink.counts("Bwe.InitialRtt", rtt_ms, 0, 2000, 50);
            sink.counts(
                "Bwe.InitialBandwidthEstimate",
                self.bitrate_at_2s_kbps,
                0,
                2000,
                50,
            );
        } else if self.state == UmaState::FirstDone && since_first_report >= CONVERGENCE_MS {
            self.state = UmaState::Done;
            let diff_kbps = (self.bitrate_at_2s_kbps - bitrate_kbps).max(0);
            sink.counts("Bwe.InitialVsConvergedDiff", diff_kbps, 0, 2000, 50);
        }
    }
}
