use crate::bitrate::Bitrate;
use crate::config::{feedback_timeout_enabled, FieldLookup, LossExperiment};
use crate::events::EventLog;
use crate::history::MinHistory;
use crate::metrics::{MetricsSink, StartupStats};
use crate::time::Timestamp;

/// Decreases are limited to once per this interval plus the current RTT.
const DECREASE_INTERVAL_MS: i64 = 300;
/// Window after the first receiver report in which probing is trusted.
const START_PHASE_MS: i64 = 2_000;
/// Minimum number of packets backing a published loss fraction.
const LIMIT_NUM_PACKETS: i64 = 20;
/// Upper bound installed when the caller does not configure a maximum.
const DEFAULT_MAX_BITRATE: Bitrate = Bitrate::gbps(1);
/// Below-floor warnings are throttled to once per this period.
const LOW_BITRATE_LOG_PERIOD_MS: i64 = 10_000;
/// Unchanged estimates are still logged once per this period.
const EVENT_LOG_PERIOD_MS: i64 = 5_000;
/// Receiver reports are expected uniformly within [0.5, 1.5] s intervals.
const FEEDBACK_INTERVAL_MS: i64 = 1_500;
/// Feedback older than this many intervals counts as starved.
const FEEDBACK_TIMEOUT_INTERVALS: i64 = 3;
/// Starvation cuts are limited to once per this interval.
const TIMEOUT_INTERVAL_MS: i64 = 1_000;

/// A point-in-time reading of the estimator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    /// Current target send rate.
    pub bitrate: Bitrate,

    /// Smoothed loss in Q8 units. The real fraction is `fraction_loss / 256`.
    pub fraction_loss: u8,

    /// Round-trip time from the most recent receiver report.
    pub rtt_ms: i64,
}

/// Send-side loss-based bandwidth estimator.
///
/// Consumes receiver loss reports, the receiver-advertised maximum rate and a
/// separately computed delay-based estimate, and produces the target bitrate
/// the sending pipeline should pace itself to.
///
/// The estimator is purely time-driven: every operation takes the current
/// time in milliseconds on a caller-supplied monotonic timeline, and no
/// operation blocks or performs I/O. It is not internally synchronized and
/// expects to be driven from a single logical thread.
///
/// The loss policy is asymmetric. While smoothed loss stays at or below the
/// low threshold the target grows by 8% of the lowest rate emitted over the
/// last second; between the thresholds it holds; above the high threshold it
/// is cut proportionally to the loss, at most once per loss sample and rate
/// limited by the RTT.
pub struct SendSideEstimator<'a> {
    current_bitrate: Bitrate,
    min_bitrate_configured: Bitrate,
    max_bitrate_configured: Bitrate,
    /// Absolute minimum the embedding controller accepts, captured at
    /// construction. `set_min_max_bitrate` never configures below this.
    host_floor: Bitrate,

    /// Ceiling advertised by the receiver. `ZERO` means unset.
    receiver_limit: Bitrate,
    /// Ceiling from the delay-based estimator. `ZERO` means unset.
    delay_based_limit: Bitrate,

    lost_packets_q8: i64,
    expected_packets: i64,
    last_fraction_loss: u8,
    last_logged_fraction_loss: u8,
    last_rtt_ms: i64,
    has_decreased_since_last_loss: bool,

    min_history: MinHistory,

    first_report_at: Timestamp,
    last_feedback_at: Timestamp,
    last_packet_report_at: Timestamp,
    last_timeout_at: Timestamp,
    last_low_bitrate_log_at: Timestamp,
    last_event_log_at: Timestamp,
    last_decrease_at_ms: i64,

    startup: StartupStats,

    low_loss_threshold: f32,
    high_loss_threshold: f32,
    bitrate_threshold: Bitrate,
    feedback_timeout_enabled: bool,

    events: &'a dyn EventLog,
    metrics: &'a dyn MetricsSink,
}

impl<'a> SendSideEstimator<'a> {
    /// Creates an estimator with no bitrate installed.
    ///
    /// `host_floor` is the absolute minimum rate the embedding controller
    /// will ever accept. `trials` is only read during construction.
    pub fn new(
        host_floor: Bitrate,
        trials: &dyn FieldLookup,
        events: &'a dyn EventLog,
        metrics: &'a dyn MetricsSink,
    ) -> Self {
        let loss = LossExperiment::from_lookup(trials).unwrap_or_default();

        Self {
            current_bitrate: Bitrate::ZERO,
            min_bitrate_configured: host_floor,
            max_bitrate_configured: DEFAULT_MAX_BITRATE,
            host_floor,
            receiver_limit: Bitrate::ZERO,
            delay_based_limit: Bitrate::ZERO,
            lost_packets_q8: 0,
            expected_packets: 0,
            last_fraction_loss: 0,
            last_logged_fraction_loss: 0,
            last_rtt_ms: 0,
            has_decreased_since_last_loss: false,
            min_history: MinHistory::new(),
            first_report_at: Timestamp::Never,
            last_feedback_at: Timestamp::Never,
            last_packet_report_at: Timestamp::Never,
            last_timeout_at: Timestamp::Never,
            last_low_bitrate_log_at: Timestamp::Never,
            last_event_log_at: Timestamp::Never,
            last_decrease_at_ms: 0,
            startup: StartupStats::new(),
            low_loss_threshold: loss.low_loss_threshold,
            high_loss_threshold: loss.high_loss_threshold,
            bitrate_threshold: loss.bitrate_threshold,
            feedback_timeout_enabled: feedback_timeout_enabled(trials),
            events,
            metrics,
        }
    }

    /// Installs a starting bitrate and the configured bounds in one call.
    pub fn set_bitrates(&mut self, send_bitrate: Option<Bitrate>, min: Bitrate, max: Bitrate) {
        if let Some(send) = send_bitrate {
            self.set_send_bitrate(send);
        }
        self.set_min_max_bitrate(min, max);
    }

    /// Installs `bitrate` as the current target.
    ///
    /// Clears the sliding window so the new value is used as-is rather than
    /// being pulled back toward previously emitted rates. A value above the
    /// configured maximum stays in place until the next control-loop pass;
    /// only then is it capped.
    ///
    /// # Panics
    ///
    /// Panics when `bitrate` is zero.
    pub fn set_send_bitrate(&mut self, bitrate: Bitrate) {
        assert!(bitrate > Bitrate::ZERO, "send bitrate must be positive");

        self.current_bitrate = bitrate;
        self.min_history.clear();
    }

    /// Configures the hard bounds.
    ///
    /// The minimum is raised to the host floor when below it. A zero `max`
    /// means unconfigured and installs the 1 Gbit/s default.
    pub fn set_min_max_bitrate(&mut self, min: Bitrate, max: Bitrate) {
        self.min_bitrate_configured = min.max(self.host_floor);

        self.max_bitrate_configured = if max > Bitrate::ZERO {
            self.min_bitrate_configured.max(max)
        } else {
            DEFAULT_MAX_BITRATE
        };
    }

    /// The configured minimum bitrate.
    pub fn min_bitrate(&self) -> Bitrate {
        self.min_bitrate_configured
    }

    /// Call when the receiver advertises a new maximum rate (e.g. REMB).
    ///
    /// A zero `bitrate` removes the ceiling.
    pub fn update_receiver_estimate(&mut self, now_ms: i64, bitrate: Bitrate) {
        self.receiver_limit = bitrate;
        self.current_bitrate = self.cap_to_limits(now_ms, self.current_bitrate);
    }

    /// Call when a new delay-based estimate is available.
    ///
    /// A zero `bitrate` removes the ceiling.
    pub fn update_delay_based_estimate(&mut self, now_ms: i64, bitrate: Bitrate) {
        self.delay_based_limit = bitrate;
        self.current_bitrate = self.cap_to_limits(now_ms, self.current_bitrate);
    }

    /// Call when a receiver report block arrives.
    ///
    /// `fraction_loss` is the reported loss in Q8 units, `packets` the number
    /// of packets the report covers. Reports are accumulated until enough
    /// packets back a stable fraction; only then is a new smoothed loss
    /// published and the control loop run.
    pub fn update_receiver_block(
        &mut self,
        fraction_loss: u8,
        rtt_ms: i64,
        packets: i64,
        now_ms: i64,
    ) {
        self.last_feedback_at = Timestamp::At(now_ms);
        if self.first_report_at.is_never() {
            self.first_report_at = Timestamp::At(now_ms);
        }

        self.last_rtt_ms = rtt_ms;

        if packets > 0 {
            self.lost_packets_q8 += fraction_loss as i64 * packets;
            self.expected_packets += packets;

            // Don't generate a loss rate until it can be based on enough
            // packets.
            if self.expected_packets < LIMIT_NUM_PACKETS {
                return;
            }

            self.has_decreased_since_last_loss = false;
            self.last_fraction_loss = (self.lost_packets_q8 / self.expected_packets) as u8;

            self.lost_packets_q8 = 0;
            self.expected_packets = 0;
            self.last_packet_report_at = Timestamp::At(now_ms);
            self.update_estimate(now_ms);
        }

        self.startup.update(
            self.first_report_at.elapsed(now_ms),
            self.is_in_start_phase(now_ms),
            self.current_bitrate,
            rtt_ms,
            (fraction_loss as i64 * packets) >> 8,
            self.metrics,
        );
    }

    /// Runs the control loop.
    ///
    /// Invoked internally after every published loss sample; hosts should
    /// also tick it periodically (e.g. on delay-estimate updates) so the
    /// watchdog can observe feedback starvation.
    pub fn update_estimate(&mut self, now_ms: i64) {
        // Trust the receiver and delay-based limits during the first two
        // seconds of a session while no loss has been reported, to allow
        // startup bitrate probing.
        if self.last_fraction_loss == 0 && self.is_in_start_phase(now_ms) {
            let prev_bitrate = self.current_bitrate;

            if self.receiver_limit > self.current_bitrate {
                self.current_bitrate = self.cap_to_limits(now_ms, self.receiver_limit);
            }
            if self.delay_based_limit > self.current_bitrate {
                self.current_bitrate = self.cap_to_limits(now_ms, self.delay_based_limit);
            }

            if self.current_bitrate != prev_bitrate {
                // Seed the window with the probed rate so the increase rule
                // has a baseline once regular operation starts.
                self.min_history.clear();
                self.min_history.push(now_ms, self.current_bitrate);
                return;
            }
        }

        let windowed_min = self.min_history.push(now_ms, self.current_bitrate);

        if self.last_packet_report_at.is_never() {
            // No feedback received yet; only enforce the limits.
            self.current_bitrate = self.cap_to_limits(now_ms, self.current_bitrate);
            return;
        }

        let since_packet_report = self.last_packet_report_at.elapsed(now_ms);
        let since_feedback = self.last_feedback_at.elapsed(now_ms);

        if (since_packet_report as f64) < 1.2 * FEEDBACK_INTERVAL_MS as f64 {
            let loss = self.last_fraction_loss as f32 / 256.0;

            // Loss only drives decisions above a configurable bitrate
            // threshold; low-rate loss is frequently unrelated to congestion.
            if self.current_bitrate < self.bitrate_threshold || loss <= self.low_loss_threshold {
                // Increase by 8% of the minimum bitrate emitted over the last
                // second. Growing from the windowed minimum instead of
                // compounding the instantaneous value lets the rate step up a
                // full interval sooner once a low-loss report arrives.
                let new_bitrate = Bitrate::bps((windowed_min.as_f64() * 1.08 + 0.5) as u64);

                // An extra 1 kbps so very low rates cannot get stuck;
                // negligible at higher rates.
                self.current_bitrate = new_bitrate + Bitrate::kbps(1);
            } else if self.current_bitrate > self.bitrate_threshold {
                if loss <= self.high_loss_threshold {
                    // Loss between the thresholds: hold.
                } else {
                    // Decrease at most once per published loss sample, and no
                    // more often than once per DECREASE_INTERVAL_MS + rtt.
                    if !self.has_decreased_since_last_loss
                        && now_ms - self.last_decrease_at_ms
                            >= DECREASE_INTERVAL_MS + self.last_rtt_ms
                    {
                        self.last_decrease_at_ms = now_ms;

                        // new = rate * (1 - 0.5 * lossRate), with the loss
                        // fraction carried in Q8:
                        // new = rate * (512 - fraction_loss) / 512.
                        self.current_bitrate = Bitrate::bps(
                            (self.current_bitrate.as_f64()
                                * (512 - self.last_fraction_loss as i64) as f64
                                / 512.0) as u64,
                        );
                        self.has_decreased_since_last_loss = true;
                    }
                }
            }
        } else if since_feedback > FEEDBACK_TIMEOUT_INTERVALS * FEEDBACK_INTERVAL_MS
            && self.last_timeout_at.elapsed(now_ms) > TIMEOUT_INTERVAL_MS
        {
            if self.feedback_timeout_enabled {
                warn!("Feedback timed out ({since_feedback} ms), reducing bitrate");
                self.current_bitrate = self.current_bitrate * 0.8;

                // The missing feedback has been acted on. Loss accumulated so
                // far must not trigger a second reaction to the same packets.
                self.lost_packets_q8 = 0;
                self.expected_packets = 0;
                self.last_timeout_at = Timestamp::At(now_ms);
            }
        }

        let capped = self.cap_to_limits(now_ms, self.current_bitrate);
        if capped != self.current_bitrate
            || self.last_fraction_loss != self.last_logged_fraction_loss
            || self.last_event_log_at.elapsed(now_ms) > EVENT_LOG_PERIOD_MS
        {
            self.events
                .loss_based_update(capped, self.last_fraction_loss, self.expected_packets);
            self.last_logged_fraction_loss = self.last_fraction_loss;
            self.last_event_log_at = Timestamp::At(now_ms);
        }
        self.current_bitrate = capped;
    }

    /// The current target together with the loss and RTT it is based on.
    pub fn current_estimate(&self) -> Estimate {
        Estimate {
            bitrate: self.current_bitrate,
            fraction_loss: self.last_fraction_loss,
            rtt_ms: self.last_rtt_ms,
        }
    }

    fn is_in_start_phase(&self, now_ms: i64) -> bool {
        self.first_report_at.is_never() || self.first_report_at.elapsed(now_ms) < START_PHASE_MS
    }

    /// Clamps `bitrate` into the advertised and configured limits.
    ///
    /// The receiver and delay-based ceilings apply before the configured
    /// maximum, and the configured minimum is applied last so a low ceiling
    /// can never undercut the floor.
    fn cap_to_limits(&mut self, now_ms: i64, mut bitrate: Bitrate) -> Bitrate {
        if !self.receiver_limit.is_zero() && bitrate > self.receiver_limit {
            bitrate = self.receiver_limit;
        }
        if !self.delay_based_limit.is_zero() && bitrate > self.delay_based_limit {
            bitrate = self.delay_based_limit;
        }
        if bitrate > self.max_bitrate_configured {
            bitrate = self.max_bitrate_configured;
        }
        if bitrate < self.min_bitrate_configured {
            if self.last_low_bitrate_log_at.elapsed(now_ms) > LOW_BITRATE_LOG_PERIOD_MS {
                warn!(
                    "Estimated available bandwidth {} is below configured min bitrate {}",
                    bitrate, self.min_bitrate_configured
                );
                self.last_low_bitrate_log_at = Timestamp::At(now_ms);
            }
            bitrate = self.min_bitrate_configured;
        }
        bitrate
    }
}

#[cfg(test)]
mod test {
    use crate::events::NullEvents;
    use crate::metrics::NullMetrics;

    use super::*;

    fn make_estimator() -> SendSideEstimator<'static> {
        SendSideEstimator::new(Bitrate::bps(5_000), &(), &NullEvents, &NullMetrics)
    }

    fn probing(use_delay_based: bool) {
        let mut bwe = make_estimator();
        let mut now_ms = 0;

        bwe.set_min_max_bitrate(Bitrate::bps(100_000), Bitrate::bps(1_500_000));
        bwe.set_send_bitrate(Bitrate::bps(200_000));

        let remb = Bitrate::bps(1_000_000);
        let second_remb = remb + Bitrate::bps(500_000);

        bwe.update_receiver_block(0, 50, 1, now_ms);

        // The initial cap applies immediately in the start phase.
        if use_delay_based {
            bwe.update_delay_based_estimate(now_ms, remb);
        } else {
            bwe.update_receiver_estimate(now_ms, remb);
        }
        bwe.update_estimate(now_ms);
        assert_eq!(bwe.current_estimate().bitrate, remb);

        // A second cap after the start phase no longer lifts the rate.
        now_ms += 2001;
        if use_delay_based {
            bwe.update_delay_based_estimate(now_ms, second_remb);
        } else {
            bwe.update_receiver_estimate(now_ms, second_remb);
        }
        bwe.update_estimate(now_ms);
        assert_eq!(bwe.current_estimate().bitrate, remb);
    }

    #[test]
    fn test_initial_receiver_estimate_with_probing() {
        probing(false);
    }

    #[test]
    fn test_initial_delay_based_estimate_with_probing() {
        probing(true);
    }

    #[test]
    fn test_does_not_reapply_decrease_without_new_loss_sample() {
        let mut bwe = make_estimator();
        let min = Bitrate::bps(100_000);
        let initial = Bitrate::bps(1_000_000);
        let mut now_ms = 1_000;

        bwe.set_min_max_bitrate(min, Bitrate::bps(1_500_000));
        bwe.set_send_bitrate(initial);

        now_ms += 10_000;

        assert_eq!(bwe.current_estimate().bitrate, initial);
        assert_eq!(bwe.current_estimate().fraction_loss, 0);
        assert_eq!(bwe.current_estimate().rtt_ms, 0);

        // Heavy loss takes the bitrate down.
        bwe.update_receiver_block(128, 50, 100, now_ms);

        now_ms += 1_000;
        bwe.update_estimate(now_ms);

        let decreased = bwe.current_estimate();
        assert!(decreased.bitrate < initial);
        // The decrease must not have fallen all the way to the floor, or the
        // second half of this test proves nothing.
        assert!(decreased.bitrate > min);
        assert_eq!(decreased.fraction_loss, 128);
        assert_eq!(decreased.rtt_ms, 50);

        // Without an intermediate receiver block there is nothing new to act
        // on. The rate holds, the stale loss is still reported.
        now_ms += 1_000;
        bwe.update_estimate(now_ms);

        assert_eq!(bwe.current_estimate().bitrate, decreased.bitrate);
        assert_eq!(bwe.current_estimate().fraction_loss, 128);
        assert_eq!(bwe.current_estimate().rtt_ms, 50);
    }

    #[test]
    fn test_set_send_bitrate_overrides_delay_based_estimate() {
        let mut bwe = make_estimator();

        bwe.set_min_max_bitrate(Bitrate::bps(10_000), Bitrate::bps(10_000_000));
        bwe.set_send_bitrate(Bitrate::bps(300_000));

        bwe.update_delay_based_estimate(0, Bitrate::bps(350_000));
        bwe.update_estimate(0);
        let estimate = bwe.current_estimate().bitrate;
        assert!(estimate >= Bitrate::bps(300_000));
        assert!(estimate <= Bitrate::bps(350_000));

        // The forced value is installed uncapped and stays until the next
        // control-loop pass.
        bwe.set_send_bitrate(Bitrate::bps(2_500_000));
        assert_eq!(bwe.current_estimate().bitrate, Bitrate::bps(2_500_000));
    }

    #[test]
    fn test_fraction_loss_does_not_overflow() {
        let mut bwe = make_estimator();
        bwe.set_min_max_bitrate(Bitrate::bps(100_000), Bitrate::bps(1_500_000));
        bwe.set_send_bitrate(Bitrate::bps(1_000_000));

        // Total loss across many packets must publish exactly 255, not wrap.
        bwe.update_receiver_block(255, 50, 100, 11_000);
        assert_eq!(bwe.current_estimate().fraction_loss, 255);
    }

    #[test]
    fn test_loss_gate_accumulates_small_reports() {
        let mut bwe = make_estimator();
        bwe.set_min_max_bitrate(Bitrate::bps(100_000), Bitrate::bps(1_500_000));
        bwe.set_send_bitrate(Bitrate::bps(1_000_000));

        // 19 packets: below the gate, nothing published.
        bwe.update_receiver_block(64, 50, 19, 10_000);
        assert_eq!(bwe.current_estimate().fraction_loss, 0);

        // One more packet crosses the gate; the published fraction is the
        // packet-weighted Q8 average: (64*19 + 0*1) / 20 = 60.
        bwe.update_receiver_block(0, 50, 1, 10_100);
        assert_eq!(bwe.current_estimate().fraction_loss, 60);
    }

    #[test]
    fn test_update_estimate_is_idempotent_between_reports() {
        let mut bwe = make_estimator();
        bwe.set_min_max_bitrate(Bitrate::bps(100_000), Bitrate::bps(1_500_000));
        bwe.set_send_bitrate(Bitrate::bps(500_000));

        bwe.update_receiver_block(10, 50, 50, 0);

        // No new receiver block in between: repeated ticks at the same
        // instant must not change the outcome.
        bwe.update_estimate(3_000);
        let first = bwe.current_estimate();
        bwe.update_estimate(3_000);
        assert_eq!(bwe.current_estimate(), first);
    }
}
