use std::collections::HashMap;

use thiserror::Error;

use crate::bitrate::Bitrate;

/// Key for the loss-threshold experiment.
pub const LOSS_EXPERIMENT_KEY: &str = "BweLossExperiment";

/// Key for the feedback-timeout experiment.
pub const FEEDBACK_TIMEOUT_KEY: &str = "WebRTC-FeedbackTimeout";

/// Bitrate thresholds at or above `i32::MAX / 1000` kbps would overflow once
/// converted to bps.
const MAX_BITRATE_THRESHOLD_KBPS: u32 = 2_147_483;

/// Lookup for host-provided tunables.
///
/// Some embeddings keep these in process-global state. Modeling the registry
/// as an injected object keeps the estimator pure and lets tests drive every
/// configuration.
pub trait FieldLookup {
    /// The configured value for `key`, or `None` when unset.
    fn find(&self, key: &str) -> Option<&str>;
}

/// The empty registry. Every tunable takes its default.
impl FieldLookup for () {
    fn find(&self, _key: &str) -> Option<&str> {
        None
    }
}

impl FieldLookup for HashMap<String, String> {
    fn find(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

/// Tunables for the loss-threshold experiment.
///
/// The estimator increases below `low_loss_threshold`, holds between the two
/// thresholds and decreases above `high_loss_threshold`, with the loss branch
/// only armed above `bitrate_threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LossExperiment {
    pub low_loss_threshold: f32,
    pub high_loss_threshold: f32,
    pub bitrate_threshold: Bitrate,
}

impl Default for LossExperiment {
    fn default() -> Self {
        Self {
            low_loss_threshold: 0.02,
            high_loss_threshold: 0.1,
            bitrate_threshold: Bitrate::ZERO,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TrialError {
    #[error("expected Enabled-<low>,<high>,<kbps>")]
    Malformed,

    #[error("loss thresholds must be in (0, 1]")]
    ThresholdOutOfRange,

    #[error("low loss threshold must not exceed high loss threshold")]
    ThresholdsInverted,

    #[error("bitrate threshold must be below {MAX_BITRATE_THRESHOLD_KBPS} kbps")]
    BitrateOutOfRange,
}

impl LossExperiment {
    /// Reads the loss experiment from the registry.
    ///
    /// `None` when the trial is unset or not enabled. An enabled trial with
    /// unparseable parameters degrades to the defaults with a warning.
    pub fn from_lookup(trials: &dyn FieldLookup) -> Option<LossExperiment> {
        let value = trials.find(LOSS_EXPERIMENT_KEY)?;

        // The experiment is enabled iff the value begins with "Enabled".
        if !value.starts_with("Enabled") {
            return None;
        }

        match Self::parse(value) {
            Ok(exp) => {
                info!(
                    "Enabled loss experiment with thresholds {}/{}, bitrate threshold {}",
                    exp.low_loss_threshold, exp.high_loss_threshold, exp.bitrate_threshold
                );
                Some(exp)
            }
            Err(e) => {
                warn!("Failed to parse loss experiment parameters, using defaults: {e}");
                Some(Self::default())
            }
        }
    }

    fn parse(value: &str) -> Result<Self, TrialError> {
        let rest = value.strip_prefix("Enabled-").ok_or(TrialError::Malformed)?;

        let mut parts = rest.splitn(3, ',');
        let mut next = || parts.next().ok_or(TrialError::Malformed);

        let low: f32 = next()?.parse().map_err(|_| TrialError::Malformed)?;
        let high: f32 = next()?.parse().map_err(|_| TrialError::Malformed)?;
        let kbps: u32 = next()?.parse().map_err(|_| TrialError::Malformed)?;

        if !(low > 0.0 && low <= 1.0) {
            return Err(TrialError::ThresholdOutOfRange);
        }
        if !(high > 0.0 && high <= 1.0) {
            return Err(TrialError::ThresholdOutOfRange);
        }
        if low > high {
            return Err(TrialError::ThresholdsInverted);
        }
        if kbps >= MAX_BITRATE_THRESHOLD_KBPS {
            return Err(TrialError::BitrateOutOfRange);
        }

        Ok(LossExperiment {
            low_loss_threshold: low,
            high_loss_threshold: high,
            bitrate_threshold: Bitrate::kbps(kbps as u64),
        })
    }
}

/// Whether the feedback-timeout cut is enabled in the registry.
pub(crate) fn feedback_timeout_enabled(trials: &dyn FieldLookup) -> bool {
    trials
        .find(FEEDBACK_TIMEOUT_KEY)
        .map(|v| v.starts_with("Enabled"))
        .unwrap_or(false)
}
