//! Send-side loss-based bandwidth estimation for real-time media.
//!
//! This crate implements the sender half of loss-driven congestion control:
//! a deterministic, time-driven decision engine that turns receiver loss
//! reports, a receiver-advertised maximum rate and a delay-based estimate
//! into a single target bitrate for pacing encoders and packet transmission.
//!
//! The crate is sans-IO. Nothing here reads a clock, parses RTCP or touches
//! a socket; every operation takes the current time in milliseconds on a
//! caller-supplied monotonic timeline. That makes the control loop fully
//! deterministic and testable.
//!
//! ```
//! use sendside_bwe::{Bitrate, NullEvents, NullMetrics, SendSideEstimator};
//!
//! let events = NullEvents;
//! let metrics = NullMetrics;
//! let mut bwe = SendSideEstimator::new(Bitrate::bps(5_000), &(), &events, &metrics);
//!
//! bwe.set_bitrates(
//!     Some(Bitrate::kbps(300)),
//!     Bitrate::kbps(50),
//!     Bitrate::mbps(2),
//! );
//!
//! // Receiver reports drive the loop; zero loss lets the rate grow.
//! bwe.update_receiver_block(0, 50, 50, 0);
//! bwe.update_receiver_block(0, 50, 50, 1_000);
//!
//! assert!(bwe.current_estimate().bitrate > Bitrate::kbps(300));
//! ```

#[macro_use]
extern crate tracing;

mod bitrate;
pub use bitrate::Bitrate;

mod config;
pub use config::{FieldLookup, FEEDBACK_TIMEOUT_KEY, LOSS_EXPERIMENT_KEY};

mod events;
pub use events::{EventLog, NullEvents};

mod history;

mod metrics;
pub use metrics::{MetricsSink, NullMetrics};

mod estimator;
pub use estimator::{Estimate, SendSideEstimator};

mod time;
