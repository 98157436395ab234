//! # Utility Modules
//!
//! Supporting utilities shared by the codec and both transports.
//!
//! ## Components
//! - **Endian**: big-endian integer conversions for the frame prefix
//! - **Logging**: tracing subscriber setup
//! - **Metrics**: atomic exchange counters
//! - **Timeout**: async timeout wrappers

pub mod endian;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{global_metrics, ExchangeMetrics, MetricsSnapshot};
