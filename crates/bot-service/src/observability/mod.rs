//! Observability for the call bot.
//!
//! Logging goes through `tracing` with per-module targets; metrics go
//! through the `metrics` facade and are exported only when a Prometheus
//! listener address is configured.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `bot_sync_total` | Counter | `status` | Long-poll outcomes |
//! | `bot_sync_events_total` | Counter | none | Timeline events received |
//! | `bot_commands_total` | Counter | `outcome` | Dispatched command outcomes |
//! | `bot_call_join_total` | Counter | `status` | Join attempts by result or failing step |
//! | `bot_call_join_duration_seconds` | Histogram | none | Time to complete the join protocol |
//! | `bot_call_leave_total` | Counter | none | Membership clears |
//! | `bot_calls_active` | Gauge | none | Call sessions owned by this process |

pub mod metrics;

pub use metrics::{
    init_metrics_exporter, record_call_join, record_call_join_duration, record_call_leave,
    record_command, record_sync, record_sync_events, set_calls_active,
};
