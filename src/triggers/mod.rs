//! Trigger Subsystem
//!
//! Event sources that launch workflow runs: recurring schedules, inbound
//! webhooks, database change polling and mailbox arrival.

// Timer backends (tokio-cron-scheduler and a virtual clock)
pub mod scheduler;

// Free text -> cron
pub mod interpreter;

// Database change detection for poll triggers
pub mod detector;

// Webhook path and auth helpers
pub mod webhook;

// Registry of armed triggers
pub mod registry;

pub use detector::{ChangeDetector, SqlChangeDetector};
pub use interpreter::{RuleBasedScheduleInterpreter, ScheduleInterpreter};
pub use registry::{
    PollSpec, ScheduleTriggerSpec, TriggerDefaults, TriggerInfo, TriggerRegistry, WebhookRoute,
    WebhookSpec,
};
pub use scheduler::{Cadence, CronScheduler, ManualScheduler, ScheduleHandle, Scheduler};
