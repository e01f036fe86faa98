use chrono::{DateTime, Utc};

/// A domain-agnostic signal.
///
/// Signals are immutable facts about something that already happened.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable signal name (e.g. "security.user.confirmed").
    fn event_type(&self) -> &'static str;

    /// When the underlying operation completed.
    fn occurred_at(&self) -> DateTime<Utc>;
}
