//! Observability for the execution engine
//!
//! - Structured events through `tracing`, one record per event
//! - Stable event names ([`Event::as_str`])
//! - Fatal events at ERROR level, warnings at WARN, the rest at DEBUG
//!
//! Observability is read-only: nothing here feeds back into execution.
//!
//! # Usage
//!
//! ```ignore
//! use aerodb_exec::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::ScanTimeoutResumed, &[("index", "#primary")]);
//! ```

mod events;

pub use events::Event;

/// Emits a lifecycle event.
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Emits a lifecycle event with key/value fields.
///
/// Fields are rendered in the order given.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let rendered = render_fields(fields);
    if event.is_fatal() {
        tracing::error!(event = event.as_str(), fields = %rendered);
    } else if event.is_warning() {
        tracing::warn!(event = event.as_str(), fields = %rendered);
    } else {
        tracing::debug!(event = event.as_str(), fields = %rendered);
    }
}

fn render_fields(fields: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(fields.len() * 16);
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        assert_eq!(render_fields(&[("a", "1"), ("b", "x")]), "a=1 b=x");
        assert_eq!(render_fields(&[]), "");
    }

    #[test]
    fn test_log_event() {
        // no subscriber installed; verifies no panic
        log_event(Event::RequestComplete);
        log_event_with_fields(Event::QuotaExceeded, &[("requested", "10")]);
    }
}
