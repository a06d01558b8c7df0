use crate::constants::STATUS_EVENT;

/// Receives progress notifications (`status` events and stream echoes)
/// while a run is in flight.
#[mockall::automock]
pub trait StatusPublisher: std::fmt::Debug + Send + Sync {
    fn publish(&self, event: &str, data: &str);
}

/// Forwards notifications to the log. Stream echoes only show up at trace
/// level.
#[derive(Clone, Debug, Default)]
pub struct TracingPublisher;

impl StatusPublisher for TracingPublisher {
    fn publish(&self, event: &str, data: &str) {
        if event == STATUS_EVENT {
            tracing::info!(target: "shovel::status", "{}", data);
        } else {
            tracing::trace!(target: "shovel::status", event, "{}", data);
        }
    }
}
