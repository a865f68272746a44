//! Background TTL sweeper, one per `Registry`. Mirrors a template
//! cache's eviction loop, but driven by `tokio::time::interval` instead
//! of a check-on-access pattern, since connections can go idle without
//! ever being looked up again.

use super::{Registry, Transport};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn a task that calls `sweep_idle` on `registry` every
/// `sweep_interval`. Dropping the returned handle does not stop the
/// task; abort it explicitly if the registry is being torn down.
pub fn spawn_sweeper<T: Transport>(registry: Registry<T>, sweep_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            registry.sweep_idle();
        }
    })
}
