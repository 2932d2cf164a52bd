/// The node runtime event loop.
///
/// A single async task owns the `ForwardingEngine` and multiplexes over
/// inbound frames, application commands, unicast outcomes and three
/// jittered timers. Every input is processed to completion before the next
/// one is looked at; unicasts run on their own tasks and report back.
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::forwarding::ForwardingEngine;

use super::executor::{execute_effects, Delivery};
use super::reliable::ReliableTransport;
use super::sensor::SensorSource;
use super::transport::{Inbound, Transport};
use super::{Outputs, RuntimeCommand, RuntimeConfig};

/// Uniform duration in `[min, max]`, millisecond resolution.
fn jitter(rng: &mut StdRng, min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rng.random_range(lo..=hi))
}

pub(super) async fn runtime_loop<T: Transport + 'static>(
    mut engine: ForwardingEngine,
    transport: ReliableTransport<T>,
    mut sensor: Box<dyn SensorSource>,
    config: RuntimeConfig,
    mut inbound_rx: mpsc::Receiver<Inbound>,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    outputs: Outputs,
) {
    let node = engine.local_id();
    let mut rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(node.get()))),
        None => StdRng::from_os_rng(),
    };
    let sensing = engine.config().role.produces_readings();
    let transport = Arc::new(transport);
    let (delivery_tx, mut delivery_rx) = mpsc::channel::<Delivery>(config.channel_capacity);

    // ── Timers ──────────────────────────────────────────────────────
    let start = Instant::now();
    let mut announce_at = start;
    let mut maintenance_at = start
        + jitter(
            &mut rng,
            config.maintenance_interval_min,
            config.maintenance_interval_max,
        );
    let mut sensor_at = start + jitter(&mut rng, Duration::ZERO, config.sensor_period)
        .min(config.sensor_period.saturating_sub(Duration::from_millis(1)));

    tracing::info!(%node, role = ?engine.config().role, "node runtime started");

    loop {
        let effects = tokio::select! {
            // ── 1. Frames from the radio ──────────────────────────
            Some(frame) = inbound_rx.recv() => {
                engine.handle_incoming(&frame.payload, frame.sender, frame.metric)
            }

            // ── 2. Unicast outcomes ───────────────────────────────
            Some(Delivery { target, outcome }) = delivery_rx.recv() => {
                engine.handle_send_outcome(target, outcome)
            }

            // ── 3. Application commands ───────────────────────────
            cmd = cmd_rx.recv() => match cmd {
                Some(RuntimeCommand::IssueCommand { order, destination }) => {
                    engine.issue_command(order, destination)
                }
                Some(RuntimeCommand::ReportReading { value }) => engine.tick_sensor(value),
                Some(RuntimeCommand::Snapshot { reply }) => {
                    let _ = reply.send(engine.snapshot());
                    continue;
                }
                Some(RuntimeCommand::Shutdown) | None => break,
            },

            // ── 4. Timers ─────────────────────────────────────────
            _ = sleep_until(announce_at) => {
                announce_at = Instant::now()
                    + jitter(&mut rng, config.announce_interval_min, config.announce_interval_max);
                engine.tick_announce()
            }
            _ = sleep_until(maintenance_at) => {
                maintenance_at = Instant::now()
                    + jitter(
                        &mut rng,
                        config.maintenance_interval_min,
                        config.maintenance_interval_max,
                    );
                engine.tick_maintenance()
            }
            _ = sleep_until(sensor_at), if sensing => {
                sensor_at += config.sensor_period;
                let value = sensor.sample();
                engine.tick_sensor(value)
            }
        };

        if execute_effects(effects, &engine, &transport, &outputs, &delivery_tx).await {
            announce_at = Instant::now();
        }
    }

    tracing::info!(%node, "node runtime stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let (min, max) = (Duration::from_secs(2), Duration::from_secs(4));
        for _ in 0..500 {
            let d = jitter(&mut rng, min, max);
            assert!(d >= min && d <= max, "{d:?}");
        }
    }

    #[test]
    fn degenerate_range_returns_min() {
        let mut rng = StdRng::seed_from_u64(1);
        let d = Duration::from_secs(3);
        assert_eq!(jitter(&mut rng, d, d), d);
    }
}
