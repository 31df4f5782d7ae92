use super::Agent;
use crate::api_client::Transport;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio::sync::watch;

/// When the periodic server calls last ran
struct Schedule {
    last_config_fetch: Instant,
    last_command_poll: Instant,
}

impl<T: Transport> Agent<T> {
    /// Run the control loop until `shutdown` flips to true or its sender is
    /// dropped.
    ///
    /// Each iteration runs, in order: a configuration fetch when due, a
    /// command poll when due, one sampling pass, then sleeps one tick. The
    /// shutdown signal is honoured between iterations and during the sleep;
    /// a pass that has started always runs to completion. A panic escaping a
    /// pass ends the loop, and shutdown still runs.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Agent loop starting (config every {}s, commands every {}s, drivers: {})",
            self.timing.config_poll.as_secs(),
            self.timing.command_poll.as_secs(),
            self.registry.known_drivers().join(", ")
        );

        if let Err(panic) = AssertUnwindSafe(self.fetch_config()).catch_unwind().await {
            tracing::error!("Initial configuration fetch panicked: {}", panic_message(&*panic));
            self.shutdown();
            return;
        }

        let mut schedule = Schedule {
            last_config_fetch: Instant::now(),
            last_command_poll: Instant::now(),
        };

        loop {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, exiting main loop");
                break;
            }

            let pass = AssertUnwindSafe(self.run_pass(&mut schedule))
                .catch_unwind()
                .await;
            if let Err(panic) = pass {
                tracing::error!("Agent loop crashed: {}", panic_message(&*panic));
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.timing.tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::info!("Shutdown channel closed, exiting main loop");
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    async fn run_pass(&mut self, schedule: &mut Schedule) {
        if schedule.last_config_fetch.elapsed() >= self.timing.config_poll {
            self.fetch_config().await;
            schedule.last_config_fetch = Instant::now();
        }

        if schedule.last_command_poll.elapsed() >= self.timing.command_poll {
            self.poll_commands().await;
            schedule.last_command_poll = Instant::now();
        }

        self.sample_sensors().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{scripted_registry, Behaviour, Counters, FakeTransport};
    use super::*;
    use crate::agent::Timing;
    use crate::api_client::{PhotoUpload, Result};
    use crate::command::{Command, CommandEntry, CommandStatus};
    use crate::config::tests::sensor;
    use crate::config::{AgentConfig, Id};
    use crate::reading::Reading;
    use std::time::Duration;

    /// Serves a configuration, then panics on the first command poll
    struct PanickingTransport {
        inner: FakeTransport,
    }

    impl Transport for PanickingTransport {
        async fn fetch_config(&self) -> Result<AgentConfig> {
            self.inner.fetch_config().await
        }

        async fn submit_reading(&self, reading: Reading) -> Result<()> {
            self.inner.submit_reading(reading).await
        }

        async fn fetch_commands(&self) -> Result<Vec<CommandEntry>> {
            panic!("command endpoint returned garbage");
        }

        async fn update_command_status(&self, id: Id, status: CommandStatus) -> Result<()> {
            self.inner.update_command_status(id, status).await
        }

        async fn upload_photo(&self, camera_id: Id, photo: PhotoUpload) -> Result<()> {
            self.inner.upload_photo(camera_id, photo).await
        }
    }

    fn fast_timing() -> Timing {
        Timing {
            tick: Duration::from_millis(10),
            config_poll: Duration::from_millis(150),
            command_poll: Duration::from_millis(30),
            driver_timeout: Duration::from_millis(200),
        }
    }

    fn agent_with_sensor() -> (Agent<FakeTransport>, Counters) {
        let config = AgentConfig {
            sensors: vec![sensor(1, "ok")],
            ..Default::default()
        };
        let (registry, counters) = scripted_registry(&[("ok", Behaviour::Value(1.0))]);
        let agent = Agent::new(FakeTransport::with_config(config), "dev-1")
            .with_registry(registry)
            .with_timing(fast_timing());
        (agent, counters)
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let (mut agent, counters) = agent_with_sensor();
        agent.transport().state().pending = vec![Command {
            id: Id::Num(1),
            command_type: "REBOOT".to_string(),
            payload: serde_json::Value::Null,
        }];

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            tx.send(true).unwrap();
            tx
        });

        tokio::time::timeout(Duration::from_secs(5), agent.run(rx))
            .await
            .expect("loop should stop after the shutdown signal");
        let _tx = stopper.await.unwrap();

        let state = agent.transport().state();
        // Initial fetch plus at least one scheduled refresh
        assert!(state.config_fetches >= 2, "fetches: {}", state.config_fetches);
        assert!(state.command_fetches >= 2, "polls: {}", state.command_fetches);
        assert_eq!(state.statuses.len(), 1);
        // Default frequency is 300s, so the sensor is read exactly once
        assert_eq!(counters.reads("ok"), 1);
        assert_eq!(state.readings.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_shutdown_stops_before_first_iteration() {
        let (mut agent, counters) = agent_with_sensor();
        let (tx, rx) = watch::channel(true);

        agent.run(rx).await;
        drop(tx);

        assert_eq!(agent.transport().state().config_fetches, 1);
        assert_eq!(agent.transport().state().command_fetches, 0);
        assert_eq!(counters.reads("ok"), 0);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let (mut agent, counters) = agent_with_sensor();
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), agent.run(rx))
            .await
            .expect("loop should stop when the sender is gone");

        // One full iteration runs before the sleep notices the closed channel
        assert_eq!(counters.reads("ok"), 1);
    }

    #[tokio::test]
    async fn test_offline_loop_keeps_retrying_config() {
        let (registry, counters) = scripted_registry(&[("ok", Behaviour::Value(1.0))]);
        let mut agent = Agent::new(FakeTransport::default(), "dev-1")
            .with_registry(registry)
            .with_timing(fast_timing());

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            let _ = tx.send(true);
        });

        agent.run(rx).await;
        stopper.await.unwrap();

        let state = agent.transport().state();
        assert!(state.config_fetches >= 2);
        assert_eq!(state.command_fetches, 0);
        assert_eq!(counters.reads("ok"), 0);
    }

    #[tokio::test]
    async fn test_panic_in_pass_ends_loop_with_shutdown() {
        let config = AgentConfig {
            sensors: vec![sensor(1, "ok")],
            ..Default::default()
        };
        let (registry, counters) = scripted_registry(&[("ok", Behaviour::Value(1.0))]);
        let transport = PanickingTransport {
            inner: FakeTransport::with_config(config),
        };
        let mut agent = Agent::new(transport, "dev-1")
            .with_registry(registry)
            .with_timing(fast_timing());

        // Sender stays alive: only the panic can end the loop
        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(5), agent.run(rx))
            .await
            .expect("a panicking pass should end the loop");

        // The sensor was read before the first command poll came due
        assert_eq!(counters.reads("ok"), 1);
        // Shutdown ran and released the cached driver
        assert_eq!(agent.registry.loaded_count(), 0);
        assert_eq!(agent.transport().inner.state().readings.len(), 1);
    }
}
