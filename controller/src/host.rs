use std::{
    net::SocketAddr,
    sync::OnceLock,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use greenhouse_common::{
    config::NetworkConfig, GreenhouseEngine, HistoryEntry, MonoMs, Relay, RemoteCommand,
    RuntimeConfig, SensorSnapshot, Settings, TelemetryPayload, TickTime, TOPIC_CMD_PREFIX,
    TOPIC_CONTROLLER_STATUS, TOPIC_HISTORY, TOPIC_SENSOR_SNAPSHOT, TOPIC_SETTINGS_STATE,
    TOPIC_SET_SETTINGS, TOPIC_TELEMETRY,
};

use crate::{
    relay::RelayBoard,
    store::AppStore,
    web::{self, WebState},
};

/// Bulk settings updates are the largest inbound documents.
const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Latest snapshot and the monotonic instant it arrived.
#[derive(Debug, Clone, Copy, Default)]
struct SensorSample {
    snapshot: SensorSnapshot,
    received: Option<MonoMs>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.controller.sanitize();
    runtime.network = network_from_env(runtime.network, |key| std::env::var(key).ok());
    if runtime.timezone.parse::<Tz>().is_err() {
        warn!("unknown timezone `{}`; falling back to UTC", runtime.timezone);
        runtime.timezone = "UTC".to_string();
    }

    let settings = store.load_settings().await.unwrap_or_else(|err| {
        warn!("failed to load settings from store: {err:#}");
        Settings::default()
    });
    let history = store.load_history().await.unwrap_or_else(|err| {
        warn!("failed to load history from store: {err:#}");
        Vec::new()
    });
    let engine = GreenhouseEngine::new(runtime.controller.clone(), settings, history);

    let network = &runtime.network;
    let mut mqtt_options = MqttOptions::new(
        "greenhouse-controller-rust",
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (sensor_tx, sensor_rx) = watch::channel(SensorSample::default());
    let (settings_tx, settings_rx) = watch::channel(engine.settings().clone());
    let (telemetry_tx, telemetry_rx) = watch::channel(None);
    let (history_tx, history_rx) = watch::channel(engine.history_entries());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (save_failed_tx, save_failed_rx) = mpsc::unbounded_channel();

    subscribe_topics(&mqtt).await?;
    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish controller status")?;

    let router = InboundRouter {
        commands: command_tx.clone(),
        sensors: sensor_tx,
    };
    spawn_mqtt_loop(router, eventloop);

    let control = ControlLoop {
        engine,
        relays: RelayBoard::new(),
        commands: command_rx,
        sensors: sensor_rx,
        settings_tx,
        telemetry_tx,
        history_tx,
        save_failed_tx,
        save_failed_rx,
        mqtt,
        store,
        timezone: runtime.timezone.clone(),
    };
    let tick_period = Duration::from_millis(runtime.controller.tick_interval_ms.max(100));
    let control_task = spawn_control_loop(control, tick_period, shutdown_rx);

    let app = web::router(WebState {
        commands: command_tx,
        settings: settings_rx,
        telemetry: telemetry_rx,
        history: history_rx,
    })
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    control_task.await.context("control loop panicked")?;
    Ok(())
}

/// Applies `MQTT_*` and `CONTROLLER_HTTP_PORT` over the stored network config.
fn network_from_env(
    mut network: NetworkConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> NetworkConfig {
    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = lookup("CONTROLLER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok())
    {
        network.http_port = port;
    }
    network
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let command_filter = format!("{TOPIC_CMD_PREFIX}#");
    let topics = [TOPIC_SENSOR_SNAPSHOT, TOPIC_SET_SETTINGS, command_filter.as_str()];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

trait MessageHandler {
    fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Routes sensor snapshots into the watch slot and everything else into the
/// command queue.
struct InboundRouter {
    commands: mpsc::Sender<RemoteCommand>,
    sensors: watch::Sender<SensorSample>,
}

impl MessageHandler for InboundRouter {
    fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
            warn!(
                "dropping mqtt payload on {topic}: {} bytes exceeds limit {}",
                payload.len(),
                MAX_MQTT_PAYLOAD_BYTES
            );
            return Ok(());
        }
        let message = std::str::from_utf8(payload).context("mqtt payload is not utf-8")?;

        if topic == TOPIC_SENSOR_SNAPSHOT {
            let snapshot: SensorSnapshot =
                serde_json::from_str(message).context("invalid sensor snapshot")?;
            self.sensors.send_replace(SensorSample {
                snapshot,
                received: Some(MonoMs(monotonic_ms())),
            });
            return Ok(());
        }

        let command = RemoteCommand::from_mqtt(topic, message)
            .with_context(|| format!("rejected command on {topic}"))?;
        let label = command.label();
        self.commands
            .try_send(command)
            .map_err(|err| anyhow!("command queue rejected {label}: {err}"))?;
        debug!("queued {label} from {topic}");
        Ok(())
    }
}

fn spawn_mqtt_loop(handler: impl MessageHandler + Send + 'static, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = handler.handle(&message.topic, &message.payload) {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Owns the engine. Everything else sees it through channels.
struct ControlLoop {
    engine: GreenhouseEngine,
    relays: RelayBoard,
    commands: mpsc::Receiver<RemoteCommand>,
    sensors: watch::Receiver<SensorSample>,
    settings_tx: watch::Sender<Settings>,
    telemetry_tx: watch::Sender<Option<TelemetryPayload>>,
    history_tx: watch::Sender<Vec<HistoryEntry>>,
    save_failed_tx: mpsc::UnboundedSender<&'static str>,
    save_failed_rx: mpsc::UnboundedReceiver<&'static str>,
    mqtt: AsyncClient,
    store: AppStore,
    timezone: String,
}

fn spawn_control_loop(
    mut control: ControlLoop,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        control.relays.all_off();
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => control.tick().await,
                _ = shutdown.changed() => break,
            }
        }

        let energized = Relay::ALL
            .iter()
            .filter(|relay| control.relays.is_on(**relay))
            .count();
        if let Some(direction) = control.relays.window_motion() {
            info!("interrupting window travel {}", direction.as_str());
        }
        info!("switching off {energized} energized relays");
        control.relays.all_off();
        if let Err(err) = control
            .mqtt
            .publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "offline")
            .await
        {
            warn!("controller status publish failed: {err}");
        }
        info!("control loop stopped");
    })
}

impl ControlLoop {
    async fn tick(&mut self) {
        let local = now_in_timezone(&self.timezone).unwrap_or_else(|| Utc::now().fixed_offset());
        let now = TickTime::new(MonoMs(monotonic_ms()), &local);

        while let Ok(reason) = self.save_failed_rx.try_recv() {
            self.engine.requeue_save(reason);
        }

        while let Ok(command) = self.commands.try_recv() {
            let label = command.label();
            match self.engine.apply_command(command, &now) {
                Some(report) if !report.rejected.is_empty() => {
                    warn!("settings update rejected fields: {:?}", report.rejected);
                }
                _ => {}
            }
            info!("applied {label} command");
        }

        let sample = *self.sensors.borrow();
        let outcome = self.engine.tick(&sample.snapshot, sample.received, &now);

        if let Some(report) = &outcome.recovery {
            info!("boot recovery: {}", report.summary().join(", "));
        }
        for event in &outcome.events {
            info!("control event: {event}");
        }
        for action in &outcome.actions {
            self.relays.apply(action);
        }

        if let Some(reason) = outcome.save {
            self.spawn_settings_save(reason);
        } else if self.engine.save_pending() {
            debug!("settings save deferred by cooldown");
        }
        if outcome.save.is_some() || outcome.publish_settings {
            let settings = self.engine.settings().clone();
            if outcome.publish_settings {
                self.publish_json(TOPIC_SETTINGS_STATE, false, &settings).await;
            }
            self.settings_tx.send_replace(settings);
        }

        let telemetry = self.engine.telemetry(&now);
        if outcome.publish_telemetry {
            self.publish_json(TOPIC_TELEMETRY, true, &telemetry).await;
        }
        self.telemetry_tx.send_replace(Some(telemetry));

        if outcome.flush_history {
            let entries = self.engine.history_entries();
            self.spawn_history_save(entries.clone());
            self.publish_json(TOPIC_HISTORY, false, &entries).await;
            self.history_tx.send_replace(entries);
        }
    }

    fn spawn_settings_save(&self, reason: &'static str) {
        let store = self.store.clone();
        let settings = self.engine.settings().clone();
        let failed = self.save_failed_tx.clone();
        tokio::spawn(async move {
            match store.save_settings(&settings).await {
                Ok(()) => debug!("settings saved ({reason})"),
                Err(err) => {
                    warn!("failed to persist settings ({reason}): {err:#}");
                    let _ = failed.send(reason);
                }
            }
        });
    }

    fn spawn_history_save(&self, entries: Vec<HistoryEntry>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.save_history(&entries).await {
                warn!("failed to persist history: {err:#}");
            }
        });
    }

    async fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, retain: bool, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => {
                if let Err(err) = self
                    .mqtt
                    .publish(topic, QoS::AtLeastOnce, retain, body)
                    .await
                {
                    warn!("{topic} publish failed: {err}");
                }
            }
            Err(err) => warn!("{topic} serialization failed: {err}"),
        }
    }
}

async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    let _ = shutdown.send(true);
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use greenhouse_common::{Equipment, TOPIC_CMD_FILL, TOPIC_CMD_HYDRO};

    use super::*;

    fn router(depth: usize) -> (
        InboundRouter,
        mpsc::Receiver<RemoteCommand>,
        watch::Receiver<SensorSample>,
    ) {
        let (commands, command_rx) = mpsc::channel(depth);
        let (sensors, sensor_rx) = watch::channel(SensorSample::default());
        (InboundRouter { commands, sensors }, command_rx, sensor_rx)
    }

    #[test]
    fn env_overrides_replace_stored_network() {
        let vars: HashMap<&str, &str> = [
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "8883"),
            ("CONTROLLER_HTTP_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let network = network_from_env(NetworkConfig::default(), |key| {
            vars.get(key).map(|value| value.to_string())
        });
        assert_eq!(network.mqtt_host, "broker.local");
        assert_eq!(network.mqtt_port, 8883);
        assert_eq!(network.http_port, 8080);
        assert!(network.mqtt_user.is_empty());
    }

    #[test]
    fn snapshot_lands_in_sensor_slot() {
        let (router, _commands, sensors) = router(4);
        router
            .handle(
                TOPIC_SENSOR_SNAPSHOT,
                br#"{"avgTemp":21.5,"avgHumidity":60.0,"level":null}"#,
            )
            .unwrap();

        let sample = *sensors.borrow();
        assert_eq!(sample.snapshot.avg_temp, 21.5);
        assert!(sample.snapshot.level.is_nan());
        assert!(sample.received.is_some());
    }

    #[test]
    fn commands_are_queued() {
        let (router, mut commands, _sensors) = router(4);
        router.handle(TOPIC_CMD_FILL, b"on").unwrap();
        router.handle(TOPIC_CMD_HYDRO, b"").unwrap();

        assert_eq!(
            commands.try_recv().unwrap(),
            RemoteCommand::SetEquipment {
                equipment: Equipment::Fill,
                on: true
            }
        );
        assert_eq!(commands.try_recv().unwrap(), RemoteCommand::ToggleHydroMix);
    }

    #[test]
    fn bad_payloads_are_errors_not_panics() {
        let (router, mut commands, _sensors) = router(4);
        assert!(router.handle(TOPIC_SENSOR_SNAPSHOT, b"not json").is_err());
        assert!(router.handle("greenhouse/cmd/unknown", b"{}").is_err());
        assert!(router.handle(TOPIC_SET_SETTINGS, b"[1,2]").is_err());
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn oversized_payload_is_dropped() {
        let (router, mut commands, _sensors) = router(4);
        let payload = vec![b' '; MAX_MQTT_PAYLOAD_BYTES + 1];
        assert!(router.handle(TOPIC_SET_SETTINGS, &payload).is_ok());
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn full_queue_reports_error() {
        let (router, _commands, _sensors) = router(1);
        router.handle(TOPIC_CMD_HYDRO, b"").unwrap();
        assert!(router.handle(TOPIC_CMD_HYDRO, b"").is_err());
    }
}
