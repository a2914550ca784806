use std::{f32::consts::PI, time::Duration};

use anyhow::Context;
use chrono::Timelike;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

use greenhouse_common::{
    types::{OutdoorReading, SubstrateReading},
    SensorSnapshot, TOPIC_SENSOR_SNAPSHOT, TOPIC_SENSOR_STATUS,
};

const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 5;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let publish_secs = std::env::var("SENSOR_PUBLISH_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_PUBLISH_INTERVAL_SECS);

    let mut mqtt_options = MqttOptions::new("greenhouse-sensor-rust", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("sensor publisher started, snapshot every {publish_secs}s");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(publish_secs));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        // Stand-in for the Modbus poll of the field bus.
        let seconds_of_day = chrono::Local::now().num_seconds_from_midnight();
        let snapshot = simulate(seconds_of_day, tick);
        let payload =
            serde_json::to_vec(&snapshot).context("failed to serialize sensor snapshot")?;

        mqtt.publish(TOPIC_SENSOR_SNAPSHOT, QoS::AtLeastOnce, false, payload)
            .await
            .context("failed to publish sensor snapshot")?;
        debug!(
            "published snapshot: {:.1} C, {:.0} %, {:.0} W/m2",
            snapshot.avg_temp, snapshot.avg_humidity, snapshot.irradiance
        );
    }
}

/// 0 at night, rising to 1 at solar noon between 06:00 and 18:00.
fn daylight(seconds_of_day: u32) -> f32 {
    let hours = seconds_of_day as f32 / 3600.0;
    if !(6.0..18.0).contains(&hours) {
        return 0.0;
    }
    (PI * (hours - 6.0) / 12.0).sin().max(0.0)
}

fn simulate(seconds_of_day: u32, tick: u64) -> SensorSnapshot {
    let sun = daylight(seconds_of_day);
    let wobble = (tick % 8) as f32 * 0.1;

    SensorSnapshot {
        avg_temp: 17.0 + 9.0 * sun + wobble,
        avg_humidity: 72.0 - 18.0 * sun + wobble * 2.0,
        solution_temp: 19.0 + 2.0 * sun,
        level: 40.0 + (tick % 40) as f32,
        wind_speed: 1.5 + (tick % 5) as f32 * 0.8,
        irradiance: 850.0 * sun,
        substrate: SubstrateReading {
            humidity: 62.0 - 10.0 * sun,
            ec: 1.8,
            ph: 6.1,
            temperature: 18.0 + 4.0 * sun,
        },
        outdoor: OutdoorReading {
            temperature: 10.0 + 8.0 * sun,
            humidity: 80.0 - 20.0 * sun,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn night_has_no_irradiance() {
        let snapshot = simulate(2 * 3600, 1);
        assert_eq!(snapshot.irradiance, 0.0);
        assert!(snapshot.climate_valid());
    }

    #[test]
    fn noon_is_the_daily_peak() {
        let noon = simulate(12 * 3600, 0);
        let morning = simulate(8 * 3600, 0);
        assert!((noon.irradiance - 850.0).abs() < 0.01);
        assert!(morning.irradiance > 0.0 && morning.irradiance < noon.irradiance);
        assert!(noon.avg_temp > morning.avg_temp);
    }

    #[test]
    fn snapshot_serializes_in_wire_shape() {
        let json = serde_json::to_value(simulate(12 * 3600, 0)).unwrap();
        assert!(json.get("avgTemp").is_some());
        assert!(json["substrate"].get("ec").is_some());
    }
}
