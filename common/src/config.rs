use serde::{Deserialize, Serialize};

use crate::{
    clock::UnixTime,
    settings_table,
    types::{FogMode, WateringMode},
};

/// Engine tuning that is not exposed to remote configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub tick_interval_ms: u64,
    pub sensor_stale_timeout_ms: u64,
    pub relay_min_change_interval_ms: u64,
    pub window_min_reissue_ms: u64,
    pub window_temp_hysteresis: f32,
    pub window_humidity_hysteresis: f32,
    pub window_extra_close_ms: u64,
    pub fog_settle_ms: u64,
    pub manual_check_interval_ms: u64,
    pub morning_start_grace_ms: u64,
    pub telemetry_interval_ms: u64,
    pub history_sample_interval_ms: u64,
    pub history_flush_min_interval_ms: u64,
    pub settings_save_cooldown_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            sensor_stale_timeout_ms: 60_000,
            relay_min_change_interval_ms: 5_000,
            window_min_reissue_ms: 30_000,
            window_temp_hysteresis: 0.2,
            window_humidity_hysteresis: 2.0,
            window_extra_close_ms: 5_000,
            fog_settle_ms: 50,
            manual_check_interval_ms: 60_000,
            morning_start_grace_ms: 600_000,
            telemetry_interval_ms: 5_000,
            history_sample_interval_ms: 180_000,
            history_flush_min_interval_ms: 60_000,
            settings_save_cooldown_ms: 5_000,
        }
    }
}

impl ControllerConfig {
    pub const MAX_MORNING_START_GRACE_MS: u64 = 3_600_000;

    /// Pulls hand-edited tuning back into workable ranges.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.tick_interval_ms = self.tick_interval_ms.max(100);
        self.sensor_stale_timeout_ms = self.sensor_stale_timeout_ms.max(self.tick_interval_ms);
        self.morning_start_grace_ms = self
            .morning_start_grace_ms
            .min(Self::MAX_MORNING_START_GRACE_MS);
        if !self.window_temp_hysteresis.is_finite() || self.window_temp_hysteresis < 0.0 {
            self.window_temp_hysteresis = defaults.window_temp_hysteresis;
        }
        if !self.window_humidity_hysteresis.is_finite() || self.window_humidity_hysteresis < 0.0 {
            self.window_humidity_hysteresis = defaults.window_humidity_hysteresis;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClimateSettings {
    pub min_temp: f32,
    pub max_temp: f32,
    pub min_humidity: f32,
    pub max_humidity: f32,
}

impl Default for ClimateSettings {
    fn default() -> Self {
        Self {
            min_temp: 18.0,
            max_temp: 25.0,
            min_humidity: 50.0,
            max_humidity: 70.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowSettings {
    pub open_time_ms: u64,
    pub close_time_ms: u64,
    pub manual: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            open_time_ms: 156_000,
            close_time_ms: 156_000,
            manual: false,
        }
    }
}

/// On/off thresholds plus manual override for one hysteresis-driven relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThresholdSettings {
    pub on_threshold: f32,
    pub off_threshold: f32,
    pub manual: bool,
    pub state: bool,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            on_threshold: 18.0,
            off_threshold: 20.0,
            manual: false,
            state: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanSettings {
    pub interval_ms: u64,
    pub duration_ms: u64,
    pub manual: bool,
    pub state: bool,
}

impl Default for FanSettings {
    fn default() -> Self {
        Self {
            interval_ms: 3_600_000,
            duration_ms: 300_000,
            manual: false,
            state: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FogSettings {
    pub mode: FogMode,
    pub force_on: bool,
    pub state: bool,

    pub morning_start: u8,
    pub morning_end: u8,
    pub day_start: u8,
    pub day_end: u8,

    pub morning_duration_ms: u64,
    pub morning_interval_ms: u64,
    pub day_duration_ms: u64,
    pub day_interval_ms: u64,
    /// Valve-open to pump-on ignition delay.
    pub delay_ms: u64,

    pub min_humidity: f32,
    pub max_humidity: f32,
    pub min_temp: f32,
    pub max_temp: f32,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            mode: FogMode::Auto,
            force_on: false,
            state: false,
            morning_start: 6,
            morning_end: 12,
            day_start: 12,
            day_end: 18,
            morning_duration_ms: 5_000,
            morning_interval_ms: 300_000,
            day_duration_ms: 3_000,
            day_interval_ms: 180_000,
            delay_ms: 2_000,
            min_humidity: 50.0,
            max_humidity: 80.0,
            min_temp: 15.0,
            max_temp: 30.0,
            min_duration_ms: 2_000,
            max_duration_ms: 10_000,
            min_interval_ms: 60_000,
            max_interval_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LevelSettings {
    /// Solution heating is inhibited at or below this level.
    pub min_level: f32,
    /// Tank fill stops at this level.
    pub max_level: f32,
    pub pump_min_level: f32,
    pub manual_min_level: f32,
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            min_level: 20.0,
            max_level: 80.0,
            pump_min_level: 2.0,
            manual_min_level: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MorningState {
    pub started_today: bool,
    pub active: bool,
    /// 1-based index of the latest pulse started in this sequence.
    pub current_pulse: u32,
    pub pulse_on: bool,
    pub last_start: UnixTime,
    pub last_end: UnixTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForcedState {
    pub active: bool,
    pub started: UnixTime,
    pub end: UnixTime,
    /// The pump actually ran during this forced cycle.
    pub performed: bool,
    pub previous_mode: WateringMode,
    pub mix_active: bool,
    pub mix_start: UnixTime,
    pub fill_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WateringSettings {
    pub mode: WateringMode,

    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,

    pub max_cycles: u32,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub pump_time_ms: u64,

    /// Accumulated radiation needed to trigger an auto cycle, in MJ/m².
    pub rad_threshold: f32,
    pub rad_check_interval_ms: u64,
    pub rad_reset_interval_ms: u64,

    pub manual_interval_ms: u64,
    pub manual_duration_ms: u64,

    pub morning_count: u32,
    pub morning_interval_ms: u64,
    pub morning_duration_ms: u64,

    pub forced_duration_ms: u64,
    pub mix_duration_ms: u64,

    pub substrate_min_humidity: f32,
    pub substrate_max_ec: f32,
    pub substrate_critical_humidity: f32,

    // Live state below; persisted so a restart can reconstruct it.
    pub pump_on: bool,
    /// Accumulated radiation in J/m².
    pub rad_sum: f32,
    pub cycle_count: u32,
    pub last_watering_start: UnixTime,
    pub last_manual_watering: UnixTime,
    pub last_sun: UnixTime,
    pub last_reset_day: i32,
    pub override_active: bool,
    pub morning: MorningState,
    pub forced: ForcedState,
}

impl Default for WateringSettings {
    fn default() -> Self {
        Self {
            mode: WateringMode::Auto,
            start_hour: 6,
            start_minute: 0,
            end_hour: 18,
            end_minute: 0,
            max_cycles: 10,
            min_interval_ms: 1_800_000,
            max_interval_ms: 7_200_000,
            pump_time_ms: 30_000,
            rad_threshold: 1.5,
            rad_check_interval_ms: 60_000,
            rad_reset_interval_ms: 3_600_000,
            manual_interval_ms: 3_600_000,
            manual_duration_ms: 30_000,
            morning_count: 3,
            morning_interval_ms: 600_000,
            morning_duration_ms: 30_000,
            forced_duration_ms: 60_000,
            mix_duration_ms: 300_000,
            substrate_min_humidity: 50.0,
            substrate_max_ec: 2.5,
            substrate_critical_humidity: 30.0,
            pump_on: false,
            rad_sum: 0.0,
            cycle_count: 0,
            last_watering_start: UnixTime::UNSET,
            last_manual_watering: UnixTime::UNSET,
            last_sun: UnixTime::UNSET,
            last_reset_day: 0,
            override_active: false,
            morning: MorningState::default(),
            forced: ForcedState::default(),
        }
    }
}

impl WateringSettings {
    pub fn start_minute_of_day(&self) -> u32 {
        u32::from(self.start_hour) * 60 + u32::from(self.start_minute)
    }

    pub fn end_minute_of_day(&self) -> u32 {
        u32::from(self.end_hour) * 60 + u32::from(self.end_minute)
    }

    pub fn in_window(&self, minute_of_day: u32) -> bool {
        minute_of_day >= self.start_minute_of_day() && minute_of_day < self.end_minute_of_day()
    }

    /// Radiation threshold converted to J/m².
    pub fn rad_threshold_joules(&self) -> f32 {
        self.rad_threshold * 1e6
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub wind_low: f32,
    pub wind_high: f32,
    pub wind_lock_minutes: u32,
    pub night_start: u8,
    pub day_start: u8,
    /// Added to heating/solution thresholds and window temperature bounds at night.
    pub night_offset: f32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            wind_low: 5.0,
            wind_high: 10.0,
            wind_lock_minutes: 30,
            night_start: 20,
            day_start: 6,
            night_offset: -2.0,
        }
    }
}

impl GeneralSettings {
    pub fn is_night(&self, hour: u8) -> bool {
        hour < self.day_start || hour >= self.night_start
    }

    pub fn threshold_shift(&self, hour: u8) -> f32 {
        if self.is_night(hour) {
            self.night_offset
        } else {
            0.0
        }
    }
}

/// Tunables and live state for every subsystem, persisted as one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub climate: ClimateSettings,
    pub window: WindowSettings,
    pub heating: ThresholdSettings,
    pub fan: FanSettings,
    pub fog: FogSettings,
    pub solution: ThresholdSettings,
    pub level: LevelSettings,
    pub watering: WateringSettings,
    pub general: GeneralSettings,
}

impl Settings {
    /// Clamps every remotely tunable value into its accepted range.
    pub fn sanitize(&mut self) {
        settings_table::clamp_all(self);
        let cycles = self.watering.max_cycles;
        self.watering.cycle_count = self.watering.cycle_count.min(cycles);
        if !self.watering.rad_sum.is_finite() || self.watering.rad_sum < 0.0 {
            self.watering.rad_sum = 0.0;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    pub timezone: String,
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            timezone: "Europe/Kyiv".to_string(),
            network: NetworkConfig::default(),
        }
    }
}
