use serde::{Deserialize, Deserializer, Serialize};

fn nan() -> f32 {
    f32::NAN
}

/// Reads `null` as NaN so an absent reading stays "invalid" on the way in.
pub(crate) fn nan_if_null<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateReading {
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub humidity: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub ec: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub ph: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub temperature: f32,
}

impl Default for SubstrateReading {
    fn default() -> Self {
        Self {
            humidity: f32::NAN,
            ec: f32::NAN,
            ph: f32::NAN,
            temperature: f32::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutdoorReading {
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub temperature: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub humidity: f32,
}

impl Default for OutdoorReading {
    fn default() -> Self {
        Self {
            temperature: f32::NAN,
            humidity: f32::NAN,
        }
    }
}

/// Latest readings from the field bus. Any value may be NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub avg_temp: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub avg_humidity: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub solution_temp: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub level: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub wind_speed: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub irradiance: f32,
    #[serde(default)]
    pub substrate: SubstrateReading,
    #[serde(default)]
    pub outdoor: OutdoorReading,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::invalid()
    }
}

impl SensorSnapshot {
    pub fn invalid() -> Self {
        Self {
            avg_temp: f32::NAN,
            avg_humidity: f32::NAN,
            solution_temp: f32::NAN,
            level: f32::NAN,
            wind_speed: f32::NAN,
            irradiance: f32::NAN,
            substrate: SubstrateReading::default(),
            outdoor: OutdoorReading::default(),
        }
    }

    /// Average temperature and humidity are both usable.
    pub fn climate_valid(&self) -> bool {
        self.avg_temp.is_finite() && self.avg_humidity.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relay {
    Heat,
    Fan,
    FogValve,
    FogPump,
    IrrigationPump,
    FillValve,
    ThreeWayValve,
    SolutionHeat,
}

impl Relay {
    pub const ALL: [Relay; 8] = [
        Relay::Heat,
        Relay::Fan,
        Relay::FogValve,
        Relay::FogPump,
        Relay::IrrigationPump,
        Relay::FillValve,
        Relay::ThreeWayValve,
        Relay::SolutionHeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "heat",
            Self::Fan => "fan",
            Self::FogValve => "fog_valve",
            Self::FogPump => "fog_pump",
            Self::IrrigationPump => "irrigation_pump",
            Self::FillValve => "fill_valve",
            Self::ThreeWayValve => "three_way_valve",
            Self::SolutionHeat => "solution_heat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowDirection {
    Up,
    Down,
}

impl WindowDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// A command for the actuator driver. Re-issuing an unchanged relay state is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    Relay { relay: Relay, on: bool },
    WindowMove { direction: WindowDirection, duration_ms: u64 },
    WindowStop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FogMode {
    #[default]
    Auto,
    Scheduled,
    Forced,
}

impl FogMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Scheduled => "scheduled",
            Self::Forced => "forced",
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Auto),
            1 => Some(Self::Scheduled),
            2 => Some(Self::Forced),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Scheduled => 1,
            Self::Forced => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WateringMode {
    #[default]
    Auto,
    Manual,
    Forced,
    Off,
}

impl WateringMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Forced => "forced",
            Self::Off => "off",
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Auto),
            1 => Some(Self::Manual),
            2 => Some(Self::Forced),
            3 => Some(Self::Off),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Manual => 1,
            Self::Forced => 2,
            Self::Off => 3,
        }
    }
}

pub fn control_mode_str(manual: bool) -> &'static str {
    if manual {
        "manual"
    } else {
        "auto"
    }
}

/// Periodic telemetry snapshot published on the all-sensors topic.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub timestamp: i64,
    pub temperature: f32,
    pub humidity: f32,
    pub solution_temp: f32,
    pub level: f32,
    pub wind_speed: f32,
    pub irradiance: f32,
    pub substrate_humidity: f32,
    pub substrate_ec: f32,
    pub substrate_ph: f32,
    pub substrate_temp: f32,
    pub outdoor_temp: f32,
    pub outdoor_humidity: f32,
    pub sensors_valid: bool,

    pub heat: bool,
    pub heat_mode: &'static str,
    pub fan: bool,
    pub fan_mode: &'static str,
    pub solution_heat: bool,
    pub sol_mode: &'static str,

    pub fog: bool,
    pub fog_mode: &'static str,
    pub fog_phase: &'static str,
    pub fog_valve: bool,
    pub fog_pump: bool,

    pub window_position: u8,
    pub window_moving: bool,
    pub window_mode: &'static str,
    pub wind_restricted: bool,

    pub pump: bool,
    pub watering_mode: &'static str,
    pub fill_valve: bool,
    pub three_way_valve: bool,
    pub hydro_mix: bool,
    pub forced_active: bool,
    pub forced_remaining_s: u64,
    pub pump_override: bool,
    pub rad_sum: f32,
    pub cycle_count: u32,
    pub max_cycles: u32,
    pub morning_active: bool,
    pub morning_pulse: u32,
}
