//! Remote configuration: a static table of named, range-checked settings
//! and one generic routine that validates and writes them.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    config::Settings,
    error::SettingError,
    types::{FogMode, WateringMode},
};

/// Mutable view of one settings slot.
pub enum FieldRef<'a> {
    F32(&'a mut f32),
    U8(&'a mut u8),
    U32(&'a mut u32),
    U64(&'a mut u64),
    FogMode(&'a mut FogMode),
    WateringMode(&'a mut WateringMode),
}

pub struct SettingField {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub access: fn(&mut Settings) -> FieldRef<'_>,
}

macro_rules! field {
    ($name:literal, $variant:ident, $min:expr, $max:expr, |$s:ident| $place:expr) => {
        SettingField {
            name: $name,
            min: $min,
            max: $max,
            access: {
                fn access($s: &mut Settings) -> FieldRef<'_> {
                    FieldRef::$variant(&mut $place)
                }
                access
            },
        }
    };
}

// While a forced cycle runs, the configured mode lives in `previous_mode`
// and is restored when the cycle exits.
fn watering_mode_slot(settings: &mut Settings) -> FieldRef<'_> {
    let watering = &mut settings.watering;
    if watering.forced.active {
        FieldRef::WateringMode(&mut watering.forced.previous_mode)
    } else {
        FieldRef::WateringMode(&mut watering.mode)
    }
}

pub static SETTING_FIELDS: &[SettingField] = &[
    field!("minTemp", F32, -20.0, 50.0, |s| s.climate.min_temp),
    field!("maxTemp", F32, -20.0, 50.0, |s| s.climate.max_temp),
    field!("minHum", F32, 0.0, 100.0, |s| s.climate.min_humidity),
    field!("maxHum", F32, 0.0, 100.0, |s| s.climate.max_humidity),
    field!("openTime", U64, 1_000.0, 300_000.0, |s| s.window.open_time_ms),
    field!("closeTime", U64, 1_000.0, 300_000.0, |s| s.window.close_time_ms),
    field!("wind1", F32, 0.0, 50.0, |s| s.general.wind_low),
    field!("wind2", F32, 0.0, 50.0, |s| s.general.wind_high),
    field!("windLockMinutes", U32, 0.0, 1_440.0, |s| s.general.wind_lock_minutes),
    field!("nightStart", U8, 0.0, 23.0, |s| s.general.night_start),
    field!("dayStart", U8, 0.0, 23.0, |s| s.general.day_start),
    field!("nightOffset", F32, -10.0, 10.0, |s| s.general.night_offset),
    field!("heatOn", F32, -20.0, 50.0, |s| s.heating.on_threshold),
    field!("heatOff", F32, -20.0, 50.0, |s| s.heating.off_threshold),
    field!("solOn", F32, -20.0, 50.0, |s| s.solution.on_threshold),
    field!("solOff", F32, -20.0, 50.0, |s| s.solution.off_threshold),
    field!("fanInterval", U64, 60_000.0, 86_400_000.0, |s| s.fan.interval_ms),
    field!("fanDuration", U64, 1_000.0, 3_600_000.0, |s| s.fan.duration_ms),
    field!("fogMode", FogMode, 0.0, 2.0, |s| s.fog.mode),
    field!("fogMorningStart", U8, 0.0, 23.0, |s| s.fog.morning_start),
    field!("fogMorningEnd", U8, 0.0, 23.0, |s| s.fog.morning_end),
    field!("autoFogDayStart", U8, 0.0, 23.0, |s| s.fog.day_start),
    field!("autoFogDayEnd", U8, 0.0, 23.0, |s| s.fog.day_end),
    field!("fogMorningDuration", U64, 1_000.0, 60_000.0, |s| s.fog.morning_duration_ms),
    field!("fogMorningInterval", U64, 10_000.0, 3_600_000.0, |s| s.fog.morning_interval_ms),
    field!("fogDayDuration", U64, 1_000.0, 60_000.0, |s| s.fog.day_duration_ms),
    field!("fogDayInterval", U64, 10_000.0, 3_600_000.0, |s| s.fog.day_interval_ms),
    field!("fogDelay", U64, 0.0, 10_000.0, |s| s.fog.delay_ms),
    field!("fogMinHum", F32, 0.0, 100.0, |s| s.fog.min_humidity),
    field!("fogMaxHum", F32, 0.0, 100.0, |s| s.fog.max_humidity),
    field!("fogMinTemp", F32, -20.0, 50.0, |s| s.fog.min_temp),
    field!("fogMaxTemp", F32, -20.0, 50.0, |s| s.fog.max_temp),
    field!("fogMinDuration", U64, 1_000.0, 60_000.0, |s| s.fog.min_duration_ms),
    field!("fogMaxDuration", U64, 1_000.0, 60_000.0, |s| s.fog.max_duration_ms),
    field!("fogMinInterval", U64, 10_000.0, 7_200_000.0, |s| s.fog.min_interval_ms),
    field!("fogMaxInterval", U64, 10_000.0, 7_200_000.0, |s| s.fog.max_interval_ms),
    field!("minLevel", F32, 0.0, 100.0, |s| s.level.min_level),
    field!("maxLevel", F32, 0.0, 100.0, |s| s.level.max_level),
    field!("pumpMinLevel", F32, 0.0, 100.0, |s| s.level.pump_min_level),
    field!("manualMinLevel", F32, 0.0, 100.0, |s| s.level.manual_min_level),
    SettingField {
        name: "wateringMode",
        min: 0.0,
        max: 3.0,
        access: watering_mode_slot,
    },
    field!("wateringStartHour", U8, 0.0, 23.0, |s| s.watering.start_hour),
    field!("wateringStartMinute", U8, 0.0, 59.0, |s| s.watering.start_minute),
    field!("wateringEndHour", U8, 0.0, 23.0, |s| s.watering.end_hour),
    field!("wateringEndMinute", U8, 0.0, 59.0, |s| s.watering.end_minute),
    field!("maxWateringCycles", U32, 1.0, 50.0, |s| s.watering.max_cycles),
    field!("minWateringInterval", U64, 60_000.0, 86_400_000.0, |s| s.watering.min_interval_ms),
    field!("maxWateringInterval", U64, 60_000.0, 86_400_000.0, |s| s.watering.max_interval_ms),
    field!("pumpTime", U64, 1_000.0, 600_000.0, |s| s.watering.pump_time_ms),
    field!("radThreshold", F32, 0.0, 100.0, |s| s.watering.rad_threshold),
    field!("radCheckInterval", U64, 10_000.0, 600_000.0, |s| s.watering.rad_check_interval_ms),
    field!("radSumResetInterval", U64, 60_000.0, 86_400_000.0, |s| s.watering.rad_reset_interval_ms),
    field!("manualWateringInterval", U64, 60_000.0, 86_400_000.0, |s| s.watering.manual_interval_ms),
    field!("manualWateringDuration", U64, 1_000.0, 600_000.0, |s| s.watering.manual_duration_ms),
    field!("morningWateringCount", U32, 0.0, 10.0, |s| s.watering.morning_count),
    field!("morningWateringInterval", U64, 60_000.0, 3_600_000.0, |s| s.watering.morning_interval_ms),
    field!("morningWateringDuration", U64, 1_000.0, 600_000.0, |s| s.watering.morning_duration_ms),
    field!("forcedWateringDuration", U64, 1_000.0, 3_600_000.0, |s| s.watering.forced_duration_ms),
    field!("hydroMixDuration", U64, 60_000.0, 1_800_000.0, |s| s.watering.mix_duration_ms),
    field!("matMinHumidity", F32, 0.0, 100.0, |s| s.watering.substrate_min_humidity),
    field!("matMaxEC", F32, 0.0, 10.0, |s| s.watering.substrate_max_ec),
    field!("matCriticalHumidity", F32, 0.0, 100.0, |s| s.watering.substrate_critical_humidity),
];

pub fn find_field(name: &str) -> Option<&'static SettingField> {
    SETTING_FIELDS.iter().find(|field| field.name == name)
}

/// Outcome of a bulk update: every field is judged on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateReport {
    pub applied: Vec<String>,
    pub rejected: BTreeMap<String, String>,
}

impl UpdateReport {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

impl SettingField {
    fn number(&self, value: &Value) -> Result<f64, SettingError> {
        let number = value.as_f64().ok_or(SettingError::WrongType {
            field: self.name,
            expected: "a number",
        })?;
        if !number.is_finite() || number < self.min || number > self.max {
            return Err(SettingError::OutOfRange {
                field: self.name,
                value: number,
                min: self.min,
                max: self.max,
            });
        }
        Ok(number)
    }

    fn integer(&self, value: &Value) -> Result<f64, SettingError> {
        let number = self.number(value)?;
        if number.fract() != 0.0 {
            return Err(SettingError::WrongType {
                field: self.name,
                expected: "an integer",
            });
        }
        Ok(number)
    }

    /// Accepts either the mode index or its lowercase name.
    fn mode<T>(&self, value: &Value, from_index: fn(u8) -> Option<T>) -> Result<T, SettingError>
    where
        T: serde::de::DeserializeOwned,
    {
        if value.is_string() {
            return serde_json::from_value(value.clone()).map_err(|_| SettingError::Unsupported {
                field: self.name,
                value: value.to_string(),
            });
        }
        let index = self.integer(value)? as u8;
        from_index(index).ok_or(SettingError::Unsupported {
            field: self.name,
            value: value.to_string(),
        })
    }

    pub fn write(&self, settings: &mut Settings, value: &Value) -> Result<(), SettingError> {
        match (self.access)(settings) {
            FieldRef::F32(slot) => *slot = self.number(value)? as f32,
            FieldRef::U8(slot) => *slot = self.integer(value)? as u8,
            FieldRef::U32(slot) => *slot = self.integer(value)? as u32,
            FieldRef::U64(slot) => *slot = self.integer(value)? as u64,
            FieldRef::FogMode(slot) => *slot = self.mode(value, FogMode::from_index)?,
            FieldRef::WateringMode(slot) => {
                let mode = self.mode(value, WateringMode::from_index)?;
                // Forced cycles are started by command only.
                if mode == WateringMode::Forced {
                    return Err(SettingError::Unsupported {
                        field: self.name,
                        value: value.to_string(),
                    });
                }
                *slot = mode;
            }
        }
        Ok(())
    }

    fn clamp(&self, settings: &mut Settings) {
        let (min, max) = (self.min, self.max);
        match (self.access)(settings) {
            FieldRef::F32(slot) => {
                *slot = if slot.is_finite() {
                    slot.clamp(min as f32, max as f32)
                } else {
                    min as f32
                };
            }
            FieldRef::U8(slot) => *slot = (*slot).clamp(min as u8, max as u8),
            FieldRef::U32(slot) => *slot = (*slot).clamp(min as u32, max as u32),
            FieldRef::U64(slot) => *slot = (*slot).clamp(min as u64, max as u64),
            FieldRef::FogMode(_) | FieldRef::WateringMode(_) => {}
        }
    }
}

pub fn apply_field(settings: &mut Settings, name: &str, value: &Value) -> Result<(), SettingError> {
    let field = find_field(name).ok_or_else(|| SettingError::UnknownField(name.to_string()))?;
    field.write(settings, value)
}

/// Validates and applies each entry independently; a rejected field never
/// blocks the others.
pub fn apply_update(settings: &mut Settings, updates: &Map<String, Value>) -> UpdateReport {
    let mut report = UpdateReport::default();
    for (name, value) in updates {
        match apply_field(settings, name, value) {
            Ok(()) => report.applied.push(name.clone()),
            Err(err) => {
                report.rejected.insert(name.clone(), err.to_string());
            }
        }
    }
    report
}

pub(crate) fn clamp_all(settings: &mut Settings) {
    for field in SETTING_FIELDS {
        field.clamp(settings);
    }
}
