//! Irrigation pump scheduling.
//!
//! Pump-driving activities in priority order: override (pump off) > forced >
//! morning sequence > auto or manual, selected by the configured mode. All
//! cycle timing uses persisted unix checkpoints so a restart can pick it up;
//! only the check cadences run on the monotonic clock.

use crate::{
    clock::{MonoMs, TickTime, UnixTime},
    config::{ForcedState, LevelSettings, MorningState, WateringSettings},
    types::{SubstrateReading, WateringMode},
};

/// Sensor inputs the watering controller reads.
#[derive(Debug, Clone, Copy)]
pub struct WateringInput {
    pub irradiance: f32,
    pub level: f32,
    pub substrate: SubstrateReading,
}

#[derive(Debug, Clone, Copy)]
pub struct WateringTuning {
    pub manual_check_interval_ms: u64,
    pub morning_start_grace_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WateringOutputs {
    pub pump: bool,
    pub fill_valve: bool,
    pub three_way_valve: bool,
}

/// Relay states implied by the persisted watering state.
pub fn outputs(cfg: &WateringSettings) -> WateringOutputs {
    if cfg.override_active {
        return WateringOutputs::default();
    }

    let forced = &cfg.forced;
    if forced.active {
        return WateringOutputs {
            pump: forced_pump(forced),
            fill_valve: forced.fill_active,
            three_way_valve: forced.mix_active,
        };
    }

    WateringOutputs {
        pump: cfg.pump_on || (cfg.morning.active && cfg.morning.pulse_on),
        fill_valve: false,
        three_way_valve: false,
    }
}

// The pump runs during a forced cycle unless the tank is filling without a mix.
fn forced_pump(forced: &ForcedState) -> bool {
    forced.mix_active || !forced.fill_active
}

/// State transitions from one step, as save reasons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WateringReport {
    pub events: Vec<&'static str>,
    /// A forced cycle or one of its sub-phases started or ended.
    pub forced_transition: bool,
}

impl WateringReport {
    fn note(&mut self, event: &'static str) {
        self.events.push(event);
    }

    fn note_forced(&mut self, event: &'static str) {
        self.events.push(event);
        self.forced_transition = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedKind {
    /// Plain forced watering for the configured forced duration.
    Pump,
    /// Solution mix: pump plus three-way valve.
    Mix,
    /// Tank fill until the level reaches the configured maximum.
    Fill,
}

fn count_cycle(cfg: &mut WateringSettings) {
    cfg.cycle_count = cfg.cycle_count.saturating_add(1).min(cfg.max_cycles);
}

/// Records a completed or started cycle in every cross-mode checkpoint.
fn credit_cycle(cfg: &mut WateringSettings, now: UnixTime) {
    cfg.last_watering_start = now;
    cfg.last_manual_watering = now;
    cfg.rad_sum = 0.0;
    cfg.last_sun = now;
    count_cycle(cfg);
}

fn begin_cycle(cfg: &mut WateringSettings, now: UnixTime) {
    credit_cycle(cfg, now);
    cfg.pump_on = true;
}

fn level_at_least(level: f32, min: f32) -> bool {
    level.is_finite() && level >= min
}

/// Resets daily counters when the calendar day changes. Radiation is kept.
pub fn roll_over_day(cfg: &mut WateringSettings, day: i32) -> bool {
    if cfg.last_reset_day == day {
        return false;
    }
    cfg.cycle_count = 0;
    cfg.morning = MorningState::default();
    cfg.last_reset_day = day;
    true
}

/// Integrates irradiance over one check period. Returns true on a no-sun reset.
fn accumulate_radiation(cfg: &mut WateringSettings, irradiance: f32, now: UnixTime) -> bool {
    if irradiance.is_finite() && irradiance > 0.0 {
        cfg.rad_sum += irradiance * (cfg.rad_check_interval_ms as f32 / 1_000.0);
        cfg.last_sun = now;
        return false;
    }
    if now.has_elapsed(cfg.last_sun, cfg.rad_reset_interval_ms) {
        let had_sum = cfg.rad_sum > 0.0;
        cfg.rad_sum = 0.0;
        cfg.last_sun = now;
        return had_sum;
    }
    false
}

fn auto_trigger(
    cfg: &WateringSettings,
    level_cfg: &LevelSettings,
    input: &WateringInput,
    now: &TickTime,
) -> Option<&'static str> {
    if cfg.pump_on
        || !cfg.in_window(now.local.minute_of_day())
        || !level_at_least(input.level, level_cfg.pump_min_level)
        || cfg.cycle_count >= cfg.max_cycles
        || !now.unix.has_elapsed(cfg.last_watering_start, cfg.min_interval_ms)
    {
        return None;
    }

    let substrate = &input.substrate;
    if !(substrate.ec < cfg.substrate_max_ec) {
        return None;
    }
    if substrate.humidity < cfg.substrate_critical_humidity {
        return Some("auto_watering_critical_humidity");
    }
    if !(substrate.humidity > cfg.substrate_min_humidity) {
        return None;
    }

    if cfg.rad_sum >= cfg.rad_threshold_joules() {
        Some("auto_watering_started")
    } else if now.unix.has_elapsed(cfg.last_watering_start, cfg.max_interval_ms) {
        Some("auto_watering_by_max_interval")
    } else {
        None
    }
}

fn stop_after(cfg: &mut WateringSettings, run_ms: u64, now: UnixTime) -> bool {
    if cfg.pump_on && now.has_elapsed(cfg.last_watering_start, run_ms) {
        cfg.pump_on = false;
        return true;
    }
    false
}

/// Ends the morning sequence.
///
/// With `chain_level` set, an auto cycle follows immediately when radiation
/// and spacing allow it; otherwise the last-watering checkpoints are aligned to
/// the last morning pulse.
pub(crate) fn complete_morning(
    cfg: &mut WateringSettings,
    level_cfg: &LevelSettings,
    chain_level: Option<f32>,
    now: UnixTime,
) -> bool {
    let last_pulse = cfg.morning.last_start;
    cfg.morning.active = false;
    cfg.morning.pulse_on = false;
    cfg.morning.last_end = now;

    let chain = chain_level.is_some_and(|level| {
        cfg.mode == WateringMode::Auto
            && cfg.rad_sum >= cfg.rad_threshold_joules()
            && now.has_elapsed(cfg.last_watering_start, cfg.min_interval_ms)
            && cfg.cycle_count < cfg.max_cycles
            && level_at_least(level, level_cfg.pump_min_level)
    });

    if chain {
        begin_cycle(cfg, now);
    } else if last_pulse.is_set() {
        cfg.last_watering_start = last_pulse;
        cfg.last_manual_watering = last_pulse;
    }
    chain
}

/// Start of the morning sequence, in seconds of the local day.
pub(crate) fn morning_start_seconds(cfg: &WateringSettings) -> u32 {
    cfg.start_minute_of_day() * 60
}

/// Latest local time at which a morning sequence can still be running.
pub(crate) fn morning_end_seconds(cfg: &WateringSettings, grace_ms: u64) -> u64 {
    let span_ms = grace_ms
        .saturating_add(u64::from(cfg.morning_count).saturating_mul(cfg.morning_interval_ms))
        .saturating_add(cfg.morning_duration_ms);
    u64::from(morning_start_seconds(cfg)) + span_ms / 1_000
}

/// Opens a forced cycle, or adds a sub-phase to one that is already running.
pub fn start_forced(cfg: &mut WateringSettings, kind: ForcedKind, now: UnixTime) {
    if cfg.forced.active {
        let forced = &mut cfg.forced;
        match kind {
            ForcedKind::Pump => forced.end = forced.end.max(now.plus_ms(cfg.forced_duration_ms)),
            ForcedKind::Mix => {
                forced.mix_active = true;
                forced.mix_start = now;
            }
            ForcedKind::Fill => forced.fill_active = true,
        }
        return;
    }

    let duration_ms = match kind {
        ForcedKind::Pump => cfg.forced_duration_ms,
        ForcedKind::Mix => cfg.mix_duration_ms,
        ForcedKind::Fill => 0,
    };
    let previous_mode = match cfg.mode {
        WateringMode::Forced => WateringMode::Off,
        mode => mode,
    };

    cfg.forced = ForcedState {
        active: true,
        started: now,
        end: now.plus_ms(duration_ms),
        performed: false,
        previous_mode,
        mix_active: kind == ForcedKind::Mix,
        mix_start: if kind == ForcedKind::Mix {
            now
        } else {
            UnixTime::UNSET
        },
        fill_active: kind == ForcedKind::Fill,
    };
    cfg.mode = WateringMode::Forced;
    cfg.pump_on = false;
}

/// Leaves forced mode.
///
/// When the pump actually ran, the cycle counts as a normal watering for the
/// restored mode and for an overlapping morning sequence. A cycle that never
/// ran the pump parks the controller in `Off` unless `restore` is set.
pub(crate) fn finish_forced(cfg: &mut WateringSettings, now: UnixTime, restore: bool) {
    let forced = std::mem::take(&mut cfg.forced);
    cfg.pump_on = false;

    if !forced.performed {
        cfg.mode = if restore {
            forced.previous_mode
        } else {
            WateringMode::Off
        };
        return;
    }

    cfg.mode = forced.previous_mode;
    credit_cycle(cfg, now);

    if cfg.morning.active {
        let morning = &mut cfg.morning;
        if morning.pulse_on {
            morning.pulse_on = false;
        } else {
            morning.current_pulse += 1;
        }
        morning.last_start = now;
        morning.last_end = now;
        if morning.current_pulse >= cfg.morning_count {
            morning.active = false;
        }
    }
}

/// Stops a forced cycle on operator request; the previous mode always returns.
pub fn cancel_forced(cfg: &mut WateringSettings, now: UnixTime) -> bool {
    if !cfg.forced.active {
        return false;
    }
    finish_forced(cfg, now, true);
    true
}

/// Hydro-mix toggle: starts a mix cycle, or cancels the running forced cycle.
pub fn toggle_mix(cfg: &mut WateringSettings, now: UnixTime) -> bool {
    if cancel_forced(cfg, now) {
        return false;
    }
    start_forced(cfg, ForcedKind::Mix, now);
    true
}

pub fn set_override(cfg: &mut WateringSettings, on: bool) {
    cfg.override_active = on;
    if on {
        cfg.pump_on = false;
    }
}

pub(crate) fn forced_ended(forced: &ForcedState, now: UnixTime) -> bool {
    // A clock that went backwards past the start ends the cycle.
    now >= forced.end || now < forced.started
}

/// Resolves mix timeout and fill completion. Returns (mix_done, fill_done).
pub(crate) fn settle_forced_phases(
    cfg: &mut WateringSettings,
    level_cfg: &LevelSettings,
    level: f32,
    now: UnixTime,
) -> (bool, bool) {
    let mix_ms = cfg.mix_duration_ms;
    let forced = &mut cfg.forced;
    let mix_done = forced.mix_active && now.has_elapsed(forced.mix_start, mix_ms);
    if mix_done {
        forced.mix_active = false;
    }
    // An unreadable level keeps the fill open until a real reading arrives.
    let fill_done = forced.fill_active && level.is_finite() && level >= level_cfg.max_level;
    if fill_done {
        forced.fill_active = false;
    }
    (mix_done, fill_done)
}

fn step_forced(
    cfg: &mut WateringSettings,
    level_cfg: &LevelSettings,
    level: f32,
    now: UnixTime,
    report: &mut WateringReport,
) {
    let (mix_done, fill_done) = settle_forced_phases(cfg, level_cfg, level, now);
    if mix_done {
        report.note_forced("hydro_mix_finished");
    }
    if fill_done {
        report.note_forced("tank_fill_finished");
    }

    if !cfg.override_active && forced_pump(&cfg.forced) {
        cfg.forced.performed = true;
    }

    let forced = &cfg.forced;
    if forced_ended(forced, now) && !forced.mix_active && !forced.fill_active {
        finish_forced(cfg, now, false);
        report.note_forced("forced_watering_ended");
    }
}

#[derive(Debug, Clone, Default)]
pub struct WateringController {
    last_rad_check: Option<MonoMs>,
    last_manual_check: Option<MonoMs>,
}

impl WateringController {
    fn radiation_check_due(&mut self, interval_ms: u64, now: MonoMs) -> bool {
        match self.last_rad_check {
            None => {
                self.last_rad_check = Some(now);
                false
            }
            Some(last) if now.elapsed_since(last) >= interval_ms => {
                self.last_rad_check = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    fn manual_check_due(&mut self, interval_ms: u64, now: MonoMs) -> bool {
        let due = self
            .last_manual_check
            .map(|last| now.elapsed_since(last) >= interval_ms)
            .unwrap_or(true);
        if due {
            self.last_manual_check = Some(now);
        }
        due
    }

    pub fn step(
        &mut self,
        cfg: &mut WateringSettings,
        level_cfg: &LevelSettings,
        input: &WateringInput,
        now: &TickTime,
        tuning: &WateringTuning,
    ) -> WateringReport {
        let mut report = WateringReport::default();

        if roll_over_day(cfg, now.local.day) {
            report.note("new_day_reset");
        }

        let check_due = self.radiation_check_due(cfg.rad_check_interval_ms, now.mono);
        if check_due && accumulate_radiation(cfg, input.irradiance, now.unix) {
            report.note("rad_sum_reset");
        }

        if cfg.forced.active {
            step_forced(cfg, level_cfg, input.level, now.unix, &mut report);
        }

        if cfg.override_active {
            if cfg.pump_on {
                cfg.pump_on = false;
                report.note("pump_override");
            }
            return report;
        }
        if cfg.forced.active {
            return report;
        }

        self.step_morning(cfg, level_cfg, input, now, tuning, &mut report);
        if cfg.morning.active {
            return report;
        }

        match cfg.mode {
            WateringMode::Auto => {
                if check_due {
                    if let Some(reason) = auto_trigger(cfg, level_cfg, input, now) {
                        begin_cycle(cfg, now.unix);
                        report.note(reason);
                    }
                }
                if stop_after(cfg, cfg.pump_time_ms, now.unix) {
                    report.note("auto_watering_ended");
                }
            }
            WateringMode::Manual => {
                if self.manual_check_due(tuning.manual_check_interval_ms, now.mono)
                    && !cfg.pump_on
                    && cfg.in_window(now.local.minute_of_day())
                    && now
                        .unix
                        .has_elapsed(cfg.last_manual_watering, cfg.manual_interval_ms)
                    && level_at_least(input.level, level_cfg.manual_min_level)
                {
                    begin_cycle(cfg, now.unix);
                    report.note("manual_watering_started");
                }
                if stop_after(cfg, cfg.manual_duration_ms, now.unix) {
                    report.note("manual_watering_ended");
                }
            }
            WateringMode::Forced | WateringMode::Off => {
                if cfg.pump_on {
                    cfg.pump_on = false;
                    report.note("watering_off");
                }
            }
        }

        report
    }

    fn step_morning(
        &mut self,
        cfg: &mut WateringSettings,
        level_cfg: &LevelSettings,
        input: &WateringInput,
        now: &TickTime,
        tuning: &WateringTuning,
        report: &mut WateringReport,
    ) {
        if !cfg.morning.active {
            if cfg.morning.started_today || cfg.morning_count == 0 {
                return;
            }
            let start = u64::from(morning_start_seconds(cfg));
            let grace = tuning.morning_start_grace_ms / 1_000;
            let seconds = u64::from(now.local.seconds_of_day());
            if seconds >= start && seconds < start.saturating_add(grace) {
                cfg.pump_on = false;
                cfg.morning = MorningState {
                    started_today: true,
                    active: true,
                    current_pulse: 1,
                    pulse_on: true,
                    last_start: now.unix,
                    last_end: UnixTime::UNSET,
                };
                count_cycle(cfg);
                report.note("morning_started");
            }
            return;
        }

        if cfg.morning.pulse_on {
            if !now
                .unix
                .has_elapsed(cfg.morning.last_start, cfg.morning_duration_ms)
            {
                return;
            }
            cfg.morning.pulse_on = false;
            cfg.morning.last_end = now.unix;
            report.note("morning_pulse_ended");
        }

        if cfg.morning.current_pulse >= cfg.morning_count {
            let chained = complete_morning(cfg, level_cfg, Some(input.level), now.unix);
            report.note(if chained {
                "auto_watering_after_morning"
            } else {
                "morning_complete"
            });
        } else if now
            .unix
            .has_elapsed(cfg.morning.last_start, cfg.morning_interval_ms)
        {
            let morning = &mut cfg.morning;
            morning.pulse_on = true;
            morning.current_pulse += 1;
            morning.last_start = now.unix;
            count_cycle(cfg);
            report.note("morning_pulse_started");
        }
    }
}
