//! The tick orchestrator: one deterministic step of every controller.

use crate::{
    climate::{FanTimer, HysteresisLoop, LoopChange},
    clock::{MonoMs, TickTime},
    commands::{Equipment, RemoteCommand, WindowCommand},
    config::{ControllerConfig, Settings},
    fog::{FogController, FogPhase},
    history::{HistoryEntry, HistoryRecorder},
    persist::SaveThrottle,
    recovery::{self, RecoveryReport},
    settings_table::{self, UpdateReport},
    types::{control_mode_str, EngineAction, FogMode, Relay, SensorSnapshot, TelemetryPayload},
    watering::{self, ForcedKind, WateringController, WateringInput, WateringTuning},
    window::{WindMonitor, WindowController, WindowInput, WindowTuning},
};

/// Every relay output as computed at the end of a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutputs {
    pub heat: bool,
    pub fan: bool,
    pub fog_valve: bool,
    pub fog_pump: bool,
    pub pump: bool,
    pub fill_valve: bool,
    pub three_way_valve: bool,
    pub solution_heat: bool,
}

impl RelayOutputs {
    pub fn get(&self, relay: Relay) -> bool {
        match relay {
            Relay::Heat => self.heat,
            Relay::Fan => self.fan,
            Relay::FogValve => self.fog_valve,
            Relay::FogPump => self.fog_pump,
            Relay::IrrigationPump => self.pump,
            Relay::FillValve => self.fill_valve,
            Relay::ThreeWayValve => self.three_way_valve,
            Relay::SolutionHeat => self.solution_heat,
        }
    }
}

#[derive(Debug, Default)]
pub struct TickOutcome {
    pub actions: Vec<EngineAction>,
    /// Reason for a settings write that cleared the save throttle this tick.
    pub save: Option<&'static str>,
    pub publish_telemetry: bool,
    pub publish_settings: bool,
    pub flush_history: bool,
    /// Present on the first tick only.
    pub recovery: Option<RecoveryReport>,
    /// State transitions seen this tick, for logging.
    pub events: Vec<&'static str>,
}

#[derive(Debug, Default)]
struct Pending {
    actions: Vec<EngineAction>,
    settings_changed: bool,
    telemetry_now: bool,
    recovery: Option<RecoveryReport>,
}

pub struct GreenhouseEngine {
    config: ControllerConfig,
    settings: Settings,

    heating: HysteresisLoop,
    solution: HysteresisLoop,
    fan: FanTimer,
    fog: FogController,
    watering: WateringController,
    wind: WindMonitor,
    window: WindowController,
    history: HistoryRecorder,
    throttle: SaveThrottle,

    booted: bool,
    snapshot: SensorSnapshot,
    outputs: Option<RelayOutputs>,
    last_telemetry: Option<MonoMs>,
    pending: Pending,
}

impl GreenhouseEngine {
    pub fn new(
        mut config: ControllerConfig,
        mut settings: Settings,
        history: Vec<HistoryEntry>,
    ) -> Self {
        config.sanitize();
        settings.sanitize();
        let throttle = SaveThrottle::new(config.settings_save_cooldown_ms);
        Self {
            config,
            settings,
            heating: HysteresisLoop::default(),
            solution: HysteresisLoop::default(),
            fan: FanTimer::default(),
            fog: FogController::default(),
            watering: WateringController::default(),
            wind: WindMonitor::default(),
            window: WindowController::default(),
            history: HistoryRecorder::from_entries(history),
            throttle,
            booted: false,
            snapshot: SensorSnapshot::invalid(),
            outputs: None,
            last_telemetry: None,
            pending: Pending::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn window_position(&self) -> u8 {
        self.window.position()
    }

    /// A spawned save failed; write again once the cooldown allows.
    pub fn requeue_save(&mut self, reason: &'static str) {
        self.throttle.requeue(reason);
    }

    /// A settings write is waiting out the save cooldown.
    pub fn save_pending(&self) -> bool {
        self.throttle.is_pending()
    }

    fn window_tuning(&self) -> WindowTuning {
        WindowTuning {
            min_reissue_ms: self.config.window_min_reissue_ms,
            temp_hysteresis: self.config.window_temp_hysteresis,
            humidity_hysteresis: self.config.window_humidity_hysteresis,
            extra_close_ms: self.config.window_extra_close_ms,
        }
    }

    fn watering_tuning(&self) -> WateringTuning {
        WateringTuning {
            manual_check_interval_ms: self.config.manual_check_interval_ms,
            morning_start_grace_ms: self.config.morning_start_grace_ms,
        }
    }

    /// Applies one queued remote command. Returns the per-field report for
    /// settings updates.
    pub fn apply_command(&mut self, command: RemoteCommand, now: &TickTime) -> Option<UpdateReport> {
        if !self.booted {
            self.boot(now);
        }
        match command {
            RemoteCommand::SetEquipment { equipment, on } => self.set_equipment(equipment, on, now),
            RemoteCommand::EquipmentAuto(equipment) => {
                let reason = match equipment {
                    Equipment::Heat => {
                        self.settings.heating.manual = false;
                        "heat_auto"
                    }
                    Equipment::Fan => {
                        self.settings.fan.manual = false;
                        "fan_auto"
                    }
                    Equipment::SolutionHeat => {
                        self.settings.solution.manual = false;
                        "sol_auto"
                    }
                    Equipment::Pump | Equipment::Fill | Equipment::PumpOverride => return None,
                };
                self.mark_changed(reason);
            }
            RemoteCommand::SetFogMode { mode, force_on } => {
                let fog = &mut self.settings.fog;
                fog.mode = mode;
                fog.force_on = mode == FogMode::Forced && force_on;
                self.mark_changed("fog_mode");
            }
            RemoteCommand::Window(command) => self.window_command(command, now.mono),
            RemoteCommand::ToggleHydroMix => {
                watering::toggle_mix(&mut self.settings.watering, now.unix);
                self.pending.telemetry_now = true;
                self.mark_changed("hydro_mix_toggle");
            }
            RemoteCommand::UpdateSettings(fields) => {
                let report = settings_table::apply_update(&mut self.settings, &fields);
                if report.changed() {
                    self.settings.sanitize();
                    self.window.request_recalc();
                    self.mark_changed("settings_update");
                }
                return Some(report);
            }
        }
        None
    }

    fn set_equipment(&mut self, equipment: Equipment, on: bool, now: &TickTime) {
        let settings = &mut self.settings;
        let reason = match equipment {
            Equipment::Heat => {
                settings.heating.manual = true;
                settings.heating.state = on;
                "heat_manual"
            }
            Equipment::Fan => {
                settings.fan.manual = true;
                settings.fan.state = on;
                "fan_manual"
            }
            Equipment::SolutionHeat => {
                settings.solution.manual = true;
                settings.solution.state = on;
                "sol_manual"
            }
            Equipment::Pump => {
                let watering = &mut settings.watering;
                if on {
                    watering::start_forced(watering, ForcedKind::Pump, now.unix);
                } else if !watering::cancel_forced(watering, now.unix) {
                    watering.pump_on = false;
                    watering.morning.pulse_on = false;
                }
                self.pending.telemetry_now = true;
                "pump_command"
            }
            Equipment::Fill => {
                let watering = &mut settings.watering;
                if on {
                    watering::start_forced(watering, ForcedKind::Fill, now.unix);
                } else {
                    watering.forced.fill_active = false;
                }
                self.pending.telemetry_now = true;
                "fill_command"
            }
            Equipment::PumpOverride => {
                watering::set_override(&mut settings.watering, on);
                "pump_override"
            }
        };
        self.mark_changed(reason);
    }

    fn window_command(&mut self, command: WindowCommand, now: MonoMs) {
        let action = match command {
            WindowCommand::Move {
                direction,
                duration_ms,
            } => {
                self.settings.window.manual = true;
                Some(
                    self.window
                        .manual_move(direction, duration_ms, &self.settings.window, now),
                )
            }
            WindowCommand::Stop => {
                self.settings.window.manual = true;
                Some(self.window.stop())
            }
            WindowCommand::Auto => {
                self.settings.window.manual = false;
                self.window.request_recalc();
                None
            }
        };
        self.pending.actions.extend(action);
        self.mark_changed("window_command");
    }

    /// One-shot reconciliation of persisted state. Runs before the first
    /// command or tick, whichever comes first.
    fn boot(&mut self, now: &TickTime) {
        self.booted = true;
        let report = recovery::recover(
            &mut self.settings,
            self.snapshot.level,
            now,
            self.config.morning_start_grace_ms,
        );
        self.fog.reset();
        if report.changed() {
            self.throttle.request("recovery");
        }
        let tuning = self.window_tuning();
        let calibrate = self.window.calibrate(&self.settings.window, &tuning, now.mono);
        self.pending.actions.insert(0, calibrate);
        self.pending.recovery = Some(report);
    }

    fn mark_changed(&mut self, reason: &'static str) {
        self.pending.settings_changed = true;
        self.throttle.request(reason);
    }

    /// Runs every controller once.
    ///
    /// `received` is when `snapshot` arrived; a missing or stale snapshot is
    /// replaced by an all-invalid one.
    pub fn tick(
        &mut self,
        snapshot: &SensorSnapshot,
        received: Option<MonoMs>,
        now: &TickTime,
    ) -> TickOutcome {
        let fresh = received
            .map(|at| now.mono.elapsed_since(at) <= self.config.sensor_stale_timeout_ms)
            .unwrap_or(false);
        self.snapshot = if fresh {
            *snapshot
        } else {
            SensorSnapshot::invalid()
        };
        let snapshot = self.snapshot;

        if !self.booted {
            self.boot(now);
        }
        let pending = std::mem::take(&mut self.pending);
        let mut outcome = TickOutcome {
            actions: pending.actions,
            publish_settings: pending.settings_changed,
            recovery: pending.recovery,
            ..TickOutcome::default()
        };

        let shift = self.settings.general.threshold_shift(now.local.hour);
        self.step_climate(&snapshot, shift, now.mono, &mut outcome.events);

        let fog_mode = self.settings.fog.mode;
        if let Some(event) = self.fog.step(
            &mut self.settings.fog,
            snapshot.avg_humidity,
            snapshot.avg_temp,
            &now.local,
            now.mono,
            self.config.fog_settle_ms,
        ) {
            let reason = event.save_reason(fog_mode);
            outcome.events.push(reason);
            self.throttle.request(reason);
        }

        let fog_running = self.fog.phase() != FogPhase::Idle;
        if self.fan.step(&mut self.settings.fan, fog_running, now.mono) {
            outcome.events.push("fan_auto");
            self.throttle.request("fan_auto");
        }

        let watering_input = WateringInput {
            irradiance: snapshot.irradiance,
            level: snapshot.level,
            substrate: snapshot.substrate,
        };
        let tuning = self.watering_tuning();
        let report = self.watering.step(
            &mut self.settings.watering,
            &self.settings.level,
            &watering_input,
            now,
            &tuning,
        );
        if let Some(reason) = report.events.first().copied() {
            self.throttle.request(reason);
        }
        outcome.events.extend(report.events);
        outcome.publish_telemetry |= report.forced_transition || pending.telemetry_now;

        if self
            .wind
            .update(snapshot.wind_speed, &self.settings.general, now.mono)
        {
            outcome.events.push(if self.wind.restricted() {
                "wind_lockout"
            } else {
                "wind_lockout_released"
            });
        }

        outcome.actions.extend(self.window.poll_motion(now.mono));
        let window_input = WindowInput {
            temp: snapshot.avg_temp,
            humidity: snapshot.avg_humidity,
            wind: snapshot.wind_speed,
            restricted: self.wind.restricted(),
            shift,
        };
        let tuning = self.window_tuning();
        let settings = &self.settings;
        outcome.actions.extend(self.window.step(
            (&settings.window, &settings.climate, &settings.general),
            &window_input,
            &tuning,
            now.mono,
        ));

        let outputs = self.compute_outputs();
        if self
            .history
            .sample_due(now.mono, self.config.history_sample_interval_ms)
        {
            let entry = self.history_entry(&outputs, now);
            self.history.push(entry);
        }
        outcome.flush_history = self.history.flush_due(
            now.local.hour,
            now.mono,
            self.config.history_flush_min_interval_ms,
        );

        for relay in Relay::ALL {
            let on = outputs.get(relay);
            if self.outputs.map(|prev| prev.get(relay) != on).unwrap_or(true) {
                outcome.actions.push(EngineAction::Relay { relay, on });
            }
        }
        self.outputs = Some(outputs);

        outcome.save = self.throttle.try_save(now.mono);

        let telemetry_due = self
            .last_telemetry
            .map(|last| now.mono.elapsed_since(last) >= self.config.telemetry_interval_ms)
            .unwrap_or(true);
        if telemetry_due || outcome.publish_telemetry {
            outcome.publish_telemetry = true;
            self.last_telemetry = Some(now.mono);
        }

        outcome
    }

    fn step_climate(
        &mut self,
        snapshot: &SensorSnapshot,
        shift: f32,
        now: MonoMs,
        events: &mut Vec<&'static str>,
    ) {
        let min_change_ms = self.config.relay_min_change_interval_ms;
        // Either loop runs only while the air readings are both usable.
        let climate_valid = snapshot.climate_valid();
        let gated = |value: f32| if climate_valid { value } else { f32::NAN };

        let change = self.heating.step(
            &mut self.settings.heating,
            gated(snapshot.avg_temp),
            true,
            shift,
            now,
            min_change_ms,
        );
        if let Some(change) = change {
            let reason = match change {
                LoopChange::Switched => "heat_auto",
                LoopChange::SensorLost => "heat_sensor_lost",
                LoopChange::Inhibited => "heat_inhibited",
            };
            events.push(reason);
            self.throttle.request(reason);
        }

        // NaN level fails the comparison and inhibits heating.
        let tank_ok = snapshot.level > self.settings.level.min_level;
        let change = self.solution.step(
            &mut self.settings.solution,
            gated(snapshot.solution_temp),
            tank_ok,
            shift,
            now,
            min_change_ms,
        );
        if let Some(change) = change {
            let reason = match change {
                LoopChange::Switched => "sol_auto",
                LoopChange::SensorLost => "sol_sensor_lost",
                LoopChange::Inhibited => "sol_low_level",
            };
            events.push(reason);
            self.throttle.request(reason);
        }
    }

    fn compute_outputs(&self) -> RelayOutputs {
        let watering = watering::outputs(&self.settings.watering);
        let fog = self.fog.phase();
        RelayOutputs {
            heat: self.settings.heating.state,
            fan: self.settings.fan.state,
            fog_valve: fog.valve(),
            fog_pump: fog.pump(),
            pump: watering.pump,
            // No fresh level reading, no filling.
            fill_valve: watering.fill_valve && self.snapshot.level.is_finite(),
            three_way_valve: watering.three_way_valve,
            solution_heat: self.settings.solution.state,
        }
    }

    fn history_entry(&self, outputs: &RelayOutputs, now: &TickTime) -> HistoryEntry {
        let snapshot = &self.snapshot;
        HistoryEntry {
            timestamp: now.unix,
            temp: snapshot.avg_temp,
            humidity: snapshot.avg_humidity,
            level: snapshot.level,
            wind: snapshot.wind_speed,
            outdoor_temp: snapshot.outdoor.temperature,
            outdoor_humidity: snapshot.outdoor.humidity,
            window_position: self.window.position(),
            fan: outputs.fan,
            heat: outputs.heat,
            pump: outputs.pump,
            solution_heat: outputs.solution_heat,
            hydro_mix: outputs.three_way_valve,
            fill: outputs.fill_valve,
            fog: outputs.fog_pump,
        }
    }

    pub fn telemetry(&self, now: &TickTime) -> TelemetryPayload {
        let snapshot = &self.snapshot;
        let settings = &self.settings;
        let outputs = self.outputs.unwrap_or_else(|| self.compute_outputs());
        let watering = &settings.watering;
        let forced = &watering.forced;
        let fog = self.fog.phase();

        TelemetryPayload {
            timestamp: now.unix.0,
            temperature: snapshot.avg_temp,
            humidity: snapshot.avg_humidity,
            solution_temp: snapshot.solution_temp,
            level: snapshot.level,
            wind_speed: snapshot.wind_speed,
            irradiance: snapshot.irradiance,
            substrate_humidity: snapshot.substrate.humidity,
            substrate_ec: snapshot.substrate.ec,
            substrate_ph: snapshot.substrate.ph,
            substrate_temp: snapshot.substrate.temperature,
            outdoor_temp: snapshot.outdoor.temperature,
            outdoor_humidity: snapshot.outdoor.humidity,
            sensors_valid: snapshot.climate_valid(),

            heat: outputs.heat,
            heat_mode: control_mode_str(settings.heating.manual),
            fan: outputs.fan,
            fan_mode: control_mode_str(settings.fan.manual),
            solution_heat: outputs.solution_heat,
            sol_mode: control_mode_str(settings.solution.manual),

            fog: settings.fog.state,
            fog_mode: settings.fog.mode.as_str(),
            fog_phase: fog.as_str(),
            fog_valve: outputs.fog_valve,
            fog_pump: outputs.fog_pump,

            window_position: self.window.position(),
            window_moving: self.window.is_moving(),
            window_mode: control_mode_str(settings.window.manual),
            wind_restricted: self.wind.restricted(),

            pump: outputs.pump,
            watering_mode: watering.mode.as_str(),
            fill_valve: outputs.fill_valve,
            three_way_valve: outputs.three_way_valve,
            hydro_mix: forced.active && forced.mix_active,
            forced_active: forced.active,
            forced_remaining_s: if forced.active {
                forced.end.secs_since(now.unix).unwrap_or(0)
            } else {
                0
            },
            pump_override: watering.override_active,
            rad_sum: watering.rad_sum,
            cycle_count: watering.cycle_count,
            max_cycles: watering.max_cycles,
            morning_active: watering.morning.active,
            morning_pulse: watering.morning.current_pulse,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        clock::test_support::tick_at,
        types::{SubstrateReading, WateringMode, WindowDirection},
    };

    fn snapshot(temp: f32, humidity: f32) -> SensorSnapshot {
        SensorSnapshot {
            avg_temp: temp,
            avg_humidity: humidity,
            solution_temp: 22.0,
            level: 50.0,
            wind_speed: 0.0,
            irradiance: 0.0,
            substrate: SubstrateReading {
                humidity: 60.0,
                ec: 1.5,
                ph: 6.0,
                temperature: 20.0,
            },
            ..SensorSnapshot::invalid()
        }
    }

    fn engine_at_rest(now: &TickTime) -> GreenhouseEngine {
        let mut settings = Settings::default();
        settings.watering.last_reset_day = now.local.day;
        settings.watering.morning.started_today = true;
        settings.watering.mode = WateringMode::Off;
        GreenhouseEngine::new(ControllerConfig::default(), settings, Vec::new())
    }

    fn relay_changes(actions: &[EngineAction], relay: Relay) -> Vec<bool> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::Relay { relay: r, on } if *r == relay => Some(*on),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_tick_recovers_calibrates_and_reports_every_relay() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);

        let outcome = engine.tick(&snapshot(21.5, 60.0), Some(now.mono), &now);

        assert!(outcome.recovery.is_some());
        assert_eq!(
            outcome.actions[0],
            EngineAction::WindowMove {
                direction: WindowDirection::Down,
                duration_ms: 161_000
            }
        );
        let relays = outcome
            .actions
            .iter()
            .filter(|action| matches!(action, EngineAction::Relay { .. }))
            .count();
        assert_eq!(relays, Relay::ALL.len());
        assert!(outcome.publish_telemetry);

        let next = tick_at(1_000, 19, 0, 1);
        let outcome = engine.tick(&snapshot(21.5, 60.0), Some(next.mono), &next);
        assert!(outcome.recovery.is_none());
        assert!(!outcome
            .actions
            .iter()
            .any(|action| matches!(action, EngineAction::Relay { .. })));
    }

    #[test]
    fn cold_fail_safe_turns_heating_off_until_valid_and_cold() {
        let mut engine = engine_at_rest(&tick_at(0, 19, 0, 0));
        let mut actions = Vec::new();

        let t0 = tick_at(0, 19, 0, 0);
        actions.extend(engine.tick(&snapshot(17.0, 60.0), Some(t0.mono), &t0).actions);
        assert!(engine.settings().heating.state);

        let t1 = tick_at(1_000, 19, 0, 1);
        let lost = SensorSnapshot {
            avg_temp: f32::NAN,
            ..snapshot(17.0, 60.0)
        };
        let outcome = engine.tick(&lost, Some(t1.mono), &t1);
        assert!(outcome.events.contains(&"heat_sensor_lost"));
        assert!(!engine.settings().heating.state);
        actions.extend(outcome.actions);

        for (i, temp) in [19.0, 18.5, 18.2].into_iter().enumerate() {
            let t = tick_at(10_000 + i as u64 * 10_000, 19, 1, i as u32);
            actions.extend(engine.tick(&snapshot(temp, 60.0), Some(t.mono), &t).actions);
            assert!(!engine.settings().heating.state);
        }

        let t = tick_at(60_000, 19, 2, 0);
        actions.extend(engine.tick(&snapshot(18.0, 60.0), Some(t.mono), &t).actions);
        assert!(engine.settings().heating.state);
        assert_eq!(relay_changes(&actions, Relay::Heat), vec![true, false, true]);
    }

    #[test]
    fn missing_humidity_stops_both_heaters() {
        let t0 = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&t0);
        let cold = SensorSnapshot {
            solution_temp: 12.0,
            ..snapshot(17.0, 60.0)
        };
        engine.tick(&cold, Some(t0.mono), &t0);
        assert!(engine.settings().heating.state);
        assert!(engine.settings().solution.state);

        let t1 = tick_at(1_000, 19, 0, 1);
        let no_humidity = SensorSnapshot {
            avg_humidity: f32::NAN,
            ..cold
        };
        let outcome = engine.tick(&no_humidity, Some(t1.mono), &t1);
        assert!(outcome.events.contains(&"heat_sensor_lost"));
        assert!(outcome.events.contains(&"sol_sensor_lost"));
        assert!(!engine.settings().heating.state);
        assert!(!engine.settings().solution.state);
        assert_eq!(relay_changes(&outcome.actions, Relay::Heat), vec![false]);
    }

    #[test]
    fn fill_valve_waits_for_a_level_reading() {
        let t0 = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&t0);
        engine.apply_command(
            RemoteCommand::SetEquipment {
                equipment: Equipment::Fill,
                on: true,
            },
            &t0,
        );

        let outcome = engine.tick(&snapshot(21.5, 60.0), None, &t0);
        assert_eq!(relay_changes(&outcome.actions, Relay::FillValve), vec![false]);
        assert!(engine.settings().watering.forced.fill_active);

        let t1 = tick_at(1_000, 19, 0, 1);
        let outcome = engine.tick(&snapshot(21.5, 60.0), Some(t1.mono), &t1);
        assert_eq!(relay_changes(&outcome.actions, Relay::FillValve), vec![true]);
    }

    #[test]
    fn command_before_first_tick_survives_recovery() {
        let t0 = tick_at(0, 19, 0, 0);
        let mut settings = Settings::default();
        settings.watering.last_reset_day = t0.local.day;
        settings.watering.morning.started_today = true;
        settings.fog.state = true;
        let mut engine = GreenhouseEngine::new(ControllerConfig::default(), settings, Vec::new());

        engine.apply_command(
            RemoteCommand::SetFogMode {
                mode: FogMode::Forced,
                force_on: true,
            },
            &t0,
        );
        assert!(engine.settings().fog.force_on);

        let outcome = engine.tick(&snapshot(21.5, 60.0), Some(t0.mono), &t0);
        let report = outcome.recovery.expect("first tick carries the recovery report");
        assert_eq!(report.steps, vec![recovery::RecoveryStep::FogStopped]);
        assert!(matches!(outcome.actions[0], EngineAction::WindowMove { .. }));
        assert!(engine.settings().fog.force_on);
        assert_eq!(engine.settings().fog.mode, FogMode::Forced);
    }

    #[test]
    fn stale_snapshot_is_treated_as_invalid() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);
        engine.tick(&snapshot(17.0, 60.0), Some(now.mono), &now);
        assert!(engine.settings().heating.state);

        let late = tick_at(61_000, 19, 1, 1);
        engine.tick(&snapshot(17.0, 60.0), Some(now.mono), &late);
        assert!(!engine.settings().heating.state);
        assert!(!engine.telemetry(&late).sensors_valid);
    }

    #[test]
    fn forced_fog_opens_valve_before_pump() {
        let now = tick_at(0, 22, 0, 0);
        let mut engine = engine_at_rest(&now);
        engine.tick(&snapshot(21.0, 60.0), Some(now.mono), &now);

        let cmd_at = tick_at(1_000, 22, 0, 1);
        engine.apply_command(
            RemoteCommand::SetFogMode {
                mode: FogMode::Forced,
                force_on: true,
            },
            &cmd_at,
        );

        let mut timeline = Vec::new();
        for step in 1..=5u64 {
            let t = tick_at(step * 1_000, 22, 0, step as u32);
            let outcome = engine.tick(&snapshot(21.0, 60.0), Some(t.mono), &t);
            for action in outcome.actions {
                if let EngineAction::Relay { relay, on } = action {
                    if matches!(relay, Relay::FogValve | Relay::FogPump) {
                        timeline.push((step * 1_000, relay, on));
                    }
                }
            }
        }

        assert_eq!(
            timeline,
            vec![(1_000, Relay::FogValve, true), (3_000, Relay::FogPump, true)]
        );
    }

    #[test]
    fn hydro_toggle_publishes_immediately_and_reports_mix() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);
        engine.settings.watering.mode = WateringMode::Auto;
        engine.tick(&snapshot(21.0, 60.0), Some(now.mono), &now);

        let t = tick_at(2_000, 19, 0, 2);
        engine.apply_command(RemoteCommand::ToggleHydroMix, &t);
        let outcome = engine.tick(&snapshot(21.0, 60.0), Some(t.mono), &t);

        assert!(outcome.publish_telemetry);
        assert!(outcome.publish_settings);
        assert_eq!(relay_changes(&outcome.actions, Relay::IrrigationPump), vec![true]);
        assert_eq!(relay_changes(&outcome.actions, Relay::ThreeWayValve), vec![true]);
        let telemetry = engine.telemetry(&t);
        assert!(telemetry.hydro_mix);
        assert_eq!(telemetry.watering_mode, "forced");
        assert_eq!(telemetry.forced_remaining_s, 300);
    }

    #[test]
    fn saves_are_throttled_but_not_lost() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);
        engine.tick(&snapshot(21.0, 60.0), Some(now.mono), &now);

        let t1 = tick_at(1_000, 19, 0, 1);
        engine.apply_command(
            RemoteCommand::SetEquipment {
                equipment: Equipment::Heat,
                on: true,
            },
            &t1,
        );
        let first = engine.tick(&snapshot(21.0, 60.0), Some(t1.mono), &t1);
        assert_eq!(first.save, Some("heat_manual"));

        let t2 = tick_at(2_000, 19, 0, 2);
        engine.apply_command(
            RemoteCommand::SetEquipment {
                equipment: Equipment::Fan,
                on: true,
            },
            &t2,
        );
        assert_eq!(engine.tick(&snapshot(21.0, 60.0), Some(t2.mono), &t2).save, None);
        assert!(engine.save_pending());

        let t3 = tick_at(6_000, 19, 0, 6);
        assert_eq!(
            engine.tick(&snapshot(21.0, 60.0), Some(t3.mono), &t3).save,
            Some("fan_manual")
        );
    }

    #[test]
    fn settings_update_reports_per_field() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);
        let fields = json!({"minTemp": 16, "maxTemp": 99, "bogus": 1});
        let report = engine
            .apply_command(
                RemoteCommand::UpdateSettings(fields.as_object().unwrap().clone()),
                &now,
            )
            .unwrap();

        assert_eq!(report.applied, vec!["minTemp".to_string()]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(engine.settings().climate.min_temp, 16.0);
        assert_eq!(engine.settings().climate.max_temp, 25.0);
    }

    #[test]
    fn manual_window_jog_switches_window_to_manual() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);
        engine.tick(&snapshot(21.0, 60.0), Some(now.mono), &now);

        let t = tick_at(1_000, 19, 0, 1);
        engine.apply_command(
            RemoteCommand::Window(WindowCommand::Move {
                direction: WindowDirection::Up,
                duration_ms: Some(15_600),
            }),
            &t,
        );
        let outcome = engine.tick(&snapshot(21.0, 60.0), Some(t.mono), &t);

        assert!(engine.settings().window.manual);
        assert!(outcome.actions.contains(&EngineAction::WindowMove {
            direction: WindowDirection::Up,
            duration_ms: 15_600
        }));
        assert_eq!(engine.window_position(), 10);
    }

    #[test]
    fn history_samples_on_interval() {
        let now = tick_at(0, 19, 0, 0);
        let mut engine = engine_at_rest(&now);
        engine.tick(&snapshot(21.0, 60.0), Some(now.mono), &now);
        assert!(engine.history_entries().is_empty());

        let t = tick_at(180_000, 19, 3, 0);
        engine.tick(&snapshot(21.0, 60.0), Some(t.mono), &t);
        let entries = engine.history_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, t.unix);
        assert_eq!(entries[0].temp, 21.0);
    }
}
