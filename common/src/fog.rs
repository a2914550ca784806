use crate::{
    climate::map_range,
    clock::{LocalClock, MonoMs},
    config::FogSettings,
    types::FogMode,
};

/// Ignition/shutdown sequence of the fog line.
///
/// The valve always opens before the pump starts, and the pump always stops
/// before the valve closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FogPhase {
    #[default]
    Idle,
    ValveOpening {
        since: MonoMs,
    },
    Active {
        since: MonoMs,
    },
    PumpOffPending {
        since: MonoMs,
    },
}

impl FogPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ValveOpening { .. } => "valve_opening",
            Self::Active { .. } => "active",
            Self::PumpOffPending { .. } => "pump_off_pending",
        }
    }

    pub fn valve(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn pump(self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Cycle timing for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FogTiming {
    pub duration_ms: u64,
    pub interval_ms: u64,
    /// Conditions allow a new cycle to start.
    pub eligible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FogPlan {
    OutsideWindow,
    Forced { on: bool },
    Cycle(FogTiming),
}

fn midpoint(min: f32, max: f32) -> f32 {
    (min + max) / 2.0
}

/// Day-window timing in auto mode, interpolated from humidity and temperature.
///
/// Drier or hotter air gives longer bursts at shorter intervals. Invalid
/// readings fall back to the middle of the configured range.
pub fn auto_day_timing(cfg: &FogSettings, humidity: f32, temp: f32) -> FogTiming {
    let humidity = if humidity.is_finite() {
        humidity
    } else {
        midpoint(cfg.min_humidity, cfg.max_humidity)
    };
    let temp = if temp.is_finite() {
        temp
    } else {
        midpoint(cfg.min_temp, cfg.max_temp)
    };

    let (h_lo, h_hi) = (cfg.min_humidity.min(cfg.max_humidity), cfg.min_humidity.max(cfg.max_humidity));
    let (t_lo, t_hi) = (cfg.min_temp.min(cfg.max_temp), cfg.min_temp.max(cfg.max_temp));
    let h = humidity.clamp(h_lo, h_hi);
    let t = temp.clamp(t_lo, t_hi);

    let (min_dur, max_dur) = (cfg.min_duration_ms as f32, cfg.max_duration_ms as f32);
    let (min_int, max_int) = (cfg.min_interval_ms as f32, cfg.max_interval_ms as f32);

    let duration = map_range(h, cfg.min_humidity, cfg.max_humidity, max_dur, min_dur)
        .max(map_range(t, cfg.min_temp, cfg.max_temp, min_dur, max_dur));
    let interval = map_range(h, cfg.min_humidity, cfg.max_humidity, min_int, max_int)
        .min(map_range(t, cfg.min_temp, cfg.max_temp, max_int, min_int));

    let (dur_lo, dur_hi) = (min_dur.min(max_dur), min_dur.max(max_dur));
    let (int_lo, int_hi) = (min_int.min(max_int), min_int.max(max_int));

    FogTiming {
        duration_ms: duration.clamp(dur_lo, dur_hi).round() as u64,
        interval_ms: interval.clamp(int_lo, int_hi).round() as u64,
        eligible: humidity < cfg.max_humidity && temp >= cfg.min_temp && temp <= cfg.max_temp,
    }
}

/// Why the fog relay state changed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FogEvent {
    Started,
    Stopped,
    OutsideWindow,
}

impl FogEvent {
    pub fn save_reason(self, mode: FogMode) -> &'static str {
        match (self, mode) {
            (Self::OutsideWindow, _) => "fog_outside_window",
            (_, FogMode::Auto) => "fog_auto",
            (_, FogMode::Scheduled) => "fog_scheduled",
            (_, FogMode::Forced) => "fog_forced",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FogController {
    phase: FogPhase,
    last_cycle_end: Option<MonoMs>,
}

impl FogController {
    pub fn phase(&self) -> FogPhase {
        self.phase
    }

    /// Drops all session timers; used at boot so cycles never resume.
    pub fn reset(&mut self) {
        self.phase = FogPhase::Idle;
        self.last_cycle_end = None;
    }

    fn plan(cfg: &FogSettings, humidity: f32, temp: f32, local: &LocalClock) -> FogPlan {
        if cfg.mode == FogMode::Forced {
            return FogPlan::Forced { on: cfg.force_on };
        }

        let morning = local.in_hours(cfg.morning_start, cfg.morning_end);
        let day = local.in_hours(cfg.day_start, cfg.day_end);

        if morning {
            FogPlan::Cycle(FogTiming {
                duration_ms: cfg.morning_duration_ms,
                interval_ms: cfg.morning_interval_ms,
                eligible: true,
            })
        } else if day {
            match cfg.mode {
                FogMode::Auto => FogPlan::Cycle(auto_day_timing(cfg, humidity, temp)),
                _ => FogPlan::Cycle(FogTiming {
                    duration_ms: cfg.day_duration_ms,
                    interval_ms: cfg.day_interval_ms,
                    eligible: true,
                }),
            }
        } else {
            FogPlan::OutsideWindow
        }
    }

    pub fn step(
        &mut self,
        cfg: &mut FogSettings,
        humidity: f32,
        temp: f32,
        local: &LocalClock,
        now: MonoMs,
        settle_ms: u64,
    ) -> Option<FogEvent> {
        if let FogPhase::PumpOffPending { since } = self.phase {
            if now.elapsed_since(since) >= settle_ms {
                self.phase = FogPhase::Idle;
            }
        }

        let event = match Self::plan(cfg, humidity, temp, local) {
            FogPlan::OutsideWindow => self.stop(now).then_some(FogEvent::OutsideWindow),
            FogPlan::Forced { on: true } => self.advance_ignition(cfg.delay_ms, now),
            FogPlan::Forced { on: false } => self.stop(now).then_some(FogEvent::Stopped),
            FogPlan::Cycle(timing) => self.run_cycle(cfg.delay_ms, timing, now),
        };

        if let Some(event) = event {
            cfg.state = event == FogEvent::Started;
        }
        event
    }

    fn run_cycle(&mut self, delay_ms: u64, timing: FogTiming, now: MonoMs) -> Option<FogEvent> {
        match self.phase {
            FogPhase::Idle => {
                let rested = self
                    .last_cycle_end
                    .map(|end| now.elapsed_since(end) >= timing.interval_ms)
                    .unwrap_or(true);
                if timing.eligible && rested {
                    self.phase = FogPhase::ValveOpening { since: now };
                }
                None
            }
            FogPhase::ValveOpening { .. } => self.advance_ignition(delay_ms, now),
            FogPhase::Active { since } => {
                if now.elapsed_since(since) >= timing.duration_ms {
                    self.stop(now).then_some(FogEvent::Stopped)
                } else {
                    None
                }
            }
            FogPhase::PumpOffPending { .. } => None,
        }
    }

    fn advance_ignition(&mut self, delay_ms: u64, now: MonoMs) -> Option<FogEvent> {
        match self.phase {
            FogPhase::Idle => {
                self.phase = FogPhase::ValveOpening { since: now };
                None
            }
            FogPhase::ValveOpening { since } if now.elapsed_since(since) >= delay_ms => {
                self.phase = FogPhase::Active { since: now };
                Some(FogEvent::Started)
            }
            _ => None,
        }
    }

    /// Returns true when the pump was running.
    fn stop(&mut self, now: MonoMs) -> bool {
        match self.phase {
            FogPhase::Active { .. } => {
                self.phase = FogPhase::PumpOffPending { since: now };
                self.last_cycle_end = Some(now);
                true
            }
            FogPhase::ValveOpening { .. } => {
                self.phase = FogPhase::Idle;
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock::test_support::tick_at;

    fn forced(delay_ms: u64) -> FogSettings {
        FogSettings {
            mode: FogMode::Forced,
            force_on: true,
            delay_ms,
            ..FogSettings::default()
        }
    }

    #[test]
    fn forced_ignition_opens_valve_before_pump() {
        let mut cfg = forced(2_000);
        let mut fog = FogController::default();
        let local = tick_at(0, 22, 0, 0).local;

        assert_eq!(fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(1_000), 50), None);
        assert_eq!(fog.phase(), FogPhase::ValveOpening { since: MonoMs(1_000) });
        assert!(fog.phase().valve() && !fog.phase().pump());

        assert_eq!(fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(2_999), 50), None);
        assert!(!fog.phase().pump());

        assert_eq!(
            fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(3_000), 50),
            Some(FogEvent::Started)
        );
        assert!(fog.phase().pump());
        assert!(cfg.state);
    }

    #[test]
    fn forced_shutdown_stops_pump_then_valve() {
        let mut cfg = forced(0);
        let mut fog = FogController::default();
        let local = tick_at(0, 22, 0, 0).local;

        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(0), 50);
        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(1_000), 50);
        assert!(fog.phase().pump());

        cfg.force_on = false;
        assert_eq!(
            fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(2_000), 50),
            Some(FogEvent::Stopped)
        );
        assert!(!fog.phase().pump());
        assert!(fog.phase().valve());
        assert!(!cfg.state);

        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(2_050), 50);
        assert_eq!(fog.phase(), FogPhase::Idle);
    }

    #[test]
    fn scheduled_cycle_waits_interval_after_previous_end() {
        let mut cfg = FogSettings {
            mode: FogMode::Scheduled,
            delay_ms: 0,
            morning_duration_ms: 5_000,
            morning_interval_ms: 60_000,
            ..FogSettings::default()
        };
        let mut fog = FogController::default();
        let local = tick_at(0, 7, 0, 0).local;

        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(0), 50);
        assert_eq!(
            fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(1_000), 50),
            Some(FogEvent::Started)
        );
        assert_eq!(
            fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(6_000), 50),
            Some(FogEvent::Stopped)
        );
        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(7_000), 50);
        assert_eq!(fog.phase(), FogPhase::Idle);

        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(65_999), 50);
        assert_eq!(fog.phase(), FogPhase::Idle);
        fog.step(&mut cfg, 60.0, 20.0, &local, MonoMs(66_000), 50);
        assert!(matches!(fog.phase(), FogPhase::ValveOpening { .. }));
    }

    #[test]
    fn leaving_window_stops_active_cycle() {
        let mut cfg = FogSettings {
            mode: FogMode::Scheduled,
            delay_ms: 0,
            ..FogSettings::default()
        };
        let mut fog = FogController::default();
        let inside = tick_at(0, 17, 59, 58).local;
        let outside = tick_at(0, 18, 0, 0).local;

        fog.step(&mut cfg, 60.0, 20.0, &inside, MonoMs(0), 50);
        fog.step(&mut cfg, 60.0, 20.0, &inside, MonoMs(1_000), 50);
        assert!(fog.phase().pump());

        assert_eq!(
            fog.step(&mut cfg, 60.0, 20.0, &outside, MonoMs(2_000), 50),
            Some(FogEvent::OutsideWindow)
        );
        assert!(!fog.phase().pump());
        assert!(!cfg.state);
    }

    #[test]
    fn auto_day_timing_interpolates_between_bounds() {
        let cfg = FogSettings::default();

        let dry_hot = auto_day_timing(&cfg, 50.0, 30.0);
        assert_eq!(dry_hot.duration_ms, cfg.max_duration_ms);
        assert_eq!(dry_hot.interval_ms, cfg.min_interval_ms);
        assert!(dry_hot.eligible);

        let humid_cool = auto_day_timing(&cfg, 80.0, 15.0);
        assert_eq!(humid_cool.duration_ms, cfg.min_duration_ms);
        assert_eq!(humid_cool.interval_ms, cfg.max_interval_ms);
        assert!(!humid_cool.eligible, "humidity at max blocks new cycles");

        let middle = auto_day_timing(&cfg, 65.0, 22.5);
        assert_eq!(middle.duration_ms, 6_000);
        assert_eq!(middle.interval_ms, 330_000);
    }

    #[test]
    fn auto_day_timing_substitutes_invalid_readings() {
        let cfg = FogSettings::default();
        let timing = auto_day_timing(&cfg, f32::NAN, f32::NAN);
        assert_eq!(timing, auto_day_timing(&cfg, 65.0, 22.5));
        assert!(timing.eligible);
    }

    #[test]
    fn auto_mode_skips_cycles_when_too_humid() {
        let mut cfg = FogSettings {
            delay_ms: 0,
            ..FogSettings::default()
        };
        let mut fog = FogController::default();
        let local = tick_at(0, 14, 0, 0).local;

        fog.step(&mut cfg, 85.0, 25.0, &local, MonoMs(0), 50);
        assert_eq!(fog.phase(), FogPhase::Idle);
        fog.step(&mut cfg, 60.0, 25.0, &local, MonoMs(1_000), 50);
        assert!(matches!(fog.phase(), FogPhase::ValveOpening { .. }));
    }
}
