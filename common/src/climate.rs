use crate::{
    clock::MonoMs,
    config::{FanSettings, ThresholdSettings},
};

/// Linear interpolation of `x` from one range onto another, unclamped.
/// A degenerate input range maps to `out_min`.
pub(crate) fn map_range(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    if (in_max - in_min).abs() < f32::EPSILON {
        return out_min;
    }
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Plain two-threshold decision: on at or below `on`, off at or above `off`.
pub fn hysteresis_target(current: bool, value: f32, on: f32, off: f32) -> bool {
    if !current && value <= on {
        true
    } else if current && value >= off {
        false
    } else {
        current
    }
}

/// Why a hysteresis loop changed its relay this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopChange {
    Switched,
    SensorLost,
    Inhibited,
}

/// Session state of one hysteresis loop (heating or solution heating).
#[derive(Debug, Clone, Default)]
pub struct HysteresisLoop {
    last_change: Option<MonoMs>,
    sensor_fault: bool,
}

impl HysteresisLoop {
    pub fn sensor_fault(&self) -> bool {
        self.sensor_fault
    }

    fn can_change_state(&self, now: MonoMs, min_change_ms: u64) -> bool {
        self.last_change
            .map(|last| now.elapsed_since(last) >= min_change_ms)
            .unwrap_or(true)
    }

    /// Drives `cfg.state` from `value`.
    ///
    /// `permitted` is an extra interlock (tank level for solution heating).
    /// Manual mode leaves the persisted state alone; it is mirrored as is.
    pub fn step(
        &mut self,
        cfg: &mut ThresholdSettings,
        value: f32,
        permitted: bool,
        shift: f32,
        now: MonoMs,
        min_change_ms: u64,
    ) -> Option<LoopChange> {
        if cfg.manual {
            self.sensor_fault = false;
            return None;
        }

        if !value.is_finite() {
            self.sensor_fault = true;
            return self.force_off(cfg, now, LoopChange::SensorLost);
        }
        self.sensor_fault = false;

        if !permitted {
            return self.force_off(cfg, now, LoopChange::Inhibited);
        }

        if !self.can_change_state(now, min_change_ms) {
            return None;
        }

        let target = hysteresis_target(
            cfg.state,
            value,
            cfg.on_threshold + shift,
            cfg.off_threshold + shift,
        );
        if target == cfg.state {
            return None;
        }
        cfg.state = target;
        self.last_change = Some(now);
        Some(LoopChange::Switched)
    }

    // Fail-safe shutdown ignores the re-trigger interval.
    fn force_off(
        &mut self,
        cfg: &mut ThresholdSettings,
        now: MonoMs,
        reason: LoopChange,
    ) -> Option<LoopChange> {
        if !cfg.state {
            return None;
        }
        cfg.state = false;
        self.last_change = Some(now);
        Some(reason)
    }
}

/// Interval/duration timer for the circulation fan.
#[derive(Debug, Clone, Default)]
pub struct FanTimer {
    last_change: Option<MonoMs>,
    started: Option<MonoMs>,
}

impl FanTimer {
    /// Returns true when `cfg.state` changed.
    pub fn step(&mut self, cfg: &mut FanSettings, fog_active: bool, now: MonoMs) -> bool {
        if cfg.manual {
            return false;
        }

        // Intervals are measured from the first tick of this session.
        let last_change = *self.last_change.get_or_insert(now);
        if cfg.state && self.started.is_none() {
            self.started = Some(now);
        }

        let target = if fog_active {
            true
        } else if cfg.state {
            let started = self.started.unwrap_or(now);
            now.elapsed_since(started) < cfg.duration_ms
        } else {
            now.elapsed_since(last_change) >= cfg.interval_ms
        };

        if target == cfg.state {
            return false;
        }
        cfg.state = target;
        self.last_change = Some(now);
        self.started = target.then_some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_range_interpolates_and_handles_flat_input() {
        assert_eq!(map_range(21.5, 18.0, 25.0, 0.0, 100.0), 50.0);
        assert_eq!(map_range(60.0, 50.0, 70.0, 100.0, 0.0), 50.0);
        assert_eq!(map_range(30.0, 20.0, 20.0, 7.0, 9.0), 7.0);
    }

    fn heating() -> ThresholdSettings {
        ThresholdSettings {
            on_threshold: 18.0,
            off_threshold: 20.0,
            manual: false,
            state: false,
        }
    }

    #[test]
    fn switches_only_at_thresholds() {
        let mut cfg = heating();
        let mut control = HysteresisLoop::default();

        assert_eq!(control.step(&mut cfg, 18.5, true, 0.0, MonoMs(0), 5_000), None);
        assert_eq!(
            control.step(&mut cfg, 18.0, true, 0.0, MonoMs(1_000), 5_000),
            Some(LoopChange::Switched)
        );
        assert!(cfg.state);

        assert_eq!(control.step(&mut cfg, 19.9, true, 0.0, MonoMs(10_000), 5_000), None);
        assert!(cfg.state);
        assert_eq!(
            control.step(&mut cfg, 20.0, true, 0.0, MonoMs(11_000), 5_000),
            Some(LoopChange::Switched)
        );
        assert!(!cfg.state);
    }

    #[test]
    fn min_change_interval_blocks_chatter() {
        let mut cfg = heating();
        let mut control = HysteresisLoop::default();

        control.step(&mut cfg, 17.0, true, 0.0, MonoMs(1_000), 5_000);
        assert!(cfg.state);

        assert_eq!(control.step(&mut cfg, 21.0, true, 0.0, MonoMs(5_999), 5_000), None);
        assert!(cfg.state);
        control.step(&mut cfg, 21.0, true, 0.0, MonoMs(6_000), 5_000);
        assert!(!cfg.state);
    }

    #[test]
    fn night_shift_moves_both_thresholds() {
        let mut cfg = heating();
        let mut control = HysteresisLoop::default();

        control.step(&mut cfg, 17.0, true, -2.0, MonoMs(0), 5_000);
        assert!(!cfg.state, "17.0 is above the shifted on-threshold of 16.0");
        control.step(&mut cfg, 16.0, true, -2.0, MonoMs(1_000), 5_000);
        assert!(cfg.state);
    }

    #[test]
    fn invalid_reading_turns_off_immediately_and_stays_off() {
        let mut cfg = heating();
        let mut control = HysteresisLoop::default();

        control.step(&mut cfg, 15.0, true, 0.0, MonoMs(1_000), 5_000);
        assert!(cfg.state);

        assert_eq!(
            control.step(&mut cfg, f32::NAN, true, 0.0, MonoMs(1_500), 5_000),
            Some(LoopChange::SensorLost)
        );
        assert!(!cfg.state);
        assert!(control.sensor_fault());

        // Back inside the dead band: stays off.
        control.step(&mut cfg, 19.0, true, 0.0, MonoMs(20_000), 5_000);
        assert!(!cfg.state);
        assert!(!control.sensor_fault());

        control.step(&mut cfg, 18.0, true, 0.0, MonoMs(30_000), 5_000);
        assert!(cfg.state);
    }

    #[test]
    fn interlock_forces_off() {
        let mut cfg = heating();
        cfg.state = true;
        let mut control = HysteresisLoop::default();

        assert_eq!(
            control.step(&mut cfg, 15.0, false, 0.0, MonoMs(0), 5_000),
            Some(LoopChange::Inhibited)
        );
        assert!(!cfg.state);
    }

    #[test]
    fn manual_mode_is_left_alone() {
        let mut cfg = heating();
        cfg.manual = true;
        cfg.state = true;
        let mut control = HysteresisLoop::default();

        assert_eq!(control.step(&mut cfg, f32::NAN, true, 0.0, MonoMs(0), 5_000), None);
        assert!(cfg.state);
    }

    #[test]
    fn fan_runs_on_interval_for_duration() {
        let mut cfg = FanSettings {
            interval_ms: 60_000,
            duration_ms: 10_000,
            manual: false,
            state: false,
        };
        let mut fan = FanTimer::default();

        assert!(!fan.step(&mut cfg, false, MonoMs(0)));
        assert!(!fan.step(&mut cfg, false, MonoMs(59_999)));
        assert!(fan.step(&mut cfg, false, MonoMs(60_000)));
        assert!(cfg.state);
        assert!(!fan.step(&mut cfg, false, MonoMs(69_999)));
        assert!(fan.step(&mut cfg, false, MonoMs(70_000)));
        assert!(!cfg.state);
        assert!(fan.step(&mut cfg, false, MonoMs(130_000)));
    }

    #[test]
    fn fog_holds_fan_on_past_duration() {
        let mut cfg = FanSettings {
            interval_ms: 60_000,
            duration_ms: 10_000,
            manual: false,
            state: false,
        };
        let mut fan = FanTimer::default();

        assert!(fan.step(&mut cfg, true, MonoMs(0)));
        assert!(!fan.step(&mut cfg, true, MonoMs(30_000)));
        assert!(cfg.state);
        // Fog ends long after the duration: fan stops right away.
        assert!(fan.step(&mut cfg, false, MonoMs(31_000)));
        assert!(!cfg.state);
    }
}
