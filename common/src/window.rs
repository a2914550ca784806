use crate::{
    climate::map_range,
    clock::MonoMs,
    config::{ClimateSettings, GeneralSettings, WindowSettings},
    types::{EngineAction, WindowDirection},
};

/// Below this temperature a high-wind lockout closes the window completely.
const HIGH_WIND_CLOSE_BELOW_TEMP: f32 = 27.0;
const HIGH_WIND_MAX_POSITION: i32 = 5;
const LOW_WIND_MAX_POSITION: i32 = 20;

/// Latches a lockout whenever wind exceeds either threshold.
#[derive(Debug, Clone, Default)]
pub struct WindMonitor {
    restricted: bool,
    lock_start: Option<MonoMs>,
}

impl WindMonitor {
    pub fn restricted(&self) -> bool {
        self.restricted
    }

    /// Returns true when the lockout flag changed.
    pub fn update(&mut self, wind: f32, general: &GeneralSettings, now: MonoMs) -> bool {
        let before = self.restricted;

        if wind > general.wind_low || wind > general.wind_high {
            self.lock_start = Some(now);
            self.restricted = true;
        }

        if let Some(start) = self.lock_start {
            let lock_ms = u64::from(general.wind_lock_minutes) * 60_000;
            if now.elapsed_since(start) > lock_ms {
                self.restricted = false;
                self.lock_start = None;
            }
        }

        before != self.restricted
    }
}

/// Climate and wind inputs for one window recomputation.
#[derive(Debug, Clone, Copy)]
pub struct WindowInput {
    pub temp: f32,
    pub humidity: f32,
    pub wind: f32,
    pub restricted: bool,
    /// Night offset applied to the temperature bounds.
    pub shift: f32,
}

/// Target opening in percent.
pub fn target_position(climate: &ClimateSettings, general: &GeneralSettings, input: &WindowInput) -> u8 {
    let min_temp = climate.min_temp + input.shift;
    let max_temp = climate.max_temp + input.shift;

    let t_target = map_range(input.temp, min_temp, max_temp, 0.0, 100.0);
    let h_target = map_range(
        input.humidity,
        climate.min_humidity,
        climate.max_humidity,
        100.0,
        0.0,
    );
    let mut target = t_target.max(h_target).round() as i32;

    // Cold outranks a humidity-driven opening.
    if input.temp < min_temp && h_target > t_target {
        target = 0;
    }

    if input.restricted {
        if input.wind > general.wind_high && input.temp < HIGH_WIND_CLOSE_BELOW_TEMP {
            target = 0;
        } else if input.wind > general.wind_high {
            target = target.min(HIGH_WIND_MAX_POSITION);
        } else if input.wind > general.wind_low {
            target = target.min(LOW_WIND_MAX_POSITION);
        }
    }

    target.clamp(0, 100) as u8
}

/// Tuning for window moves.
#[derive(Debug, Clone, Copy)]
pub struct WindowTuning {
    pub min_reissue_ms: u64,
    pub temp_hysteresis: f32,
    pub humidity_hysteresis: f32,
    pub extra_close_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    until: MonoMs,
}

/// Open-loop position estimate and move sequencing for the roof window.
#[derive(Debug, Clone)]
pub struct WindowController {
    position: u8,
    motion: Option<Motion>,
    last_move_cmd: Option<MonoMs>,
    last_temp: f32,
    last_humidity: f32,
    prev_restricted: bool,
    recalc_pending: bool,
}

impl Default for WindowController {
    fn default() -> Self {
        Self {
            position: 0,
            motion: None,
            last_move_cmd: None,
            last_temp: f32::NAN,
            last_humidity: f32::NAN,
            prev_restricted: false,
            recalc_pending: false,
        }
    }
}

impl WindowController {
    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn is_moving(&self) -> bool {
        self.motion.is_some()
    }

    /// Forces a recomputation on the next automatic step.
    pub fn request_recalc(&mut self) {
        self.recalc_pending = true;
    }

    /// Drives the window fully closed to establish a known position.
    pub fn calibrate(
        &mut self,
        cfg: &WindowSettings,
        tuning: &WindowTuning,
        now: MonoMs,
    ) -> EngineAction {
        let duration_ms = cfg.close_time_ms.saturating_add(tuning.extra_close_ms);
        self.position = 0;
        self.motion = Some(Motion {
            until: now.plus(duration_ms),
        });
        self.last_move_cmd = Some(now);
        self.recalc_pending = true;
        EngineAction::WindowMove {
            direction: WindowDirection::Down,
            duration_ms,
        }
    }

    /// Emits a stop once the running move's deadline has passed.
    pub fn poll_motion(&mut self, now: MonoMs) -> Option<EngineAction> {
        let motion = self.motion?;
        if now < motion.until {
            return None;
        }
        self.motion = None;
        Some(EngineAction::WindowStop)
    }

    fn move_to(
        &mut self,
        target: u8,
        cfg: &WindowSettings,
        tuning: &WindowTuning,
        now: MonoMs,
    ) -> EngineAction {
        let opening = target > self.position;
        let delta = u64::from(target.abs_diff(self.position));
        let full_ms = if opening {
            cfg.open_time_ms
        } else {
            cfg.close_time_ms
        };
        let mut duration_ms = delta * full_ms / 100;
        if !opening && target == 0 {
            duration_ms += tuning.extra_close_ms;
        }

        self.position = target;
        self.motion = Some(Motion {
            until: now.plus(duration_ms),
        });
        self.last_move_cmd = Some(now);

        EngineAction::WindowMove {
            direction: if opening {
                WindowDirection::Up
            } else {
                WindowDirection::Down
            },
            duration_ms,
        }
    }

    /// Automatic control. Returns a move command when one is issued.
    pub fn step(
        &mut self,
        settings: (&WindowSettings, &ClimateSettings, &GeneralSettings),
        input: &WindowInput,
        tuning: &WindowTuning,
        now: MonoMs,
    ) -> Option<EngineAction> {
        let (cfg, climate, general) = settings;

        if input.restricted != self.prev_restricted {
            self.prev_restricted = input.restricted;
            self.recalc_pending = true;
        }

        if cfg.manual || !input.temp.is_finite() || !input.humidity.is_finite() {
            return None;
        }

        let drifted = !self.last_temp.is_finite()
            || !self.last_humidity.is_finite()
            || (input.temp - self.last_temp).abs() >= tuning.temp_hysteresis
            || (input.humidity - self.last_humidity).abs() >= tuning.humidity_hysteresis;
        if !drifted && !self.recalc_pending {
            return None;
        }

        let target = target_position(climate, general, input);
        if target == self.position {
            self.settle(input);
            return None;
        }

        let reissue_ok = self
            .last_move_cmd
            .map(|last| now.elapsed_since(last) >= tuning.min_reissue_ms)
            .unwrap_or(true);
        if self.is_moving() || !reissue_ok {
            // Keep the old reference values so the move is retried.
            return None;
        }

        self.settle(input);
        Some(self.move_to(target, cfg, tuning, now))
    }

    fn settle(&mut self, input: &WindowInput) {
        self.last_temp = input.temp;
        self.last_humidity = input.humidity;
        self.recalc_pending = false;
    }

    /// Operator jog. The position estimate follows the travel time.
    pub fn manual_move(
        &mut self,
        direction: WindowDirection,
        duration_ms: Option<u64>,
        cfg: &WindowSettings,
        now: MonoMs,
    ) -> EngineAction {
        let full_ms = match direction {
            WindowDirection::Up => cfg.open_time_ms,
            WindowDirection::Down => cfg.close_time_ms,
        }
        .max(1);
        let duration_ms = duration_ms.unwrap_or(full_ms);
        let travel = (duration_ms.saturating_mul(100) / full_ms).min(100) as u8;
        self.position = match direction {
            WindowDirection::Up => self.position.saturating_add(travel).min(100),
            WindowDirection::Down => self.position.saturating_sub(travel),
        };
        self.motion = Some(Motion {
            until: now.plus(duration_ms),
        });
        self.last_move_cmd = Some(now);
        EngineAction::WindowMove {
            direction,
            duration_ms,
        }
    }

    pub fn stop(&mut self) -> EngineAction {
        self.motion = None;
        EngineAction::WindowStop
    }
}
