//! Boot-time reconciliation of persisted watering state against the clock.
//!
//! Runs once, before the first control tick, and only ever shortens or ends
//! activities whose deadlines passed while the controller was down.

use crate::{
    clock::{TickTime, UnixTime},
    config::{LevelSettings, Settings, WateringSettings},
    types::WateringMode,
    watering,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    FogStopped,
    DayRolledOver,
    MorningAbandoned,
    MorningPulseResumed,
    MorningPulseEnded,
    MorningPulseStarted,
    MorningCompleted,
    MorningWindowPassed,
    CycleResumed(WateringMode),
    CycleStopped(WateringMode),
    ForcedFinished,
    ForcedResumed,
    OverrideHeld,
}

impl RecoveryStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FogStopped => "fog_stopped",
            Self::DayRolledOver => "day_rolled_over",
            Self::MorningAbandoned => "morning_abandoned",
            Self::MorningPulseResumed => "morning_pulse_resumed",
            Self::MorningPulseEnded => "morning_pulse_ended",
            Self::MorningPulseStarted => "morning_pulse_started",
            Self::MorningCompleted => "morning_completed",
            Self::MorningWindowPassed => "morning_window_passed",
            Self::CycleResumed(_) => "cycle_resumed",
            Self::CycleStopped(_) => "cycle_stopped",
            Self::ForcedFinished => "forced_finished",
            Self::ForcedResumed => "forced_resumed",
            Self::OverrideHeld => "override_held",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub steps: Vec<RecoveryStep>,
}

impl RecoveryReport {
    /// True when persisted state was altered and should be saved.
    pub fn changed(&self) -> bool {
        self.steps.iter().any(|step| {
            !matches!(
                step,
                RecoveryStep::MorningPulseResumed
                    | RecoveryStep::CycleResumed(_)
                    | RecoveryStep::ForcedResumed
                    | RecoveryStep::OverrideHeld
            )
        })
    }

    pub fn summary(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.as_str()).collect()
    }
}

/// Pure given its inputs: no previous session state is consulted.
pub fn recover(
    settings: &mut Settings,
    level: f32,
    now: &TickTime,
    morning_grace_ms: u64,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    // Fog never resumes mid-cycle.
    if settings.fog.state || settings.fog.force_on {
        settings.fog.state = false;
        settings.fog.force_on = false;
        report.steps.push(RecoveryStep::FogStopped);
    }

    let watering = &mut settings.watering;
    if watering::roll_over_day(watering, now.local.day) {
        report.steps.push(RecoveryStep::DayRolledOver);
    }

    recover_morning(watering, &settings.level, now, &mut report);
    close_morning_window(watering, &settings.level, now, morning_grace_ms, &mut report);
    recover_cycle(watering, now.unix, &mut report);
    recover_forced(watering, &settings.level, level, now.unix, &mut report);

    if watering.override_active {
        watering.pump_on = false;
        report.steps.push(RecoveryStep::OverrideHeld);
    }

    report
}

fn recover_morning(
    cfg: &mut WateringSettings,
    level_cfg: &LevelSettings,
    now: &TickTime,
    report: &mut RecoveryReport,
) {
    if !cfg.morning.active {
        return;
    }

    let last_start = cfg.morning.last_start;
    if last_start < now.start_of_day() || last_start > now.unix {
        cfg.morning.active = false;
        cfg.morning.pulse_on = false;
        report.steps.push(RecoveryStep::MorningAbandoned);
        return;
    }

    if cfg.morning.pulse_on {
        if !now.unix.has_elapsed(last_start, cfg.morning_duration_ms) {
            report.steps.push(RecoveryStep::MorningPulseResumed);
            return;
        }
        cfg.morning.pulse_on = false;
        cfg.morning.last_end = last_start.plus_ms(cfg.morning_duration_ms);
        report.steps.push(RecoveryStep::MorningPulseEnded);
    }

    if cfg.morning.current_pulse >= cfg.morning_count {
        watering::complete_morning(cfg, level_cfg, None, now.unix);
        report.steps.push(RecoveryStep::MorningCompleted);
    } else if now.unix.has_elapsed(last_start, cfg.morning_interval_ms) {
        cfg.morning.pulse_on = true;
        cfg.morning.current_pulse += 1;
        cfg.morning.last_start = now.unix;
        cfg.cycle_count = cfg.cycle_count.saturating_add(1).min(cfg.max_cycles);
        report.steps.push(RecoveryStep::MorningPulseStarted);
    }
}

fn close_morning_window(
    cfg: &mut WateringSettings,
    level_cfg: &LevelSettings,
    now: &TickTime,
    grace_ms: u64,
    report: &mut RecoveryReport,
) {
    if !cfg.morning.active {
        return;
    }
    let seconds = u64::from(now.local.seconds_of_day());
    if seconds >= watering::morning_end_seconds(cfg, grace_ms) {
        watering::complete_morning(cfg, level_cfg, None, now.unix);
        report.steps.push(RecoveryStep::MorningWindowPassed);
    }
}

fn recover_cycle(cfg: &mut WateringSettings, now: UnixTime, report: &mut RecoveryReport) {
    if !cfg.pump_on {
        return;
    }

    let run_ms = match cfg.mode {
        WateringMode::Auto => Some(cfg.pump_time_ms),
        WateringMode::Manual => Some(cfg.manual_duration_ms),
        WateringMode::Forced | WateringMode::Off => None,
    };
    let resume = !cfg.morning.active
        && run_ms.is_some_and(|run_ms| {
            now.secs_since(cfg.last_watering_start)
                .is_some_and(|secs| secs.saturating_mul(1_000) < run_ms)
        });

    if resume {
        report.steps.push(RecoveryStep::CycleResumed(cfg.mode));
    } else {
        cfg.pump_on = false;
        report.steps.push(RecoveryStep::CycleStopped(cfg.mode));
    }
}

fn recover_forced(
    cfg: &mut WateringSettings,
    level_cfg: &LevelSettings,
    level: f32,
    now: UnixTime,
    report: &mut RecoveryReport,
) {
    if !cfg.forced.active {
        return;
    }

    // Mix and fill resolve on their own; the outer end only closes the
    // cycle once neither is pending.
    watering::settle_forced_phases(cfg, level_cfg, level, now);
    let forced = &cfg.forced;
    if watering::forced_ended(forced, now) && !forced.mix_active && !forced.fill_active {
        watering::finish_forced(cfg, now, false);
        report.steps.push(RecoveryStep::ForcedFinished);
        return;
    }

    report.steps.push(RecoveryStep::ForcedResumed);
}
