use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    clock::{MonoMs, UnixTime},
    types::nan_if_null,
};

pub const HISTORY_CAPACITY: usize = 20;

fn nan() -> f32 {
    f32::NAN
}

/// One trend sample. Readings that were invalid serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: UnixTime,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub temp: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub humidity: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub level: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub wind: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub outdoor_temp: f32,
    #[serde(default = "nan", deserialize_with = "nan_if_null")]
    pub outdoor_humidity: f32,
    pub window_position: u8,
    pub fan: bool,
    pub heat: bool,
    pub pump: bool,
    pub solution_heat: bool,
    pub hydro_mix: bool,
    pub fill: bool,
    pub fog: bool,
}

/// Fixed-capacity ring of trend samples plus its sample/flush cadence.
#[derive(Debug, Clone, Default)]
pub struct HistoryRecorder {
    ring: VecDeque<HistoryEntry>,
    last_sample: Option<MonoMs>,
    last_hour: Option<u8>,
    last_flush: Option<MonoMs>,
}

impl HistoryRecorder {
    /// Restores persisted entries, keeping the newest ones.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        let skip = entries.len().saturating_sub(HISTORY_CAPACITY);
        Self {
            ring: entries.into_iter().skip(skip).collect(),
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.ring.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.ring.len() == HISTORY_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }

    /// True when a new sample is due; the first call only arms the timer.
    pub fn sample_due(&mut self, now: MonoMs, interval_ms: u64) -> bool {
        match self.last_sample {
            Some(last) if now.elapsed_since(last) < interval_ms => false,
            Some(_) => {
                self.last_sample = Some(now);
                true
            }
            None => {
                self.last_sample = Some(now);
                false
            }
        }
    }

    /// True once per local hour change, spaced at least `min_gap_ms` apart.
    pub fn flush_due(&mut self, hour: u8, now: MonoMs, min_gap_ms: u64) -> bool {
        let Some(last_hour) = self.last_hour else {
            self.last_hour = Some(hour);
            return false;
        };
        if last_hour == hour {
            return false;
        }
        let spaced = self
            .last_flush
            .map(|last| now.elapsed_since(last) >= min_gap_ms)
            .unwrap_or(true);
        if !spaced {
            return false;
        }
        self.last_hour = Some(hour);
        self.last_flush = Some(now);
        !self.ring.is_empty()
    }
}
