use crate::clock::MonoMs;

/// Rate limit for settings writes.
///
/// A request inside the cooldown is held, not dropped; the first reason
/// requested since the last save is the one reported.
#[derive(Debug, Clone)]
pub struct SaveThrottle {
    cooldown_ms: u64,
    last_save: Option<MonoMs>,
    pending: Option<&'static str>,
}

impl SaveThrottle {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            last_save: None,
            pending: None,
        }
    }

    pub fn request(&mut self, reason: &'static str) {
        self.pending.get_or_insert(reason);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the reason to save with, or `None` when nothing is due yet.
    pub fn try_save(&mut self, now: MonoMs) -> Option<&'static str> {
        self.pending?;
        let cooled = self
            .last_save
            .map(|last| now.elapsed_since(last) >= self.cooldown_ms)
            .unwrap_or(true);
        if !cooled {
            return None;
        }
        self.last_save = Some(now);
        self.pending.take()
    }

    /// Marks a failed write so the next allowed tick saves again.
    pub fn requeue(&mut self, reason: &'static str) {
        self.request(reason);
    }
}
