use chrono::{DateTime, TimeZone, Timelike};
use log::{debug, info};

use crate::config::{parse_hour, GateConfig};
use crate::error::Result;

/// Optional daily activation window in local wall-clock time.
///
/// A missing end bound means the window stays open for the rest of the day;
/// a missing start bound means it is open from midnight.
#[derive(Debug, Clone, Copy)]
struct HourWindow {
    start: Option<(u32, u32)>,
    end: Option<(u32, u32)>,
}

impl HourWindow {
    fn contains(&self, hour: u32, minute: u32) -> bool {
        let start_ok = match self.start {
            None => true,
            Some((h, m)) => hour > h || (hour == h && minute >= m),
        };
        let end_ok = match self.end {
            None => true,
            Some((h, m)) => hour < h || (hour == h && minute < m),
        };
        start_ok && end_ok
    }
}

/// Composite time-window, daily-hour and quota policy deciding whether
/// detection is active.
///
/// The gate is owned and mutated by the trigger state machine only; the day
/// rollover observer resets the quota once per local day.
pub struct Gate {
    config: GateConfig,
    hour_window: HourWindow,
    remaining_triggers: u32,
}

impl Gate {
    pub fn new(config: GateConfig) -> Result<Self> {
        let start = config
            .start_hour
            .as_deref()
            .map(|h| parse_hour("gate.start_hour", h))
            .transpose()?;
        let end = config
            .end_hour
            .as_deref()
            .map(|h| parse_hour("gate.end_hour", h))
            .transpose()?;
        let remaining_triggers = config.trigger_quota;
        Ok(Self {
            config,
            hour_window: HourWindow { start, end },
            remaining_triggers,
        })
    }

    /// True iff `now` is before the deactivation deadline, triggers remain,
    /// the absolute activation window has started and the local wall-clock
    /// hour falls within the optional daily window.
    pub fn is_active<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let millis = now.timestamp_millis();
        if millis >= self.config.date_end.timestamp_millis() {
            return false;
        }
        if self.remaining_triggers == 0 {
            return false;
        }
        if millis < self.config.date_start.timestamp_millis() {
            return false;
        }
        self.hour_window.contains(now.hour(), now.minute())
    }

    /// True once the deactivation deadline has passed. There is no
    /// re-activation path; the caller stops retaining frames permanently.
    pub fn expired<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        now.timestamp_millis() >= self.config.date_end.timestamp_millis()
    }

    /// Reset the quota at local-day rollover.
    pub fn on_day_rollover(&mut self) {
        info!(
            "day rollover, trigger counter reset to {}",
            self.config.trigger_quota
        );
        self.remaining_triggers = self.config.trigger_quota;
    }

    /// Decrement the quota; never goes below zero.
    pub fn consume_trigger(&mut self) {
        self.remaining_triggers = self.remaining_triggers.saturating_sub(1);
        debug!("trigger consumed, {} remaining", self.remaining_triggers);
    }

    pub fn remaining_triggers(&self) -> u32 {
        self.remaining_triggers
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}
