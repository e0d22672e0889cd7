use chrono::{Duration, NaiveTime};

use crate::config::ConfigError;
use crate::model::{Slot, Span};

/// Cut `[day_start, day_end)` into consecutive slots of `duration_minutes`.
/// A trailing remainder shorter than one slot is dropped.
pub fn generate(
    day_start: NaiveTime,
    day_end: NaiveTime,
    duration_minutes: i64,
) -> Result<Vec<Slot>, ConfigError> {
    if day_start >= day_end {
        return Err(ConfigError::EmptyDay {
            start: day_start,
            end: day_end,
        });
    }
    if duration_minutes <= 0 {
        return Err(ConfigError::NonPositiveDuration(duration_minutes));
    }

    let window_minutes = (day_end - day_start).num_minutes();
    let count = window_minutes / duration_minutes;
    if count == 0 {
        return Err(ConfigError::NoSlots {
            window_minutes,
            duration_minutes,
        });
    }

    let step = Duration::minutes(duration_minutes);
    let mut slots = Vec::with_capacity(count as usize);
    let mut start = day_start;
    for index in 0..count as usize {
        let end = start + step;
        slots.push(Slot {
            index,
            span: Span::new(start, end),
        });
        start = end;
    }
    Ok(slots)
}

/// The validated day grid. Derived from configuration only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    slots: Vec<Slot>,
    duration_minutes: i64,
}

impl SlotGrid {
    pub fn new(
        day_start: NaiveTime,
        day_end: NaiveTime,
        duration_minutes: i64,
    ) -> Result<Self, ConfigError> {
        let slots = generate(day_start, day_end, duration_minutes)?;
        Ok(Self {
            slots,
            duration_minutes,
        })
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_minutes
    }

    pub fn day_start(&self) -> NaiveTime {
        self.slots[0].span.start
    }

    /// End of the last whole slot, which may be earlier than the configured day end.
    pub fn day_end(&self) -> NaiveTime {
        self.slots[self.slots.len() - 1].span.end
    }

    /// The slot starting exactly at `start`.
    pub fn slot_starting_at(&self, start: NaiveTime) -> Option<Slot> {
        self.slots.iter().copied().find(|s| s.span.start == start)
    }

    /// The slot containing `t`.
    pub fn slot_at(&self, t: NaiveTime) -> Option<Slot> {
        self.slots.iter().copied().find(|s| s.span.contains_time(t))
    }

    pub fn slot_by_index(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }
}
