//! Static allow-list of card holders.
//!
//! Lookup is a single hash probe on the normalized card id. An entry can be
//! deactivated without removing it, and can carry a weekly schedule.

use chrono::{DateTime, TimeZone};
use sheargate_core::{
    CardEntryConfig, CardId, Error, WeeklySchedule,
    constants::{REASON_DEACTIVATED, REASON_GRANTED, REASON_NOT_FOUND, REASON_OUTSIDE_HOURS},
};
use std::collections::HashMap;

/// Outcome of an allow-list lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Granted,
    Denied(&'static str),
}

impl Verdict {
    pub fn is_granted(self) -> bool {
        matches!(self, Verdict::Granted)
    }

    /// Reason recorded with the decision.
    pub fn reason(self) -> &'static str {
        match self {
            Verdict::Granted => REASON_GRANTED,
            Verdict::Denied(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardEntry {
    pub name: Option<String>,
    pub active: bool,
    pub schedule: Option<WeeklySchedule>,
}

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashMap<CardId, CardEntry>,
}

impl AllowList {
    /// Build the list from configuration entries.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the same card id appears twice.
    pub fn from_config(cards: &[CardEntryConfig]) -> Result<Self, Error> {
        let mut entries = HashMap::with_capacity(cards.len());
        for card in cards {
            let entry = CardEntry {
                name: card.name.clone(),
                active: card.active,
                schedule: card.schedule.clone(),
            };
            if entries.insert(card.id.clone(), entry).is_some() {
                return Err(Error::Config(format!("duplicate card id {}", card.id)));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, card: &CardId) -> Option<&CardEntry> {
        self.entries.get(card)
    }

    /// Decide whether `card` may enter at `at` (local wall-clock time for
    /// schedules).
    pub fn authorize<Tz: TimeZone>(&self, card: &CardId, at: &DateTime<Tz>) -> Verdict {
        let Some(entry) = self.entries.get(card) else {
            return Verdict::Denied(REASON_NOT_FOUND);
        };
        if !entry.active {
            return Verdict::Denied(REASON_DEACTIVATED);
        }
        match &entry.schedule {
            Some(schedule) if !schedule.allows(at) => Verdict::Denied(REASON_OUTSIDE_HOURS),
            _ => Verdict::Granted,
        }
    }
}
