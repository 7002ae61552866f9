//! One unlock cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheargate_core::CardId;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unlocking,
    Unlocked,
    Relocking,
    Closed,
}

/// An active unlock cycle, from a granted decision (or a manual unlock
/// request) until relock completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessSession {
    pub id: Uuid,
    /// `None` for a manual unlock.
    pub card_id: Option<CardId>,
    pub opened_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
}

impl AccessSession {
    /// Open a session for a granted card that expires `window` from now.
    pub fn open(card_id: CardId, window: Duration) -> Self {
        Self::start(Some(card_id), window)
    }

    /// Open a session requested through the control surface.
    pub fn manual(window: Duration) -> Self {
        Self::start(None, window)
    }

    fn start(card_id: Option<CardId>, window: Duration) -> Self {
        let opened_at = Utc::now();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        Self {
            id: Uuid::new_v4(),
            card_id,
            opened_at,
            expires_at: opened_at.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC),
            state: SessionState::Unlocking,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != SessionState::Closed
    }
}
