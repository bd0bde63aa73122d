use super::review::ReviewState;

/// Per-state counts of the reviews classified during one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub actionable: u32,
    pub waiting: u32,
    pub drafts: u32,
    pub signed_off: u32,
}

impl Statistics {
    pub fn record(&mut self, state: ReviewState) {
        let slot = match state {
            ReviewState::Actionable => &mut self.actionable,
            ReviewState::Waiting => &mut self.waiting,
            ReviewState::Draft => &mut self.drafts,
            ReviewState::SignedOff => &mut self.signed_off,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn count(&self, state: ReviewState) -> u32 {
        match state {
            ReviewState::Actionable => self.actionable,
            ReviewState::Waiting => self.waiting,
            ReviewState::Draft => self.drafts,
            ReviewState::SignedOff => self.signed_off,
        }
    }

    pub fn merge(&mut self, other: &Statistics) {
        self.actionable = self.actionable.saturating_add(other.actionable);
        self.waiting = self.waiting.saturating_add(other.waiting);
        self.drafts = self.drafts.saturating_add(other.drafts);
        self.signed_off = self.signed_off.saturating_add(other.signed_off);
    }

    pub fn total(&self) -> u32 {
        ReviewState::ALL.iter().map(|s| self.count(*s)).sum()
    }
}
