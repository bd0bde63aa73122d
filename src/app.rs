use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::domain::review::{DashboardEntry, ReviewState};
use crate::domain::stats::Statistics;
use crate::usecase::fetch::AccountError;
use crate::usecase::refresh::{Pumped, RefreshEngine, RefreshNotice};

pub struct App {
    engine: RefreshEngine,
    statistics_rx: UnboundedReceiver<Statistics>,
    pub filter: ReviewState,
    pub statistics: Statistics,
    pub account_errors: Vec<AccountError>,
    pub status: Option<String>,
    pub show_help: bool,
}

impl App {
    pub fn new(engine: RefreshEngine, statistics_rx: UnboundedReceiver<Statistics>) -> Self {
        Self {
            engine,
            statistics_rx,
            filter: ReviewState::Actionable,
            statistics: Statistics::default(),
            account_errors: Vec::new(),
            status: None,
            show_help: false,
        }
    }

    pub fn entries(&self) -> &[DashboardEntry] {
        self.engine.entries()
    }

    pub fn selected(&self) -> usize {
        self.engine.selected_index()
    }

    pub fn is_refreshing(&self) -> bool {
        self.engine.is_refreshing()
    }

    pub fn select_next(&mut self) {
        self.engine.select_next();
    }

    pub fn select_previous(&mut self) {
        self.engine.select_previous();
    }

    pub fn refresh(&mut self) {
        if self.engine.refresh(self.filter) {
            self.cycle_started();
        } else {
            self.set_status("Refresh already in progress");
        }
    }

    /// Ignored while a refresh is running.
    pub fn switch_filter(&mut self, filter: ReviewState) {
        if self.engine.refresh(filter) {
            self.filter = filter;
            self.cycle_started();
        } else {
            self.set_status(&format!(
                "Refresh in progress; still showing {}",
                self.filter.label()
            ));
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.engine.tick(now, self.filter) {
            self.cycle_started();
        }
    }

    fn cycle_started(&mut self) {
        self.statistics = Statistics::default();
        self.account_errors.clear();
        self.status = None;
    }

    /// Apply one pending refresh event. Returns `false` when nothing was pending.
    pub fn apply_next_event(&mut self) -> bool {
        let pumped = self.engine.pump();
        // Snapshots of a cycle are sent before its Finished event.
        self.drain_statistics();
        let Some(pumped) = pumped else {
            return false;
        };
        match pumped {
            Pumped::Inserted => {}
            Pumped::Notice(RefreshNotice::AccountFailed(err)) => self.account_errors.push(err),
            Pumped::Notice(RefreshNotice::Finished(Ok(_))) => {}
            Pumped::Notice(RefreshNotice::Finished(Err(err))) => {
                self.set_status(&err.to_string());
            }
        }
        true
    }

    fn drain_statistics(&mut self) {
        while let Ok(snapshot) = self.statistics_rx.try_recv() {
            self.statistics = snapshot;
        }
    }

    pub fn open_selected(&mut self) {
        let Some(url) = self.engine.selected().map(|e| e.review.url.clone()) else {
            return;
        };
        match open::that(&url) {
            Ok(()) => {
                info!(event = "dash.ui.opened", url = %url);
                self.set_status(&format!("Opened {url}"));
            }
            Err(e) => {
                warn!(event = "dash.ui.open_failed", url = %url, error = %e);
                self.set_status(&format!("Failed to open {url}: {e}"));
            }
        }
    }

    pub fn status_line(&self) -> Option<String> {
        if let Some(status) = &self.status {
            return Some(status.clone());
        }
        if self.account_errors.is_empty() {
            return None;
        }
        let errors: Vec<String> = self.account_errors.iter().map(ToString::to_string).collect();
        Some(errors.join(" | "))
    }

    pub fn set_status(&mut self, msg: &str) {
        self.status = Some(msg.to_string());
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
