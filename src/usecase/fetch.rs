use std::collections::VecDeque;
use std::iter::Enumerate;
use std::slice;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::domain::review::{DashboardEntry, ReviewState};
use crate::domain::stats::Statistics;
use crate::repo::{BackendError, ReviewBackend};
use crate::usecase::classify::classify;

pub struct Account {
    name: String,
    backend: Box<dyn ReviewBackend>,
}

impl Account {
    pub fn new(name: impl Into<String>, backend: impl ReviewBackend + 'static) -> Self {
        Self {
            name: name.into(),
            backend: Box::new(backend),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("account '{account}': {source}")]
pub struct AccountError {
    pub account: String,
    #[source]
    pub source: BackendError,
}

pub type FetchItem = Result<DashboardEntry, AccountError>;

pub trait PullRequestSource: Send + Sync {
    fn fetch(&self, requested: ReviewState) -> BoxStream<'_, FetchItem>;
}

pub struct ReviewSource {
    accounts: Vec<Account>,
    statistics: UnboundedSender<Statistics>,
}

impl ReviewSource {
    pub fn new(accounts: Vec<Account>, statistics: UnboundedSender<Statistics>) -> Self {
        Self {
            accounts,
            statistics,
        }
    }
}

impl PullRequestSource for ReviewSource {
    fn fetch(&self, requested: ReviewState) -> BoxStream<'_, FetchItem> {
        info!(
            event = "dash.fetch.cycle_started",
            requested = %requested,
            accounts = self.accounts.len()
        );
        let cycle = Cycle {
            accounts: self.accounts.iter().enumerate(),
            requested,
            totals: Statistics::default(),
            pending: VecDeque::new(),
            publish_when_drained: false,
            statistics: &self.statistics,
        };
        stream::unfold(cycle, |mut cycle| async move {
            let item = cycle.next_item().await?;
            Some((item, cycle))
        })
        .boxed()
    }
}

struct Cycle<'a> {
    accounts: Enumerate<slice::Iter<'a, Account>>,
    requested: ReviewState,
    totals: Statistics,
    pending: VecDeque<DashboardEntry>,
    publish_when_drained: bool,
    statistics: &'a UnboundedSender<Statistics>,
}

impl Cycle<'_> {
    async fn next_item(&mut self) -> Option<FetchItem> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            if std::mem::take(&mut self.publish_when_drained) {
                self.publish();
            }

            let (index, account) = self.accounts.next()?;
            match load_account(index, account, self.requested).await {
                Ok(batch) => {
                    self.totals.merge(&batch.tally);
                    self.pending.extend(batch.entries);
                    self.publish_when_drained = true;
                }
                Err(source) => {
                    warn!(
                        event = "dash.fetch.account_failed",
                        account = %account.name,
                        error = %source
                    );
                    return Some(Err(AccountError {
                        account: account.name.clone(),
                        source,
                    }));
                }
            }
        }
    }

    fn publish(&self) {
        // A closed receiver only means nobody is watching the counters anymore.
        let _ = self.statistics.send(self.totals);
    }
}

struct AccountBatch {
    entries: Vec<DashboardEntry>,
    tally: Statistics,
}

async fn load_account(
    index: usize,
    account: &Account,
    requested: ReviewState,
) -> Result<AccountBatch, BackendError> {
    let connection = account.backend.connect().await?;
    let current_user = connection.current_user().await?;
    let hits = connection.search_active_reviews(&current_user).await?;
    drop(connection);

    let mut tally = Statistics::default();
    let mut entries = Vec::new();
    for hit in hits {
        let review = match hit {
            Ok(review) => review,
            Err(malformed) => {
                warn!(
                    event = "dash.fetch.review_malformed",
                    account = %account.name,
                    error = %malformed
                );
                continue;
            }
        };
        let Some(state) = classify(&review, &current_user) else {
            debug!(
                event = "dash.fetch.review_skipped",
                account = %account.name,
                id = review.id
            );
            continue;
        };
        tally.record(state);
        if state == requested {
            entries.push(DashboardEntry {
                account: account.name.clone(),
                account_index: index,
                state,
                review,
            });
        }
    }

    info!(
        event = "dash.fetch.account_completed",
        account = %account.name,
        user = %current_user,
        classified = tally.total(),
        matched = entries.len()
    );
    Ok(AccountBatch { entries, tally })
}
