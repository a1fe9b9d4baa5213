//! Usage statistics with daily rollover.
//!
//! Counters roll over lazily: every event and every stats read first checks
//! whether the calendar day changed since the last reset. A gap of several
//! days rotates the weekly rings once per elapsed day.

use crate::onebot::UserId;
use crate::store::Store;
use chrono::{Local, NaiveDate};
use qqbot_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Number of daily slots in the weekly rings.
pub const WEEK_DAYS: usize = 7;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Persisted counters. Weekly rings are oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageStats {
    pub total_messages: u64,
    pub today_messages: u64,
    pub total_tokens: u64,
    pub today_tokens: u64,
    pub weekly_messages: Vec<u64>,
    pub weekly_tokens: Vec<u64>,
    pub model_usage: BTreeMap<String, u64>,
    /// Local calendar day of the last reset, `YYYY-MM-DD`
    pub last_reset_date: String,
    /// Users seen today
    pub active_users: BTreeSet<UserId>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::starting(Local::now().date_naive())
    }
}

impl UsageStats {
    /// Empty counters whose current day is `today`.
    pub fn starting(today: NaiveDate) -> Self {
        Self {
            total_messages: 0,
            today_messages: 0,
            total_tokens: 0,
            today_tokens: 0,
            weekly_messages: vec![0; WEEK_DAYS],
            weekly_tokens: vec![0; WEEK_DAYS],
            model_usage: BTreeMap::new(),
            last_reset_date: today.format(DATE_FORMAT).to_string(),
            active_users: BTreeSet::new(),
        }
    }

    /// Force both weekly rings to exactly seven slots, keeping the newest.
    pub fn normalize(&mut self) {
        for ring in [&mut self.weekly_messages, &mut self.weekly_tokens] {
            if ring.len() > WEEK_DAYS {
                ring.drain(..ring.len() - WEEK_DAYS);
            }
            while ring.len() < WEEK_DAYS {
                ring.insert(0, 0);
            }
        }
    }

    /// Roll the counters forward to `today`. Returns whether anything changed.
    ///
    /// The day being closed lands in the newest weekly slot; each further
    /// elapsed day adds an empty slot. An unreadable or future reset date
    /// counts as a single elapsed day.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        let elapsed = match NaiveDate::parse_from_str(&self.last_reset_date, DATE_FORMAT) {
            Ok(last) if last == today => return false,
            Ok(last) if last < today => (today - last).num_days(),
            _ => 1,
        };

        let mut closing = (self.today_messages, self.today_tokens);
        for _ in 0..elapsed.min(WEEK_DAYS as i64) {
            push_slot(&mut self.weekly_messages, closing.0);
            push_slot(&mut self.weekly_tokens, closing.1);
            closing = (0, 0);
        }

        self.today_messages = 0;
        self.today_tokens = 0;
        self.active_users.clear();
        self.last_reset_date = today.format(DATE_FORMAT).to_string();
        true
    }

    /// Count one completed exchange.
    pub fn record_exchange(&mut self, user_id: UserId, model: &str, tokens: u64) {
        self.total_messages += 1;
        self.today_messages += 1;
        self.total_tokens += tokens;
        self.today_tokens += tokens;
        *self.model_usage.entry(model.to_string()).or_insert(0) += 1;
        self.active_users.insert(user_id);
    }
}

fn push_slot(ring: &mut Vec<u64>, value: u64) {
    if ring.len() >= WEEK_DAYS {
        ring.remove(0);
    }
    ring.push(value);
}

/// Shared, lock-guarded usage statistics.
///
/// Rollover and counter updates happen under one lock, and the snapshot is
/// persisted while it is held so stored snapshots never go backwards.
pub struct StatsTracker {
    stats: Mutex<UsageStats>,
    store: Arc<dyn Store>,
}

impl StatsTracker {
    pub async fn load(store: Arc<dyn Store>) -> Result<Self> {
        let mut stats = store.load_stats().await?.unwrap_or_default();
        stats.normalize();
        Ok(Self {
            stats: Mutex::new(stats),
            store,
        })
    }

    /// Roll over to `today` if the day changed, persisting the result.
    pub async fn check_rollover(&self, today: NaiveDate) -> bool {
        let mut stats = self.stats.lock().await;
        if !stats.roll_over(today) {
            return false;
        }
        tracing::info!(date = %stats.last_reset_date, "Daily stats rollover");
        self.persist(&stats).await;
        true
    }

    /// Record an exchange, rolling over first.
    pub async fn record_exchange(
        &self,
        today: NaiveDate,
        user_id: UserId,
        model: &str,
        tokens: u64,
    ) {
        let mut stats = self.stats.lock().await;
        stats.roll_over(today);
        stats.record_exchange(user_id, model, tokens);
        self.persist(&stats).await;
    }

    /// Current counters after rollover.
    pub async fn snapshot(&self, today: NaiveDate) -> UsageStats {
        self.check_rollover(today).await;
        self.stats.lock().await.clone()
    }

    async fn persist(&self, stats: &UsageStats) {
        if let Err(e) = self.store.save_stats(stats).await {
            tracing::error!(error = %e, "Failed to save stats");
        }
    }
}

/// Today's local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
