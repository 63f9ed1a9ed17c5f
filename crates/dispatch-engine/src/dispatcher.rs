//! The dispatch loop.
//!
//! One [`Dispatcher::run`] call is one invocation window: ticks aligned to
//! `tick_interval` boundaries until the time budget is spent. Each tick
//! pulls due messages, rate limits them, backfills the batch up to the
//! global ceiling, sends everything concurrently and writes the outcomes
//! back to the store.

use crate::backoff::{backoff_minutes, next_due_at};
use crate::rate_limiter::partition_with_usage;
use crate::DispatchResult;
use futures_util::future::join_all;
use outbound_transport::{SendOutcome, Transport};
use relay_core::{ChatClass, DeferralPolicy, DispatchConfig};
use relay_database::{OutboundMessage, PendingStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runs before every tick with the tick's `now` (epoch ms).
pub type TickHook = Box<dyn Fn(i64) -> DispatchResult<()> + Send + Sync>;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Epoch ms the tick ran at.
    pub now: i64,
    pub selected: usize,
    pub deferred: usize,
    pub sent: usize,
    pub failed: usize,
    /// Backfill queries that returned messages.
    pub fill_rounds: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.selected == 0 && self.deferred == 0
    }
}

/// Totals over one invocation window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: usize,
    pub idle_ticks: usize,
    pub selected: usize,
    pub deferred: usize,
    pub sent: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        if report.is_idle() {
            self.idle_ticks += 1;
        }
        self.selected += report.selected;
        self.deferred += report.deferred;
        self.sent += report.sent;
        self.failed += report.failed;
    }
}

/// Per-tick working state. Nothing here outlives a tick.
#[derive(Default)]
struct TickContext {
    /// Every id selected or deferred this tick.
    seen: HashSet<String>,
    /// Selected count per chat.
    usage: HashMap<String, u32>,
    /// Deferred count per chat, for staggered deferral.
    deferred_per_chat: HashMap<String, u64>,
    /// Classes already warned about this tick.
    warned_classes: HashSet<ChatClass>,
    selected: Vec<OutboundMessage>,
    deferred: usize,
    fill_rounds: usize,
}

/// Rate-limited dispatcher over a pending-message store.
pub struct Dispatcher {
    store: Arc<dyn PendingStore>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    tick_hook: Option<TickHook>,
}

impl Dispatcher {
    /// Create a dispatcher. Fails if `config` cannot drive a loop.
    pub fn new(
        store: Arc<dyn PendingStore>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> DispatchResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            transport,
            config,
            tick_hook: None,
        })
    }

    /// Install a hook that runs before every tick of [`run`](Self::run).
    pub fn with_tick_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(i64) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.tick_hook = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run ticks until `budget` is exhausted.
    ///
    /// The first tick runs immediately; later ticks start on tick-interval
    /// boundaries. The loop returns instead of sleeping past the budget. A
    /// store error ends the run.
    pub async fn run(&self, budget: Duration) -> DispatchResult<RunSummary> {
        let clock = TickClock::start();
        let deadline = clock.origin + budget;
        let tick_ms = self.config.tick_interval_ms;
        let mut summary = RunSummary::default();

        if budget.is_zero() {
            return Ok(summary);
        }

        info!(
            budget_ms = budget.as_millis() as u64,
            tick_ms,
            global_ceiling = self.config.global_ceiling,
            "Dispatch run started"
        );

        loop {
            let now = clock.now_ms();

            if let Some(hook) = &self.tick_hook {
                hook(now)?;
            }

            let report = match self.run_tick(now).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, ticks = summary.ticks, "Dispatch run aborted");
                    return Err(e);
                }
            };
            summary.record(&report);

            let wait = until_next_boundary(clock.now_ms(), tick_ms);
            if Instant::now() + wait > deadline {
                break;
            }
            tokio::time::sleep(wait).await;
        }

        info!(
            ticks = summary.ticks,
            idle_ticks = summary.idle_ticks,
            sent = summary.sent,
            failed = summary.failed,
            deferred = summary.deferred,
            "Dispatch run complete"
        );

        Ok(summary)
    }

    /// Run a single tick at `now` (epoch ms).
    pub async fn run_tick(&self, now: i64) -> DispatchResult<TickReport> {
        let global = self.config.global_ceiling as usize;

        let batch = self.store.query_due(now, global).await?;
        if batch.is_empty() {
            debug!(now, "No messages due");
            return Ok(TickReport {
                now,
                ..Default::default()
            });
        }

        let mut ctx = TickContext::default();
        self.absorb(now, batch, &mut ctx).await?;
        self.fill_up(now, &mut ctx).await?;

        let outcomes = self.send_all(&ctx.selected).await;
        let (sent, failed) = self.apply_outcomes(now, &ctx.selected, outcomes).await?;

        let report = TickReport {
            now,
            selected: ctx.selected.len(),
            deferred: ctx.deferred,
            sent,
            failed,
            fill_rounds: ctx.fill_rounds,
        };

        info!(
            selected = report.selected,
            deferred = report.deferred,
            sent = report.sent,
            failed = report.failed,
            fill_rounds = report.fill_rounds,
            "Tick complete"
        );

        Ok(report)
    }

    /// Rate limit a batch into the tick and persist its deferrals. Returns
    /// how many messages the batch added to the selection.
    async fn absorb(
        &self,
        now: i64,
        batch: Vec<OutboundMessage>,
        ctx: &mut TickContext,
    ) -> DispatchResult<usize> {
        for message in &batch {
            ctx.seen.insert(message.id.clone());
            self.warn_unconfigured(message.chat_class, ctx);
        }

        let partition = partition_with_usage(&batch, &self.config.chat_ceilings, &ctx.usage);
        let added = partition.selected.len();

        for message in partition.selected {
            *ctx.usage.entry(message.chat_id.clone()).or_default() += 1;
            ctx.selected.push(message);
        }

        for message in partition.deferred {
            let rank = ctx
                .deferred_per_chat
                .entry(message.chat_id.clone())
                .or_default();
            let due_at = self.deferred_due_at(&message, *rank);
            *rank += 1;

            self.store.defer_due_at(&message.id, due_at).await?;
            ctx.deferred += 1;

            debug!(
                message_id = %message.id,
                chat_id = %message.chat_id,
                due_at,
                now,
                "Message deferred by rate limit"
            );
        }

        Ok(added)
    }

    /// Backfill the batch from the backlog until it reaches the global
    /// ceiling, nothing else is due, or a round selects nothing.
    ///
    /// Every continuing round adds at least one selection, so a tick runs at
    /// most `global_ceiling + 1` rounds and fetches a bounded number of rows no
    /// matter how deep a single chat's backlog is.
    async fn fill_up(&self, now: i64, ctx: &mut TickContext) -> DispatchResult<()> {
        let global = self.config.global_ceiling as usize;

        while ctx.selected.len() < global {
            let remaining = global - ctx.selected.len();
            let exclude: Vec<String> = ctx.seen.iter().cloned().collect();

            let extra = self
                .store
                .query_due_excluding(now, &exclude, remaining)
                .await?;
            if extra.is_empty() {
                break;
            }

            ctx.fill_rounds += 1;
            debug!(
                round = ctx.fill_rounds,
                fetched = extra.len(),
                remaining,
                "Fill-up round"
            );
            if self.absorb(now, extra, ctx).await? == 0 {
                debug!(round = ctx.fill_rounds, "Fill-up round selected nothing");
                break;
            }
        }

        Ok(())
    }

    /// Send every selected message at once and wait for all outcomes.
    async fn send_all(&self, selected: &[OutboundMessage]) -> Vec<SendOutcome> {
        let timeout = self.config.send_timeout();
        let timeout_ms = self.config.send_timeout_ms;

        let sends = selected.iter().map(|message| async move {
            match tokio::time::timeout(timeout, self.transport.send(message)).await {
                Ok(outcome) => outcome,
                Err(_) => SendOutcome::failed(format!("send timed out after {timeout_ms} ms")),
            }
        });

        join_all(sends).await
    }

    /// Persist send outcomes. Returns `(sent, failed)`.
    async fn apply_outcomes(
        &self,
        now: i64,
        selected: &[OutboundMessage],
        outcomes: Vec<SendOutcome>,
    ) -> DispatchResult<(usize, usize)> {
        let mut sent = 0;
        let mut failed = 0;

        for (message, outcome) in selected.iter().zip(outcomes) {
            match outcome {
                SendOutcome::Delivered => {
                    if !self.store.mark_dispatched(&message.id).await? {
                        debug!(message_id = %message.id, "Message was already dispatched");
                    }
                    sent += 1;
                }
                SendOutcome::Failed { reason } => {
                    let attempts = message.attempts.saturating_add(1);
                    let retry_in_minutes =
                        backoff_minutes(attempts, self.config.backoff_cap_minutes);
                    let due_at = next_due_at(now, attempts, self.config.backoff_cap_minutes);

                    self.store
                        .update_retry(&message.id, attempts, due_at, Some(&reason))
                        .await?;
                    failed += 1;

                    warn!(
                        message_id = %message.id,
                        chat_id = %message.chat_id,
                        attempts,
                        retry_in_minutes,
                        reason = %reason,
                        "Send failed, rescheduled"
                    );
                }
            }
        }

        Ok((sent, failed))
    }

    /// New `due_at` for the `rank`-th (0-based) deferral of a chat this tick.
    fn deferred_due_at(&self, message: &OutboundMessage, rank: u64) -> i64 {
        let ticks = match self.config.deferral {
            DeferralPolicy::Fixed => 1,
            DeferralPolicy::Staggered => {
                let ceiling = u64::from(self.config.ceiling_for(message.chat_class));
                if ceiling == 0 {
                    rank.saturating_add(1)
                } else {
                    1 + rank / ceiling
                }
            }
        };
        let shift = ticks.saturating_mul(self.config.tick_interval_ms);
        message
            .due_at
            .saturating_add(i64::try_from(shift).unwrap_or(i64::MAX))
    }

    fn warn_unconfigured(&self, class: ChatClass, ctx: &mut TickContext) {
        if !self.config.has_ceiling(class) && ctx.warned_classes.insert(class) {
            warn!(chat_class = %class, "No ceiling configured for chat class, deferring");
        }
    }
}

/// Wall-clock epoch milliseconds that advance with the tokio clock.
struct TickClock {
    origin: Instant,
    origin_ms: i64,
}

impl TickClock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}

/// Time from `now_ms` to the next multiple of `tick_ms`. A full tick when
/// `now_ms` sits exactly on a boundary.
fn until_next_boundary(now_ms: i64, tick_ms: u64) -> Duration {
    let tick = i64::try_from(tick_ms).unwrap_or(i64::MAX).max(1);
    let into_tick = now_ms.rem_euclid(tick);
    Duration::from_millis((tick - into_tick) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_wait_lands_on_next_multiple() {
        assert_eq!(until_next_boundary(10_250, 1_000), Duration::from_millis(750));
        assert_eq!(until_next_boundary(10_999, 1_000), Duration::from_millis(1));
        assert_eq!(until_next_boundary(11_000, 1_000), Duration::from_millis(1_000));
        assert_eq!(until_next_boundary(7, 5), Duration::from_millis(3));
    }

    #[test]
    fn summary_counts_idle_ticks() {
        let mut summary = RunSummary::default();
        summary.record(&TickReport::default());
        summary.record(&TickReport {
            selected: 3,
            sent: 2,
            failed: 1,
            deferred: 4,
            ..Default::default()
        });

        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.idle_ticks, 1);
        assert_eq!(summary.selected, 3);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deferred, 4);
    }
}
