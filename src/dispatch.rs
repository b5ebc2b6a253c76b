//! Poll-and-relay loop, plus the one-shot debug runner.
//!
//! One cycle: fetch what is new in the source channel, re-fetch each
//! message's full text, evaluate the rules, post matches to the winning
//! rule's targets. The loop never terminates on its own; a failed history
//! fetch only delays the next cycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::SlackError;
use crate::rules::RuleSet;
use crate::slack::ChannelClient;

/// Messages requested per poll cycle.
const POLL_FETCH_LIMIT: u32 = 5;
/// Steady-state delay between cycles.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Delay before retrying after a failed history fetch.
const BACKOFF_INTERVAL: Duration = Duration::from_secs(5);
/// How far back a debug run looks, in seconds.
const DEBUG_WINDOW_SECS: i64 = 300;
/// Messages requested for a debug run.
const DEBUG_FETCH_LIMIT: u32 = 100;

/// What one poll cycle did. Decides the delay before the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The history fetch succeeded and the batch (possibly empty) was
    /// processed.
    Progress {
        fetched: usize,
        matched: usize,
        dispatched: usize,
    },
    /// The history fetch failed. The watermark was not touched.
    Backoff,
}

impl CycleOutcome {
    /// Delay to apply before the next cycle.
    pub fn delay(&self) -> Duration {
        match self {
            CycleOutcome::Progress { .. } => POLL_INTERVAL,
            CycleOutcome::Backoff => BACKOFF_INTERVAL,
        }
    }
}

/// Endless fetch → match → relay loop over one source channel.
///
/// Owns the only piece of mutable state in the relay: the watermark, the
/// `ts` of the newest message already processed.
pub struct PollLoop {
    client: Arc<dyn ChannelClient>,
    rules: RuleSet,
    watermark: Option<String>,
}

impl PollLoop {
    pub fn new(client: Arc<dyn ChannelClient>, rules: RuleSet) -> Self {
        Self {
            client,
            rules,
            watermark: None,
        }
    }

    /// `ts` of the newest message already processed, if any.
    pub fn watermark(&self) -> Option<&str> {
        self.watermark.as_deref()
    }

    /// Poll until the process is terminated.
    pub async fn run(mut self) {
        info!(
            channel = %self.rules.source_channel,
            rules = self.rules.len(),
            "Relay polling started"
        );

        loop {
            let outcome = self.cycle().await;
            tokio::time::sleep(outcome.delay()).await;
        }
    }

    /// One fetch → match → relay pass.
    ///
    /// `run` is this plus the outcome-driven sleep; keeping the step
    /// separate lets callers drive the loop one cycle at a time.
    pub async fn cycle(&mut self) -> CycleOutcome {
        let batch = match self
            .client
            .fetch_since(
                &self.rules.source_channel,
                self.watermark.as_deref(),
                false,
                POLL_FETCH_LIMIT,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "History fetch failed; backing off");
                return CycleOutcome::Backoff;
            }
        };

        if batch.is_empty() {
            return CycleOutcome::Progress {
                fetched: 0,
                matched: 0,
                dispatched: 0,
            };
        }

        // The listing is newest first; its head becomes the next watermark.
        let newest_ts = batch[0].ts.clone();

        let mut matched = 0;
        let mut dispatched = 0;
        for message in batch.iter().rev() {
            let (hit, posted) = self.process_message(&message.ts).await;
            matched += usize::from(hit);
            dispatched += posted;
        }

        self.watermark = Some(newest_ts);

        debug!(
            fetched = batch.len(),
            matched,
            dispatched,
            watermark = %batch[0].ts,
            "Cycle complete"
        );

        CycleOutcome::Progress {
            fetched: batch.len(),
            matched,
            dispatched,
        }
    }

    /// Re-fetch one message's text, evaluate it, relay on a match.
    ///
    /// Returns whether a rule matched and how many posts succeeded.
    async fn process_message(&self, ts: &str) -> (bool, usize) {
        // Listings may omit or truncate the body; the full text is the
        // only thing rules run against.
        let text = match self.client.fetch_one(&self.rules.source_channel, ts).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(ts, "Message has no text; skipping");
                return (false, 0);
            }
            Err(e) => {
                warn!(ts, error = %e, "Failed to re-fetch message; skipping");
                return (false, 0);
            }
        };

        let Some(targets) = self.rules.evaluate(&text) else {
            return (false, 0);
        };

        let mut posted = 0;
        for target in targets {
            match self.client.post(target, &text).await {
                Ok(()) => {
                    info!(ts, target = %target, "Message relayed");
                    posted += 1;
                }
                Err(e) => {
                    error!(ts, target = %target, error = %e, "Relay post failed");
                }
            }
        }

        (true, posted)
    }
}

// ── Debug runner ────────────────────────────────────────────────────

/// One examined message in a debug report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    pub ts: String,
    pub text: String,
    /// The winning rule's targets, or `None` when no rule matched.
    pub verdict: Option<Vec<String>>,
}

/// Outcome of a dry run over recent channel history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugReport {
    /// Messages the history fetch returned.
    pub examined: usize,
    /// Per-message verdicts, oldest first, for messages whose text
    /// resolved.
    pub entries: Vec<DebugEntry>,
}

impl fmt::Display for DebugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Examined {} message(s) from the last {}s",
            self.examined, DEBUG_WINDOW_SECS
        )?;
        for entry in &self.entries {
            match &entry.verdict {
                Some(targets) if targets.is_empty() => {
                    writeln!(f, "{}  {:?}  matched, no targets", entry.ts, entry.text)?;
                }
                Some(targets) => {
                    writeln!(
                        f,
                        "{}  {:?}  would relay to {}",
                        entry.ts,
                        entry.text,
                        targets.join(", ")
                    )?;
                }
                None => {
                    writeln!(f, "{}  {:?}  no match", entry.ts, entry.text)?;
                }
            }
        }
        Ok(())
    }
}

/// One-shot dry run: evaluate recent history against the rules without
/// posting anything.
pub struct DebugRunner {
    client: Arc<dyn ChannelClient>,
    rules: RuleSet,
}

impl DebugRunner {
    pub fn new(client: Arc<dyn ChannelClient>, rules: RuleSet) -> Self {
        Self { client, rules }
    }

    /// Fetch the recent window and report what the poll loop would have
    /// done with each message.
    ///
    /// A failed history fetch aborts the run. A message whose re-fetch
    /// fails, or that has no text, is skipped, exactly like the live loop.
    pub async fn run(&self) -> Result<DebugReport, SlackError> {
        let oldest = (Utc::now().timestamp() - DEBUG_WINDOW_SECS).to_string();

        let batch = self
            .client
            .fetch_since(
                &self.rules.source_channel,
                Some(&oldest),
                false,
                DEBUG_FETCH_LIMIT,
            )
            .await?;

        info!(
            fetched = batch.len(),
            window_secs = DEBUG_WINDOW_SECS,
            "Fetched recent history for dry run"
        );

        let mut entries = Vec::with_capacity(batch.len());
        for message in batch.iter().rev() {
            let text = match self
                .client
                .fetch_one(&self.rules.source_channel, &message.ts)
                .await
            {
                Ok(Some(text)) => text,
                Ok(None) => {
                    debug!(ts = %message.ts, "Message has no text; skipping");
                    continue;
                }
                Err(e) => {
                    warn!(ts = %message.ts, error = %e, "Failed to re-fetch message; skipping");
                    continue;
                }
            };

            let verdict = self.rules.evaluate(&text).map(|targets| targets.to_vec());
            entries.push(DebugEntry {
                ts: message.ts.clone(),
                text,
                verdict,
            });
        }

        Ok(DebugReport {
            examined: batch.len(),
            entries,
        })
    }
}
