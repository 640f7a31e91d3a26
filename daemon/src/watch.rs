/// Single-target scheduler: poll, extract, decide, notify, persist.
///
/// Ticks are strictly sequential. Cancellation is honoured between ticks and
/// while a fetch is in flight; once a page has been fetched the rest of the tick
/// (dispatch and the state write) always runs to completion.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::parse_target;
use crate::error::{ConfigError, FetchError};
use crate::event::{WatchEvent, WatchEventKind};
use crate::extract::Extractor;
use crate::notify::{Alert, DeliveryOutcome, Dispatcher};
use crate::poll::{CacheTokens, PollClient, PollOutcome};
use crate::state::{watch_id, StateStore, WatchState};
use crate::transition::{decide, Transition};

const MARKUP_SAMPLE_CHARS: usize = 500;

/// One monitored target and who to tell about it.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSpec {
    pub target: Url,
    pub recipients: Vec<String>,
}

impl WatchSpec {
    pub fn new(target: &str, recipients: Vec<String>) -> Result<Self, ConfigError> {
        let target = parse_target(target)?;
        let recipients: Vec<String> = recipients
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(ConfigError::NoRecipients(target.to_string()));
        }
        Ok(Self { target, recipients })
    }

    pub fn id(&self) -> String {
        watch_id(self.target.as_str(), &self.recipients)
    }
}

/// Collaborators shared by every watch in the process.
pub struct WatchContext {
    pub poller: PollClient,
    pub extractor: Arc<dyn Extractor>,
    pub dispatcher: Dispatcher,
    pub store: Arc<StateStore>,
    pub interval: Duration,
    pub notify_on_down: bool,
}

#[derive(Debug)]
pub enum TickOutcome {
    NotModified,
    Observed {
        transition: Transition,
        deliveries: Vec<DeliveryOutcome>,
    },
}

pub struct Watch {
    id: String,
    generation: u64,
    spec: WatchSpec,
    ctx: Arc<WatchContext>,
}

impl Watch {
    pub fn new(spec: WatchSpec, ctx: Arc<WatchContext>) -> Self {
        Self {
            id: spec.id(),
            generation: 0,
            spec,
            ctx,
        }
    }

    /// Tags every event this watch reports with `generation`.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub async fn fetch(&self, state: &WatchState) -> Result<PollOutcome, FetchError> {
        self.ctx.poller.poll(&self.spec.target, &state.tokens()).await
    }

    /// Runs a fresh page through extraction and the transition engine, alerts
    /// if needed, and persists the new state when it differs from `state`.
    pub async fn apply(&self, state: &mut WatchState, body: &str, tokens: CacheTokens) -> TickOutcome {
        let extraction = self.ctx.extractor.extract(body);
        match &extraction.activity_id {
            Some(activity) => info!(
                watch = %self.id,
                activity = %activity,
                accepting = extraction.accepting,
                title = extraction.title.as_deref().unwrap_or(""),
                "activity detected"
            ),
            None => {
                let sample: String = body.chars().take(MARKUP_SAMPLE_CHARS).collect();
                debug!(watch = %self.id, sample = %sample, "no activity id found");
            }
        }

        let (transition, mut next) = decide(state, &extraction);
        next.set_tokens(tokens);

        let deliveries = if self.should_alert(transition) {
            let alert = Alert {
                transition,
                activity_id: match transition {
                    Transition::WentDown => state.last_seen_id.clone(),
                    _ => extraction.activity_id.clone(),
                },
                title: extraction.title.clone(),
                target: self.spec.target.clone(),
            };
            info!(watch = %self.id, transition = %transition, "sending alert");
            let message = self.ctx.dispatcher.render(&alert);
            self.ctx.dispatcher.dispatch(&message, &self.spec.recipients).await
        } else {
            if transition.is_alert() {
                info!(watch = %self.id, transition = %transition, "alert suppressed by configuration");
            }
            Vec::new()
        };

        if next != *state {
            if let Err(e) = self.ctx.store.save(&self.id, &next).await {
                warn!(watch = %self.id, error = %e, "failed to persist watch state");
            }
            *state = next;
        }

        TickOutcome::Observed {
            transition,
            deliveries,
        }
    }

    /// One full tick. A fetch error leaves `state` untouched.
    #[cfg(test)]
    pub async fn tick(&self, state: &mut WatchState) -> Result<TickOutcome, FetchError> {
        match self.fetch(state).await? {
            PollOutcome::NotModified => Ok(TickOutcome::NotModified),
            PollOutcome::Fresh { body, tokens, .. } => Ok(self.apply(state, &body, tokens).await),
        }
    }

    fn should_alert(&self, transition: Transition) -> bool {
        match transition {
            Transition::None => false,
            Transition::WentDown => self.ctx.notify_on_down,
            Transition::WentLive | Transition::NowAccepting => true,
        }
    }
}

/// Drives `watch` until `cancel` fires, reporting progress on `events`.
pub async fn run(
    watch: Watch,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WatchEvent>,
) {
    let report = |kind| {
        let _ = events.send(WatchEvent::new(&watch.id, watch.generation, kind));
    };

    let mut state = watch.ctx.store.load(&watch.id).await;
    info!(
        watch = %watch.id,
        target = %watch.spec.target,
        recipients = watch.spec.recipients.len(),
        last_seen = state.last_seen_id.as_deref().unwrap_or("-"),
        "watch started"
    );
    report(WatchEventKind::Running);

    let mut ticker = tokio::time::interval(watch.ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = watch.fetch(&state) => fetched,
        };

        match fetched {
            Ok(PollOutcome::NotModified) => {
                debug!(watch = %watch.id, "not modified");
            }
            Ok(PollOutcome::Fresh { body, tokens, status }) => {
                debug!(watch = %watch.id, status, bytes = body.len(), "fetched");
                if let TickOutcome::Observed { transition, deliveries } =
                    watch.apply(&mut state, &body, tokens).await
                {
                    let failed = deliveries.iter().filter(|d| d.result.is_err()).count();
                    if failed > 0 {
                        warn!(
                            watch = %watch.id,
                            transition = %transition,
                            failed,
                            total = deliveries.len(),
                            "alert did not reach every recipient"
                        );
                    }
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    warn!(watch = %watch.id, error = %e, "fetch timed out");
                } else {
                    warn!(watch = %watch.id, error = %e, "fetch failed");
                }
                report(WatchEventKind::Failed {
                    error: e.to_string(),
                });
                continue;
            }
        }
        report(WatchEventKind::Checked {
            at: chrono::Utc::now(),
            last_seen_id: state.last_seen_id.clone(),
        });
    }

    info!(watch = %watch.id, "watch stopped");
    report(WatchEventKind::Exited);
}
