//! # Refresh Sessions
//!
//! Overlapping refreshes share one [`RankingState`]. Each refresh is stamped
//! with a fresh [`SessionToken`] before it does any asynchronous work, and
//! every update it produces (seed, per-row, final list) is applied only while
//! that token is still the latest one. Superseded refreshes run to completion
//! but their results are discarded, so the last refresh started always wins.

use crate::coordinator::{LoadRequest, RankingLoader, RankingUpdate, UpdateReceiver};
use core_metadata::{EnrichmentStatus, RankedItem};
use core_runtime::events::{CoreEvent, EventBus, RankingEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Identity of one refresh. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(Uuid);

impl SessionToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Gated<S> {
    latest: Option<SessionToken>,
    state: S,
}

/// Guards shared state `S` so only the latest session may change it.
///
/// The token check and the mutation happen under one lock, so a session
/// superseded mid-apply cannot slip a write in afterwards.
pub struct SessionGate<S> {
    inner: Mutex<Gated<S>>,
}

impl<S> SessionGate<S> {
    pub fn new(state: S) -> Self {
        Self {
            inner: Mutex::new(Gated {
                latest: None,
                state,
            }),
        }
    }

    /// Register a new session as the latest and return its token.
    pub async fn begin(&self) -> SessionToken {
        let token = SessionToken::new();
        self.inner.lock().await.latest = Some(token);
        token
    }

    pub async fn is_current(&self, token: &SessionToken) -> bool {
        self.inner.lock().await.latest.as_ref() == Some(token)
    }

    pub async fn current(&self) -> Option<SessionToken> {
        self.inner.lock().await.latest
    }

    /// Run `apply` against the state if `token` is still the latest session.
    ///
    /// Returns `None` without touching the state otherwise.
    pub async fn apply_if_current<R>(
        &self,
        token: &SessionToken,
        apply: impl FnOnce(&mut S) -> R,
    ) -> Option<R> {
        let mut gated = self.inner.lock().await;
        if gated.latest.as_ref() != Some(token) {
            debug!(session = %token, "Discarding update from superseded session");
            return None;
        }
        Some(apply(&mut gated.state))
    }

    /// Read the state regardless of session.
    pub async fn read<R>(&self, read: impl FnOnce(&S) -> R) -> R {
        read(&self.inner.lock().await.state)
    }
}

/// Chart state shown to consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingState {
    pub items: Vec<RankedItem>,
    pub status_by_rank: HashMap<u32, EnrichmentStatus>,
    pub is_refreshing: bool,
}

impl RankingState {
    fn seed(&mut self, items: Vec<RankedItem>) {
        self.status_by_rank = items
            .iter()
            .map(|item| (item.rank, EnrichmentStatus::Pending))
            .collect();
        self.items = items;
    }

    fn complete_item(&mut self, rank: u32, item: RankedItem, status: EnrichmentStatus) {
        match self.items.iter_mut().find(|existing| existing.rank == rank) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        self.status_by_rank.insert(rank, status);
    }

    fn finish(&mut self, items: Vec<RankedItem>) {
        for item in &items {
            let status = self
                .status_by_rank
                .entry(item.rank)
                .or_insert(EnrichmentStatus::Pending);
            if *status == EnrichmentStatus::Pending {
                *status = if item.is_enriched() {
                    EnrichmentStatus::Success
                } else {
                    EnrichmentStatus::Failed
                };
            }
        }
        self.status_by_rank
            .retain(|rank, _| items.iter().any(|item| item.rank == *rank));
        self.items = items;
        self.is_refreshing = false;
    }
}

/// How a refresh ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The final list of this many rows was applied.
    Applied(usize),
    /// A newer refresh started first; nothing from the final list was applied.
    Discarded,
}

/// Owns the shared [`RankingState`] and runs refreshes against it.
pub struct RankingSession {
    loader: Arc<dyn RankingLoader>,
    gate: SessionGate<RankingState>,
    event_bus: EventBus,
}

impl RankingSession {
    pub fn new(loader: Arc<dyn RankingLoader>, event_bus: EventBus) -> Self {
        Self {
            loader,
            gate: SessionGate::new(RankingState::default()),
            event_bus,
        }
    }

    /// Load a fresh ranking and apply it if no newer refresh has started
    /// by the time each piece arrives.
    #[instrument(skip(self, request))]
    pub async fn refresh(&self, request: LoadRequest) -> RefreshOutcome {
        let token = self.gate.begin().await;
        let session_id = token.to_string();
        info!(session = %token, "Refresh started");

        self.gate
            .apply_if_current(&token, |state| state.is_refreshing = true)
            .await;
        self.emit(RankingEvent::RefreshStarted {
            session_id: session_id.clone(),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let (items, ()) = tokio::join!(
            self.loader.load_ranking(&request, Some(sender)),
            self.apply_updates(&token, receiver),
        );

        let item_count = items.len();
        let applied = self
            .gate
            .apply_if_current(&token, |state| state.finish(items))
            .await;

        match applied {
            Some(()) => {
                info!(session = %token, item_count, "Refresh applied");
                self.emit(RankingEvent::RefreshCompleted {
                    session_id,
                    item_count,
                });
                RefreshOutcome::Applied(item_count)
            }
            None => {
                info!(
                    session = %token,
                    item_count,
                    "Refresh superseded by a newer session; discarding final results"
                );
                self.emit(RankingEvent::RefreshDiscarded { session_id });
                RefreshOutcome::Discarded
            }
        }
    }

    async fn apply_updates(&self, token: &SessionToken, mut receiver: UpdateReceiver) {
        while let Some(update) = receiver.recv().await {
            match update {
                RankingUpdate::Seeded(items) => {
                    let count = items.len();
                    if self
                        .gate
                        .apply_if_current(token, |state| state.seed(items))
                        .await
                        .is_some()
                    {
                        debug!(session = %token, count, "Applied seed");
                    }
                }
                RankingUpdate::ItemCompleted { rank, item, status } => {
                    let applied = self
                        .gate
                        .apply_if_current(token, |state| state.complete_item(rank, item, status))
                        .await
                        .is_some();
                    if !applied {
                        continue;
                    }

                    let session_id = token.to_string();
                    match status {
                        EnrichmentStatus::Failed => self.emit(RankingEvent::ItemFailed {
                            session_id,
                            rank,
                            message: "enrichment failed; showing chart data only".to_string(),
                        }),
                        _ => self.emit(RankingEvent::ItemEnriched { session_id, rank }),
                    }
                }
            }
        }
    }

    fn emit(&self, event: RankingEvent) {
        // No subscribers is not an error
        let _ = self.event_bus.emit(CoreEvent::Ranking(event));
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> RankingState {
        self.gate.read(RankingState::clone).await
    }

    pub async fn current_session(&self) -> Option<SessionToken> {
        self.gate.current().await
    }

    pub fn gate(&self) -> &SessionGate<RankingState> {
        &self.gate
    }
}
