//! Integration tests for overlapping refreshes
//!
//! A scripted loader stands in for the coordinator so refresh timing is
//! fully controlled (the tokio clock is paused). These tests verify that the
//! last refresh started always owns the shared state, and that a superseded
//! refresh is logged and announced as discarded.

use async_trait::async_trait;
use core_metadata::{ChartEntry, EnrichmentStatus, RankedItem};
use core_ranking::{
    LoadRequest, RankingLoader, RankingSession, RankingUpdate, RefreshOutcome, UpdateSender,
};
use core_runtime::events::{CoreEvent, EventBus, RankingEvent};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

struct Script {
    delay: Duration,
    prefix: &'static str,
    count: u32,
}

/// Serves one script per call, in call order.
struct ScriptedLoader {
    calls: AtomicUsize,
    scripts: Vec<Script>,
}

impl ScriptedLoader {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            scripts,
        }
    }
}

#[async_trait]
impl RankingLoader for ScriptedLoader {
    async fn load_ranking(
        &self,
        _request: &LoadRequest,
        updates: Option<UpdateSender>,
    ) -> Vec<RankedItem> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = &self.scripts[call];

        let items: Vec<RankedItem> = (1..=script.count)
            .map(|rank| {
                RankedItem::fallback(&ChartEntry::new(
                    rank,
                    format!("{}{}", script.prefix, rank),
                    format!("{}Artist", script.prefix),
                ))
            })
            .collect();

        if let Some(sender) = &updates {
            sender.send(RankingUpdate::Seeded(items.clone())).unwrap();
        }

        tokio::time::sleep(script.delay).await;

        if let Some(sender) = &updates {
            for item in &items {
                sender
                    .send(RankingUpdate::ItemCompleted {
                        rank: item.rank,
                        item: item.clone(),
                        status: EnrichmentStatus::Success,
                    })
                    .unwrap();
            }
        }

        items
    }
}

fn old_then_new(old_delay: Duration, new_delay: Duration) -> Arc<ScriptedLoader> {
    Arc::new(ScriptedLoader::new(vec![
        Script {
            delay: old_delay,
            prefix: "Old",
            count: 10,
        },
        Script {
            delay: new_delay,
            prefix: "New",
            count: 100,
        },
    ]))
}

/// Runs refresh A, then refresh B after `stagger`, and returns both outcomes.
async fn overlapping_refreshes(
    session: &Arc<RankingSession>,
    stagger: Duration,
) -> (RefreshOutcome, RefreshOutcome) {
    let first = {
        let session = Arc::clone(session);
        tokio::spawn(async move { session.refresh(LoadRequest::local()).await })
    };
    tokio::time::sleep(stagger).await;
    let second = {
        let session = Arc::clone(session);
        tokio::spawn(async move { session.refresh(LoadRequest::local()).await })
    };

    (first.await.unwrap(), second.await.unwrap())
}

fn assert_only_new_items(items: &[RankedItem]) {
    assert_eq!(items.len(), 100);
    assert!(items.iter().all(|item| item.title.starts_with("New")));
}

#[tokio::test(start_paused = true)]
async fn test_newer_refresh_wins_when_older_finishes_last() {
    let loader = old_then_new(Duration::from_millis(400), Duration::from_millis(50));
    let session = Arc::new(RankingSession::new(loader, EventBus::default()));

    let (first, second) = overlapping_refreshes(&session, Duration::from_millis(120)).await;

    assert_eq!(first, RefreshOutcome::Discarded);
    assert_eq!(second, RefreshOutcome::Applied(100));

    let state = session.snapshot().await;
    assert_only_new_items(&state.items);
    assert!(!state.is_refreshing);
    assert_eq!(state.status_by_rank.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_newer_refresh_wins_when_older_finishes_first() {
    let loader = old_then_new(Duration::from_millis(150), Duration::from_millis(300));
    let session = Arc::new(RankingSession::new(loader, EventBus::default()));

    let (first, second) = overlapping_refreshes(&session, Duration::from_millis(100)).await;

    assert_eq!(first, RefreshOutcome::Discarded);
    assert_eq!(second, RefreshOutcome::Applied(100));
    assert_only_new_items(&session.snapshot().await.items);
}

#[tokio::test(start_paused = true)]
async fn test_old_items_never_reach_state_after_newer_refresh_starts() {
    let loader = old_then_new(Duration::from_millis(400), Duration::from_millis(600));
    let session = Arc::new(RankingSession::new(loader, EventBus::default()));

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.refresh(LoadRequest::local()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.refresh(LoadRequest::local()).await })
    };

    // A has finished, B is still loading: only B's seed may be visible
    tokio::time::sleep(Duration::from_millis(450)).await;
    let mid = session.snapshot().await;
    assert!(mid.is_refreshing);
    assert!(mid.items.iter().all(|item| item.title.starts_with("New")));
    assert!(mid
        .status_by_rank
        .values()
        .all(|status| *status == EnrichmentStatus::Pending));

    assert_eq!(first.await.unwrap(), RefreshOutcome::Discarded);
    assert_eq!(second.await.unwrap(), RefreshOutcome::Applied(100));
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events() {
    let loader = old_then_new(Duration::from_millis(400), Duration::from_millis(50));
    // Room for every event of both refreshes
    let event_bus = EventBus::new(256);
    let mut events = event_bus.subscribe();
    let session = Arc::new(RankingSession::new(loader, event_bus));

    overlapping_refreshes(&session, Duration::from_millis(120)).await;

    let mut started = 0;
    let mut completed = Vec::new();
    let mut discarded = 0;
    let mut enriched = 0;
    while let Ok(CoreEvent::Ranking(event)) = events.try_recv() {
        match event {
            RankingEvent::RefreshStarted { .. } => started += 1,
            RankingEvent::RefreshCompleted { item_count, .. } => completed.push(item_count),
            RankingEvent::RefreshDiscarded { .. } => discarded += 1,
            RankingEvent::ItemEnriched { .. } => enriched += 1,
            RankingEvent::ItemFailed { .. } => {}
        }
    }

    assert_eq!(started, 2);
    assert_eq!(completed, vec![100]);
    assert_eq!(discarded, 1);
    // Only the current refresh's rows are announced
    assert_eq!(enriched, 100);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<String>>>);

impl CapturedLogs {
    fn contains(&self, needle: &str) -> bool {
        self.0.lock().unwrap().iter().any(|line| line.contains(needle))
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0.lock().unwrap().push(visitor.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_superseded_refresh_logs_discard() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(logs.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let loader = old_then_new(Duration::from_millis(400), Duration::from_millis(50));
    let session = Arc::new(RankingSession::new(loader, EventBus::default()));

    overlapping_refreshes(&session, Duration::from_millis(120)).await;

    assert!(logs.contains("discarding final results"));
}
