//! # Gatekeeper
//!
//! Runs one reading attempt at a time:
//!
//! 1. Article opens: collector starts right away, token is requested in the background
//! 2. One deferred check at `max(local dwell, server dwell) + grace` after the token arrives
//! 3. Still on the same article at that point: final snapshot, submit, report the verdict
//! 4. Article closed or switched first: collector stopped, token dropped, nothing submitted
//!
//! Nothing here retries. A failed or rejected attempt needs the article opened again.
use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use payloads::{
    Clock, DwellPolicy, ErrorBody, ErrorCode, RejectReason, StartReadingRequest,
    StartReadingResponse, SubmitReadRequest, SubmitReadResponse,
};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    collector::{Collector, EventBus},
    fingerprint::EnvironmentSignals,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Article already credited")]
    AlreadyCredited,

    #[error("Read rejected: {reason}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("Request refused ({code:?}): {message}")]
    Refused { code: ErrorCode, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl From<ErrorBody> for ApiError {
    fn from(body: ErrorBody) -> Self {
        match (body.code, body.reason) {
            (ErrorCode::AlreadyCredited, _) => ApiError::AlreadyCredited,
            (ErrorCode::Rejected, Some(reason)) => ApiError::Rejected {
                reason,
                message: body.message,
            },
            (ErrorCode::Internal, _) => ApiError::Transport(body.message),
            (code, _) => ApiError::Refused {
                code,
                message: body.message,
            },
        }
    }
}

/// The two calls of the reading protocol, however they travel.
#[async_trait]
pub trait ReadingApi: Send + Sync + 'static {
    async fn start_reading(
        &self,
        request: StartReadingRequest,
    ) -> Result<StartReadingResponse, ApiError>;

    async fn submit_read(&self, request: SubmitReadRequest)
    -> Result<SubmitReadResponse, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub id: String,
    pub reading_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatekeeperConfig {
    pub dwell: DwellPolicy,
    /// Extra wait on top of the dwell so the server never sees the submit early.
    pub grace: Duration,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            dwell: DwellPolicy::default(),
            grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipCause {
    AlreadyCredited,
    Precondition(RejectReason),
    Refused(ErrorCode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatekeeperEvent {
    Credited {
        article_id: String,
        progress: Value,
    },
    /// Not enough engagement. Worth a non-blocking notice.
    Rejected {
        article_id: String,
        reason: RejectReason,
        message: String,
    },
    /// Expected in normal navigation. Log at most.
    Skipped {
        article_id: String,
        cause: SkipCause,
    },
    Abandoned {
        article_id: String,
    },
    Unavailable {
        article_id: String,
        error: String,
    },
}

impl GatekeeperEvent {
    pub fn article_id(&self) -> &str {
        match self {
            Self::Credited { article_id, .. }
            | Self::Rejected { article_id, .. }
            | Self::Skipped { article_id, .. }
            | Self::Abandoned { article_id }
            | Self::Unavailable { article_id, .. } => article_id,
        }
    }
}

struct Attempt {
    article_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Gatekeeper<A: ReadingApi> {
    api: Arc<A>,
    bus: EventBus,
    signals: EnvironmentSignals,
    clock: Arc<dyn Clock>,
    config: GatekeeperConfig,
    events: UnboundedSender<GatekeeperEvent>,
    current: Option<Attempt>,
}

impl<A: ReadingApi> Gatekeeper<A> {
    pub fn new(
        api: Arc<A>,
        bus: EventBus,
        signals: EnvironmentSignals,
        clock: Arc<dyn Clock>,
        config: GatekeeperConfig,
    ) -> (Self, UnboundedReceiver<GatekeeperEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        (
            Self {
                api,
                bus,
                signals,
                clock,
                config,
                events,
                current: None,
            },
            receiver,
        )
    }

    /// Article the reader is looking at, decided or not.
    pub fn current_article(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|attempt| attempt.article_id.as_str())
    }

    /// Attempt for this article still waiting on its verdict.
    pub fn is_reading(&self, article_id: &str) -> bool {
        self.current.as_ref().is_some_and(|attempt| {
            attempt.article_id == article_id && !attempt.handle.is_finished()
        })
    }

    /// Caller checks local "already read" state first; the server double checks.
    pub fn open_article(&mut self, article: ArticleRef, focused: bool) {
        self.close_article();

        let collector = Collector::start(&self.bus, &self.signals, self.clock.clone(), focused);
        let cancel = CancellationToken::new();

        debug!("Opened article {}", article.id);

        let article_id = article.id.clone();
        let handle = tokio::spawn(run_attempt(
            self.api.clone(),
            collector,
            article,
            self.config,
            cancel.clone(),
            self.events.clone(),
        ));

        self.current = Some(Attempt {
            article_id,
            cancel,
            handle,
        });
    }

    /// Navigation away, logout, or closing the reader.
    pub fn close_article(&mut self) {
        if let Some(attempt) = self.current.take() {
            debug!("Closing article {}", attempt.article_id);
            attempt.cancel.cancel();
        }
    }
}

impl<A: ReadingApi> Drop for Gatekeeper<A> {
    fn drop(&mut self) {
        self.close_article();
    }
}

fn finish(
    collector: &mut Collector,
    events: &UnboundedSender<GatekeeperEvent>,
    event: GatekeeperEvent,
) {
    collector.stop();
    // nobody listening is fine
    let _ = events.send(event);
}

/// Keeps the collector reading the bus until `until` completes. `None` when cancelled first.
async fn observe_until<F: Future>(
    collector: &mut Collector,
    cancel: &CancellationToken,
    until: F,
) -> Option<F::Output> {
    tokio::pin!(until);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            output = &mut until => return Some(output),
            _ = collector.observe() => {}
        }
    }
}

async fn run_attempt<A: ReadingApi>(
    api: Arc<A>,
    mut collector: Collector,
    article: ArticleRef,
    config: GatekeeperConfig,
    cancel: CancellationToken,
    events: UnboundedSender<GatekeeperEvent>,
) {
    let article_id = article.id.clone();
    let abandoned = || GatekeeperEvent::Abandoned {
        article_id: article_id.clone(),
    };

    let request = StartReadingRequest {
        article_id: article.id.clone(),
        fingerprint: Some(collector.fingerprint().to_string()),
    };

    let Some(started) =
        observe_until(&mut collector, &cancel, api.start_reading(request)).await
    else {
        finish(&mut collector, &events, abandoned());
        return;
    };

    let started = match started {
        Ok(started) => started,
        Err(error) => {
            let event = match error {
                ApiError::AlreadyCredited => GatekeeperEvent::Skipped {
                    article_id: article_id.clone(),
                    cause: SkipCause::AlreadyCredited,
                },
                ApiError::Rejected { reason, .. } => GatekeeperEvent::Skipped {
                    article_id: article_id.clone(),
                    cause: SkipCause::Precondition(reason),
                },
                ApiError::Refused { code, .. } => GatekeeperEvent::Skipped {
                    article_id: article_id.clone(),
                    cause: SkipCause::Refused(code),
                },
                ApiError::Transport(error) => {
                    warn!("Could not start reading {article_id}: {error}");
                    GatekeeperEvent::Unavailable {
                        article_id: article_id.clone(),
                        error,
                    }
                }
            };

            finish(&mut collector, &events, event);
            return;
        }
    };

    let dwell = config
        .dwell
        .min_dwell(article.reading_minutes)
        .max(Duration::from_millis(started.min_dwell_ms));
    let deadline = Instant::now() + dwell + config.grace;

    debug!("Checking {article_id} in {}ms", dwell.as_millis());

    if observe_until(&mut collector, &cancel, sleep_until(deadline))
        .await
        .is_none()
    {
        finish(&mut collector, &events, abandoned());
        return;
    }

    let metrics = collector.stop();
    let request = SubmitReadRequest {
        article_id: article_id.clone(),
        metrics,
        read_token: started.read_token,
    };

    let event = match api.submit_read(request).await {
        Ok(response) => {
            info!("Read credited for {article_id}");
            GatekeeperEvent::Credited {
                article_id: article_id.clone(),
                progress: response.progress,
            }
        }
        Err(ApiError::Rejected { reason, .. }) if reason.is_precondition() => {
            debug!("Read for {article_id} skipped: {reason}");
            GatekeeperEvent::Skipped {
                article_id: article_id.clone(),
                cause: SkipCause::Precondition(reason),
            }
        }
        Err(ApiError::Rejected { reason, message }) => {
            info!("Read for {article_id} rejected: {reason}");
            GatekeeperEvent::Rejected {
                article_id: article_id.clone(),
                reason,
                message,
            }
        }
        Err(ApiError::AlreadyCredited) => GatekeeperEvent::Skipped {
            article_id: article_id.clone(),
            cause: SkipCause::AlreadyCredited,
        },
        Err(ApiError::Refused { code, .. }) => GatekeeperEvent::Skipped {
            article_id: article_id.clone(),
            cause: SkipCause::Refused(code),
        },
        Err(ApiError::Transport(error)) => {
            warn!("Could not submit read for {article_id}: {error}");
            GatekeeperEvent::Unavailable {
                article_id: article_id.clone(),
                error,
            }
        }
    };

    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use payloads::{
        ErrorBody, ErrorCode, RejectReason, StartReadingRequest, StartReadingResponse,
        SubmitReadRequest, SubmitReadResponse,
    };
    use serde_json::json;
    use tokio::{
        sync::mpsc::UnboundedReceiver,
        time::Instant,
    };

    use super::{
        ApiError, ArticleRef, Gatekeeper, GatekeeperConfig, GatekeeperEvent, ReadingApi,
        SkipCause,
    };
    use crate::{
        clock::TokioClock,
        collector::{EventBus, ReaderEvent, TimedEvent},
        fingerprint::EnvironmentSignals,
    };

    const START: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct FakeApi {
        min_dwell_ms: u64,
        start_error: Option<ApiError>,
        submit_error: Option<ApiError>,
        starts: AtomicUsize,
        submits: Mutex<Vec<(Instant, SubmitReadRequest)>>,
    }

    impl FakeApi {
        fn submitted(&self) -> Vec<(Instant, SubmitReadRequest)> {
            self.submits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReadingApi for FakeApi {
        async fn start_reading(
            &self,
            request: StartReadingRequest,
        ) -> Result<StartReadingResponse, ApiError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.start_error {
                return Err(error.clone());
            }

            Ok(StartReadingResponse {
                read_token: format!("token-{}", request.article_id),
                min_dwell_ms: self.min_dwell_ms,
                expires_at: START + 7_200_000,
            })
        }

        async fn submit_read(
            &self,
            request: SubmitReadRequest,
        ) -> Result<SubmitReadResponse, ApiError> {
            self.submits
                .lock()
                .unwrap()
                .push((Instant::now(), request));
            if let Some(error) = &self.submit_error {
                return Err(error.clone());
            }

            Ok(SubmitReadResponse {
                progress: json!({ "points": 10 }),
                fingerprint_matched: true,
            })
        }
    }

    struct Harness {
        api: Arc<FakeApi>,
        bus: EventBus,
        clock: TokioClock,
        gatekeeper: Gatekeeper<FakeApi>,
        events: UnboundedReceiver<GatekeeperEvent>,
    }

    fn harness(api: FakeApi) -> Harness {
        let api = Arc::new(api);
        let bus = EventBus::new();
        let clock = TokioClock::starting_at(START);
        let (gatekeeper, events) = Gatekeeper::new(
            api.clone(),
            bus.clone(),
            EnvironmentSignals::default(),
            Arc::new(clock),
            GatekeeperConfig::default(),
        );

        Harness {
            api,
            bus,
            clock,
            gatekeeper,
            events,
        }
    }

    fn article(id: &str, reading_minutes: u32) -> ArticleRef {
        ArticleRef {
            id: id.to_string(),
            reading_minutes,
        }
    }

    fn publish(harness: &Harness, event: ReaderEvent) {
        let now_ms = payloads::Clock::now_ms(&harness.clock);
        assert_eq!(harness.bus.publish(TimedEvent::new(now_ms, event)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submits_once_after_dwell() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 90_000,
            ..Default::default()
        });
        let opened = Instant::now();

        h.gatekeeper.open_article(article("a", 5), true);
        assert!(h.gatekeeper.is_reading("a"));

        publish(
            &h,
            ReaderEvent::Scroll {
                scroll_top: 2_400.0,
                viewport_height: 800.0,
                document_height: 4_000.0,
            },
        );
        for _ in 0..3 {
            publish(&h, ReaderEvent::PointerMove);
        }

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            GatekeeperEvent::Credited {
                article_id: "a".to_string(),
                progress: json!({ "points": 10 }),
            }
        );

        let submitted = h.api.submitted();
        assert_eq!(submitted.len(), 1);

        let (at, request) = &submitted[0];
        assert!(*at - opened >= Duration::from_millis(90_500));
        assert_eq!(request.read_token, "token-a");
        assert_eq!(request.metrics.scroll_depth_percent, 80.0);
        assert_eq!(request.metrics.scroll_event_count, 1);
        assert_eq!(request.metrics.pointer_movement_count, 3);
        assert_eq!(request.metrics.cumulative_focus_duration_ms, 90_500);
        assert_eq!(request.metrics.session_start_timestamp, START);

        assert_eq!(h.bus.subscriber_count(), 0);
        assert!(!h.gatekeeper.is_reading("a"));
        assert_eq!(h.gatekeeper.current_article(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blur_survives_busy_dwell() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 90_000,
            ..Default::default()
        });

        h.gatekeeper.open_article(article("a", 5), true);
        publish(
            &h,
            ReaderEvent::Scroll {
                scroll_top: 2_400.0,
                viewport_height: 800.0,
                document_height: 4_000.0,
            },
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        publish(&h, ReaderEvent::Blur);

        // a chatty host for the rest of the dwell
        for _ in 0..80 {
            for _ in 0..100 {
                publish(&h, ReaderEvent::PointerMove);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        assert!(matches!(
            h.events.recv().await.unwrap(),
            GatekeeperEvent::Credited { .. }
        ));

        let (_, request) = &h.api.submitted()[0];
        assert_eq!(request.metrics.cumulative_focus_duration_ms, 1_000);
        assert_eq!(request.metrics.pointer_movement_count, 8_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_dwell_wins() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 60_000,
            ..Default::default()
        });
        let opened = Instant::now();

        // locally a one minute article only needs the 18s
        h.gatekeeper.open_article(article("short", 1), true);
        h.events.recv().await.unwrap();

        let (at, _) = h.api.submitted()[0].clone();
        assert!(at - opened >= Duration::from_millis(60_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_dwell_when_server_asks_less() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 0,
            ..Default::default()
        });
        let opened = Instant::now();

        h.gatekeeper.open_article(article("a", 5), true);
        h.events.recv().await.unwrap();

        let (at, _) = h.api.submitted()[0].clone();
        assert!(at - opened >= Duration::from_millis(90_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_dwell() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 90_000,
            ..Default::default()
        });

        h.gatekeeper.open_article(article("a", 5), true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.gatekeeper.close_article();

        assert_eq!(
            h.events.recv().await.unwrap(),
            GatekeeperEvent::Abandoned {
                article_id: "a".to_string()
            }
        );
        assert_eq!(h.gatekeeper.current_article(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(h.api.submitted().is_empty());
        assert_eq!(h.bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_article_cancels_previous() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 90_000,
            ..Default::default()
        });

        h.gatekeeper.open_article(article("a", 5), true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        h.gatekeeper.open_article(article("b", 5), true);

        assert_eq!(h.gatekeeper.current_article(), Some("b"));
        assert!(!h.gatekeeper.is_reading("a"));

        let first = h.events.recv().await.unwrap();
        assert_eq!(first.article_id(), "a");
        assert!(matches!(first, GatekeeperEvent::Abandoned { .. }));
        assert_eq!(h.bus.subscriber_count(), 1);

        let second = h.events.recv().await.unwrap();
        assert_eq!(second.article_id(), "b");

        let submitted = h.api.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].1.article_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let mut h = harness(FakeApi {
            min_dwell_ms: 90_000,
            ..Default::default()
        });

        h.gatekeeper.open_article(article("a", 5), true);
        drop(h.gatekeeper);

        assert!(matches!(
            h.events.recv().await,
            Some(GatekeeperEvent::Abandoned { .. })
        ));
        // every sender gone once the attempt wound down
        assert!(h.events.recv().await.is_none());
        assert!(h.api.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_credited_skips() {
        let mut h = harness(FakeApi {
            start_error: Some(ApiError::AlreadyCredited),
            ..Default::default()
        });

        h.gatekeeper.open_article(article("a", 5), true);

        assert_eq!(
            h.events.recv().await.unwrap(),
            GatekeeperEvent::Skipped {
                article_id: "a".to_string(),
                cause: SkipCause::AlreadyCredited,
            }
        );
        assert_eq!(h.bus.subscriber_count(), 0);
        assert!(h.api.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_not_retried() {
        let mut h = harness(FakeApi {
            start_error: Some(ApiError::Transport("connection refused".to_string())),
            ..Default::default()
        });

        h.gatekeeper.open_article(article("a", 5), true);

        assert!(matches!(
            h.events.recv().await.unwrap(),
            GatekeeperEvent::Unavailable { .. }
        ));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.api.starts.load(Ordering::SeqCst), 1);
        assert!(h.api.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_verdicts() {
        let cases = [
            (
                ApiError::from(ErrorBody::rejected(RejectReason::InsufficientScroll)),
                GatekeeperEvent::Rejected {
                    article_id: "a".to_string(),
                    reason: RejectReason::InsufficientScroll,
                    message: RejectReason::InsufficientScroll.message().to_string(),
                },
            ),
            (
                ApiError::from(ErrorBody::rejected(RejectReason::TokenConsumed)),
                GatekeeperEvent::Skipped {
                    article_id: "a".to_string(),
                    cause: SkipCause::Precondition(RejectReason::TokenConsumed),
                },
            ),
            (
                ApiError::from(ErrorBody::new(ErrorCode::Unauthenticated, "who")),
                GatekeeperEvent::Skipped {
                    article_id: "a".to_string(),
                    cause: SkipCause::Refused(ErrorCode::Unauthenticated),
                },
            ),
        ];

        for (error, expected) in cases {
            let mut h = harness(FakeApi {
                min_dwell_ms: 10_000,
                submit_error: Some(error),
                ..Default::default()
            });

            h.gatekeeper.open_article(article("a", 1), true);
            assert_eq!(h.events.recv().await.unwrap(), expected);
            assert_eq!(h.api.submitted().len(), 1);
        }
    }

    #[test]
    fn test_error_body_mapping() {
        assert_eq!(
            ApiError::from(ErrorBody::new(ErrorCode::AlreadyCredited, "x")),
            ApiError::AlreadyCredited
        );
        assert_eq!(
            ApiError::from(ErrorBody::rejected(RejectReason::TooFast)),
            ApiError::Rejected {
                reason: RejectReason::TooFast,
                message: RejectReason::TooFast.message().to_string(),
            }
        );
        assert_eq!(
            ApiError::from(ErrorBody::new(ErrorCode::Internal, "down")),
            ApiError::Transport("down".to_string())
        );
        assert_eq!(
            ApiError::from(ErrorBody::new(ErrorCode::Rejected, "no reason")),
            ApiError::Refused {
                code: ErrorCode::Rejected,
                message: "no reason".to_string(),
            }
        );
    }
}
