//! Drives a running server the way a reader (or a script) would.
//!
//! ```sh
//! cargo run -p tester -- --article intro --minutes 1 --mode honest
//! cargo run -p tester -- --article intro --mode bot
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use payloads::{Clock, MetricsSnapshot, StartReadingRequest, SubmitReadRequest};
use reader::{
    ArticleRef, EnvironmentSignals, EventBus, Gatekeeper, GatekeeperConfig, GatekeeperEvent,
    HttpReadingApi, ReaderEvent, ReadingApi, TimedEvent, TokioClock, generate,
};
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Scrolls and moves the pointer until the verdict comes back.
    Honest,
    /// Opens the article, then blurs the window for good.
    Background,
    /// Skips the reader entirely and submits right after the token.
    Bot,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value = "http://localhost:1111")]
    base_url: String,

    #[arg(long, default_value = "tester")]
    user: String,

    #[arg(long)]
    article: String,

    /// Declared reading time, drives the local dwell.
    #[arg(long, default_value_t = 1)]
    minutes: u32,

    #[arg(long, value_enum, default_value_t = Mode::Honest)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let api = Arc::new(HttpReadingApi::new(&args.base_url, &args.user));

    match args.mode {
        Mode::Bot => run_bot(&api, &args).await,
        Mode::Honest | Mode::Background => run_reader(api, &args).await,
    }
}

async fn run_bot(api: &HttpReadingApi, args: &Args) -> Result<()> {
    let clock = TokioClock::new();
    let fingerprint = generate(&EnvironmentSignals::detect());

    let started = api
        .start_reading(StartReadingRequest {
            article_id: args.article.clone(),
            fingerprint: Some(fingerprint.clone()),
        })
        .await
        .context("start reading")?;

    info!("Got token, server wants {}ms", started.min_dwell_ms);

    let verdict = api
        .submit_read(SubmitReadRequest {
            article_id: args.article.clone(),
            metrics: MetricsSnapshot {
                scroll_depth_percent: 100.0,
                scroll_event_count: 1,
                pointer_movement_count: 0,
                cumulative_focus_duration_ms: 0,
                fingerprint,
                session_start_timestamp: clock.now_ms(),
            },
            read_token: started.read_token,
        })
        .await;

    match verdict {
        Ok(response) => bail!("bot was credited: {}", response.progress),
        Err(e) => info!("Bot turned away: {e}"),
    }

    Ok(())
}

fn simulate(bus: EventBus, clock: TokioClock, mode: Mode) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let publish = |event| {
            // no collector listening between attempts
            bus.publish(TimedEvent::new(clock.now_ms(), event));
        };

        if mode == Mode::Background {
            publish(ReaderEvent::Scroll {
                scroll_top: 600.0,
                viewport_height: 800.0,
                document_height: 6_000.0,
            });
            publish(ReaderEvent::PointerMove);
            publish(ReaderEvent::Blur);
            return;
        }

        let mut ticks = interval(Duration::from_secs(2));
        let mut scroll_top = 0.0;
        loop {
            ticks.tick().await;
            scroll_top = f64::min(scroll_top + 250.0, 5_200.0);
            publish(ReaderEvent::Scroll {
                scroll_top,
                viewport_height: 800.0,
                document_height: 6_000.0,
            });
            publish(ReaderEvent::PointerMove);
        }
    })
}

async fn run_reader(api: Arc<HttpReadingApi>, args: &Args) -> Result<()> {
    let clock = TokioClock::new();
    let bus = EventBus::new();

    let (mut gatekeeper, mut events) = Gatekeeper::new(
        api,
        bus.clone(),
        EnvironmentSignals::detect(),
        Arc::new(clock),
        GatekeeperConfig::default(),
    );

    gatekeeper.open_article(
        ArticleRef {
            id: args.article.clone(),
            reading_minutes: args.minutes,
        },
        true,
    );
    info!("Reading {} as {}", args.article, args.user);

    let simulator = simulate(bus, clock, args.mode);

    let event = events
        .recv()
        .await
        .context("gatekeeper stopped without a verdict")?;
    simulator.abort();

    match event {
        GatekeeperEvent::Credited { progress, .. } => info!("Credited: {progress}"),
        GatekeeperEvent::Rejected {
            reason, message, ..
        } => warn!("Rejected ({reason}): {message}"),
        GatekeeperEvent::Skipped { cause, .. } => info!("Skipped: {cause:?}"),
        GatekeeperEvent::Abandoned { .. } => info!("Abandoned"),
        GatekeeperEvent::Unavailable { error, .. } => bail!("server unavailable: {error}"),
    }

    gatekeeper.close_article();

    Ok(())
}
