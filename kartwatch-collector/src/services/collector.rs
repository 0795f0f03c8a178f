//! Telemetry collector loop
//!
//! Polls the live-timing endpoint, skips unchanged payloads by content
//! fingerprint, parses lap records, tracks day/session boundaries and writes
//! laps through the history repository. Scrape state is an explicit
//! [`CollectorState`] threaded through each tick, so every tick decision is
//! unit-testable with injected state and clock values.

use crate::db::checkpoint::{self, ResumeState};
use crate::db::HistoryRepository;
use crate::models::LapKey;
use crate::services::parser;
use crate::services::timing_client::TimingClient;
use chrono::{DateTime, Timelike, Utc};
use kartwatch_common::{Config, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Scrape state owned by the collector loop.
#[derive(Debug, Default)]
pub struct CollectorState {
    /// Fingerprint of the previous tick's payload
    pub previous_fingerprint: Option<String>,
    /// Wall-clock time of the last accepted telemetry tick
    pub last_telemetry_at: Option<DateTime<Utc>>,
    /// Whether the track day has ended
    pub day_ended: bool,
    /// Session number seen on the last accepted tick
    pub last_session: Option<i32>,
    /// Dedup keys of laps already written this day. Best-effort only; the
    /// repository upserts stay correct without it.
    pub cache: HashSet<LapKey>,
}

impl CollectorState {
    pub fn from_resume(resume: ResumeState) -> Self {
        Self {
            previous_fingerprint: resume.previous_fingerprint,
            last_telemetry_at: resume.last_telemetry_at,
            day_ended: resume.day_ended,
            last_session: resume.last_session,
            cache: HashSet::new(),
        }
    }

    pub fn to_resume(&self) -> ResumeState {
        ResumeState {
            previous_fingerprint: self.previous_fingerprint.clone(),
            last_telemetry_at: self.last_telemetry_at,
            day_ended: self.day_ended,
            last_session: self.last_session,
        }
    }

    /// Transition to DayEnded: slow cadence and bounded memory.
    pub fn enter_day_ended(&mut self) {
        if !self.day_ended {
            tracing::info!("Track day ended, switching to idle polling");
        }
        self.day_ended = true;
        self.cache.clear();
    }
}

/// Collector scheduling parameters, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub open_hour_utc: u32,
    pub close_hour_utc: u32,
    pub stale_telemetry: Duration,
    pub max_lap_seconds: f64,
    pub poll_interval: Duration,
    pub idle_poll_interval: Duration,
}

impl CollectorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            open_hour_utc: config.track_open_hour_utc,
            close_hour_utc: config.track_close_hour_utc,
            stale_telemetry: Duration::from_secs(config.stale_telemetry_secs),
            max_lap_seconds: config.max_lap_seconds,
            poll_interval: config.poll_interval(),
            idle_poll_interval: config.idle_poll_interval(),
        }
    }

    /// The day has ended once the clock is outside the operating window AND
    /// telemetry has been silent for the stale threshold. The combined
    /// condition avoids flipping to DayEnded while a session is still
    /// actively producing data past the window boundary.
    pub fn day_has_ended(&self, state: &CollectorState, now: DateTime<Utc>) -> bool {
        let outside_hours = now.hour() < self.open_hour_utc || now.hour() >= self.close_hour_utc;
        let stale = match state.last_telemetry_at {
            Some(at) => now.signed_duration_since(at).to_std().unwrap_or_default()
                > self.stale_telemetry,
            None => true,
        };
        outside_hours && stale
    }
}

/// Content fingerprint of a raw payload, used to skip unchanged ticks.
pub fn fingerprint(raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(raw))
}

/// Outcome of one processed payload.
#[derive(Debug, PartialEq, Eq)]
pub enum TickReport {
    /// Payload identical to the previous tick, nothing done
    Unchanged,
    /// Day had ended and the payload still reports the previous session;
    /// treated as a stale tail and discarded
    SkippedStaleTail,
    /// Laps processed: `saved` written, `skipped` already in the cache
    Stored { saved: usize, skipped: usize },
}

/// Process one raw payload against the scrape state.
///
/// A parse failure propagates without mutating the state, so the fingerprint
/// of a malformed payload is never remembered.
pub async fn process_payload(
    state: &mut CollectorState,
    raw: &[u8],
    now: DateTime<Utc>,
    repository: &HistoryRepository,
    max_lap_seconds: f64,
) -> Result<TickReport> {
    let hash = fingerprint(raw);
    if state.previous_fingerprint.as_deref() == Some(hash.as_str()) {
        tracing::trace!("Live-timing data unchanged since last tick");
        return Ok(TickReport::Unchanged);
    }

    let batch = parser::parse_payload(raw, now, max_lap_seconds)?;

    state.previous_fingerprint = Some(hash);
    state.last_telemetry_at = Some(now);

    // TODO: A day with exactly one session keeps its tail suppressed into the
    // next day, since session "1" repeating across days is indistinguishable
    // here from a replayed tail.
    if state.day_ended && state.last_session == Some(batch.session) && batch.session != 1 {
        tracing::debug!(
            session = batch.session,
            "Day has ended and this is still its last session, skipping"
        );
        return Ok(TickReport::SkippedStaleTail);
    }

    tracing::info!(
        day_ended = state.day_ended,
        last_session = ?state.last_session,
        session = batch.session,
        laps = batch.entries.len(),
        "Storing live-timing data"
    );

    state.day_ended = false;
    state.last_session = Some(batch.session);

    let day = now.date_naive();
    let mut saved = 0;
    let mut skipped = 0;
    for entry in &batch.entries {
        let key = entry.lap_key();
        if state.cache.contains(&key) {
            skipped += 1;
            continue;
        }

        // A failed lap write aborts only this lap; its siblings still go in.
        match repository.save_lap(day, entry).await {
            Ok(()) => {
                state.cache.insert(key);
                saved += 1;
            }
            Err(e) => {
                tracing::error!(
                    kart = %entry.kart,
                    lap = entry.lap,
                    "Failed to store lap: {}",
                    e
                );
            }
        }
    }

    Ok(TickReport::Stored { saved, skipped })
}

/// The collector service: owns the loop, its state and its collaborators.
pub struct Collector {
    client: TimingClient,
    repository: Arc<HistoryRepository>,
    pool: SqlitePool,
    settings: CollectorSettings,
    state: CollectorState,
}

impl Collector {
    /// Create a collector, resuming from the persisted checkpoint if one
    /// exists.
    pub async fn new(
        client: TimingClient,
        repository: Arc<HistoryRepository>,
        pool: SqlitePool,
        settings: CollectorSettings,
    ) -> Result<Self> {
        let state = match checkpoint::load_resume_state(&pool).await? {
            Some(resume) => {
                tracing::info!(
                    day_ended = resume.day_ended,
                    last_session = ?resume.last_session,
                    "Resuming collector from checkpoint"
                );
                CollectorState::from_resume(resume)
            }
            None => CollectorState::default(),
        };

        Ok(Self {
            client,
            repository,
            pool,
            settings,
            state,
        })
    }

    /// Run until the cancellation token fires. Every sleep is interruptible,
    /// so shutdown latency is bounded by the in-flight call only.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Started gathering karting telemetry");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let span = tracing::info_span!("collector_tick", trace_id = %Uuid::new_v4());
            let sleep_for = async {
                let now = Utc::now();

                if self.settings.day_has_ended(&self.state, now) {
                    tracing::trace!("Outside operating hours, not polling telemetry");
                    self.state.enter_day_ended();
                    self.save_checkpoint().await;
                    return self.settings.idle_poll_interval;
                }

                self.tick(now).await;
                self.settings.poll_interval
            }
            .instrument(span)
            .await;

            if sleep_or_cancelled(sleep_for, &cancel).await {
                break;
            }
        }

        tracing::info!("Stopped gathering karting telemetry");
    }

    /// One poll: fetch, process, checkpoint. Nothing here is fatal; any
    /// failure is logged and the loop carries on to its next tick.
    async fn tick(&mut self, now: DateTime<Utc>) {
        let raw = match self.client.fetch().await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to fetch live-timing data: {}", e);
                return;
            }
        };

        match process_payload(
            &mut self.state,
            &raw,
            now,
            &self.repository,
            self.settings.max_lap_seconds,
        )
        .await
        {
            Ok(TickReport::Unchanged) => {}
            Ok(report) => {
                tracing::debug!(?report, "Processed telemetry tick");
                self.save_checkpoint().await;
            }
            Err(e) => {
                tracing::error!("Failed to process live-timing payload: {}", e);
            }
        }
    }

    async fn save_checkpoint(&self) {
        if let Err(e) = checkpoint::save_resume_state(&self.pool, &self.state.to_resume()).await {
            tracing::warn!("Failed to persist resume checkpoint: {}", e);
        }
    }
}

/// Interruptible sleep; returns true when cancelled.
pub async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
