//! Throttled progress estimates while a job is running

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const GLYPHS: &[&str] = &["🎬", "🎨", "🎵", "✨", "🎭", "💫"];
const GLYPH_STEP_SECS: u64 = 30;
const BAR_CELLS: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub percent: u8,
    pub glyph: &'static str,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl ProgressEvent {
    /// Ten-cell text bar, e.g. `▰▰▰▰▰▰▰▰▰▱` for 92%.
    pub fn bar(&self) -> String {
        let filled = (self.percent / BAR_CELLS).min(BAR_CELLS) as usize;
        let mut bar = "▰".repeat(filled);
        bar.push_str(&"▱".repeat(BAR_CELLS as usize - filled));
        bar
    }
}

/// Receiver of progress events.
///
/// Implementations must not fail; a sink whose consumer has gone away
/// silently drops events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.send(event).await.is_err() {
                debug!("progress receiver dropped");
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub period: Duration,
    /// Percentage reported at submission
    pub base_percent: u8,
    /// Highest percentage reported before the job is terminal
    pub cap_percent: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            base_percent: 90,
            cap_percent: 99,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    config: ProgressConfig,
}

impl ProgressReporter {
    pub fn new(config: ProgressConfig) -> Self {
        Self { config }
    }

    /// `min(base + whole minutes elapsed, cap)`.
    pub fn estimate(&self, elapsed: Duration) -> u8 {
        let minutes = elapsed.as_secs() / 60;
        let percent = (self.config.base_percent as u64).saturating_add(minutes);
        percent.min(self.config.cap_percent as u64) as u8
    }

    pub fn glyph(elapsed: Duration) -> &'static str {
        GLYPHS[((elapsed.as_secs() / GLYPH_STEP_SECS) as usize) % GLYPHS.len()]
    }

    /// Emit one event per period, measured from `started`, until `cancel`
    /// fires. Returns the number of events emitted.
    pub async fn run(
        &self,
        started: Instant,
        sink: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> usize {
        let mut ticker = tokio::time::interval_at(started + self.config.period, self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_percent = 0u8;
        let mut emitted = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            last_percent = last_percent.max(self.estimate(elapsed));
            let event = ProgressEvent {
                elapsed,
                percent: last_percent,
                glyph: Self::glyph(elapsed),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sink.emit(event) => emitted += 1,
            }
        }

        debug!(emitted, "progress reporter stopped");
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_starts_at_base_and_caps() {
        let reporter = ProgressReporter::default();
        assert_eq!(reporter.estimate(Duration::ZERO), 90);
        assert_eq!(reporter.estimate(Duration::from_secs(59)), 90);
        assert_eq!(reporter.estimate(Duration::from_secs(180)), 93);
        assert_eq!(reporter.estimate(Duration::from_secs(3600)), 99);
    }

    #[test]
    fn glyph_rotates_every_thirty_seconds() {
        assert_eq!(ProgressReporter::glyph(Duration::from_secs(0)), "🎬");
        assert_eq!(ProgressReporter::glyph(Duration::from_secs(29)), "🎬");
        assert_eq!(ProgressReporter::glyph(Duration::from_secs(30)), "🎨");
        assert_eq!(ProgressReporter::glyph(Duration::from_secs(150)), "💫");
        assert_eq!(ProgressReporter::glyph(Duration::from_secs(180)), "🎬");
    }

    #[test]
    fn bar_fills_by_tens() {
        let event = ProgressEvent {
            elapsed: Duration::ZERO,
            percent: 92,
            glyph: "🎬",
        };
        assert_eq!(event.bar(), "▰▰▰▰▰▰▰▰▰▱");
    }

    #[test]
    fn event_serializes_elapsed_as_seconds() {
        let event = ProgressEvent {
            elapsed: Duration::from_millis(61_500),
            percent: 91,
            glyph: "🎨",
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["elapsed_secs"], 61);
        assert_eq!(json["percent"], 91);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_once_per_period_with_non_decreasing_values() {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::default();
        let started = Instant::now();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { reporter.run(started, &tx, cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(200)).await;
        cancel.cancel();
        let emitted = task.await.unwrap();
        assert_eq!(emitted, 6);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 6);
        for pair in events.windows(2) {
            assert!(pair[0].elapsed <= pair[1].elapsed);
            assert!(pair[0].percent <= pair[1].percent);
        }
        assert_eq!(events[0].elapsed, Duration::from_secs(30));
        assert!(events.iter().all(|e| e.percent < 100));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::default();
        let started = Instant::now();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { reporter.run(started, &tx, cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick_emits_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let emitted = ProgressReporter::default()
            .run(Instant::now(), &tx, cancel)
            .await;
        assert_eq!(emitted, 0);
        assert!(rx.try_recv().is_err());
    }
}
