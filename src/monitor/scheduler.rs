//! Fixed-rate disk checks and the slot holding the most recent sample.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use super::sampler::{Sample, Sampler};
use super::warning::WarningDetector;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Latest successful sample, shared between the scheduler and HTTP handlers.
/// Readers always see either nothing or one whole sample.
#[derive(Clone)]
pub struct LatestSample {
    tx: Arc<watch::Sender<Option<Arc<Sample>>>>,
}

impl Default for LatestSample {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestSample {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, sample: Arc<Sample>) {
        self.tx.send_replace(Some(sample));
    }

    pub fn get(&self) -> Option<Arc<Sample>> {
        self.tx.borrow().clone()
    }
}

pub struct Scheduler {
    sampler: Arc<dyn Sampler>,
    detector: Arc<WarningDetector>,
    latest: LatestSample,
    period: Duration,
}

impl Scheduler {
    pub fn new(
        sampler: Arc<dyn Sampler>,
        detector: Arc<WarningDetector>,
        latest: LatestSample,
        period: Duration,
    ) -> Self {
        Self {
            sampler,
            detector,
            latest,
            period: period.max(MIN_PERIOD),
        }
    }

    /// Runs until `shutdown` fires or its sender is dropped. The first tick
    /// is immediate and the following ones are anchored to it, so a slow
    /// tick does not push later ones back. Each tick runs as its own task
    /// and at most one is in flight; a tick that comes due while the
    /// previous one is still running is skipped.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!(
            period_seconds = self.period.as_secs_f64(),
            "Disk check scheduler started."
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Disk check scheduler received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(handle) = in_flight.take() {
                        if !handle.is_finished() {
                            warn!("Previous disk check is still running. Skipping this tick.");
                            in_flight = Some(handle);
                            continue;
                        }
                        if let Err(e) = handle.await {
                            error!(error = %e, "Disk check tick panicked.");
                        }
                    }
                    let sampler = self.sampler.clone();
                    let detector = self.detector.clone();
                    let latest = self.latest.clone();
                    in_flight = Some(tokio::spawn(async move {
                        run_tick(sampler.as_ref(), detector.as_ref(), &latest).await;
                    }));
                }
            }
        }

        if let Some(handle) = in_flight {
            handle.abort();
            let _ = handle.await;
        }
        info!("Disk check scheduler stopped.");
    }
}

async fn run_tick(sampler: &dyn Sampler, detector: &WarningDetector, latest: &LatestSample) {
    let sample = match sampler.sample().await {
        Ok(sample) => Arc::new(sample),
        Err(e) => {
            error!(error = %e, "Error checking disk space. Keeping the previous sample.");
            return;
        }
    };
    latest.publish(sample.clone());
    detector.evaluate(&sample).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::sampler::{FsUsage, SampleError};
    use crate::notifications::service::NotificationService;
    use crate::notifications::store::SubscriptionStore;
    use crate::notifications::testing::{RecordingSender, subscription};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    /// Returns the scripted percentages in order; `None` is a failed read.
    /// Once the script runs out the last entry repeats.
    struct ScriptedSampler {
        script: Vec<Option<f64>>,
        delay: Duration,
        calls: AtomicUsize,
        seen_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedSampler {
        fn new(script: Vec<Option<f64>>) -> Self {
            Self {
                script,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                seen_at: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn offsets_from(&self, start: Instant) -> Vec<u64> {
            self.seen_at
                .lock()
                .unwrap()
                .iter()
                .map(|at| at.duration_since(start).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl Sampler for ScriptedSampler {
        async fn sample(&self) -> Result<Sample, SampleError> {
            self.seen_at.lock().unwrap().push(Instant::now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script[call.min(self.script.len() - 1)];
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match step {
                Some(percent) => Ok(Sample::new(
                    Path::new("/data"),
                    50,
                    5.0,
                    FsUsage {
                        total: 1000,
                        used: (percent * 10.0) as u64,
                        free: 1000 - (percent * 10.0) as u64,
                        percent,
                    },
                    Utc::now(),
                )),
                None => Err(SampleError::NoFilesystem(PathBuf::from("/data"))),
            }
        }
    }

    fn detector(
        store_path: PathBuf,
        sender: Arc<RecordingSender>,
        enabled: bool,
    ) -> Arc<WarningDetector> {
        let store = Arc::new(SubscriptionStore::new(store_path));
        let notifier = Arc::new(NotificationService::new(
            store,
            sender,
            Duration::from_secs(5),
            4,
        ));
        Arc::new(WarningDetector::new(notifier, enabled, "Disk Space Alert!"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_run_at_a_fixed_rate() {
        let sampler = Arc::new(ScriptedSampler::new(vec![Some(10.0)]));
        let detector = detector(
            PathBuf::from("/nonexistent/subs.json"),
            Arc::new(RecordingSender::new()),
            false,
        );
        let scheduler = Scheduler::new(
            sampler.clone(),
            detector,
            LatestSample::new(),
            Duration::from_secs(300),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let start = Instant::now();
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(901)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(sampler.offsets_from(start), vec![0, 300, 600, 900]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ticks_do_not_shift_the_schedule() {
        // A fixed delay between ticks would start them at 0, 340, 680.
        let sampler =
            Arc::new(ScriptedSampler::new(vec![Some(10.0)]).with_delay(Duration::from_secs(40)));
        let scheduler = Scheduler::new(
            sampler.clone(),
            detector(
                PathBuf::from("/nonexistent/subs.json"),
                Arc::new(RecordingSender::new()),
                false,
            ),
            LatestSample::new(),
            Duration::from_secs(300),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let start = Instant::now();
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(901)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(sampler.offsets_from(start), vec![0, 300, 600, 900]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_previous_sample() {
        let sampler = Arc::new(ScriptedSampler::new(vec![Some(10.0), None, Some(20.0)]));
        let latest = LatestSample::new();
        let scheduler = Scheduler::new(
            sampler.clone(),
            detector(
                PathBuf::from("/nonexistent/subs.json"),
                Arc::new(RecordingSender::new()),
                false,
            ),
            latest.clone(),
            Duration::from_secs(60),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        assert!(latest.get().is_none());
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = latest.get().unwrap();
        assert_eq!(first.percent_used(), 10.0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sampler.calls.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&latest.get().unwrap(), &first));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(latest.get().unwrap().percent_used(), 20.0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_read_is_logged_as_an_error() {
        let sampler = ScriptedSampler::new(vec![None]);
        let latest = LatestSample::new();
        let detector = detector(
            PathBuf::from("/nonexistent/subs.json"),
            Arc::new(RecordingSender::new()),
            false,
        );

        run_tick(&sampler, detector.as_ref(), &latest).await;

        assert!(latest.get().is_none());
        assert!(logs_contain("Error checking disk space"));
        assert!(logs_contain("/data"));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("ERROR") && line.contains("Error checking disk space"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one ERROR line, found {n}")),
            }
        });
    }

    #[tokio::test]
    async fn test_warning_sample_notifies_and_keeps_live_subscription() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("subs.json");
        SubscriptionStore::new(store_path.clone())
            .add(subscription("https://push.example.com/live"))
            .await
            .unwrap();
        let sender = Arc::new(RecordingSender::new());
        let latest = LatestSample::new();
        let scheduler = Scheduler::new(
            Arc::new(ScriptedSampler::new(vec![Some(55.0)])),
            detector(store_path.clone(), sender.clone(), true),
            latest.clone(),
            Duration::from_secs(3600),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        for _ in 0..500 {
            if !sender.attempts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(latest.get().unwrap().is_warning());
        assert_eq!(sender.attempt_count("https://push.example.com/live"), 1);
        let remaining = SubscriptionStore::new(store_path).load().await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_period_has_a_floor() {
        let scheduler = Scheduler::new(
            Arc::new(ScriptedSampler::new(vec![Some(1.0)])),
            detector(
                PathBuf::from("/nonexistent/subs.json"),
                Arc::new(RecordingSender::new()),
                false,
            ),
            LatestSample::new(),
            Duration::from_millis(5),
        );
        assert_eq!(scheduler.period, MIN_PERIOD);
    }

    /// Sleeps for longer than the scheduler period on every call.
    struct SlowSampler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sampler for SlowSampler {
        async fn sample(&self) -> Result<Sample, SampleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(150)).await;
            Err(SampleError::NoFilesystem(PathBuf::from("/slow")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_is_skipped_while_previous_one_runs() {
        let sampler = Arc::new(SlowSampler {
            calls: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(
            sampler.clone(),
            detector(
                PathBuf::from("/nonexistent/subs.json"),
                Arc::new(RecordingSender::new()),
                false,
            ),
            LatestSample::new(),
            Duration::from_secs(100),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // Ticks at 0, 100 (skipped, first call runs until 150), 200, 300 (skipped).
        tokio::time::sleep(Duration::from_secs(301)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(sampler.calls.load(Ordering::SeqCst), 2);
    }
}
