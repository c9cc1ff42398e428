//! Periodic single-flight loops for the background components.
//!
//! Each loop owns nothing but a cadence; the tick body is injected so it can
//! be exercised in tests without standing up the timer. Ticks never overlap:
//! the loop awaits full tick completion, then the delay, before re-entering.

use std::{fmt::Display, future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PeriodicLoop {
    name: &'static str,
    startup_delay: Duration,
    cadence: Duration,
    retry_cadence: Duration,
}

impl PeriodicLoop {
    pub fn new(name: &'static str, cadence: Duration) -> Self {
        Self {
            name,
            startup_delay: Duration::ZERO,
            cadence,
            retry_cadence: cadence,
        }
    }

    /// Delay the first tick, giving the host time to finish initialising.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Use a shortened cadence after a failed tick instead of the normal one.
    pub fn with_retry_cadence(mut self, cadence: Duration) -> Self {
        self.retry_cadence = cadence;
        self
    }

    /// Drive `tick` until the token is cancelled.
    ///
    /// A failed tick is logged here and otherwise dropped; the next tick
    /// re-derives its own work list. Cancellation is cooperative and is
    /// honoured between ticks and during delays.
    pub async fn run<F, Fut, E>(self, token: CancellationToken, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        debug!(target: "vignette::scheduler", name = self.name, "loop starting");

        if !self.wait(&token, self.startup_delay).await {
            return;
        }

        loop {
            if token.is_cancelled() {
                break;
            }

            let delay = match tick().await {
                Ok(()) => self.cadence,
                Err(err) => {
                    warn!(
                        target: "vignette::scheduler",
                        name = self.name,
                        error = %err,
                        retry_secs = self.retry_cadence.as_secs(),
                        "tick failed"
                    );
                    self.retry_cadence
                }
            };

            if !self.wait(&token, delay).await {
                break;
            }
        }

        debug!(target: "vignette::scheduler", name = self.name, "loop stopped");
    }

    async fn wait(&self, token: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            () = token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn loop_stops_after_cancellation() {
        let token = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        let cancel = token.clone();
        PeriodicLoop::new("test", Duration::from_secs(60))
            .run(token, move || {
                let counter = counter.clone();
                let cancel = cancel.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        cancel.cancel();
                    }
                    Ok::<(), std::io::Error>(())
                }
            })
            .await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_delay_precedes_the_first_tick() {
        let token = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let first_tick_at = Arc::new(std::sync::Mutex::new(None));

        let cancel = token.clone();
        let record = first_tick_at.clone();
        PeriodicLoop::new("test", Duration::from_secs(60))
            .with_startup_delay(Duration::from_secs(30))
            .run(token, move || {
                let cancel = cancel.clone();
                let record = record.clone();
                async move {
                    *record.lock().unwrap() = Some(tokio::time::Instant::now());
                    cancel.cancel();
                    Ok::<(), std::io::Error>(())
                }
            })
            .await;

        let first = first_tick_at.lock().unwrap().expect("tick ran");
        assert_eq!(first - started, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ticks_use_the_retry_cadence() {
        let token = CancellationToken::new();
        let instants = Arc::new(std::sync::Mutex::new(Vec::new()));

        let cancel = token.clone();
        let record = instants.clone();
        PeriodicLoop::new("test", Duration::from_secs(3600))
            .with_retry_cadence(Duration::from_secs(300))
            .run(token, move || {
                let cancel = cancel.clone();
                let record = record.clone();
                async move {
                    let mut log = record.lock().unwrap();
                    log.push(tokio::time::Instant::now());
                    let run = log.len();
                    drop(log);
                    match run {
                        1 => Err(std::io::Error::other("transient")),
                        2 => Ok(()),
                        _ => {
                            cancel.cancel();
                            Ok(())
                        }
                    }
                }
            })
            .await;

        let log = instants.lock().unwrap();
        assert_eq!(log.len(), 3);
        // failure → retry cadence, success → normal cadence
        assert_eq!(log[1] - log[0], Duration::from_secs(300));
        assert_eq!(log[2] - log[1], Duration::from_secs(3600));
    }
}
