use std::{path::PathBuf, time::Duration};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    error::PollError,
    http::ImageSource,
    image::{capture_path, prepare_capture_dir, write_capture},
    utils::{Clock, Timer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Capturing,
    Writing,
    Sleeping,
}

#[allow(dead_code)]
#[derive(Debug)]
pub enum CycleOutcome {
    Saved { path: PathBuf, bytes: usize },
    FetchFailed(PollError),
    WriteFailed(PollError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollStats {
    pub cycles: u64,
    pub saved: u64,
    pub fetch_failed: u64,
    pub write_failed: u64,
    pub bytes_written: u64,
}

/// One camera, one sequential loop: capture, write, sleep, repeat.
pub struct Poller<S: ImageSource, C: Clock> {
    source: S,
    clock: C,
    camera: String,
    root: PathBuf,
    interval: Duration,
    max_cycles: Option<u64>,
    state: CycleState,
    stats: PollStats,
}

impl<S: ImageSource, C: Clock> Poller<S, C> {
    pub fn new(source: S, clock: C, camera: &str, root: impl Into<PathBuf>, interval: Duration) -> Self {
        Poller {
            source,
            clock,
            camera: camera.to_string(),
            root: root.into(),
            interval,
            max_cycles: None,
            state: CycleState::Idle,
            stats: PollStats::default(),
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    #[allow(dead_code)]
    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    fn set_state(&mut self, state: CycleState) {
        debug!("Camera {}: {:?} -> {:?}", self.camera, self.state, state);
        self.state = state;
    }

    /// Capture and write once. Errors are logged and counted here and never
    /// escape the cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        self.set_state(CycleState::Capturing);
        let now = self.clock.now();
        let path = capture_path(&self.root, &self.camera, &now);

        let timer = Timer::new();
        let bytes = match self.source.fetch().await {
            Ok(bytes) => bytes,
            Err(e) if e.is_timeout() => {
                warn!("Camera {} at {}: no image within {:?}: {}", self.camera, now.unix, timer.mark(), e);
                self.stats.fetch_failed += 1;
                return CycleOutcome::FetchFailed(e);
            }
            Err(e) => {
                error!("Camera {} at {}: failed to fetch image after {:?}: {}", self.camera, now.unix, timer.mark(), e);
                self.stats.fetch_failed += 1;
                return CycleOutcome::FetchFailed(e);
            }
        };

        self.set_state(CycleState::Writing);
        let written = match prepare_capture_dir(&path).await {
            Ok(()) => write_capture(&path, &bytes).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                info!("Camera {} at {}: saved {} bytes to {} in {:?}", self.camera, now.unix, bytes.len(), path.display(), timer.mark());
                self.stats.saved += 1;
                self.stats.bytes_written += bytes.len() as u64;
                CycleOutcome::Saved { path, bytes: bytes.len() }
            }
            Err(e) => {
                error!("Camera {} at {}: failed to write image: {}", self.camera, now.unix, e);
                self.stats.write_failed += 1;
                CycleOutcome::WriteFailed(e)
            }
        }
    }

    /// Loops until `shutdown` turns true or `max_cycles` is reached. Shutdown
    /// is only observed between cycles and while sleeping, so a write in
    /// progress always completes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> PollStats {
        loop {
            if *shutdown.borrow() {
                info!("Camera {}: shutdown requested", self.camera);
                break;
            }
            if self.max_cycles.is_some_and(|max| self.stats.cycles >= max) {
                break;
            }
            self.run_cycle().await;
            if self.max_cycles.is_some_and(|max| self.stats.cycles >= max) {
                break;
            }

            self.set_state(CycleState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_requested(&mut shutdown) => {}
            }
            self.set_state(CycleState::Idle);
        }
        self.set_state(CycleState::Idle);
        if self.stats.saved == 0 && self.stats.cycles > 0 {
            warn!("Camera {}: no image saved in {} cycles", self.camera, self.stats.cycles);
        }
        self.stats
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // sender gone, nobody can ask us to stop any more
            std::future::pending::<()>().await;
        }
    }
}
