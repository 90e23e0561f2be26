//! Interval jobs on background threads.
//!
//! Every job gets its own thread and ticker so a slow job never delays the
//! others. The ticker coalesces: ticks missed while the job was still running
//! collapse into a single pending tick, nothing is queued up.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick};
use log::{debug, error, info};

use crate::shutdown::Shutdown;

#[derive(Clone, Debug)]
pub struct ScheduledJob {
    pub name: String,
    pub interval: Duration,
    pub last_run: Option<Instant>,
    pub runs: u64,
}

#[derive(Default)]
pub struct Scheduler {
    shutdown: Shutdown,
    jobs: Vec<Arc<Mutex<ScheduledJob>>>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` every `interval`, first run one interval from now.
    pub fn add_job<F>(&mut self, name: &str, interval: Duration, mut job: F) -> anyhow::Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let entry = Arc::new(Mutex::new(ScheduledJob {
            name: name.to_string(),
            interval,
            last_run: None,
            runs: 0,
        }));
        let token = self.shutdown.token();
        let name = name.to_string();
        let meta = entry.clone();

        info!("Scheduling job {name} every {interval:?}");
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => {},
                    recv(token.receiver()) -> _ => break,
                }
                if token.is_cancelled() {
                    break;
                }

                let started = Instant::now();
                if panic::catch_unwind(AssertUnwindSafe(|| job())).is_err() {
                    error!("Job {name} panicked, keeping its schedule");
                }
                debug!("Job {name} took {:?}", started.elapsed());

                if let Ok(mut meta) = meta.lock() {
                    meta.last_run = Some(started);
                    meta.runs += 1;
                }
            }
            debug!("Job {name} stopped");
        })?;

        self.jobs.push(entry);
        self.handles.push(handle);
        Ok(())
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs
            .iter()
            .filter_map(|job| job.lock().ok().map(|job| job.clone()))
            .collect()
    }

    /// Stops all timers. With `wait == false` jobs that are running right now
    /// are left to finish on their own.
    pub fn shutdown(self, wait: bool) {
        self.shutdown.trigger();
        if wait {
            for handle in self.handles {
                if handle.join().is_err() {
                    error!("Scheduler thread ended with a panic");
                }
            }
        }
    }
}
