//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! External Program Runner (spec §4.8): fires a shell command in a detached
//! thread, guarded so at most one invocation of a given hook runs at a time.

use log::{error, info, warn};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// One external hook (e.g. `onVideoStarts`), identified by `name` for log
/// correlation. Cloning shares the running-guard and counter, so a hook
/// handed to multiple call sites still serialises correctly.
#[derive(Clone)]
pub struct HookRunner {
    name: Arc<str>,
    running: Arc<AtomicBool>,
    counter: Arc<AtomicU64>,
}

impl HookRunner {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            running: Arc::new(AtomicBool::new(false)),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Launches `command args...` in a detached thread. If a previous
    /// invocation of this hook is still running, logs a warning and returns
    /// without launching another (spec §4.8).
    pub fn fire(&self, command: &str, args: &[String]) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("{}: previous hook invocation still running, skipping", self.name);
            return;
        }

        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let name = Arc::clone(&self.name);
        let command = command.to_string();
        let args = args.to_vec();

        thread::spawn(move || {
            info!("{name}: launching hook #{id}: {command} {args:?}");
            match Command::new(&command).args(&args).status() {
                Ok(status) if status.success() => {
                    info!("{name}: hook #{id} exited successfully");
                }
                Ok(status) => {
                    warn!("{name}: hook #{id} exited with {status}");
                }
                Err(e) => {
                    error!("{name}: hook #{id} failed to launch: {e}");
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_invocation_is_skipped_while_first_is_running() {
        let runner = HookRunner::new("test-hook");
        runner.fire("sleep", &["0.2".to_string()]);
        thread::sleep(Duration::from_millis(20));
        assert!(runner.is_running());
        runner.fire("sleep", &["0.2".to_string()]);
        thread::sleep(Duration::from_millis(400));
        assert!(!runner.is_running());
    }

    #[test]
    fn counter_increments_per_launch() {
        let runner = HookRunner::new("counted-hook");
        runner.fire("true", &[]);
        thread::sleep(Duration::from_millis(50));
        runner.fire("true", &[]);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runner.counter.load(Ordering::SeqCst), 2);
    }
}
