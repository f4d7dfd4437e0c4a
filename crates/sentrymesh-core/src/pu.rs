//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The processing-unit interface (spec §4.2/§4.3/§9): a tagged sum of
//! synchronous and asynchronous PUs, each implemented behind a small trait
//! so the executor can hold an ordered list of boxed trait objects instead
//! of a polymorphic base-class pointer.

use crate::frame::{GpuFrame, PipelineContext};
use crate::queue::BoundedQueue;
use crate::ratelimit::TimeThrottle;
use log::{error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Result of invoking a PU for one frame (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PuResult {
    SuccessAndContinue,
    SuccessAndStop,
    FailureAndContinue,
    FailureAndStop,
}

impl PuResult {
    pub fn should_stop(self) -> bool {
        matches!(self, PuResult::SuccessAndStop | PuResult::FailureAndStop)
    }
}

/// A 24-element active-hours mask; default is all-true (spec §4.2).
pub type ActiveHours = [bool; 24];

pub fn all_hours_active() -> ActiveHours {
    [true; 24]
}

pub fn is_hour_active(mask: &ActiveHours, local_hour: u32) -> bool {
    mask.get(local_hour as usize % 24).copied().unwrap_or(true)
}

/// A synchronous PU: runs in the capture thread, may mutate the frame in
/// place (spec §4.4 contracts).
pub trait SyncProcessingUnit: Send {
    fn name(&self) -> &str;

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult;
}

/// The body of an asynchronous PU: what happens once a cloned frame reaches
/// the front of its queue (spec §4.3).
pub trait AsyncSink: Send {
    fn name(&self) -> &str;

    fn on_frame_ready(&mut self, frame: GpuFrame, ctx: PipelineContext);
}

/// Type-erased handle so the executor can hold async PUs of different
/// concrete `AsyncSink` types in one `Vec` (spec §9: "tagged sum/enum of PU
/// kinds, or an interface/capability trait").
pub trait AsyncProcessingUnit: Send {
    fn name(&self) -> &str;

    /// Deep-copies the frame into the PU's queue; non-blocking (spec §4.3).
    fn enqueue(&mut self, frame: &GpuFrame, ctx: &PipelineContext) -> PuResult;

    fn start(&mut self);

    /// Stops the worker and joins it; the worker drains its queue first
    /// (spec §5 "Async workers drain their queue before exiting").
    fn stop(&mut self);

    fn queue_len(&self) -> usize;
}

/// Queue-size thresholds from spec §4.3: warn once per 5s above 10, and
/// drop from the back down to 10 once above 30 (logged as an error).
const WARN_THRESHOLD: usize = 10;
const DROP_THRESHOLD: usize = 30;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Shared {
    queue: BoundedQueue<(GpuFrame, PipelineContext)>,
    running: AtomicBool,
}

/// Owns an SPSC bounded queue and a worker thread that drains it, calling
/// `on_frame_ready` for each item (spec §4.3).
pub struct AsyncPuRuntime<S: AsyncSink + 'static> {
    name: String,
    shared: Arc<Shared>,
    warn_throttle: TimeThrottle,
    sink: Option<S>,
    worker: Option<JoinHandle<()>>,
}

impl<S: AsyncSink + 'static> AsyncPuRuntime<S> {
    pub fn new(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        Self {
            name,
            shared: Arc::new(Shared {
                queue: BoundedQueue::new(queue_capacity),
                running: AtomicBool::new(false),
            }),
            warn_throttle: TimeThrottle::new(Duration::from_secs(5)),
            sink: Some(sink),
            worker: None,
        }
    }
}

impl<S: AsyncSink + 'static> AsyncProcessingUnit for AsyncPuRuntime<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&mut self, frame: &GpuFrame, ctx: &PipelineContext) -> PuResult {
        let len = self.shared.queue.len();
        if len > DROP_THRESHOLD {
            let dropped = self.shared.queue.drop_oldest(len - WARN_THRESHOLD);
            error!(
                "{}: processing queue exceeded {} (was {}); dropped {} oldest frames",
                self.name, DROP_THRESHOLD, len, dropped
            );
        } else if len > WARN_THRESHOLD && self.warn_throttle.ready(std::time::Instant::now()) {
            warn!("{}: processing queue size is {}", self.name, len);
        }

        let deep_copy = (frame.deep_copy(), ctx.clone());
        if self.shared.queue.try_enqueue(deep_copy) {
            PuResult::SuccessAndContinue
        } else {
            PuResult::FailureAndContinue
        }
    }

    fn start(&mut self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let mut sink = self.sink.take().expect("sink already started");
        let name = self.name.clone();
        self.worker = Some(thread::spawn(move || {
            loop {
                let running = shared.running.load(Ordering::SeqCst);
                match shared.queue.wait_dequeue_timed(DRAIN_POLL_INTERVAL) {
                    Some((frame, ctx)) => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            sink.on_frame_ready(frame, ctx);
                        }));
                        if let Err(e) = result {
                            error!("{name}: on_frame_ready panicked: {e:?}");
                        }
                    }
                    None => {
                        if !running && shared.queue.is_empty() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DeviceInfo;
    use std::sync::mpsc;
    use std::time::Instant;

    struct CountingSink {
        tx: mpsc::Sender<()>,
        sleep: Duration,
    }

    impl AsyncSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_frame_ready(&mut self, _frame: GpuFrame, _ctx: PipelineContext) {
            std::thread::sleep(self.sleep);
            let _ = self.tx.send(());
        }
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 2,
                expected_height: 2,
            },
            Instant::now(),
        )
    }

    #[test]
    fn drains_queue_before_stop_returns() {
        let (tx, rx) = mpsc::channel();
        let mut runtime = AsyncPuRuntime::new(
            CountingSink {
                tx,
                sleep: Duration::from_millis(1),
            },
            64,
        );
        runtime.start();
        let frame = GpuFrame::placeholder(2, 2);
        for _ in 0..20 {
            runtime.enqueue(&frame, &ctx());
        }
        runtime.stop();
        assert_eq!(rx.try_iter().count(), 20);
    }

    #[test]
    fn overflow_drops_down_to_warn_threshold() {
        let (tx, rx) = mpsc::channel();
        let mut runtime = AsyncPuRuntime::new(
            CountingSink {
                tx,
                sleep: Duration::from_secs(10),
            },
            64,
        );
        runtime.start();
        let frame = GpuFrame::placeholder(2, 2);
        for _ in 0..35 {
            runtime.enqueue(&frame, &ctx());
        }
        // one item is in flight inside the sleeping worker.
        assert!(runtime.queue_len() <= WARN_THRESHOLD);
        runtime.stop();
        drop(rx);
    }
}
