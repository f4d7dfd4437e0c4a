//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The pipeline executor (spec §4.2): holds an ordered list of PU slots,
//! invokes them per frame, short-circuits on `*_stop`, and skips disabled or
//! out-of-active-hours PUs.

use crate::frame::{GpuFrame, PipelineContext};
use crate::pu::{
    all_hours_active, is_hour_active, ActiveHours, AsyncProcessingUnit, PuResult,
    SyncProcessingUnit,
};
use chrono::Timelike;
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-PU operator controls: can be toggled at runtime (spec §4.2 step 1:
/// "disabled (by operator action)").
#[derive(Clone)]
pub struct PuControl {
    enabled: Arc<AtomicBool>,
    active_hours: ActiveHours,
}

impl PuControl {
    pub fn new(active_hours: ActiveHours) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
            active_hours,
        }
    }

    pub fn always_on() -> Self {
        Self::new(all_hours_active())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn should_run(&self, local_hour: u32) -> bool {
        self.is_enabled() && is_hour_active(&self.active_hours, local_hour)
    }
}

enum Slot {
    Sync {
        control: PuControl,
        unit: Box<dyn SyncProcessingUnit>,
    },
    Async {
        control: PuControl,
        unit: Box<dyn AsyncProcessingUnit>,
    },
}

/// Declarative, ordered chain of PUs (spec §4.2 "Construction").
pub struct PipelineExecutor {
    slots: Vec<Slot>,
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn push_sync(&mut self, unit: Box<dyn SyncProcessingUnit>, control: PuControl) {
        self.slots.push(Slot::Sync { control, unit });
    }

    pub fn push_async(&mut self, mut unit: Box<dyn AsyncProcessingUnit>, control: PuControl) {
        unit.start();
        self.slots.push(Slot::Async { control, unit });
    }

    pub fn control(&self, index: usize) -> Option<&PuControl> {
        self.slots.get(index).map(|slot| match slot {
            Slot::Sync { control, .. } => control,
            Slot::Async { control, .. } => control,
        })
    }

    /// Runs every PU in order for one frame (spec §4.2 steps 1-4).
    pub fn run(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) {
        let local_hour = chrono::Local::now().hour();

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Slot::Sync { control, unit } => {
                    if !control.should_run(local_hour) {
                        continue;
                    }
                    ctx.processing_unit_idx = idx;
                    let result = unit.process(frame, ctx);
                    if matches!(
                        result,
                        PuResult::FailureAndContinue | PuResult::FailureAndStop
                    ) {
                        warn!("PU '{}' reported failure on frame {}", unit.name(), ctx.frame_seq_num);
                    }
                    if result.should_stop() {
                        break;
                    }
                }
                Slot::Async { control, unit } => {
                    if !control.should_run(local_hour) {
                        continue;
                    }
                    ctx.processing_unit_idx = idx;
                    let result = unit.enqueue(frame, ctx);
                    if result == PuResult::FailureAndContinue {
                        warn!(
                            "async PU '{}' failed to enqueue frame {} (queue closed or clone failed)",
                            unit.name(),
                            ctx.frame_seq_num
                        );
                    }
                    // enqueue never returns a *_stop variant (spec §4.2 step 4).
                }
            }
        }
    }

    /// Stops every async worker, joining them so each drains its queue
    /// before this returns (spec §5 shutdown ordering: "worker-first").
    pub fn shutdown(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Slot::Async { unit, .. } = slot {
                unit.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DeviceInfo;
    use std::time::Instant;

    struct AlwaysStop;
    impl SyncProcessingUnit for AlwaysStop {
        fn name(&self) -> &str {
            "always_stop"
        }
        fn process(&mut self, _frame: &mut GpuFrame, _ctx: &mut PipelineContext) -> PuResult {
            PuResult::SuccessAndStop
        }
    }

    struct Counter(Arc<AtomicBool>);
    impl SyncProcessingUnit for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn process(&mut self, _frame: &mut GpuFrame, _ctx: &mut PipelineContext) -> PuResult {
            self.0.store(true, Ordering::SeqCst);
            PuResult::SuccessAndContinue
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
    fn stop_short_circuits_remaining_pus() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut exec = PipelineExecutor::new();
        exec.push_sync(Box::new(AlwaysStop), PuControl::always_on());
        exec.push_sync(Box::new(Counter(Arc::clone(&ran))), PuControl::always_on());

        let mut frame = GpuFrame::placeholder(2, 2);
        let mut c = ctx();
        exec.run(&mut frame, &mut c);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn disabled_pu_is_skipped() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut exec = PipelineExecutor::new();
        let control = PuControl::always_on();
        control.set_enabled(false);
        exec.push_sync(Box::new(Counter(Arc::clone(&ran))), control);

        let mut frame = GpuFrame::placeholder(2, 2);
        let mut c = ctx();
        exec.run(&mut frame, &mut c);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn all_hours_masked_off_disables_pu_entirely() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut exec = PipelineExecutor::new();
        let control = PuControl::new([false; 24]);
        exec.push_sync(Box::new(Counter(Arc::clone(&ran))), control);

        let mut frame = GpuFrame::placeholder(2, 2);
        let mut c = ctx();
        exec.run(&mut frame, &mut c);
        assert!(!ran.load(Ordering::SeqCst));
    }
}
