//! Synthetic graph backend for tests and `stub://` devices.
//!
//! `SyntheticGraph` behaves like a filter graph: stages have pins, pins bind once,
//! and a running graph delivers buffers from a background thread into the stage
//! that grabs samples. A `SyntheticPlan` injects failures at each step. A shared
//! `GraphProbe` records what happened so tests can count attempts and leaks after
//! the graph itself has been dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{GraphBackend, PinDirection, PinInfo, PinRef, StageId, StageRole, StageSpec};
use crate::bridge::SampleSink;
use crate::error::{CaptureError, Result};
use crate::format::{FrameFormat, FRAME_DURATION_HNS};

/// Failure injection and delivery settings for a synthetic graph.
#[derive(Clone, Debug, Default)]
pub struct SyntheticPlan {
    /// Buffers per second once running. Zero means the device never delivers.
    pub fps: u32,
    /// Stage name whose creation fails.
    pub fail_stage: Option<String>,
    /// Pin layout overrides by stage name.
    pub pins: HashMap<String, Vec<PinDirection>>,
    /// (stage name, input pin) pairs that refuse every connection.
    pub rejected_inputs: Vec<(String, usize)>,
    /// Byte size delivered instead of the configured sample size.
    pub delivered_size: Option<usize>,
    pub fail_run: bool,
    /// Device clock start in 100-ns ticks. Buffers are stamped
    /// `start + n * FRAME_DURATION_HNS`; `None` stamps on arrival.
    pub device_clock: Option<i64>,
    /// Stop delivering after this many buffers.
    pub frame_limit: Option<u64>,
    /// Report the negotiated sample size as unknown.
    pub hide_sample_size: bool,
}

impl SyntheticPlan {
    /// Builds fine, never delivers.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Builds fine, delivers `fps` buffers per second.
    pub fn streaming(fps: u32) -> Self {
        Self {
            fps,
            ..Self::default()
        }
    }

    pub fn failing_stage(mut self, stage: impl Into<String>) -> Self {
        self.fail_stage = Some(stage.into());
        self
    }

    pub fn with_pins(mut self, stage: impl Into<String>, pins: Vec<PinDirection>) -> Self {
        self.pins.insert(stage.into(), pins);
        self
    }

    pub fn rejecting_input(mut self, stage: impl Into<String>, pin: usize) -> Self {
        self.rejected_inputs.push((stage.into(), pin));
        self
    }

    pub fn delivering(mut self, size: usize) -> Self {
        self.delivered_size = Some(size);
        self
    }

    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    pub fn stamping_from(mut self, start: i64) -> Self {
        self.device_clock = Some(start);
        self
    }

    pub fn limited_to(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn hiding_sample_size(mut self) -> Self {
        self.hide_sample_size = true;
        self
    }

    fn pins_for(&self, spec: &StageSpec) -> Vec<PinDirection> {
        if let Some(pins) = self.pins.get(&spec.name) {
            return pins.clone();
        }
        match spec.role {
            StageRole::Source => vec![PinDirection::Output],
            StageRole::Converter => vec![PinDirection::Input, PinDirection::Output],
            StageRole::Sink => vec![PinDirection::Input],
        }
    }
}

/// Shared record of what synthetic graphs did.
#[derive(Default)]
pub struct GraphProbe {
    graphs_created: AtomicUsize,
    stages_created: AtomicUsize,
    live_stages: AtomicUsize,
    removals: AtomicUsize,
    connect_attempts: AtomicUsize,
    runs: AtomicUsize,
    connections: Mutex<Vec<(String, usize, String, usize)>>,
    teardown_log: Mutex<Vec<String>>,
}

impl GraphProbe {
    pub fn graphs_created(&self) -> usize {
        self.graphs_created.load(Ordering::SeqCst)
    }

    /// Stage creation attempts, including failed ones.
    pub fn stages_created(&self) -> usize {
        self.stages_created.load(Ordering::SeqCst)
    }

    /// Stages created and not yet released.
    pub fn live_stages(&self) -> usize {
        self.live_stages.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Successful links as (upstream, output pin, downstream, input pin).
    pub fn connections(&self) -> Vec<(String, usize, String, usize)> {
        lock_vec(&self.connections).clone()
    }

    /// Stop/remove calls in the order they happened.
    pub fn teardown_log(&self) -> Vec<String> {
        lock_vec(&self.teardown_log).clone()
    }

    pub(crate) fn note_teardown(&self, entry: String) {
        lock_vec(&self.teardown_log).push(entry);
    }

    /// Count a creation attempt; `live` when the resource now exists.
    pub(crate) fn note_created(&self, live: bool) {
        self.stages_created.fetch_add(1, Ordering::SeqCst);
        if live {
            self.live_stages.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn note_run(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release_stage(&self) {
        self.live_stages.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock_vec<T>(m: &Mutex<Vec<T>>) -> std::sync::MutexGuard<'_, Vec<T>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SyntheticPin {
    direction: PinDirection,
    peer: Option<PinRef>,
}

struct SyntheticStage {
    name: String,
    role: StageRole,
    format: Option<FrameFormat>,
    pins: Vec<SyntheticPin>,
    sink: Option<Arc<dyn SampleSink>>,
}

/// In-process filter graph.
pub struct SyntheticGraph {
    plan: SyntheticPlan,
    probe: Arc<GraphProbe>,
    stages: Vec<Option<SyntheticStage>>,
    feed: Option<SyntheticFeed>,
}

impl SyntheticGraph {
    pub fn new(plan: SyntheticPlan, probe: Arc<GraphProbe>) -> Self {
        probe.graphs_created.fetch_add(1, Ordering::SeqCst);
        Self {
            plan,
            probe,
            stages: Vec::new(),
            feed: None,
        }
    }

    fn stage(&self, id: StageId) -> Option<&SyntheticStage> {
        self.stages.get(id).and_then(Option::as_ref)
    }

    fn stage_mut(&mut self, id: StageId) -> Option<&mut SyntheticStage> {
        self.stages.get_mut(id).and_then(Option::as_mut)
    }

    fn free_pin(&self, at: PinRef, direction: PinDirection) -> Result<&SyntheticStage> {
        let stage = self
            .stage(at.stage)
            .ok_or_else(|| CaptureError::rejected(format!("no stage {}", at.stage)))?;
        let pin = stage
            .pins
            .get(at.pin)
            .ok_or_else(|| CaptureError::rejected(format!("no pin {} on '{}'", at.pin, stage.name)))?;
        if pin.direction != direction {
            return Err(CaptureError::rejected(format!(
                "pin {} on '{}' faces the wrong way",
                at.pin, stage.name
            )));
        }
        if pin.peer.is_some() {
            return Err(CaptureError::rejected(format!(
                "pin {} on '{}' is already connected",
                at.pin, stage.name
            )));
        }
        Ok(stage)
    }

    fn stop_feed(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
        }
    }
}

impl GraphBackend for SyntheticGraph {
    fn add_stage(&mut self, spec: &StageSpec) -> Result<StageId> {
        if self.plan.fail_stage.as_deref() == Some(spec.name.as_str()) {
            self.probe.note_created(false);
            return Err(CaptureError::stage_creation(&spec.name, "class not registered"));
        }

        let pins = self
            .plan
            .pins_for(spec)
            .into_iter()
            .map(|direction| SyntheticPin {
                direction,
                peer: None,
            })
            .collect();
        self.stages.push(Some(SyntheticStage {
            name: spec.name.clone(),
            role: spec.role,
            format: spec.format,
            pins,
            sink: None,
        }));
        self.probe.note_created(true);
        Ok(self.stages.len() - 1)
    }

    fn pins(&self, stage: StageId) -> Result<Vec<PinInfo>> {
        let stage = self.stage(stage).ok_or_else(|| CaptureError::PinEnumeration {
            stage: stage.to_string(),
            reason: "stage not in graph".to_string(),
        })?;
        Ok(stage
            .pins
            .iter()
            .enumerate()
            .map(|(index, pin)| PinInfo {
                index,
                direction: pin.direction,
                connected: pin.peer.is_some(),
            })
            .collect())
    }

    fn connect(&mut self, output: PinRef, input: PinRef) -> Result<()> {
        self.probe.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let upstream = self.free_pin(output, PinDirection::Output)?.name.clone();
        let downstream = self.free_pin(input, PinDirection::Input)?.name.clone();
        if self
            .plan
            .rejected_inputs
            .iter()
            .any(|(name, pin)| *name == downstream && *pin == input.pin)
        {
            return Err(CaptureError::rejected(format!(
                "'{}' pin {} refused the media type",
                downstream, input.pin
            )));
        }

        if let Some(stage) = self.stage_mut(output.stage) {
            stage.pins[output.pin].peer = Some(input);
        }
        if let Some(stage) = self.stage_mut(input.stage) {
            stage.pins[input.pin].peer = Some(output);
        }
        lock_vec(&self.probe.connections).push((upstream, output.pin, downstream, input.pin));
        Ok(())
    }

    fn set_sample_sink(&mut self, stage: StageId, sink: Arc<dyn SampleSink>) -> Result<()> {
        let stage = self.stage_mut(stage).ok_or_else(|| CaptureError::Callback {
            stage: stage.to_string(),
            reason: "stage not in graph".to_string(),
        })?;
        stage.sink = Some(sink);
        Ok(())
    }

    fn connected_sample_size(&self, stage: StageId) -> Option<usize> {
        if self.plan.hide_sample_size {
            return None;
        }
        let stage = self.stage(stage)?;
        let upstream = stage
            .pins
            .iter()
            .filter(|pin| pin.direction == PinDirection::Input)
            .find_map(|pin| pin.peer)?;
        let format = stage
            .format
            .or_else(|| self.stage(upstream.stage).and_then(|up| up.format));
        self.plan
            .delivered_size
            .or_else(|| format.map(|format| format.sample_size()))
    }

    fn run(&mut self) -> Result<()> {
        if self.plan.fail_run {
            return Err(CaptureError::StartFailed {
                reason: "graph refused to run".to_string(),
            });
        }
        self.probe.note_run();
        if self.plan.fps == 0 {
            return Ok(());
        }

        let grabber = self
            .stages
            .iter()
            .flatten()
            .find(|stage| stage.sink.is_some());
        let Some(grabber) = grabber else {
            return Ok(());
        };
        let size = self
            .plan
            .delivered_size
            .or_else(|| grabber.format.map(|format| format.sample_size()))
            .unwrap_or_default();
        let sink = grabber.sink.clone();
        if let Some(sink) = sink {
            self.feed = Some(SyntheticFeed::start(sink, size, &self.plan)?);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_feed();
        Ok(())
    }

    fn stop_stage(&mut self, stage: StageId) -> Result<()> {
        let (name, role) = match self.stage(stage) {
            Some(stage) => (stage.name.clone(), stage.role),
            None => {
                return Err(CaptureError::Device {
                    reason: format!("no stage {}", stage),
                })
            }
        };
        if role == StageRole::Source {
            self.stop_feed();
        }
        self.probe.note_teardown(format!("stop {}", name));
        Ok(())
    }

    fn remove_stage(&mut self, stage: StageId) -> Result<()> {
        let removed = self
            .stages
            .get_mut(stage)
            .and_then(Option::take)
            .ok_or_else(|| CaptureError::Device {
                reason: format!("no stage {}", stage),
            })?;

        for peer in removed.pins.iter().filter_map(|pin| pin.peer) {
            if let Some(other) = self.stage_mut(peer.stage) {
                if let Some(pin) = other.pins.get_mut(peer.pin) {
                    pin.peer = None;
                }
            }
        }
        self.probe.release_stage();
        self.probe.removals.fetch_add(1, Ordering::SeqCst);
        self.probe.note_teardown(format!("remove {}", removed.name));
        Ok(())
    }
}

impl Drop for SyntheticGraph {
    fn drop(&mut self) {
        self.stop_feed();
        // Releasing the graph releases whatever it still holds.
        for _ in self.stages.drain(..).flatten() {
            self.probe.release_stage();
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery thread
// ----------------------------------------------------------------------------

/// Background thread pushing synthetic buffers into a sink at `plan.fps`.
pub(crate) struct SyntheticFeed {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticFeed {
    pub(crate) fn start(
        sink: Arc<dyn SampleSink>,
        sample_size: usize,
        plan: &SyntheticPlan,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let interval = Duration::from_secs(1) / plan.fps.max(1);
        let device_clock = plan.device_clock;
        let frame_limit = plan.frame_limit.unwrap_or(u64::MAX);
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let mut frame_count: u64 = 0;
                // Per-run offset so consecutive runs produce different pixels.
                let scene: u8 = rand::random();
                while flag.load(Ordering::Acquire) && frame_count < frame_limit {
                    let pixels = synthetic_pixels(sample_size, frame_count, scene);
                    match device_clock {
                        Some(start) => {
                            let ticks = start + frame_count as i64 * FRAME_DURATION_HNS;
                            sink.on_sample(ticks, &pixels);
                        }
                        None => sink.on_buffer(&pixels),
                    }
                    frame_count += 1;
                    thread::sleep(interval);
                }
            })
            .map_err(|err| CaptureError::StartFailed {
                reason: format!("spawn synthetic capture thread: {}", err),
            })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Halt delivery and wait for the thread. After this returns the sink is
    /// never called again by this feed.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("SyntheticFeed: capture thread panicked");
            }
        }
    }
}

impl Drop for SyntheticFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn synthetic_pixels(size: usize, frame_count: u64, scene: u8) -> Vec<u8> {
    let mut pixels = vec![0u8; size];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_count + scene as u64) % 256) as u8;
    }
    pixels
}
