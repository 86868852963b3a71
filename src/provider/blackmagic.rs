//! BlackMagic capture provider.
//!
//! DeckLink cards have no filter graph. The device is opened, its video input is
//! enabled in the negotiated format, a frame callback is installed and streams are
//! started. Frames arrive on the driver's thread and land in a `SampleBridge`.
//!
//! Each acquired step is held by an `InputSession`, which undoes the steps in
//! reverse order when dropped, so a failure halfway through leaves nothing open.

use std::sync::Arc;

use super::{
    frame_slot, ColorTarget, CopyMode, DeviceHandle, ErrorLatch, FrameProvider, InitStatus,
    OutputSurface, ProviderState, ProviderType,
};
use crate::bridge::{SampleBridge, SampleSink, NO_TIMESTAMP};
use crate::error::{CaptureError, Result};
use crate::format::{FrameFormat, FRAME_DURATION_HNS};
use crate::graph::synthetic::SyntheticFeed;
use crate::graph::{GraphProbe, SyntheticPlan};

pub const INPUT_STAGE: &str = "DeckLink Input";

/// Boundary to a DeckLink-style input device.
pub trait DeckLinkDevice: Send {
    /// Enable video input in `format`. Returns the byte size of each delivered frame.
    fn enable_video_input(&mut self, format: &FrameFormat) -> Result<usize>;

    fn set_callback(&mut self, sink: Arc<dyn SampleSink>) -> Result<()>;

    fn start_streams(&mut self) -> Result<()>;

    fn stop_streams(&mut self) -> Result<()>;

    fn disable_video_input(&mut self) -> Result<()>;
}

/// Opens the capture device for each build.
pub trait DeckLinkFactory: Send {
    fn open(&self) -> Result<Box<dyn DeckLinkDevice>>;
}

impl<F> DeckLinkFactory for F
where
    F: Fn() -> Result<Box<dyn DeckLinkDevice>> + Send,
{
    fn open(&self) -> Result<Box<dyn DeckLinkDevice>> {
        self()
    }
}

/// An opened device plus the steps taken on it so far.
struct InputSession {
    device: Box<dyn DeckLinkDevice>,
    input_enabled: bool,
    streaming: bool,
}

impl InputSession {
    fn start(
        device: Box<dyn DeckLinkDevice>,
        format: &FrameFormat,
        sink: Arc<dyn SampleSink>,
    ) -> Result<Self> {
        let mut session = Self {
            device,
            input_enabled: false,
            streaming: false,
        };

        let frame_size = session.device.enable_video_input(format)?;
        session.input_enabled = true;
        format.check_sample_size(INPUT_STAGE, frame_size)?;

        session.device.set_callback(sink)?;
        session.device.start_streams()?;
        session.streaming = true;
        Ok(session)
    }

    fn close(&mut self) {
        if self.streaming {
            if let Err(err) = self.device.stop_streams() {
                log::warn!("BlackMagicFrameProvider: failed stopping streams: {}", err);
            }
            self.streaming = false;
        }
        if self.input_enabled {
            if let Err(err) = self.device.disable_video_input() {
                log::warn!("BlackMagicFrameProvider: failed disabling input: {}", err);
            }
            self.input_enabled = false;
        }
    }
}

impl Drop for InputSession {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct BlackMagicFrameProvider {
    factory: Box<dyn DeckLinkFactory>,
    format: FrameFormat,
    copy_mode: CopyMode,
    state: ProviderState,
    latch: ErrorLatch,
    color: Option<Box<dyn ColorTarget>>,
    device: Option<DeviceHandle>,
    session: Option<InputSession>,
    bridge: Option<Arc<SampleBridge>>,
    build_attempts: u32,
}

impl BlackMagicFrameProvider {
    pub fn new(format: FrameFormat, use_cpu: bool, factory: impl DeckLinkFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            format,
            copy_mode: CopyMode::from_use_cpu(use_cpu),
            state: ProviderState::Uninitialized,
            latch: ErrorLatch::default(),
            color: None,
            device: None,
            session: None,
            bridge: None,
            build_attempts: 0,
        }
    }

    pub fn synthetic(format: FrameFormat, use_cpu: bool, plan: SyntheticPlan) -> Self {
        Self::synthetic_with_probe(format, use_cpu, plan, Arc::new(GraphProbe::default()))
    }

    pub fn synthetic_with_probe(
        format: FrameFormat,
        use_cpu: bool,
        plan: SyntheticPlan,
        probe: Arc<GraphProbe>,
    ) -> Self {
        let factory = move || -> Result<Box<dyn DeckLinkDevice>> {
            Ok(Box::new(SyntheticDeckLink::open(plan.clone(), Arc::clone(&probe))?))
        };
        Self::new(format, use_cpu, factory)
    }

    pub fn build_attempts(&self) -> u32 {
        self.build_attempts
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.close();
        }
        self.color = None;
        self.device = None;
    }
}

impl FrameProvider for BlackMagicFrameProvider {
    fn initialize(
        &mut self,
        color: Option<Box<dyn ColorTarget>>,
        _output: Option<OutputSurface>,
    ) -> Result<InitStatus> {
        if let Err(err) = self.latch.check() {
            self.state = ProviderState::ErrorLatched(err.clone());
            return Err(err);
        }
        if self.is_enabled() {
            self.state = ProviderState::Enabled;
            return Ok(InitStatus::Ready);
        }
        if self.bridge.is_some() {
            return Ok(InitStatus::Pending);
        }

        self.device = color.as_ref().and_then(|color| color.device());
        self.color = color;
        self.state = ProviderState::Initializing;

        let bridge = Arc::new(SampleBridge::with_expected_size(self.format.sample_size()));
        self.bridge = Some(Arc::clone(&bridge));
        self.build_attempts += 1;

        let started = self
            .factory
            .open()
            .and_then(|device| InputSession::start(device, &self.format, bridge));
        match started {
            Ok(session) => self.session = Some(session),
            Err(err) => {
                log::warn!("BlackMagicFrameProvider: failed starting capture: {}", err);
                self.latch.latch(&err);
                self.release();
                self.state = ProviderState::ErrorLatched(err.clone());
                return Err(err);
            }
        }

        if !self.is_enabled() {
            return Ok(InitStatus::Pending);
        }
        self.state = ProviderState::Enabled;
        Ok(InitStatus::Ready)
    }

    fn update(&mut self, composite_frame_index: i32) {
        if !self.is_enabled() || self.device.is_none() || self.session.is_none() {
            return;
        }
        let (Some(color), Some(bridge)) = (self.color.as_mut(), self.bridge.as_ref()) else {
            return;
        };
        if self.state == ProviderState::Initializing {
            self.state = ProviderState::Enabled;
        }
        if let Some(sample) = bridge.latest() {
            let slot = frame_slot(composite_frame_index);
            if let Err(err) = color.write_frame(slot, &sample, self.copy_mode) {
                log::debug!("BlackMagicFrameProvider: copy into slot {} failed: {}", slot, err);
            }
        }
    }

    fn timestamp(&self, _frame: i32) -> i64 {
        self.bridge
            .as_ref()
            .map_or(NO_TIMESTAMP, |bridge| bridge.timestamp())
    }

    fn duration_hns(&self) -> i64 {
        FRAME_DURATION_HNS
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::BlackMagic
    }

    fn is_enabled(&self) -> bool {
        self.bridge.as_ref().is_some_and(|bridge| bridge.is_enabled())
    }

    // Output to the card is not implemented here.
    fn supports_output(&self) -> bool {
        false
    }

    fn dispose(&mut self) {
        self.release();
        self.state = ProviderState::Disposed;
    }

    fn output_yuv(&self) -> bool {
        self.format.layout.is_yuv()
    }

    fn state(&self) -> ProviderState {
        match &self.state {
            ProviderState::Initializing if self.is_enabled() => ProviderState::Enabled,
            state => state.clone(),
        }
    }

    fn capture_frame_index(&self) -> i32 {
        self.bridge.as_ref().map_or(0, |bridge| {
            i32::try_from(bridge.frames_received()).unwrap_or(i32::MAX)
        })
    }
}

impl Drop for BlackMagicFrameProvider {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic DeckLink (stub://)
// ----------------------------------------------------------------------------

/// In-process DeckLink device driven by a `SyntheticPlan`.
///
/// Opening fails when the plan fails the `DeckLink Input` stage; starting fails
/// with `fail_run`. The device counts as one live resource in the probe.
pub struct SyntheticDeckLink {
    plan: SyntheticPlan,
    probe: Arc<GraphProbe>,
    frame_size: usize,
    sink: Option<Arc<dyn SampleSink>>,
    feed: Option<SyntheticFeed>,
}

impl SyntheticDeckLink {
    pub fn open(plan: SyntheticPlan, probe: Arc<GraphProbe>) -> Result<Self> {
        if plan.fail_stage.as_deref() == Some(INPUT_STAGE) {
            probe.note_created(false);
            return Err(CaptureError::Device {
                reason: "no DeckLink device found".to_string(),
            });
        }
        probe.note_created(true);
        Ok(Self {
            plan,
            probe,
            frame_size: 0,
            sink: None,
            feed: None,
        })
    }
}

impl DeckLinkDevice for SyntheticDeckLink {
    fn enable_video_input(&mut self, format: &FrameFormat) -> Result<usize> {
        self.frame_size = self.plan.delivered_size.unwrap_or(format.sample_size());
        Ok(self.frame_size)
    }

    fn set_callback(&mut self, sink: Arc<dyn SampleSink>) -> Result<()> {
        self.sink = Some(sink);
        Ok(())
    }

    fn start_streams(&mut self) -> Result<()> {
        if self.plan.fail_run {
            return Err(CaptureError::StartFailed {
                reason: "device refused to start streams".to_string(),
            });
        }
        self.probe.note_run();
        if self.plan.fps > 0 {
            if let Some(sink) = self.sink.clone() {
                self.feed = Some(SyntheticFeed::start(sink, self.frame_size, &self.plan)?);
            }
        }
        Ok(())
    }

    fn stop_streams(&mut self) -> Result<()> {
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
        }
        self.probe.note_teardown(format!("stop {}", INPUT_STAGE));
        Ok(())
    }

    fn disable_video_input(&mut self) -> Result<()> {
        self.probe.note_teardown(format!("disable {}", INPUT_STAGE));
        Ok(())
    }
}

impl Drop for SyntheticDeckLink {
    fn drop(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
        }
        self.probe.release_stage();
    }
}
