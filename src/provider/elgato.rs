//! Elgato capture provider.
//!
//! Capture runs through a filter graph:
//! `Elgato Game Capture HD` → `Sample Grabber` → `Null Renderer`.
//!
//! The grabber hands every buffer to a `SampleBridge`; the compositor reads the
//! newest one back through `update` and `timestamp`.
//!
//! Initializing this hardware can block for seconds, and retrying after a failure
//! has been seen to hang the host. The first failure is therefore latched and
//! returned on every later `initialize` without touching the device.

use std::sync::Arc;

use super::{
    frame_slot, ColorTarget, CopyMode, DeviceHandle, ErrorLatch, FrameProvider, InitStatus,
    OutputSurface, ProviderState, ProviderType,
};
use crate::bridge::{BridgeStats, SampleBridge, NO_TIMESTAMP};
use crate::error::Result;
use crate::format::{FrameFormat, FRAME_DURATION_HNS};
use crate::graph::{
    GraphBackend, GraphFactory, GraphProbe, Pipeline, PipelineBuilder, StageSpec, SyntheticGraph,
    SyntheticPlan,
};

pub const SOURCE_STAGE: &str = "Elgato Game Capture HD";
pub const GRABBER_STAGE: &str = "Sample Grabber";
pub const NULL_STAGE: &str = "Null Renderer";

pub struct ElgatoFrameProvider {
    factory: Box<dyn GraphFactory>,
    format: FrameFormat,
    copy_mode: CopyMode,
    state: ProviderState,
    latch: ErrorLatch,
    color: Option<Box<dyn ColorTarget>>,
    device: Option<DeviceHandle>,
    pipeline: Option<Pipeline>,
    bridge: Option<Arc<SampleBridge>>,
    build_attempts: u32,
}

impl ElgatoFrameProvider {
    pub fn new(format: FrameFormat, use_cpu: bool, factory: impl GraphFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            format,
            copy_mode: CopyMode::from_use_cpu(use_cpu),
            state: ProviderState::Uninitialized,
            latch: ErrorLatch::default(),
            color: None,
            device: None,
            pipeline: None,
            bridge: None,
            build_attempts: 0,
        }
    }

    /// Provider backed by a `SyntheticGraph` built from `plan`.
    pub fn synthetic(format: FrameFormat, use_cpu: bool, plan: SyntheticPlan) -> Self {
        Self::synthetic_with_probe(format, use_cpu, plan, Arc::new(GraphProbe::default()))
    }

    /// Like `synthetic`, recording graph activity into `probe`.
    pub fn synthetic_with_probe(
        format: FrameFormat,
        use_cpu: bool,
        plan: SyntheticPlan,
        probe: Arc<GraphProbe>,
    ) -> Self {
        let factory = move || -> Result<Box<dyn GraphBackend>> {
            Ok(Box::new(SyntheticGraph::new(plan.clone(), Arc::clone(&probe))))
        };
        Self::new(format, use_cpu, factory)
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Number of times a graph build was started.
    pub fn build_attempts(&self) -> u32 {
        self.build_attempts
    }

    pub fn bridge_stats(&self) -> Option<BridgeStats> {
        self.bridge.as_ref().map(|bridge| bridge.stats())
    }

    fn build_graph(&self, bridge: Arc<SampleBridge>) -> Result<Pipeline> {
        let backend = self.factory.create_graph()?;
        PipelineBuilder::new()
            .stage(StageSpec::source(SOURCE_STAGE).with_format(self.format))
            .stage(
                StageSpec::converter(GRABBER_STAGE)
                    .with_format(self.format)
                    .grabbing_samples(),
            )
            .stage(StageSpec::sink(NULL_STAGE))
            .sample_sink(bridge)
            .build(backend)
    }

    /// Stop the graph, then release it, then the bridge.
    fn destroy_graph(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.teardown();
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.close();
        }
        self.color = None;
        self.device = None;
    }
}

impl FrameProvider for ElgatoFrameProvider {
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

        match self.build_graph(bridge) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => {
                log::warn!("ElgatoFrameProvider: failed building capture graph: {}", err);
                self.latch.latch(&err);
                self.destroy_graph();
                self.state = ProviderState::ErrorLatched(err.clone());
                return Err(err);
            }
        }

        if !self.is_enabled() {
            log::info!("ElgatoFrameProvider: graph running, waiting for first frame");
            return Ok(InitStatus::Pending);
        }

        self.state = ProviderState::Enabled;
        Ok(InitStatus::Ready)
    }

    fn update(&mut self, composite_frame_index: i32) {
        if !self.is_enabled() || self.device.is_none() || self.pipeline.is_none() {
            return;
        }
        let (Some(color), Some(bridge)) = (self.color.as_mut(), self.bridge.as_ref()) else {
            return;
        };
        if self.state == ProviderState::Initializing {
            self.state = ProviderState::Enabled;
        }

        let Some(sample) = bridge.latest() else {
            return;
        };
        let slot = frame_slot(composite_frame_index);
        if let Err(err) = color.write_frame(slot, &sample, self.copy_mode) {
            log::debug!("ElgatoFrameProvider: frame copy into slot {} failed: {}", slot, err);
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
        ProviderType::Elgato
    }

    fn is_enabled(&self) -> bool {
        self.bridge.as_ref().is_some_and(|bridge| bridge.is_enabled())
    }

    fn supports_output(&self) -> bool {
        false
    }

    fn dispose(&mut self) {
        self.destroy_graph();
        if self.state != ProviderState::Disposed {
            log::info!("ElgatoFrameProvider: disposed");
        }
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
}

impl Drop for ElgatoFrameProvider {
    fn drop(&mut self) {
        self.destroy_graph();
    }
}
