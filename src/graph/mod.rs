//! Capture pipeline graph.
//!
//! A capture pipeline is an ordered chain of stages:
//! source → sample grabber → null renderer.
//!
//! This module provides:
//! - `GraphBackend`: the boundary to whatever SDK actually creates stages
//! - `negotiate`: the host-independent pin matching search
//! - `PipelineBuilder` / `Pipeline`: assembly, start and ordered teardown
//! - `synthetic`: an in-process backend with failure injection (tests, probes)
//!
//! Builds are all-or-nothing. A build that fails at any step tears down whatever it
//! created before the error is returned.

use std::sync::Arc;

use crate::bridge::SampleSink;
use crate::error::Result;
use crate::format::FrameFormat;

pub mod negotiate;
pub mod pipeline;
pub mod synthetic;

pub use negotiate::negotiate;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineState};
pub use synthetic::{GraphProbe, SyntheticGraph, SyntheticPlan};

/// Backend-assigned stage identifier.
pub type StageId = usize;

/// Direction of a pin relative to its stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PinDirection {
    /// Receives samples from upstream.
    Input,
    /// Sends samples downstream.
    Output,
}

/// Abstract endpoint descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinInfo {
    /// Position in the stage's pin enumeration.
    pub index: usize,
    pub direction: PinDirection,
    pub connected: bool,
}

impl PinInfo {
    pub fn input(index: usize) -> Self {
        Self {
            index,
            direction: PinDirection::Input,
            connected: false,
        }
    }

    pub fn output(index: usize) -> Self {
        Self {
            index,
            direction: PinDirection::Output,
            connected: false,
        }
    }

    /// Free and facing `direction`.
    pub fn matches(&self, direction: PinDirection) -> bool {
        !self.connected && self.direction == direction
    }
}

/// A pin on a specific stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PinRef {
    pub stage: StageId,
    pub pin: usize,
}

/// What a stage does in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageRole {
    Source,
    Converter,
    Sink,
}

/// Description of one stage to build.
#[derive(Clone, Debug, PartialEq)]
pub struct StageSpec {
    pub name: String,
    pub role: StageRole,
    /// Media format to configure on the stage, if any.
    pub format: Option<FrameFormat>,
    /// Route this stage's buffers into the pipeline's sample sink.
    pub grab_samples: bool,
    /// Connect to the next stage through this output pin only.
    pub output_pin: Option<usize>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, role: StageRole) -> Self {
        Self {
            name: name.into(),
            role,
            format: None,
            grab_samples: false,
            output_pin: None,
        }
    }

    pub fn source(name: impl Into<String>) -> Self {
        Self::new(name, StageRole::Source)
    }

    pub fn converter(name: impl Into<String>) -> Self {
        Self::new(name, StageRole::Converter)
    }

    pub fn sink(name: impl Into<String>) -> Self {
        Self::new(name, StageRole::Sink)
    }

    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn grabbing_samples(mut self) -> Self {
        self.grab_samples = true;
        self
    }

    pub fn via_output_pin(mut self, pin: usize) -> Self {
        self.output_pin = Some(pin);
        self
    }
}

/// Boundary to a filter-graph SDK.
///
/// Every call may fail; failures are reported as `CaptureError` and the builder
/// decides whether to try another pin or abort.
pub trait GraphBackend: Send {
    /// Create the stage, configure `spec.format` on it, and add it to the graph.
    fn add_stage(&mut self, spec: &StageSpec) -> Result<StageId>;

    /// Current pins of a stage, in enumeration order.
    fn pins(&self, stage: StageId) -> Result<Vec<PinInfo>>;

    /// Connect an output pin to an input pin.
    fn connect(&mut self, output: PinRef, input: PinRef) -> Result<()>;

    /// Route buffers passing through `stage` to `sink`.
    fn set_sample_sink(&mut self, stage: StageId, sink: Arc<dyn SampleSink>) -> Result<()>;

    /// Byte size of the samples `stage` receives on its connected input, if known.
    ///
    /// `None` skips the build-time size check; the sample sink still filters
    /// wrong-size buffers at delivery.
    fn connected_sample_size(&self, stage: StageId) -> Option<usize>;

    /// Start streaming.
    fn run(&mut self) -> Result<()>;

    /// Stop streaming for the whole graph.
    fn stop(&mut self) -> Result<()>;

    fn stop_stage(&mut self, stage: StageId) -> Result<()>;

    /// Remove a stage from the graph and release it.
    fn remove_stage(&mut self, stage: StageId) -> Result<()>;
}

/// Creates a fresh, empty graph for each build.
pub trait GraphFactory: Send {
    fn create_graph(&self) -> Result<Box<dyn GraphBackend>>;
}

impl<F> GraphFactory for F
where
    F: Fn() -> Result<Box<dyn GraphBackend>> + Send,
{
    fn create_graph(&self) -> Result<Box<dyn GraphBackend>> {
        self()
    }
}
