//! Pipeline assembly and teardown.

use std::sync::Arc;

use super::{negotiate, GraphBackend, PinRef, StageId, StageSpec};
use crate::bridge::SampleSink;
use crate::error::{CaptureError, Result};

/// Lifecycle of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Stages are being added and linked.
    Unbuilt,
    Running,
    Stopped,
    TornDown,
}

/// Ordered stage list and its run sequence.
pub struct PipelineBuilder {
    stages: Vec<StageSpec>,
    sample_sink: Option<Arc<dyn SampleSink>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            sample_sink: None,
        }
    }

    /// Append a stage. Stages are linked in the order they are added.
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Sink for stages built with `grab_samples`.
    pub fn sample_sink(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.sample_sink = Some(sink);
        self
    }

    /// Build, link, verify and start the pipeline on `backend`.
    ///
    /// Either returns a running pipeline or an error; on error every stage created
    /// so far has already been stopped and removed.
    pub fn build(self, backend: Box<dyn GraphBackend>) -> Result<Pipeline> {
        let mut pipeline = Pipeline {
            backend,
            stages: Vec::with_capacity(self.stages.len()),
            state: PipelineState::Unbuilt,
        };

        // Any early return drops `pipeline`, which tears down the partial graph.
        for (position, spec) in self.stages.iter().enumerate() {
            let id = pipeline.backend.add_stage(spec).map_err(|err| {
                log::warn!("Pipeline: failed creating stage '{}': {}", spec.name, err);
                err
            })?;
            pipeline.stages.push((id, spec.name.clone()));

            if spec.grab_samples {
                let sink = self.sample_sink.clone().ok_or_else(|| CaptureError::Callback {
                    stage: spec.name.clone(),
                    reason: "no sample sink supplied".to_string(),
                })?;
                pipeline.backend.set_sample_sink(id, sink).map_err(|err| {
                    log::warn!("Pipeline: failed attaching callback to '{}': {}", spec.name, err);
                    err
                })?;
            }

            if position > 0 {
                let upstream = &self.stages[position - 1];
                let upstream_id = pipeline.stages[position - 1].0;
                pipeline.link(upstream, upstream_id, spec, id)?;
            }
        }

        for (spec, (id, _)) in self.stages.iter().zip(pipeline.stages.iter()) {
            let Some(format) = spec.format else {
                continue;
            };
            if spec.role == super::StageRole::Source {
                continue;
            }
            match pipeline.backend.connected_sample_size(*id) {
                Some(received) => format.check_sample_size(&spec.name, received)?,
                None => log::debug!(
                    "Pipeline: '{}' does not report its sample size, checking at delivery",
                    spec.name
                ),
            }
        }

        pipeline.backend.run().map_err(|err| {
            log::warn!("Pipeline: failed starting: {}", err);
            err
        })?;
        pipeline.state = PipelineState::Running;
        log::info!("Pipeline: running with {} stages", pipeline.stages.len());
        Ok(pipeline)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built capture graph. Dropping it tears it down.
pub struct Pipeline {
    backend: Box<dyn GraphBackend>,
    /// Stage ids in acquisition order, upstream first.
    stages: Vec<(StageId, String)>,
    state: PipelineState,
}

impl Pipeline {
    fn link(
        &mut self,
        upstream: &StageSpec,
        upstream_id: StageId,
        downstream: &StageSpec,
        downstream_id: StageId,
    ) -> Result<()> {
        let mut outputs = self.backend.pins(upstream_id)?;
        if let Some(explicit) = upstream.output_pin {
            outputs.retain(|pin| pin.index == explicit);
        }
        let inputs = self.backend.pins(downstream_id)?;

        let backend = &mut self.backend;
        let linked = negotiate(&outputs, &inputs, |output, input| {
            backend.connect(
                PinRef {
                    stage: upstream_id,
                    pin: output.index,
                },
                PinRef {
                    stage: downstream_id,
                    pin: input.index,
                },
            )
        });

        match linked {
            Some((output, input)) => {
                log::debug!(
                    "Pipeline: linked '{}' pin {} -> '{}' pin {}",
                    upstream.name,
                    output,
                    downstream.name,
                    input
                );
                Ok(())
            }
            None => {
                log::warn!(
                    "Pipeline: failed connecting '{}' to '{}'",
                    upstream.name,
                    downstream.name
                );
                Err(CaptureError::NoCompatibleEndpoint {
                    upstream: upstream.name.clone(),
                    downstream: downstream.name.clone(),
                })
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(_, name)| name.as_str())
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Halt streaming without releasing stages.
    pub fn stop(&mut self) {
        if self.state != PipelineState::Running {
            return;
        }
        if let Err(err) = self.backend.stop() {
            log::warn!("Pipeline: stop failed: {}", err);
        }
        self.state = PipelineState::Stopped;
    }

    /// Stop every stage, then remove every stage, downstream first.
    ///
    /// Idempotent and safe on a partially built pipeline. Failures are logged and
    /// teardown continues with the next stage.
    pub fn teardown(&mut self) {
        if self.state == PipelineState::TornDown {
            return;
        }
        if self.state != PipelineState::Unbuilt {
            self.stop();
        }

        for (id, name) in self.stages.iter().rev() {
            if let Err(err) = self.backend.stop_stage(*id) {
                log::warn!("Pipeline: failed stopping '{}': {}", name, err);
            }
        }
        for (id, name) in self.stages.iter().rev() {
            if let Err(err) = self.backend.remove_stage(*id) {
                log::warn!("Pipeline: failed removing '{}': {}", name, err);
            }
        }

        self.stages.clear();
        self.state = PipelineState::TornDown;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}
