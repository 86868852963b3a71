//! Spectator capture
//!
//! This crate delivers live video from capture hardware to a mixed-reality
//! compositor.
//!
//! # Architecture
//!
//! The crate keeps four promises to the compositor:
//!
//! 1. **One contract**: every capture backend is driven through `FrameProvider`.
//! 2. **All-or-nothing builds**: a pipeline is either fully linked and running, or
//!    completely torn down.
//! 3. **Fail once**: the first initialization failure is latched per provider and
//!    the hardware is never probed again by that provider.
//! 4. **Never block the renderer**: `update` and `timestamp` read the newest sample
//!    and return immediately, with -1 when nothing has arrived.
//!
//! # Module Structure
//!
//! - `format`: encoding profile ladder and frame format descriptor
//! - `graph`: stage graph, pin negotiation, pipeline assembly and teardown
//! - `bridge`: hardware-thread → render-thread sample handoff
//! - `provider`: `FrameProvider` and the Elgato / BlackMagic backends
//! - `config`: file and environment configuration

pub mod bridge;
pub mod config;
pub mod error;
pub mod format;
pub mod graph;
pub mod provider;

pub use bridge::{now_ticks, BridgeStats, FrameSample, SampleBridge, SampleSink, NO_TIMESTAMP};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use format::{
    resolve_format, EncodingProfile, FrameFormat, PixelLayout, FRAME_DURATION_HNS,
    TICKS_PER_SECOND, UNMATCHED_HEIGHT_POLICY,
};
pub use graph::{
    negotiate, GraphBackend, GraphFactory, GraphProbe, PinDirection, PinInfo, PinRef, Pipeline,
    PipelineBuilder, PipelineState, StageRole, StageSpec, SyntheticGraph, SyntheticPlan,
};
pub use provider::{
    frame_slot, BlackMagicFrameProvider, ColorTarget, CopyMode, DeckLinkDevice, DeckLinkFactory,
    DeviceHandle, ElgatoFrameProvider, FrameProvider, InitStatus, OutputSurface, ProviderState,
    ProviderType, SyntheticDeckLink, FRAME_SLOTS,
};
