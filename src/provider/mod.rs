//! Frame providers.
//!
//! A `FrameProvider` is what the compositor talks to. It hides which capture
//! hardware is attached, how its pipeline is assembled, and how it fails.
//!
//! Providers available:
//! - `ElgatoFrameProvider`: filter-graph capture (source → grabber → null renderer)
//! - `BlackMagicFrameProvider`: DeckLink-style input device with a frame callback
//!
//! Every provider owns its own error latch. After one failed initialization the
//! provider never touches the hardware again; recreate it to retry.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::bridge::FrameSample;
use crate::config::CaptureConfig;
use crate::error::CaptureError;

pub mod blackmagic;
pub mod elgato;
mod latch;

pub use blackmagic::{BlackMagicFrameProvider, DeckLinkDevice, DeckLinkFactory, SyntheticDeckLink};
pub use elgato::ElgatoFrameProvider;
pub(crate) use latch::ErrorLatch;

/// Frame slots cached by the compositor for hologram stability.
pub const FRAME_SLOTS: usize = 4;

/// Supported capture backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    BlackMagic,
    Elgato,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::BlackMagic => f.write_str("blackmagic"),
            ProviderType::Elgato => f.write_str("elgato"),
        }
    }
}

impl FromStr for ProviderType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blackmagic" => Ok(ProviderType::BlackMagic),
            "elgato" => Ok(ProviderType::Elgato),
            other => Err(anyhow!("unknown capture provider '{}'", other)),
        }
    }
}

/// Outcome of a successful `initialize` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStatus {
    /// Hardware is delivering frames.
    Ready,
    /// A build exists but no frame has arrived yet. Poll again later.
    Pending,
}

/// Lifecycle of a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Initializing,
    Enabled,
    ErrorLatched(CaptureError),
    Disposed,
}

/// How frames reach the color target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyMode {
    /// Map and copy through system memory.
    Cpu,
    /// Upload straight into the GPU surface.
    Gpu,
}

impl CopyMode {
    pub fn from_use_cpu(use_cpu: bool) -> Self {
        if use_cpu {
            CopyMode::Cpu
        } else {
            CopyMode::Gpu
        }
    }
}

/// Opaque render-device handle owned by the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque output surface handle. Only used by providers that support output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputSurface(pub u64);

/// Renderer surface that receives captured frames.
pub trait ColorTarget: Send {
    /// Device the surface belongs to, if it still has one.
    fn device(&self) -> Option<DeviceHandle>;

    /// Copy `sample` into cache slot `slot`.
    fn write_frame(
        &mut self,
        slot: usize,
        sample: &FrameSample,
        mode: CopyMode,
    ) -> std::result::Result<(), CaptureError>;
}

/// Map a compositor frame index onto a cache slot.
pub fn frame_slot(frame_index: i32) -> usize {
    frame_index.rem_euclid(FRAME_SLOTS as i32) as usize
}

/// Contract between the compositor and a capture backend.
pub trait FrameProvider: Send {
    /// Start delivering frames.
    ///
    /// Returns `Ready` once frames are flowing, `Pending` while waiting for the
    /// first frame, or the latched error.
    fn initialize(
        &mut self,
        color: Option<Box<dyn ColorTarget>>,
        output: Option<OutputSurface>,
    ) -> std::result::Result<InitStatus, CaptureError>;

    /// Publish the newest frame into the slot for `composite_frame_index`.
    fn update(&mut self, composite_frame_index: i32);

    /// Timestamp of the newest frame in 100-ns ticks, or -1.
    fn timestamp(&self, frame: i32) -> i64;

    /// Nominal frame period in 100-ns ticks.
    fn duration_hns(&self) -> i64;

    fn provider_type(&self) -> ProviderType;

    /// True only while the hardware is delivering frames.
    fn is_enabled(&self) -> bool;

    /// Whether the device can output video.
    fn supports_output(&self) -> bool;

    /// Stop capturing and release every resource. Safe to call repeatedly.
    fn dispose(&mut self);

    /// True if frames are YUV.
    fn output_yuv(&self) -> bool;

    fn state(&self) -> ProviderState;

    fn capture_frame_index(&self) -> i32 {
        0
    }

    fn pixel_change(&self, _frame: i32) -> i32 {
        0
    }

    fn num_queued_output_frames(&self) -> i32 {
        0
    }
}

/// Build a provider for `config`.
///
/// `stub://` devices get synthetic hardware. Real devices need a vendor backend
/// passed to `ElgatoFrameProvider::new` or `BlackMagicFrameProvider::new`.
pub fn from_config(config: &CaptureConfig) -> Result<Box<dyn FrameProvider>> {
    if !config.device.starts_with("stub://") {
        bail!(
            "device '{}' requires a vendor capture backend; only stub:// devices are built in",
            config.device
        );
    }

    let format = crate::format::resolve_format(config.frame_height);
    let plan = config.synthetic.plan();
    let provider: Box<dyn FrameProvider> = match config.provider {
        ProviderType::Elgato => Box::new(ElgatoFrameProvider::synthetic(
            format,
            config.use_cpu,
            plan,
        )),
        ProviderType::BlackMagic => Box::new(BlackMagicFrameProvider::synthetic(
            format,
            config.use_cpu,
            plan,
        )),
    };
    log::info!(
        "capture: {} provider on {} ({}x{})",
        config.provider,
        config.device,
        format.width,
        format.height
    );
    Ok(provider)
}
