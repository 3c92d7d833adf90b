//! Capability traits a decoding backend implements.
//!
//! The [`Decoder`](crate::Decoder) only orchestrates: device and codec
//! management, the actual decoding and the device-to-host download all live
//! behind these traits. Every resource is an owned value that releases itself
//! on `Drop`, so the decoder unwinds partially acquired state by simply
//! dropping it.

use crate::{BackendError, Codec, HardwareType, PixelFormat, Profile, SoftwareFrame, StagedPacket, SurfaceFormat};

/// Parameters used to open a codec context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParams {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub profile: Option<Profile>,
    /// Surface format hardware frames must be produced in, `None` for software decoding.
    pub surface: Option<SurfaceFormat>,
}

/// An opened hardware device. Dropping it closes the device.
pub trait DeviceContext {
    /// The acceleration API this device belongs to.
    fn hardware(&self) -> HardwareType;

    /// Human readable device name for logs.
    fn name(&self) -> &str;
}

/// A decoded frame resident in device memory.
///
/// Dropping it returns the surface to the device.
pub trait HardwareFrame {
    fn surface_format(&self) -> SurfaceFormat;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Pixel formats this frame can be downloaded as.
    fn transfer_formats(&self) -> Vec<PixelFormat>;

    /// Download the frame into system memory as `format`.
    ///
    /// `dst` is reshaped to the frame size and `format`.
    fn transfer_to(&self, dst: &mut SoftwareFrame, format: PixelFormat) -> Result<(), BackendError>;
}

/// What a codec context produced on a receive call.
#[derive(Debug)]
pub enum Decoded<F> {
    /// Frame decoded by the hardware and left in device memory.
    Hardware(F),
    /// Frame decoded on the CPU, already written to the supplied software frame.
    Software,
}

/// An opened codec context. Dropping it frees the context.
pub trait CodecContext {
    type Frame: HardwareFrame;

    /// Submit one packet; an empty packet starts draining.
    ///
    /// Returns [`BackendError::Again`] without consuming the packet when the
    /// input queue is full.
    fn send_packet(&mut self, packet: &StagedPacket) -> Result<(), BackendError>;

    /// Fetch the next decoded frame.
    ///
    /// Software-decoded frames are written into `software`. Returns
    /// [`BackendError::Again`] when more input is needed and
    /// [`BackendError::Eof`] once a drain has returned every frame.
    fn receive_frame(&mut self, software: &mut SoftwareFrame) -> Result<Decoded<Self::Frame>, BackendError>;

    /// Discard buffered state so a new stream can start after end of stream.
    fn reset(&mut self);
}

/// Factory for device and codec contexts.
pub trait Backend {
    type Device: DeviceContext;
    type Codec: CodecContext;

    /// Open a device of the given type. `device` of `None` selects the default one.
    fn open_device(&mut self, hardware: HardwareType, device: Option<&str>) -> Result<Self::Device, BackendError>;

    /// Surface formats `device` can decode `codec` into.
    fn surface_formats(&self, device: &Self::Device, codec: Codec, profile: Option<Profile>) -> Vec<SurfaceFormat>;

    /// Open a codec context, bound to `device` when hardware decoding.
    fn open_codec(&mut self, params: &CodecParams, device: Option<&Self::Device>) -> Result<Self::Codec, BackendError>;
}

/// Device type for backends that only decode in software.
#[derive(Debug)]
pub enum NoDevice {}

impl DeviceContext for NoDevice {
    fn hardware(&self) -> HardwareType {
        match *self {}
    }

    fn name(&self) -> &str {
        match *self {}
    }
}

/// Hardware frame type for backends that only decode in software.
#[derive(Debug)]
pub enum NoHardwareFrame {}

impl HardwareFrame for NoHardwareFrame {
    fn surface_format(&self) -> SurfaceFormat {
        match *self {}
    }

    fn width(&self) -> u32 {
        match *self {}
    }

    fn height(&self) -> u32 {
        match *self {}
    }

    fn transfer_formats(&self) -> Vec<PixelFormat> {
        match *self {}
    }

    fn transfer_to(&self, _dst: &mut SoftwareFrame, _format: PixelFormat) -> Result<(), BackendError> {
        match *self {}
    }
}
