//! Error types for decoder initialization and the decode protocol.

use thiserror::Error;

use crate::{Codec, HardwareType, PixelFormat, SurfaceFormat};

/// Errors reported by a decoding backend.
///
/// Backends return these from every capability call. The decoder translates
/// them into [`InitError`], [`DecodeError`] or a retry status depending on
/// where they happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Input was not accepted or no output is ready yet. Retry later.
    #[error("resource temporarily unavailable")]
    Again,

    /// The codec was flushed and every buffered frame has been returned.
    #[error("end of stream")]
    Eof,

    /// The bitstream could not be parsed.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The device reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The requested device could not be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The requested codec, profile or format is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Download from device memory failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Generic/unknown error.
    #[error("backend error: {0}")]
    Generic(String),
}

impl BackendError {
    /// Create an InvalidData error with a message.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an Unsupported error with a message.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a Transfer error with a message.
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    /// Create a Generic error with a message.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Errors a packet-pushing loop can survive: a missing reference picture
    /// or a transient device read failure.
    #[must_use]
    pub fn is_corrupt_input(&self) -> bool {
        matches!(self, Self::InvalidData(_) | Self::Io(_))
    }
}

/// Errors that can occur while initializing a [`Decoder`](crate::Decoder).
///
/// Every resource acquired before the failure has been released by the time
/// one of these is returned.
#[derive(Debug, Error)]
pub enum InitError {
    /// Width or height is zero.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The hardware device could not be opened.
    #[error("failed to open {hardware} device {}", device.as_deref().unwrap_or("(default)"))]
    DeviceOpen {
        hardware: HardwareType,
        device: Option<String>,
        #[source]
        source: BackendError,
    },

    /// The device offers no surface format matching the hardware type.
    #[error("{hardware} offers no {expected:?} surfaces for {codec} (offered: {offered:?})")]
    UnsupportedSurface {
        hardware: HardwareType,
        codec: Codec,
        expected: SurfaceFormat,
        offered: Vec<SurfaceFormat>,
    },

    /// The codec context could not be opened for the codec/profile combination.
    #[error("failed to open {codec} decoder")]
    CodecOpen {
        codec: Codec,
        #[source]
        source: BackendError,
    },

    /// The software frame buffer could not be allocated.
    #[error("failed to allocate {bytes} byte {format} frame buffer")]
    Allocation { bytes: usize, format: PixelFormat },
}

/// Unrecoverable errors from [`send_packet`](crate::Decoder::send_packet) and
/// [`receive_frame`](crate::Decoder::receive_frame).
///
/// After any of these the decoder is faulted and must be closed.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The decoder already failed; only `close` is meaningful now.
    #[error("decoder is faulted, close it and initialize a new one")]
    Faulted,

    /// The backend rejected a packet.
    #[error("send_packet failed")]
    Send(#[source] BackendError),

    /// The backend failed while producing a frame.
    #[error("receive_frame failed")]
    Receive(#[source] BackendError),

    /// Hardware decoding was configured but the frame was decoded in software.
    #[error("frame decoded in software (not in hardware)")]
    SoftwareFallback,

    /// A hardware frame arrived in a surface format other than the negotiated one,
    /// or arrived on a decoder configured for software decoding.
    #[error("unexpected hardware surface {actual:?} (negotiated: {negotiated:?})")]
    UnexpectedSurface {
        negotiated: Option<SurfaceFormat>,
        actual: SurfaceFormat,
    },

    /// Downloading the frame into system memory failed.
    #[error("unable to transfer frame to system memory as {requested}")]
    Transfer {
        requested: PixelFormat,
        supported: Vec<PixelFormat>,
        #[source]
        source: BackendError,
    },

    /// A frame did not have the configured dimensions.
    #[error("frame is {actual_width}x{actual_height}, configured {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Frame conversion error.
    #[error("frame conversion error: {0}")]
    Conversion(String),
}

impl DecodeError {
    /// Create a Conversion error with a message.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }
}

/// A codec, hardware or pixel format name that is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} name: {name:?}")]
pub struct UnknownName {
    /// What was being looked up ("codec", "hardware", "pixel format").
    pub kind: &'static str,
    /// The rejected name.
    pub name: String,
}

impl UnknownName {
    pub(crate) fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_corrupt_input_classification() {
        assert!(BackendError::invalid_data("non-existing PPS 0 referenced").is_corrupt_input());
        assert!(BackendError::Io("read failed".into()).is_corrupt_input());
        assert!(!BackendError::Again.is_corrupt_input());
        assert!(!BackendError::transfer("lost").is_corrupt_input());
    }

    #[test]
    fn test_sources_are_chained() {
        let err = InitError::DeviceOpen {
            hardware: HardwareType::Vaapi,
            device: Some("/dev/dri/renderD129".into()),
            source: BackendError::DeviceUnavailable("no such file".into()),
        };
        assert_eq!(err.to_string(), "failed to open vaapi device /dev/dri/renderD129");
        assert!(err.source().is_some());

        let err = DecodeError::Send(BackendError::invalid_data("bad NAL"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("invalid data: bad NAL"));
    }
}
