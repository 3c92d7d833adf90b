//! Hardware video decoding orchestration.
//!
//! This crate drives a hardware-accelerated video decoder through a small
//! push/pull protocol: compressed packets go in, decoded frames in system
//! memory come out. The heavy lifting (opening the acceleration device,
//! decoding, downloading surfaces from device memory) is done by a
//! [`Backend`](backend::Backend); the [`Decoder`] manages the lifecycle of
//! everything the backend hands out and enforces the protocol.
//!
//! Supported hardware types:
//!
//! - **VA-API** (`vaapi`), **VDPAU** (`vdpau`) on Linux
//! - **DXVA2** (`dxva2`), **D3D11VA** (`d3d11va`) on Windows
//! - **VideoToolbox** (`videotoolbox`) on macOS
//! - **CUDA** (`cuda`) on NVIDIA GPUs
//!
//! Passing no hardware type decodes in software.
//!
//! # Quick Start
//!
//! ```ignore
//! use hvd::{Codec, Decoder, DecoderConfig, FakeBackend, HardwareType, Packet, PixelFormat, Status};
//!
//! let config = DecoderConfig::new(Codec::H264, 1920, 1080)
//!     .hardware(HardwareType::Vaapi)
//!     .device("/dev/dri/renderD128")
//!     .pixel_format(PixelFormat::Nv12);
//!
//! let mut backend = FakeBackend::new();
//! let mut decoder = Decoder::init(config, &mut backend)?;
//!
//! for packet in packets {
//!     // Again means the input is full: receive, then send the same packet again
//!     while decoder.send_packet(Packet::new(&packet))?.is_again() {
//!         while let Status::Ready(frame) = decoder.receive_frame()? {
//!             consume(frame);
//!         }
//!     }
//!     while let Status::Ready(frame) = decoder.receive_frame()? {
//!         consume(frame);
//!     }
//! }
//!
//! // flush and drain the buffered frames
//! decoder.send_packet(Packet::flush())?;
//! while let Status::Ready(frame) = decoder.receive_frame()? {
//!     consume(frame);
//! }
//!
//! decoder.close();
//! ```
//!
//! # Feature Flags
//!
//! - `dav1d` - Enable the software AV1 backend ([`Dav1dBackend`]) built on libdav1d
//!
//! # Architecture
//!
//! Backends implement the capability traits in [`backend`]. Every resource
//! they return releases itself when dropped, so a failed [`Decoder::init`]
//! leaves nothing behind and closing the decoder releases the software frame,
//! the hardware frame, the codec context and the device in that order.
//! [`FakeBackend`] is a deterministic in-process backend for tests and demos.

mod decoder;
mod error;
mod fake_backend;
mod frame;
mod packet;
mod types;

pub mod backend;
pub mod convert;

pub use decoder::{Decoder, DecoderState, ResultCode, Status};
pub use error::{BackendError, DecodeError, InitError, UnknownName};
pub use fake_backend::{FakeBackend, FakeCodec, FakeDevice, FakeHardwareFrame, ResourceKind, ResourceLedger};
pub use frame::{expected_frame_size, FrameLayout, PlaneLayout, SoftwareFrame, VideoFrame};
pub use packet::{Packet, StagedPacket, PACKET_PADDING};
pub use types::{Codec, DecoderConfig, HardwareType, PixelFormat, Profile, SurfaceFormat};

// Software AV1 backend
#[cfg(feature = "dav1d")]
mod dav1d_decoder;

#[cfg(feature = "dav1d")]
pub use dav1d_decoder::{Dav1dBackend, Dav1dCodec};
