//! The decoder handle and its push/pull protocol.

use tracing::{debug, error, trace, warn};

use crate::backend::{Backend, CodecContext, CodecParams, Decoded, DeviceContext, HardwareFrame};
use crate::{
    convert, expected_frame_size, BackendError, DecodeError, DecoderConfig, InitError, Packet, PixelFormat,
    SoftwareFrame, StagedPacket, SurfaceFormat,
};

/// Initial capacity of the packet staging buffer; it grows on demand.
const PACKET_STAGING_CAPACITY: usize = 64 * 1024;

/// Outcome of a call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status<T> {
    /// The call made progress; carries its output.
    Ready(T),
    /// Nothing happened yet. For `send_packet` the packet was not consumed and
    /// must be sent again after draining frames; for `receive_frame` no frame
    /// is ready and more packets are needed.
    Again,
}

impl<T> Status<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn is_again(&self) -> bool {
        matches!(self, Self::Again)
    }

    /// The output, if any.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Again => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Status<U> {
        match self {
            Self::Ready(value) => Status::Ready(f(value)),
            Self::Again => Status::Again,
        }
    }
}

/// Three-valued result code of every decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Successful execution.
    Ok,
    /// Not ready, retry (see [`Status::Again`]).
    Again,
    /// Unrecoverable error, the decoder must be closed.
    Error,
}

impl ResultCode {
    /// Collapse a decode result into its code.
    pub fn of<T, E>(result: &Result<Status<T>, E>) -> Self {
        match result {
            Ok(Status::Ready(_)) => Self::Ok,
            Ok(Status::Again) => Self::Again,
            Err(_) => Self::Error,
        }
    }
}

/// Protocol state of a [`Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderState {
    /// Accepting packets.
    Ready,
    /// A flush packet was sent; frames are being drained. Returns to `Ready`
    /// once `receive_frame` reaches the end of the stream.
    Draining,
    /// An unrecoverable error happened. Only `close` is meaningful.
    Faulted,
}

/// Hardware video decoder handle.
///
/// Owns the device context, the codec context, the hardware frame of the
/// current decode cycle and the reusable software frame. Created by
/// [`init`](Self::init), destroyed by [`close`](Self::close) (or by dropping it,
/// which releases everything in the same order).
///
/// Calls block on the backend. There is no internal locking: a decoder must be
/// used from one thread at a time, which `&mut self` already enforces. A hung
/// device download blocks the caller, and closing a decoder on an unresponsive
/// device may block too.
///
/// # Example
///
/// ```ignore
/// use hvd::{Decoder, DecoderConfig, FakeBackend, Packet, Status, Codec};
///
/// let mut backend = FakeBackend::new();
/// let config = DecoderConfig::new(Codec::H264, 1920, 1080);
/// let mut decoder = Decoder::init(config, &mut backend)?;
///
/// decoder.send_packet(Packet::new(&encoded))?;
/// while let Status::Ready(frame) = decoder.receive_frame()? {
///     // frame.plane(0), frame.linesize(0), ...
/// }
///
/// decoder.close();
/// ```
pub struct Decoder<B: Backend> {
    config: DecoderConfig,
    surface: Option<SurfaceFormat>,
    state: DecoderState,
    frame_valid: bool,
    rejected_len: Option<usize>,
    frames_decoded: u64,
    // Fields below drop in declaration order: buffers, hardware frame,
    // codec context, device. Keep it that way.
    packet: StagedPacket,
    sw_frame: SoftwareFrame,
    scratch: SoftwareFrame,
    hw_frame: Option<<B::Codec as CodecContext>::Frame>,
    codec: B::Codec,
    device: Option<B::Device>,
}

impl<B: Backend> Decoder<B> {
    /// Open the device (when hardware decoding), negotiate the surface format,
    /// open the codec and allocate the frame and packet buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - width or height is zero
    /// - the device cannot be opened
    /// - the device offers no surface for the hardware type and codec
    /// - the codec/profile combination is unsupported
    /// - the frame buffer cannot be allocated
    ///
    /// Anything acquired before the failure has been released on return.
    pub fn init(config: DecoderConfig, backend: &mut B) -> Result<Self, InitError> {
        if config.width == 0 || config.height == 0 {
            return Err(InitError::InvalidDimensions {
                width: config.width,
                height: config.height,
            });
        }

        let (device, surface) = match config.hardware {
            Some(hardware) => {
                let device = backend
                    .open_device(hardware, config.device.as_deref())
                    .map_err(|source| InitError::DeviceOpen {
                        hardware,
                        device: config.device.clone(),
                        source,
                    })?;
                debug!(%hardware, device = device.name(), "opened hardware device");

                let expected = hardware.surface_format();
                let offered = backend.surface_formats(&device, config.codec, config.profile);
                if !offered.contains(&expected) {
                    return Err(InitError::UnsupportedSurface {
                        hardware,
                        codec: config.codec,
                        expected,
                        offered,
                    });
                }
                debug!(surface = ?expected, "negotiated hardware surface format");
                (Some(device), Some(expected))
            }
            None => (None, None),
        };

        let params = CodecParams {
            codec: config.codec,
            width: config.width,
            height: config.height,
            profile: config.profile,
            surface,
        };
        let codec = backend
            .open_codec(&params, device.as_ref())
            .map_err(|source| InitError::CodecOpen {
                codec: config.codec,
                source,
            })?;

        let format = config.output_format();
        let sw_frame = SoftwareFrame::allocate(config.width, config.height, format).map_err(|_| {
            InitError::Allocation {
                bytes: expected_frame_size(config.width, config.height, format),
                format,
            }
        })?;

        debug!(
            codec = %config.codec,
            width = config.width,
            height = config.height,
            %format,
            hardware = config.hardware.map(|hw| hw.name()).unwrap_or("none"),
            "decoder initialized"
        );

        Ok(Self {
            config,
            surface,
            state: DecoderState::Ready,
            frame_valid: false,
            rejected_len: None,
            frames_decoded: 0,
            packet: StagedPacket::with_capacity(PACKET_STAGING_CAPACITY),
            sw_frame,
            scratch: SoftwareFrame::default(),
            hw_frame: None,
            codec,
            device,
        })
    }

    /// Submit a compressed packet; an empty packet flushes the decoder.
    ///
    /// Follow with [`receive_frame`](Self::receive_frame) until it returns
    /// [`Status::Again`]. With a simple send/receive loop `Again` never happens
    /// here; it means the input buffer is full and the *same* packet must be
    /// sent again after receiving frames.
    ///
    /// After a flush, draining every frame makes the decoder ready for a new
    /// stream.
    pub fn send_packet(&mut self, packet: Packet<'_>) -> Result<Status<()>, DecodeError> {
        match self.state {
            DecoderState::Faulted => return Err(DecodeError::Faulted),
            DecoderState::Draining if packet.is_flush() => return Ok(Status::Ready(())),
            DecoderState::Draining => {
                trace!("packet refused while draining");
                return Ok(Status::Again);
            }
            DecoderState::Ready => {}
        }

        if let Some(rejected) = self.rejected_len.take() {
            if rejected != packet.len() {
                warn!(
                    rejected,
                    sent = packet.len(),
                    "packet differs from the one refused earlier, the refused packet was not decoded"
                );
            }
        }

        self.packet.stage(packet.data());
        match self.codec.send_packet(&self.packet) {
            Ok(()) if packet.is_flush() => {
                debug!("flushing decoder");
                self.state = DecoderState::Draining;
                Ok(Status::Ready(()))
            }
            Ok(()) => {
                trace!(bytes = packet.len(), "packet sent");
                Ok(Status::Ready(()))
            }
            Err(BackendError::Again) => {
                trace!(bytes = packet.len(), "input full, packet not consumed");
                self.rejected_len = Some(packet.len());
                Ok(Status::Again)
            }
            Err(e) if e.is_corrupt_input() && self.config.tolerate_corrupt_packets => {
                // e.g. non-existing PPS referenced, keep pushing packets
                warn!(error = %e, "send_packet error, continuing");
                Ok(Status::Ready(()))
            }
            Err(e) => Err(self.fault(DecodeError::Send(e))),
        }
    }

    /// Retrieve the next decoded frame.
    ///
    /// Keep calling after every [`send_packet`](Self::send_packet) until
    /// [`Status::Again`] is returned. The frame stays owned by the decoder and
    /// is overwritten by the next call: consume it immediately or
    /// [`copy_out`](SoftwareFrame::copy_out).
    pub fn receive_frame(&mut self) -> Result<Status<&SoftwareFrame>, DecodeError> {
        if self.state == DecoderState::Faulted {
            return Err(DecodeError::Faulted);
        }

        // Free the leftovers of the previous call.
        self.frame_valid = false;
        self.hw_frame = None;

        let decoded = match self.codec.receive_frame(&mut self.scratch) {
            Ok(decoded) => decoded,
            Err(BackendError::Again) => return Ok(Status::Again),
            Err(BackendError::Eof) => {
                // Prepare the decoder for a new stream.
                self.codec.reset();
                self.packet.clear();
                self.state = DecoderState::Ready;
                debug!(frames = self.frames_decoded, "decoder drained");
                return Ok(Status::Again);
            }
            Err(e) => return Err(self.fault(DecodeError::Receive(e))),
        };

        let result = match decoded {
            Decoded::Hardware(frame) => self.download(frame),
            Decoded::Software => self.accept_software(),
        };
        if let Err(e) = result {
            return Err(self.fault(e));
        }

        self.frame_valid = true;
        self.frames_decoded += 1;
        trace!(
            frame = self.frames_decoded,
            pts = ?self.sw_frame.pts(),
            "frame ready"
        );
        Ok(Status::Ready(&self.sw_frame))
    }

    /// Download a hardware frame into the software frame, converting if the
    /// device cannot produce the requested format itself.
    fn download(&mut self, frame: <B::Codec as CodecContext>::Frame) -> Result<(), DecodeError> {
        let actual = frame.surface_format();
        if self.surface != Some(actual) {
            return Err(DecodeError::UnexpectedSurface {
                negotiated: self.surface,
                actual,
            });
        }
        self.check_dimensions(frame.width(), frame.height())?;

        let requested = self.config.output_format();
        let supported = frame.transfer_formats();
        let direct = supported.contains(&requested);
        let download = if direct {
            Some(requested)
        } else {
            supported
                .iter()
                .copied()
                .find(|&f| convert::is_convertible_source(f))
        };

        let transferred = match download {
            Some(format) if direct => frame.transfer_to(&mut self.sw_frame, format),
            Some(format) => frame.transfer_to(&mut self.scratch, format),
            None => Err(BackendError::unsupported(format!(
                "no download format converts to {requested}"
            ))),
        };
        if let Err(source) = transferred {
            dump_transfer_formats(&supported);
            return Err(DecodeError::Transfer {
                requested,
                supported,
                source,
            });
        }

        if !direct {
            convert::convert(&self.scratch, &mut self.sw_frame, requested)?;
        }
        self.hw_frame = Some(frame);
        Ok(())
    }

    /// Take a frame the codec decoded on the CPU into the scratch frame.
    fn accept_software(&mut self) -> Result<(), DecodeError> {
        // Silent fallback to software is treated as an error.
        if self.config.is_hardware() {
            return Err(DecodeError::SoftwareFallback);
        }
        self.check_dimensions(self.scratch.width(), self.scratch.height())?;

        let requested = self.config.output_format();
        if self.scratch.format() == requested {
            self.sw_frame.swap(&mut self.scratch);
        } else {
            convert::convert(&self.scratch, &mut self.sw_frame, requested)?;
        }
        Ok(())
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if width != self.config.width || height != self.config.height {
            return Err(DecodeError::DimensionMismatch {
                width: self.config.width,
                height: self.config.height,
                actual_width: width,
                actual_height: height,
            });
        }
        Ok(())
    }

    fn fault(&mut self, err: DecodeError) -> DecodeError {
        error!(error = %err, source = ?std::error::Error::source(&err), "decoder faulted");
        self.state = DecoderState::Faulted;
        self.frame_valid = false;
        self.hw_frame = None;
        err
    }

    /// The frame returned by the last successful `receive_frame`, if that call
    /// produced one.
    #[must_use]
    pub fn frame(&self) -> Option<&SoftwareFrame> {
        self.frame_valid.then_some(&self.sw_frame)
    }

    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Negotiated hardware surface format, `None` when decoding in software.
    #[must_use]
    pub fn surface_format(&self) -> Option<SurfaceFormat> {
        self.surface
    }

    /// Pixel format of returned frames.
    #[must_use]
    pub fn pixel_format(&self) -> PixelFormat {
        self.config.output_format()
    }

    /// The opened hardware device, if any.
    #[must_use]
    pub fn device(&self) -> Option<&B::Device> {
        self.device.as_ref()
    }

    /// Frames returned since initialization.
    #[must_use]
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Release everything: software frame, hardware frame, codec context and
    /// finally the device.
    ///
    /// May block if the device is unresponsive.
    pub fn close(self) {
        let Self {
            packet,
            sw_frame,
            scratch,
            hw_frame,
            codec,
            device,
            frames_decoded,
            ..
        } = self;

        drop(packet);
        drop(sw_frame);
        drop(scratch);
        debug!("released software frame");

        if let Some(frame) = hw_frame {
            drop(frame);
            debug!("released hardware frame");
        }

        drop(codec);
        debug!("released codec context");

        if let Some(device) = device {
            let name = device.name().to_owned();
            drop(device);
            debug!(device = %name, "closed hardware device");
        }

        debug!(frames = frames_decoded, "decoder closed");
    }
}

fn dump_transfer_formats(formats: &[PixelFormat]) {
    if formats.is_empty() {
        warn!("hardware frame reports no transfer formats");
        return;
    }
    let names: Vec<&str> = formats.iter().map(PixelFormat::name).collect();
    warn!(
        formats = %names.join(", "),
        "make sure you are using a supported software pixel format"
    );
}
