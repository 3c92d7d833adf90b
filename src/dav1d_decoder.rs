//! Software AV1 backend using dav1d.
//!
//! Wraps the `dav1d` crate behind the backend traits. It has no device, so it
//! only serves decoders configured without a hardware type. Pictures are
//! written as 8-bit yuv420p; other layouts and bit depths are rejected.

use dav1d::{PixelLayout, PlanarImageComponent};
use tracing::{debug, trace};

use crate::backend::{Backend, CodecContext, CodecParams, Decoded, NoDevice, NoHardwareFrame};
use crate::{BackendError, Codec, HardwareType, PixelFormat, Profile, SoftwareFrame, StagedPacket, SurfaceFormat};

/// Backend creating dav1d codec contexts.
#[derive(Debug, Default)]
pub struct Dav1dBackend;

impl Dav1dBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Backend for Dav1dBackend {
    type Device = NoDevice;
    type Codec = Dav1dCodec;

    fn open_device(&mut self, hardware: HardwareType, _device: Option<&str>) -> Result<NoDevice, BackendError> {
        Err(BackendError::unsupported(format!(
            "dav1d is a software decoder, {hardware} is not available"
        )))
    }

    fn surface_formats(&self, device: &NoDevice, _codec: Codec, _profile: Option<Profile>) -> Vec<SurfaceFormat> {
        match *device {}
    }

    fn open_codec(&mut self, params: &CodecParams, _device: Option<&NoDevice>) -> Result<Dav1dCodec, BackendError> {
        if params.codec != Codec::Av1 {
            return Err(BackendError::unsupported(format!("dav1d cannot decode {}", params.codec)));
        }
        if params.surface.is_some() {
            return Err(BackendError::unsupported("dav1d has no hardware surfaces"));
        }

        let decoder = dav1d::Decoder::new()
            .map_err(|e| BackendError::generic(format!("Failed to create dav1d decoder: {e:?}")))?;
        debug!(width = params.width, height = params.height, "dav1d decoder created");

        Ok(Dav1dCodec {
            decoder,
            pending: false,
            draining: false,
            sequence: 0,
        })
    }
}

/// An open dav1d decoder.
pub struct Dav1dCodec {
    decoder: dav1d::Decoder,
    /// dav1d holds data it could not queue yet.
    pending: bool,
    draining: bool,
    sequence: i64,
}

impl Dav1dCodec {
    /// Push data dav1d kept back from an earlier `send_data`.
    fn flush_pending(&mut self) -> Result<(), BackendError> {
        if !self.pending {
            return Ok(());
        }
        match self.decoder.send_pending_data() {
            Ok(()) => {
                self.pending = false;
                Ok(())
            }
            Err(dav1d::Error::Again) => Err(BackendError::Again),
            Err(e) => Err(map_error("send_pending_data", e)),
        }
    }
}

impl CodecContext for Dav1dCodec {
    type Frame = NoHardwareFrame;

    fn send_packet(&mut self, packet: &StagedPacket) -> Result<(), BackendError> {
        if self.draining {
            return Err(BackendError::Eof);
        }
        if packet.is_empty() {
            self.draining = true;
            return Ok(());
        }

        // The previous packet is still pending, this one was not consumed.
        self.flush_pending()?;

        let pts = self.sequence;
        match self.decoder.send_data(packet.data().to_vec(), None, Some(pts), None) {
            Ok(()) => {}
            Err(dav1d::Error::Again) => {
                // Decoder is full, data stays pending until pictures are drained
                self.pending = true;
            }
            Err(e) => return Err(map_error("send_data", e)),
        }
        self.sequence += 1;
        trace!(bytes = packet.len(), pts, pending = self.pending, "sent data to dav1d");
        Ok(())
    }

    fn receive_frame(&mut self, software: &mut SoftwareFrame) -> Result<Decoded<NoHardwareFrame>, BackendError> {
        match self.decoder.get_picture() {
            Ok(picture) => {
                write_picture(&picture, software)?;
                Ok(Decoded::Software)
            }
            Err(dav1d::Error::Again) => {
                match self.flush_pending() {
                    Ok(()) | Err(BackendError::Again) => {}
                    Err(e) => return Err(e),
                }
                if self.draining && !self.pending {
                    // get_picture drains queued data itself, Again here means empty
                    match self.decoder.get_picture() {
                        Ok(picture) => {
                            write_picture(&picture, software)?;
                            return Ok(Decoded::Software);
                        }
                        Err(dav1d::Error::Again) => return Err(BackendError::Eof),
                        Err(e) => return Err(map_error("get_picture", e)),
                    }
                }
                Err(BackendError::Again)
            }
            Err(e) => Err(map_error("get_picture", e)),
        }
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.pending = false;
        self.draining = false;
    }
}

fn map_error(call: &str, err: dav1d::Error) -> BackendError {
    match err {
        dav1d::Error::NotEnoughMemory => BackendError::OutOfMemory,
        dav1d::Error::UnsupportedBitstream => {
            BackendError::invalid_data(format!("dav1d {call}: unsupported bitstream"))
        }
        dav1d::Error::InvalidArgument => BackendError::invalid_data(format!("dav1d {call}: invalid argument")),
        other => BackendError::generic(format!("dav1d {call} error: {other:?}")),
    }
}

/// Copy an 8-bit I420 picture into `dst` as yuv420p.
fn write_picture(picture: &dav1d::Picture, dst: &mut SoftwareFrame) -> Result<(), BackendError> {
    if picture.bit_depth() > 8 {
        return Err(BackendError::unsupported(format!(
            "{}-bit AV1 output",
            picture.bit_depth()
        )));
    }
    if picture.pixel_layout() != PixelLayout::I420 {
        return Err(BackendError::unsupported(format!(
            "AV1 pixel layout {:?}",
            picture.pixel_layout()
        )));
    }

    let y = picture.plane(PlanarImageComponent::Y);
    let u = picture.plane(PlanarImageComponent::U);
    let v = picture.plane(PlanarImageComponent::V);
    let stride = |component| picture.stride(component) as usize;
    copy_i420(
        dst,
        picture.width(),
        picture.height(),
        picture.timestamp(),
        [
            (&*y, stride(PlanarImageComponent::Y)),
            (&*u, stride(PlanarImageComponent::U)),
            (&*v, stride(PlanarImageComponent::V)),
        ],
    )
}

/// Copy strided Y, U and V planes into `dst` as yuv420p.
fn copy_i420(
    dst: &mut SoftwareFrame,
    width: u32,
    height: u32,
    pts: Option<i64>,
    planes: [(&[u8], usize); 3],
) -> Result<(), BackendError> {
    dst.reshape(width, height, PixelFormat::Yuv420p)?;
    dst.set_pts(pts);
    for (index, (data, stride)) in planes.into_iter().enumerate() {
        dst.write_plane(index, data, stride)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecodeError, Decoder, DecoderConfig, InitError, Packet, Status};

    #[test]
    fn test_rejects_hardware_and_other_codecs() {
        let mut backend = Dav1dBackend::new();

        let config = DecoderConfig::new(Codec::Av1, 640, 480).hardware(HardwareType::Vaapi);
        assert!(matches!(
            Decoder::init(config, &mut backend),
            Err(InitError::DeviceOpen {
                source: BackendError::Unsupported(_),
                ..
            })
        ));

        let config = DecoderConfig::new(Codec::H264, 640, 480);
        assert!(matches!(
            Decoder::init(config, &mut backend),
            Err(InitError::CodecOpen { codec: Codec::H264, .. })
        ));
    }

    #[test]
    fn test_copy_i420_drops_stride_padding() {
        // 3x3 picture: 2x2 chroma, rows padded to 8 and 4 bytes
        let y = [1, 2, 3, 0, 0, 0, 0, 0, 4, 5, 6, 0, 0, 0, 0, 0, 7, 8, 9];
        let u = [10, 11, 0, 0, 12, 13];
        let v = [20, 21, 0, 0, 22, 23];
        let mut frame = SoftwareFrame::default();

        copy_i420(&mut frame, 3, 3, Some(5), [(&y[..], 8), (&u[..], 4), (&v[..], 4)]).unwrap();
        assert_eq!(frame.format(), PixelFormat::Yuv420p);
        assert_eq!(frame.plane(0), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(frame.plane(1), &[10, 11, 12, 13]);
        assert_eq!(frame.plane(2), &[20, 21, 22, 23]);
        assert_eq!(frame.pts(), Some(5));

        // chroma plane cut short
        assert!(copy_i420(&mut frame, 3, 3, None, [(&y[..], 8), (&u[..4], 4), (&v[..], 4)]).is_err());
    }

    #[test]
    fn test_malformed_obu_faults_decoder() {
        let mut backend = Dav1dBackend::new();
        let config = DecoderConfig::new(Codec::Av1, 64, 64).pixel_format(PixelFormat::Yuv420p);
        let mut decoder = Decoder::init(config, &mut backend).unwrap();

        // OBU header whose size field runs past the end of the data
        let garbage = [0xFF; 8];
        assert!(matches!(
            decoder.send_packet(Packet::new(&garbage)),
            Err(DecodeError::Send(BackendError::InvalidData(_)))
        ));
        assert!(matches!(decoder.receive_frame(), Err(DecodeError::Faulted)));
        decoder.close();

        let config = DecoderConfig::new(Codec::Av1, 64, 64).tolerate_corrupt_packets(true);
        let mut decoder = Decoder::init(config, &mut backend).unwrap();
        assert!(decoder.send_packet(Packet::new(&garbage)).unwrap().is_ready());
        assert!(decoder.receive_frame().unwrap().is_again());
    }

    #[test]
    fn test_flush_without_input() {
        let mut backend = Dav1dBackend::new();
        let config = DecoderConfig::new(Codec::Av1, 640, 480).pixel_format(PixelFormat::Yuv420p);
        let mut decoder = Decoder::init(config, &mut backend).unwrap();

        assert!(decoder.receive_frame().unwrap().is_again());
        assert_eq!(decoder.send_packet(Packet::flush()).unwrap(), Status::Ready(()));
        assert!(decoder.receive_frame().unwrap().is_again());
        decoder.close();
    }
}
