//! Deterministic in-process backend.
//!
//! Behaves like a hardware decoder without touching a device: it accepts any
//! bytes as a "bitstream", keeps a bounded input queue, holds frames back to
//! mimic decode latency and hands out frames that live in fake device memory.
//! Every device, codec context and hardware frame is counted in a
//! [`ResourceLedger`] so leaks show up as a non-zero outstanding count.
//!
//! Picture content is derived from the packet: the first byte fills the luma
//! plane, the second and third bytes (default 128) fill U and V.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::backend::{Backend, CodecContext, CodecParams, Decoded, DeviceContext, HardwareFrame};
use crate::{convert, BackendError, Codec, HardwareType, PixelFormat, Profile, SoftwareFrame, StagedPacket, SurfaceFormat};

/// Row alignment of fake device surfaces, so downloads exercise pitch handling.
const SURFACE_PITCH_ALIGN: usize = 64;

/// Kinds of backend resources tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Device,
    Codec,
    HardwareFrame,
}

impl ResourceKind {
    const ALL: [ResourceKind; 3] = [Self::Device, Self::Codec, Self::HardwareFrame];

    fn index(self) -> usize {
        match self {
            Self::Device => 0,
            Self::Codec => 1,
            Self::HardwareFrame => 2,
        }
    }
}

/// Acquire/release counters shared between a backend and everything it creates.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    acquired: [AtomicUsize; 3],
    released: [AtomicUsize; 3],
    release_order: Mutex<Vec<ResourceKind>>,
}

impl ResourceLedger {
    fn acquire(&self, kind: ResourceKind) {
        self.acquired[kind.index()].fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, kind: ResourceKind) {
        self.released[kind.index()].fetch_add(1, Ordering::SeqCst);
        if let Ok(mut order) = self.release_order.lock() {
            order.push(kind);
        }
    }

    #[must_use]
    pub fn acquired(&self, kind: ResourceKind) -> usize {
        self.acquired[kind.index()].load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn released(&self, kind: ResourceKind) -> usize {
        self.released[kind.index()].load(Ordering::SeqCst)
    }

    /// Resources of `kind` acquired but not yet released.
    #[must_use]
    pub fn outstanding(&self, kind: ResourceKind) -> usize {
        self.acquired(kind).saturating_sub(self.released(kind))
    }

    /// Resources of any kind still held.
    #[must_use]
    pub fn total_outstanding(&self) -> usize {
        ResourceKind::ALL.iter().map(|&kind| self.outstanding(kind)).sum()
    }

    /// Returns true when every acquisition was matched by exactly one release.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&kind| self.acquired(kind) == self.released(kind))
    }

    /// Kinds in the order they were released.
    #[must_use]
    pub fn release_order(&self) -> Vec<ResourceKind> {
        self.release_order
            .lock()
            .map(|order| order.clone())
            .unwrap_or_default()
    }
}

/// Fault injection and decode behavior shared by the codec contexts.
#[derive(Debug, Clone)]
struct CodecBehavior {
    queue_capacity: usize,
    delay: usize,
    transfer_formats: Vec<PixelFormat>,
    corrupt_marker: Option<u8>,
    fault_after: Option<usize>,
    fail_transfer: bool,
    software_fallback: bool,
    frame_size: Option<(u32, u32)>,
    surface_override: Option<SurfaceFormat>,
}

impl Default for CodecBehavior {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            delay: 0,
            transfer_formats: vec![PixelFormat::Nv12],
            corrupt_marker: None,
            fault_after: None,
            fail_transfer: false,
            software_fallback: false,
            frame_size: None,
            surface_override: None,
        }
    }
}

/// In-process backend with configurable devices, latency and faults.
#[derive(Debug)]
pub struct FakeBackend {
    ledger: Arc<ResourceLedger>,
    devices: Vec<(HardwareType, String)>,
    surfaces: HashMap<HardwareType, Vec<SurfaceFormat>>,
    codecs: HashSet<Codec>,
    rejected_profiles: HashSet<Profile>,
    fail_device_open: bool,
    behavior: CodecBehavior,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Every hardware type available on one default device, every codec supported.
    #[must_use]
    pub fn new() -> Self {
        let devices = HardwareType::ALL
            .iter()
            .map(|&hw| (hw, format!("fake-{}", hw.name())))
            .collect();
        Self {
            ledger: Arc::new(ResourceLedger::default()),
            devices,
            surfaces: HashMap::new(),
            codecs: [Codec::H264, Codec::Hevc, Codec::Vp8, Codec::Vp9, Codec::Av1]
                .into_iter()
                .collect(),
            rejected_profiles: HashSet::new(),
            fail_device_open: false,
            behavior: CodecBehavior::default(),
        }
    }

    /// No hardware devices at all; only software decoding works.
    #[must_use]
    pub fn without_hardware(mut self) -> Self {
        self.devices.clear();
        self
    }

    /// Replace the available devices. The first device of each type is its default.
    #[must_use]
    pub fn with_devices(mut self, devices: &[(HardwareType, &str)]) -> Self {
        self.devices = devices
            .iter()
            .map(|&(hw, name)| (hw, name.to_owned()))
            .collect();
        self
    }

    /// Surface formats offered by devices of `hardware`.
    #[must_use]
    pub fn offer_surfaces(mut self, hardware: HardwareType, surfaces: &[SurfaceFormat]) -> Self {
        self.surfaces.insert(hardware, surfaces.to_vec());
        self
    }

    /// Restrict the codecs the backend can decode.
    #[must_use]
    pub fn with_codecs(mut self, codecs: &[Codec]) -> Self {
        self.codecs = codecs.iter().copied().collect();
        self
    }

    #[must_use]
    pub fn reject_profile(mut self, profile: Profile) -> Self {
        self.rejected_profiles.insert(profile);
        self
    }

    /// Devices appear in the list but fail to open.
    #[must_use]
    pub fn fail_device_open(mut self) -> Self {
        self.fail_device_open = true;
        self
    }

    /// Packets the codec accepts before returning `Again`.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.behavior.queue_capacity = capacity.max(1);
        self
    }

    /// Frames held back until more input arrives or the codec is drained.
    #[must_use]
    pub fn delay(mut self, frames: usize) -> Self {
        self.behavior.delay = frames;
        self
    }

    /// Formats hardware frames can be downloaded as.
    #[must_use]
    pub fn transfer_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.behavior.transfer_formats = formats.to_vec();
        self
    }

    /// Packets starting with `marker` are rejected as invalid data.
    #[must_use]
    pub fn corrupt_marker(mut self, marker: u8) -> Self {
        self.behavior.corrupt_marker = Some(marker);
        self
    }

    /// The device faults when asked for frame number `frames` (0-based).
    #[must_use]
    pub fn fault_after(mut self, frames: usize) -> Self {
        self.behavior.fault_after = Some(frames);
        self
    }

    #[must_use]
    pub fn fail_transfer(mut self) -> Self {
        self.behavior.fail_transfer = true;
        self
    }

    /// Hardware codecs silently decode on the CPU.
    #[must_use]
    pub fn software_fallback(mut self) -> Self {
        self.behavior.software_fallback = true;
        self
    }

    /// Produce frames of this size regardless of the configured one.
    #[must_use]
    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.behavior.frame_size = Some((width, height));
        self
    }

    /// Hand out hardware frames in `surface`, whatever was negotiated.
    #[must_use]
    pub fn surface_override(mut self, surface: SurfaceFormat) -> Self {
        self.behavior.surface_override = Some(surface);
        self
    }

    /// Shared resource counters.
    #[must_use]
    pub fn ledger(&self) -> Arc<ResourceLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Backend for FakeBackend {
    type Device = FakeDevice;
    type Codec = FakeCodec;

    fn open_device(&mut self, hardware: HardwareType, device: Option<&str>) -> Result<FakeDevice, BackendError> {
        let found = self
            .devices
            .iter()
            .find(|(hw, name)| *hw == hardware && device.map_or(true, |d| d == name));
        let Some((_, name)) = found else {
            return Err(BackendError::DeviceUnavailable(format!(
                "no {} device {}",
                hardware,
                device.unwrap_or("(default)")
            )));
        };
        if self.fail_device_open {
            return Err(BackendError::DeviceUnavailable(format!("{name}: permission denied")));
        }

        self.ledger.acquire(ResourceKind::Device);
        Ok(FakeDevice {
            hardware,
            name: name.clone(),
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn surface_formats(&self, device: &FakeDevice, codec: Codec, _profile: Option<Profile>) -> Vec<SurfaceFormat> {
        if !self.codecs.contains(&codec) {
            return Vec::new();
        }
        self.surfaces
            .get(&device.hardware)
            .cloned()
            .unwrap_or_else(|| vec![device.hardware.surface_format()])
    }

    fn open_codec(&mut self, params: &CodecParams, device: Option<&FakeDevice>) -> Result<FakeCodec, BackendError> {
        if !self.codecs.contains(&params.codec) {
            return Err(BackendError::unsupported(format!("no {} decoder", params.codec)));
        }
        if let Some(profile) = params.profile.filter(|p| self.rejected_profiles.contains(p)) {
            return Err(BackendError::unsupported(format!(
                "{} profile {} not supported",
                params.codec, profile.0
            )));
        }
        if params.surface.is_some() && device.is_none() {
            return Err(BackendError::generic("hardware surface requested without a device"));
        }

        self.ledger.acquire(ResourceKind::Codec);
        Ok(FakeCodec {
            params: params.clone(),
            behavior: self.behavior.clone(),
            ledger: Arc::clone(&self.ledger),
            input: VecDeque::new(),
            pipeline: VecDeque::new(),
            draining: false,
            emitted: 0,
            sequence: 0,
        })
    }
}

/// Fake opened device.
#[derive(Debug)]
pub struct FakeDevice {
    hardware: HardwareType,
    name: String,
    ledger: Arc<ResourceLedger>,
}

impl DeviceContext for FakeDevice {
    fn hardware(&self) -> HardwareType {
        self.hardware
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.ledger.release(ResourceKind::Device);
    }
}

/// A decoded picture waiting in the fake pipeline.
#[derive(Debug, Clone, Copy)]
struct Picture {
    y: u8,
    u: u8,
    v: u8,
    pts: i64,
}

/// Fake codec context.
#[derive(Debug)]
pub struct FakeCodec {
    params: CodecParams,
    behavior: CodecBehavior,
    ledger: Arc<ResourceLedger>,
    input: VecDeque<Picture>,
    pipeline: VecDeque<Picture>,
    draining: bool,
    emitted: usize,
    sequence: i64,
}

impl FakeCodec {
    fn frame_size(&self) -> (u32, u32) {
        self.behavior
            .frame_size
            .unwrap_or((self.params.width, self.params.height))
    }

    fn next_picture(&mut self) -> Option<Picture> {
        // Decode everything queued so the input queue frees up.
        self.pipeline.extend(self.input.drain(..));
        if self.pipeline.len() > self.behavior.delay || (self.draining && !self.pipeline.is_empty()) {
            self.pipeline.pop_front()
        } else {
            None
        }
    }
}

impl CodecContext for FakeCodec {
    type Frame = FakeHardwareFrame;

    fn send_packet(&mut self, packet: &StagedPacket) -> Result<(), BackendError> {
        if self.draining {
            return Err(BackendError::Eof);
        }
        if packet.is_empty() {
            self.draining = true;
            return Ok(());
        }
        if self.input.len() >= self.behavior.queue_capacity {
            return Err(BackendError::Again);
        }

        let data = packet.data();
        if self.behavior.corrupt_marker == Some(data[0]) {
            return Err(BackendError::invalid_data("non-existing PPS referenced"));
        }

        // Fixed-width header read, short packets stay in bounds thanks to the padding.
        let header = &packet.padded()[..3];
        let chroma = |index: usize| if index < data.len() { header[index] } else { 128 };
        self.input.push_back(Picture {
            y: header[0],
            u: chroma(1),
            v: chroma(2),
            pts: self.sequence,
        });
        self.sequence += 1;
        trace!(bytes = data.len(), queued = self.input.len(), "fake codec queued packet");
        Ok(())
    }

    fn receive_frame(&mut self, software: &mut SoftwareFrame) -> Result<Decoded<FakeHardwareFrame>, BackendError> {
        if self.behavior.fault_after == Some(self.emitted) {
            return Err(BackendError::Io("device fault".into()));
        }

        let Some(picture) = self.next_picture() else {
            return Err(if self.draining {
                BackendError::Eof
            } else {
                BackendError::Again
            });
        };
        self.emitted += 1;

        let (width, height) = self.frame_size();
        let surface = match self.behavior.surface_override.or(self.params.surface) {
            Some(surface) if !self.behavior.software_fallback => surface,
            _ => {
                fill_nv12(software, width, height, picture)?;
                return Ok(Decoded::Software);
            }
        };

        self.ledger.acquire(ResourceKind::HardwareFrame);
        Ok(Decoded::Hardware(FakeHardwareFrame::new(
            surface,
            width,
            height,
            picture,
            &self.behavior,
            Arc::clone(&self.ledger),
        )))
    }

    fn reset(&mut self) {
        self.input.clear();
        self.pipeline.clear();
        self.draining = false;
    }
}

impl Drop for FakeCodec {
    fn drop(&mut self) {
        self.ledger.release(ResourceKind::Codec);
    }
}

fn fill_nv12(frame: &mut SoftwareFrame, width: u32, height: u32, picture: Picture) -> Result<(), BackendError> {
    frame.reshape(width, height, PixelFormat::Nv12)?;
    frame.set_pts(Some(picture.pts));
    frame.plane_mut(0).fill(picture.y);
    for pair in frame.plane_mut(1).chunks_exact_mut(2) {
        pair[0] = picture.u;
        pair[1] = picture.v;
    }
    Ok(())
}

/// Frame living in fake device memory: a pitched NV12 surface.
#[derive(Debug)]
pub struct FakeHardwareFrame {
    surface: SurfaceFormat,
    width: u32,
    height: u32,
    pitch: usize,
    memory: Vec<u8>,
    pts: i64,
    transfer_formats: Vec<PixelFormat>,
    fail_transfer: bool,
    ledger: Arc<ResourceLedger>,
}

impl FakeHardwareFrame {
    fn new(
        surface: SurfaceFormat,
        width: u32,
        height: u32,
        picture: Picture,
        behavior: &CodecBehavior,
        ledger: Arc<ResourceLedger>,
    ) -> Self {
        let w = width as usize;
        let h = height as usize;
        let chroma_width = w.div_ceil(2) * 2;
        let pitch = chroma_width.max(w).div_ceil(SURFACE_PITCH_ALIGN) * SURFACE_PITCH_ALIGN;
        let luma = pitch * h;
        let mut memory = vec![0xEE; luma + pitch * h.div_ceil(2)];

        for row in 0..h {
            memory[row * pitch..row * pitch + w].fill(picture.y);
        }
        for row in 0..h.div_ceil(2) {
            let start = luma + row * pitch;
            for pair in memory[start..start + chroma_width].chunks_exact_mut(2) {
                pair[0] = picture.u;
                pair[1] = picture.v;
            }
        }

        Self {
            surface,
            width,
            height,
            pitch,
            memory,
            pts: picture.pts,
            transfer_formats: behavior.transfer_formats.clone(),
            fail_transfer: behavior.fail_transfer,
            ledger,
        }
    }

    fn download_nv12(&self, dst: &mut SoftwareFrame) -> Result<(), BackendError> {
        dst.reshape(self.width, self.height, PixelFormat::Nv12)?;
        dst.set_pts(Some(self.pts));
        let luma = self.pitch * self.height as usize;
        dst.write_plane(0, &self.memory[..luma], self.pitch)?;
        dst.write_plane(1, &self.memory[luma..], self.pitch)
    }
}

impl HardwareFrame for FakeHardwareFrame {
    fn surface_format(&self) -> SurfaceFormat {
        self.surface
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn transfer_formats(&self) -> Vec<PixelFormat> {
        self.transfer_formats.clone()
    }

    fn transfer_to(&self, dst: &mut SoftwareFrame, format: PixelFormat) -> Result<(), BackendError> {
        if self.fail_transfer {
            return Err(BackendError::transfer("device lost during download"));
        }
        if !self.transfer_formats.contains(&format) {
            return Err(BackendError::unsupported(format!("cannot download as {format}")));
        }
        if format == PixelFormat::Nv12 {
            return self.download_nv12(dst);
        }

        // Other formats go through the driver's converter.
        let mut staging = SoftwareFrame::default();
        self.download_nv12(&mut staging)?;
        convert::convert(&staging, dst, format).map_err(|e| BackendError::transfer(e.to_string()))
    }
}

impl Drop for FakeHardwareFrame {
    fn drop(&mut self) {
        self.ledger.release(ResourceKind::HardwareFrame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(data: &[u8]) -> StagedPacket {
        let mut packet = StagedPacket::with_capacity(data.len());
        packet.stage(data);
        packet
    }

    fn sw_params(width: u32, height: u32) -> CodecParams {
        CodecParams {
            surface: None,
            ..hw_params(width, height)
        }
    }

    fn hw_params(width: u32, height: u32) -> CodecParams {
        CodecParams {
            codec: Codec::H264,
            width,
            height,
            profile: None,
            surface: Some(SurfaceFormat::Vaapi),
        }
    }

    #[test]
    fn test_device_selection() {
        let mut backend = FakeBackend::new().with_devices(&[
            (HardwareType::Vaapi, "/dev/dri/renderD128"),
            (HardwareType::Vaapi, "/dev/dri/renderD129"),
        ]);

        let default = backend.open_device(HardwareType::Vaapi, None).unwrap();
        assert_eq!(default.name(), "/dev/dri/renderD128");
        let second = backend.open_device(HardwareType::Vaapi, Some("/dev/dri/renderD129")).unwrap();
        assert_eq!(second.name(), "/dev/dri/renderD129");

        assert!(backend.open_device(HardwareType::Vaapi, Some("/dev/dri/renderD130")).is_err());
        assert!(backend.open_device(HardwareType::Cuda, None).is_err());

        let ledger = backend.ledger();
        assert_eq!(ledger.outstanding(ResourceKind::Device), 2);
        drop(default);
        drop(second);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_backpressure_and_drain() {
        let mut backend = FakeBackend::new().queue_capacity(2);
        let device = backend.open_device(HardwareType::Vaapi, None).unwrap();
        let mut codec = backend.open_codec(&hw_params(4, 2), Some(&device)).unwrap();
        let mut sw = SoftwareFrame::default();

        codec.send_packet(&staged(&[1])).unwrap();
        codec.send_packet(&staged(&[2])).unwrap();
        assert_eq!(codec.send_packet(&staged(&[3])), Err(BackendError::Again));

        assert!(matches!(codec.receive_frame(&mut sw), Ok(Decoded::Hardware(_))));
        codec.send_packet(&staged(&[3])).unwrap();

        codec.send_packet(&staged(&[])).unwrap();
        assert_eq!(codec.send_packet(&staged(&[4])), Err(BackendError::Eof));
        assert!(matches!(codec.receive_frame(&mut sw), Ok(Decoded::Hardware(_))));
        assert!(matches!(codec.receive_frame(&mut sw), Ok(Decoded::Hardware(_))));
        assert!(matches!(codec.receive_frame(&mut sw), Err(BackendError::Eof)));

        codec.reset();
        codec.send_packet(&staged(&[5])).unwrap();
    }

    #[test]
    fn test_hardware_frame_download() {
        let mut backend = FakeBackend::new().transfer_formats(&[PixelFormat::Nv12, PixelFormat::Yuv420p]);
        let device = backend.open_device(HardwareType::Vaapi, None).unwrap();
        let mut codec = backend.open_codec(&hw_params(6, 4), Some(&device)).unwrap();
        let mut sw = SoftwareFrame::default();

        codec.send_packet(&staged(&[50, 60, 70])).unwrap();
        let Ok(Decoded::Hardware(frame)) = codec.receive_frame(&mut sw) else {
            panic!("expected a hardware frame");
        };
        assert_eq!(frame.surface_format(), SurfaceFormat::Vaapi);
        assert!(frame.pitch > 6);

        frame.transfer_to(&mut sw, PixelFormat::Nv12).unwrap();
        assert_eq!(sw.plane(0), &[50; 24]);
        assert_eq!(sw.plane(1), &[60, 70, 60, 70, 60, 70, 60, 70, 60, 70, 60, 70]);
        assert_eq!(sw.pts(), Some(0));

        frame.transfer_to(&mut sw, PixelFormat::Yuv420p).unwrap();
        assert_eq!(sw.plane(1), &[60; 6]);
        assert_eq!(sw.plane(2), &[70; 6]);

        assert!(frame.transfer_to(&mut sw, PixelFormat::Rgb24).is_err());

        let ledger = backend.ledger();
        assert_eq!(ledger.outstanding(ResourceKind::HardwareFrame), 1);
        drop(frame);
        drop(codec);
        drop(device);
        assert!(ledger.is_balanced());
        assert_eq!(
            ledger.release_order(),
            vec![ResourceKind::HardwareFrame, ResourceKind::Codec, ResourceKind::Device]
        );
    }

    #[test]
    fn test_short_packet_reads_header_from_padding() {
        let mut backend = FakeBackend::new();
        let mut codec = backend.open_codec(&sw_params(2, 2), None).unwrap();
        let mut sw = SoftwareFrame::default();

        let mut packet = staged(&[9, 8, 7, 6]);
        packet.stage(&[42]);
        assert_eq!(&packet.padded()[..4], &[42, 0, 0, 0]);
        codec.send_packet(&packet).unwrap();
        assert!(matches!(codec.receive_frame(&mut sw), Ok(Decoded::Software)));
        assert_eq!(sw.plane(0), &[42; 4]);
        assert_eq!(sw.plane(1), &[128, 128]);
    }

    #[test]
    fn test_surface_override() {
        let mut backend = FakeBackend::new().surface_override(SurfaceFormat::Cuda);
        let device = backend.open_device(HardwareType::Vaapi, None).unwrap();
        let mut codec = backend.open_codec(&hw_params(4, 4), Some(&device)).unwrap();
        let mut sw = SoftwareFrame::default();

        codec.send_packet(&staged(&[1])).unwrap();
        let Ok(Decoded::Hardware(frame)) = codec.receive_frame(&mut sw) else {
            panic!("expected a hardware frame");
        };
        assert_eq!(frame.surface_format(), SurfaceFormat::Cuda);
    }

    #[test]
    fn test_codec_and_profile_rejection() {
        let mut backend = FakeBackend::new()
            .with_codecs(&[Codec::H264])
            .reject_profile(Profile::H264_HIGH);
        let mut params = hw_params(16, 16);
        params.surface = None;

        params.codec = Codec::Vp9;
        assert!(matches!(backend.open_codec(&params, None), Err(BackendError::Unsupported(_))));

        params.codec = Codec::H264;
        params.profile = Some(Profile::H264_HIGH);
        assert!(matches!(backend.open_codec(&params, None), Err(BackendError::Unsupported(_))));

        params.profile = Some(Profile::H264_MAIN);
        assert!(backend.open_codec(&params, None).is_ok());
        assert!(backend.ledger().is_balanced());
    }
}
