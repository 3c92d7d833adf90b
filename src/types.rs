//! Core types for decoder configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::UnknownName;

/// Video codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// H.264/AVC codec.
    #[default]
    H264,
    /// H.265/HEVC codec.
    Hevc,
    /// VP8 codec.
    Vp8,
    /// VP9 codec.
    Vp9,
    /// AV1 codec.
    Av1,
}

impl Codec {
    /// Decoder name as used on command lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "hevc" | "h265" => Ok(Self::Hevc),
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            "av1" => Ok(Self::Av1),
            _ => Err(UnknownName::new("codec", s)),
        }
    }
}

/// Hardware acceleration API used to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareType {
    /// Video Acceleration API (Linux, Intel/AMD).
    Vaapi,
    /// VDPAU (Linux, NVIDIA legacy).
    Vdpau,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 video (Windows).
    D3d11va,
    /// VideoToolbox (macOS).
    VideoToolbox,
    /// CUDA / NVDEC (NVIDIA).
    Cuda,
}

impl HardwareType {
    /// Every hardware type the decoder knows how to negotiate.
    pub const ALL: [HardwareType; 6] = [
        Self::Vaapi,
        Self::Vdpau,
        Self::Dxva2,
        Self::D3d11va,
        Self::VideoToolbox,
        Self::Cuda,
    ];

    /// The surface format frames decoded by this hardware are resident in.
    ///
    /// Hardware types missing from this mapping cannot be supported at all,
    /// so extending it is the way to add hardware.
    #[must_use]
    pub fn surface_format(&self) -> SurfaceFormat {
        match self {
            Self::Vaapi => SurfaceFormat::Vaapi,
            Self::Vdpau => SurfaceFormat::Vdpau,
            Self::Dxva2 => SurfaceFormat::Dxva2Vld,
            Self::D3d11va => SurfaceFormat::D3d11,
            Self::VideoToolbox => SurfaceFormat::VideoToolbox,
            Self::Cuda => SurfaceFormat::Cuda,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vaapi => "vaapi",
            Self::Vdpau => "vdpau",
            Self::Dxva2 => "dxva2",
            Self::D3d11va => "d3d11va",
            Self::VideoToolbox => "videotoolbox",
            Self::Cuda => "cuda",
        }
    }
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|hw| hw.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownName::new("hardware", s))
    }
}

/// Opaque pixel format of a frame resident in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    Vaapi,
    Vdpau,
    Dxva2Vld,
    D3d11,
    VideoToolbox,
    Cuda,
}

/// Pixel format for frames in system memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// NV12 (YUV 4:2:0, planar Y + interleaved UV).
    #[default]
    Nv12,
    /// YUV420P/I420 (YUV 4:2:0, planar Y + U + V).
    Yuv420p,
    /// RGB with 8 bits per channel (24 bits per pixel).
    Rgb24,
    /// BGR with 8 bits per channel (24 bits per pixel).
    Bgr24,
    /// RGB plus one padding byte (32 bits per pixel).
    Rgb0,
    /// BGR plus one padding byte (32 bits per pixel).
    Bgr0,
    /// RGBA with 8 bits per channel (32 bits per pixel).
    Rgba,
    /// BGRA with 8 bits per channel (32 bits per pixel).
    Bgra,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 8] = [
        Self::Nv12,
        Self::Yuv420p,
        Self::Rgb24,
        Self::Bgr24,
        Self::Rgb0,
        Self::Bgr0,
        Self::Rgba,
        Self::Bgra,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nv12 => "nv12",
            Self::Yuv420p => "yuv420p",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgb0 => "rgb0",
            Self::Bgr0 => "bgr0",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
        }
    }

    /// Number of planes a frame of this format is stored in.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::Yuv420p => 3,
            _ => 1,
        }
    }

    /// Returns true for the YUV 4:2:0 formats.
    #[must_use]
    pub fn is_yuv420(&self) -> bool {
        matches!(self, Self::Nv12 | Self::Yuv420p)
    }

    /// Bytes per pixel for packed formats, `None` for planar ones.
    #[must_use]
    pub fn packed_bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Nv12 | Self::Yuv420p => None,
            Self::Rgb24 | Self::Bgr24 => Some(3),
            Self::Rgb0 | Self::Bgr0 | Self::Rgba | Self::Bgra => Some(4),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = match lower.as_str() {
            "i420" => "yuv420p",
            "rgb" => "rgb24",
            "bgr" => "bgr24",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|fmt| fmt.name() == name)
            .ok_or_else(|| UnknownName::new("pixel format", s))
    }
}

/// Codec profile number, interpreted by the codec it is used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Profile(pub i32);

impl Profile {
    pub const H264_BASELINE: Profile = Profile(66);
    pub const H264_CONSTRAINED_BASELINE: Profile = Profile(66 | (1 << 9));
    pub const H264_MAIN: Profile = Profile(77);
    pub const H264_HIGH: Profile = Profile(100);
    pub const HEVC_MAIN: Profile = Profile(1);
    pub const HEVC_MAIN_10: Profile = Profile(2);
    pub const VP9_0: Profile = Profile(0);
    pub const VP9_2: Profile = Profile(2);
    pub const AV1_MAIN: Profile = Profile(0);
}

/// Configuration for creating a decoder.
///
/// Supplied once to [`Decoder::init`](crate::Decoder::init) and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Video codec to decode.
    pub codec: Codec,
    /// Hardware acceleration to use, `None` for software decoding.
    pub hardware: Option<HardwareType>,
    /// Device path, e.g. `/dev/dri/renderD128`. `None` selects automatically.
    pub device: Option<String>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the frames returned to the caller (default: NV12).
    pub pixel_format: Option<PixelFormat>,
    /// Codec profile, `None` for the codec default.
    pub profile: Option<Profile>,
    /// Report unparsable packets as accepted instead of faulting the decoder.
    pub tolerate_corrupt_packets: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            hardware: None,
            device: None,
            width: 1920,
            height: 1080,
            pixel_format: None,
            profile: None,
            tolerate_corrupt_packets: false,
        }
    }
}

impl DecoderConfig {
    /// Create a new software decoder configuration.
    #[must_use]
    pub fn new(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            ..Default::default()
        }
    }

    /// Build a configuration from command-line style names.
    ///
    /// `hardware` of `None`, `""` or `"none"` selects software decoding.
    /// Empty `device` and `pixel_format` strings mean "default".
    pub fn from_names(
        hardware: Option<&str>,
        codec: &str,
        device: Option<&str>,
        pixel_format: Option<&str>,
        width: u32,
        height: u32,
    ) -> Result<Self, UnknownName> {
        let hardware = match hardware {
            None | Some("") => None,
            Some(name) if name.eq_ignore_ascii_case("none") => None,
            Some(name) => Some(name.parse()?),
        };
        let pixel_format = match pixel_format {
            None | Some("") => None,
            Some(name) => Some(name.parse()?),
        };
        let mut config = Self::new(codec.parse()?, width, height);
        config.hardware = hardware;
        config.pixel_format = pixel_format;
        if let Some(device) = device {
            config = config.device(device);
        }
        Ok(config)
    }

    /// Decode with the given hardware acceleration.
    #[must_use]
    pub fn hardware(mut self, hardware: HardwareType) -> Self {
        self.hardware = Some(hardware);
        self
    }

    /// Set the device path. An empty string keeps automatic selection.
    #[must_use]
    pub fn device(mut self, device: impl Into<String>) -> Self {
        let device = device.into();
        self.device = (!device.is_empty()).then_some(device);
        self
    }

    /// Set the output pixel format.
    #[must_use]
    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = Some(format);
        self
    }

    /// Set the codec profile.
    #[must_use]
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Keep decoding past unparsable packets.
    #[must_use]
    pub fn tolerate_corrupt_packets(mut self, enable: bool) -> Self {
        self.tolerate_corrupt_packets = enable;
        self
    }

    /// Output pixel format, resolving the default.
    #[must_use]
    pub fn output_format(&self) -> PixelFormat {
        self.pixel_format.unwrap_or_default()
    }

    /// Returns true when hardware decoding was requested.
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        self.hardware.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_names() {
        assert_eq!("h264".parse::<Codec>().unwrap(), Codec::H264);
        assert_eq!("H265".parse::<Codec>().unwrap(), Codec::Hevc);
        assert_eq!("vp9".parse::<Codec>().unwrap(), Codec::Vp9);
        let err = "mpeg2".parse::<Codec>().unwrap_err();
        assert_eq!(err.kind, "codec");
        assert_eq!(err.name, "mpeg2");
    }

    #[test]
    fn test_hardware_surface_mapping() {
        assert_eq!("VAAPI".parse::<HardwareType>().unwrap(), HardwareType::Vaapi);
        assert_eq!(HardwareType::Dxva2.surface_format(), SurfaceFormat::Dxva2Vld);
        assert_eq!(HardwareType::Cuda.surface_format(), SurfaceFormat::Cuda);
        assert!("opencl".parse::<HardwareType>().is_err());
    }

    #[test]
    fn test_pixel_format_names() {
        assert_eq!("RGB0".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb0);
        assert_eq!("BGR0".parse::<PixelFormat>().unwrap(), PixelFormat::Bgr0);
        assert_eq!("YUV420P".parse::<PixelFormat>().unwrap(), PixelFormat::Yuv420p);
        assert_eq!("i420".parse::<PixelFormat>().unwrap(), PixelFormat::Yuv420p);
        assert_eq!("NV12".parse::<PixelFormat>().unwrap(), PixelFormat::Nv12);
        assert!("p010".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_config_from_names() {
        let config = DecoderConfig::from_names(
            Some("vaapi"),
            "h264",
            Some("/dev/dri/renderD128"),
            Some("BGR0"),
            1280,
            720,
        )
        .unwrap();
        assert_eq!(config.hardware, Some(HardwareType::Vaapi));
        assert_eq!(config.device.as_deref(), Some("/dev/dri/renderD128"));
        assert_eq!(config.output_format(), PixelFormat::Bgr0);
        assert_eq!((config.width, config.height), (1280, 720));

        let config = DecoderConfig::from_names(Some("none"), "av1", Some(""), None, 64, 64).unwrap();
        assert!(!config.is_hardware());
        assert_eq!(config.device, None);
        assert_eq!(config.output_format(), PixelFormat::Nv12);

        assert!(DecoderConfig::from_names(Some("vaapi"), "h264", None, Some("xyz"), 64, 64).is_err());
    }

    #[test]
    fn test_builder() {
        let config = DecoderConfig::new(Codec::Hevc, 640, 480)
            .hardware(HardwareType::Cuda)
            .device("")
            .profile(Profile::HEVC_MAIN_10)
            .tolerate_corrupt_packets(true);
        assert_eq!(config.device, None);
        assert_eq!(config.profile, Some(Profile::HEVC_MAIN_10));
        assert!(config.tolerate_corrupt_packets);
    }
}
