// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel formats, usage flags and plane layouts understood by the HAL.

use crate::{Error, Result, MAX_PLANES};
use core::fmt;
use serde::Deserialize;
use tracing::{debug, warn};

/// Four character pixel format code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

/// NV12 4:2:0 YUV semi-planar format
pub const NV12: FourCC = FourCC(*b"NV12");

/// NV21 4:2:0 YUV semi-planar format with swapped chroma
pub const NV21: FourCC = FourCC(*b"NV21");

/// YV12 4:2:0 YUV planar format
pub const YV12: FourCC = FourCC(*b"YV12");

/// 16-bit greyscale, used for depth streams
pub const Y16: FourCC = FourCC(*b"Y16 ");

/// 10-bit packed Bayer
pub const RAW10: FourCC = FourCC(*b"RG10");

/// 16-bit unpacked Bayer
pub const RAW16: FourCC = FourCC(*b"RG16");

/// 10-bit 4:2:0 semi-planar
pub const P010: FourCC = FourCC(*b"P010");

/// Opaque blob (JPEG and friends)
pub const BLOB: FourCC = FourCC(*b"BLOB");

impl From<u32> for FourCC {
    fn from(value: u32) -> Self {
        FourCC(value.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(value: FourCC) -> Self {
        u32::from_le_bytes(value.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Android HAL pixel formats supported by the capture streams.
#[derive(clap::ValueEnum, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum HalPixelFormat {
    /// 16-bit raw Bayer
    Raw16 = 0x20,
    /// Opaque blob, typically JPEG
    Blob = 0x21,
    /// Vendor chosen format, treated as NV12
    ImplementationDefined = 0x22,
    /// Flexible 4:2:0 YUV
    #[value(name = "ycbcr420888")]
    Ycbcr420888 = 0x23,
    /// Vendor raw format
    RawOpaque = 0x24,
    /// 10-bit packed raw Bayer
    Raw10 = 0x25,
    /// 10-bit 4:2:0 semi-planar
    Pd10 = 0x26,
    /// NV21
    Ycrcb420Sp = 0x11,
    /// YV12 planar
    #[value(name = "yv12")]
    Yv12 = 0x3231_5659,
    /// 16-bit depth
    #[value(name = "y16")]
    Y16 = 0x2036_3159,
    /// Bandwidth compressed NV12
    UbwcNv12 = 0x7FA3_0C06,
    /// Bandwidth compressed 10-bit 4:2:0
    UbwcTp10 = 0x7FA3_0C09,
}

const ALL_FORMATS: [HalPixelFormat; 12] = [
    HalPixelFormat::Raw16,
    HalPixelFormat::Blob,
    HalPixelFormat::ImplementationDefined,
    HalPixelFormat::Ycbcr420888,
    HalPixelFormat::RawOpaque,
    HalPixelFormat::Raw10,
    HalPixelFormat::Pd10,
    HalPixelFormat::Ycrcb420Sp,
    HalPixelFormat::Yv12,
    HalPixelFormat::Y16,
    HalPixelFormat::UbwcNv12,
    HalPixelFormat::UbwcTp10,
];

impl HalPixelFormat {
    pub fn from_code(code: i32) -> Result<Self> {
        ALL_FORMATS
            .iter()
            .copied()
            .find(|f| f.code() == code)
            .ok_or(Error::UnsupportedFormat(code))
    }

    /// Maps an entry of the static stream configuration table. The HAL
    /// advertises IMPLEMENTATION_DEFINED but we always request flexible YUV.
    pub fn from_scaler_code(code: i32) -> Result<Self> {
        match Self::from_code(code)? {
            HalPixelFormat::ImplementationDefined => Ok(HalPixelFormat::Ycbcr420888),
            f @ (HalPixelFormat::Ycbcr420888
            | HalPixelFormat::Ycrcb420Sp
            | HalPixelFormat::Yv12) => Ok(f),
            _ => Err(Error::UnsupportedFormat(code)),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn fourcc(self) -> FourCC {
        match self {
            HalPixelFormat::Raw16 => RAW16,
            HalPixelFormat::Blob => BLOB,
            HalPixelFormat::ImplementationDefined => NV12,
            HalPixelFormat::Ycbcr420888 => NV12,
            HalPixelFormat::RawOpaque => RAW10,
            HalPixelFormat::Raw10 => RAW10,
            HalPixelFormat::Pd10 => P010,
            HalPixelFormat::Ycrcb420Sp => NV21,
            HalPixelFormat::Yv12 => YV12,
            HalPixelFormat::Y16 => Y16,
            HalPixelFormat::UbwcNv12 => NV12,
            HalPixelFormat::UbwcTp10 => P010,
        }
    }

    /// Number of memory planes the format occupies.
    pub fn planes(self) -> usize {
        match self {
            HalPixelFormat::Yv12 => 3,
            HalPixelFormat::ImplementationDefined
            | HalPixelFormat::Ycbcr420888
            | HalPixelFormat::Ycrcb420Sp
            | HalPixelFormat::Pd10
            | HalPixelFormat::UbwcNv12
            | HalPixelFormat::UbwcTp10 => 2,
            _ => 1,
        }
    }

    /// Bytes per pixel of the luma (or only) plane, rounded up.
    const fn bytes_per_pixel(self) -> u32 {
        match self {
            HalPixelFormat::Raw16 | HalPixelFormat::Y16 | HalPixelFormat::Pd10 => 2,
            HalPixelFormat::UbwcTp10 => 2,
            _ => 1,
        }
    }

    fn is_ubwc(self) -> bool {
        matches!(self, HalPixelFormat::UbwcNv12 | HalPixelFormat::UbwcTp10)
    }
}

impl fmt::Display for HalPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self, self.fourcc())
    }
}

/// Gralloc producer usage bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ProducerUsage(pub u64);

impl ProducerUsage {
    pub const NONE: ProducerUsage = ProducerUsage(0);
    pub const CAMERA: ProducerUsage = ProducerUsage(1 << 17);

    pub fn contains(self, other: ProducerUsage) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

/// Gralloc consumer usage bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ConsumerUsage(pub u64);

impl ConsumerUsage {
    pub const NONE: ConsumerUsage = ConsumerUsage(0);
    pub const CAMERA: ConsumerUsage = ConsumerUsage(1 << 18);

    pub fn contains(self, other: ConsumerUsage) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

/// Usage bits handed to the native allocator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeUsage(pub u32);

impl NativeUsage {
    pub const CAMERA_READ: NativeUsage = NativeUsage(1 << 0);
    pub const CAMERA_WRITE: NativeUsage = NativeUsage(1 << 1);
    pub const UBWC_ALIGNED: NativeUsage = NativeUsage(1 << 2);

    pub fn contains(self, other: NativeUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for NativeUsage {
    type Output = NativeUsage;

    fn bitor(self, rhs: Self) -> Self::Output {
        NativeUsage(self.0 | rhs.0)
    }
}

/// Translates gralloc usage into native allocator usage.
///
/// Camera read/write bits follow whichever side names the camera; when
/// neither or both do, the buffer is readable and writable by the camera.
/// Bandwidth compressed formats only need UBWC alignment.
pub fn native_usage(
    format: HalPixelFormat,
    producer: ProducerUsage,
    consumer: ConsumerUsage,
) -> Result<NativeUsage> {
    if format.is_ubwc() {
        return Ok(NativeUsage::UBWC_ALIGNED);
    }

    let read = consumer.contains(ConsumerUsage::CAMERA);
    let write = producer.contains(ProducerUsage::CAMERA);
    let usage = match (read, write) {
        (true, false) => NativeUsage::CAMERA_READ,
        (false, true) => NativeUsage::CAMERA_WRITE,
        _ => NativeUsage::CAMERA_READ | NativeUsage::CAMERA_WRITE,
    };
    Ok(usage)
}

/// HAL data space of an output stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataSpace {
    Unknown,
    Depth,
}

impl DataSpace {
    pub fn for_format(format: HalPixelFormat) -> Self {
        if format == HalPixelFormat::Y16 {
            DataSpace::Depth
        } else {
            DataSpace::Unknown
        }
    }
}

/// Memory layout of one plane.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    pub stride: u32,
    pub size: u32,
    pub offset: u32,
}

/// Complete buffer layout for a stream: dimensions, format and planes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HalFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: HalPixelFormat,
    planes: Vec<PlaneLayout>,
    total_size: u32,
}

fn round_up(value: u32, align: u32) -> Option<u32> {
    value.div_ceil(align).checked_mul(align)
}

fn plane_rows(format: HalPixelFormat, height: u32, plane: usize) -> Option<u32> {
    match format {
        HalPixelFormat::Ycbcr420888 => round_up(height / (1 + plane as u32), 64),
        _ if plane == 0 => Some(height),
        _ => Some(height / 2),
    }
}

fn overflow(width: u32, height: u32, pixel_format: HalPixelFormat) -> Error {
    Error::InvalidConfiguration(format!(
        "{width}x{height} {pixel_format} buffer size overflows"
    ))
}

impl HalFormat {
    /// Builds a layout with the natural row stride of the format.
    pub fn new(width: u32, height: u32, pixel_format: HalPixelFormat) -> Result<Self> {
        let stride = width
            .checked_mul(pixel_format.bytes_per_pixel())
            .ok_or_else(|| overflow(width, height, pixel_format))?;
        Self::with_stride(width, height, pixel_format, stride)
    }

    /// Builds a layout from the luma stride reported by the allocator.
    pub fn with_stride(
        width: u32,
        height: u32,
        pixel_format: HalPixelFormat,
        stride: u32,
    ) -> Result<Self> {
        let strides: Vec<u32> = (0..pixel_format.planes())
            .map(|plane| match (pixel_format, plane) {
                (HalPixelFormat::Yv12, 1 | 2) => stride / 2,
                _ => stride,
            })
            .collect();
        Self::with_strides(width, height, pixel_format, &strides)
    }

    /// Builds a layout from explicit per-plane strides, as reported by the
    /// allocator. Extra strides beyond [`MAX_PLANES`] are ignored.
    ///
    /// Fails when the buffer would not fit in 32 bits.
    pub fn with_strides(
        width: u32,
        height: u32,
        pixel_format: HalPixelFormat,
        strides: &[u32],
    ) -> Result<Self> {
        if strides.len() > MAX_PLANES {
            warn!(planes = strides.len(), "too many planes, truncating");
        }

        let mut planes = Vec::with_capacity(strides.len().min(MAX_PLANES));
        let mut offset: u32 = 0;
        for (i, stride) in strides.iter().take(MAX_PLANES).enumerate() {
            let row = match pixel_format {
                HalPixelFormat::Ycbcr420888 => round_up(*stride, 64),
                _ => Some(*stride),
            };
            let size = row
                .zip(plane_rows(pixel_format, height, i))
                .and_then(|(row, rows)| row.checked_mul(rows))
                .ok_or_else(|| overflow(width, height, pixel_format))?;
            planes.push(PlaneLayout {
                stride: *stride,
                size,
                offset,
            });
            offset = offset
                .checked_add(size)
                .ok_or_else(|| overflow(width, height, pixel_format))?;
        }

        debug!(width, height, %pixel_format, size = offset, "computed layout");

        Ok(Self {
            width,
            height,
            pixel_format,
            planes,
            total_size: offset,
        })
    }

    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One output entry of the device's static stream configuration table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub pixel_format: HalPixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Direction marker of an output configuration entry.
pub const SCALER_CONFIGURATION_OUTPUT: i32 = 0;

/// Decodes the `(format, width, height, direction)` quadruples of the
/// static metadata and returns the output configurations, largest first.
pub fn parse_stream_configurations(entries: &[i32]) -> Result<Vec<StreamConfiguration>> {
    if entries.len() % 4 != 0 {
        return Err(Error::InvalidConfiguration(format!(
            "stream configuration table has {} entries, expected a multiple of 4",
            entries.len()
        )));
    }

    let mut configs = Vec::new();
    for quad in entries.chunks_exact(4) {
        if quad[3] != SCALER_CONFIGURATION_OUTPUT {
            continue;
        }
        let pixel_format = match HalPixelFormat::from_scaler_code(quad[0]) {
            Ok(f) => f,
            Err(e) => {
                warn!("skipping stream configuration: {e}");
                continue;
            }
        };
        configs.push(StreamConfiguration {
            pixel_format,
            width: quad[1] as u32,
            height: quad[2] as u32,
        });
    }

    configs.sort_by(|a, b| {
        let a = a.width as u64 * a.height as u64;
        let b = b.width as u64 * b.height as u64;
        b.cmp(&a)
    });

    for c in &configs {
        debug!("HAL format {} {}x{}", c.pixel_format, c.width, c.height);
    }

    Ok(configs)
}

/// Finds an exact match for the requested format and size.
pub fn find_configuration(
    configs: &[StreamConfiguration],
    pixel_format: HalPixelFormat,
    width: u32,
    height: u32,
) -> Option<StreamConfiguration> {
    configs
        .iter()
        .copied()
        .find(|c| c.pixel_format == pixel_format && c.width == width && c.height == height)
}
