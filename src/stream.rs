// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device-facing stream and buffer descriptors.

use crate::{
    format::{ConsumerUsage, DataSpace, HalPixelFormat},
    memory::NativeHandle,
};
use core::fmt;

/// Identifies one output stream of a device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stream_{}", self.0)
    }
}

/// Output stream as handed to `configure_streams`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub width: u32,
    pub height: u32,
    pub format: HalPixelFormat,
    pub data_space: DataSpace,
    pub usage: ConsumerUsage,
    pub rotation: u32,
    /// Filled in by the device during configuration.
    pub max_buffers: u32,
}

impl StreamDescriptor {
    pub fn new(
        id: StreamId,
        width: u32,
        height: u32,
        format: HalPixelFormat,
        usage: ConsumerUsage,
    ) -> Self {
        Self {
            id,
            width,
            height,
            format,
            data_space: DataSpace::for_format(format),
            usage,
            rotation: 0,
            max_buffers: 0,
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}x{} {} usage {:#x}",
            self.id, self.width, self.height, self.format, self.usage.0
        )
    }
}

/// Buffer reference lent to the device between submission and completion.
///
/// Only the native handle identifies the memory; the device never sees the
/// group or the consumer buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamBuffer {
    pub stream: StreamId,
    pub handle: NativeHandle,
}

impl fmt::Display for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} handle {:#x}", self.stream, self.handle)
    }
}
