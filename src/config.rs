// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Stream, scheduler and camera configuration.
//!
//! [`StreamConfig`] and [`SchedulerConfig`] are `clap::Args` so an
//! application can flatten them into its own command line; every option can
//! also be given through the environment. [`CameraConfig`] is the JSON form
//! used to describe a whole camera session.
//!
//! ```bash
//! export STREAM_WIDTH=1280
//! export STREAM_HEIGHT=720
//! export PENDING_TIMEOUT=33
//! ```

use crate::{
    device::RequestTemplate,
    format::{ConsumerUsage, HalFormat, HalPixelFormat},
    stream::{StreamDescriptor, StreamId},
    Error, Result, MAX_FRAME,
};
use clap::Args;
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// Nominal frame interval the scheduler waits on a pending queue.
pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 66;

/// Largest width or height accepted for a stream.
pub const MAX_DIMENSION: u32 = 16384;

/// One output stream.
#[derive(Args, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Stream width in pixels
    #[arg(long = "stream-width", env = "STREAM_WIDTH", default_value = "1920")]
    pub width: u32,

    /// Stream height in pixels
    #[arg(long = "stream-height", env = "STREAM_HEIGHT", default_value = "1080")]
    pub height: u32,

    /// HAL pixel format of the stream
    #[arg(
        long = "stream-format",
        env = "STREAM_FORMAT",
        default_value = "ycbcr420888",
        value_enum
    )]
    pub format: HalPixelFormat,

    /// Minimum number of buffers requested by the consumer
    #[arg(long, env = "MIN_BUFFERS", default_value = "2")]
    pub min_buffers: usize,

    /// Maximum number of buffers, 0 uses the pool capacity
    #[arg(long, env = "MAX_BUFFERS", default_value = "0")]
    pub max_buffers: usize,

    /// Number of buffers the pool can circulate
    #[arg(long, env = "POOL_CAPACITY", default_value = "16")]
    pub capacity: usize,

    /// Consumer usage flags passed to the device
    #[arg(long, env = "CONSUMER_USAGE", default_value = "0")]
    pub consumer_usage: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            format: HalPixelFormat::Ycbcr420888,
            min_buffers: 2,
            max_buffers: 0,
            capacity: 16,
            consumer_usage: 0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "invalid stream size {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::InvalidConfiguration(format!(
                "stream size {}x{} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}",
                self.width, self.height
            )));
        }
        HalFormat::new(self.width, self.height, self.format)?;
        if self.capacity == 0 || self.capacity > MAX_FRAME {
            return Err(Error::InvalidConfiguration(format!(
                "pool capacity {} outside 1..={MAX_FRAME}",
                self.capacity
            )));
        }
        Ok(())
    }

    pub fn descriptor(&self, id: StreamId) -> StreamDescriptor {
        StreamDescriptor::new(
            id,
            self.width,
            self.height,
            self.format,
            ConsumerUsage(self.consumer_usage),
        )
    }
}

/// Capture request scheduler options.
#[derive(Args, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds to wait on a stream's pending queue before moving on
    #[arg(long, env = "PENDING_TIMEOUT", default_value = "66")]
    pub pending_timeout_ms: u64,

    /// Template used for the default request settings
    #[arg(long, env = "REQUEST_TEMPLATE", default_value = "preview", value_enum)]
    pub template: RequestTemplate,

    /// Return buffers of a request abandoned at stop to their pending queues
    #[arg(
        long,
        env = "RETURN_ABANDONED",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub return_abandoned: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
            template: RequestTemplate::Preview,
            return_abandoned: true,
        }
    }
}

impl SchedulerConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }
}

/// A camera session as described in JSON.
///
/// ```json
/// {
///   "camera_id": 0,
///   "scheduler": { "pending_timeout_ms": 33 },
///   "streams": [ { "width": 1280, "height": 720, "format": "ycbcr420888" } ]
/// }
/// ```
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CameraConfig {
    pub camera_id: u32,
    pub scheduler: SchedulerConfig,
    pub streams: Vec<StreamConfig>,
}

impl CameraConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CameraConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(Error::NoStreams);
        }
        self.streams.iter().try_for_each(StreamConfig::validate)
    }
}
