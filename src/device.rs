// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture device contract.
//!
//! The camera device itself lives outside this crate. [`Device`] is what a
//! driver binding implements; the rest of the crate only talks to it through
//! [`SharedDevice`], which serializes every call behind one lock because the
//! device surface is not thread-safe.

use crate::{
    stream::{StreamBuffer, StreamDescriptor},
    Result,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{debug, warn};

/// Non-zero status code returned by a device call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("device status {0}")]
pub struct DeviceStatus(pub i32);

impl DeviceStatus {
    /// Converts a raw status code, where zero means success.
    pub fn check(status: i32) -> Result<(), DeviceStatus> {
        match status {
            0 => Ok(()),
            s => Err(DeviceStatus(s)),
        }
    }
}

/// Template used to build the default request settings.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, clap::ValueEnum, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestTemplate {
    #[default]
    Preview = 1,
    StillCapture = 2,
    VideoRecord = 3,
    VideoSnapshot = 4,
    ZeroShutterLag = 5,
    Manual = 6,
}

impl fmt::Display for RequestTemplate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque per-template request settings owned by the device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestSettings {
    pub template: RequestTemplate,
    pub data: Vec<u8>,
}

/// One multiplexed capture request.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub frame_number: u32,
    pub settings: Arc<RequestSettings>,
    pub output_buffers: Vec<StreamBuffer>,
}

/// Result delivered by the device on its own thread.
///
/// An empty `output_buffers` is a metadata-only result.
#[derive(Clone, Debug, Default)]
pub struct CaptureResult {
    pub frame_number: u32,
    pub output_buffers: Vec<StreamBuffer>,
}

/// Receives completions from the device callback thread.
pub trait CompletionSink: Send + Sync {
    fn process_capture_result(&self, result: &CaptureResult) -> Result<()>;
}

/// HAL3-style camera device.
pub trait Device: Send {
    /// Registers the completion callback. Called once after open.
    fn initialize(&mut self, sink: Arc<dyn CompletionSink>) -> Result<(), DeviceStatus>;

    /// Configures the output streams. The device fills in `max_buffers`.
    fn configure_streams(&mut self, streams: &mut [StreamDescriptor]) -> Result<(), DeviceStatus>;

    fn construct_default_request_settings(
        &mut self,
        template: RequestTemplate,
    ) -> Option<RequestSettings>;

    /// Synchronous submission; an error means the request was not accepted.
    fn process_capture_request(&mut self, request: &CaptureRequest) -> Result<(), DeviceStatus>;

    /// Blocks until every accepted request has been completed.
    fn flush(&mut self) -> Result<(), DeviceStatus>;

    fn close(&mut self) -> Result<(), DeviceStatus>;
}

/// Serialized access to the device as used by the scheduler and teardown.
pub trait RequestSubmitter: Send + Sync {
    fn configure(&self, streams: &mut [StreamDescriptor]) -> Result<(), DeviceStatus>;
    fn default_settings(&self, template: RequestTemplate) -> Option<RequestSettings>;
    fn submit(&self, request: &CaptureRequest) -> Result<(), DeviceStatus>;
    fn flush(&self) -> Result<(), DeviceStatus>;
    fn close(&self) -> Result<(), DeviceStatus>;
}

/// A [`Device`] behind the device-access lock.
pub struct SharedDevice {
    device: Mutex<Box<dyn Device>>,
}

impl SharedDevice {
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            device: Mutex::new(device),
        }
    }

    pub fn initialize(&self, sink: Arc<dyn CompletionSink>) -> Result<(), DeviceStatus> {
        self.device.lock().initialize(sink)
    }
}

impl fmt::Debug for SharedDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedDevice").finish_non_exhaustive()
    }
}

impl RequestSubmitter for SharedDevice {
    fn configure(&self, streams: &mut [StreamDescriptor]) -> Result<(), DeviceStatus> {
        debug!(count = streams.len(), "configuring streams");
        self.device.lock().configure_streams(streams)
    }

    fn default_settings(&self, template: RequestTemplate) -> Option<RequestSettings> {
        self.device
            .lock()
            .construct_default_request_settings(template)
    }

    fn submit(&self, request: &CaptureRequest) -> Result<(), DeviceStatus> {
        self.device.lock().process_capture_request(request)
    }

    fn flush(&self) -> Result<(), DeviceStatus> {
        let res = self.device.lock().flush();
        if let Err(e) = &res {
            warn!("device flush failed: {e}");
        }
        res
    }

    fn close(&self) -> Result<(), DeviceStatus> {
        let res = self.device.lock().close();
        if let Err(e) = &res {
            warn!("device close failed: {e}");
        }
        res
    }
}
