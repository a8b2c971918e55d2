// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera capture session.
//!
//! A [`CaptureSession`] ties one device to the pools of its streams, the
//! completion dispatcher and the scheduler thread.
//!
//! ```no_run
//! use edgefirst_hal3::{
//!     config::CameraConfig, device::Device, memory::DmaHeapAllocator, session::CaptureSession,
//! };
//! use std::sync::Arc;
//!
//! # fn run(device: Box<dyn Device>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = CameraConfig::from_json_file("camera.json")?;
//! let heap = Arc::new(DmaHeapAllocator::new()?);
//! let mut session = CaptureSession::from_config(device, &config, heap)?;
//! session.start()?;
//!
//! let pool = session.pools()[0].clone();
//! for _ in 0..30 {
//!     let buffer = pool.acquire()?;
//!     println!("frame {} at {:?}", buffer.device_frame(), buffer.timestamp());
//!     pool.release(buffer)?;
//! }
//!
//! session.stop()?;
//! # Ok(())
//! # }
//! ```

use crate::{
    allocator::{AllocatorFormat, BufferAllocator},
    config::{CameraConfig, SchedulerConfig, StreamConfig},
    device::{Device, RequestSubmitter, SharedDevice},
    dispatcher::ResultDispatcher,
    format::{ConsumerUsage, ProducerUsage},
    memory::NativeAllocator,
    pool::BufferPool,
    scheduler::CaptureScheduler,
    stream::{StreamDescriptor, StreamId},
    Error, Result,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct SessionStream {
    config: StreamConfig,
    pool: Arc<BufferPool>,
}

pub struct CaptureSession {
    device: Arc<SharedDevice>,
    dispatcher: Arc<ResultDispatcher>,
    streams: Vec<SessionStream>,
    scheduler: Option<CaptureScheduler>,
    config: SchedulerConfig,
    closed: bool,
}

impl CaptureSession {
    /// Wraps the device and registers the dispatcher as its completion sink.
    pub fn open(device: Box<dyn Device>, config: SchedulerConfig) -> Result<Self> {
        let device = Arc::new(SharedDevice::new(device));
        let dispatcher = Arc::new(ResultDispatcher::new());
        device.initialize(dispatcher.clone())?;
        debug!("camera device opened");

        Ok(Self {
            device,
            dispatcher,
            streams: Vec::new(),
            scheduler: None,
            config,
            closed: false,
        })
    }

    /// Opens a session with every stream of `config`.
    pub fn from_config(
        device: Box<dyn Device>,
        config: &CameraConfig,
        native: Arc<dyn NativeAllocator>,
    ) -> Result<Self> {
        config.validate()?;
        let mut session = Self::open(device, config.scheduler.clone())?;
        for stream in &config.streams {
            session.add_stream(stream, native.clone())?;
        }
        Ok(session)
    }

    /// Creates the pool of a new output stream.
    pub fn add_stream(
        &mut self,
        config: &StreamConfig,
        native: Arc<dyn NativeAllocator>,
    ) -> Result<Arc<BufferPool>> {
        if self.closed || self.scheduler.is_some() {
            return Err(Error::InvalidState("streams must be added before start"));
        }
        config.validate()?;

        let id = StreamId(self.streams.len() as u32);
        let descriptor = config.descriptor(id);
        let allocator = BufferAllocator::new(
            native,
            AllocatorFormat {
                stream: id,
                width: config.width,
                height: config.height,
                pixel_format: config.format,
                producer: ProducerUsage::CAMERA,
                consumer: ConsumerUsage(config.consumer_usage),
            },
        );
        let pool = Arc::new(BufferPool::new(descriptor, allocator, config.capacity)?);
        self.dispatcher.register(pool.clone());
        info!("added {}", pool.stream());

        self.streams.push(SessionStream {
            config: config.clone(),
            pool: pool.clone(),
        });
        Ok(pool)
    }

    pub fn pools(&self) -> Vec<Arc<BufferPool>> {
        self.streams.iter().map(|s| s.pool.clone()).collect()
    }

    pub fn pool(&self, id: StreamId) -> Option<Arc<BufferPool>> {
        self.streams
            .iter()
            .find(|s| s.pool.id() == id)
            .map(|s| s.pool.clone())
    }

    pub fn dispatcher(&self) -> &Arc<ResultDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> Option<&CaptureScheduler> {
        self.scheduler.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Configures the streams, fills every pool and starts submitting
    /// requests.
    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("session is closed"));
        }
        if self.scheduler.is_some() {
            return Err(Error::InvalidState("session already started"));
        }
        if self.streams.is_empty() {
            return Err(Error::NoStreams);
        }

        let mut descriptors: Vec<StreamDescriptor> =
            self.streams.iter().map(|s| s.pool.stream().clone()).collect();
        self.device
            .configure(&mut descriptors)
            .map_err(Error::ConfigureFailed)?;

        for (stream, descriptor) in self.streams.iter().zip(&descriptors) {
            let max_buffers = match stream.config.max_buffers {
                0 => descriptor.max_buffers as usize,
                n => n,
            };
            stream.pool.start(stream.config.min_buffers, max_buffers)?;
            stream.pool.flush_stop()?;
            let primed = stream.pool.prime()?;
            debug!("{} primed with {primed} buffers", descriptor.id);
        }

        let pools = self.pools();
        let submitter: Arc<dyn RequestSubmitter> = self.device.clone();
        self.scheduler = Some(CaptureScheduler::spawn(
            pools,
            submitter,
            self.config.clone(),
        )?);
        info!(streams = self.streams.len(), "capture session started");
        Ok(())
    }

    /// Stops the scheduler, drains the device, stops the pools and closes
    /// the device.
    ///
    /// Device flush and close failures are logged and do not interrupt the
    /// teardown.
    pub fn stop(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(mut scheduler) = self.scheduler.take() {
            result = scheduler.stop();
        }

        if self.device.flush().is_err() {
            warn!("continuing teardown after failed flush");
        }

        for stream in &self.streams {
            if let Err(e) = stream.pool.stop() {
                warn!("failed to stop pool of {}: {e}", stream.pool.id());
            }
        }

        if self.device.close().is_err() {
            warn!("device close failed");
        }
        self.dispatcher.clear();
        self.closed = true;
        info!("capture session stopped");
        result
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("capture session teardown: {e}");
        }
    }
}
