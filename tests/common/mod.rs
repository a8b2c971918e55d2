// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Test doubles shared by the integration tests and benches.

#![allow(dead_code)]

use edgefirst_hal3::{
    allocator::{AllocatorFormat, BufferAllocator},
    device::{
        CaptureRequest, CaptureResult, CompletionSink, Device, DeviceStatus, RequestSettings,
        RequestTemplate,
    },
    format::{ConsumerUsage, HalFormat, HalPixelFormat, ProducerUsage},
    memory::{NativeAllocator, NativeBuffer},
    stream::{StreamDescriptor, StreamId},
    BufferPool, Error, Result,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Native allocator handing out unmapped handles.
#[derive(Default)]
pub struct FakeAllocator {
    next: AtomicU64,
    fail: AtomicUsize,
    live: AtomicUsize,
    allocs: AtomicUsize,
}

impl FakeAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(0x1000),
            ..Default::default()
        })
    }

    /// Makes the next `n` allocations fail.
    pub fn fail_next(&self, n: usize) {
        self.fail.store(n, Ordering::SeqCst);
    }

    /// Native buffers currently allocated.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Successful allocations so far.
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }
}

impl NativeAllocator for FakeAllocator {
    fn alloc(
        &self,
        width: u32,
        height: u32,
        format: HalPixelFormat,
        _producer: ProducerUsage,
        _consumer: ConsumerUsage,
    ) -> Result<NativeBuffer> {
        if self
            .fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::InvalidConfiguration("out of memory".to_string()));
        }
        let layout = HalFormat::new(width, height, format)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Ok(NativeBuffer {
            handle: self.next.fetch_add(0x10, Ordering::SeqCst),
            stride: layout.planes()[0].stride,
            size: layout.total_size() as usize,
            fd: None,
        })
    }

    fn free(&self, _buffer: NativeBuffer) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn allocator_format(stream: u32) -> AllocatorFormat {
    AllocatorFormat {
        stream: StreamId(stream),
        width: 640,
        height: 480,
        pixel_format: HalPixelFormat::Ycbcr420888,
        producer: ProducerUsage::CAMERA,
        consumer: ConsumerUsage::NONE,
    }
}

/// A started, streaming pool for `stream` backed by `native`.
pub fn streaming_pool(
    native: &Arc<FakeAllocator>,
    stream: u32,
    capacity: usize,
) -> Result<Arc<BufferPool>> {
    let allocator = BufferAllocator::new(native.clone(), allocator_format(stream));
    let descriptor = StreamDescriptor::new(
        StreamId(stream),
        640,
        480,
        HalPixelFormat::Ycbcr420888,
        ConsumerUsage::NONE,
    );
    let pool = Arc::new(BufferPool::new(descriptor, allocator, capacity)?);
    pool.start(2, capacity)?;
    pool.flush_stop()?;
    Ok(pool)
}

/// Polls `f` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    f()
}

/// State of a [`ScriptedDevice`], inspected and driven by the test.
#[derive(Default)]
pub struct Script {
    pub requests: Mutex<Vec<CaptureRequest>>,
    pub configured: Mutex<Vec<StreamDescriptor>>,
    sink: Mutex<Option<Arc<dyn CompletionSink>>>,
    reject: AtomicUsize,
    complete_on_submit: AtomicBool,
    /// Errors returned by the sink for completions delivered on submit.
    pub errors: Mutex<Vec<String>>,
    pub attempts: AtomicUsize,
    pub flushes: AtomicUsize,
    pub closes: AtomicUsize,
    pub max_buffers: AtomicUsize,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` submissions fail with status -22.
    pub fn reject_next(&self, n: usize) {
        self.reject.store(n, Ordering::SeqCst);
    }

    /// Completes every accepted request from another thread before the
    /// submit call returns.
    pub fn complete_on_submit(&self) {
        self.complete_on_submit.store(true, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn request(&self, index: usize) -> Option<CaptureRequest> {
        self.requests.lock().get(index).cloned()
    }

    /// Completes accepted request `index` with all its buffers.
    pub fn complete(&self, index: usize) -> Result<()> {
        let request = self
            .request(index)
            .ok_or(Error::InvalidState("no such request"))?;
        self.deliver(&CaptureResult {
            frame_number: request.frame_number,
            output_buffers: request.output_buffers,
        })
    }

    pub fn deliver(&self, result: &CaptureResult) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .clone()
            .ok_or(Error::InvalidState("device not initialized"))?;
        sink.process_capture_result(result)
    }
}

/// Device recording every request; completions are driven by the test.
pub struct ScriptedDevice {
    pub script: Arc<Script>,
}

impl ScriptedDevice {
    pub fn new(script: &Arc<Script>) -> Box<Self> {
        Box::new(Self {
            script: script.clone(),
        })
    }
}

impl Device for ScriptedDevice {
    fn initialize(&mut self, sink: Arc<dyn CompletionSink>) -> Result<(), DeviceStatus> {
        *self.script.sink.lock() = Some(sink);
        Ok(())
    }

    fn configure_streams(&mut self, streams: &mut [StreamDescriptor]) -> Result<(), DeviceStatus> {
        let max = self.script.max_buffers.load(Ordering::SeqCst) as u32;
        for s in streams.iter_mut() {
            s.max_buffers = max;
        }
        *self.script.configured.lock() = streams.to_vec();
        Ok(())
    }

    fn construct_default_request_settings(
        &mut self,
        template: RequestTemplate,
    ) -> Option<RequestSettings> {
        Some(RequestSettings {
            template,
            data: vec![template as u8],
        })
    }

    fn process_capture_request(&mut self, request: &CaptureRequest) -> Result<(), DeviceStatus> {
        self.script.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .script
            .reject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeviceStatus(-22));
        }
        self.script.requests.lock().push(request.clone());

        if self.script.complete_on_submit.load(Ordering::SeqCst) {
            let script = self.script.clone();
            let result = CaptureResult {
                frame_number: request.frame_number,
                output_buffers: request.output_buffers.clone(),
            };
            let callback = thread::spawn(move || script.deliver(&result));
            match callback.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.script.errors.lock().push(e.to_string()),
                Err(_) => return Err(DeviceStatus(-5)),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceStatus> {
        self.script.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceStatus> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct LoopbackCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
}

/// Device completing every request on its own callback thread.
pub struct LoopbackDevice {
    tx: Option<kanal::Sender<CaptureRequest>>,
    rx: kanal::Receiver<CaptureRequest>,
    thread: Option<JoinHandle<()>>,
    counters: Arc<LoopbackCounters>,
    delay: Duration,
}

impl LoopbackDevice {
    pub fn new(delay: Duration) -> Box<Self> {
        let (tx, rx) = kanal::unbounded();
        Box::new(Self {
            tx: Some(tx),
            rx,
            thread: None,
            counters: Arc::new(LoopbackCounters::default()),
            delay,
        })
    }
}

impl Device for LoopbackDevice {
    fn initialize(&mut self, sink: Arc<dyn CompletionSink>) -> Result<(), DeviceStatus> {
        let rx = self.rx.clone();
        let counters = self.counters.clone();
        let delay = self.delay;
        self.thread = Some(thread::spawn(move || {
            while let Ok(request) = rx.recv() {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let result = CaptureResult {
                    frame_number: request.frame_number,
                    output_buffers: request.output_buffers,
                };
                if let Err(e) = sink.process_capture_result(&result) {
                    tracing::warn!("loopback completion failed: {e}");
                }
                counters.completed.fetch_add(1, Ordering::SeqCst);
            }
        }));
        Ok(())
    }

    fn configure_streams(&mut self, streams: &mut [StreamDescriptor]) -> Result<(), DeviceStatus> {
        for s in streams.iter_mut() {
            s.max_buffers = 4;
        }
        Ok(())
    }

    fn construct_default_request_settings(
        &mut self,
        template: RequestTemplate,
    ) -> Option<RequestSettings> {
        Some(RequestSettings {
            template,
            data: Vec::new(),
        })
    }

    fn process_capture_request(&mut self, request: &CaptureRequest) -> Result<(), DeviceStatus> {
        let tx = self.tx.as_ref().ok_or(DeviceStatus(-19))?;
        tx.send(request.clone()).map_err(|_| DeviceStatus(-32))?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceStatus> {
        let submitted = self.counters.submitted.load(Ordering::SeqCst);
        let done = wait_for(Duration::from_secs(5), || {
            self.counters.completed.load(Ordering::SeqCst) >= submitted
        });
        if done {
            Ok(())
        } else {
            Err(DeviceStatus(-110))
        }
    }

    fn close(&mut self) -> Result<(), DeviceStatus> {
        self.tx = None;
        // Our receiver clone keeps the channel open; close it explicitly.
        let _ = self.rx.close();
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| DeviceStatus(-5))?;
        }
        Ok(())
    }
}
