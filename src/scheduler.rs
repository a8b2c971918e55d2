// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture request scheduling thread.
//!
//! The scheduler multiplexes every stream onto the device's single
//! submission call. Each cycle it walks the streams round-robin, waiting a
//! bounded time on each pending queue, until every stream contributed one
//! buffer. The buffers are recorded in their inflight queues and the
//! request is submitted under the device lock. On rejection the entries are
//! taken back, the buffers return to pending and the cycle starts over
//! without consuming a frame number.
//!
//! A stream that never supplies a buffer stalls the cycle. The timeout only
//! keeps the other streams' pending queues from being starved while the
//! scheduler waits.

use crate::{
    config::SchedulerConfig,
    device::{CaptureRequest, RequestSettings, RequestSubmitter},
    pool::BufferPool,
    stream::StreamBuffer,
    Error, Result,
};
use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, trace, warn};

/// Messages accepted by the scheduler thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    Stop,
}

#[derive(Default)]
struct Counters {
    next_frame: AtomicU32,
    submitted: AtomicU64,
    rejected: AtomicU64,
}

/// Handle to the running scheduler thread.
pub struct CaptureScheduler {
    control: kanal::Sender<ControlMessage>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl CaptureScheduler {
    /// Builds the request settings and starts the scheduler thread.
    pub fn spawn(
        pools: Vec<Arc<BufferPool>>,
        submitter: Arc<dyn RequestSubmitter>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if pools.is_empty() {
            return Err(Error::NoStreams);
        }

        let settings = submitter
            .default_settings(config.template)
            .ok_or(Error::NoRequestSettings)?;
        debug!(template = %config.template, "request settings constructed");

        let (control, messages) = kanal::unbounded();
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            pools,
            submitter,
            settings: Arc::new(settings),
            timeout: config.pending_timeout(),
            return_abandoned: config.return_abandoned,
            messages,
            counters: counters.clone(),
        };

        let handle = thread::Builder::new()
            .name("capture-request".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            control,
            handle: Some(handle),
            counters,
        })
    }

    /// Frame number the next accepted request will carry. Equals the number
    /// of requests the device accepted.
    pub fn next_frame(&self) -> u32 {
        self.counters.next_frame.load(Ordering::Acquire)
    }

    pub fn submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> u64 {
        self.counters.rejected.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Asks the thread to stop and waits for it.
    ///
    /// The thread notices the message between two pending-queue waits, so
    /// this returns within about one timeout.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if self.control.send(ControlMessage::Stop).is_err() {
            debug!("scheduler already exited");
        }
        handle.join().map_err(|_| Error::ThreadPanicked)?;
        info!(
            submitted = self.submitted(),
            rejected = self.rejected(),
            "capture request thread stopped"
        );
        Ok(())
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("failed to stop scheduler: {e}");
        }
    }
}

struct Worker {
    pools: Vec<Arc<BufferPool>>,
    submitter: Arc<dyn RequestSubmitter>,
    settings: Arc<RequestSettings>,
    timeout: Duration,
    return_abandoned: bool,
    messages: kanal::Receiver<ControlMessage>,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(self) {
        let streams = self.pools.len();
        let mut cursor = 0;
        let mut frame_number: u32 = 0;
        info!(streams, "capture request thread started");

        loop {
            let mut outputs: Vec<Option<StreamBuffer>> = vec![None; streams];
            let mut acquired = 0;

            while acquired < streams {
                if self.stop_requested() {
                    info!("stop message arrived in capture request thread");
                    self.abandon(outputs);
                    return;
                }

                if outputs[cursor].is_some() {
                    cursor = (cursor + 1) % streams;
                    continue;
                }

                if let Some(buffer) = self.pools[cursor].pop_pending_timeout(self.timeout) {
                    trace!(frame = frame_number, "{buffer} acquired for request");
                    outputs[cursor] = Some(buffer);
                    acquired += 1;
                }
                cursor = (cursor + 1) % streams;
            }

            let request = CaptureRequest {
                frame_number,
                settings: self.settings.clone(),
                output_buffers: outputs.iter().flatten().copied().collect(),
            };
            debug!(
                frame = frame_number,
                outputs = request.output_buffers.len(),
                "process_capture_request"
            );

            // Recorded first: the device may complete the request on its
            // callback thread before `submit` returns.
            for (pool, buffer) in self.pools.iter().zip(&outputs) {
                if let Some(buffer) = buffer {
                    pool.push_inflight(*buffer, frame_number);
                }
            }

            if let Err(status) = self.submitter.submit(&request) {
                error!(
                    frame = frame_number,
                    "{}",
                    Error::SubmissionRejected {
                        frame_number,
                        status: status.0,
                    }
                );
                self.counters.rejected.fetch_add(1, Ordering::AcqRel);
                for (pool, buffer) in self.pools.iter().zip(outputs) {
                    if buffer.is_some() {
                        if let Some(buffer) = pool.retract_inflight(frame_number) {
                            pool.push_pending(buffer);
                        }
                    }
                }
                continue;
            }

            frame_number = frame_number.wrapping_add(1);
            self.counters.next_frame.store(frame_number, Ordering::Release);
            self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn stop_requested(&self) -> bool {
        match self.messages.try_recv() {
            Ok(Some(ControlMessage::Stop)) => true,
            Ok(None) => false,
            // Handle dropped without a message.
            Err(_) => true,
        }
    }

    fn abandon(&self, outputs: Vec<Option<StreamBuffer>>) {
        for (pool, buffer) in self.pools.iter().zip(outputs) {
            let Some(buffer) = buffer else { continue };
            if self.return_abandoned {
                debug!("returning abandoned {buffer} to pending");
                pool.push_pending(buffer);
            } else {
                warn!("abandoned {buffer} dropped at stop");
            }
        }
    }
}
