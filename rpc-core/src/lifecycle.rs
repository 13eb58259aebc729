// Copyright 2024. The Tari Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Lifecycle contract shared by every transport, inbound, outbound and peer (spec §6), plus
//! the `Once` primitive the dispatcher uses to make Start/Stop single-shot and ordered (spec §5).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::Error;

/// `Start`/`Stop`/`IsRunning` are idempotent and may be called from any task (spec §6).
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self) -> Result<(), Error>;
    async fn stop(&self) -> Result<(), Error>;
    fn is_running(&self) -> bool;
}

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;
const STOPPED: u8 = 4;

/// A single-shot, ordered Start/Stop gate.
///
/// A call to `stop()` before `start()` is a no-op; a call after `start()` joins the
/// in-progress shutdown if one is already underway (spec §5).
pub struct Once {
    state: AtomicU8,
    started: Notify,
    stopped: Notify,
}

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}

impl Once {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            started: Notify::new(),
            stopped: Notify::new(),
        }
    }

    /// Runs `body` exactly once across all callers. Concurrent callers after the first
    /// await the first caller's result.
    pub async fn start<F, Fut>(&self, body: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), Error>>,
    {
        match self
            .state
            .compare_exchange(IDLE, STARTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                let result = body().await;
                self.state.store(RUNNING, Ordering::SeqCst);
                self.started.notify_waiters();
                result
            },
            Err(_) => {
                if self.state.load(Ordering::SeqCst) == STARTING {
                    self.started.notified().await;
                }
                Ok(())
            },
        }
    }

    /// Runs `body` exactly once. A stop requested before any start is a documented no-op
    /// (spec §5); a stop requested while another stop is in flight joins it.
    pub async fn stop<F, Fut>(&self, body: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), Error>>,
    {
        loop {
            match self.state.load(Ordering::SeqCst) {
                IDLE => return Ok(()),
                STARTING => {
                    self.started.notified().await;
                    continue;
                },
                RUNNING => {
                    match self
                        .state
                        .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
                    {
                        Ok(_) => {
                            let result = body().await;
                            self.state.store(STOPPED, Ordering::SeqCst);
                            self.stopped.notify_waiters();
                            return result;
                        },
                        Err(_) => continue,
                    }
                },
                STOPPING => {
                    self.stopped.notified().await;
                    return Ok(());
                },
                STOPPED => return Ok(()),
                _ => unreachable!("Once state machine is closed"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }
}

/// A convenience for composing several lifecycle objects (e.g. a dispatcher's inbounds,
/// outbounds, and peer transports) that must all start/stop together.
pub async fn start_all(items: &[Arc<dyn Lifecycle>]) -> Result<(), Error> {
    for item in items {
        item.start().await?;
    }
    Ok(())
}

pub async fn stop_all(items: &[Arc<dyn Lifecycle>]) -> Result<(), Error> {
    for item in items.iter().rev() {
        item.stop().await?;
    }
    Ok(())
}
