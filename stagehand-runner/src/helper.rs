// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared helper process.
//!
//! Declarative suites talk to a single long-lived helper process over a fixed port. The helper is
//! started when the first suite acquires it and stopped when the last suite releases it.

use crate::errors::HelperError;
use tracing::{debug, info, warn};

/// Starts and stops the helper process.
///
/// [`ProcessHelperLauncher`](crate::process::ProcessHelperLauncher) spawns a real process; tests
/// substitute their own implementation.
#[allow(async_fn_in_trait)]
pub trait HelperLauncher {
    /// A handle to a running helper.
    type Handle: std::fmt::Debug;

    /// Starts the helper.
    async fn start(&mut self) -> Result<Self::Handle, HelperError>;

    /// Stops the helper gracefully and waits for it to exit.
    async fn stop(&mut self, handle: Self::Handle) -> Result<(), HelperError>;
}

/// A reference-counted owner of the helper process.
///
/// The helper handle is present if and only if at least one lease is outstanding.
#[derive(Debug)]
pub struct SharedHelper<L: HelperLauncher> {
    launcher: L,
    ref_count: usize,
    handle: Option<L::Handle>,
}

impl<L: HelperLauncher> SharedHelper<L> {
    /// Creates a new shared helper. Nothing is started until the first [`acquire`](Self::acquire).
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            ref_count: 0,
            handle: None,
        }
    }

    /// Takes a lease on the helper, starting it if this is the first one.
    ///
    /// If starting fails, no lease is taken and the next call tries again.
    pub async fn acquire(&mut self) -> Result<(), HelperError> {
        if self.ref_count == 0 {
            info!("starting helper process");
            let handle = self.launcher.start().await?;
            self.handle = Some(handle);
        }
        self.ref_count += 1;
        debug!(ref_count = self.ref_count, "helper lease acquired");
        Ok(())
    }

    /// Returns a lease, stopping the helper if this was the last one.
    pub async fn release(&mut self) -> Result<(), HelperError> {
        match self.ref_count {
            0 => {
                warn!("helper released without an outstanding lease");
                Ok(())
            }
            1 => {
                self.ref_count = 0;
                match self.handle.take() {
                    Some(handle) => {
                        info!("stopping helper process");
                        self.launcher.stop(handle).await
                    }
                    None => Ok(()),
                }
            }
            _ => {
                self.ref_count -= 1;
                debug!(ref_count = self.ref_count, "helper lease released");
                Ok(())
            }
        }
    }

    /// Returns the number of outstanding leases.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Returns true if the helper is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the launcher.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}
