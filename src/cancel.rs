//! Cooperative cancellation.
//!
//! A [`CancelToken`] is created once per invocation, flipped by the interrupt
//! handler, and handed by reference to every call that performs I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{RatifyError, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`RatifyError::Cancelled`] once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RatifyError::Cancelled);
        }
        Ok(())
    }
}
