//! Fault boundary for user callbacks.
//!
//! A panic inside a guarded future is caught and turned into
//! `ProtocolError::CallbackPanic`, so the task that awaited it keeps running.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Run `future` to completion, capturing any panic it raises.
pub async fn guard<F, T>(future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => {
            global_metrics().callback_panic();
            Err(ProtocolError::CallbackPanic(panic_message(payload.as_ref())))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        constants::ERR_UNKNOWN_PANIC.to_string()
    }
}
