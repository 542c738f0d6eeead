use std::thread;

use log::warn;

use crate::{config::RetryPolicy, error::ProcessError, processor::AbortSignal};

/// Result of one send attempt that reached the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Accepted(T),
    Rejected { status: u16 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Repeat `attempt` until the backend accepts.
///
/// Rejections sleep per `policy` and try again. Errors from `attempt` are
/// returned at once and never retried. The abort signal is checked before
/// every attempt.
pub fn retry_until_accepted<T, F>(
    policy: &RetryPolicy,
    abort: &AbortSignal,
    batch: u64,
    mut attempt: F,
) -> Result<Retried<T>, ProcessError>
where
    F: FnMut() -> Result<Attempt<T>, ProcessError>,
{
    let mut retries = 0u32;

    loop {
        if abort.is_raised() {
            return Err(ProcessError::Aborted);
        }

        match attempt()? {
            Attempt::Accepted(value) => return Ok(Retried { value, retries }),
            Attempt::Rejected { status } => {
                retries = retries.saturating_add(1);

                if let Some(max) = policy.max_attempts
                    && retries >= max
                {
                    return Err(ProcessError::RetriesExhausted {
                        batch,
                        attempts: retries,
                        status,
                    });
                }

                let delay = policy.delay_for(retries);
                warn!(
                    "batch {batch}: server returned HTTP status {status}. Retrying in {}ms",
                    delay.as_millis()
                );
                thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
