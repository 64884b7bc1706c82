use std::time::{Duration, Instant};

use metal::MTLCommandBufferStatus;

use crate::error::{SortError, SortResult};

pub fn commit_and_wait_with_timeout(
    command_buffer: &metal::CommandBufferRef,
    stage: &'static str,
    timeout: Duration,
) -> SortResult<()> {
    command_buffer.commit();
    let start = Instant::now();

    loop {
        match command_buffer.status() {
            MTLCommandBufferStatus::Completed => return Ok(()),
            MTLCommandBufferStatus::Error => {
                return Err(SortError::CommandBufferFailed { stage });
            }
            _ => {
                if start.elapsed() >= timeout {
                    return Err(SortError::Timeout {
                        stage,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(Duration::from_micros(200));
            }
        }
    }
}
