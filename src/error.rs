/// Failures surfaced by the depth-ordering passes.
///
/// None of these are transient: a length mismatch means the caller handed in a
/// corrupted splat set, and device failures mean the GPU path is unusable for
/// the session.
#[derive(Debug, thiserror::Error)]
pub enum SortError {
    #[error("{what} has {actual} entries but the splat set declares {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("kernel '{kernel}' has no source code")]
    MissingKernelSource { kernel: &'static str },
    #[error("{count} splats do not fit into 32-bit device indices")]
    TooManySplats { count: usize },
    #[error("no Metal device found")]
    NoDevice,
    #[error("{0} backend is not available in this build")]
    BackendUnavailable(&'static str),
    #[error("command timeout at {stage} after {timeout_ms}ms")]
    Timeout {
        stage: &'static str,
        timeout_ms: u64,
    },
    #[error("command buffer failed at {stage}")]
    CommandBufferFailed { stage: &'static str },
    #[error("{0}")]
    Device(String),
}

pub type SortResult<T> = Result<T, SortError>;

impl SortError {
    pub fn length_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::LengthMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Device-side failures after which the GPU path should not be retried.
    pub fn is_device_fault(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CommandBufferFailed { .. })
    }
}

impl From<std::num::TryFromIntError> for SortError {
    fn from(err: std::num::TryFromIntError) -> Self {
        Self::Device(err.to_string())
    }
}

/// Fails with [`SortError::LengthMismatch`] unless `actual == expected`.
pub fn ensure_len(what: &'static str, expected: usize, actual: usize) -> SortResult<()> {
    if expected != actual {
        return Err(SortError::length_mismatch(what, expected, actual));
    }
    Ok(())
}
