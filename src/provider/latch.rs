use crate::error::CaptureError;

/// One-way record of the first initialization failure.
///
/// Owned per provider instance. Nothing resets it short of dropping the provider.
#[derive(Debug, Default)]
pub(crate) struct ErrorLatch {
    latched: Option<CaptureError>,
}

impl ErrorLatch {
    /// Err with the stored error once latched.
    pub(crate) fn check(&self) -> Result<(), CaptureError> {
        match &self.latched {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Store `err` unless an earlier error is already held.
    pub(crate) fn latch(&mut self, err: &CaptureError) {
        if self.latched.is_none() {
            self.latched = Some(err.clone());
        }
    }
}
