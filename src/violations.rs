use alloc::vec::Vec;

use crate::errors::{TarError, TarErrorKind};

/// Decides whether processing continues after a recoverable violation.
pub trait ViolationHandler {
  /// When a violation occurs, this method is called.
  /// It should return `true` if processing should continue,
  /// or `false` if it should stop.
  ///
  /// Processing may stop even if the handler returns `true`,
  /// since some errors are unrecoverable.
  #[must_use]
  fn handle(&mut self, error: &TarError) -> bool;
}

/// Every warning becomes fatal.
#[derive(Debug, Default)]
pub struct StrictViolationHandler;

impl ViolationHandler for StrictViolationHandler {
  fn handle(&mut self, _error: &TarError) -> bool {
    false
  }
}

/// Collects every violation for later inspection and continues.
#[derive(Debug, Default)]
pub struct AuditViolationHandler {
  pub violations: Vec<TarError>,
}

impl AuditViolationHandler {
  #[must_use]
  pub fn new() -> Self {
    Self {
      violations: Vec::new(),
    }
  }
}

impl ViolationHandler for AuditViolationHandler {
  fn handle(&mut self, error: &TarError) -> bool {
    self.violations.push(error.clone());
    true
  }
}

/// Logs violations and continues.
#[derive(Debug, Default)]
pub struct IgnoreViolationHandler;

impl ViolationHandler for IgnoreViolationHandler {
  fn handle(&mut self, error: &TarError) -> bool {
    log::warn!("{error}");
    true
  }
}

/// Routes recoverable errors through a [`ViolationHandler`], escalating
/// them to fatal when the handler refuses to continue.
pub(crate) struct Reported<'a, VH: ViolationHandler>(pub &'a mut VH);

impl<VH: ViolationHandler> Reported<'_, VH> {
  /// Reports a violation; `Err` means the handler demanded a stop.
  pub fn report<EK: Into<TarErrorKind>>(&mut self, kind: EK) -> Result<(), TarError> {
    let error = TarError::recoverable(kind);
    if self.0.handle(&error) {
      Ok(())
    } else {
      Err(error.escalate())
    }
  }

}
