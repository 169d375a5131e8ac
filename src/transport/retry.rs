//! Uniform retry policy wrapping any [`Transport`] (spec.md §4.5): up to
//! four attempts per operation, classifying repeated failures into the
//! distinguishable outcomes callers above this layer rely on.

use std::time::Duration;

use log::{debug, warn};

use crate::error::CoreError;
use crate::path::IoPath;

use super::{NonTableReply, Transport};

const MAX_ATTEMPTS: u32 = 4;
const INTER_ATTEMPT_DELAY: Duration = Duration::from_millis(200);

/// Wraps a `Transport` so every operation is retried on null responses and
/// transient I/O failures, and so that a string of identical failures is
/// turned into one of [`CoreError::AllResponsesNull`] or
/// [`CoreError::Retries`] rather than surfacing the last raw error alone.
pub struct RetryingTransport<T: Transport> {
    inner: T,
    max_attempts: u32,
    never_use_null_as_unsupported: bool,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T) -> Self {
        RetryingTransport {
            inner,
            max_attempts: MAX_ATTEMPTS,
            never_use_null_as_unsupported: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// When set, a null response is never treated as an "unsupported
    /// feature" indication (spec.md §6 `never_use_null_as_unsupported`);
    /// it is retried like any other transient failure instead.
    pub fn never_use_null_as_unsupported(mut self, value: bool) -> Self {
        self.never_use_null_as_unsupported = value;
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn run<R>(&mut self, op_name: &str, mut attempt: impl FnMut(&mut T) -> Result<R, CoreError>) -> Result<R, CoreError> {
        let io_path = self.inner.io_path();
        let mut null_count = 0u32;
        let mut last_err: Option<CoreError> = None;

        for attempt_no in 1..=self.max_attempts {
            match attempt(&mut self.inner) {
                Ok(value) => return Ok(value),
                Err(CoreError::NullResponse(p)) if !self.never_use_null_as_unsupported => {
                    null_count += 1;
                    last_err = Some(CoreError::NullResponse(p));
                    debug!("{op_name} on {io_path}: null response, attempt {attempt_no}/{}", self.max_attempts);
                }
                Err(CoreError::ReportedUnsupported(p)) => {
                    return Err(CoreError::ReportedUnsupported(p));
                }
                Err(err) => {
                    warn!("{op_name} on {io_path}: attempt {attempt_no}/{} failed: {err}", self.max_attempts);
                    last_err = Some(err);
                }
            }
            if attempt_no < self.max_attempts {
                std::thread::sleep(INTER_ATTEMPT_DELAY);
            }
        }

        if null_count == self.max_attempts {
            return Err(CoreError::AllResponsesNull(io_path));
        }
        match last_err {
            Some(_) => Err(CoreError::Retries(io_path)),
            None => Err(CoreError::Internal(format!(
                "retry loop for {op_name} on {io_path} exited without a result"
            ))),
        }
    }
}

impl<T: Transport> Transport for RetryingTransport<T> {
    fn io_path(&self) -> IoPath {
        self.inner.io_path()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        self.run("write", |t| t.write(bytes))
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, CoreError> {
        self.run("read", |t| t.read(max_len))
    }

    fn get_vcp_nontable(&mut self, code: u8) -> Result<NonTableReply, CoreError> {
        self.run("get_vcp_nontable", |t| t.get_vcp_nontable(code))
    }

    fn set_vcp_nontable(&mut self, code: u8, value: u16) -> Result<(), CoreError> {
        self.run("set_vcp_nontable", |t| t.set_vcp_nontable(code, value))
    }

    fn get_capabilities_fragment(&mut self, offset: u16) -> Result<Vec<u8>, CoreError> {
        self.run("get_capabilities_fragment", |t| t.get_capabilities_fragment(offset))
    }

    fn save_current_settings(&mut self) -> Result<(), CoreError> {
        self.run("save_current_settings", |t| t.save_current_settings())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    struct FlakyTransport {
        io_path: IoPath,
        remaining_failures: RefCell<u32>,
    }

    impl Transport for FlakyTransport {
        fn io_path(&self) -> IoPath {
            self.io_path
        }
        fn write(&mut self, _bytes: &[u8]) -> Result<(), CoreError> {
            Ok(())
        }
        fn read(&mut self, _max_len: usize) -> Result<Vec<u8>, CoreError> {
            Ok(Vec::new())
        }
        fn get_vcp_nontable(&mut self, _code: u8) -> Result<NonTableReply, CoreError> {
            let mut remaining = self.remaining_failures.borrow_mut();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CoreError::NullResponse(self.io_path));
            }
            Ok(NonTableReply { type_code: 0, max: 100, current: 50 })
        }
        fn set_vcp_nontable(&mut self, _code: u8, _value: u16) -> Result<(), CoreError> {
            Ok(())
        }
        fn get_capabilities_fragment(&mut self, _offset: u16) -> Result<Vec<u8>, CoreError> {
            Ok(Vec::new())
        }
        fn save_current_settings(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[test]
    fn recovers_after_transient_null_responses() {
        let io_path = IoPath::I2c { bus_number: 3 };
        let flaky = FlakyTransport { io_path, remaining_failures: RefCell::new(2) };
        let mut retrying = RetryingTransport::new(flaky).with_max_attempts(4);
        let reply = retrying.get_vcp_nontable(0x10).expect("should recover within budget");
        assert_eq!(reply.current, 50);
    }

    #[test]
    fn all_null_responses_become_all_responses_null() {
        let io_path = IoPath::I2c { bus_number: 4 };
        let flaky = FlakyTransport { io_path, remaining_failures: RefCell::new(10) };
        let mut retrying = RetryingTransport::new(flaky).with_max_attempts(4);
        match retrying.get_vcp_nontable(0x10) {
            Err(CoreError::AllResponsesNull(p)) => assert_eq!(p, io_path),
            other => panic!("expected AllResponsesNull, got {other:?}"),
        }
    }
}
