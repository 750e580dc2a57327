//! I/O driver abstraction (spec §9: "conditional compilation (WITH_LWIP,
//! WITH_CONTIKI, EPOLL) is replaced by an I/O-driver abstraction with two
//! concrete drivers: a POSIX readiness driver and an external/embedded-timer
//! driver. The codec and state machines are driver-agnostic.").

use std::io;
use std::time::Duration;

use crate::net::Socket;

/// The readiness source [`crate::scheduler::Context::process`] blocks on
/// between I/O passes (spec §4.J `prepare_io` / wait / `do_io`).
pub trait IoDriver<S: Socket> {
  /// Bound the next blocking wait on `socket`. `None` blocks
  /// indefinitely (`COAP_IO_WAIT`); `Some(Duration::ZERO)` never blocks
  /// (`COAP_IO_NO_WAIT`).
  fn wait(&mut self, socket: &S, timeout: Option<Duration>) -> io::Result<()>;
}

/// Blocks on the socket's own read timeout — the driver for a regular
/// POSIX/std environment (spec §9 "POSIX readiness driver").
#[derive(Debug, Default)]
pub struct PosixDriver;

impl<S: Socket> IoDriver<S> for PosixDriver {
  fn wait(&mut self, socket: &S, timeout: Option<Duration>) -> io::Result<()> {
    socket.set_read_timeout(timeout)
  }
}

/// No independent readiness source: every `process` call drains whatever
/// is already queued and returns immediately, relying on the integrator's
/// own scheduler tick to call `process` again (spec §9
/// "external/embedded-timer driver").
#[derive(Debug, Default)]
pub struct ExternalTimerDriver;

impl<S: Socket> IoDriver<S> for ExternalTimerDriver {
  fn wait(&mut self, socket: &S, _timeout: Option<Duration>) -> io::Result<()> {
    // A zero `Duration` is rejected by `set_read_timeout` on most
    // platforms, so the shortest representable wait stands in for
    // "don't block".
    socket.set_read_timeout(Some(Duration::from_nanos(1)))
  }
}
