//! Per-connection protocol state machine.
//!
//! Each connection buffers raw bytes in both directions and advertises
//! its intent to the event loop through three flags: `want_read`,
//! `want_write`, and `want_close`. Readiness events drive the machine:
//!
//! - readable: drain the socket into `incoming`, then parse and execute
//!   every complete request it holds (pipelining), marshaling responses
//!   into `outgoing` in request order. If anything was produced, flip to
//!   writing and optimistically attempt one write — in a
//!   request-response workload the socket is almost always immediately
//!   writable, and this saves an event-loop round-trip.
//! - writable: drain `outgoing`; on completion flip back to reading (or
//!   close, if an oversize response was the last thing queued).
//!
//! The state machine owns no timers itself: the event loop re-arms the
//! idle timer on every readiness event and stores the deadline here.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::{Buf, BytesMut};
use cinder_core::time::NO_EXPIRY;
use cinder_core::{Keyspace, WorkerPool};
use cinder_protocol::{Command, ErrorCode, Request, Response};
use tracing::{debug, warn};

use crate::executor;
use crate::timers::TimerManager;

/// Stack buffer for one non-blocking read. Large enough to absorb a
/// burst of pipelined requests in a single syscall.
const READ_CHUNK: usize = 64 * 1024;

/// A client connection and its protocol state.
pub struct Conn {
    socket: TcpStream,
    /// Intents consumed by the event loop when building the poll set.
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,
    incoming: BytesMut,
    outgoing: BytesMut,
    /// Close once `outgoing` drains (set after an oversize response).
    close_after_flush: bool,
    /// Current idle deadline; the handle into the timer manager.
    pub idle_deadline_ms: u64,
}

impl Conn {
    /// Wraps an accepted, already non-blocking socket.
    pub fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            want_read: true,
            want_write: false,
            want_close: false,
            incoming: BytesMut::new(),
            outgoing: BytesMut::new(),
            close_after_flush: false,
            idle_deadline_ms: NO_EXPIRY,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    /// Drives the readable side: one non-blocking read, then the
    /// parse-execute loop over everything buffered.
    pub fn handle_read(
        &mut self,
        ks: &mut Keyspace,
        timers: &mut TimerManager,
        pool: &WorkerPool,
    ) {
        let mut buf = [0u8; READ_CHUNK];
        match self.socket.read(&mut buf) {
            Ok(0) => {
                if self.incoming.is_empty() {
                    debug!(fd = self.fd(), "peer closed connection");
                } else {
                    warn!(fd = self.fd(), "peer closed connection mid-request");
                }
                self.want_close = true;
                return;
            }
            Ok(n) => self.incoming.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(fd = self.fd(), "read failed: {e}");
                self.want_close = true;
                return;
            }
        }

        self.process_incoming(ks, timers, pool);

        if !self.outgoing.is_empty() {
            self.want_read = false;
            self.want_write = true;
            self.handle_write();
        }
    }

    /// Parses and executes every complete request in `incoming`.
    fn process_incoming(
        &mut self,
        ks: &mut Keyspace,
        timers: &mut TimerManager,
        pool: &WorkerPool,
    ) {
        loop {
            let (request, consumed) = match Request::unmarshal(&self.incoming) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(e) => {
                    // framing can no longer be trusted: close without a
                    // response
                    warn!(fd = self.fd(), "dropping connection: {e}");
                    self.want_close = true;
                    return;
                }
            };
            self.incoming.advance(consumed);

            let response = match Command::from_request(&request) {
                Ok(cmd) => executor::execute(cmd, ks, timers, pool),
                Err(err) => err.into(),
            };

            if response.marshal(&mut self.outgoing).is_err() {
                warn!(fd = self.fd(), "response exceeds the size limit");
                let err = Response::Err(ErrorCode::TooBig, "response is too big".into());
                // the error response itself always fits
                let _ = err.marshal(&mut self.outgoing);
                self.close_after_flush = true;
                return;
            }
        }
    }

    /// Drives the writable side: one non-blocking write of `outgoing`.
    pub fn handle_write(&mut self) {
        match self.socket.write(&self.outgoing) {
            Ok(0) => {
                self.want_close = true;
            }
            Ok(n) => {
                self.outgoing.advance(n);
                if self.outgoing.is_empty() {
                    if self.close_after_flush {
                        self.want_close = true;
                    } else {
                        self.want_write = false;
                        self.want_read = true;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!(fd = self.fd(), "write failed: {e}");
                self.want_close = true;
            }
        }
    }
}
