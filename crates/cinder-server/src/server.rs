//! Listener setup and the event loop.
//!
//! One thread does everything: a `poll` over the listener and every
//! live connection is the sole blocking point, with its timeout driven
//! by the timer manager so the loop wakes exactly when the next idle or
//! TTL deadline is due. Each tick rebuilds the pollfd array from the
//! connections' declared interests, dispatches readiness, then sweeps
//! the timers.
//!
//! A failure on one connection (accept, setup, I/O) is logged and
//! isolated to that connection; a failure of `poll` itself is fatal.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::os::fd::AsFd;
use std::os::unix::io::RawFd;

use cinder_core::time;
use cinder_core::{dispose_value, Keyspace, WorkerPool};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info};

use crate::conn::Conn;
use crate::timers::{TimerManager, NO_TIMERS};

/// The server engine: listener, connections, keyspace, timers, pool.
pub struct Server {
    listener: Socket,
    conns: HashMap<RawFd, Conn>,
    ks: Keyspace,
    timers: TimerManager,
    pool: WorkerPool,
}

impl Server {
    /// Binds the listening socket and assembles the engine.
    ///
    /// The listener is non-blocking with `SO_REUSEADDR` set and the
    /// system-maximum backlog; binding an IPv6 address disables
    /// `only_v6` for a dual-stack wildcard.
    pub fn bind(host: IpAddr, port: u16, workers: usize) -> io::Result<Server> {
        let addr = SocketAddr::new(host, port);
        let domain = Domain::for_address(addr);

        let listener = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        if domain == Domain::IPV6 {
            listener.set_only_v6(false)?;
        }
        listener.set_reuse_address(true)?;
        listener.bind(&addr.into())?;
        listener.listen(nix::libc::SOMAXCONN)?;
        listener.set_nonblocking(true)?;

        Ok(Server {
            listener,
            conns: HashMap::new(),
            ks: Keyspace::new(),
            timers: TimerManager::new(),
            pool: WorkerPool::new(workers),
        })
    }

    /// The address the listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "listener has no inet address")
        })
    }

    /// Runs the event loop forever. Only a `poll` failure returns.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.tick()?;
        }
    }

    /// One event-loop iteration: poll, accept, dispatch, sweep timers.
    fn tick(&mut self) -> io::Result<()> {
        let timeout = match self.timers.next_deadline_ms(time::now_ms()) {
            NO_TIMERS => PollTimeout::NONE,
            0 => PollTimeout::ZERO,
            ms => PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX),
        };

        // listener first, then each live connection with its interests
        let mut pollfds = Vec::with_capacity(1 + self.conns.len());
        let mut order = Vec::with_capacity(self.conns.len());
        pollfds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for (&fd, conn) in &self.conns {
            let mut events = PollFlags::empty();
            if conn.want_read {
                events |= PollFlags::POLLIN;
            }
            if conn.want_write {
                events |= PollFlags::POLLOUT;
            }
            pollfds.push(PollFd::new(conn.as_fd(), events));
            order.push(fd);
        }

        match poll(&mut pollfds, timeout) {
            Ok(_) => {}
            // interrupted by a signal: just take the next tick
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => return Err(io::Error::from(e)),
        }

        let listener_ready = revents(&pollfds[0]).contains(PollFlags::POLLIN);
        let ready: Vec<(RawFd, PollFlags)> = order
            .into_iter()
            .zip(pollfds[1..].iter().map(revents))
            .collect();
        drop(pollfds);

        if listener_ready {
            self.accept_one();
        }

        for (fd, events) in ready {
            if events.is_empty() {
                continue;
            }
            self.drive_conn(fd, events);
        }

        self.process_timers();
        Ok(())
    }

    /// Accepts a single connection; failures drop that attempt only.
    fn accept_one(&mut self) {
        let (socket, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                error!("failed to accept connection: {e}");
                return;
            }
        };

        if let Err(e) = socket.set_nonblocking(true) {
            error!("failed to set socket non-blocking: {e}");
            return;
        }

        let stream: TcpStream = socket.into();
        let mut conn = Conn::new(stream);
        let fd = conn.fd();
        conn.idle_deadline_ms = self.timers.arm_idle_now(fd);
        self.conns.insert(fd, conn);

        info!(fd, peer = ?peer.as_socket(), "new connection");
    }

    /// Dispatches one connection's readiness events.
    fn drive_conn(&mut self, fd: RawFd, events: PollFlags) {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return;
        };

        // any activity resets the idle clock
        conn.idle_deadline_ms = self.timers.arm_idle(fd, conn.idle_deadline_ms, time::now_ms());

        if events.contains(PollFlags::POLLIN) && conn.want_read {
            conn.handle_read(&mut self.ks, &mut self.timers, &self.pool);
        }
        if events.contains(PollFlags::POLLOUT) && conn.want_write {
            conn.handle_write();
        }

        let errored = events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP);
        if errored || conn.want_close {
            self.close_conn(fd);
        }
    }

    /// Closes a connection: cancel its idle timer, drop its slot (the
    /// socket closes with it).
    fn close_conn(&mut self, fd: RawFd) {
        if let Some(conn) = self.conns.remove(&fd) {
            self.timers.cancel_idle(fd, conn.idle_deadline_ms);
            info!(fd, "closed connection");
        }
    }

    /// Reaps expired idle connections and TTL'd entries.
    fn process_timers(&mut self) {
        let now = time::now_ms();

        for fd in self.timers.pop_expired_idle(now) {
            if let Some(_conn) = self.conns.remove(&fd) {
                info!(fd, "connection exceeded idle timeout");
            }
        }

        for key in self.timers.pop_expired_ttl(now) {
            if let Some(entry) = self.ks.remove(&key) {
                debug!(key = %String::from_utf8_lossy(&key), "key expired");
                dispose_value(entry.value, &self.pool);
            }
        }
    }
}

/// Extracts the returned events from a pollfd, treating "none" as empty.
fn revents(pollfd: &PollFd) -> PollFlags {
    pollfd.revents().unwrap_or(PollFlags::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_an_ephemeral_port() {
        let server = Server::bind("127.0.0.1".parse().unwrap(), 0, 1).unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn accepts_a_connection_on_tick() {
        let mut server = Server::bind("127.0.0.1".parse().unwrap(), 0, 1).unwrap();
        let addr = server.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();

        // the accept happens inside the same tick that saw the listener
        server.tick().unwrap();
        assert_eq!(server.conns.len(), 1);
    }

    #[test]
    fn peer_disconnect_removes_the_connection() {
        let mut server = Server::bind("127.0.0.1".parse().unwrap(), 0, 1).unwrap();
        let addr = server.local_addr().unwrap();

        let client = std::net::TcpStream::connect(addr).unwrap();
        server.tick().unwrap();
        assert_eq!(server.conns.len(), 1);

        drop(client);
        // EOF is delivered as a readable event on a following tick
        for _ in 0..5 {
            server.tick().unwrap();
            if server.conns.is_empty() {
                break;
            }
        }
        assert!(server.conns.is_empty());
    }
}
