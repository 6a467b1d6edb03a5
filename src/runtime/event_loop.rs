//! mio event loop for the IPC server.
//!
//! Readiness-based model: poll tells us when the listener or a client
//! socket is ready, then we perform non-blocking accept/read/write
//! syscalls. `Poll::poll` with no timeout is the only blocking point, so
//! the process consumes no CPU while idle.
//!
//! One cycle is Wait -> Admit -> Service: block on the poll, drain the
//! accept backlog if the listener is ready, then for each ready connection
//! drain its socket, dispatch every complete frame, and flush pending
//! output. A connection that signals EOF or an unrecoverable error is
//! removed from the set and its descriptor closed in the same step.

use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::protocol::{self, Request, Response};
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::listener;
use bytes::Buf;
use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);
const EVENTS_CAPACITY: usize = 256;

/// Outcome of a single outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The whole frame reached the socket.
    Sent,
    /// The socket was saturated; the remainder is queued and will be
    /// flushed when the socket polls writable.
    Queued,
    /// The connection was already gone or died during the write.
    Closed,
}

impl SendOutcome {
    /// Whether the frame was handed off (written or queued).
    pub fn is_delivered(&self) -> bool {
        !matches!(self, SendOutcome::Closed)
    }
}

/// Requests loop termination from another thread or a signal handler.
///
/// Sets the shutdown flag and wakes the poll; the loop observes the flag at
/// the top of its next cycle, closes every connection, and returns.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the loop to stop. Safe to call from a signal handler: both the
    /// flag store and the waker write are async-signal-safe.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }
}

/// The IPC server: listener, connection set, and dispatcher in one
/// single-threaded event loop.
pub struct Server {
    poll: Poll,
    listener: UnixListener,
    connections: ConnectionRegistry,
    commands: CommandRegistry,
    socket_path: PathBuf,
    scratch: Vec<u8>,
    max_request: usize,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    /// Bind the socket and prepare the loop. Bind or listen failure is
    /// fatal; the caller logs the diagnostic and exits.
    pub fn bind(config: &Config, commands: CommandRegistry) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = listener::bind_socket(&config.socket, config.backlog)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            commands,
            socket_path: config.socket.clone(),
            scratch: vec![0; config.read_buffer.max(1)],
            max_request: config.max_request,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Handle for stopping the loop from outside it.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Path the listener is bound to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of currently open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the loop until shutdown is requested or the poll fails.
    ///
    /// On shutdown every connection is closed and the socket file removed;
    /// a poll failure other than interruption is returned as the error.
    pub fn run(mut self) -> io::Result<()> {
        info!(socket = %self.socket_path.display(), "Server listening");

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        while !self.shutdown.load(Ordering::Acquire) {
            self.turn(&mut events, None)?;
        }

        info!(connections = self.connections.len(), "Shutting down");
        self.close_all();
        Ok(())
    }

    /// One Wait -> Admit -> Service cycle. A `timeout` of `None` blocks
    /// until something is ready.
    fn turn(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        if let Err(e) = self.poll.poll(events, timeout) {
            // A signal interrupting the wait is transient; retry
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            error!(error = %e, "Poll failed");
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept_pending(),
                WAKER_TOKEN => {
                    // Shutdown flag is checked by the caller between turns
                }
                Token(id) => {
                    if let Err(e) = self.service_connection(id, event) {
                        debug!(conn_id = id, error = %e, "Connection error");
                        self.close_connection(id);
                    }
                }
            }
        }

        Ok(())
    }

    /// Drain the accept backlog. Notifications are edge-triggered, so a
    /// single pending client left unaccepted would wait forever.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let Some(id) = self.connections.insert(Connection::new(stream)) else {
                        // Dropping the stream closes it, rejecting the client
                        warn!(
                            connections = self.connections.len(),
                            "Connection limit reached, rejecting client"
                        );
                        continue;
                    };

                    let registered = match self.connections.get_mut(id) {
                        Some(conn) => self.poll.registry().register(
                            &mut conn.stream,
                            Token(id),
                            Interest::READABLE,
                        ),
                        None => continue,
                    };
                    if let Err(e) = registered {
                        error!(conn_id = id, error = %e, "Failed to register connection");
                        self.connections.remove(id);
                        continue;
                    }

                    debug!(
                        conn_id = id,
                        connections = self.connections.len(),
                        "Accepted connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    /// React to readiness on one connection. Any error return makes the
    /// caller close and remove it.
    fn service_connection(&mut self, id: usize, event: &mio::event::Event) -> io::Result<()> {
        // The token may be stale: an earlier event this cycle can have
        // removed the connection
        if !self.connections.contains(id) {
            return Ok(());
        }

        if event.is_readable() {
            self.handle_readable(id)?;
        }

        if !self.connections.contains(id) {
            return Ok(());
        }

        if event.is_writable() {
            self.handle_writable(id)?;
        }

        Ok(())
    }

    /// Drain the socket, then dispatch every complete frame that arrived.
    fn handle_readable(&mut self, id: usize) -> io::Result<()> {
        let mut peer_closed = false;
        let mut frames = Vec::new();

        let oversized = {
            let conn = match self.connections.get_mut(id) {
                Some(conn) => conn,
                None => return Ok(()),
            };

            loop {
                match conn.stream.read(&mut self.scratch) {
                    Ok(0) => {
                        peer_closed = true;
                        break;
                    }
                    Ok(n) => {
                        conn.read_buf.extend_from_slice(&self.scratch[..n]);
                        // An unterminated frame past the limit gets the
                        // connection closed; stop pulling more of it in
                        if conn.read_buf.len() > self.max_request
                            && !conn.read_buf.contains(&b'\n')
                        {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            while let Some(frame) = protocol::next_frame(&mut conn.read_buf) {
                frames.push(frame);
            }

            // Whatever is left has no delimiter; if it already exceeds the
            // limit it can never become a valid frame
            conn.read_buf.len() > self.max_request
        };

        for frame in frames {
            let response = match Request::parse(&frame) {
                Ok(request) => self.commands.dispatch(&request),
                Err(e) => {
                    debug!(conn_id = id, error = %e, "Malformed request");
                    Response::malformed()
                }
            };

            if !self.send_to(id, &response).is_delivered() {
                // send_to already closed the connection
                return Ok(());
            }
        }

        if oversized {
            warn!(
                conn_id = id,
                limit = self.max_request,
                "Request frame exceeds size limit"
            );
            self.send_to(id, &Response::too_large());
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request too large",
            ));
        }

        if peer_closed {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "EOF"));
        }

        Ok(())
    }

    /// Flush queued output; once drained, stop watching for writable.
    fn handle_writable(&mut self, id: usize) -> io::Result<()> {
        let drained = {
            let conn = match self.connections.get_mut(id) {
                Some(conn) => conn,
                None => return Ok(()),
            };

            let written = write_some(&mut conn.stream, &conn.write_buf)?;
            conn.write_buf.advance(written);
            !conn.has_pending_write()
        };

        if drained {
            if let Some(conn) = self.connections.get_mut(id) {
                self.poll
                    .registry()
                    .reregister(&mut conn.stream, Token(id), Interest::READABLE)?;
            }
        }

        Ok(())
    }

    /// Serialize a response, append the frame delimiter, and write it to
    /// one connection.
    ///
    /// A saturated socket is not an error: the unwritten tail is queued on
    /// the connection and flushed when the socket polls writable. Any other
    /// write failure closes the connection immediately.
    pub fn send_to(&mut self, id: usize, response: &Response) -> SendOutcome {
        let frame = response.encode();

        let result = match self.connections.get_mut(id) {
            Some(conn) => {
                if conn.has_pending_write() {
                    // Keep frames ordered behind already-queued output
                    conn.write_buf.extend_from_slice(&frame);
                    return SendOutcome::Queued;
                }
                write_some(&mut conn.stream, &frame)
            }
            None => return SendOutcome::Closed,
        };

        match result {
            Ok(written) if written == frame.len() => SendOutcome::Sent,
            Ok(written) => match self.queue_remainder(id, &frame[written..]) {
                Ok(()) => SendOutcome::Queued,
                Err(e) => {
                    debug!(conn_id = id, error = %e, "Failed to watch for writable");
                    self.close_connection(id);
                    SendOutcome::Closed
                }
            },
            Err(e) => {
                debug!(conn_id = id, error = %e, "Write failed");
                self.close_connection(id);
                SendOutcome::Closed
            }
        }
    }

    /// Send a response to every open connection.
    ///
    /// Attempts all connections regardless of individual failures and
    /// reports overall success only if every send was delivered.
    pub fn broadcast(&mut self, response: &Response) -> bool {
        let mut all_delivered = true;
        for id in self.connections.ids() {
            if !self.send_to(id, response).is_delivered() {
                all_delivered = false;
            }
        }
        all_delivered
    }

    fn queue_remainder(&mut self, id: usize, tail: &[u8]) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
        conn.write_buf.extend_from_slice(tail);
        self.poll.registry().reregister(
            &mut conn.stream,
            Token(id),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    /// Remove a connection from the set and close its descriptor.
    fn close_connection(&mut self, id: usize) {
        if let Some(mut conn) = self.connections.remove(id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(
                conn_id = id,
                connections = self.connections.len(),
                "Connection closed"
            );
        }
    }

    fn close_all(&mut self) {
        for id in self.connections.ids() {
            self.close_connection(id);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Write as much of `frame` as the socket will take, stopping at
/// `WouldBlock`. Returns the number of bytes written.
fn write_some(stream: &mut UnixStream, frame: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
