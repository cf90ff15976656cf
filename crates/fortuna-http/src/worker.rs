//! Worker event loop.
//!
//! Each worker runs on its own thread with its own readiness queue and
//! connection slab. New connections arrive through [`WorkerShared`]: the
//! acceptor pushes the `Conn` into the lock-free inbox and pokes the
//! worker's notifier, and the worker registers it on its next wakeup.
//!
//! Per connection, every wakeup runs the same drain loop:
//!
//! ```text
//!  ┌─► parse + route one batch ──► flush ──partial──► wait for Write
//!  │                                 │
//!  │                               done ──close_after_write──► close
//!  │                                 │
//!  └──── more / new bytes ◄──── read until WouldBlock ──eof──► close
//! ```

use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use fortuna_core::{DateCache, Error, Result, ServerConfig};
use fortuna_event::{Event, EventKind, Interest, Notifier, ReadinessQueue, Trigger};

use crate::conn::{Conn, ConnSlab, Flush, ReadStatus, TAG_NOTIFY};
use crate::parser::parse;
use crate::response::{write_response, Response, Status};
use crate::router::Router;

/// The half of a worker that other threads may touch.
pub(crate) struct WorkerShared {
    id: usize,
    inbox: SegQueue<Conn>,
    notifier: Notifier,
    stop: AtomicBool,
}

impl WorkerShared {
    pub(crate) fn new(id: usize) -> Result<Self> {
        Ok(Self {
            id,
            inbox: SegQueue::new(),
            notifier: Notifier::new()?,
            stop: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Move `conn` to this worker.
    pub(crate) fn hand_off(&self, conn: Conn) -> Result<()> {
        self.inbox.push(conn);
        self.notifier.notify()
    }

    /// Ask the worker to exit after its current event batch.
    pub(crate) fn stop(&self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.notifier.notify()
    }
}

enum Next {
    Keep,
    Close,
}

pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    queue: ReadinessQueue,
    conns: ConnSlab,
    router: Router,
    date: Arc<DateCache>,
    response: Response,
    events: Vec<Event>,
    batch_size: usize,
    output_limit: usize,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<WorkerShared>,
        router: Router,
        date: Arc<DateCache>,
        config: &ServerConfig,
    ) -> Result<Self> {
        let mut queue = ReadinessQueue::new()?;
        queue.register_notifier(&shared.notifier, TAG_NOTIFY)?;
        Ok(Self {
            shared,
            queue,
            conns: ConnSlab::new(),
            router,
            date,
            response: Response::new(),
            events: vec![Event::default(); config.event_capacity.max(1)],
            batch_size: config.batch_size.max(1),
            output_limit: config.output_limit,
        })
    }

    pub(crate) fn run(mut self) {
        let id = self.shared.id;
        tracing::debug!(worker = id, "worker started");

        while !self.shared.stop.load(Ordering::Acquire) {
            let n = match self.queue.get_events(&mut self.events) {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(worker = id, error = %e, "readiness wait failed");
                    continue;
                }
            };
            for i in 0..n {
                let ev = self.events[i];
                self.dispatch(ev);
            }
        }

        let open = self.conns.active();
        for token in self.conns.tokens() {
            self.close(token);
        }
        tracing::debug!(worker = id, open, "worker stopped");
    }

    /// Route one event. Timer and signal events never belong on a worker
    /// queue; one arriving means the queue is broken, and the process exits.
    fn dispatch(&mut self, ev: Event) {
        match ev.kind {
            EventKind::Notify => self.adopt(),
            EventKind::Read | EventKind::Write => self.on_socket(ev),
            kind => {
                tracing::error!(worker = self.shared.id, ?kind, ident = ev.ident, "unexpected event kind");
                std::process::abort();
            }
        }
    }

    /// Register every connection waiting in the inbox.
    fn adopt(&mut self) {
        while let Some(conn) = self.shared.inbox.pop() {
            let fd = conn.as_raw_fd();
            let peer = conn.peer();
            let token = self.conns.insert(conn);
            if let Err(e) = self
                .queue
                .register_socket(fd, Interest::READ, Trigger::Edge, token)
            {
                tracing::warn!(worker = self.shared.id, %peer, error = %e, "failed to register connection");
                self.conns.remove(token);
                continue;
            }
            tracing::trace!(worker = self.shared.id, token, %peer, "connection adopted");
        }
    }

    fn on_socket(&mut self, ev: Event) {
        let token = ev.user_data;
        if self.conns.get_mut(token).is_none() {
            tracing::trace!(worker = self.shared.id, token, "event for closed connection");
            return;
        }
        if ev.error != 0 {
            let error = io::Error::from_raw_os_error(ev.error);
            tracing::debug!(worker = self.shared.id, token, %error, "socket error");
            self.close(token);
            return;
        }
        if ev.eof {
            self.close(token);
            return;
        }
        match self.drive(token) {
            Ok(Next::Keep) => {}
            Ok(Next::Close) => self.close(token),
            Err(e) => {
                tracing::debug!(worker = self.shared.id, token, error = %e, "connection failed");
                self.close(token);
            }
        }
    }

    /// Make as much progress on one connection as the socket allows.
    fn drive(&mut self, token: u64) -> Result<Next> {
        let Some(conn) = self.conns.get_mut(token) else {
            return Ok(Next::Close);
        };
        let date = self.date.current();

        loop {
            let gated = conn.pending_output() >= self.output_limit;
            // A gated batch is retried once the flush below drains the output.
            let mut more = gated && !conn.close_after_write;
            if !gated && !conn.close_after_write {
                more = match process_batch(
                    conn,
                    &mut self.router,
                    &mut self.response,
                    date.as_bytes(),
                    self.batch_size,
                    self.output_limit,
                ) {
                    Ok(more) => more,
                    Err(e) => {
                        tracing::debug!(worker = self.shared.id, token, error = %e, "rejecting request");
                        fail(conn, &e, &mut self.response, date.as_bytes());
                        false
                    }
                };
            }

            match conn.flush()? {
                Flush::Partial => {
                    set_write_interest(&mut self.queue, conn, token, true)?;
                    return Ok(Next::Keep);
                }
                Flush::Done => set_write_interest(&mut self.queue, conn, token, false)?,
            }
            if conn.close_after_write {
                return Ok(Next::Close);
            }
            if more {
                continue;
            }

            match conn.read_available()? {
                (_, ReadStatus::Eof) => return Ok(Next::Close),
                (0, ReadStatus::WouldBlock) => return Ok(Next::Keep),
                (_, ReadStatus::WouldBlock) | (_, ReadStatus::Full) => {}
            }
        }
    }

    fn close(&mut self, token: u64) {
        if let Some(conn) = self.conns.remove(token) {
            if let Err(e) = self.queue.deregister(conn.as_raw_fd()) {
                tracing::trace!(worker = self.shared.id, token, error = %e, "deregister failed");
            }
            tracing::trace!(worker = self.shared.id, token, peer = %conn.peer(), "connection closed");
        }
    }
}

/// Parse and answer up to `batch` buffered requests, in order.
///
/// Returns `Ok(true)` when it stopped on the batch size or the output limit
/// and further complete requests may still be buffered.
fn process_batch(
    conn: &mut Conn,
    router: &mut Router,
    resp: &mut Response,
    date: &[u8],
    batch: usize,
    output_limit: usize,
) -> Result<bool> {
    let mut consumed = 0;
    let mut hint = conn.parse_hint;
    let mut routed = 0;
    let mut more = false;
    let mut closing = false;

    {
        let (input, output) = conn.io_buffers();
        loop {
            if routed == batch || output.len() >= output_limit {
                more = true;
                break;
            }
            let Some((req, used)) = parse(&input[consumed..], &mut hint)? else {
                break;
            };
            router.route(&req, resp);
            write_response(output, resp, date, req.keep_alive);
            consumed += used;
            routed += 1;
            if !req.keep_alive {
                closing = true;
                break;
            }
        }
    }

    if closing {
        conn.close_after_write = true;
        conn.discard_input();
        return Ok(false);
    }
    conn.consume(consumed);
    conn.parse_hint = hint;
    if !more && conn.input_full() {
        return Err(Error::BufferExhausted);
    }
    Ok(more)
}

/// Queue a best-effort error response and mark the connection for close.
fn fail(conn: &mut Conn, err: &Error, resp: &mut Response, date: &[u8]) {
    let status = match err {
        Error::BufferExhausted => Status::HeaderFieldsTooLarge,
        _ => Status::BadRequest,
    };
    resp.error(status);
    write_response(&mut conn.output, resp, date, false);
    conn.close_after_write = true;
    conn.discard_input();
}

fn set_write_interest(
    queue: &mut ReadinessQueue,
    conn: &mut Conn,
    token: u64,
    want_write: bool,
) -> Result<()> {
    if conn.want_write == want_write {
        return Ok(());
    }
    let interest = if want_write {
        Interest::READ | Interest::WRITE
    } else {
        Interest::READ
    };
    queue.modify_socket(conn.as_raw_fd(), interest, Trigger::Edge, token)?;
    conn.want_write = want_write;
    Ok(())
}
