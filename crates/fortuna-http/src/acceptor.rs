//! Acceptor loop.
//!
//! Owns the listening socket and a dedicated readiness queue carrying the
//! listener, the date tick, termination signals and the shutdown notifier.

use std::io;
use std::net::TcpListener;
use std::sync::Arc;

use fortuna_core::{DateCache, Result};
use fortuna_event::{Event, EventKind, ReadinessQueue};

use crate::conn::Conn;
use crate::worker::WorkerShared;

pub(crate) struct Acceptor {
    listener: TcpListener,
    queue: ReadinessQueue,
    workers: Vec<Arc<WorkerShared>>,
    next_worker: usize,
    date: Arc<DateCache>,
    /// Logical clock in milliseconds, advanced by timer events.
    clock_ms: i64,
    input_buffer_size: usize,
    event_capacity: usize,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        queue: ReadinessQueue,
        workers: Vec<Arc<WorkerShared>>,
        date: Arc<DateCache>,
        input_buffer_size: usize,
        event_capacity: usize,
    ) -> Self {
        let clock_ms = date.current().unix().saturating_mul(1000);
        Self {
            listener,
            queue,
            workers,
            next_worker: 0,
            date,
            clock_ms,
            input_buffer_size,
            event_capacity,
        }
    }

    /// Run until a termination signal or a shutdown request arrives.
    pub(crate) fn run(mut self) -> Result<()> {
        let mut events = vec![Event::default(); self.event_capacity.max(1)];
        let mut quit = false;

        while !quit {
            let n = self.queue.get_events(&mut events)?;
            for ev in &events[..n] {
                match ev.kind {
                    EventKind::Read => self.accept_pending(ev),
                    EventKind::Timer => self.tick(ev.data),
                    EventKind::Signal => {
                        tracing::info!(signal = ev.ident, "termination signal received");
                        quit = true;
                    }
                    EventKind::Notify => {
                        tracing::info!("shutdown requested");
                        quit = true;
                    }
                    EventKind::Write => {
                        tracing::error!(fd = ev.ident, "unexpected write readiness on listener");
                        std::process::abort();
                    }
                }
            }
        }
        Ok(())
    }

    /// Accept until the backlog is empty, handing each connection to the
    /// next worker in turn.
    fn accept_pending(&mut self, ev: &Event) {
        if ev.error != 0 {
            let error = io::Error::from_raw_os_error(ev.error);
            tracing::warn!(%error, "listener error");
        }
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            };
            if let Err(e) = stream.set_nonblocking(true).and_then(|_| stream.set_nodelay(true)) {
                tracing::debug!(%peer, error = %e, "failed to configure connection");
                continue;
            }

            let worker = &self.workers[self.next_worker % self.workers.len()];
            self.next_worker = self.next_worker.wrapping_add(1);
            let conn = Conn::new(stream, peer, self.input_buffer_size);
            if let Err(e) = worker.hand_off(conn) {
                tracing::warn!(worker = worker.id(), %peer, error = %e, "failed to wake worker");
            } else {
                tracing::trace!(worker = worker.id(), %peer, "connection accepted");
            }
        }
    }

    fn tick(&mut self, elapsed_ms: u64) {
        self.clock_ms = self.clock_ms.saturating_add(elapsed_ms as i64);
        if let Err(e) = self.date.update(self.clock_ms / 1000) {
            tracing::warn!(error = %e, "date cache update failed");
        }
    }
}
