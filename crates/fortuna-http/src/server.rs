//! Server assembly: listener, acceptor queue, worker threads.

use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use socket2::{Domain, Protocol, Socket, Type};

use fortuna_core::{DateCache, Result, ServerConfig};
use fortuna_event::{Interest, Notifier, ReadinessQueue, Signal, TimeUnit, Trigger};
use fortuna_store::{Fortune, RecordStore};

use crate::acceptor::Acceptor;
use crate::router::Router;
use crate::worker::{Worker, WorkerShared};

// User data for the acceptor's registrations. The acceptor dispatches on
// event kind; these only make traces readable.
const TAG_LISTENER: u64 = 1;
const TAG_TICK: u64 = 2;
const TAG_SIGNAL: u64 = 3;
const TAG_SHUTDOWN: u64 = 4;

/// Stops a running [`Server`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    notifier: Arc<Notifier>,
}

impl ShutdownHandle {
    /// Wake the acceptor and make it stop, exactly as a termination signal
    /// would.
    pub fn shutdown(&self) -> Result<()> {
        self.notifier.notify()
    }
}

/// A bound, not yet running server.
///
/// Termination signals (when enabled) are blocked on the thread that calls
/// [`bind`](Self::bind); call [`run`](Self::run) on that same thread so the
/// workers inherit the mask.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    queue: ReadinessQueue,
    shutdown: Arc<Notifier>,
    store: Arc<RecordStore<Fortune>>,
    date: Arc<DateCache>,
}

impl Server {
    pub fn bind(config: ServerConfig, store: Arc<RecordStore<Fortune>>) -> Result<Self> {
        let config = config.normalized();
        let listener = listen(&config)?;
        let local_addr = listener.local_addr()?;
        let date = Arc::new(DateCache::from_system_clock()?);
        let shutdown = Arc::new(Notifier::new()?);

        let mut queue = ReadinessQueue::new()?;
        queue.register_socket(listener.as_raw_fd(), Interest::READ, Trigger::Edge, TAG_LISTENER)?;
        let tick_ms = config.tick.as_millis().clamp(1, u64::MAX as u128) as u64;
        queue.register_timer(tick_ms, tick_ms, TimeUnit::Milliseconds, TAG_TICK)?;
        if config.handle_signals {
            queue.register_signals(&[Signal::SIGINT, Signal::SIGTERM], TAG_SIGNAL)?;
        }
        queue.register_notifier(&shutdown, TAG_SHUTDOWN)?;

        tracing::info!(
            addr = %local_addr,
            workers = config.num_workers,
            signals = config.handle_signals,
            "listening"
        );

        Ok(Self {
            config,
            listener,
            local_addr,
            queue,
            shutdown,
            store,
            date,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notifier: Arc::clone(&self.shutdown),
        }
    }

    /// Start the workers and run the acceptor on the current thread until
    /// shutdown. Workers are stopped and joined before returning; open
    /// connections are dropped.
    pub fn run(self) -> Result<()> {
        let Server {
            config,
            listener,
            queue,
            shutdown,
            store,
            date,
            ..
        } = self;

        let mut shared = Vec::with_capacity(config.num_workers);
        let mut handles = Vec::with_capacity(config.num_workers);
        for id in 0..config.num_workers {
            match spawn_worker(id, &config, &store, &date) {
                Ok((ws, handle)) => {
                    shared.push(ws);
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::error!(worker = id, error = %e, "failed to start worker");
                    stop_workers(&shared, handles);
                    return Err(e);
                }
            }
        }

        let acceptor = Acceptor::new(
            listener,
            queue,
            shared.clone(),
            Arc::clone(&date),
            config.input_buffer_size,
            config.event_capacity,
        );
        let result = acceptor.run();

        stop_workers(&shared, handles);
        drop(shutdown);
        tracing::info!("server stopped");
        result
    }
}

fn listen(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.listen;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;
    Ok(socket.into())
}

fn spawn_worker(
    id: usize,
    config: &ServerConfig,
    store: &Arc<RecordStore<Fortune>>,
    date: &Arc<DateCache>,
) -> Result<(Arc<WorkerShared>, JoinHandle<()>)> {
    let shared = Arc::new(WorkerShared::new(id)?);
    let router = Router::new(Arc::clone(store), config.listing_cap);
    let worker = Worker::new(Arc::clone(&shared), router, Arc::clone(date), config)?;
    let handle = thread::Builder::new()
        .name(format!("fortuna-worker-{id}"))
        .spawn(move || worker.run())?;
    Ok((shared, handle))
}

fn stop_workers(shared: &[Arc<WorkerShared>], handles: Vec<JoinHandle<()>>) {
    for ws in shared {
        if let Err(e) = ws.stop() {
            tracing::warn!(worker = ws.id(), error = %e, "failed to signal worker stop");
        }
    }
    for (id, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            tracing::error!(worker = id, "worker panicked");
        }
    }
}
