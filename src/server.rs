// src/server.rs
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::acceptor;
use crate::config::Config;
use crate::error::{SkuaError, SkuaResult};
use crate::scheduler::Scheduler;
use crate::slot::{SlotTable, RESPONSE_BUF_CAPACITY};
use crate::syscalls::{self, Notifier};
use crate::url_map::UrlMap;
use crate::worker::Worker;

/// A bound server, ready to run. Holds the listening socket, the shared
/// slot table and the pre-computed descriptor budget.
pub struct Server {
    config: Config,
    listen_fd: RawFd,
    worker_count: usize,
    max_fd_per_worker: usize,
    slots: Arc<SlotTable>,
    port: u16,
}

impl Server {
    /// Bind the listening socket and size the descriptor budget.
    ///
    /// Raises the soft fd limit to the hard limit (times eight when the hard
    /// limit is unbounded), allocates one slot per budgeted descriptor and
    /// listens with a backlog of `worker_count * max_fd_per_worker`. Any
    /// failure here is fatal to the caller: there is no degraded mode.
    pub fn bind(config: Config) -> SkuaResult<Self> {
        let worker_count = config.workers.unwrap_or_else(|| num_cpus::get().max(2));

        let soft_limit = syscalls::raise_fd_limit()?;
        let budget = match config.fd_limit {
            Some(cap) => soft_limit.min(cap),
            None => soft_limit,
        } as usize;
        let max_fd_per_worker = budget / worker_count;
        if max_fd_per_worker == 0 {
            return Err(SkuaError::Other(format!(
                "descriptor budget {} too small for {} workers",
                budget, worker_count
            )));
        }

        tracing::info!(
            workers = worker_count,
            max_fd_per_worker,
            "using {} workers, maximum {} sockets per worker",
            worker_count,
            max_fd_per_worker
        );

        syscalls::ignore_sigpipe_and_close_stdin();

        let slots = Arc::new(SlotTable::new(budget, RESPONSE_BUF_CAPACITY));

        let backlog =
            (worker_count * max_fd_per_worker).min(libc::c_int::MAX as usize) as libc::c_int;
        let listen_fd = syscalls::create_listen_socket(config.port, config.enable_linger, backlog)?;
        let port = syscalls::local_port(listen_fd)?;
        tracing::info!(port, backlog, "listening");

        Ok(Self {
            config,
            listen_fd,
            worker_count,
            max_fd_per_worker,
            slots,
            port,
        })
    }

    /// Port actually bound; differs from the configured one when it was 0.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Run until interrupted (Ctrl-C / SIGINT).
    pub fn serve(self, url_map: UrlMap) -> SkuaResult<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, shutting down");
            flag.store(true, Ordering::Release);
        })
        .map_err(|e| SkuaError::Other(format!("failed to install signal handler: {}", e)))?;
        self.run(url_map, shutdown)
    }

    /// Run until `shutdown` is set: spawn the workers, drive the accept loop
    /// on the calling thread, then tear down in order — notifier sweep,
    /// joins, listening socket, slots.
    pub fn run(self, url_map: UrlMap, shutdown: Arc<AtomicBool>) -> SkuaResult<()> {
        let url_map = Arc::new(url_map);
        let core_ids = if self.config.enable_thread_affinity {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut notifiers: Vec<Arc<Notifier>> = Vec::with_capacity(self.worker_count);
        for _ in 0..self.worker_count {
            notifiers.push(Arc::new(Notifier::new()?));
        }

        let mut handles = Vec::with_capacity(self.worker_count);
        let mut spawn_error = None;
        for i in (0..self.worker_count).rev() {
            let worker = Worker::new(
                i,
                notifiers[i].clone(),
                self.slots.clone(),
                url_map.clone(),
                self.config.keep_alive_timeout,
                self.max_fd_per_worker,
            );
            let core_id = core_ids.get(i).copied();
            let spawned = thread::Builder::new()
                .name(format!("skua-worker-{}", i))
                .spawn(move || {
                    if let Some(id) = core_id {
                        if core_affinity::set_for_current(id) {
                            tracing::debug!(worker = i, core = id.id, "pinned worker to core");
                        } else {
                            tracing::warn!(worker = i, core = id.id, "failed to pin worker");
                        }
                    }
                    worker.run();
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(SkuaError::Thread(format!("spawn worker {}: {}", i, e)));
                    break;
                }
            }
        }

        let scheduler = Scheduler::new(self.worker_count);
        let accept_result = match spawn_error {
            Some(e) => Err(e),
            None => acceptor::run(self.listen_fd, &notifiers, &scheduler, &shutdown),
        };

        // Sweep every notifier before the first join so a slow worker does
        // not serialize the rest.
        for notifier in &notifiers {
            notifier.shutdown();
        }
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }

        syscalls::shutdown_socket(self.listen_fd);
        // The listening descriptor closes in Drop; the slot table (and every
        // response buffer) and the URL map are released when the last Arc
        // goes away, which is here, after every worker has been joined.
        tracing::info!("server shut down");
        accept_result
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        syscalls::close_fd(self.listen_fd);
    }
}
