//! Sync-over-async bridging for apps that drive an asynchronous resource.
//!
//! Each owned resource lives on one dedicated OS thread that runs its own
//! current-thread runtime. Callers never touch the resource directly: they send
//! a command and block on the reply, bounded by the worker's call timeout.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use agentsim_core_types::{SimError, SimResult};

use crate::app::AppExtension;

/// An external resource driven from async code, e.g. a browser session.
#[async_trait]
pub trait AsyncResource: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn start(&mut self) -> SimResult<()>;

    async fn stop(&mut self) -> SimResult<()>;

    async fn handle(&mut self, request: Self::Request) -> SimResult<Self::Response>;
}

/// Whether a lease holder is responsible for starting and stopping the resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Owned,
    Borrowed,
}

enum Command<R: AsyncResource> {
    Start(SyncSender<SimResult<()>>),
    Stop(SyncSender<SimResult<()>>),
    Call(R::Request, SyncSender<SimResult<R::Response>>),
    Shutdown,
}

/// Dedicated execution context for one resource instance.
pub struct ResourceWorker<R: AsyncResource> {
    name: String,
    tx: Mutex<Sender<Command<R>>>,
    timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Disconnects once the worker thread has left its command loop.
    alive: Mutex<Receiver<()>>,
}

impl<R: AsyncResource> ResourceWorker<R> {
    pub fn spawn(name: impl Into<String>, mut resource: R, timeout: Duration) -> SimResult<Arc<Self>> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Command<R>>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<SimResult<()>>(1);
        let (alive_tx, alive_rx) = mpsc::channel::<()>();
        let thread_name = format!("resource-{name}");
        let worker_name = name.clone();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let _alive = alive_tx;
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(SimError::internal(format!(
                            "{worker_name}: runtime init failed: {err}"
                        ))));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Start(reply) => {
                            let _ = reply.send(runtime.block_on(resource.start()));
                        }
                        Command::Stop(reply) => {
                            let _ = reply.send(runtime.block_on(resource.stop()));
                        }
                        Command::Call(request, reply) => {
                            let _ = reply.send(runtime.block_on(resource.handle(request)));
                        }
                        Command::Shutdown => break,
                    }
                }
                debug!(resource = %worker_name, "resource worker exited");
            })
            .map_err(|err| SimError::internal(format!("{name}: worker spawn failed: {err}")))?;
        ready_rx
            .recv()
            .map_err(|_| SimError::internal(format!("{name}: worker exited during startup")))??;
        info!(resource = %name, "resource worker started");
        Ok(Arc::new(Self {
            name,
            tx: Mutex::new(tx),
            timeout,
            thread: Mutex::new(Some(handle)),
            alive: Mutex::new(alive_rx),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Marshals one request onto the worker and waits for its reply.
    pub fn call(&self, request: R::Request) -> SimResult<R::Response> {
        self.round_trip(|reply| Command::Call(request, reply))
    }

    fn start(&self) -> SimResult<()> {
        self.round_trip(Command::Start)
    }

    fn stop(&self) -> SimResult<()> {
        self.round_trip(Command::Stop)
    }

    fn round_trip<T>(&self, command: impl FnOnce(SyncSender<SimResult<T>>) -> Command<R>) -> SimResult<T> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .lock()
            .send(command(reply_tx))
            .map_err(|_| SimError::internal(format!("{}: worker is gone", self.name)))?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(resource = %self.name, timeout_ms = self.timeout.as_millis() as u64, "resource call timed out");
                Err(SimError::timeout(format!(
                    "{}: no reply within {:?}",
                    self.name, self.timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SimError::internal(format!(
                "{}: worker dropped the reply",
                self.name
            ))),
        }
    }
}

impl<R: AsyncResource> Drop for ResourceWorker<R> {
    /// Joins the worker if it exits within the call timeout; a worker stuck in
    /// a handler is detached and exits after it.
    fn drop(&mut self) {
        let _ = self.tx.lock().send(Command::Shutdown);
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        match self.alive.lock().recv_timeout(self.timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(resource = %self.name, "resource worker still busy at shutdown; detaching");
            }
            _ => {
                let _ = handle.join();
            }
        }
    }
}

impl<R: AsyncResource> fmt::Debug for ResourceWorker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceWorker")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Handle on a worker with an ownership flag fixed at construction.
pub struct ResourceLease<R: AsyncResource> {
    worker: Arc<ResourceWorker<R>>,
    ownership: Ownership,
}

impl<R: AsyncResource> ResourceLease<R> {
    pub fn owned(worker: Arc<ResourceWorker<R>>) -> Self {
        Self {
            worker,
            ownership: Ownership::Owned,
        }
    }

    pub fn borrowed(worker: Arc<ResourceWorker<R>>) -> Self {
        Self {
            worker,
            ownership: Ownership::Borrowed,
        }
    }

    /// A borrowed lease on the same worker, for handing to another app.
    pub fn lend(&self) -> Self {
        Self::borrowed(self.worker.clone())
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    pub fn call(&self, request: R::Request) -> SimResult<R::Response> {
        self.worker.call(request)
    }

    pub fn start(&self) -> SimResult<()> {
        self.ensure_owned("start")?;
        self.worker.start()
    }

    pub fn stop(&self) -> SimResult<()> {
        self.ensure_owned("stop")?;
        self.worker.stop()
    }

    fn ensure_owned(&self, action: &str) -> SimResult<()> {
        if self.is_owned() {
            return Ok(());
        }
        Err(SimError::ownership(format!(
            "cannot {action} borrowed resource {}",
            self.worker.name()
        )))
    }
}

impl<R: AsyncResource> fmt::Debug for ResourceLease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLease")
            .field("worker", &self.worker)
            .field("ownership", &self.ownership)
            .finish()
    }
}

impl<R: AsyncResource> AppExtension for ResourceLease<R> {
    fn start(&self) -> SimResult<()> {
        if self.is_owned() {
            ResourceLease::start(self)
        } else {
            Ok(())
        }
    }

    fn shutdown(&self) -> SimResult<()> {
        if self.is_owned() {
            ResourceLease::stop(self)
        } else {
            Ok(())
        }
    }

    fn owns_resources(&self) -> bool {
        self.is_owned()
    }
}

/// Type-erased view of a lease, held by environments that own shared resources.
pub trait ManagedResource: Send + Sync {
    fn name(&self) -> &str;

    fn ownership(&self) -> Ownership;

    fn start(&self) -> SimResult<()>;

    fn stop(&self) -> SimResult<()>;
}

impl<R: AsyncResource> ManagedResource for ResourceLease<R> {
    fn name(&self) -> &str {
        self.worker.name()
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }

    fn start(&self) -> SimResult<()> {
        ResourceLease::start(self)
    }

    fn stop(&self) -> SimResult<()> {
        ResourceLease::stop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsim_core_types::ErrorKind;

    struct Echo {
        started: bool,
        delay: Duration,
    }

    #[async_trait]
    impl AsyncResource for Echo {
        type Request = String;
        type Response = (String, String);

        async fn start(&mut self) -> SimResult<()> {
            self.started = true;
            Ok(())
        }

        async fn stop(&mut self) -> SimResult<()> {
            self.started = false;
            Ok(())
        }

        async fn handle(&mut self, request: String) -> SimResult<(String, String)> {
            if !self.started {
                return Err(SimError::capability("echo not started"));
            }
            tokio::time::sleep(self.delay).await;
            let thread = thread::current().name().unwrap_or_default().to_string();
            Ok((request, thread))
        }
    }

    fn echo(delay: Duration, timeout: Duration) -> Arc<ResourceWorker<Echo>> {
        ResourceWorker::spawn(
            "echo",
            Echo {
                started: false,
                delay,
            },
            timeout,
        )
        .unwrap()
    }

    #[test]
    fn calls_are_served_on_the_worker_thread() {
        let lease = ResourceLease::owned(echo(Duration::ZERO, Duration::from_secs(5)));
        lease.start().unwrap();
        let (reply, thread) = lease.call("ping".into()).unwrap();
        assert_eq!(reply, "ping");
        assert_eq!(thread, "resource-echo");
        assert_ne!(thread::current().name(), Some("resource-echo"));
    }

    #[test]
    fn borrowed_lease_cannot_start_or_stop() {
        let owner = ResourceLease::owned(echo(Duration::ZERO, Duration::from_secs(5)));
        let borrowed = owner.lend();
        assert_eq!(borrowed.ownership(), Ownership::Borrowed);
        assert_eq!(
            borrowed.start().unwrap_err().kind(),
            ErrorKind::ResourceOwnership
        );
        assert_eq!(
            borrowed.stop().unwrap_err().kind(),
            ErrorKind::ResourceOwnership
        );

        owner.start().unwrap();
        assert!(borrowed.call("shared".into()).is_ok());
        // extension hooks leave borrowed resources untouched
        AppExtension::shutdown(&borrowed).unwrap();
        assert!(borrowed.call("still up".into()).is_ok());
    }

    #[test]
    fn slow_calls_time_out() {
        let lease = ResourceLease::owned(echo(Duration::from_millis(500), Duration::from_millis(50)));
        lease.start().unwrap();
        let err = lease.call("slow".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn dropping_a_stuck_worker_does_not_block() {
        let worker = echo(Duration::from_secs(3), Duration::from_millis(50));
        let lease = ResourceLease::owned(worker);
        lease.start().unwrap();
        assert_eq!(lease.call("stuck".into()).unwrap_err().kind(), ErrorKind::Timeout);

        let dropped = std::time::Instant::now();
        drop(lease);
        assert!(dropped.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn idle_worker_exits_on_drop() {
        let worker = echo(Duration::ZERO, Duration::from_secs(5));
        let dropped = std::time::Instant::now();
        drop(worker);
        assert!(dropped.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn resource_errors_propagate() {
        let lease = ResourceLease::owned(echo(Duration::ZERO, Duration::from_secs(5)));
        let err = lease.call("early".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }
}
