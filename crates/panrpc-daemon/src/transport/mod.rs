//! Unix socket transport and the daemon accept loop.

pub mod connection;
pub mod listener;

use std::future::Future;
use std::path::Path;

use tokio::net::UnixListener;
use tracing::Instrument;

use panrpc_core::Result;

use crate::app_state::AppState;
use crate::config::DaemonConfig;

pub use listener::SocketGuard;

/// A bound, ready-to-serve daemon.
pub struct Daemon {
    state: AppState,
    listener: UnixListener,
    guard: SocketGuard,
}

impl Daemon {
    /// Load the policy and bind the socket. Both failures are fatal for the
    /// caller. Must be called inside a tokio runtime.
    pub fn bind(cfg: DaemonConfig) -> Result<Self> {
        Self::from_state(AppState::new(cfg)?)
    }

    pub fn from_state(state: AppState) -> Result<Self> {
        let (listener, guard) = listener::bind(&state.cfg().daemon.socket_path)?;
        tracing::info!(socket = %guard.path().display(), "panrpcd listening");
        Ok(Self {
            state,
            listener,
            guard,
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.guard.path()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then stop the periodic task and
    /// remove the socket file. In-flight connections are left to finish on
    /// their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Daemon {
            state,
            listener,
            guard,
        } = self;

        let periodic = state
            .engine()
            .spawn_periodic(state.cfg().policy.periodic_interval());

        tokio::pin!(shutdown);
        let mut conn_seq: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            conn_seq += 1;
                            let span = tracing::info_span!("conn", id = conn_seq);
                            tokio::spawn(
                                connection::serve(state.clone(), stream).instrument(span),
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        periodic.abort();
        drop(listener);
        drop(guard);
        tracing::info!("panrpcd stopped");
        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}
