use crate::errors::KenshoError;
use crate::services::logger::Logger;
use crate::tunnel::TunnelConnection;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Why a tunnel stopped.
#[derive(Debug, Clone)]
pub enum Termination {
    Clean,
    Failed(KenshoError),
}

impl Termination {
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Clean)
    }

    pub fn error(&self) -> Option<&KenshoError> {
        match self {
            Termination::Clean => None,
            Termination::Failed(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Armed,
    Terminated,
}

type Listener = Box<dyn FnOnce(Termination) + Send + 'static>;

#[derive(Default)]
struct Shared {
    termination: Option<Termination>,
    listener: Option<Listener>,
    listener_registered: bool,
}

/// Watches one tunnel connection until it ends.
///
/// The blocking `wait` runs on a dedicated thread. Its outcome is recorded once,
/// published to async waiters and handed to at most one registered listener.
/// Nothing reconnects automatically.
pub struct LivenessSupervisor;

impl LivenessSupervisor {
    pub fn arm(
        logger: &Logger,
        tunnel: Arc<dyn TunnelConnection>,
    ) -> Result<LivenessWatch, KenshoError> {
        let logger = logger.child("liveness");
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (sender, receiver) = watch::channel(None);
        let label = tunnel.describe();

        let thread_shared = shared.clone();
        let thread_tunnel = tunnel.clone();
        let thread_logger = logger.clone();
        std::thread::Builder::new()
            .name("kensho-liveness".to_string())
            .spawn(move || {
                let termination = match thread_tunnel.wait() {
                    Ok(()) => Termination::Clean,
                    Err(err) => Termination::Failed(err),
                };
                match &termination {
                    Termination::Clean => thread_logger.info(
                        "tunnel closed",
                        Some(&serde_json::json!({ "tunnel": label })),
                    ),
                    Termination::Failed(err) => thread_logger.warn(
                        "tunnel terminated",
                        Some(&serde_json::json!({ "tunnel": label, "error": err.message })),
                    ),
                }
                let listener = {
                    let mut guard = thread_shared.lock().unwrap_or_else(|err| err.into_inner());
                    guard.termination = Some(termination.clone());
                    guard.listener.take()
                };
                sender.send_replace(Some(termination.clone()));
                if let Some(listener) = listener {
                    listener(termination);
                }
            })
            .map_err(|err| {
                KenshoError::transport(format!("Failed to start liveness watcher: {}", err))
            })?;

        logger.debug(
            "armed",
            Some(&serde_json::json!({ "tunnel": tunnel.describe() })),
        );
        Ok(LivenessWatch {
            shared,
            receiver,
            tunnel,
        })
    }
}

pub struct LivenessWatch {
    shared: Arc<Mutex<Shared>>,
    receiver: watch::Receiver<Option<Termination>>,
    tunnel: Arc<dyn TunnelConnection>,
}

impl LivenessWatch {
    /// Registers the one-shot listener. If the tunnel already ended it fires
    /// immediately on the calling thread, otherwise on the watcher thread.
    pub fn on_terminated<F>(&self, listener: F) -> Result<(), KenshoError>
    where
        F: FnOnce(Termination) + Send + 'static,
    {
        let mut guard = self.shared.lock().unwrap_or_else(|err| err.into_inner());
        if guard.listener_registered {
            return Err(KenshoError::invalid_params(
                "A termination listener is already registered",
            ));
        }
        guard.listener_registered = true;
        match guard.termination.clone() {
            Some(termination) => {
                drop(guard);
                listener(termination);
            }
            None => guard.listener = Some(Box::new(listener)),
        }
        Ok(())
    }

    pub fn state(&self) -> LivenessState {
        if self.termination().is_some() {
            LivenessState::Terminated
        } else {
            LivenessState::Armed
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == LivenessState::Terminated
    }

    pub fn termination(&self) -> Option<Termination> {
        self.shared
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .termination
            .clone()
    }

    /// Resolves once the tunnel has ended.
    pub async fn terminated(&self) -> Termination {
        let mut receiver = self.receiver.clone();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone());
        outcome.unwrap_or_else(|| {
            Termination::Failed(KenshoError::transport("Liveness watcher stopped unexpectedly"))
        })
    }

    /// Closes the watched tunnel; the listener then sees a clean termination.
    pub fn close(&self) {
        self.tunnel.close();
    }

    pub fn tunnel(&self) -> &Arc<dyn TunnelConnection> {
        &self.tunnel
    }
}
