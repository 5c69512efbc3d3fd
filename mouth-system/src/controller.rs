use std::io;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to finish. Ideally, open
/// work is persisted or finished in an orderly manner but no new requests are accepted anymore.
///
/// After the timeout the system will shut down regardless of what the receivers of this message
/// do.
#[derive(Clone, Debug, PartialEq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

static SHUTDOWN: Lazy<watch::Sender<Option<Shutdown>>> = Lazy::new(|| watch::channel(None).0);

/// Notifies a service about an upcoming shutdown.
///
/// Obtain a handle through [`Controller::shutdown_handle`].
#[derive(Debug)]
pub struct ShutdownHandle {
    rx: watch::Receiver<Option<Shutdown>>,
    notified: bool,
}

impl ShutdownHandle {
    /// Creates a handle listening on an explicit channel rather than the global controller.
    ///
    /// This allows to drive the shutdown of a single service, for instance in tests.
    pub fn from_receiver(rx: watch::Receiver<Option<Shutdown>>) -> Self {
        Self {
            rx,
            notified: false,
        }
    }

    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been started, even before
    /// this shutdown handle has been obtained. Once a shutdown has been returned, subsequent calls
    /// wait indefinitely.
    pub async fn notified(&mut self) -> Shutdown {
        if !self.notified {
            loop {
                let current = self.rx.borrow_and_update().clone();
                if let Some(shutdown) = current {
                    self.notified = true;
                    return shutdown;
                }

                if self.rx.changed().await.is_err() {
                    break;
                }
            }
        }

        std::future::pending().await
    }
}

/// Service to start and gracefully stop the system runtime.
///
/// The controller listens for process signals and broadcasts a [`Shutdown`] message to all
/// services that obtained a [`ShutdownHandle`]:
///
///  - `SIGINT` and `SIGTERM` shut down gracefully with the configured timeout.
///  - `SIGQUIT` shuts down immediately.
///
/// ### Example
///
/// ```no_run
/// use std::time::Duration;
/// use mouth_system::Controller;
///
/// #[tokio::main]
/// async fn main() {
///     Controller::start(Duration::from_secs(10));
///     let shutdown = Controller::shutdown_handle().notified().await;
///     println!("shutdown with timeout {:?}", shutdown.timeout);
/// }
/// ```
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts a controller that monitors shutdown signals.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(shutdown_timeout: Duration) {
        tokio::spawn(async move {
            match monitor_signals(shutdown_timeout).await {
                Ok(timeout) => Self::shutdown(timeout),
                Err(error) => mouth_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for shutdown signals",
                ),
            }
        });
    }

    /// Returns a [handle](ShutdownHandle) to receive shutdown notifications.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle::from_receiver(SHUTDOWN.subscribe())
    }

    /// Broadcasts a shutdown to all services without waiting for a signal.
    pub fn shutdown(timeout: Option<Duration>) {
        SHUTDOWN.send_replace(Some(Shutdown { timeout }));
    }
}

#[cfg(unix)]
async fn monitor_signals(timeout: Duration) -> io::Result<Option<Duration>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    Ok(tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            mouth_log::info!("SIGINT received, stopping in {}s", timeout.as_secs());
            Some(timeout)
        },
        Some(()) = sig_quit.recv() => {
            mouth_log::info!("SIGQUIT received, exiting");
            None
        },
        Some(()) = sig_term.recv() => {
            mouth_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
            Some(timeout)
        },
    })
}

#[cfg(not(unix))]
async fn monitor_signals(timeout: Duration) -> io::Result<Option<Duration>> {
    tokio::signal::ctrl_c().await?;
    mouth_log::info!("CTRL-C received, stopping in {}s", timeout.as_secs());
    Ok(Some(timeout))
}
