type Notify = tokio::sync::broadcast::Receiver<()>;

/// Listens for the process shutdown signal.
///
/// Shutdown is signalled with a `broadcast` channel: only a single value is
/// ever sent, and dropping the sender also wakes every listener. Each
/// long-running task (scheduler, command handler, MQTT connection) holds its
/// own `Shutdown` and selects on `recv()` at its suspension points.
#[derive(Debug)]
pub(crate) struct Shutdown {
    /// `true` once the shutdown signal has been received.
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: Notify,
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            shutdown: self.shutdown,
            notify: self.notify.resubscribe(),
        }
    }
}

impl Shutdown {
    pub(crate) fn new(notify: Notify) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub(crate) async fn recv(&mut self) {
        if self.is_shutdown() {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        self.shutdown = true;
    }
}

impl From<Notify> for Shutdown {
    fn from(notify: Notify) -> Self {
        Self::new(notify)
    }
}
