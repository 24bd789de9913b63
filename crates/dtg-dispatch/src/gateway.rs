//! The serialized execution context: one task owns the digital twin and
//! applies type-erased commands from a channel, so twin mutations never
//! interleave no matter how many requests are in flight.

use dtg_twin::DigitalTwin;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::DispatchError;

type Command = Box<dyn FnOnce(&mut dyn DigitalTwin) + Send>;

/// Clonable handle submitting work to the gateway task.
///
/// Commands are applied strictly in submission order. Once every handle is
/// dropped the channel closes and the task exits; late submissions surface
/// as [`DispatchError::GatewayClosed`].
#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl GatewayHandle {
    /// Spawn the gateway task taking ownership of `twin`.
    pub fn spawn(twin: Box<dyn DigitalTwin>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let task = tokio::spawn(async move {
            let mut twin = twin;
            while let Some(command) = rx.recv().await {
                command(twin.as_mut());
            }
            tracing::debug!("gateway context stopped");
        });
        (Self { tx }, task)
    }

    /// Run `f` on the gateway task and await its result.
    pub async fn execute<R, F>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&mut dyn DigitalTwin) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel();
        let command: Command = Box::new(move |twin| {
            // The caller may have gone away; that must not kill the loop.
            let _ = resp_tx.send(f(twin));
        });
        self.tx
            .send(command)
            .map_err(|_| DispatchError::GatewayClosed)?;
        resp_rx.await.map_err(|_| DispatchError::GatewayClosed)
    }
}
