//! Delivery of coordinator output to the host.

use crate::protocol::{decode_data_url, Outbound, ProtocolError};
use futures::channel::mpsc::UnboundedSender;
use lucent_core::{BoxFuture, MemoryScene, SceneError};
use std::cell::RefCell;
use thiserror::Error;

/// Write-back errors.
#[derive(Debug, Error)]
pub enum WriteBackError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("Write-back channel closed")]
    Closed,
}

/// Receives everything the coordinator emits.
pub trait WriteBack {
    fn deliver(&self, message: Outbound) -> BoxFuture<'_, Result<(), WriteBackError>>;
}

/// Forward messages to another task.
impl WriteBack for UnboundedSender<Outbound> {
    fn deliver(&self, message: Outbound) -> BoxFuture<'_, Result<(), WriteBackError>> {
        Box::pin(async move { self.unbounded_send(message).map_err(|_| WriteBackError::Closed) })
    }
}

/// Apply baked frames as image fills.
impl WriteBack for MemoryScene {
    fn deliver(&self, message: Outbound) -> BoxFuture<'_, Result<(), WriteBackError>> {
        Box::pin(async move {
            match message {
                Outbound::ImageCaptured(captured) => {
                    let image = decode_data_url(&captured.bitmap)?;
                    log::debug!(
                        "Applying {}x{} fill to {}",
                        image.width(),
                        image.height(),
                        captured.node
                    );
                    self.set_fill_image(captured.node, image)?;
                }
                Outbound::Placeholder { node } => log::debug!("Placeholder for {}", node),
                Outbound::RenderFailed { node, reason } => {
                    log::warn!("Render failed for {:?}: {}", node, reason)
                }
                Outbound::SelectionSummary { shapes, .. } => {
                    log::info!("{} glass elements selected", shapes.count)
                }
                Outbound::Notify { message } => log::info!("{}", message),
            }
            Ok(())
        })
    }
}

/// Records every message before passing it on.
pub struct Recorder<'a, W: WriteBack + ?Sized> {
    inner: &'a W,
    delivered: RefCell<Vec<Outbound>>,
}

impl<'a, W: WriteBack + ?Sized> Recorder<'a, W> {
    pub fn new(inner: &'a W) -> Self {
        Self {
            inner,
            delivered: RefCell::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<Outbound> {
        self.delivered.borrow().clone()
    }

    /// Text of every notification, in order.
    pub fn notifications(&self) -> Vec<String> {
        self.delivered
            .borrow()
            .iter()
            .filter_map(|m| match m {
                Outbound::Notify { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<W: WriteBack + ?Sized> WriteBack for Recorder<'_, W> {
    fn deliver(&self, message: Outbound) -> BoxFuture<'_, Result<(), WriteBackError>> {
        self.delivered.borrow_mut().push(message.clone());
        self.inner.deliver(message)
    }
}
