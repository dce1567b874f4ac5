use std::fmt::Debug;
use tracing::warn;

/// Abstraction over a channel transmitter, following `barter_integration::channel::Tx`.
///
/// Letting callers be generic over `Tx` means `SessionManager`, `CacheAndPublisher` and
/// friends don't need to know whether they're forwarding events to a real `mpsc` channel
/// or a test double.
pub trait Tx
where
    Self: Debug + Clone + Send,
{
    type Item;
    type Error: Debug;

    fn send<Item: Into<Self::Item>>(&self, item: Item) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct UnboundedTx<T> {
    tx: tokio::sync::mpsc::UnboundedSender<T>,
}

impl<T> UnboundedTx<T> {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

impl<T> Tx for UnboundedTx<T>
where
    T: Debug + Clone + Send,
{
    type Item = T;
    type Error = tokio::sync::mpsc::error::SendError<T>;

    fn send<Item: Into<Self::Item>>(&self, item: Item) -> Result<(), Self::Error> {
        self.tx.send(item.into())
    }
}

pub fn mpsc_unbounded<T>() -> (UnboundedTx<T>, tokio::sync::mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (UnboundedTx::new(tx), rx)
}

/// A [`Tx`] wrapper that silently disables itself once the receiver has been dropped,
/// logging once rather than on every subsequent send. Used by long-running publishers
/// so a gone consumer never turns into a hot error-log loop.
#[derive(Debug, Clone)]
pub struct ChannelTxDroppable<ChannelTx> {
    state: ChannelState<ChannelTx>,
}

#[derive(Debug, Clone)]
enum ChannelState<Tx> {
    Active(Tx),
    Disabled,
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx> {
    pub fn new(tx: ChannelTx) -> Self {
        Self {
            state: ChannelState::Active(tx),
        }
    }
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx>
where
    ChannelTx: Tx,
{
    pub fn send(&mut self, item: ChannelTx::Item) {
        let ChannelState::Active(tx) = &self.state else {
            return;
        };

        if tx.send(item).is_err() {
            let name = std::any::type_name::<ChannelTx::Item>();
            warn!(name, "channel receiver dropped - items will no longer be sent");
            self.state = ChannelState::Disabled;
        }
    }
}
