#[cfg(feature = "accelerate")]
extern crate accelerate_src;

mod loader;
mod traits;

pub mod device;
pub mod moondream;

pub use traits::*;

use tokio::sync::oneshot;

pub type HandlerPayload<TItem, TOutput> = (TItem, oneshot::Sender<anyhow::Result<TOutput>>);
