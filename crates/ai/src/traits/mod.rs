mod image_caption;

use crate::{
    loader::{ModelFuture, ModelLoader},
    HandlerPayload,
};
use futures::Future;
pub use image_caption::*;
use std::{fmt, time::Duration};
use tokio::sync::{mpsc, oneshot};

/// A model that turns one item into one output.
///
/// Implementations are driven by [`AIModel`], which calls `process` for one item at a
/// time on a dedicated worker thread.
pub trait Model {
    type Item;
    type Output;

    fn process(
        &mut self,
        item: Self::Item,
    ) -> impl Future<Output = anyhow::Result<Self::Output>> + Send;
}

pub type BatchHandlerTx<Item, Output> = mpsc::Sender<HandlerPayload<Item, Output>>;

/// Handle to a model running on its own worker thread.
///
/// The model is created on the first request, kept for later requests and offloaded
/// after `offload_duration` without requests (never, when `None`). Once every handle is
/// dropped the worker offloads the model and exits.
pub struct AIModel<TItem, TOutput> {
    model_id: String, // for better logging
    tx: BatchHandlerTx<TItem, TOutput>,
}

impl<TItem, TOutput> Clone for AIModel<TItem, TOutput> {
    fn clone(&self) -> Self {
        Self {
            model_id: self.model_id.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<TItem, TOutput> fmt::Debug for AIModel<TItem, TOutput> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AIModel")
            .field("model_id", &self.model_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<TItem, TOutput> AIModel<TItem, TOutput>
where
    TItem: Send + 'static,
    TOutput: Send + 'static,
{
    pub fn new<T, TFut, TFn>(
        model_id: impl Into<String>,
        create_model: TFn,
        offload_duration: Option<Duration>,
    ) -> anyhow::Result<Self>
    where
        T: Model<Item = TItem, Output = TOutput> + Send + 'static,
        TFut: Future<Output = anyhow::Result<T>> + Send + 'static,
        TFn: Fn() -> TFut + Send + 'static,
    {
        let model_id = model_id.into();
        let mut loader = ModelLoader::new(move || Box::pin(create_model()) as ModelFuture<T>);
        let (tx, mut rx) = mpsc::channel::<HandlerPayload<TItem, TOutput>>(16);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let worker_model_id = model_id.clone();
        std::thread::Builder::new()
            .name(format!("model-{}", model_id))
            .spawn(move || {
                rt.block_on(async move {
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(offload_duration.unwrap_or_default()),
                                if offload_duration.is_some() && loader.is_loaded() =>
                            {
                                tracing::debug!(
                                    model_id = %worker_model_id,
                                    "no request received for {:?}, offload model",
                                    offload_duration
                                );
                                loader.offload();
                            }
                            payload = rx.recv() => {
                                let Some((item, mut result_tx)) = payload else {
                                    // every handle has been dropped
                                    tracing::debug!(model_id = %worker_model_id, "all handles dropped, shutting down");
                                    loader.offload();
                                    break;
                                };

                                // The caller gave up on this request (timeout or cancellation),
                                // nobody is waiting for the result.
                                if result_tx.is_closed() {
                                    tracing::debug!(model_id = %worker_model_id, "request dropped before processing");
                                    continue;
                                }

                                let request = async {
                                    match loader.get().await {
                                        Ok(model) => model.process(item).await,
                                        Err(e) => {
                                            tracing::error!(model_id = %worker_model_id, "failed to load model: {:#}", e);
                                            Err(e.context("failed to load model"))
                                        }
                                    }
                                };

                                // drop the item once its caller stops waiting
                                let result = tokio::select! {
                                    result = request => result,
                                    _ = result_tx.closed() => {
                                        tracing::debug!(model_id = %worker_model_id, "request abandoned while processing");
                                        continue;
                                    }
                                };

                                if result_tx.send(result).is_err() {
                                    tracing::warn!(model_id = %worker_model_id, "caller went away, result discarded");
                                }
                            }
                        }
                    }
                });
            })?;

        Ok(Self { model_id, tx })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[tracing::instrument(name = "AIModel::process", err(Debug), skip_all, fields(model_id=%self.model_id))]
    pub async fn process(&self, item: TItem) -> anyhow::Result<TOutput> {
        let (result_tx, result_rx) = oneshot::channel();
        if self.tx.send((item, result_tx)).await.is_err() {
            anyhow::bail!("model worker {} is not running", self.model_id);
        }

        match result_rx.await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("model worker {} dropped the request", self.model_id),
        }
    }
}
