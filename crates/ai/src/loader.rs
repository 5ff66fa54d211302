use crate::Model;
use futures::Future;
use std::pin::Pin;
use tracing::debug;

pub(crate) type ModelFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// Lazily creates the model on first use and drops it on `offload`.
///
/// Owned by the model worker thread, so no locking is needed around the model.
pub(crate) struct ModelLoader<T>
where
    T: Model,
{
    model: Option<T>,
    create_model_fn: Box<dyn Fn() -> ModelFuture<T> + Send>,
}

impl<T> ModelLoader<T>
where
    T: Model,
{
    pub fn new<F>(create_model: F) -> Self
    where
        F: Fn() -> ModelFuture<T> + Send + 'static,
    {
        Self {
            model: None,
            create_model_fn: Box::new(create_model),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Returns the loaded model, creating it if it has not been loaded yet.
    pub async fn get(&mut self) -> anyhow::Result<&mut T> {
        if self.model.is_none() {
            debug!("loading model");
            let model = (self.create_model_fn)().await?;
            self.model = Some(model);
        }

        self.model
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("model is not loaded"))
    }

    pub fn offload(&mut self) {
        if self.model.take().is_some() {
            debug!("model offloaded");
        }
    }
}
