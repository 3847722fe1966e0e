//! Session factory: how the pool creates session clients

use std::sync::Arc;

use async_trait::async_trait;

use crate::session::{SessionClient, SessionError, StubSessionClient};

/// Creates one session client per warming slot
///
/// The real implementation launches an isolated browser context for the
/// partition; tests inject [`StubSessionFactory`].
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a session for the given context and storage partition
    async fn create(&self, context_id: &str, partition_id: &str) -> Result<Arc<dyn SessionClient>, SessionError>;
}

type ConfigureFn = dyn Fn(&StubSessionClient) + Send + Sync;

/// Factory producing scripted stub sessions
///
/// An optional configure hook runs on every created stub, letting tests
/// script pages, crashes, and resource profiles per context.
pub struct StubSessionFactory {
    configure: Option<Box<ConfigureFn>>,
    created: std::sync::Mutex<Vec<String>>,
}

impl StubSessionFactory {
    pub fn new() -> Self {
        Self {
            configure: None,
            created: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Factory whose stubs are configured by the given hook
    pub fn with_configure(configure: impl Fn(&StubSessionClient) + Send + Sync + 'static) -> Self {
        Self {
            configure: Some(Box::new(configure)),
            created: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Context ids created so far (replacements appear twice)
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

impl Default for StubSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for StubSessionFactory {
    async fn create(&self, context_id: &str, _partition_id: &str) -> Result<Arc<dyn SessionClient>, SessionError> {
        let stub = StubSessionClient::new(context_id);
        if let Some(configure) = &self.configure {
            configure(&stub);
        }
        self.created.lock().unwrap().push(context_id.to_string());
        Ok(Arc::new(stub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_factory_creates_and_records() {
        let factory = StubSessionFactory::new();
        let client = factory.create("ghost-1", "part-1").await.unwrap();
        assert_eq!(client.current_url().await, "about:blank");
        assert_eq!(factory.created(), vec!["ghost-1"]);
    }

    #[tokio::test]
    async fn test_configure_hook_runs() {
        let factory = StubSessionFactory::with_configure(|stub| {
            stub.set_heap_bytes(7);
        });
        let client = factory.create("ghost-1", "part-1").await.unwrap();
        let sample = client.sample_resource_metrics().await.unwrap();
        assert_eq!(sample.heap_used_bytes, 7);
    }
}
