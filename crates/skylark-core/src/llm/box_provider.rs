//! BoxLlmProvider -- object-safe dynamic dispatch wrapper for LlmProvider.
//!
//! 1. Define an object-safe `LlmProviderDyn` trait with boxed futures
//! 2. Blanket-impl `LlmProviderDyn` for all `T: LlmProvider`
//! 3. `BoxLlmProvider` wraps `Box<dyn LlmProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use skylark_types::llm::{GenerateRequest, LlmError};

use super::provider::LlmProvider;

/// Object-safe version of [`LlmProvider`] with boxed futures.
pub trait LlmProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;
}

impl<T: LlmProvider> LlmProviderDyn for T {
    fn name(&self) -> &str {
        LlmProvider::name(self)
    }

    fn default_model(&self) -> &str {
        LlmProvider::default_model(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        Box::pin(self.generate(request))
    }
}

/// Type-erased LLM provider, so components and plugins can share one
/// backend without carrying its concrete type.
pub struct BoxLlmProvider {
    inner: Box<dyn LlmProviderDyn + Send + Sync>,
}

impl BoxLlmProvider {
    pub fn new<T: LlmProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.inner.generate_boxed(request).await
    }
}

impl std::fmt::Debug for BoxLlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxLlmProvider")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LlmProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }

        async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
            Ok(format!("echo: {}", request.prompt))
        }
    }

    #[tokio::test]
    async fn boxed_provider_delegates() {
        let provider = BoxLlmProvider::new(Echo);
        assert_eq!(provider.name(), "echo");
        assert_eq!(provider.default_model(), "echo-1");
        let out = provider.generate(&GenerateRequest::new("hi")).await.unwrap();
        assert_eq!(out, "echo: hi");
    }
}
