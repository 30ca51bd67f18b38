use async_trait::async_trait;

/// The fast-model call both extraction passes make. Kept narrow and
/// injected so this crate never depends on a concrete backend.
#[async_trait]
pub trait FastModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Option<String>;
}
