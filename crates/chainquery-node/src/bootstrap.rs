//! One-shot store seeding.

use async_trait::async_trait;

use chainquery_core::context::PersistenceContext;
use chainquery_core::error::IndexerError;

/// Seeds the store with initial entities, e.g. genesis balances.
///
/// Writes go through the context and are committed in one batch; an error
/// leaves the store untouched.
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    fn name(&self) -> &str;

    async fn bootstrap(&self, ctx: &mut PersistenceContext) -> Result<(), IndexerError>;
}
