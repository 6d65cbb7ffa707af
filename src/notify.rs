use crate::types::{Article, Visibility};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Outbound notification seam for finished articles.
///
/// Delivery is fire-and-forget: a sink must not fail the pipeline run, so the
/// method is infallible and implementations swallow their own errors.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, article: &Article, scope: Visibility, owner: Option<Uuid>);
}

/// Default sink: announces publication through the log stream.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish(&self, article: &Article, scope: Visibility, owner: Option<Uuid>) {
        match scope {
            Visibility::Public => {
                info!("Published article '{}' ({})", article.title, article.slug);
            }
            Visibility::Private => {
                info!(
                    "Published private article '{}' ({}) for owner {:?}",
                    article.title, article.slug, owner
                );
            }
        }
    }
}
