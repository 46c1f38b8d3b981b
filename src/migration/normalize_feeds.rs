use futures::future::BoxFuture;
use serde_json::Value;
use tracing::info;

use super::Migration;
use crate::store::{DocumentKey, DocumentStore};
use crate::version::Version;

/// 1.0.0 stored feeds without sync metadata. Adds `category`, `status` and
/// `lastUpdated` to every feed that lacks them, leaving existing values alone.
pub struct NormalizeFeedFields;

impl NormalizeFeedFields {
    fn normalize(feeds: &mut [Value]) -> bool {
        let mut changed = false;
        for feed in feeds.iter_mut() {
            let Some(fields) = feed.as_object_mut() else {
                continue;
            };
            for (name, default) in [
                ("category", Value::String(String::new())),
                ("status", Value::String("unknown".to_string())),
                ("lastUpdated", Value::Null),
            ] {
                if !fields.contains_key(name) {
                    fields.insert(name.to_string(), default);
                    changed = true;
                }
            }
        }
        changed
    }
}

impl Migration for NormalizeFeedFields {
    fn from_version(&self) -> Version {
        Version::new(1, 0, 0)
    }

    fn to_version(&self) -> Version {
        Version::new(1, 1, 0)
    }

    fn apply<'a>(&'a self, store: &'a DocumentStore) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut document = store.read(&DocumentKey::Feeds).await?;
            let Some(feeds) = document.as_array_mut() else {
                anyhow::bail!("feeds document is not a list");
            };

            if Self::normalize(feeds) {
                store.write(&DocumentKey::Feeds, &document).await?;
                info!("Added missing sync fields to feeds");
            } else {
                info!("No changes needed in feeds");
            }
            Ok(())
        })
    }
}
