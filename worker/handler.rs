//! Handler capability interface (§9 "Handler capabilities"): the job runtime queries
//! capabilities on a trait object rather than reflecting on user code.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::PerformError;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Used for the `jobs:stat:<presentation>`/leaderboard keys (§4.6).
    fn presentation(&self) -> String {
        "default".to_string()
    }

    /// Uniqueness signature for this invocation's `data`, if this handler opts into
    /// the mutex-signature admission control (§4.3). `None` means no uniqueness check.
    fn signature(&self, _data: &serde_json::Value) -> Option<String> {
        None
    }

    /// A pub/sub channel suffix (`bot-channel-<channel>`) output should also be
    /// forwarded to, if any.
    fn get_channel(&self) -> Option<String> {
        None
    }

    async fn set_up(&self, _data: &serde_json::Value) -> std::result::Result<(), PerformError> {
        Ok(())
    }

    async fn perform(
        &self,
        data: &serde_json::Value,
        ctx: &mut JobContext,
    ) -> std::result::Result<(), PerformError>;

    async fn tear_down(&self) -> std::result::Result<(), PerformError> {
        Ok(())
    }
}

/// Split a job's `class` on `@` into `(class, method)`, per §3's "class (handler name,
/// optionally suffixed `@method`)".
pub fn split_class(class: &str) -> (&str, Option<&str>) {
    match class.split_once('@') {
        Some((c, m)) => (c, Some(m)),
        None => (class, None),
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    pub fn register(&mut self, class: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(class.into(), handler);
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn JobHandler>> {
        let (base, _method) = split_class(class);
        self.handlers.get(base).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_class_and_method() {
        assert_eq!(split_class("Echo"), ("Echo", None));
        assert_eq!(split_class("Echo@run"), ("Echo", Some("run")));
    }
}
