//! Glue between the bgtask and hub crates. Kept out of `clusterbus-hub`
//! itself so that crate never has to depend on `clusterbus-bgtask` —
//! only the node binary needs both.

use std::sync::Arc;

use async_trait::async_trait;
use clusterbus_bgtask::BgtaskManager;
use clusterbus_hub::RoutedEvent;
use clusterbus_hub::propagators::BgtaskLastDoneEventFetcher;
use uuid::Uuid;

pub struct BgtaskEventFetcher {
    manager: Arc<BgtaskManager>,
}

impl BgtaskEventFetcher {
    pub fn new(manager: Arc<BgtaskManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl BgtaskLastDoneEventFetcher for BgtaskEventFetcher {
    async fn fetch_last_finished_event(&self, task_id: Uuid) -> Option<Arc<dyn RoutedEvent>> {
        match self.manager.fetch_last_finished_event(task_id).await {
            Ok(Some(event)) => Some(Arc::new(event)),
            Ok(None) | Err(_) => None,
        }
    }
}
