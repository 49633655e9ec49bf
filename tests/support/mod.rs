//! Scripted sources and builders shared by the behavior suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use terpstock_core::{
    AdapterFuture, DispensaryId, Extractor, IngestionOrchestrator, IngestionService, MappingTable,
    ObjectStore, Product, RetryPolicy, SourceAdapter, SourceError, SourcePolicy, SourceRuntime,
    StoreEnumeration, StoreFetch, StoreRef, UtcDateTime,
};

#[derive(Debug, Clone)]
pub struct MenuItem {
    pub batch: Option<String>,
    pub strain: String,
    pub category: String,
    pub description: Option<String>,
}

/// In-process source that serves a fixed menu to every store.
pub struct ScriptedAdapter {
    id: DispensaryId,
    stores: Vec<StoreRef>,
    menu: Vec<MenuItem>,
    blocked_stores: Vec<String>,
    blocked: Arc<AtomicBool>,
    hang: bool,
    fetches: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: DispensaryId, store_ids: &[&str]) -> Self {
        let stores = store_ids
            .iter()
            .map(|store_id| {
                StoreRef::new(*store_id)
                    .expect("store id is not blank")
                    .with_name(format!("{id} {store_id}"))
            })
            .collect();
        Self {
            id,
            stores,
            menu: Vec::new(),
            blocked_stores: Vec::new(),
            blocked: Arc::new(AtomicBool::new(false)),
            hang: false,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_item(mut self, batch: Option<&str>, strain: &str) -> Self {
        self.menu.push(MenuItem {
            batch: batch.map(str::to_owned),
            strain: strain.to_owned(),
            category: String::from("Flower"),
            description: None,
        });
        self
    }

    pub fn with_described_item(mut self, batch: &str, strain: &str, description: &str) -> Self {
        self.menu.push(MenuItem {
            batch: Some(batch.to_owned()),
            strain: strain.to_owned(),
            category: String::from("Flower"),
            description: Some(description.to_owned()),
        });
        self
    }

    /// Answers 403 for one store, which trips the source's circuit.
    pub fn blocking_store(mut self, store_id: &str) -> Self {
        self.blocked_stores.push(store_id.to_owned());
        self
    }

    /// Never answers within any reasonable source budget.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Switch that makes every store answer 403 while set.
    pub fn block_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.blocked)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> DispensaryId {
        self.id
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::StaticList
    }

    fn categories(&self) -> Vec<String> {
        vec![String::from("Flower")]
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(async move { Ok(self.stores.clone()) })
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.blocked.load(Ordering::SeqCst) || self.blocked_stores.contains(&store.id) {
                return Err(SourceError::blocked(format!("store {} answered 403", store.id)));
            }

            let fetched_at = UtcDateTime::now();
            let products = self
                .menu
                .iter()
                .map(|item| {
                    Product::new(self.id, &store.id, format!("{} 3.5g", item.strain), fetched_at)
                        .with_category(Some(item.category.clone()))
                        .with_batch_code(item.batch.clone())
                        .with_strain_name(Some(item.strain.clone()))
                        .with_description(item.description.clone())
                })
                .collect();
            Ok(StoreFetch::new(products, 0))
        })
    }
}

/// No pacing, no retries, sequential stores, short source budget.
pub fn fast_policy(id: DispensaryId) -> SourcePolicy {
    SourcePolicy {
        max_concurrency: 1,
        min_request_delay: Duration::ZERO,
        max_request_delay: Duration::ZERO,
        retry: RetryPolicy::no_retry(),
        timeout: Duration::from_secs(5),
        ..SourcePolicy::standard(id)
    }
}

/// Runtime that reads `batch_code` and `strain_name` regardless of source.
pub fn runtime(adapter: Arc<ScriptedAdapter>) -> SourceRuntime {
    let id = adapter.id();
    SourceRuntime::new(
        adapter,
        fast_policy(id),
        Extractor::new(MappingTable::default_for(DispensaryId::Muv)),
    )
}

pub fn runtime_with_timeout(adapter: Arc<ScriptedAdapter>, timeout: Duration) -> SourceRuntime {
    let mut source = runtime(adapter);
    source.policy.timeout = timeout;
    source
}

pub fn service(sources: Vec<SourceRuntime>, store: Arc<dyn ObjectStore>) -> IngestionService {
    IngestionService::new(IngestionOrchestrator::new(sources, 4), store)
}
