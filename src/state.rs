use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        matching::MatchingEngine, notifier::NotificationRegistry, rides::RideService,
        store::RideStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: RideStore,
    pub registry: NotificationRegistry,
    pub rides: RideService,
}

impl AppState {
    /// The registry is created by the caller so its lifetime is tied to the
    /// server run rather than to any one request.
    pub fn new(config: AppConfig, db: DbPool, registry: NotificationRegistry) -> Self {
        let store = RideStore::new(db);
        let matcher = MatchingEngine::new(store.clone(), registry.clone());
        let rides = RideService::new(store.clone(), matcher, registry.clone());
        Self {
            config,
            store,
            registry,
            rides,
        }
    }
}
