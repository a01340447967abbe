//! Application state shared across request handlers.

use std::sync::Arc;

use crate::allocation::AllocationService;
use crate::auth::Credentials;
use crate::config::AppSettings;
use crate::mail::Mailer;
use crate::store::Store;

/// Shared application state, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    allocation: AllocationService,
    credentials: Credentials,
    mailer: Arc<dyn Mailer>,
    settings: AppSettings,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, settings: AppSettings) -> Self {
        let allocation = AllocationService::new(store.clone());
        let credentials = Credentials::new(&settings.jwt_secret);
        Self {
            inner: Arc::new(AppStateInner {
                store,
                allocation,
                credentials,
                mailer,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    pub fn allocation(&self) -> &AllocationService {
        &self.inner.allocation
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.inner.mailer.as_ref()
    }

    pub fn settings(&self) -> &AppSettings {
        &self.inner.settings
    }
}
