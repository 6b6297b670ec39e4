//! Registry location: DNS-SD browse, or the configured override.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use nmos_discovery::{resolve_service, ResolveOptions, ServiceBrowse, ServiceType};
use nmos_domain::Settings;
use nmos_registration::RegistryLocator;

/// Browse timeout per discovery round.
const BROWSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Locates registries by browsing `_nmos-register._tcp`, falling back to
/// the legacy `_nmos-registration._tcp` name when nothing answers.
pub struct DiscoveryLocator {
    browser: Arc<dyn ServiceBrowse>,
    settings: Arc<RwLock<Settings>>,
}

impl DiscoveryLocator {
    pub fn new(browser: Arc<dyn ServiceBrowse>, settings: Arc<RwLock<Settings>>) -> Self {
        DiscoveryLocator { browser, settings }
    }

    fn options(&self) -> (String, ResolveOptions) {
        let settings = self.settings.read();
        (
            settings.domain.clone(),
            ResolveOptions {
                api_versions: nmos_domain::api_version::is04_versions(),
                priorities: (settings.highest_pri, settings.lowest_pri),
                randomize: true,
            },
        )
    }
}

#[async_trait]
impl RegistryLocator for DiscoveryLocator {
    async fn locate(&self, cancel: &CancellationToken) -> Vec<String> {
        let (domain, options) = self.options();
        let found = resolve_service(
            self.browser.as_ref(),
            ServiceType::Register,
            &domain,
            &options,
            BROWSE_TIMEOUT,
            cancel,
        )
        .await;
        if !found.is_empty() || cancel.is_cancelled() {
            return found;
        }
        // Nothing under the modern name; try the legacy one.
        resolve_service(
            self.browser.as_ref(),
            ServiceType::Registration,
            &domain,
            &options,
            BROWSE_TIMEOUT,
            cancel,
        )
        .await
    }
}
