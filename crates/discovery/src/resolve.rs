//! Browse, filter, and rank service instances.
//!
//! Ranking follows the registered-operation rules: filter out instances
//! with the wrong protocol, no common API version, or an out-of-band
//! priority; then order highest version first and lowest `pri` first,
//! optionally shuffling beforehand so equal-priority instances are picked
//! at random.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use nmos_domain::ApiVersion;

use crate::service::ServiceType;
use crate::txt::{self, TxtRecords};

/// One browse hit, resolved to its addresses and TXT records.
#[derive(Debug, Clone)]
pub struct DiscoveredInstance {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub txt: TxtRecords,
    pub ip_addresses: Vec<IpAddr>,
}

/// Narrow seam over the DNS-SD browser backend.
#[async_trait]
pub trait ServiceBrowse: Send + Sync {
    /// Browse `service` in `browse_domain` until the deadline or
    /// cancellation, returning every instance resolved so far.
    async fn browse(
        &self,
        service: ServiceType,
        browse_domain: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredInstance>;
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// API versions the caller can speak, ascending.
    pub api_versions: Vec<ApiVersion>,
    /// Inclusive `pri` band accepted for non-node services.
    pub priorities: (u32, u32),
    /// Shuffle before the stable sort, to break priority ties randomly.
    pub randomize: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            api_versions: nmos_domain::api_version::is04_versions(),
            priorities: (0, txt::NO_PRIORITY - 1),
            randomize: true,
        }
    }
}

/// Browse for `service` and return ranked API base URIs, best first.
pub async fn resolve_service(
    browser: &dyn ServiceBrowse,
    service: ServiceType,
    browse_domain: &str,
    options: &ResolveOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<String> {
    let deadline = Instant::now() + timeout;
    let instances = browser.browse(service, browse_domain, deadline, cancel).await;
    rank_candidates(instances, service, options)
}

/// The pure half of `resolve_service`: filter, shuffle, stable-sort.
pub fn rank_candidates(
    instances: Vec<DiscoveredInstance>,
    service: ServiceType,
    options: &ResolveOptions,
) -> Vec<String> {
    let required: BTreeSet<ApiVersion> = options.api_versions.iter().copied().collect();

    // (api_ver, pri, uri) per reachable address.
    let mut results: Vec<(ApiVersion, u32, String)> = Vec::new();

    for instance in instances {
        // Ignore results with unsuitable priorities, so development and
        // live systems don't collide. Node advertisements carry no pri.
        let pri = txt::parse_pri_record(&instance.txt);
        if service != ServiceType::Node {
            let (lo, hi) = options.priorities;
            if pri < lo || pri > hi {
                continue;
            }
        }

        // HTTP only, for now.
        if txt::parse_api_proto_record(&instance.txt) != "http" {
            continue;
        }

        // Highest version both sides support.
        let advertised = txt::parse_api_ver_record(&instance.txt);
        let Some(version) = advertised
            .iter()
            .rev()
            .find(|v| required.contains(v))
            .copied()
        else {
            continue;
        };

        for ip in &instance.ip_addresses {
            results.push((
                version,
                pri,
                format!("http://{}:{}/x-nmos/{}/{}", ip, instance.port, service.api(), version),
            ));
        }
    }

    if options.randomize {
        results.shuffle(&mut rand::thread_rng());
    }

    // Higher version first; within a version, lower pri first. The sort
    // is stable so the shuffle decides ties.
    results.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    results.into_iter().map(|(_, _, uri)| uri).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// mDNS backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// [`ServiceBrowse`] over an `mdns-sd` daemon.
pub struct MdnsBrowser {
    daemon: mdns_sd::ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new() -> nmos_domain::Result<Self> {
        let daemon = mdns_sd::ServiceDaemon::new()
            .map_err(|e| nmos_domain::Error::TransientNetwork(format!("mdns daemon: {e}")))?;
        Ok(MdnsBrowser { daemon })
    }
}

#[async_trait]
impl ServiceBrowse for MdnsBrowser {
    async fn browse(
        &self,
        service: ServiceType,
        browse_domain: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredInstance> {
        let service_type = format!("{}.{}", service.dns_name(), browse_domain);
        let receiver = match self.daemon.browse(&service_type) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(service = %service_type, error = %e, "mdns browse failed");
                return Vec::new();
            }
        };

        let cancel = cancel.clone();
        let collected = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let budget = (deadline - now).min(Duration::from_millis(250));
                match receiver.recv_timeout(budget) {
                    Ok(mdns_sd::ServiceEvent::ServiceResolved(info)) => {
                        found.push(DiscoveredInstance {
                            name: info.get_fullname().to_string(),
                            host: info.get_hostname().to_string(),
                            port: info.get_port(),
                            txt: info
                                .get_properties()
                                .iter()
                                .map(|p| (p.key().to_string(), p.val_str().to_string()))
                                .collect(),
                            ip_addresses: info.get_addresses().iter().copied().collect(),
                        });
                    }
                    Ok(_) => {}
                    // Timed out or daemon gone; the deadline check above
                    // bounds either way.
                    Err(_) => std::thread::sleep(Duration::from_millis(20)),
                }
            }
            found
        })
        .await
        .unwrap_or_default();

        if let Err(e) = self.daemon.stop_browse(&service_type) {
            tracing::debug!(service = %service_type, error = %e, "stop_browse");
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmos_domain::api_version::{V1_2, V1_3};

    fn instance(port: u16, api_ver: &str, pri: Option<u32>, proto: &str) -> DiscoveredInstance {
        let mut txt = vec![
            (txt::API_PROTO.to_string(), proto.to_string()),
            (txt::API_VER.to_string(), api_ver.to_string()),
        ];
        if let Some(p) = pri {
            txt.push((txt::PRI.to_string(), p.to_string()));
        }
        DiscoveredInstance {
            name: format!("reg-{port}"),
            host: "reg.local.".into(),
            port,
            txt,
            ip_addresses: vec!["127.0.0.1".parse().unwrap()],
        }
    }

    fn options() -> ResolveOptions {
        ResolveOptions {
            api_versions: vec![V1_2, V1_3],
            priorities: (0, 100),
            randomize: false,
        }
    }

    #[test]
    fn ranking_prefers_higher_version_then_lower_pri() {
        let candidates = vec![
            instance(8001, "v1.0,v1.2", Some(10), "http"),
            instance(8002, "v1.0,v1.2,v1.3", Some(100), "http"),
            instance(8003, "v1.0,v1.2,v1.3", Some(10), "http"),
        ];
        let ranked = rank_candidates(candidates, ServiceType::Register, &options());
        assert_eq!(
            ranked,
            vec![
                "http://127.0.0.1:8003/x-nmos/registration/v1.3",
                "http://127.0.0.1:8002/x-nmos/registration/v1.3",
                "http://127.0.0.1:8001/x-nmos/registration/v1.2",
            ]
        );
    }

    #[test]
    fn wrong_protocol_is_filtered() {
        let ranked = rank_candidates(
            vec![instance(8001, "v1.3", Some(10), "https")],
            ServiceType::Register,
            &options(),
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn disjoint_versions_are_filtered() {
        let ranked = rank_candidates(
            vec![instance(8001, "v2.0", Some(10), "http")],
            ServiceType::Register,
            &options(),
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn out_of_band_priority_is_filtered() {
        let mut opts = options();
        opts.priorities = (0, 99);
        let ranked = rank_candidates(
            vec![
                instance(8001, "v1.3", Some(100), "http"),
                instance(8002, "v1.3", Some(99), "http"),
            ],
            ServiceType::Register,
            &opts,
        );
        assert_eq!(ranked, vec!["http://127.0.0.1:8002/x-nmos/registration/v1.3"]);
    }

    #[test]
    fn node_browsing_ignores_missing_pri() {
        let ranked = rank_candidates(
            vec![instance(3212, "v1.3", None, "http")],
            ServiceType::Node,
            &options(),
        );
        assert_eq!(ranked, vec!["http://127.0.0.1:3212/x-nmos/node/v1.3"]);
    }

    #[test]
    fn multi_address_resolution_yields_one_uri_per_ip() {
        let mut inst = instance(8001, "v1.3", Some(10), "http");
        inst.ip_addresses = vec!["127.0.0.1".parse().unwrap(), "10.0.0.9".parse().unwrap()];
        let ranked = rank_candidates(vec![inst], ServiceType::Register, &options());
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn picks_highest_common_version_not_highest_advertised() {
        let mut opts = options();
        opts.api_versions = vec![V1_2];
        let ranked = rank_candidates(
            vec![instance(8001, "v1.2,v1.3", Some(10), "http")],
            ServiceType::Register,
            &opts,
        );
        assert_eq!(ranked, vec!["http://127.0.0.1:8001/x-nmos/registration/v1.2"]);
    }
}
