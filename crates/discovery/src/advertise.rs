//! Service advertisement.
//!
//! The node advertises `_nmos-node._tcp` with its `ver_*` change counters;
//! a registry built on the same crates would advertise the registration
//! and query services. Registration advertisements use both the modern
//! and legacy service names while versions below v1.3 are supported.

use std::collections::HashMap;

use parking_lot::Mutex;

use nmos_domain::api_version::V1_3;
use nmos_domain::{Result, Settings};

use crate::service::{service_name, ServiceType};
use crate::txt::{make_txt_records, TxtRecords};

/// Narrow seam over the DNS-SD advertiser backend. Calls are idempotent
/// with respect to the underlying daemon.
pub trait ServiceAdvertise: Send + Sync {
    fn register_service(
        &self,
        instance: &str,
        service: ServiceType,
        port: u16,
        domain: &str,
        host: &str,
        txt: &TxtRecords,
    ) -> Result<()>;

    fn update_record(
        &self,
        instance: &str,
        service: ServiceType,
        domain: &str,
        txt: &TxtRecords,
    ) -> Result<()>;
}

/// Register `service` per the settings, including the dual-name rule for
/// the Registration API during the v1.2 to v1.3 transition.
pub fn register_service(
    advertiser: &dyn ServiceAdvertise,
    service: ServiceType,
    settings: &Settings,
    extra_txt: &TxtRecords,
) -> Result<()> {
    let instance = service_name(service, settings);
    let port = service.port(settings);
    let api_ver = nmos_domain::api_version::is04_versions();
    let mut txt = make_txt_records(service, settings.pri, &api_ver, "http");
    txt.extend(extra_txt.iter().cloned());

    if matches!(service, ServiceType::Register | ServiceType::Registration) {
        // Lowest supported version below v1.3 keeps the legacy name alive.
        let lowest = api_ver.first().copied();
        if settings.advertise_legacy_registration && lowest.is_some_and(|v| v < V1_3) {
            advertiser.register_service(
                &instance,
                ServiceType::Registration,
                port,
                &settings.domain,
                &settings.host_name,
                &txt,
            )?;
        }
        advertiser.register_service(
            &instance,
            ServiceType::Register,
            port,
            &settings.domain,
            &settings.host_name,
            &txt,
        )
    } else {
        advertiser.register_service(
            &instance,
            service,
            port,
            &settings.domain,
            &settings.host_name,
            &txt,
        )
    }
}

/// Refresh the TXT records of an already-registered service.
pub fn update_service(
    advertiser: &dyn ServiceAdvertise,
    service: ServiceType,
    settings: &Settings,
    extra_txt: &TxtRecords,
) -> Result<()> {
    let instance = service_name(service, settings);
    let api_ver = nmos_domain::api_version::is04_versions();
    let mut txt = make_txt_records(service, settings.pri, &api_ver, "http");
    txt.extend(extra_txt.iter().cloned());
    advertiser.update_record(&instance, service, &settings.domain, &txt)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// mDNS backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MdnsAdvertiser {
    daemon: mdns_sd::ServiceDaemon,
    host_address: String,
    /// fullname → last registered info, so updates can re-register.
    registered: Mutex<HashMap<String, (ServiceType, u16)>>,
}

impl MdnsAdvertiser {
    pub fn new(host_address: &str) -> Result<Self> {
        let daemon = mdns_sd::ServiceDaemon::new().map_err(|e| {
            nmos_domain::Error::TransientNetwork(format!("mdns daemon: {e}"))
        })?;
        Ok(MdnsAdvertiser {
            daemon,
            host_address: host_address.to_string(),
            registered: Mutex::new(HashMap::new()),
        })
    }

    fn publish(
        &self,
        instance: &str,
        service: ServiceType,
        port: u16,
        domain: &str,
        host: &str,
        txt: &TxtRecords,
    ) -> Result<()> {
        let service_type = format!("{}.{}", service.dns_name(), domain);
        let host_name = if host.is_empty() {
            format!("{}.{}", instance, domain)
        } else {
            format!("{}.{}", host, domain)
        };
        let properties: HashMap<String, String> = txt.iter().cloned().collect();
        let info = mdns_sd::ServiceInfo::new(
            &service_type,
            instance,
            &host_name,
            self.host_address.as_str(),
            port,
            properties,
        )
        .map_err(|e| nmos_domain::Error::Validation(format!("service info: {e}")))?;

        self.daemon
            .register(info)
            .map_err(|e| nmos_domain::Error::TransientNetwork(format!("mdns register: {e}")))?;
        self.registered
            .lock()
            .insert(format!("{instance}.{service_type}"), (service, port));
        Ok(())
    }
}

impl ServiceAdvertise for MdnsAdvertiser {
    fn register_service(
        &self,
        instance: &str,
        service: ServiceType,
        port: u16,
        domain: &str,
        host: &str,
        txt: &TxtRecords,
    ) -> Result<()> {
        self.publish(instance, service, port, domain, host, txt)
    }

    fn update_record(
        &self,
        instance: &str,
        service: ServiceType,
        domain: &str,
        txt: &TxtRecords,
    ) -> Result<()> {
        // The daemon treats re-registration of the same fullname as an
        // update, which is all the TXT refresh needs.
        let key = format!("{}.{}.{}", instance, service.dns_name(), domain);
        let port = match self.registered.lock().get(&key) {
            Some((_, port)) => *port,
            None => return Err(nmos_domain::Error::NotFound(key)),
        };
        self.publish(instance, service, port, domain, "", txt)
    }
}
