use nmos_domain::Settings;

/// The NMOS service types this node browses or advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Node,
    /// Registration API, v1.3+ name.
    Register,
    /// Registration API, legacy name for v1.2 and below.
    Registration,
    Query,
}

impl ServiceType {
    /// The DNS-SD service type string.
    pub fn dns_name(&self) -> &'static str {
        match self {
            ServiceType::Node => "_nmos-node._tcp",
            ServiceType::Register => "_nmos-register._tcp",
            ServiceType::Registration => "_nmos-registration._tcp",
            ServiceType::Query => "_nmos-query._tcp",
        }
    }

    /// The API path segment served by instances of this type. Both
    /// registration service names point at the same Registration API.
    pub fn api(&self) -> &'static str {
        match self {
            ServiceType::Node => "node",
            ServiceType::Register | ServiceType::Registration => "registration",
            ServiceType::Query => "query",
        }
    }

    pub fn port(&self, settings: &Settings) -> u16 {
        match self {
            ServiceType::Node => settings.node_port(),
            ServiceType::Register | ServiceType::Registration => settings.registration_port(),
            ServiceType::Query => settings.query_port(),
        }
    }
}

/// Instance name for an advertised service:
/// `nmos-node_<api>_<host>:<port>` with `.` replaced by `-`, since some
/// DNS-SD implementations dislike dots in instance names.
pub fn service_name(service: ServiceType, settings: &Settings) -> String {
    format!(
        "nmos-node_{}_{}:{}",
        service.api(),
        settings.host_address,
        service.port(settings)
    )
    .replace('.', "-")
}
