//! The NMOS TXT record schema, bit-exact for interoperability.
//!
//! | key         | format                               |
//! |-------------|--------------------------------------|
//! | `api_proto` | `http` or `https`, lowercase         |
//! | `api_ver`   | ascending, comma-separated, no space |
//! | `pri`       | integer; 100 = "do not use"          |
//! | `ver_*`     | per-type change counter, 0..=255     |

use std::collections::BTreeSet;

use nmos_domain::ApiVersion;

use crate::service::ServiceType;

pub const API_PROTO: &str = "api_proto";
pub const API_VER: &str = "api_ver";
pub const PRI: &str = "pri";
pub const VER_SLF: &str = "ver_slf";
pub const VER_SRC: &str = "ver_src";
pub const VER_FLW: &str = "ver_flw";
pub const VER_DVC: &str = "ver_dvc";
pub const VER_SND: &str = "ver_snd";
pub const VER_RCV: &str = "ver_rcv";

/// Priority value reserved as a "do not use" marker.
pub const NO_PRIORITY: u32 = 100;

pub type TxtRecords = Vec<(String, String)>;

/// Find a key in a TXT record set.
pub fn find_record<'a>(records: &'a [(String, String)], key: &str) -> Option<&'a str> {
    records
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Make the required records for a service advertisement. Node services
/// carry no `pri`; registration and query services must.
pub fn make_txt_records(
    service: ServiceType,
    pri: u32,
    api_ver: &[ApiVersion],
    api_proto: &str,
) -> TxtRecords {
    let mut records = vec![
        (API_PROTO.to_string(), api_proto.to_string()),
        (API_VER.to_string(), make_api_ver_value(api_ver)),
    ];
    if service != ServiceType::Node {
        records.push((PRI.to_string(), pri.to_string()));
    }
    records
}

/// `v1.0,v1.2,v1.3`: ascending, no whitespace.
pub fn make_api_ver_value(versions: &[ApiVersion]) -> String {
    let mut sorted: Vec<ApiVersion> = versions.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(ApiVersion::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the `api_ver` record; entries that do not parse are dropped.
/// Ascending order is recommended, not required, so the result is an
/// ordered set regardless of input order.
pub fn parse_api_ver_record(records: &[(String, String)]) -> BTreeSet<ApiVersion> {
    let Some(value) = find_record(records, API_VER) else {
        return BTreeSet::new();
    };
    value
        .split(',')
        .filter_map(|v| ApiVersion::parse(v).ok())
        .collect()
}

pub fn parse_api_proto_record(records: &[(String, String)]) -> String {
    find_record(records, API_PROTO).unwrap_or("http").to_string()
}

pub fn parse_pri_record(records: &[(String, String)]) -> u32 {
    find_record(records, PRI)
        .and_then(|v| v.parse().ok())
        .unwrap_or(NO_PRIORITY)
}

/// The six per-type change counters carried in node advertisements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiResourceVers {
    pub self_: u8,
    pub devices: u8,
    pub sources: u8,
    pub flows: u8,
    pub senders: u8,
    pub receivers: u8,
}

pub fn make_ver_records(ver: ApiResourceVers) -> TxtRecords {
    vec![
        (VER_SLF.to_string(), ver.self_.to_string()),
        (VER_SRC.to_string(), ver.sources.to_string()),
        (VER_FLW.to_string(), ver.flows.to_string()),
        (VER_DVC.to_string(), ver.devices.to_string()),
        (VER_SND.to_string(), ver.senders.to_string()),
        (VER_RCV.to_string(), ver.receivers.to_string()),
    ]
}

pub fn parse_ver_records(records: &[(String, String)]) -> ApiResourceVers {
    let at = |key: &str| {
        find_record(records, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    ApiResourceVers {
        self_: at(VER_SLF),
        sources: at(VER_SRC),
        flows: at(VER_FLW),
        devices: at(VER_DVC),
        senders: at(VER_SND),
        receivers: at(VER_RCV),
    }
}
