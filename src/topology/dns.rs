//! DNS zone lookup and record sets

use serde_json::{json, Value};

use crate::config::TopologyConfig;
use crate::deferred::Deferred;
use crate::error::Result;
use crate::provider::ResourceKind;
use crate::provision::{Provisioner, ResourceDescriptor};

const RECORD_TTL: u32 = 300;

/// The managed zone records are published into
#[derive(Debug, Clone)]
pub struct Zone {
    /// Managed zone name (`example-com`)
    pub name: Deferred<String>,
    /// Zone DNS name with trailing dot (`example.com.`)
    pub dns_name: Deferred<String>,
}

pub fn managed_zone(prov: &Provisioner, config: &TopologyConfig) -> Result<Zone> {
    let zone = prov.declare(
        ResourceDescriptor::new("dns-zone", ResourceKind::DnsManagedZone)
            .config(json!({ "zone": config.dns_zone, "project": config.project }))
            .outputs(["name", "dns_name"]),
    )?;
    Ok(Zone {
        name: zone.string("name"),
        dns_name: zone.string("dns_name"),
    })
}

/// Declare `{subdomain}.{zone}` and return its fully-qualified name
pub fn record(
    prov: &Provisioner,
    name: &str,
    subdomain: &str,
    zone: &Zone,
    record_type: &str,
    rrdatas: &Deferred<Value>,
    project: &str,
) -> Result<Deferred<String>> {
    let subdomain = subdomain.to_string();
    let fqdn = zone.dns_name.then(move |dns| format!("{}.{}", subdomain, dns));

    let record = prov.declare(
        ResourceDescriptor::new(name, ResourceKind::DnsRecordSet)
            .input("managed_zone", &zone.name)
            .input("name", &fqdn)
            .input_json("rrdatas", rrdatas)
            .config(json!({ "type": record_type, "ttl": RECORD_TTL, "project": project }))
            .outputs(["name"]),
    )?;
    Ok(record.string("name"))
}

/// `.vault.example.com.` → `vault.example.com`
pub fn trim_fqdn(fqdn: &str) -> String {
    fqdn.trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_fqdn_strips_both_ends() {
        assert_eq!(trim_fqdn("vault.example.com."), "vault.example.com");
        assert_eq!(trim_fqdn(".vault.example.com"), "vault.example.com");
    }
}
