//! The built-in tool catalog.
//!
//! Every tool the gateway exposes is declared here as data: name,
//! description, input schema, cache policy, classification and the
//! binding that maps arguments onto the upstream REST surface. The
//! registry built from this table is the runtime source of truth for
//! the tool count; nothing else in the codebase enumerates tools.
//!
//! Paths follow the upstream's API families: `/api/ddi/v1` for IPAM,
//! DNS and DHCP, `/api/infra/v1` for infrastructure provisioning,
//! `/api/atcfw/v1` and `/tide/api` for Threat Defense.

use crate::models::tool::{CachePolicy, FieldSpec, FieldType, ToolClass, ToolDescriptor, ToolSchema};
use crate::services::registry::{RegisteredTool, ToolBinding};
use once_cell::sync::Lazy;
use serde_json::json;

/// Logical service names the circuit breakers key on.
pub const INFOBLOX_API: &str = "infoblox_api";
pub const ATCFW_API: &str = "atcfw_api";

static CATALOG: Lazy<Vec<RegisteredTool>> = Lazy::new(build_catalog);

/// The full catalog; built once, cloned into the registry at
/// bootstrap.
pub fn catalog() -> Vec<RegisteredTool> {
    CATALOG.clone()
}

/// Collection-read tool with the standard `filter`/`limit` pair.
fn list_tool(
    name: &str,
    description: &str,
    service: &'static str,
    path: &'static str,
    cache_policy: CachePolicy,
) -> RegisteredTool {
    RegisteredTool {
        descriptor: ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: ToolSchema::new(vec![
                FieldSpec::optional("filter", FieldType::String, "Upstream filter expression"),
                FieldSpec::optional("limit", FieldType::Integer, "Maximum records to return")
                    .with_default(json!(100)),
            ]),
            output_hint: "object with a `results` array".to_string(),
            cache_policy,
            classification: ToolClass::Read,
            timeout_seconds: None,
        },
        binding: ToolBinding::List { service, path },
    }
}

fn get_tool(
    name: &str,
    description: &str,
    service: &'static str,
    path: &'static str,
) -> RegisteredTool {
    RegisteredTool {
        descriptor: ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: ToolSchema::new(vec![FieldSpec::required(
                "id",
                FieldType::String,
                "Upstream resource identifier",
            )]),
            output_hint: "`{found, result}` envelope".to_string(),
            cache_policy: CachePolicy::ttl(),
            classification: ToolClass::Read,
            timeout_seconds: None,
        },
        binding: ToolBinding::Get { service, path },
    }
}

fn delete_tool(
    name: &str,
    description: &str,
    service: &'static str,
    path: &'static str,
) -> RegisteredTool {
    RegisteredTool {
        descriptor: ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: ToolSchema::new(vec![FieldSpec::required(
                "id",
                FieldType::String,
                "Upstream resource identifier",
            )]),
            output_hint: "`{deleted}` acknowledgment".to_string(),
            cache_policy: CachePolicy::None,
            classification: ToolClass::Mutate,
            timeout_seconds: None,
        },
        binding: ToolBinding::Delete { service, path },
    }
}

fn mutate(
    name: &str,
    description: &str,
    fields: Vec<FieldSpec>,
    binding: ToolBinding,
) -> RegisteredTool {
    RegisteredTool {
        descriptor: ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: ToolSchema::new(fields),
            output_hint: "the created or updated record".to_string(),
            cache_policy: CachePolicy::None,
            classification: ToolClass::Mutate,
            timeout_seconds: None,
        },
        binding,
    }
}

fn build_catalog() -> Vec<RegisteredTool> {
    let tags = || FieldSpec::optional("tags", FieldType::Mapping, "Key/value tags");
    let comment = || FieldSpec::optional("comment", FieldType::String, "Free-text comment");

    vec![
        // ---- IPAM -------------------------------------------------
        list_tool(
            "list_ip_spaces",
            "List IP spaces (tenant address universes)",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/ip_space",
            CachePolicy::ttl(),
        ),
        get_tool(
            "get_ip_space",
            "Fetch one IP space by id",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/ip_space/{id}",
        ),
        mutate(
            "create_ip_space",
            "Create an IP space",
            vec![
                FieldSpec::required("name", FieldType::String, "Unique space name"),
                comment(),
                tags(),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/ipam/ip_space" },
        ),
        mutate(
            "update_ip_space",
            "Update an IP space in place",
            vec![
                FieldSpec::required("id", FieldType::String, "Space identifier"),
                FieldSpec::optional("name", FieldType::String, "New name"),
                comment(),
                tags(),
            ],
            ToolBinding::Update { service: INFOBLOX_API, path: "/api/ddi/v1/ipam/ip_space/{id}" },
        ),
        delete_tool(
            "delete_ip_space",
            "Delete an IP space",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/ip_space/{id}",
        ),
        list_tool(
            "list_address_blocks",
            "List address blocks",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/address_block",
            CachePolicy::ttl(),
        ),
        mutate(
            "create_address_block",
            "Carve an address block out of a space",
            vec![
                FieldSpec::required("space", FieldType::String, "Parent IP space id"),
                FieldSpec::required("address", FieldType::Cidr, "Block network in CIDR form"),
                FieldSpec::optional("name", FieldType::String, "Block name"),
                tags(),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/ipam/address_block" },
        ),
        list_tool(
            "list_subnets",
            "List subnets",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/subnet",
            CachePolicy::ttl(),
        ),
        mutate(
            "create_subnet",
            "Create a subnet inside a space",
            vec![
                FieldSpec::required("space", FieldType::String, "Parent IP space id"),
                FieldSpec::required("address", FieldType::Cidr, "Subnet network in CIDR form"),
                FieldSpec::optional("name", FieldType::String, "Subnet name"),
                tags(),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/ipam/subnet" },
        ),
        delete_tool(
            "delete_subnet",
            "Delete a subnet",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/subnet/{id}",
        ),
        RegisteredTool {
            descriptor: ToolDescriptor {
                name: "list_subnet_utilization".to_string(),
                description: "Per-subnet address utilization, joined gateway-side from the \
                              subnet and address collections"
                    .to_string(),
                input_schema: ToolSchema::new(vec![
                    FieldSpec::optional("space", FieldType::String, "Restrict to one IP space"),
                    FieldSpec::optional("limit", FieldType::Integer, "Maximum subnets to report")
                        .with_default(json!(1000)),
                ]),
                output_hint: "`results` array of `{id, address, cidr, capacity, used, \
                              utilization_percent}`"
                    .to_string(),
                cache_policy: CachePolicy::ttl(),
                classification: ToolClass::Read,
                timeout_seconds: None,
            },
            binding: ToolBinding::SubnetUtilization {
                service: INFOBLOX_API,
                subnet_path: "/api/ddi/v1/ipam/subnet",
                address_path: "/api/ddi/v1/ipam/address",
            },
        },
        list_tool(
            "list_ip_addresses",
            "List tracked IP addresses",
            INFOBLOX_API,
            "/api/ddi/v1/ipam/address",
            CachePolicy::ttl(),
        ),
        mutate(
            "get_next_available_ip",
            "Allocate the next free address in a subnet",
            vec![
                FieldSpec::required("id", FieldType::String, "Subnet identifier"),
                FieldSpec::optional("count", FieldType::Integer, "Addresses to allocate")
                    .with_default(json!(1)),
            ],
            ToolBinding::Create {
                service: INFOBLOX_API,
                path: "/api/ddi/v1/ipam/subnet/{id}/nextavailableip",
            },
        ),
        // ---- DNS --------------------------------------------------
        list_tool(
            "list_dns_views",
            "List DNS views",
            INFOBLOX_API,
            "/api/ddi/v1/dns/view",
            CachePolicy::ttl(),
        ),
        list_tool(
            "list_auth_zones",
            "List authoritative DNS zones",
            INFOBLOX_API,
            "/api/ddi/v1/dns/auth_zone",
            CachePolicy::ttl(),
        ),
        get_tool(
            "get_auth_zone",
            "Fetch one authoritative zone by id",
            INFOBLOX_API,
            "/api/ddi/v1/dns/auth_zone/{id}",
        ),
        mutate(
            "create_auth_zone",
            "Create an authoritative zone",
            vec![
                FieldSpec::required("fqdn", FieldType::String, "Zone FQDN"),
                FieldSpec::required(
                    "primary_type",
                    FieldType::Enum { values: vec!["cloud".into(), "external".into()] },
                    "Where the zone is primaried",
                ),
                FieldSpec::optional(
                    "internal_secondaries",
                    FieldType::Sequence { items: Box::new(FieldType::String) },
                    "On-prem hosts serving as secondaries",
                ),
                comment(),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/dns/auth_zone" },
        ),
        delete_tool(
            "delete_auth_zone",
            "Delete an authoritative zone",
            INFOBLOX_API,
            "/api/ddi/v1/dns/auth_zone/{id}",
        ),
        list_tool(
            "list_dns_records",
            "List resource records",
            INFOBLOX_API,
            "/api/ddi/v1/dns/record",
            CachePolicy::ttl(),
        ),
        mutate(
            "create_a_record",
            "Create an A record in a zone",
            vec![
                FieldSpec::required("name", FieldType::String, "Record name within the zone"),
                FieldSpec::required("ip_address", FieldType::IpAddress, "Target IPv4 address"),
                FieldSpec::required("zone", FieldType::String, "Parent zone id"),
                FieldSpec::optional("ttl", FieldType::Integer, "Record TTL in seconds")
                    .with_default(json!(3600)),
                FieldSpec::optional("type", FieldType::Enum { values: vec!["A".into()] }, "Record type")
                    .with_default(json!("A")),
                comment(),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/dns/record" },
        ),
        mutate(
            "create_cname_record",
            "Create a CNAME record in a zone",
            vec![
                FieldSpec::required("name", FieldType::String, "Alias name within the zone"),
                FieldSpec::required("target", FieldType::String, "Canonical name"),
                FieldSpec::required("zone", FieldType::String, "Parent zone id"),
                FieldSpec::optional("ttl", FieldType::Integer, "Record TTL in seconds")
                    .with_default(json!(3600)),
                FieldSpec::optional(
                    "type",
                    FieldType::Enum { values: vec!["CNAME".into()] },
                    "Record type",
                )
                .with_default(json!("CNAME")),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/dns/record" },
        ),
        mutate(
            "create_ptr_record",
            "Create a PTR record for an address",
            vec![
                FieldSpec::required("ip_address", FieldType::IpAddress, "Address to map"),
                FieldSpec::required("ptrdname", FieldType::String, "Hostname the pointer resolves to"),
                FieldSpec::required("zone", FieldType::String, "Reverse zone id"),
                FieldSpec::optional(
                    "type",
                    FieldType::Enum { values: vec!["PTR".into()] },
                    "Record type",
                )
                .with_default(json!("PTR")),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/dns/record" },
        ),
        delete_tool(
            "delete_dns_record",
            "Delete a resource record",
            INFOBLOX_API,
            "/api/ddi/v1/dns/record/{id}",
        ),
        // ---- DHCP -------------------------------------------------
        list_tool(
            "list_dhcp_ranges",
            "List DHCP ranges",
            INFOBLOX_API,
            "/api/ddi/v1/dhcp/range",
            CachePolicy::ttl(),
        ),
        mutate(
            "create_dhcp_range",
            "Create a DHCP range inside a subnet",
            vec![
                FieldSpec::required("space", FieldType::String, "Parent IP space id"),
                FieldSpec::required("start", FieldType::IpAddress, "First address of the range"),
                FieldSpec::required("end", FieldType::IpAddress, "Last address of the range"),
                FieldSpec::optional("name", FieldType::String, "Range name"),
                tags(),
            ],
            ToolBinding::Create { service: INFOBLOX_API, path: "/api/ddi/v1/dhcp/range" },
        ),
        // Leases churn fast; a short explicit TTL keeps the view
        // fresh without hammering the upstream.
        list_tool(
            "list_dhcp_leases",
            "List active DHCP leases",
            INFOBLOX_API,
            "/api/ddi/v1/dhcp/lease",
            CachePolicy::ttl_secs(60),
        ),
        // ---- VPN provisioning ------------------------------------
        RegisteredTool {
            descriptor: ToolDescriptor {
                name: "configure_vpn_infrastructure".to_string(),
                description: "Provision hub-and-spoke VPN infrastructure from a composite \
                              document; atomic at the upstream"
                    .to_string(),
                input_schema: ToolSchema::new(vec![
                    FieldSpec::required("tenant", FieldType::String, "Tenant identifier"),
                    FieldSpec::required(
                        "hub_location",
                        FieldType::Enum {
                            values: vec![
                                "aws-us-east".into(),
                                "aws-us-west".into(),
                                "azure-eu-west".into(),
                            ],
                        },
                        "Cloud region hosting the hub",
                    ),
                    FieldSpec::required(
                        "tunnels",
                        FieldType::Sequence { items: Box::new(FieldType::Mapping) },
                        "Spoke tunnel definitions",
                    ),
                    FieldSpec::optional("dns_forwarding", FieldType::Boolean, "Forward DNS over the hub")
                        .with_default(json!(true)),
                    FieldSpec::optional("bandwidth_mbps", FieldType::Integer, "Provisioned bandwidth")
                        .with_default(json!(100)),
                ]),
                output_hint: "provisioning job record".to_string(),
                cache_policy: CachePolicy::None,
                classification: ToolClass::Mutate,
                // Provisioning runs long; the default deadline would
                // cut legitimate jobs short.
                timeout_seconds: Some(120),
            },
            binding: ToolBinding::Compound {
                service: INFOBLOX_API,
                path: "/api/infra/v1/vpn_infrastructure/configure",
            },
        },
        // ---- Threat defense --------------------------------------
        list_tool(
            "list_security_policies",
            "List DNS security policies",
            ATCFW_API,
            "/api/atcfw/v1/security_policies",
            CachePolicy::ttl(),
        ),
        mutate(
            "create_security_policy",
            "Create a DNS security policy",
            vec![
                FieldSpec::required("name", FieldType::String, "Policy name"),
                FieldSpec::required(
                    "rules",
                    FieldType::Sequence { items: Box::new(FieldType::Mapping) },
                    "Ordered rule list",
                ),
                FieldSpec::optional("precedence", FieldType::Integer, "Evaluation precedence"),
            ],
            ToolBinding::Create { service: ATCFW_API, path: "/api/atcfw/v1/security_policies" },
        ),
        mutate(
            "update_security_policy",
            "Update a DNS security policy",
            vec![
                FieldSpec::required("id", FieldType::String, "Policy identifier"),
                FieldSpec::optional("name", FieldType::String, "New name"),
                FieldSpec::optional(
                    "rules",
                    FieldType::Sequence { items: Box::new(FieldType::Mapping) },
                    "Replacement rule list",
                ),
            ],
            ToolBinding::Update { service: ATCFW_API, path: "/api/atcfw/v1/security_policies/{id}" },
        ),
        list_tool(
            "list_named_lists",
            "List named threat lists",
            ATCFW_API,
            "/api/atcfw/v1/named_lists",
            CachePolicy::ttl(),
        ),
        mutate(
            "create_named_list",
            "Create a named allow/deny list",
            vec![
                FieldSpec::required("name", FieldType::String, "List name"),
                FieldSpec::required(
                    "type",
                    FieldType::Enum { values: vec!["ip".into(), "domain".into()] },
                    "Entry kind",
                ),
                FieldSpec::required(
                    "items",
                    FieldType::Sequence { items: Box::new(FieldType::String) },
                    "Initial entries",
                ),
            ],
            ToolBinding::Create { service: ATCFW_API, path: "/api/atcfw/v1/named_lists" },
        ),
        list_tool(
            "list_threat_feeds",
            "List subscribed threat intelligence feeds",
            ATCFW_API,
            "/api/atcfw/v1/threat_feeds",
            CachePolicy::ttl(),
        ),
        RegisteredTool {
            descriptor: ToolDescriptor {
                name: "lookup_threat_indicator".to_string(),
                description: "Query threat intelligence for one indicator".to_string(),
                input_schema: ToolSchema::new(vec![
                    FieldSpec::required("indicator", FieldType::String, "Indicator value"),
                    FieldSpec::required(
                        "type",
                        FieldType::Enum {
                            values: vec!["host".into(), "ip".into(), "url".into()],
                        },
                        "Indicator kind",
                    ),
                    FieldSpec::optional("limit", FieldType::Integer, "Maximum matches")
                        .with_default(json!(10)),
                ]),
                output_hint: "`threat` array of matching intel records".to_string(),
                // Intel moves quickly; cache briefly.
                cache_policy: CachePolicy::ttl_secs(60),
                classification: ToolClass::Read,
                timeout_seconds: None,
            },
            binding: ToolBinding::List { service: ATCFW_API, path: "/tide/api/data/threats" },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolClass;

    #[test]
    fn catalog_names_are_unique() {
        let tools = catalog();
        let mut names: Vec<&str> = tools.iter().map(|t| t.descriptor.name.as_str()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn mutations_never_declare_cache_ttl() {
        for tool in catalog() {
            if tool.descriptor.classification == ToolClass::Mutate {
                assert!(
                    !tool.descriptor.cacheable(),
                    "mutation tool {} declares a cache policy",
                    tool.descriptor.name
                );
            }
        }
    }

    #[test]
    fn scenario_tools_are_present() {
        let tools = catalog();
        for name in [
            "list_ip_spaces",
            "list_auth_zones",
            "list_subnets",
            "create_a_record",
            "configure_vpn_infrastructure",
        ] {
            assert!(
                tools.iter().any(|t| t.descriptor.name == name),
                "{} missing from catalog",
                name
            );
        }
    }

    #[test]
    fn compound_tool_overrides_the_deadline() {
        let tools = catalog();
        let vpn = tools
            .iter()
            .find(|t| t.descriptor.name == "configure_vpn_infrastructure")
            .unwrap();
        assert_eq!(vpn.descriptor.timeout_seconds, Some(120));
    }
}
