//! Network layer: VPC, subnets, gateways and routing.

use serde_json::Value as Json;
use tic_graph::{value, Graph, GraphBuilder, GraphError, Handle, Kind, Options, ResourceId, Value};
use tracing::debug;

use crate::config::{ConfigError, NetworkConfig};
use crate::error::StackError;
use crate::kinds::aws::{
    Eip, InternetGateway, NatGateway, Route, RouteTable, RouteTableAssociation, Subnet, Vpc,
};
use crate::kinds::name_tag;

/// Destination of a default route.
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Handles of the network layer.
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: Handle<Vpc>,
    pub public_subnets: Vec<Handle<Subnet>>,
    pub private_subnets: Vec<Handle<Subnet>>,
    /// First public subnet; hosts the NAT gateway.
    pub anchor_subnet: Handle<Subnet>,
    pub internet_gateway: Handle<InternetGateway>,
    pub nat_eip: Handle<Eip>,
    pub nat_gateway: Handle<NatGateway>,
    pub public_route_table: Handle<RouteTable>,
    pub private_route_table: Handle<RouteTable>,
}

fn zone_suffix(zone: &str, index: usize) -> String {
    zone.chars()
        .last()
        .filter(char::is_ascii_alphabetic)
        .map_or_else(|| index.to_string(), |c| c.to_ascii_lowercase().to_string())
}

impl Network {
    /// Declare the VPC with one public and one private subnet per zone.
    ///
    /// The NAT gateway sits in the first public subnet and consumes the
    /// elastic IP, so a failed allocation stops the private routing.
    ///
    /// # Errors
    /// Fails without zones, and propagates declaration failures such as
    /// duplicate zone suffixes.
    pub fn declare(b: &mut GraphBuilder, cfg: &NetworkConfig) -> Result<Self, StackError> {
        let vpc = b.declare(
            "vpc",
            &Vpc {
                cidr_block: cfg.cidr.clone(),
                enable_dns_hostnames: true,
                enable_dns_support: true,
                tags: name_tag("vpc"),
            },
            Options::new(),
        )?;

        let mut public_subnets = Vec::new();
        let mut private_subnets = Vec::new();
        for (i, zone) in cfg.availability_zones.iter().enumerate() {
            let suffix = zone_suffix(zone, i);

            let name = format!("public-subnet-{suffix}");
            public_subnets.push(b.declare(
                &name,
                &Subnet {
                    vpc_id: vpc.id(),
                    cidr_block: cfg.public_cidr(i),
                    availability_zone: zone.clone(),
                    map_public_ip_on_launch: true,
                    tags: name_tag(&name),
                },
                Options::new(),
            )?);

            let name = format!("private-subnet-{suffix}");
            let mut tags = name_tag(&name);
            tags.insert("kubernetes.io/role/internal-elb".to_string(), "1".to_string());
            private_subnets.push(b.declare(
                &name,
                &Subnet {
                    vpc_id: vpc.id(),
                    cidr_block: cfg.private_cidr(i),
                    availability_zone: zone.clone(),
                    map_public_ip_on_launch: false,
                    tags,
                },
                Options::new(),
            )?);
        }

        let internet_gateway = b.declare(
            "internet-gateway",
            &InternetGateway {
                vpc_id: vpc.id(),
                tags: name_tag("internet-gateway"),
            },
            Options::new(),
        )?;

        let public_route_table = b.declare(
            "public-route-table",
            &RouteTable {
                vpc_id: vpc.id(),
                routes: vec![Route {
                    cidr_block: DEFAULT_ROUTE.to_string(),
                    gateway_id: Some(internet_gateway.id()),
                    nat_gateway_id: None,
                }],
                tags: name_tag("public-route-table"),
            },
            Options::new(),
        )?;
        associate(b, &public_route_table, &public_subnets)?;

        let nat_eip = b.declare(
            "nat-eip",
            &Eip {
                domain: "vpc".to_string(),
                tags: name_tag("nat-eip"),
            },
            Options::new(),
        )?;

        let anchor_subnet = public_subnets
            .first()
            .cloned()
            .ok_or(ConfigError::Invalid {
                field: "network.availability_zones",
                reason: "at least one zone is required".to_string(),
            })?;
        let nat_gateway = b.declare(
            "nat-gateway",
            &NatGateway {
                subnet_id: anchor_subnet.id(),
                allocation_id: nat_eip.output("allocation_id"),
                tags: name_tag("nat-gateway"),
            },
            Options::new(),
        )?;

        let private_route_table = b.declare(
            "private-route-table",
            &RouteTable {
                vpc_id: vpc.id(),
                routes: vec![Route {
                    cidr_block: DEFAULT_ROUTE.to_string(),
                    gateway_id: None,
                    nat_gateway_id: Some(nat_gateway.id()),
                }],
                tags: name_tag("private-route-table"),
            },
            Options::new(),
        )?;
        associate(b, &private_route_table, &private_subnets)?;

        debug!(
            zones = cfg.availability_zones.len(),
            cidr = %cfg.cidr,
            "Declared network layer"
        );

        Ok(Self {
            vpc,
            public_subnets,
            private_subnets,
            anchor_subnet,
            internet_gateway,
            nat_eip,
            nat_gateway,
            public_route_table,
            private_route_table,
        })
    }

    /// Public subnet ids.
    #[must_use]
    pub fn public_subnet_ids(&self) -> Vec<Value> {
        self.public_subnets.iter().map(Handle::id).collect()
    }

    /// Private subnet ids.
    #[must_use]
    pub fn private_subnet_ids(&self) -> Vec<Value> {
        self.private_subnets.iter().map(Handle::id).collect()
    }
}

fn associate(
    b: &mut GraphBuilder,
    table: &Handle<RouteTable>,
    subnets: &[Handle<Subnet>],
) -> Result<(), GraphError> {
    for subnet in subnets {
        b.declare(
            &format!("{}-association", subnet.resource_id()),
            &RouteTableAssociation {
                route_table_id: table.id(),
                subnet_id: subnet.id(),
            },
            Options::new(),
        )?;
    }
    Ok(())
}

/// Resource a single referenced value points at.
pub(crate) fn target_of(doc: &Json) -> Option<ResourceId> {
    value::references(doc)
        .ok()
        .and_then(|refs| refs.into_iter().next())
        .map(|r| r.resource().clone())
}

/// Target of the default route of a subnet, following its route table
/// association.
#[must_use]
pub fn default_route_target(graph: &Graph, subnet: &ResourceId) -> Option<ResourceId> {
    let table = graph
        .nodes_of_kind(RouteTableAssociation::TYPE)
        .filter(|n| n.input("subnet_id").and_then(target_of).as_ref() == Some(subnet))
        .find_map(|n| n.input("route_table_id").and_then(target_of))?;
    let routes = graph.node(&table)?.input("routes")?.as_array()?;
    routes
        .iter()
        .filter(|r| r.get("cidr_block").and_then(Json::as_str) == Some(DEFAULT_ROUTE))
        .find_map(|r| {
            r.get("gateway_id")
                .or_else(|| r.get("nat_gateway_id"))
                .and_then(target_of)
        })
}
