//! Properties of the synthesized stack graph.
//!
//! These tests run synthesis only; nothing is applied.

use serde_json::Value as Json;
use tic_graph::value::{preview, resolve};
use tic_graph::{Graph, GraphError, Kind, ResourceId};
use tic_stack::config::WebAppConfig;
use tic_stack::kinds::aws::{InternetGateway, NatGateway, Subnet};
use tic_stack::network::default_route_target;
use tic_stack::secrets::{generate_password, PASSWORD_ALPHABET};
use tic_stack::{lint, synthesize, Severity, StackConfig, StackError};

const CREATED: &str = "2024-11-02";

fn default_graph() -> Graph {
    synthesize(&StackConfig::with_defaults("dev"), CREATED).unwrap()
}

fn orders_config() -> StackConfig {
    let mut cfg = StackConfig::with_defaults("dev");
    cfg.web_app = Some(WebAppConfig {
        name: "orders".to_string(),
        port: 4000,
        postgres_secret: "orders-pg".to_string(),
        ..WebAppConfig::default()
    });
    cfg
}

/// Preview a value with every output unknown, parsing stringified JSON.
fn rendered_json(doc: &Json) -> Json {
    match preview(doc, &mut |_| None) {
        Json::String(s) => serde_json::from_str(&s).unwrap(),
        other => other,
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_referenced_resources_come_strictly_first() {
    let graph = default_graph();
    let order = graph.order();
    for node in graph.nodes() {
        let level = order.level(&node.id).unwrap();
        for r in node.references().unwrap() {
            let upstream = order.level(r.resource()).unwrap();
            assert!(upstream < level, "{} (level {level}) reads {r} (level {upstream})", node.id);
        }
        for dep in &node.depends_on {
            assert!(order.level(dep).unwrap() < level, "{dep} must precede {}", node.id);
        }
        if let Some(provider) = &node.provider {
            assert!(order.level(provider).unwrap() < level);
        }
    }
}

#[test]
fn test_graph_is_acyclic_and_reloads() {
    let graph = default_graph();
    assert_eq!(graph.order().len(), graph.len());
    let reloaded = graph.to_document().into_graph().unwrap();
    assert_eq!(reloaded.order().creation(), graph.order().creation());
}

#[test]
fn test_cycle_in_loaded_document_is_rejected() {
    let mut doc = default_graph().to_document();
    let nat = doc
        .resources
        .iter()
        .find(|n| n.id.as_str() == "nat-gateway")
        .map(|n| n.id.clone())
        .unwrap();
    let vpc = doc.resources.iter_mut().find(|n| n.id.as_str() == "vpc").unwrap();
    vpc.depends_on.insert(nat);
    assert!(matches!(doc.into_graph(), Err(GraphError::Cycle(_))));
}

// =============================================================================
// Routing
// =============================================================================

#[test]
fn test_default_routes_by_subnet_tier() {
    let graph = default_graph();
    let subnets: Vec<_> = graph.nodes_of_kind(Subnet::TYPE).collect();
    assert_eq!(subnets.len(), 4);

    for subnet in subnets {
        let public = subnet.inputs["map_public_ip_on_launch"].as_bool().unwrap();
        let target = default_route_target(&graph, &subnet.id).unwrap();
        let kind = &graph.node(&target).unwrap().kind;
        if public {
            assert_eq!(kind, InternetGateway::TYPE, "{} must route via the IGW", subnet.id);
        } else {
            assert_eq!(kind, NatGateway::TYPE, "{} must route via the NAT", subnet.id);
        }
    }
}

// =============================================================================
// Connection string
// =============================================================================

fn resolved_uri(graph: &Graph, password: &str) -> url::Url {
    let version = graph.find("web-app-pg-secret-version").unwrap();
    let secret = resolve(&version.inputs["secret_string"], &mut |r| {
        match (r.resource().as_str(), r.attr()) {
            ("db-instance-password", "result") => Some(Json::from(password)),
            ("db-instance-dns-record", "fqdn") => {
                Some(Json::from("db-instance.ultra-tic.internal"))
            }
            _ => None,
        }
    })
    .unwrap();
    let fields: Json = serde_json::from_str(secret.as_str().unwrap()).unwrap();
    assert_eq!(fields["password"], password);
    url::Url::parse(fields["uri"].as_str().unwrap()).unwrap()
}

#[test]
fn test_password_round_trips_through_uri() {
    let graph = default_graph();
    let mut passwords: Vec<String> = (0..64).map(|_| generate_password(16)).collect();
    passwords.push(PASSWORD_ALPHABET.to_string());
    passwords.push("p@ss:w/rd?#%".to_string());

    for password in passwords {
        let uri = resolved_uri(&graph, &password);
        assert_eq!(uri.scheme(), "postgresql");
        assert_eq!(uri.username(), "ultratic");
        assert_eq!(uri.port(), Some(5432));
        assert_eq!(uri.path(), "/ultratic");
        let encoded = uri.password().unwrap();
        let decoded = urlencoding::decode(encoded).unwrap();
        assert_eq!(decoded, password, "round trip failed for {password:?}");
    }
}

// =============================================================================
// Scenario: orders
// =============================================================================

#[test]
fn test_orders_scenario() {
    let graph = synthesize(&orders_config(), CREATED).unwrap();

    let namespace = graph.find("orders-namespace").unwrap();
    assert_eq!(namespace.inputs["manifest"]["metadata"]["name"], "orders");

    let secret = graph.find("orders-pg-secret").unwrap();
    assert_eq!(secret.inputs["name"], "orders-pg");
    let version = graph.find("orders-pg-secret-version").unwrap();
    let fields = version.inputs["secret_string"]["$json"].as_object().unwrap();
    for key in ["username", "password", "host", "port", "db"] {
        assert!(fields.contains_key(key), "secret lacks {key}");
    }

    let service = graph.find("orders-service").unwrap();
    let port = &service.inputs["manifest"]["spec"]["ports"][0];
    assert_eq!(port["port"], 80);
    assert_eq!(port["targetPort"], 4000);
    assert_eq!(service.inputs["manifest"]["metadata"]["namespace"], "orders");

    let policy = graph.find("orders-secrets-policy").unwrap();
    let document = rendered_json(&policy.inputs["policy"]);
    let statements = document["Statement"].as_array().unwrap();
    assert_eq!(statements.len(), 1);
    let resource = statements[0]["Resource"].as_str().unwrap();
    assert!(resource.ends_with(":secret:orders-pg*"), "{resource}");
    assert!(!resource.contains("secret:*"));
    assert!(resource.starts_with("arn:aws:secretsmanager:us-east-1:"));

    let deployment = graph.find("orders-deployment").unwrap();
    let pod = &deployment.inputs["manifest"]["spec"]["template"]["spec"];
    assert_eq!(pod["serviceAccountName"], "orders-sa");
    assert_eq!(pod["containers"][0]["ports"][0]["containerPort"], 4000);

    assert!(lint(&graph).iter().all(|f| f.severity != Severity::Error));
}

// =============================================================================
// Scenario: database removed
// =============================================================================

#[test]
fn test_removing_database_removes_its_record() {
    let mut cfg = StackConfig::with_defaults("dev");
    cfg.db_instance = None;
    cfg.web_app = None;
    let graph = synthesize(&cfg, CREATED).unwrap();
    assert!(graph.find("db-instance").is_none());
    assert!(graph.find("db-instance-dns-record").is_none());
    assert!(graph.find("internal-zone").is_none());
    assert!(!graph.exports().contains_key("db_host"));
    assert!(graph.find("external-secrets-chart").is_some());
}

#[test]
fn test_web_app_without_database_fails() {
    let mut cfg = StackConfig::with_defaults("dev");
    cfg.db_instance = None;
    let err = synthesize(&cfg, CREATED).unwrap_err();
    assert!(matches!(err, StackError::MissingDatabase { ref app } if app == "web-app"));
}

#[test]
fn test_document_still_reading_removed_instance_is_rejected() {
    let full = default_graph().to_document();
    let record = full
        .resources
        .iter()
        .find(|n| n.id.as_str() == "db-instance-dns-record")
        .cloned()
        .unwrap();

    let mut cfg = StackConfig::with_defaults("dev");
    cfg.db_instance = None;
    cfg.web_app = None;
    let mut doc = synthesize(&cfg, CREATED).unwrap().to_document();
    doc.resources.push(record);

    let err = doc.into_graph().unwrap_err();
    assert!(matches!(err, GraphError::DanglingReference { .. }), "{err}");
}

// =============================================================================
// Lint
// =============================================================================

#[test]
fn test_default_stack_has_no_lint_errors() {
    let findings = lint(&default_graph());
    let errors: Vec<_> = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .map(ToString::to_string)
        .collect();
    assert!(errors.is_empty(), "{errors:#?}");
}

#[test]
fn test_lint_flags_world_open_ssh() {
    let mut cfg = StackConfig::with_defaults("dev");
    if let Some(db) = cfg.db_instance.as_mut() {
        db.ssh_cidr = Some("0.0.0.0/0".to_string());
    }
    let findings = lint(&synthesize(&cfg, CREATED).unwrap());
    assert!(findings
        .iter()
        .any(|f| f.resource.as_str() == "db-instance-ssh" && f.severity == Severity::Error));
}

#[test]
fn test_lint_flags_moved_service_account() {
    let mut doc = default_graph().to_document();
    let account = doc
        .resources
        .iter_mut()
        .find(|n| n.id.as_str() == "web-app-sa")
        .unwrap();
    account.inputs["manifest"]["metadata"]["namespace"] = Json::from("other");
    let graph = doc.into_graph().unwrap();

    let messages: Vec<String> = lint(&graph).iter().map(|f| f.message.clone()).collect();
    assert!(messages.iter().any(|m| m
        .contains("system:serviceaccount:web-app:web-app-sa matches no declared service account")));
    assert!(messages
        .iter()
        .any(|m| m.contains("service account web-app/web-app-sa is not declared")));
    assert!(messages
        .iter()
        .any(|m| m.contains("does not trust system:serviceaccount:other:web-app-sa")));
}

#[test]
fn test_lint_flags_private_subnet_on_igw() {
    let mut doc = default_graph().to_document();
    let public_routes = doc
        .resources
        .iter()
        .find(|n| n.id.as_str() == "public-route-table")
        .map(|n| n.inputs["routes"].clone())
        .unwrap();
    let private = doc
        .resources
        .iter_mut()
        .find(|n| n.id.as_str() == "private-route-table")
        .unwrap();
    private.inputs["routes"] = public_routes;
    private
        .depends_on
        .insert(ResourceId::new("internet-gateway").unwrap());
    let graph = doc.into_graph().unwrap();

    let mut flagged: Vec<String> = lint(&graph)
        .iter()
        .filter(|f| f.message.contains("through internet gateway"))
        .map(|f| f.resource.to_string())
        .collect();
    flagged.sort();
    assert_eq!(flagged, vec!["private-subnet-a", "private-subnet-b"]);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_sample_stack_file_matches_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../stacks/dev.yaml");
    let cfg = StackConfig::load(&path).unwrap();
    assert_eq!(cfg, StackConfig::with_defaults("dev"));
}
