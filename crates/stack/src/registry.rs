//! Container registry and the application image.

use serde_json::json;
use tic_graph::{GraphBuilder, GraphError, Handle, Options, Value};

use crate::config::{ImageConfig, RegistryConfig};
use crate::kinds::aws::{
    EcrLifecyclePolicy, EcrRepository, GetAuthorizationToken, ImageScanningConfiguration,
};
use crate::kinds::docker::{DockerBuild, Image, Registry as DockerRegistry};
use crate::kinds::name_tag;

/// Registry handles.
#[derive(Debug, Clone)]
pub struct Registry {
    pub repository: Handle<EcrRepository>,
    pub lifecycle: Handle<EcrLifecyclePolicy>,
    pub auth: Handle<GetAuthorizationToken>,
}

/// Lifecycle rule expiring untagged images beyond `keep`.
#[must_use]
pub fn lifecycle_policy(keep: u32) -> String {
    json!({
        "rules": [{
            "rulePriority": 1,
            "description": "Expire untagged images",
            "selection": {
                "tagStatus": "untagged",
                "countType": "imageCountMoreThan",
                "countNumber": keep,
            },
            "action": { "type": "expire" },
        }],
    })
    .to_string()
}

impl Registry {
    /// Declare the repository, its lifecycle policy and the push
    /// credentials lookup.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn declare(b: &mut GraphBuilder, cfg: &RegistryConfig) -> Result<Self, GraphError> {
        let repository = b.declare(
            "ecr-repository",
            &EcrRepository {
                name: cfg.repository.clone(),
                image_tag_mutability: "MUTABLE".to_string(),
                image_scanning_configuration: ImageScanningConfiguration { scan_on_push: true },
                force_delete: false,
                tags: name_tag(&cfg.repository),
            },
            Options::new(),
        )?;
        let lifecycle = b.declare(
            "ecr-lifecycle-policy",
            &EcrLifecyclePolicy {
                repository: repository.output("name"),
                policy: lifecycle_policy(cfg.untagged_images).into(),
            },
            Options::new(),
        )?;
        let auth = b.declare(
            "ecr-auth",
            &GetAuthorizationToken {
                registry_id: repository.output("registry_id"),
            },
            Options::new(),
        )?;
        Ok(Self {
            repository,
            lifecycle,
            auth,
        })
    }

    /// Declare the build and push of one application image.
    ///
    /// # Errors
    /// Propagates declaration failures.
    pub fn image(
        &self,
        b: &mut GraphBuilder,
        app: &str,
        cfg: &ImageConfig,
    ) -> Result<Handle<Image>, GraphError> {
        b.declare(
            &format!("{app}-image"),
            &Image {
                image_name: Value::concat([
                    self.repository.output("repository_url"),
                    Value::from(format!(":{}", cfg.tag)),
                ]),
                build: DockerBuild {
                    context: cfg.context.clone(),
                    dockerfile: cfg.dockerfile.clone(),
                    platform: cfg.platform.clone(),
                },
                registry: DockerRegistry {
                    server: self.auth.output("proxy_endpoint"),
                    username: self.auth.output("user_name"),
                    password: self.auth.output("password"),
                },
            },
            Options::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;

    #[test]
    fn test_lifecycle_policy_keeps_configured_count() {
        let policy: Json = serde_json::from_str(&lifecycle_policy(10)).unwrap();
        let rule = &policy["rules"][0];
        assert_eq!(rule["selection"]["tagStatus"], "untagged");
        assert_eq!(rule["selection"]["countNumber"], 10);
        assert_eq!(rule["action"]["type"], "expire");
    }

    #[test]
    fn test_image_pushes_to_repository() {
        let mut b = GraphBuilder::new("dev");
        let registry = Registry::declare(&mut b, &RegistryConfig::default()).unwrap();
        let image = registry
            .image(&mut b, "orders", &ImageConfig::default())
            .unwrap();
        let graph = b.build().unwrap();

        let repo = graph.node(registry.repository.resource_id()).unwrap();
        assert_eq!(repo.inputs["image_tag_mutability"], "MUTABLE");
        assert_eq!(repo.inputs["image_scanning_configuration"]["scan_on_push"], true);

        let node = graph.node(image.resource_id()).unwrap();
        assert_eq!(node.id.as_str(), "orders-image");
        assert!(node.depends_on.contains(registry.repository.resource_id()));
        assert!(node.depends_on.contains(registry.auth.resource_id()));
        let mut lookup = |r: &tic_graph::OutputRef| Some(Json::from(format!("<{}>", r.attr())));
        let name = tic_graph::value::resolve(&node.inputs["image_name"], &mut lookup).unwrap();
        assert_eq!(name, "<repository_url>:latest");
    }
}
