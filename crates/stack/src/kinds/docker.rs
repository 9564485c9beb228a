//! Container image build and push.

use serde::Serialize;
use tic_graph::Value;

#[derive(Debug, Clone, Serialize)]
pub struct DockerBuild {
    pub context: String,
    pub dockerfile: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    pub server: Value,
    pub username: Value,
    pub password: Value,
}

/// Builds an image and pushes it; `repo_digest` pins the pushed content.
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub image_name: Value,
    pub build: DockerBuild,
    pub registry: Registry,
}

impl_kind!(Image => "docker:index:Image",
    outputs: ["image_name", "repo_digest"],
);
