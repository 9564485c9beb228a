//! Owner tags applied to every taggable resource.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};
use tic_graph::GraphBuilder;

use crate::config::TagConfig;

pub const TAG_USER_NAME: &str = "user:name";
pub const TAG_STACK_NAME: &str = "user:stack_name";
pub const TAG_STACK_CREATED: &str = "user:stack-created";

/// Tags stamped on every taggable resource of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoTags(BTreeMap<String, String>);

impl AutoTags {
    /// Tags from config plus the stack creation stamp.
    ///
    /// `created` must stay the same across applies of one stack, so callers
    /// take it from recorded state rather than the clock.
    #[must_use]
    pub fn new(tags: &TagConfig, created: &str) -> Self {
        Self(BTreeMap::from([
            (TAG_USER_NAME.to_string(), tags.user_name.clone()),
            (TAG_STACK_NAME.to_string(), tags.stack_name.clone()),
            (TAG_STACK_CREATED.to_string(), created.to_string()),
        ]))
    }

    /// Tag map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Merge into every taggable node declared after this call.
    ///
    /// Auto tags win over tags set on the resource itself.
    pub fn install(&self, builder: &mut GraphBuilder) {
        let auto = self.0.clone();
        builder.transform(move |node| {
            if !node.taggable {
                return;
            }
            let Some(inputs) = node.inputs.as_object_mut() else {
                return;
            };
            let tags = inputs
                .entry("tags")
                .or_insert_with(|| Json::Object(Map::new()));
            if let Some(tags) = tags.as_object_mut() {
                for (k, v) in &auto {
                    tags.insert(k.clone(), Json::String(v.clone()));
                }
            }
        });
    }
}
