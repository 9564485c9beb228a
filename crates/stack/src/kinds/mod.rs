//! Resource kinds used by the stack.
//!
//! Each kind is an argument struct; its serialized form becomes the node
//! inputs. Fields that may hold another resource's output are [`Value`]s,
//! plain literals use native types.
//!
//! [`Value`]: tic_graph::Value

use std::collections::BTreeMap;

/// Free-form resource tags.
pub type Tags = BTreeMap<String, String>;

/// Implement [`tic_graph::Kind`] for an argument struct.
macro_rules! impl_kind {
    (
        $ty:ty => $token:literal,
        outputs: [$($out:literal),* $(,)?]
        $(, taggable: $tag:literal)?
        $(, role: $role:ident)?
        $(, replace_on: [$($rep:literal),* $(,)?])?
        $(,)?
    ) => {
        impl tic_graph::Kind for $ty {
            const TYPE: &'static str = $token;
            const OUTPUTS: &'static [&'static str] = &[$($out),*];
            $(const TAGGABLE: bool = $tag;)?
            $(const ROLE: tic_graph::NodeRole = tic_graph::NodeRole::$role;)?
            $(const REPLACE_ON: &'static [&'static str] = &[$($rep),*];)?
        }
    };
}

pub mod aws;
pub mod docker;
pub mod kubernetes;
pub mod random;
pub mod tls;

pub(crate) fn no_tags(tags: &Tags) -> bool {
    tags.is_empty()
}

/// The conventional `Name` tag.
pub(crate) fn name_tag(name: &str) -> Tags {
    Tags::from([("Name".to_string(), name.to_string())])
}
