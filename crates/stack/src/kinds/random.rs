//! Generated values.

use std::collections::BTreeMap;

use serde::Serialize;

/// A generated password, stable for the lifetime of its keepers.
#[derive(Debug, Clone, Serialize)]
pub struct RandomPassword {
    pub length: u32,
    pub special: bool,
    pub override_special: String,
    /// Changing any keeper forces a new password.
    pub keepers: BTreeMap<String, String>,
}

impl_kind!(RandomPassword => "random:index:RandomPassword",
    outputs: ["result"],
    replace_on: ["length", "special", "override_special", "keepers"],
);
