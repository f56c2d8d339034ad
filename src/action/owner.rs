use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key to value execution hints (resource requirements, pool names, ...).
///
/// A `BTreeMap` so iteration, and therefore fingerprinting, is deterministic.
pub type ExecProperties = BTreeMap<String, String>;

/// Merges two property maps; on key collision the value from `second` wins
pub fn merge_maps(first: &ExecProperties, second: &ExecProperties) -> ExecProperties {
    if first.is_empty() {
        return second.clone();
    }
    if second.is_empty() {
        return first.clone();
    }
    let mut merged = first.clone();
    merged.extend(second.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Platform an action should execute on. Absence means the host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlatformInfo {
    label: String,
    #[serde(default)]
    constraints: BTreeMap<String, String>,
    #[serde(default)]
    exec_properties: ExecProperties,
}

impl PlatformInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_constraint(mut self, setting: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(setting.into(), value.into());
        self
    }

    pub fn with_exec_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exec_properties.insert(key.into(), value.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn constraints(&self) -> &BTreeMap<String, String> {
        &self.constraints
    }

    pub fn exec_properties(&self) -> &ExecProperties {
        &self.exec_properties
    }
}

/// Provenance of an action: the target that created it and the configuration
/// it was analyzed in. Opaque to key computation except where an action
/// chooses to fold parts of it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOwner {
    label: String,
    target_kind: String,
    configuration_mnemonic: String,
    configuration_checksum: String,
    exec_properties: ExecProperties,
    execution_platform: Option<PlatformInfo>,
}

impl ActionOwner {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target_kind: String::new(),
            configuration_mnemonic: String::new(),
            configuration_checksum: String::new(),
            exec_properties: ExecProperties::new(),
            execution_platform: None,
        }
    }

    /// Owner for actions created by the build tool itself rather than a target
    pub fn system_owner() -> Self {
        Self::new("//:system").with_target_kind("system")
    }

    pub fn with_target_kind(mut self, kind: impl Into<String>) -> Self {
        self.target_kind = kind.into();
        self
    }

    pub fn with_configuration(
        mut self,
        mnemonic: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        self.configuration_mnemonic = mnemonic.into();
        self.configuration_checksum = checksum.into();
        self
    }

    pub fn with_exec_properties(mut self, properties: ExecProperties) -> Self {
        self.exec_properties = properties;
        self
    }

    pub fn with_execution_platform(mut self, platform: PlatformInfo) -> Self {
        self.execution_platform = Some(platform);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target_kind(&self) -> &str {
        &self.target_kind
    }

    pub fn configuration_mnemonic(&self) -> &str {
        &self.configuration_mnemonic
    }

    pub fn configuration_checksum(&self) -> &str {
        &self.configuration_checksum
    }

    pub fn exec_properties(&self) -> &ExecProperties {
        &self.exec_properties
    }

    pub fn execution_platform(&self) -> Option<&PlatformInfo> {
        self.execution_platform.as_ref()
    }
}
