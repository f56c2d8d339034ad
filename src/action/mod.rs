/// The action identity and cache-key contract.
///
/// Every unit of work in the build graph implements [`Action`]. The execution
/// engine asks an action for its cache key and its dependency sets, consults
/// an action cache, and either skips the action or executes it.
///
/// # Cache-key soundness
///
/// A previously executed action `a0` may stand in for a candidate `a1` only if
/// all of the following hold:
///
/// - `a0.key() == a1.key()` and the key is [`CacheKey::Valid`]
/// - names and contents of every artifact in `a1.inputs()` match those of `a0`
/// - names and values of every variable in `a1.client_environment_variables()`
///   match the values observed when `a0` ran
///
/// The key alone is never sufficient; [`crate::cache::ActionCacheChecker`]
/// performs the other two checks, and also requires that the outputs `a0`
/// produced are still present and unchanged. Concrete actions fold everything else that
/// influences their output into the key: flags, configuration, and a logic
/// version marker that changes whenever the code producing the output does.
pub mod context;
pub mod coverage;
pub mod error;
pub mod metadata;
pub mod owner;
pub mod spawn;
pub mod write;

pub use context::{ActionExecutionContext, ActionKeyContext, CancellationFlag, Interrupted};
pub use error::{ActionConstructionError, ActionExecutionError, KeyComputationError};
pub use metadata::{FileArtifactValue, InputMetadataProvider};
pub use owner::{merge_maps, ActionOwner, ExecProperties, PlatformInfo};

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{OnceLock, PoisonError, RwLock};
use tracing::warn;

use crate::artifact::Artifact;
use crate::depset::{DepSet, Order};
use crate::fingerprint::Fingerprint;
use crate::logging::{operations, status};

/// Result of asking an action for its cache key.
///
/// `Unrepresentable` replaces the reserved error string older build tools
/// returned: it is not a cache identity, and two unrepresentable keys must
/// never be taken to mean two equivalent actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Valid(String),
    Unrepresentable,
}

impl CacheKey {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, CacheKey::Valid(_))
    }

    pub fn as_valid(&self) -> Option<&str> {
        match self {
            CacheKey::Valid(key) => Some(key),
            CacheKey::Unrepresentable => None,
        }
    }

    /// Equality usable for deduplication: false whenever either side is
    /// unrepresentable
    pub fn same_identity(&self, other: &CacheKey) -> bool {
        match (self, other) {
            (CacheKey::Valid(a), CacheKey::Valid(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Valid(key) => f.write_str(key),
            CacheKey::Unrepresentable => f.write_str("<unrepresentable>"),
        }
    }
}

/// State shared by every concrete action: ownership, dependency sets, outputs
/// and execution hints. Concrete actions embed one and expose it through
/// [`Action::core`], which gives them the default behavior of the trait.
#[derive(Debug)]
pub struct ActionCore {
    owner: ActionOwner,
    inputs: RwLock<DepSet<Artifact>>,
    original_inputs: DepSet<Artifact>,
    tools: DepSet<Artifact>,
    scheduling_dependencies: DepSet<Artifact>,
    mandatory_inputs: Option<DepSet<Artifact>>,
    outputs: Vec<Artifact>,
    mandatory_outputs: Vec<Artifact>,
    client_env: BTreeSet<String>,
    exec_properties: ExecProperties,
    execution_platform: Option<PlatformInfo>,
    key_memo: OnceLock<CacheKey>,
}

impl ActionCore {
    pub fn builder(owner: ActionOwner) -> ActionCoreBuilder {
        ActionCoreBuilder::new(owner)
    }

    pub fn owner(&self) -> &ActionOwner {
        &self.owner
    }

    pub fn inputs(&self) -> DepSet<Artifact> {
        self.inputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn original_inputs(&self) -> &DepSet<Artifact> {
        &self.original_inputs
    }

    /// Replaces the current inputs after input discovery. The original inputs
    /// are untouched.
    pub(crate) fn replace_inputs(&self, inputs: DepSet<Artifact>) {
        *self.inputs.write().unwrap_or_else(PoisonError::into_inner) = inputs;
    }

    pub fn tools(&self) -> &DepSet<Artifact> {
        &self.tools
    }

    pub fn scheduling_dependencies(&self) -> &DepSet<Artifact> {
        &self.scheduling_dependencies
    }

    /// Defaults to the current inputs when no explicit subset was declared
    pub fn mandatory_inputs(&self) -> DepSet<Artifact> {
        match &self.mandatory_inputs {
            Some(set) => set.clone(),
            None => self.inputs(),
        }
    }

    pub fn outputs(&self) -> &[Artifact] {
        &self.outputs
    }

    pub fn mandatory_outputs(&self) -> &[Artifact] {
        &self.mandatory_outputs
    }

    pub fn primary_output(&self) -> &Artifact {
        // Construction rejects empty outputs
        &self.outputs[0]
    }

    pub fn client_environment_variables(&self) -> &BTreeSet<String> {
        &self.client_env
    }

    pub fn exec_properties(&self) -> &ExecProperties {
        &self.exec_properties
    }

    pub fn execution_platform(&self) -> Option<&PlatformInfo> {
        self.execution_platform.as_ref()
    }

    fn memoized_key(&self) -> Option<&CacheKey> {
        self.key_memo.get()
    }

    fn memoize_key(&self, key: CacheKey) -> CacheKey {
        self.key_memo.get_or_init(|| key).clone()
    }
}

pub struct ActionCoreBuilder {
    owner: ActionOwner,
    inputs: DepSet<Artifact>,
    tools: DepSet<Artifact>,
    scheduling_dependencies: DepSet<Artifact>,
    mandatory_inputs: Option<DepSet<Artifact>>,
    outputs: Vec<Artifact>,
    mandatory_outputs: Vec<Artifact>,
    client_env: BTreeSet<String>,
    exec_properties: Option<ExecProperties>,
    execution_platform: Option<PlatformInfo>,
}

impl ActionCoreBuilder {
    fn new(owner: ActionOwner) -> Self {
        let execution_platform = owner.execution_platform().cloned();
        Self {
            owner,
            inputs: DepSet::empty(Order::Stable),
            tools: DepSet::empty(Order::Stable),
            scheduling_dependencies: DepSet::empty(Order::Stable),
            mandatory_inputs: None,
            outputs: Vec::new(),
            mandatory_outputs: Vec::new(),
            client_env: BTreeSet::new(),
            exec_properties: None,
            execution_platform,
        }
    }

    pub fn inputs(mut self, inputs: DepSet<Artifact>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn tools(mut self, tools: DepSet<Artifact>) -> Self {
        self.tools = tools;
        self
    }

    pub fn scheduling_dependencies(mut self, deps: DepSet<Artifact>) -> Self {
        self.scheduling_dependencies = deps;
        self
    }

    pub fn mandatory_inputs(mut self, mandatory: DepSet<Artifact>) -> Self {
        self.mandatory_inputs = Some(mandatory);
        self
    }

    pub fn output(mut self, output: Artifact) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn mandatory_outputs(mut self, outputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.mandatory_outputs.extend(outputs);
        self
    }

    pub fn client_env_var(mut self, name: impl Into<String>) -> Self {
        self.client_env.insert(name.into());
        self
    }

    /// Overrides the properties otherwise inherited from platform and owner
    pub fn exec_properties(mut self, properties: ExecProperties) -> Self {
        self.exec_properties = Some(properties);
        self
    }

    pub fn execution_platform(mut self, platform: PlatformInfo) -> Self {
        self.execution_platform = Some(platform);
        self
    }

    pub fn build(self) -> Result<ActionCore, ActionConstructionError> {
        if self.outputs.is_empty() {
            return Err(ActionConstructionError::NoOutputs);
        }
        let mut seen = HashSet::with_capacity(self.outputs.len());
        for output in &self.outputs {
            if !seen.insert(output) {
                return Err(ActionConstructionError::DuplicateOutput(output.to_string()));
            }
        }
        if let Some(missing) = self.mandatory_outputs.iter().find(|o| !seen.contains(o)) {
            return Err(ActionConstructionError::MandatoryOutputNotInOutputs(
                missing.to_string(),
            ));
        }

        if !self.tools.is_empty() || self.mandatory_inputs.is_some() {
            let inputs = self.inputs.to_hash_set();
            if let Some(tool) = self.tools.to_list().into_iter().find(|t| !inputs.contains(t)) {
                return Err(ActionConstructionError::ToolNotInInputs(tool.to_string()));
            }
            if let Some(mandatory) = &self.mandatory_inputs {
                if let Some(missing) = mandatory.to_list().into_iter().find(|m| !inputs.contains(m)) {
                    return Err(ActionConstructionError::MandatoryInputNotInInputs(
                        missing.to_string(),
                    ));
                }
            }
        }

        let exec_properties = self.exec_properties.unwrap_or_else(|| {
            let platform_properties = self
                .execution_platform
                .as_ref()
                .map(|p| p.exec_properties().clone())
                .unwrap_or_default();
            merge_maps(&platform_properties, self.owner.exec_properties())
        });

        Ok(ActionCore {
            owner: self.owner,
            original_inputs: self.inputs.clone(),
            inputs: RwLock::new(self.inputs),
            tools: self.tools,
            scheduling_dependencies: self.scheduling_dependencies,
            mandatory_inputs: self.mandatory_inputs,
            outputs: self.outputs,
            mandatory_outputs: self.mandatory_outputs,
            client_env: self.client_env,
            exec_properties,
            execution_platform: self.execution_platform,
            key_memo: OnceLock::new(),
        })
    }
}

/// Side-effect-free queries every action answers, plus key computation.
///
/// Implementors provide [`Action::core`], [`Action::mnemonic`] and
/// [`Action::compute_key`]; everything else has a default that delegates to
/// the [`ActionCore`] and may be overridden.
pub trait Action: Send + Sync {
    fn core(&self) -> &ActionCore;

    /// Short constant naming the kind of action, e.g. `Javac`
    fn mnemonic(&self) -> &str;

    /// Folds the action-specific part of the key into `fp`
    fn compute_key(
        &self,
        ctx: &ActionKeyContext,
        metadata: Option<&dyn InputMetadataProvider>,
        fp: &mut Fingerprint,
    ) -> Result<(), KeyComputationError>;

    /// Returns the cache key. Deterministic for a fixed action state and fixed
    /// metadata; safe to call concurrently. Internal failures yield
    /// [`CacheKey::Unrepresentable`]; only interruption is an error.
    fn key(
        &self,
        ctx: &ActionKeyContext,
        metadata: Option<&dyn InputMetadataProvider>,
    ) -> Result<CacheKey, Interrupted> {
        ctx.check_cancelled()?;

        let memoizable = metadata.is_none() && !self.discovers_inputs();
        if memoizable {
            if let Some(key) = self.core().memoized_key() {
                return Ok(key.clone());
            }
        }

        let mut fp = Fingerprint::new();
        let key = match self.compute_key(ctx, metadata, &mut fp) {
            Ok(()) => {
                ctx.check_cancelled()?;
                // Separates the action-specific fields from the generic ones
                fp.add_str("");
                fp.add_str(self.mnemonic());
                fp.add_string_map(&self.execution_info());
                fp.add_optional_str(self.execution_platform().map(PlatformInfo::label));
                CacheKey::Valid(fp.finish())
            }
            Err(KeyComputationError::Interrupted(interrupted)) => return Err(interrupted),
            Err(err) => {
                warn!(
                    operation = operations::KEY,
                    status = status::ERROR,
                    mnemonic = self.mnemonic(),
                    owner = self.owner().label(),
                    error = %err,
                    "key computation failed, action is uncacheable"
                );
                CacheKey::Unrepresentable
            }
        };

        if memoizable {
            return Ok(self.core().memoize_key(key));
        }
        Ok(key)
    }

    fn owner(&self) -> &ActionOwner {
        self.core().owner()
    }

    /// Whether independently constructed, structurally equal instances may be
    /// merged into one. Some actions opt out because sharing them is not
    /// actually safe.
    fn is_shareable(&self) -> bool {
        true
    }

    fn discovers_inputs(&self) -> bool {
        false
    }

    /// Replaces the current inputs with the original inputs plus
    /// `discovered`. Only actions that discover inputs accept this.
    fn update_inputs(&self, _discovered: DepSet<Artifact>) -> Result<(), ActionConstructionError> {
        Err(ActionConstructionError::InputsFixed(self.mnemonic().to_string()))
    }

    fn progress_message(&self) -> Option<String> {
        None
    }

    fn describe(&self) -> String {
        self.progress_message()
            .unwrap_or_else(|| format!("{} {}", self.mnemonic(), self.primary_output()))
    }

    fn pretty_print(&self) -> String {
        format!("action '{}'", self.describe())
    }

    /// Inputs whose identity decides whether a persistent worker must restart
    fn tools(&self) -> DepSet<Artifact> {
        self.core().tools().clone()
    }

    fn inputs(&self) -> DepSet<Artifact> {
        self.core().inputs()
    }

    /// Inputs before discovery; identical for the lifetime of the action
    fn original_inputs(&self) -> DepSet<Artifact> {
        self.core().original_inputs().clone()
    }

    /// Must be built before this action runs, but are not part of its key
    fn scheduling_dependencies(&self) -> DepSet<Artifact> {
        self.core().scheduling_dependencies().clone()
    }

    fn mandatory_inputs(&self) -> DepSet<Artifact> {
        self.core().mandatory_inputs()
    }

    fn outputs(&self) -> &[Artifact] {
        self.core().outputs()
    }

    fn mandatory_outputs(&self) -> &[Artifact] {
        self.core().mandatory_outputs()
    }

    fn primary_output(&self) -> &Artifact {
        self.core().primary_output()
    }

    fn primary_input(&self) -> Option<Artifact> {
        self.inputs().to_list().into_iter().next()
    }

    /// Names only; values are resolved and compared by the caller
    fn client_environment_variables(&self) -> &BTreeSet<String> {
        self.core().client_environment_variables()
    }

    fn exec_properties(&self) -> &ExecProperties {
        self.core().exec_properties()
    }

    fn execution_info(&self) -> ExecProperties {
        self.exec_properties().clone()
    }

    fn execution_platform(&self) -> Option<&PlatformInfo> {
        self.core().execution_platform()
    }

    /// Inputs that shadow-execution tooling must see to mirror this action
    fn input_files_for_extra_action(
        &self,
        ctx: &ActionExecutionContext,
    ) -> Result<DepSet<Artifact>, ActionExecutionError> {
        ctx.check_cancelled()?;
        Ok(self.inputs())
    }
}

/// Actions that can do their own work once the runner decides not to skip
pub trait ExecutableAction: Action {
    fn execute(&self, ctx: &ActionExecutionContext) -> Result<(), ActionExecutionError>;
}
