/// Actions that run a tool.
///
/// Process execution itself is outside this crate: a [`SpawnAction`] turns
/// itself into a [`Spawn`] description and hands it to whatever
/// [`SpawnRunner`] the execution context provides (local, sandboxed, remote
/// or a persistent worker).
use std::collections::{BTreeMap, BTreeSet};

use super::{
    Action, ActionConstructionError, ActionCore, ActionExecutionContext, ActionExecutionError,
    ActionKeyContext, ActionOwner, ExecProperties, ExecutableAction, InputMetadataProvider,
    KeyComputationError, PlatformInfo,
};
use crate::artifact::Artifact;
use crate::depset::{DepSet, DepSetBuilder, Order};
use crate::fingerprint::Fingerprint;

/// Everything a runner needs to execute one process
#[derive(Debug, Clone)]
pub struct Spawn {
    pub mnemonic: String,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Client environment values for the variables the action declared
    pub client_env: BTreeMap<String, String>,
    pub inputs: Vec<Artifact>,
    pub tools: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub execution_info: ExecProperties,
    pub execution_platform: Option<PlatformInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnResult {
    pub exit_code: i32,
    pub stderr: String,
    /// Inputs the tool reported using, for actions that discover inputs
    pub discovered_inputs: Option<Vec<Artifact>>,
}

pub trait SpawnRunner: Send + Sync {
    fn run(
        &self,
        spawn: &Spawn,
        ctx: &ActionExecutionContext,
    ) -> Result<SpawnResult, ActionExecutionError>;
}

#[derive(Debug)]
pub struct SpawnAction {
    core: ActionCore,
    mnemonic: String,
    arguments: Vec<String>,
    make_variables: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
    progress_message: Option<String>,
    discovers_inputs: bool,
    shareable: bool,
}

impl SpawnAction {
    /// Changes whenever the way a spawn is derived from this action does
    const GUID: &'static str = "b4f1d0a7-93c2-4c6e-8a15-2e7d6f0c9b38";

    pub fn builder(owner: ActionOwner, mnemonic: impl Into<String>) -> SpawnActionBuilder {
        SpawnActionBuilder {
            owner,
            mnemonic: mnemonic.into(),
            arguments: Vec::new(),
            make_variables: BTreeMap::new(),
            environment: BTreeMap::new(),
            inputs: Vec::new(),
            tools: Vec::new(),
            scheduling_dependencies: DepSet::empty(Order::Stable),
            mandatory_inputs: None,
            outputs: Vec::new(),
            client_env: BTreeSet::new(),
            exec_properties: None,
            progress_message: None,
            discovers_inputs: false,
            shareable: true,
        }
    }

    /// Arguments with `$(NAME)` references replaced; `$$` is a literal `$`
    pub fn expanded_arguments(&self) -> Result<Vec<String>, KeyComputationError> {
        self.arguments
            .iter()
            .map(|arg| expand_make_variables(arg, &self.make_variables))
            .collect()
    }

    pub fn to_spawn(&self, ctx: &ActionExecutionContext) -> Result<Spawn, ActionExecutionError> {
        let arguments = self
            .expanded_arguments()
            .map_err(|e| ActionExecutionError::SpawnFailed {
                mnemonic: self.mnemonic.clone(),
                exit_code: None,
                message: e.to_string(),
            })?;
        let client_env = self
            .client_environment_variables()
            .iter()
            .filter_map(|name| {
                ctx.client_env()
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();

        Ok(Spawn {
            mnemonic: self.mnemonic.clone(),
            arguments,
            environment: self.environment.clone(),
            client_env,
            inputs: self.inputs().to_list(),
            tools: self.tools().to_list(),
            outputs: self.outputs().to_vec(),
            execution_info: self.execution_info(),
            execution_platform: self.execution_platform().cloned(),
        })
    }
}

fn expand_make_variables(
    arg: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, KeyComputationError> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('(') {
            let end = body.find(')').ok_or_else(|| {
                KeyComputationError::CommandLineExpansion(format!("unterminated variable in '{arg}'"))
            })?;
            let name = &body[..end];
            let value = vars.get(name).ok_or_else(|| {
                KeyComputationError::CommandLineExpansion(format!("undefined variable $({name})"))
            })?;
            out.push_str(value);
            rest = &body[end + 1..];
        } else {
            return Err(KeyComputationError::CommandLineExpansion(format!(
                "'$' must be followed by '(' or '$' in '{arg}'"
            )));
        }
    }
    out.push_str(rest);
    Ok(out)
}

impl Action for SpawnAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    fn compute_key(
        &self,
        ctx: &ActionKeyContext,
        _metadata: Option<&dyn InputMetadataProvider>,
        fp: &mut Fingerprint,
    ) -> Result<(), KeyComputationError> {
        fp.add_str(Self::GUID);
        fp.add_strings(self.expanded_arguments()?);
        fp.add_string_map(&self.environment);
        fp.add_strings(self.client_environment_variables().iter());
        ctx.check_cancelled()?;
        fp.add_depset(self.core.tools());
        // Input names are otherwise checked by the cache; after discovery they
        // must also move the key or validation could pass on stale inputs
        fp.add_bool(self.discovers_inputs);
        if self.discovers_inputs {
            fp.add_depset(&self.inputs());
        }
        Ok(())
    }

    fn is_shareable(&self) -> bool {
        self.shareable
    }

    fn discovers_inputs(&self) -> bool {
        self.discovers_inputs
    }

    /// The original inputs stay part of the new set, so tools remain a
    /// subset of the inputs
    fn update_inputs(&self, discovered: DepSet<Artifact>) -> Result<(), ActionConstructionError> {
        if !self.discovers_inputs {
            return Err(ActionConstructionError::InputsFixed(self.mnemonic.clone()));
        }
        let updated = DepSet::union(
            Order::Stable,
            [self.core.original_inputs().clone(), discovered],
        )?;
        self.core.replace_inputs(updated);
        Ok(())
    }

    fn progress_message(&self) -> Option<String> {
        self.progress_message.clone()
    }

    fn input_files_for_extra_action(
        &self,
        ctx: &ActionExecutionContext,
    ) -> Result<DepSet<Artifact>, ActionExecutionError> {
        ctx.check_cancelled()?;
        if !self.discovers_inputs {
            return Ok(self.inputs());
        }
        let mut builder = DepSetBuilder::new(Order::Stable);
        builder
            .add_transitive(self.original_inputs())
            .and_then(|b| b.add_transitive(self.inputs()))
            .map_err(|e| ActionExecutionError::SpawnFailed {
                mnemonic: self.mnemonic.clone(),
                exit_code: None,
                message: e.to_string(),
            })?;
        Ok(builder.build())
    }
}

impl ExecutableAction for SpawnAction {
    fn execute(&self, ctx: &ActionExecutionContext) -> Result<(), ActionExecutionError> {
        ctx.check_cancelled()?;
        let runner = ctx
            .spawn_runner()
            .ok_or_else(|| ActionExecutionError::NoSpawnRunner {
                mnemonic: self.mnemonic.clone(),
            })?;

        let spawn = self.to_spawn(ctx)?;
        let result = runner.run(&spawn, ctx)?;
        ctx.check_cancelled()?;

        if result.exit_code != 0 {
            return Err(ActionExecutionError::SpawnFailed {
                mnemonic: self.mnemonic.clone(),
                exit_code: Some(result.exit_code),
                message: result.stderr,
            });
        }

        if self.discovers_inputs {
            if let Some(discovered) = result.discovered_inputs {
                let discovered = DepSet::of(Order::Stable, discovered);
                self.update_inputs(discovered).map_err(|e| {
                    ActionExecutionError::SpawnFailed {
                        mnemonic: self.mnemonic.clone(),
                        exit_code: None,
                        message: e.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }
}

pub struct SpawnActionBuilder {
    owner: ActionOwner,
    mnemonic: String,
    arguments: Vec<String>,
    make_variables: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
    inputs: Vec<DepSet<Artifact>>,
    tools: Vec<DepSet<Artifact>>,
    scheduling_dependencies: DepSet<Artifact>,
    mandatory_inputs: Option<DepSet<Artifact>>,
    outputs: Vec<Artifact>,
    client_env: BTreeSet<String>,
    exec_properties: Option<ExecProperties>,
    progress_message: Option<String>,
    discovers_inputs: bool,
    shareable: bool,
}

impl SpawnActionBuilder {
    pub fn argument(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn make_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.make_variables.insert(name.into(), value.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn inputs(mut self, inputs: DepSet<Artifact>) -> Self {
        self.inputs.push(inputs);
        self
    }

    /// Tools are inputs too; they are added to the input set on build
    pub fn tools(mut self, tools: DepSet<Artifact>) -> Self {
        self.tools.push(tools);
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

    pub fn client_env_var(mut self, name: impl Into<String>) -> Self {
        self.client_env.insert(name.into());
        self
    }

    pub fn exec_properties(mut self, properties: ExecProperties) -> Self {
        self.exec_properties = Some(properties);
        self
    }

    pub fn progress_message(mut self, message: impl Into<String>) -> Self {
        self.progress_message = Some(message.into());
        self
    }

    pub fn discovers_inputs(mut self) -> Self {
        self.discovers_inputs = true;
        self
    }

    /// Opts out of deduplication with structurally equal actions
    pub fn not_shareable(mut self) -> Self {
        self.shareable = false;
        self
    }

    pub fn build(self) -> Result<SpawnAction, ActionConstructionError> {
        let tools = DepSet::union(Order::Stable, self.tools)?;
        let inputs = DepSet::union(
            Order::Stable,
            self.inputs.into_iter().chain(std::iter::once(tools.clone())),
        )?;

        let mut core = ActionCore::builder(self.owner)
            .inputs(inputs)
            .tools(tools)
            .scheduling_dependencies(self.scheduling_dependencies)
            .outputs(self.outputs);
        if let Some(mandatory) = self.mandatory_inputs {
            core = core.mandatory_inputs(mandatory);
        }
        if let Some(properties) = self.exec_properties {
            core = core.exec_properties(properties);
        }
        for name in self.client_env {
            core = core.client_env_var(name);
        }

        Ok(SpawnAction {
            core: core.build()?,
            mnemonic: self.mnemonic,
            arguments: self.arguments,
            make_variables: self.make_variables,
            environment: self.environment,
            progress_message: self.progress_message,
            discovers_inputs: self.discovers_inputs,
            shareable: self.shareable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::CacheKey;
    use std::sync::{Arc, Mutex};

    fn set(paths: &[&str]) -> DepSet<Artifact> {
        DepSet::of(Order::Stable, paths.iter().map(Artifact::source))
    }

    fn javac(args: &[&str]) -> SpawnActionBuilder {
        SpawnAction::builder(ActionOwner::new("//java/com:lib"), "Javac")
            .arguments(args.iter().copied())
            .inputs(set(&["java/com/Foo.java"]))
            .tools(set(&["tools/javac"]))
            .output(Artifact::derived("bin/java/com/lib.jar"))
    }

    fn key(action: &SpawnAction) -> CacheKey {
        action.key(&crate::action::ActionKeyContext::new(), None).unwrap()
    }

    #[derive(Default)]
    struct RecordingRunner {
        spawns: Mutex<Vec<Spawn>>,
        exit_code: i32,
        discovered: Option<Vec<Artifact>>,
    }

    impl SpawnRunner for RecordingRunner {
        fn run(
            &self,
            spawn: &Spawn,
            _ctx: &ActionExecutionContext,
        ) -> Result<SpawnResult, ActionExecutionError> {
            self.spawns.lock().unwrap().push(spawn.clone());
            Ok(SpawnResult {
                exit_code: self.exit_code,
                stderr: "boom".to_string(),
                discovered_inputs: self.discovered.clone(),
            })
        }
    }

    #[test]
    fn test_tools_are_part_of_inputs() {
        let action = javac(&["-d", "out"]).build().unwrap();
        let inputs = action.inputs().to_hash_set();
        assert!(inputs.contains(&Artifact::source("tools/javac")));
        assert!(inputs.contains(&Artifact::source("java/com/Foo.java")));
        assert_eq!(action.tools().to_list(), vec![Artifact::source("tools/javac")]);
    }

    #[test]
    fn test_key_tracks_arguments_env_and_tools() {
        let base = key(&javac(&["-g"]).build().unwrap());
        assert_eq!(base, key(&javac(&["-g"]).build().unwrap()));
        assert_ne!(base, key(&javac(&["-O"]).build().unwrap()));
        assert_ne!(base, key(&javac(&["-g"]).env("LANG", "C").build().unwrap()));
        assert_ne!(
            base,
            key(&javac(&["-g"]).tools(set(&["tools/jdk"])).build().unwrap())
        );
        assert_ne!(
            base,
            key(&javac(&["-g"]).client_env_var("PATH").build().unwrap())
        );
    }

    #[test]
    fn test_make_variables_expand() {
        let action = javac(&["--target=$(TARGET)", "cost=$$5"])
            .make_variable("TARGET", "11")
            .build()
            .unwrap();
        assert_eq!(
            action.expanded_arguments().unwrap(),
            vec!["--target=11", "cost=$5"]
        );
    }

    #[test]
    fn test_undefined_variable_makes_key_unrepresentable() {
        let action = javac(&["$(MISSING)"]).build().unwrap();
        assert_eq!(key(&action), CacheKey::Unrepresentable);
        let unterminated = javac(&["$(OPEN"]).build().unwrap();
        assert_eq!(key(&unterminated), CacheKey::Unrepresentable);
    }

    #[test]
    fn test_execute_requires_runner() {
        let action = javac(&[]).build().unwrap();
        let ctx = ActionExecutionContext::new("/exec");
        assert!(matches!(
            action.execute(&ctx),
            Err(ActionExecutionError::NoSpawnRunner { .. })
        ));
    }

    #[test]
    fn test_execute_passes_spawn_to_runner() {
        let runner = Arc::new(RecordingRunner::default());
        let action = javac(&["-g"])
            .client_env_var("HOME")
            .exec_properties(ExecProperties::from([("cpu".into(), "2".into())]))
            .build()
            .unwrap();
        let ctx = ActionExecutionContext::new("/exec")
            .with_spawn_runner(runner.clone())
            .with_client_env(BTreeMap::from([
                ("HOME".to_string(), "/home/dev".to_string()),
                ("SECRET".to_string(), "x".to_string()),
            ]));

        action.execute(&ctx).unwrap();

        let spawns = runner.spawns.lock().unwrap();
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].arguments, vec!["-g"]);
        assert_eq!(
            spawns[0].client_env,
            BTreeMap::from([("HOME".to_string(), "/home/dev".to_string())])
        );
        assert_eq!(spawns[0].execution_info.get("cpu").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_nonzero_exit_is_spawn_failure() {
        let runner = Arc::new(RecordingRunner {
            exit_code: 2,
            ..Default::default()
        });
        let action = javac(&[]).build().unwrap();
        let ctx = ActionExecutionContext::new("/exec").with_spawn_runner(runner);
        match action.execute(&ctx) {
            Err(ActionExecutionError::SpawnFailed {
                exit_code, message, ..
            }) => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_discovery_keeps_original_inputs_stable() {
        let header = Artifact::source("java/com/Gen.h");
        let runner = Arc::new(RecordingRunner {
            discovered: Some(vec![header.clone()]),
            ..Default::default()
        });
        let action = javac(&[]).discovers_inputs().build().unwrap();
        let original_before = action.original_inputs().to_list();
        let key_before = key(&action);

        let ctx = ActionExecutionContext::new("/exec").with_spawn_runner(runner);
        action.execute(&ctx).unwrap();

        assert_eq!(action.original_inputs().to_list(), original_before);
        assert!(action.inputs().to_hash_set().contains(&header));
        assert!(!action.original_inputs().to_hash_set().contains(&header));
        assert_ne!(key(&action), key_before);

        let extra = action.input_files_for_extra_action(&ctx).unwrap().to_hash_set();
        assert!(extra.contains(&header));
        assert!(extra.contains(&Artifact::source("java/com/Foo.java")));
    }

    #[test]
    fn test_non_discovering_inputs_are_fixed() {
        let action = javac(&[]).build().unwrap();
        assert_eq!(
            action.update_inputs(set(&["x"])).unwrap_err(),
            ActionConstructionError::InputsFixed("Javac".to_string())
        );
    }

    #[test]
    fn test_sharing_opt_out() {
        assert!(javac(&[]).build().unwrap().is_shareable());
        assert!(!javac(&[]).not_shareable().build().unwrap().is_shareable());
    }
}
