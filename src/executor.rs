/// Drives a single action through key computation, the cache check and
/// execution.
///
/// Scheduling, parallelism and retries are the caller's concern; this runner
/// handles one action at a time and reports what happened.
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::action::metadata::FilesystemMetadataProvider;
use crate::action::{
    ActionExecutionContext, ActionExecutionError, CacheKey, ExecutableAction, InputMetadataProvider,
};
use crate::cache::{ActionCacheChecker, CacheDecision, MissReason};
use crate::depset::{DepSet, Order};
use crate::logging::operations;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Constructed,
    KeyRequested,
    KeyValid,
    KeyUnrepresentable,
    CacheChecked,
    Skipped,
    Executed,
    InputsDiscovered,
    Completed,
    Failed,
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionState::Constructed => "constructed",
            ActionState::KeyRequested => "key_requested",
            ActionState::KeyValid => "key_valid",
            ActionState::KeyUnrepresentable => "key_unrepresentable",
            ActionState::CacheChecked => "cache_checked",
            ActionState::Skipped => "skipped",
            ActionState::Executed => "executed",
            ActionState::InputsDiscovered => "inputs_discovered",
            ActionState::Completed => "completed",
            ActionState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Key the cache entry was (or would have been) recorded under
    pub key: CacheKey,
    pub decision: CacheDecision,
    pub recorded: bool,
    pub states: Vec<ActionState>,
    pub duration: Duration,
}

impl ActionOutcome {
    pub fn skipped(&self) -> bool {
        self.decision == CacheDecision::Skip
    }

    pub fn final_state(&self) -> ActionState {
        self.states
            .last()
            .copied()
            .unwrap_or(ActionState::Constructed)
    }
}

#[derive(Clone, Default)]
pub struct ActionRunner {
    checker: Option<ActionCacheChecker>,
}

impl ActionRunner {
    /// A runner without a cache always executes
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(checker: ActionCacheChecker) -> Self {
        Self {
            checker: Some(checker),
        }
    }

    pub fn run<A>(
        &self,
        action: &A,
        ctx: &ActionExecutionContext,
    ) -> Result<ActionOutcome, ActionExecutionError>
    where
        A: ExecutableAction + ?Sized,
    {
        let start = Instant::now();
        let mut states = vec![ActionState::Constructed];

        let result = self.run_inner(action, ctx, &mut states);
        let duration = start.elapsed();

        match result {
            Ok((key, decision, recorded)) => {
                info!(
                    operation = operations::RUN,
                    status = %states.last().copied().unwrap_or(ActionState::Constructed),
                    mnemonic = action.mnemonic(),
                    output = %action.primary_output(),
                    duration_ms = duration.as_millis() as u64,
                    "{}",
                    action.describe()
                );
                Ok(ActionOutcome {
                    key,
                    decision,
                    recorded,
                    states,
                    duration,
                })
            }
            Err(err) => {
                states.push(ActionState::Failed);
                error!(
                    operation = operations::RUN,
                    status = %ActionState::Failed,
                    mnemonic = action.mnemonic(),
                    output = %action.primary_output(),
                    error = %err,
                    "{} failed",
                    action.pretty_print()
                );
                Err(err)
            }
        }
    }

    fn run_inner<A>(
        &self,
        action: &A,
        ctx: &ActionExecutionContext,
        states: &mut Vec<ActionState>,
    ) -> Result<(CacheKey, CacheDecision, bool), ActionExecutionError>
    where
        A: ExecutableAction + ?Sized,
    {
        ctx.check_cancelled()?;

        let fallback: FilesystemMetadataProvider;
        let metadata: &dyn InputMetadataProvider = match ctx.metadata() {
            Some(metadata) => metadata,
            None => {
                fallback = FilesystemMetadataProvider::new(ctx.exec_root());
                &fallback
            }
        };

        // Inputs a previous run discovered take part in the key and the
        // cache check, as if discovery had already happened
        let restored = self.restore_discovered_inputs(action)?;

        states.push(ActionState::KeyRequested);
        let key = compute_key(action, ctx, metadata)?;
        states.push(if key.is_cacheable() {
            ActionState::KeyValid
        } else {
            ActionState::KeyUnrepresentable
        });

        let decision = match &self.checker {
            Some(checker) => checker.check(action, &key, metadata, ctx.client_env())?,
            None => CacheDecision::Execute(MissReason::NotCached),
        };
        states.push(ActionState::CacheChecked);
        debug!(
            operation = operations::CHECK,
            mnemonic = action.mnemonic(),
            key = %key,
            decision = ?decision
        );

        if decision == CacheDecision::Skip {
            states.push(ActionState::Skipped);
            return Ok((key, decision, false));
        }

        if restored {
            // Discovery starts over from the original inputs
            action.update_inputs(DepSet::empty(Order::Stable))?;
        }
        check_mandatory_inputs(action, metadata)?;
        action.execute(ctx)?;
        states.push(ActionState::Executed);
        for output in action.outputs() {
            metadata.invalidate(output);
        }

        let mut key = key;
        let mut current = None;
        if action.discovers_inputs() {
            // The recorded key must describe the inputs the action actually read
            states.push(ActionState::InputsDiscovered);
            key = compute_key(action, ctx, metadata)?;
            if let Some(checker) = &self.checker {
                ctx.check_cancelled()?;
                current = Some(checker.check(action, &key, metadata, ctx.client_env())?);
                states.push(ActionState::CacheChecked);
            }
        }

        ctx.check_cancelled()?;
        let recorded = match &self.checker {
            // The stored entry already describes this result
            Some(_) if current == Some(CacheDecision::Skip) => false,
            Some(checker) => checker.record(action, &key, metadata, ctx.client_env())?,
            None => false,
        };
        states.push(ActionState::Completed);

        Ok((key, decision, recorded))
    }

    fn restore_discovered_inputs<A>(&self, action: &A) -> Result<bool, ActionExecutionError>
    where
        A: ExecutableAction + ?Sized,
    {
        let Some(checker) = &self.checker else {
            return Ok(false);
        };
        let Some(discovered) = checker.recorded_discovered_inputs(action)? else {
            return Ok(false);
        };
        debug!(
            operation = operations::CHECK,
            mnemonic = action.mnemonic(),
            count = discovered.len(),
            "restoring discovered inputs"
        );
        action.update_inputs(DepSet::of(Order::Stable, discovered))?;
        Ok(true)
    }
}

fn compute_key<A>(
    action: &A,
    ctx: &ActionExecutionContext,
    metadata: &dyn InputMetadataProvider,
) -> Result<CacheKey, ActionExecutionError>
where
    A: ExecutableAction + ?Sized,
{
    // Metadata is only consulted by actions whose key depends on discovered
    // inputs; passing none keeps the key memoizable for everyone else.
    let metadata = action.discovers_inputs().then_some(metadata);
    Ok(action.key(&ctx.key_context(), metadata)?)
}

fn check_mandatory_inputs<A>(
    action: &A,
    metadata: &dyn InputMetadataProvider,
) -> Result<(), ActionExecutionError>
where
    A: ExecutableAction + ?Sized,
{
    let mut missing = Vec::new();
    for artifact in action.mandatory_inputs().to_list() {
        if metadata.metadata(&artifact)?.is_none() {
            missing.push(artifact.exec_path_string().to_string());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ActionExecutionError::MissingMandatoryInputs(missing))
    }
}
