/// Baseline (empty) coverage for a non-test target.
///
/// The action has no real inputs: it only needs the exec paths of the
/// instrumented files, which are known at analysis time. Its output lists each
/// file as an LCOV source record with no hits.
use std::io::Write;

use super::write::{write_output_atomically, DeterministicWriter, FileWriteAction};
use super::{
    Action, ActionConstructionError, ActionCore, ActionExecutionContext, ActionExecutionError,
    ActionKeyContext, ActionOwner, ExecutableAction, InputMetadataProvider, KeyComputationError,
};
use crate::artifact::{add_artifacts_to_fingerprint, Artifact};
use crate::depset::{DepSet, Order};
use crate::fingerprint::Fingerprint;

pub const BASELINE_COVERAGE_FILENAME: &str = "baseline_coverage.dat";

#[derive(Debug)]
pub struct BaselineCoverageAction {
    core: ActionCore,
    instrumented_files: DepSet<Artifact>,
}

impl BaselineCoverageAction {
    pub fn new(
        owner: ActionOwner,
        instrumented_files: DepSet<Artifact>,
        primary_output: Artifact,
    ) -> Result<Self, ActionConstructionError> {
        let core = ActionCore::builder(owner)
            .inputs(DepSet::empty(Order::Stable))
            .output(primary_output)
            .build()?;
        Ok(Self {
            core,
            instrumented_files,
        })
    }

    /// Places the output at `<testlogs>/<package>/<target>/baseline_coverage.dat`;
    /// baseline coverage lands next to real test logs.
    pub fn create(
        owner: ActionOwner,
        instrumented_files: DepSet<Artifact>,
        testlogs_dir: &str,
        package: &str,
        target_name: &str,
    ) -> Result<Self, ActionConstructionError> {
        let output = Artifact::derived(format!(
            "{testlogs_dir}/{package}/{target_name}/{BASELINE_COVERAGE_FILENAME}"
        ));
        Self::new(owner, instrumented_files, output)
    }

    pub fn instrumented_files(&self) -> &DepSet<Artifact> {
        &self.instrumented_files
    }
}

impl Action for BaselineCoverageAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn mnemonic(&self) -> &str {
        "BaselineCoverage"
    }

    // No logic-version GUID is folded in, so a change to the writer below
    // does not change the key. The file list is also taken in set order
    // rather than sorted.
    fn compute_key(
        &self,
        ctx: &ActionKeyContext,
        _metadata: Option<&dyn InputMetadataProvider>,
        fp: &mut Fingerprint,
    ) -> Result<(), KeyComputationError> {
        ctx.check_cancelled()?;
        add_artifacts_to_fingerprint(fp, &self.instrumented_files.to_list());
        Ok(())
    }
}

impl FileWriteAction for BaselineCoverageAction {
    fn new_deterministic_writer(
        &self,
        _ctx: &ActionExecutionContext,
    ) -> Box<dyn DeterministicWriter + '_> {
        Box::new(move |out: &mut dyn Write| {
            for file in self.instrumented_files.to_list() {
                writeln!(out, "SF:{}", file.exec_path_string())?;
                out.write_all(b"end_of_record\n")?;
            }
            Ok(())
        })
    }
}

impl ExecutableAction for BaselineCoverageAction {
    fn execute(&self, ctx: &ActionExecutionContext) -> Result<(), ActionExecutionError> {
        write_output_atomically(self, ctx)
    }
}
