/// `actionkey baseline` command implementation
///
/// Builds a baseline coverage action for one target and runs it through the
/// action cache.
use anyhow::{Context, Result};
use glob::glob;
use std::path::Path;

use super::{cli_owner, execution_context, load_config, runner};
use crate::action::coverage::BaselineCoverageAction;
use crate::action::{Action, ActionKeyContext};
use crate::artifact::Artifact;
use crate::cli::BaselineArgs;
use crate::cli_utils::actionkey_prefix;
use crate::depset::{DepSet, Order};

pub fn run(args: BaselineArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let exec_root = config.exec_root();

    let files = expand_inputs(&args.files, &exec_root)?;
    let owner = cli_owner(&config, format!("//{}:{}", args.package, args.target));
    let action = BaselineCoverageAction::create(
        owner,
        DepSet::of(Order::Stable, files.iter().map(Artifact::source)),
        &config.exec.testlogs_dir,
        &args.package,
        &args.target,
    )
    .context("Failed to create baseline coverage action")?;

    if args.dry_run {
        let key = action.key(&ActionKeyContext::new(), None)?;
        println!("{key}");
        return Ok(());
    }

    let ctx = execution_context(&config);
    let outcome = runner(&config)?.run(&action, &ctx)?;

    eprintln!(
        "{} {} {} ({} files)",
        actionkey_prefix(),
        if outcome.skipped() { "Up to date:" } else { "Wrote" },
        action.primary_output(),
        files.len()
    );
    println!("{}", outcome.key);
    Ok(())
}

/// Resolves literal exec paths and glob patterns to exec-relative paths.
/// Globs match files under the exec root; results are sorted and deduplicated.
pub fn expand_inputs(patterns: &[String], exec_root: &Path) -> Result<Vec<String>> {
    let (globs, literals): (Vec<&String>, Vec<&String>) = patterns
        .iter()
        .partition(|pattern| pattern.contains(['*', '?', '[']));
    let mut files: Vec<String> = literals.into_iter().cloned().collect();

    if !globs.is_empty() {
        let root = exec_root
            .canonicalize()
            .with_context(|| format!("Exec root does not exist: {}", exec_root.display()))?;

        for pattern in globs {
            let full_pattern = root.join(pattern).to_string_lossy().to_string();
            for entry in
                glob(&full_pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?
            {
                let path =
                    entry.with_context(|| format!("Failed to read glob entry for: {}", pattern))?;
                if !path.is_file() {
                    continue;
                }
                let relative = path.strip_prefix(&root).with_context(|| {
                    format!("Glob match outside exec root: {}", path.display())
                })?;
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
