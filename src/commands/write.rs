/// `actionkey write` command implementation
use anyhow::{Context, Result};

use super::{cli_owner, execution_context, load_config, runner};
use crate::action::write::WriteFileAction;
use crate::action::Action;
use crate::artifact::Artifact;
use crate::cli::WriteArgs;
use crate::cli_utils::actionkey_prefix;

pub fn run(args: WriteArgs) -> Result<()> {
    let config = load_config(&args.common)?;

    let action = WriteFileAction::new(
        cli_owner(&config, "//:write".to_string()),
        Artifact::derived(&args.output),
        args.content,
        args.executable,
    )
    .context("Failed to create write action")?;

    let ctx = execution_context(&config);
    let outcome = runner(&config)?.run(&action, &ctx)?;

    eprintln!(
        "{} {} {}",
        actionkey_prefix(),
        if outcome.skipped() { "Up to date:" } else { "Wrote" },
        action.primary_output()
    );
    println!("{}", outcome.key);
    Ok(())
}
