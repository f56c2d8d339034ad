/// Actions whose entire effect is writing one file.
///
/// A [`FileWriteAction`] hands out a [`DeterministicWriter`]: for a fixed
/// action state it must produce byte-identical output on every invocation, on
/// every machine. That property is what makes these actions cacheable.
use std::fs;
use std::io::{self, BufWriter, Write};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{
    Action, ActionConstructionError, ActionCore, ActionExecutionContext, ActionExecutionError,
    ActionKeyContext, ActionOwner, ExecutableAction, InputMetadataProvider, KeyComputationError,
};
use crate::artifact::Artifact;
use crate::fingerprint::Fingerprint;
use crate::logging::operations;

pub trait DeterministicWriter {
    fn write_output_to(&self, out: &mut dyn Write) -> io::Result<()>;

    fn bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_output_to(&mut buf)?;
        Ok(buf)
    }
}

impl<F> DeterministicWriter for F
where
    F: Fn(&mut dyn Write) -> io::Result<()>,
{
    fn write_output_to(&self, out: &mut dyn Write) -> io::Result<()> {
        self(out)
    }
}

pub trait FileWriteAction: Action {
    fn new_deterministic_writer(
        &self,
        ctx: &ActionExecutionContext,
    ) -> Box<dyn DeterministicWriter + '_>;

    fn make_executable(&self) -> bool {
        false
    }
}

/// Writes the action's output next to its final location and renames it into
/// place only after a last cancellation check, so a partial file is never
/// visible at the output path.
pub fn write_output_atomically<A>(
    action: &A,
    ctx: &ActionExecutionContext,
) -> Result<(), ActionExecutionError>
where
    A: FileWriteAction + ?Sized,
{
    ctx.check_cancelled()?;

    let target = action.primary_output().path_under(ctx.exec_root());
    let parent = target
        .parent()
        .unwrap_or_else(|| ctx.exec_root())
        .to_path_buf();
    fs::create_dir_all(&parent).map_err(|e| ActionExecutionError::io(&parent, e))?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| ActionExecutionError::io(&parent, e))?;
    {
        let writer = action.new_deterministic_writer(ctx);
        let mut out = BufWriter::new(tmp.as_file_mut());
        writer
            .write_output_to(&mut out)
            .and_then(|()| out.flush())
            .map_err(|e| ActionExecutionError::io(&target, e))?;
    }

    // Dropping `tmp` here removes the partial file
    ctx.check_cancelled()?;

    set_mode(&tmp, action.make_executable()).map_err(|e| ActionExecutionError::io(&target, e))?;
    tmp.persist(&target)
        .map_err(|e| ActionExecutionError::io(&target, e.error))?;

    debug!(
        operation = operations::WRITE,
        mnemonic = action.mnemonic(),
        output = %action.primary_output(),
        "wrote action output"
    );
    Ok(())
}

#[cfg(unix)]
fn set_mode(tmp: &NamedTempFile, executable: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_tmp: &NamedTempFile, _executable: bool) -> io::Result<()> {
    Ok(())
}

/// Writes fixed text content to a single output
#[derive(Debug)]
pub struct WriteFileAction {
    core: ActionCore,
    content: String,
    executable: bool,
}

impl WriteFileAction {
    /// Changes whenever the bytes this action writes for a given content do
    const GUID: &'static str = "6e3c8a2f-1b7d-4e95-a0c4-7f2d9b81e5c3";

    pub fn new(
        owner: ActionOwner,
        output: Artifact,
        content: impl Into<String>,
        executable: bool,
    ) -> Result<Self, ActionConstructionError> {
        Ok(Self {
            core: ActionCore::builder(owner).output(output).build()?,
            content: content.into(),
            executable,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl Action for WriteFileAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn mnemonic(&self) -> &str {
        "FileWrite"
    }

    fn compute_key(
        &self,
        _ctx: &ActionKeyContext,
        _metadata: Option<&dyn InputMetadataProvider>,
        fp: &mut Fingerprint,
    ) -> Result<(), KeyComputationError> {
        fp.add_str(Self::GUID)
            .add_str(&self.content)
            .add_bool(self.executable);
        Ok(())
    }

    fn progress_message(&self) -> Option<String> {
        Some(format!("Writing file {}", self.primary_output()))
    }
}

impl FileWriteAction for WriteFileAction {
    fn new_deterministic_writer(
        &self,
        _ctx: &ActionExecutionContext,
    ) -> Box<dyn DeterministicWriter + '_> {
        Box::new(move |out: &mut dyn Write| out.write_all(self.content.as_bytes()))
    }

    fn make_executable(&self) -> bool {
        self.executable
    }
}

impl ExecutableAction for WriteFileAction {
    fn execute(&self, ctx: &ActionExecutionContext) -> Result<(), ActionExecutionError> {
        write_output_atomically(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{CancellationFlag, CacheKey};
    use tempfile::TempDir;

    fn action(content: &str, executable: bool) -> WriteFileAction {
        WriteFileAction::new(
            ActionOwner::new("//tools:gen"),
            Artifact::derived("bin/tools/gen.sh"),
            content,
            executable,
        )
        .unwrap()
    }

    fn key(action: &WriteFileAction) -> CacheKey {
        action.key(&ActionKeyContext::new(), None).unwrap()
    }

    #[test]
    fn test_key_tracks_content_and_mode() {
        assert_eq!(key(&action("echo hi", false)), key(&action("echo hi", false)));
        assert_ne!(key(&action("echo hi", false)), key(&action("echo bye", false)));
        assert_ne!(key(&action("echo hi", false)), key(&action("echo hi", true)));
    }

    #[test]
    fn test_writes_output_under_exec_root() {
        let temp = TempDir::new().unwrap();
        let ctx = ActionExecutionContext::new(temp.path());
        let write = action("#!/bin/sh\necho hi\n", true);

        write.execute(&ctx).unwrap();

        let written = fs::read_to_string(temp.path().join("bin/tools/gen.sh")).unwrap();
        assert_eq!(written, "#!/bin/sh\necho hi\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp.path().join("bin/tools/gen.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_cancelled_write_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let flag = CancellationFlag::new();
        flag.cancel();
        let ctx = ActionExecutionContext::new(temp.path()).with_cancellation(flag);

        let err = action("data", false).execute(&ctx).unwrap_err();
        assert!(err.is_interrupted());
        assert!(!temp.path().join("bin/tools/gen.sh").exists());
    }

    #[test]
    fn test_closure_writer() {
        let writer = |out: &mut dyn Write| out.write_all(b"abc");
        assert_eq!(writer.bytes().unwrap(), b"abc");
    }
}
