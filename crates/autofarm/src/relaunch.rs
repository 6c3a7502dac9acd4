/*
[INPUT]:  Path of a downloaded and verified build
[OUTPUT]: A prepared artifact, then a spawned replacement process
[POS]:    Update layer - the irreversible step behind RestartReady
[UPDATE]: When changing how the replacement process is started
[UPDATE]: Split prepare (in the dispatcher) from launch (after the front end exits)
*/

use std::ffi::OsString;
use std::path::Path;
use std::process::Command as Process;

use anyhow::{Context, bail};
use tracing::info;

/// Hands the process over to a replacement build.
///
/// `prepare` runs on the consumer thread when `RestartReady` is accepted;
/// `launch` runs only after the front end has released the terminal.
pub trait Relauncher {
    fn prepare(&self, artifact: &Path) -> anyhow::Result<()>;

    fn launch(&self, artifact: &Path) -> anyhow::Result<()>;
}

/// Spawns the artifact with this process's arguments.
#[derive(Debug, Clone, Default)]
pub struct ProcessRelauncher {
    args: Vec<OsString>,
}

impl ProcessRelauncher {
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }

    /// Forwards the current command line (without the program name).
    pub fn from_env() -> Self {
        Self::new(std::env::args_os().skip(1).collect())
    }
}

impl Relauncher for ProcessRelauncher {
    fn prepare(&self, artifact: &Path) -> anyhow::Result<()> {
        let metadata = std::fs::metadata(artifact)
            .with_context(|| format!("inspect {}", artifact.display()))?;
        if !metadata.is_file() {
            bail!("{} is not a file", artifact.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(artifact, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("mark {} executable", artifact.display()))?;
        }
        Ok(())
    }

    fn launch(&self, artifact: &Path) -> anyhow::Result<()> {
        let child = Process::new(artifact)
            .args(&self.args)
            .spawn()
            .with_context(|| format!("spawn {}", artifact.display()))?;
        info!(pid = child.id(), artifact = %artifact.display(), "replacement process started");
        Ok(())
    }
}
