//! Resolution of the agent executable that sits next to the wrapper binary.
use std::{
    env, io,
    path::{Path, PathBuf},
};

/// Answers where the agent executable lives.
pub trait Locator: Send {
    /// Directory that contains the agent executable; also its working directory.
    fn executable_dir(&self) -> io::Result<PathBuf>;
}

/// Looks next to the currently running binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentExeDir;

impl Locator for CurrentExeDir {
    fn executable_dir(&self) -> io::Result<PathBuf> {
        let exe = env::current_exe()?;
        exe.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("executable path {} has no parent", exe.display()),
            )
        })
    }
}

/// Always answers the same directory.
#[derive(Debug, Clone)]
pub struct FixedDir(pub PathBuf);

impl Locator for FixedDir {
    fn executable_dir(&self) -> io::Result<PathBuf> {
        Ok(self.0.clone())
    }
}

/// Path of the agent named `agent` inside `dir`, with the platform's executable suffix.
pub fn agent_path(dir: &Path, agent: &str) -> PathBuf {
    dir.join(format!("{agent}{}", env::consts::EXE_SUFFIX))
}
