//! Private configuration home for the client library.
//!
//! libsmbclient reads `~/.smb/smb.conf` and the Kerberos libraries read
//! their config and credential cache from the environment. The daemon gives
//! both a throwaway home directory so nothing from the invoking user's
//! configuration leaks into the session.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;

const SMB_CONF_DIR: &str = ".smb";
const SMB_CONF_FILE: &str = "smb.conf";
const KRB_CONF_DIR: &str = ".krb";
const KRB5_CONF_FILE: &str = "krb5.conf";
const CCACHE_FILE: &str = "ccache";
const KRB_TRACE_FILE: &str = "krb_trace.txt";

/// Client configuration written to `.smb/smb.conf`.
pub const SMB_CONF: &str = "
[global]
  client min protocol = SMB2
  client max protocol = SMB3
  security = user
";

/// A temporary home directory holding `smb.conf` and the Kerberos files.
///
/// Removed when dropped.
#[derive(Debug)]
pub struct SmbConfHome {
    dir: TempDir,
}

impl SmbConfHome {
    /// Creates the directory layout and writes `smb.conf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or the file cannot be created.
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("smbfs-").tempdir()?;
        fs::create_dir(dir.path().join(SMB_CONF_DIR))?;
        fs::create_dir(dir.path().join(KRB_CONF_DIR))?;
        fs::write(dir.path().join(SMB_CONF_DIR).join(SMB_CONF_FILE), SMB_CONF)?;
        info!(path = %dir.path().display(), "Storing SMB configuration files");
        Ok(Self { dir })
    }

    /// The home directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `.smb/smb.conf`
    pub fn smb_conf_path(&self) -> PathBuf {
        self.dir.path().join(SMB_CONF_DIR).join(SMB_CONF_FILE)
    }

    fn krb_path(&self, file: &str) -> PathBuf {
        self.dir.path().join(KRB_CONF_DIR).join(file)
    }

    /// Where the Kerberos configuration is expected.
    pub fn krb5_conf_path(&self) -> PathBuf {
        self.krb_path(KRB5_CONF_FILE)
    }

    /// The Kerberos credential cache.
    pub fn ccache_path(&self) -> PathBuf {
        self.krb_path(CCACHE_FILE)
    }

    /// The Kerberos trace log.
    pub fn krb_trace_path(&self) -> PathBuf {
        self.krb_path(KRB_TRACE_FILE)
    }

    /// Points `HOME`, `KRB5_CONFIG`, `KRB5CCNAME` and `KRB5_TRACE` at this
    /// directory.
    ///
    /// # Safety
    ///
    /// Mutates the process environment. Must be called before any other
    /// thread is started.
    pub unsafe fn apply_environment(&self) {
        // SAFETY: the caller guarantees the process is still single-threaded.
        unsafe {
            std::env::set_var("HOME", self.path());
            std::env::set_var("KRB5_CONFIG", self.krb5_conf_path());
            std::env::set_var("KRB5CCNAME", self.ccache_path());
            std::env::set_var("KRB5_TRACE", self.krb_trace_path());
        }
    }
}
