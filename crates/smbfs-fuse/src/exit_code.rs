//! Process exit codes, following `sysexits.h`.

use crate::bootstrap::MountError;

/// Successful termination.
pub const SUCCESS: u8 = 0;
/// Command line usage error.
pub const USAGE: u8 = 64;
/// Service unavailable.
pub const UNAVAILABLE: u8 = 69;
/// Internal software error.
pub const SOFTWARE: u8 = 70;
/// Permission denied.
pub const NOPERM: u8 = 77;

/// Exit code for a failed mount.
pub fn for_mount_error(error: &MountError) -> u8 {
    match error {
        MountError::InvalidUrl(_) | MountError::InvalidOptions(_) => USAGE,
        MountError::NotFound | MountError::InvalidProtocol => UNAVAILABLE,
        MountError::AccessDenied => NOPERM,
        MountError::Unknown(_) => SOFTWARE,
    }
}

/// Exit code for any error reaching `main`.
pub fn for_error(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<MountError>())
        .map_or(SOFTWARE, for_mount_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_mount_errors() {
        assert_eq!(for_mount_error(&MountError::AccessDenied), NOPERM);
        assert_eq!(for_mount_error(&MountError::NotFound), UNAVAILABLE);
        assert_eq!(for_mount_error(&MountError::InvalidUrl("x".into())), USAGE);
        assert_eq!(for_mount_error(&MountError::Unknown(None)), SOFTWARE);
    }

    #[test]
    fn test_wrapped_mount_error_is_found() {
        let result: Result<(), MountError> = Err(MountError::AccessDenied);
        let error = result.context("Failed to mount share").unwrap_err();
        assert_eq!(for_error(&error), NOPERM);
        assert_eq!(for_error(&anyhow::anyhow!("other")), SOFTWARE);
    }
}
