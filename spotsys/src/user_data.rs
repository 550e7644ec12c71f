//! The startup script handed to every launched instance through EC2 user data.
//!
//! The script clones the benchmark repository, runs the serial and parallel benchmarks, and syncs
//! the results to S3 under a timestamped prefix named for the instance type, which it reads from
//! the instance metadata endpoint at boot.  It's embedded as-is; spotsys only encodes it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// The startup script, byte for byte.
pub(crate) const STARTUP_SCRIPT: &str = include_str!("../assets/user-data.sh");

/// Returns the startup script encoded the way EC2 expects user data in a spot request.
pub(crate) fn encoded() -> String {
    BASE64.encode(STARTUP_SCRIPT)
}
