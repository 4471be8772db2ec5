use std::backtrace::Backtrace;

use tracing::error;

use crate::error::LifecycleError;

/// Default post-shutdown hook. A shutdown that timed out leaves a component stuck, so the
/// backtrace of the control thread is printed to stderr and the whole process group is
/// killed. Any other outcome is left alone.
pub fn kill_on_shutdown_timeout(err: Option<&LifecycleError>) {
    let Some(err) = err.filter(|err| err.is_shutdown_timeout()) else {
        return;
    };

    error!("Lifecycle: {err}, killing process group");
    eprintln!("{}", Backtrace::force_capture());

    // SAFETY: kill(2) takes plain integers and touches no memory owned by this process.
    let rc = unsafe { libc::kill(0, libc::SIGKILL) };
    if rc != 0 {
        error!(
            "Lifecycle: SIGKILL failed: {}",
            std::io::Error::last_os_error()
        );
    }
}
