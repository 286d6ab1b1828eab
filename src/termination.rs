/// Ends the hosting process once the grace period after a trigger expires.
///
/// Injected into the watcher so the core never exits the process itself.
/// Tests substitute a recording stub.
pub trait TerminationPolicy: Send + Sync {
    fn terminate(&self, exit_code: i32);
}

/// Exits the current process with the watcher's exit code.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl TerminationPolicy for ProcessExit {
    fn terminate(&self, exit_code: i32) {
        tracing::error!(exit_code, "memory watchdog terminating process");
        std::process::exit(exit_code);
    }
}
