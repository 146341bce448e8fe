use authd_types::Pid;

/// Sandbox admission: may `pid` request `right` at all.
pub trait AdmissionOracle: Send + Sync {
    fn sandbox_allows(&self, pid: Pid, right: &str) -> bool;
}

/// Host power state.
pub trait PowerState: Send + Sync {
    /// Restricted low-power wake where no interactive UI is available.
    fn is_dark_wake(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAdmission;

impl AdmissionOracle for AllowAllAdmission {
    fn sandbox_allows(&self, _pid: Pid, _right: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FullWake;

impl PowerState for FullWake {
    fn is_dark_wake(&self) -> bool {
        false
    }
}
