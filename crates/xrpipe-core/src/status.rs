use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Idle,
    Running,
    /// The compositor asked for the device to be recreated. The host must
    /// release and re-init; the pipeline never does so on its own.
    Lost(String),
}

#[derive(Debug)]
struct StatusInner {
    status: DeviceStatus,
    lost_reported: bool,
}

/// Device status shared between the device context and the submission stage.
#[derive(Debug, Clone)]
pub struct StatusCell {
    inner: Arc<Mutex<StatusInner>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusInner {
                status: DeviceStatus::Idle,
                lost_reported: false,
            })),
        }
    }
}

impl StatusCell {
    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> DeviceStatus {
        self.lock().status.clone()
    }

    pub fn set(&self, status: DeviceStatus) {
        let mut guard = self.lock();
        guard.status = status;
        guard.lost_reported = false;
    }

    /// Marks the device lost. The first reason wins until the status is reset.
    pub fn mark_lost(&self, reason: impl Into<String>) {
        let mut guard = self.lock();
        if !matches!(guard.status, DeviceStatus::Lost(_)) {
            guard.status = DeviceStatus::Lost(reason.into());
            guard.lost_reported = false;
        }
    }

    /// Returns the loss reason exactly once per loss.
    pub fn take_lost(&self) -> Option<String> {
        let mut guard = self.lock();
        match &guard.status {
            DeviceStatus::Lost(reason) if !guard.lost_reported => {
                let reason = reason.clone();
                guard.lost_reported = true;
                Some(reason)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_to_idle() {
        assert_eq!(StatusCell::default().get(), DeviceStatus::Idle);
    }

    #[test]
    fn test_take_lost_reports_once() {
        let cell = StatusCell::default();
        cell.set(DeviceStatus::Running);
        assert_eq!(cell.take_lost(), None);

        cell.mark_lost("display disconnected");
        cell.mark_lost("second reason is ignored");
        assert_eq!(cell.take_lost().as_deref(), Some("display disconnected"));
        assert_eq!(cell.take_lost(), None);
        assert_eq!(
            cell.get(),
            DeviceStatus::Lost("display disconnected".to_string())
        );
    }

    #[test]
    fn test_clones_share_state() {
        let cell = StatusCell::default();
        let other = cell.clone();
        other.set(DeviceStatus::Running);
        assert_eq!(cell.get(), DeviceStatus::Running);
    }
}
