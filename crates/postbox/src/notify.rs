//! Desktop notifications for deliveries in flight.

use notify_rust::Notification;
use postbox_core::{DeliveryProgress, ProgressError, ProgressReporter};

const APP_NAME: &str = "postbox";

/// Shows "Sending Email..." while a job runs.
///
/// On freedesktop platforms the notification is replaced by the result when
/// the job finishes. Elsewhere a separate result notification is shown.
#[derive(Default)]
pub struct DesktopReporter {
    #[cfg(all(unix, not(target_os = "macos")))]
    shown: std::sync::Mutex<std::collections::HashMap<String, u32>>,
}

impl DesktopReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn sending(progress: &DeliveryProgress) -> Notification {
    let mut notification = Notification::new();
    notification
        .appname(APP_NAME)
        .summary("Sending Email...")
        .body(&format!("To: {}\n{}", progress.to, progress.subject));

    #[cfg(all(unix, not(target_os = "macos")))]
    notification.urgency(notify_rust::Urgency::Low);

    notification
}

fn outcome(progress: &DeliveryProgress, succeeded: bool) -> Notification {
    let summary = if succeeded {
        "Email sent"
    } else {
        "Email could not be sent"
    };

    let mut notification = Notification::new();
    notification
        .appname(APP_NAME)
        .summary(summary)
        .body(&format!("To: {}\n{}", progress.to, progress.subject))
        .timeout(notify_rust::Timeout::Milliseconds(5000));
    notification
}

#[cfg(all(unix, not(target_os = "macos")))]
impl ProgressReporter for DesktopReporter {
    fn started(&self, progress: &DeliveryProgress) -> Result<(), ProgressError> {
        let handle = sending(progress)
            .show()
            .map_err(|e| ProgressError(e.to_string()))?;

        self.shown
            .lock()
            .map_err(|_| ProgressError("notification state poisoned".into()))?
            .insert(progress.job_id.clone(), handle.id());
        Ok(())
    }

    fn finished(&self, progress: &DeliveryProgress, succeeded: bool) -> Result<(), ProgressError> {
        let id = self
            .shown
            .lock()
            .map_err(|_| ProgressError("notification state poisoned".into()))?
            .remove(&progress.job_id);

        let mut notification = outcome(progress, succeeded);
        if let Some(id) = id {
            notification.id(id);
        }
        notification
            .show()
            .map_err(|e| ProgressError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
impl ProgressReporter for DesktopReporter {
    fn started(&self, progress: &DeliveryProgress) -> Result<(), ProgressError> {
        sending(progress)
            .show()
            .map_err(|e| ProgressError(e.to_string()))?;
        Ok(())
    }

    fn finished(&self, progress: &DeliveryProgress, succeeded: bool) -> Result<(), ProgressError> {
        outcome(progress, succeeded)
            .show()
            .map_err(|e| ProgressError(e.to_string()))?;
        Ok(())
    }
}
