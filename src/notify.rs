//! Transient notifications

use crate::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Toasts shown at once; a new one replaces the oldest.
pub const TOAST_LIMIT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToastVariant {
    #[default]
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: Option<String>,
    pub variant: ToastVariant,
}

impl Toast {
    pub fn success(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: Some(description.to_string()).filter(|d| !d.is_empty()),
            variant: ToastVariant::Default,
        }
    }

    /// Short headline per failure class; the error text is the body.
    pub fn from_error(error: &Error) -> Self {
        let title = match error {
            Error::Auth(_) => "Please sign in",
            Error::Forbidden(_) => "Not allowed",
            Error::Validation(_) => "Please check the form",
            Error::Network(_) => "Connection problem",
            Error::NotFound(_) => "Not found",
            Error::FileTooLarge { .. } => "Image too large",
            _ => "Something went wrong",
        };
        let description = match error {
            Error::FileTooLarge { .. } => "Images can be at most 5 MB".to_string(),
            other => other.to_string(),
        };
        Self {
            title: title.to_string(),
            description: Some(description),
            variant: ToastVariant::Destructive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToastId(u64);

#[derive(Debug, Clone, Default)]
pub struct Toaster {
    next_id: Arc<AtomicU64>,
    shown: Arc<Mutex<Vec<(ToastId, Toast)>>>,
}

impl Toaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, toast: Toast) -> ToastId {
        let id = ToastId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(title = %toast.title, "toast");
        let mut shown = self.shown.lock().unwrap_or_else(|p| p.into_inner());
        shown.insert(0, (id, toast));
        shown.truncate(TOAST_LIMIT);
        id
    }

    pub fn error(&self, error: &Error) -> ToastId {
        self.show(Toast::from_error(error))
    }

    pub fn dismiss(&self, id: ToastId) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(shown, _)| *shown != id);
    }

    /// Visible toasts, newest first.
    pub fn visible(&self) -> Vec<Toast> {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, toast)| toast.clone())
            .collect()
    }
}
