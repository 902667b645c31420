//! Visual state of the generation notification.

pub const GENERATING_TITLE: &str = "Generating Marketing Strategy";
pub const GENERATING_STATUS: &str = "Chahbander is preparing your strategy...";
pub const TIME_ESTIMATE: &str = "Estimated time: 5-15 minutes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Progress,
    Persistent,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Footer {
    Spinner { estimate: String },
    /// "View Strategy" button next to an "Action Required" label.
    ViewStrategy { strategy_id: String },
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub visible: bool,
    pub tone: Tone,
    pub title: String,
    pub status_text: String,
    /// `None` while the step indicator is hidden.
    pub step_text: Option<String>,
    pub progress: u8,
    pub footer: Footer,
}

impl Default for Notification {
    fn default() -> Self {
        Self {
            visible: false,
            tone: Tone::Progress,
            title: GENERATING_TITLE.to_string(),
            status_text: GENERATING_STATUS.to_string(),
            step_text: Some("Initializing...".to_string()),
            progress: 0,
            footer: Footer::Spinner {
                estimate: TIME_ESTIMATE.to_string(),
            },
        }
    }
}

impl Notification {
    pub fn hide(&mut self) {
        self.visible = false;
    }

    /// Progress layout with the last known values, without changing visibility.
    pub fn restore_generating(&mut self, progress: u8, step: Option<&str>) {
        self.tone = Tone::Progress;
        self.title = GENERATING_TITLE.to_string();
        self.status_text = GENERATING_STATUS.to_string();
        self.step_text = Some(step.unwrap_or("Processing...").to_string());
        self.progress = progress;
        self.footer = Footer::Spinner {
            estimate: TIME_ESTIMATE.to_string(),
        };
    }

    pub fn show_generating(&mut self) {
        self.visible = true;
        self.tone = Tone::Progress;
    }

    /// Applies whatever a progress payload carries; absent values keep the current ones.
    pub fn set_progress(&mut self, progress: Option<u8>, step: Option<&str>) {
        if let Some(progress) = progress {
            self.progress = progress;
        }
        if let Some(step) = step {
            self.step_text = Some(step.to_string());
        }
    }

    pub fn show_ready(&mut self, strategy_id: &str) {
        self.visible = true;
        self.tone = Tone::Persistent;
        self.title = "Strategy Ready".to_string();
        self.status_text = "Your marketing strategy has been generated successfully!".to_string();
        self.step_text = Some("Take action to complete the process".to_string());
        self.progress = 100;
        self.footer = Footer::ViewStrategy {
            strategy_id: strategy_id.to_string(),
        };
    }

    pub fn show_error(&mut self, message: &str) {
        self.visible = true;
        self.tone = Tone::Error;
        self.title = "Generation Failed".to_string();
        self.status_text = message.to_string();
        self.step_text = None;
        self.footer = Footer::Dismiss;
    }

    pub fn is_showing_error(&self, message: &str) -> bool {
        self.visible && self.tone == Tone::Error && self.status_text == message
    }
}

/// Receives the notification every time it changes.
pub trait Renderer: Send + 'static {
    fn render(&mut self, notification: &Notification);
}

impl<F> Renderer for F
where
    F: FnMut(&Notification) + Send + 'static,
{
    fn render(&mut self, notification: &Notification) {
        self(notification)
    }
}
