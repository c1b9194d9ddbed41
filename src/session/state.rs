//! Session lifecycle status.

/// Where an [`AudioSession`](super::AudioSession) is in its lifecycle.
///
/// ```text
/// Ready ──start──▶ Initializing ──ok──▶ Listening ──stop──▶ Stopping ──▶ Stopped
///                               ──err─▶ Failed
/// Stopped / Failed ──start──▶ Initializing
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Ready,
    /// Connecting and opening the audio source.
    Initializing,
    /// Windows are being produced and streamed.
    Listening,
    /// Capture is torn down; the end-of-stream handshake is running.
    Stopping,
    Stopped,
    /// The last `start` attempt failed; nothing is held open.
    Failed,
}

impl SessionStatus {
    /// ```
    /// use scamwatch::session::SessionStatus;
    ///
    /// assert!(SessionStatus::Listening.is_active());
    /// assert!(SessionStatus::Stopping.is_active());
    /// assert!(!SessionStatus::Failed.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initializing | SessionStatus::Listening | SessionStatus::Stopping
        )
    }

    /// Short label for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Ready => "Ready",
            SessionStatus::Initializing => "Initializing...",
            SessionStatus::Listening => "Listening...",
            SessionStatus::Stopping => "Stopping...",
            SessionStatus::Stopped => "Stopped",
            SessionStatus::Failed => "Failed to start",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
