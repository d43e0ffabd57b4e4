/// What the pipeline pushes to the browser.
///
/// A session emits zero or more non-decreasing `Progress` values followed by
/// exactly one terminal event (`Done` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(u8),
    Done { caption: String, story: String },
    Error(String),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress(_))
    }

    /// The `data:` payloads this event becomes on the wire, in order.
    pub fn payloads(&self) -> Vec<String> {
        match self {
            ProgressEvent::Progress(percent) => vec![percent.to_string()],
            ProgressEvent::Done { caption, story } => {
                vec!["done".to_string(), caption.clone(), story.clone()]
            }
            ProgressEvent::Error(reason) => vec!["error".to_string(), reason.clone()],
        }
    }
}

/// Integer percentage of `processed` out of `total`, floored and capped at 100.
pub fn percent_of(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed.saturating_mul(100) / total).min(100) as u8
}
