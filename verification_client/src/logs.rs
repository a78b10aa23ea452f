/// Display category of a job log line. Derived from the text only; it
/// carries no meaning for the job itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Success,
    Warning,
    Error,
    Stop,
    Module,
    Attention,
    Default,
}

impl LogKind {
    pub fn classify(line: &str) -> Self {
        if line.contains("-> EXACT MATCH FOUND!") {
            LogKind::Success
        } else if line.contains("-> STATUS: Admit Date Mismatch") {
            LogKind::Warning
        } else if line.contains("-> STATUS: Not Found") {
            LogKind::Error
        } else if line.contains("--- [Module Stop]") {
            LogKind::Stop
        } else if line.contains("--- [Module") {
            LogKind::Module
        } else if line.contains("-> WARNING:") || line.contains("ERROR:") || line.contains("!!!") {
            LogKind::Attention
        } else {
            LogKind::Default
        }
    }

    /// Terminal prefix for the line.
    pub fn marker(&self) -> &'static str {
        match self {
            LogKind::Success => "✅",
            LogKind::Warning => "⚠️",
            LogKind::Error => "❌",
            LogKind::Stop => "🛑",
            LogKind::Module => "📦",
            LogKind::Attention => "❗",
            LogKind::Default => "  ",
        }
    }
}
