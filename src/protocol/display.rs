//! Product info pushed back to the cabin display
//!
//! The backend answers each tag event on `target_queue.cabin<N>` with a
//! colon-delimited record `name:size:color:stock`. Rendering and
//! transliteration belong to the display itself.

use tracing::info;

/// Number of colon-separated fields in a display record
pub const DISPLAY_FIELDS: usize = 4;

/// Parsed display record; missing trailing fields are empty
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayMessage {
    pub name: String,
    pub size: String,
    pub color: String,
    pub stock: String,
}

impl DisplayMessage {
    /// Split on the first three colons and trim each field. Any further
    /// colons stay in the last field.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let mut parts = text.splitn(DISPLAY_FIELDS, ':').map(|s| s.trim().to_string());

        Self {
            name: parts.next().unwrap_or_default(),
            size: parts.next().unwrap_or_default(),
            color: parts.next().unwrap_or_default(),
            stock: parts.next().unwrap_or_default(),
        }
    }

    /// The backend sends `No Data` when the tag is not in its catalogue
    pub fn is_no_data(&self) -> bool {
        self.name == "No Data" && self.size.is_empty()
    }
}

/// Display collaborator receiving parsed records
pub trait DisplaySink: Send {
    fn show(&mut self, message: &DisplayMessage);
}

/// Sink that only logs, used when no panel is attached
#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn show(&mut self, message: &DisplayMessage) {
        if message.is_no_data() {
            info!(target: "display", "No product data for last tag");
            return;
        }
        info!(
            target: "display",
            name = %message.name,
            size = %message.size,
            color = %message.color,
            stock = %message.stock,
            "Product info received"
        );
    }
}
