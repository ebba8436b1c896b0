use std::fs;
use std::path::Path;

/// Create an OSC8 hyperlink for terminal output
pub fn osc8_link(url: &str, text: &str) -> String {
    format!("\x1b]8;;{}\x1b\\{}\x1b]8;;\x1b\\", url, text)
}

/// Create an OSC8 file:// hyperlink for terminal output
pub fn osc8_file_link(path: &Path, text: &str) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string_lossy().to_string());
    osc8_link(&format!("file://{}", abs_path), text)
}

/// Hyperlink a resolved value when it is a URL
pub fn link_or_text(value: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") {
        osc8_link(value, value)
    } else {
        value.to_string()
    }
}
