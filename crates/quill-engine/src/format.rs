/// Normalizes generated prose into period-delimited sentences.
///
/// Only `.` is a boundary: fragments are trimmed, empty ones dropped, and the
/// rest re-terminated and joined by single spaces. Text without any period is
/// returned trimmed and otherwise untouched.
pub fn format_paragraph(raw: &str) -> String {
    if !raw.contains('.') {
        return raw.trim().to_string();
    }
    raw.split('.')
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(|fragment| format!("{fragment}."))
        .collect::<Vec<String>>()
        .join(" ")
}
