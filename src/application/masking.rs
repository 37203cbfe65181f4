/// Masks a provider identifier for logging, keeping the prefix and last four
/// characters: `sub_1234567890` becomes `sub_***7890`.
pub fn mask_id(id: &str) -> String {
    if id.is_empty() {
        return String::new();
    }

    let mut parts = id.split('_');
    let (Some(prefix), Some(suffix), None) = (parts.next(), parts.next(), parts.next()) else {
        return "***".to_string();
    };

    let chars: Vec<char> = suffix.chars().collect();
    if chars.len() <= 4 {
        return format!("{prefix}_***");
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}_***{tail}")
}
