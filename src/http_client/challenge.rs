//! Anti-bot challenge page detection.

/// Return the first marker found in `body`, compared case-insensitively.
pub fn find_challenge_marker<'a>(body: &str, markers: &'a [String]) -> Option<&'a str> {
    let lowered = body.to_lowercase();
    markers
        .iter()
        .find(|m| !m.is_empty() && lowered.contains(&m.to_lowercase()))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec![
            "DDoS-Guard".to_string(),
            "Are you a human".to_string(),
            "captcha".to_string(),
        ]
    }

    #[test]
    fn test_detects_marker_any_case() {
        let body = "<html><title>ddos-guard</title></html>";
        assert_eq!(find_challenge_marker(body, &markers()), Some("DDoS-Guard"));

        let body = "<div class=\"g-reCAPTCHA\"></div>";
        assert_eq!(find_challenge_marker(body, &markers()), Some("captcha"));
    }

    #[test]
    fn test_clean_page() {
        let body = r#"{"data":[{"title":"Example Show","session":"abc123"}]}"#;
        assert_eq!(find_challenge_marker(body, &markers()), None);
    }

    #[test]
    fn test_empty_marker_ignored() {
        assert_eq!(find_challenge_marker("anything", &[String::new()]), None);
    }
}
