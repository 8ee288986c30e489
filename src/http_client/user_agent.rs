//! Browser identities presented to the catalog and file host.

/// Desktop browser user agents rotated across clients and browser instances.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    // Safari on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_3) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    // Firefox on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

/// Pick a user agent from `pool`, falling back to the built-in list when empty.
pub fn random_user_agent(pool: &[String]) -> String {
    match crate::random::choose(pool) {
        Some(ua) => ua.clone(),
        None => crate::random::choose(DEFAULT_USER_AGENTS)
            .copied()
            .unwrap_or(DEFAULT_USER_AGENTS[0])
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_from_pool() {
        let pool = vec!["MyAgent/1.0".to_string()];
        assert_eq!(random_user_agent(&pool), "MyAgent/1.0");
    }

    #[test]
    fn test_random_user_agent_empty_pool_uses_builtin() {
        let ua = random_user_agent(&[]);
        assert!(ua.starts_with("Mozilla/5.0"));
        assert!(DEFAULT_USER_AGENTS.contains(&ua.as_str()));
    }
}
