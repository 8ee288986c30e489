//! Automation-hiding scripts injected after navigation.

/// Each entry is evaluated independently; failures are ignored.
pub const STEALTH_SCRIPTS: &[&str] = &[
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    r#"
    if (!window.chrome) {
        window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
    }
    "#,
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3, 4, 5].map(() => ({ name: 'Chrome PDF Plugin' })),
        configurable: true
    });
    "#,
    r#"
    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    }
    "#,
];

/// Chrome flags that hide automation and trim resource use.
pub const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--no-sandbox",
    "--disable-gpu",
    "--window-size=1280,720",
];

/// Disables image loading for every page in the instance.
pub const NO_IMAGES_ARG: &str = "--blink-settings=imagesEnabled=false";
