use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use harvest_core::error::DriverError;
use harvest_core::traits::{DriverElement, PageDriver, WaitPolicy};
use serde_json::Value;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Resolves once the document has fired `load`.
const WAIT_FOR_LOAD_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete') {
            resolve(true);
        } else {
            window.addEventListener('load', () => resolve(true));
        }
    })
"#;

/// How to start the browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Upper bound for every single driver call.
    pub call_timeout: Duration,
    /// Explicit binary; otherwise `CHROME_BIN` and well-known paths are tried.
    pub chrome_bin: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            call_timeout: Duration::from_secs(30),
            chrome_bin: None,
        }
    }
}

/// [`PageDriver`] backed by Chromium via the Chrome DevTools Protocol.
///
/// The driver launched by [`ChromiumDriver::launch`] owns the main tab.
/// [`PageDriver::open_auxiliary`] opens further tabs in the same browser
/// process; they share the session and are closed independently.
pub struct ChromiumDriver {
    browser: Arc<Browser>,
    page: Page,
    timeout: Duration,
    handler: Option<JoinHandle<()>>,
}

impl ChromiumDriver {
    /// Launch Chromium and open a blank main tab.
    pub async fn launch(options: LaunchOptions) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium ships a wrapper that rejects standard
        // flags, so prefer a real binary when one can be found.
        if let Some(bin) = options.chrome_bin.clone().or_else(find_chrome_binary) {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        if options.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .arg("--window-size=1366,900")
            .arg("--lang=en-US")
            .build()
            .map_err(|e| DriverError::Launch(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(format!("Failed to open main tab: {e}")))?;

        Ok(Self {
            browser: Arc::new(browser),
            page,
            timeout: options.call_timeout,
            handler: Some(handler),
        })
    }

    /// Close the main tab and the browser process.
    pub async fn shutdown(mut self) {
        let handler = self.handler.take();
        let _ = self.page.close().await;
        match Arc::try_unwrap(self.browser) {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    tracing::debug!(error = %e, "Browser close failed");
                }
                let _ = browser.wait().await;
            }
            Err(_) => tracing::warn!("Auxiliary tabs still open at shutdown"),
        }
        if let Some(handler) = handler {
            handler.abort();
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, CdpError>>,
        soft: impl FnOnce(String) -> DriverError,
    ) -> Result<T, DriverError> {
        bounded(self.timeout, fut, soft).await
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<ChromiumElement>, DriverError> {
        let elements = self
            .bounded(self.page.find_elements(selector), |e| {
                DriverError::Interaction(format!("query '{selector}': {e}"))
            })
            .await?;
        Ok(elements
            .into_iter()
            .map(|inner| ChromiumElement {
                inner,
                timeout: self.timeout,
            })
            .collect())
    }
}

impl PageDriver for ChromiumDriver {
    type Element = ChromiumElement;

    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), DriverError> {
        self.bounded(self.page.goto(url), |e| {
            DriverError::Navigation(format!("{url}: {e}"))
        })
        .await?;
        if wait == WaitPolicy::Load {
            self.bounded(self.page.evaluate(WAIT_FOR_LOAD_SCRIPT.to_string()), |e| {
                DriverError::Navigation(format!("{url} never finished loading: {e}"))
            })
            .await?;
        }
        Ok(())
    }

    async fn query_single(&self, selector: &str) -> Result<Option<ChromiumElement>, DriverError> {
        Ok(self.find_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ChromiumElement>, DriverError> {
        self.find_all(selector).await
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        let result = self
            .bounded(self.page.evaluate(script.to_string()), DriverError::Script)
            .await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.find_all(selector).await {
                Ok(found) if !found.is_empty() => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn press_key(&self, key: &str) -> Result<(), DriverError> {
        let body = self
            .bounded(self.page.find_element("body"), |e| {
                DriverError::Interaction(format!("no document body: {e}"))
            })
            .await?;
        self.bounded(async { body.press_key(key).await.map(|_| ()) }, |e| {
            DriverError::Interaction(format!("key '{key}': {e}"))
        })
        .await
    }

    async fn open_auxiliary(&self) -> Result<ChromiumDriver, DriverError> {
        let page = self
            .bounded(self.browser.new_page("about:blank"), |e| {
                DriverError::Navigation(format!("could not open tab: {e}"))
            })
            .await?;
        Ok(ChromiumDriver {
            browser: Arc::clone(&self.browser),
            page,
            timeout: self.timeout,
            handler: None,
        })
    }

    async fn close(self) {
        if let Err(e) = self.page.close().await {
            tracing::debug!(error = %e, "Tab close failed");
        }
    }
}

/// A live DOM element in a Chromium tab.
pub struct ChromiumElement {
    inner: Element,
    timeout: Duration,
}

impl ChromiumElement {
    fn wrap(&self, inner: Element) -> Self {
        Self {
            inner,
            timeout: self.timeout,
        }
    }
}

impl DriverElement for ChromiumElement {
    async fn click(&self) -> Result<(), DriverError> {
        bounded(
            self.timeout,
            async { self.inner.click().await.map(|_| ()) },
            |e| DriverError::Interaction(format!("click: {e}")),
        )
        .await
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>, DriverError> {
        bounded(self.timeout, self.inner.attribute(name), |e| {
            DriverError::Interaction(format!("attribute '{name}': {e}"))
        })
        .await
    }

    async fn text(&self) -> Result<String, DriverError> {
        let text = bounded(self.timeout, self.inner.inner_text(), |e| {
            DriverError::Interaction(format!("text: {e}"))
        })
        .await?;
        Ok(text.unwrap_or_default())
    }

    async fn scroll_into_view(&self) -> Result<(), DriverError> {
        bounded(
            self.timeout,
            async { self.inner.scroll_into_view().await.map(|_| ()) },
            |e| DriverError::Interaction(format!("scroll: {e}")),
        )
        .await
    }

    async fn query_single(&self, selector: &str) -> Result<Option<ChromiumElement>, DriverError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ChromiumElement>, DriverError> {
        let found = bounded(self.timeout, self.inner.find_elements(selector), |e| {
            DriverError::Interaction(format!("query '{selector}': {e}"))
        })
        .await?;
        Ok(found.into_iter().map(|el| self.wrap(el)).collect())
    }
}

/// Time-box one CDP call and map its error.
///
/// Transport failures mean the browser is gone and are fatal; everything
/// else goes through `soft`.
async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, CdpError>>,
    soft: impl FnOnce(String) -> DriverError,
) -> Result<T, DriverError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify(e, soft)),
        Err(_) => Err(DriverError::Timeout(timeout.as_millis() as u64)),
    }
}

fn classify(error: CdpError, soft: impl FnOnce(String) -> DriverError) -> DriverError {
    match error {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            DriverError::SessionLost(error.to_string())
        }
        CdpError::Timeout => DriverError::Timeout(0),
        CdpError::NotFound => DriverError::NotFound(error.to_string()),
        other => soft(other.to_string()),
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// An explicit `CHROME_BIN` wins; then the binary inside a snap install,
/// then well-known system paths. `None` lets `chromiumoxide` do its own
/// lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        // Snap (Ubuntu default)
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        // Flatpak
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        // Common apt / manual installs
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}
