/// Smoke-test for `ChromiumDriver`.
///
/// Launches a headless Chromium, loads <https://example.com>, and drives it
/// through the same `PageDriver` calls the crawler uses.
///
/// Run with:
///   cargo run -p harvest-client --example browser_smoke
use harvest_client::{ChromiumDriver, LaunchOptions};
use harvest_core::traits::{DriverElement, PageDriver, WaitPolicy};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    println!("Launching headless browser...");
    let driver = ChromiumDriver::launch(LaunchOptions::default()).await?;

    let url = "https://example.com";
    println!("Navigating to {url}...");
    driver.navigate(url, WaitPolicy::Load).await?;
    driver.wait_for("h1", Duration::from_secs(10)).await?;

    let heading = driver
        .query_single("h1")
        .await?
        .ok_or_else(|| anyhow::anyhow!("no <h1> on page"))?;
    let text = heading.text().await?;
    assert_eq!(text.trim(), "Example Domain", "unexpected heading");

    let links = driver.query_all("a").await?;
    let href = match links.first() {
        Some(link) => link.attribute("href").await?,
        None => None,
    };
    println!("First link: {href:?}");

    let title = driver.evaluate("document.title").await?;
    println!("Title via script: {title}");

    let aux = driver.open_auxiliary().await?;
    aux.navigate(url, WaitPolicy::DomContentLoaded).await?;
    aux.close().await;

    println!("OK: heading {:?}", text.trim());
    driver.shutdown().await;
    Ok(())
}
