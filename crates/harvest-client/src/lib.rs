#[cfg(feature = "browser")]
pub mod browser_driver;

#[cfg(feature = "browser")]
pub use browser_driver::{ChromiumDriver, ChromiumElement, LaunchOptions};
