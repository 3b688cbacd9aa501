use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::{resolve_url, Fetcher, RawDocument};
use crate::config::ScraperConfig;
use crate::utils::FetchError;

/// Renders pages in a shared headless Chrome instance, one tab per fetch.
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    base_url: Url,
    user_agent: String,
}

impl BrowserFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| FetchError::InvalidIdentity {
            identity: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| FetchError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| FetchError::Browser(format!("Failed to launch browser: {}", e)))?;
        info!("headless browser launched");

        Ok(Self {
            browser: Arc::new(browser),
            base_url,
            user_agent: config.user_agent.clone(),
        })
    }
}

fn render(browser: &Browser, url: &str, user_agent: &str) -> Result<RawDocument, FetchError> {
    let tab = browser
        .new_tab()
        .map_err(|e| FetchError::Browser(format!("Failed to create tab: {}", e)))?;

    let result = (|| -> Result<RawDocument, FetchError> {
        tab.set_user_agent(user_agent, None, None)
            .map_err(|e| FetchError::Browser(format!("Failed to set user agent: {}", e)))?;
        tab.navigate_to(url)
            .map_err(|e| FetchError::Browser(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| FetchError::Browser(format!("Page load failed: {}", e)))?;
        let html = tab
            .get_content()
            .map_err(|e| FetchError::Browser(format!("Failed to read page content: {}", e)))?;

        let final_url = tab.get_url();
        Ok(RawDocument {
            html,
            observed_identity: (!final_url.is_empty()).then_some(final_url),
        })
    })();

    let _ = tab.close(true);
    result
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, identity: &str) -> Result<RawDocument, FetchError> {
        let url = resolve_url(&self.base_url, identity)?.to_string();
        debug!(url = %url, "rendering in browser");

        let browser = Arc::clone(&self.browser);
        let user_agent = self.user_agent.clone();

        tokio::task::spawn_blocking(move || render(&browser, &url, &user_agent))
            .await
            .map_err(|e| FetchError::Browser(format!("Browser task failed: {}", e)))?
    }
}
