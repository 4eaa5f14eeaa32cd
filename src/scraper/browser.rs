use chrono::{Datelike, NaiveDate};
use headless_chrome::{Browser, LaunchOptions};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::error::ScrapeError;

const CALENDAR_BASE: &str = "https://www.forexfactory.com/calendar";

/// Fetches rendered calendar HTML through a real browser. The source gates
/// plain HTTP clients behind script challenges, so the page's JavaScript
/// must actually run before the table exists.
pub struct CalendarFetcher {
    /// Launched on first use, reused afterwards.
    browser: Mutex<Option<Browser>>,
    config: ScraperConfig,
}

impl CalendarFetcher {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            browser: Mutex::new(None),
            config,
        }
    }

    /// Fetch the rendered HTML for the week anchored at `anchor`.
    pub async fn fetch_week_html(&self, anchor: NaiveDate) -> Result<String, ScrapeError> {
        let url = format!("{CALENDAR_BASE}?week={}", format_week_param(anchor));
        self.fetch_url(&url).await
    }

    /// Fetch the raw HTML from a URL on the blocking pool; browser handles
    /// are cheap clones of the shared process connection.
    async fn fetch_url(&self, url: &str) -> Result<String, ScrapeError> {
        info!("Fetching calendar from: {url}");

        let browser = self.ensure_browser()?;
        let url = url.to_string();
        let timeout = Duration::from_secs(self.config.nav_timeout_secs);

        let html = tokio::task::spawn_blocking(move || fetch_in_tab(&browser, &url, timeout))
            .await
            .map_err(|e| ScrapeError::Browser(format!("fetch task panicked: {e}")))??;

        debug!("Fetched {} bytes of HTML", html.len());
        inspect_page(&html)?;
        Ok(html)
    }

    fn ensure_browser(&self) -> Result<Browser, ScrapeError> {
        let mut guard = self
            .browser
            .lock()
            .map_err(|_| ScrapeError::Browser("browser mutex poisoned".into()))?;

        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }

        info!(
            headless = self.config.headless,
            "Launching Chrome for calendar scraping..."
        );
        let launch_options = LaunchOptions {
            headless: self.config.headless,
            sandbox: self.config.sandbox,
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let browser = Browser::new(launch_options)
            .map_err(|e| ScrapeError::Browser(format!("failed to launch browser: {e}")))?;

        *guard = Some(browser.clone());
        Ok(browser)
    }

    /// Drop the browser so the Chrome process exits. The next fetch will
    /// relaunch.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.browser.lock() {
            if guard.take().is_some() {
                info!("Browser shut down");
            }
        }
    }
}

fn fetch_in_tab(browser: &Browser, url: &str, timeout: Duration) -> Result<String, ScrapeError> {
    let tab = browser
        .new_tab()
        .map_err(|e| ScrapeError::Browser(format!("failed to open tab: {e}")))?;
    tab.set_default_timeout(timeout);

    tab.navigate_to(url).map_err(|e| ScrapeError::Navigation {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    // The calendar table only appears once the page scripts have run. If it
    // never shows up we still want the body, to tell challenges apart from
    // layout changes.
    let waited = tab.wait_for_element("table.calendar__table");
    let html = tab.get_content().map_err(|e| ScrapeError::Navigation {
        url: url.to_string(),
        reason: format!("could not read page content: {e}"),
    })?;
    tab.close(true).ok();

    if waited.is_err() && !is_challenge_page(&html) {
        return Err(ScrapeError::PageStructure(
            "calendar table never rendered".into(),
        ));
    }
    Ok(html)
}

/// Classify the rendered page before handing it to the parser.
fn inspect_page(html: &str) -> Result<(), ScrapeError> {
    if is_challenge_page(html) {
        return Err(ScrapeError::BotChallenge);
    }
    for (marker, code) in [("404 Not Found", 404u16), ("403 Forbidden", 403)] {
        if html.contains(marker) && !html.contains("calendar__table") {
            return Err(ScrapeError::PermanentHttp(code));
        }
    }
    Ok(())
}

fn is_challenge_page(html: &str) -> bool {
    html.contains("Just a moment...")
        || html.contains("Verifying you are human")
        || html.contains("cf-challenge")
}

/// Format a date into the source's week parameter format.
/// e.g. June 1, 2025 -> "jun1.2025"
pub fn format_week_param(date: NaiveDate) -> String {
    let month = date.format("%b").to_string().to_lowercase();
    let day = date.day();
    let year = date.year();
    format!("{month}{day}.{year}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_week_param() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(format_week_param(date), "jun1.2025");

        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(format_week_param(date), "jan15.2025");

        let date = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        assert_eq!(format_week_param(date), "dec25.2025");
    }

    #[test]
    fn test_inspect_page_flags_challenges() {
        assert!(matches!(
            inspect_page("<html>Just a moment...</html>"),
            Err(ScrapeError::BotChallenge)
        ));
        assert!(matches!(
            inspect_page("<html><h1>404 Not Found</h1></html>"),
            Err(ScrapeError::PermanentHttp(404))
        ));
        assert!(inspect_page("<table class=\"calendar__table\"></table>").is_ok());
    }
}
