use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::archive::{ArchiveDay, FillRatio, YearMonth, date_from_puzzle_href, puzzle_path};
use crate::config::{SiteSection, non_empty};
use crate::webdriver::{
    Browser, CookieSpec, ElementRef, Locator, WebDriverConfig, WebDriverSession,
    is_no_such_element,
};

pub const DEFAULT_CALENDAR_SELECTOR: &str = ".calendar";
pub const DEFAULT_DAY_LINK_SELECTOR: &str = ".calendar a[href*='/crosswords/game/']";
pub const DEFAULT_DAY_COMPLETE_XPATH: &str = ".//span[normalize-space(text())='Review']";
pub const DEFAULT_SIGNED_IN_SELECTOR: &str = "[data-testid='user-settings-button']";
pub const DEFAULT_GRID_CELL_SELECTOR: &str = "g.xwd__cell";
pub const DEFAULT_BLOCK_CELL_CLASS: &str = "xwd__cell--block";
pub const DEFAULT_PLAY_BUTTON_XPATH: &str = "//button[@aria-label='Play']";
pub const DEFAULT_RESET_BUTTON_XPATH: &str = "//button[@aria-label='Reset']";

const PLAY_BUTTON_WAIT_MS: u64 = 3_000;

/// Everything the tool does on the remote site, as seen by the authenticator
/// and the scan/fix driver.
pub trait PuzzleSite {
    fn inject_auth_cookie(&mut self, token: &str) -> Result<()>;
    fn is_authenticated(&mut self) -> Result<bool>;
    /// Calendar entries for one archive month, ordered by date.
    fn archive_month(&mut self, month: YearMonth) -> Result<Vec<ArchiveDay>>;
    fn read_fill(&mut self, date: NaiveDate) -> Result<FillRatio>;
    fn is_marked_complete(&mut self, date: NaiveDate) -> Result<bool>;
    fn reset_puzzle(&mut self, date: NaiveDate) -> Result<()>;
    fn request_count(&self) -> usize;
}

/// URLs and selectors for the puzzle site. Defaults target the NYT mini archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    pub base_url: String,
    pub archive_kind: String,
    pub auth_cookie_name: String,
    pub cookie_domain: String,
    pub calendar_selector: String,
    pub day_link_selector: String,
    pub day_complete_xpath: String,
    pub signed_in_selector: String,
    pub grid_cell_selector: String,
    pub block_cell_class: String,
    pub play_button_xpath: String,
    pub reset_button_xpath: String,
    pub confirm_button_xpath: Option<String>,
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self::from_section(&SiteSection::default())
    }
}

impl SiteLayout {
    pub fn from_section(section: &SiteSection) -> Self {
        let selectors = &section.selectors;
        let or_default = |value: &Option<String>, default: &str| {
            non_empty(value.as_deref()).unwrap_or_else(|| default.to_string())
        };
        Self {
            base_url: section.base_url(),
            archive_kind: section.archive_kind(),
            auth_cookie_name: section.auth_cookie_name(),
            cookie_domain: section.cookie_domain(),
            calendar_selector: or_default(&selectors.calendar, DEFAULT_CALENDAR_SELECTOR),
            day_link_selector: or_default(&selectors.day_link, DEFAULT_DAY_LINK_SELECTOR),
            day_complete_xpath: or_default(&selectors.day_complete, DEFAULT_DAY_COMPLETE_XPATH),
            signed_in_selector: or_default(&selectors.signed_in, DEFAULT_SIGNED_IN_SELECTOR),
            grid_cell_selector: or_default(&selectors.grid_cell, DEFAULT_GRID_CELL_SELECTOR),
            block_cell_class: or_default(&selectors.block_cell_class, DEFAULT_BLOCK_CELL_CLASS),
            play_button_xpath: or_default(&selectors.play_button, DEFAULT_PLAY_BUTTON_XPATH),
            reset_button_xpath: or_default(&selectors.reset_button, DEFAULT_RESET_BUTTON_XPATH),
            confirm_button_xpath: non_empty(selectors.confirm_button.as_deref()),
        }
    }

    pub fn archive_root_url(&self) -> String {
        format!("{}/crosswords/archive/{}", self.base_url, self.archive_kind)
    }

    pub fn archive_url(&self, month: YearMonth) -> String {
        format!("{}/{}", self.archive_root_url(), month.archive_path())
    }

    pub fn puzzle_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/crosswords/game/{}/{}",
            self.base_url,
            self.archive_kind,
            puzzle_path(date)
        )
    }

    pub fn auth_cookie(&self, token: &str) -> CookieSpec {
        CookieSpec {
            name: self.auth_cookie_name.clone(),
            value: token.to_string(),
            domain: self.cookie_domain.clone(),
            path: "/".to_string(),
            secure: self.base_url.starts_with("https://"),
        }
    }
}

/// WebDriver settings from `[site]`, with the resolved endpoint and headless flag.
pub fn webdriver_config(section: &SiteSection, url: String, headless: bool) -> Result<WebDriverConfig> {
    let browser = match non_empty(section.browser.as_deref()) {
        Some(value) => Browser::parse(&value)?,
        None => Browser::Chrome,
    };
    let mut config = WebDriverConfig::new(url, browser, headless);
    if let Some(timeout) = section.page_load_timeout_ms {
        config.page_load_timeout_ms = timeout;
    }
    if let Some(timeout) = section.element_timeout_ms {
        config.element_timeout_ms = timeout;
    }
    Ok(config)
}

pub struct BrowserSite {
    session: WebDriverSession,
    layout: SiteLayout,
}

impl BrowserSite {
    pub fn new(session: WebDriverSession, layout: SiteLayout) -> Self {
        Self { session, layout }
    }

    pub fn close(mut self) -> Result<()> {
        self.session.quit()
    }

    fn open_archive(&mut self, month: YearMonth) -> Result<Vec<(NaiveDate, ElementRef)>> {
        let url = self.layout.archive_url(month);
        self.session.navigate(&url)?;
        self.session
            .wait_for(Locator::Css(&self.layout.calendar_selector))
            .with_context(|| format!("archive calendar did not load for {month}"))?;

        let links = self
            .session
            .find_all(Locator::Css(&self.layout.day_link_selector))?;
        let mut days = BTreeMap::new();
        for link in links {
            let Some(href) = self.session.attribute(&link, "href")? else {
                continue;
            };
            // Calendar padding can show days of neighbouring months.
            match date_from_puzzle_href(&href) {
                Some(date) if month.contains(date) => {
                    days.entry(date).or_insert(link);
                }
                _ => debug!(%href, "skipping archive link outside {month}"),
            }
        }
        Ok(days.into_iter().collect())
    }

    fn day_marked_complete(&mut self, link: &ElementRef) -> Result<bool> {
        let markers = self
            .session
            .find_all_within(link, Locator::XPath(&self.layout.day_complete_xpath))?;
        Ok(!markers.is_empty())
    }

    fn is_block_cell(&mut self, cell: &ElementRef) -> Result<bool> {
        let class = self.session.attribute(cell, "class")?.unwrap_or_default();
        if class
            .split_whitespace()
            .any(|name| name == self.layout.block_cell_class)
        {
            return Ok(true);
        }
        let nested = format!(".{}", self.layout.block_cell_class);
        Ok(!self
            .session
            .find_all_within(cell, Locator::Css(&nested))?
            .is_empty())
    }

    fn click_if_present(&mut self, xpath: &str, wait: Duration) -> Result<bool> {
        match self.session.wait_for_within(Locator::XPath(xpath), wait) {
            Ok(button) => {
                self.session.click(&button)?;
                Ok(true)
            }
            Err(error) if is_no_such_element(&error) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

impl PuzzleSite for BrowserSite {
    fn inject_auth_cookie(&mut self, token: &str) -> Result<()> {
        // Cookies can only be set for the document's current domain.
        let base_url = self.layout.base_url.clone();
        self.session.navigate(&base_url)?;
        let cookie = self.layout.auth_cookie(token);
        if let Err(error) = self.session.delete_cookie(&cookie.name) {
            debug!("no stale auth cookie removed: {error:#}");
        }
        self.session.add_cookie(&cookie)
    }

    fn is_authenticated(&mut self) -> Result<bool> {
        let url = self.layout.archive_root_url();
        self.session.navigate(&url)?;
        match self
            .session
            .wait_for(Locator::Css(&self.layout.signed_in_selector))
        {
            Ok(_) => Ok(true),
            Err(error) if is_no_such_element(&error) => {
                debug!("signed-in marker not found: {error:#}");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    fn archive_month(&mut self, month: YearMonth) -> Result<Vec<ArchiveDay>> {
        let days = self.open_archive(month)?;
        let mut output = Vec::with_capacity(days.len());
        for (date, link) in days {
            let marked_complete = self.day_marked_complete(&link)?;
            output.push(ArchiveDay {
                date,
                marked_complete,
            });
        }
        Ok(output)
    }

    fn read_fill(&mut self, date: NaiveDate) -> Result<FillRatio> {
        let url = self.layout.puzzle_url(date);
        self.session.navigate(&url)?;
        self.session
            .wait_for(Locator::Css(&self.layout.grid_cell_selector))
            .with_context(|| format!("puzzle grid did not load for {date}"))?;

        let cells = self
            .session
            .find_all(Locator::Css(&self.layout.grid_cell_selector))?;
        let mut total = 0u32;
        let mut filled = 0u32;
        for cell in &cells {
            if self.is_block_cell(cell)? {
                continue;
            }
            total += 1;
            let text = self.session.text(cell)?;
            if cell_has_letter(&text) {
                filled += 1;
            }
        }
        if total == 0 {
            bail!("puzzle grid for {date} has no fillable cells");
        }
        Ok(FillRatio::new(filled, total))
    }

    fn is_marked_complete(&mut self, date: NaiveDate) -> Result<bool> {
        let month = YearMonth::of(date);
        let days = self.open_archive(month)?;
        let (_, link) = days
            .into_iter()
            .find(|(day, _)| *day == date)
            .ok_or_else(|| anyhow::anyhow!("no archive entry for {date}"))?;
        self.day_marked_complete(&link)
    }

    fn reset_puzzle(&mut self, date: NaiveDate) -> Result<()> {
        let url = self.layout.puzzle_url(date);
        self.session.navigate(&url)?;

        let play = self.layout.play_button_xpath.clone();
        let wait = Duration::from_millis(PLAY_BUTTON_WAIT_MS.min(self.session.config().element_timeout_ms));
        if !self.click_if_present(&play, wait)? {
            debug!(%date, "no play button, puzzle already open");
        }

        let reset = self.layout.reset_button_xpath.clone();
        let button = self
            .session
            .wait_for(Locator::XPath(&reset))
            .with_context(|| format!("reset control not found for {date}"))?;
        self.session.click(&button)?;

        if let Some(confirm) = self.layout.confirm_button_xpath.clone() {
            let button = self
                .session
                .wait_for(Locator::XPath(&confirm))
                .with_context(|| format!("reset confirmation not found for {date}"))?;
            self.session.click(&button)?;
        }
        info!(%date, "reset requested");
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.session.request_count()
    }
}

/// Clue numbers share the cell's text with the letter; only letters count.
fn cell_has_letter(text: &str) -> bool {
    text.chars().any(char::is_alphabetic)
}
