//! Personal game-data (GCPD) match history pages.
//!
//! The first page of a tab is a full HTML document carrying the continue
//! token and session id in inline script. Later pages come from the same URL
//! with `ajax=1` as JSON `{ success, html, continue_token }`.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use demosync_core::{AccountKey, Category, Secret};
use demosync_sync::{PageSource, RawItem, RawPage, SourceError};

use crate::http::{check_status, network};

pub const DEFAULT_BASE_URL: &str = "https://steamcommunity.com";

static CONTINUE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"g_sGcContinueToken = '(\d+)'").expect("static regex"));
static SESSION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"g_sessionID = "([0-9a-f]{24})""#).expect("static regex"));

static MATCH_CELL: Lazy<Selector> = Lazy::new(|| selector("td.val_left"));
static REPLAY_LINK: Lazy<Selector> =
    Lazy::new(|| selector("table.csgo_scoreboard_inner_left tbody tr td a"));
static PLAYED_AT_CELL: Lazy<Selector> =
    Lazy::new(|| selector("table.csgo_scoreboard_inner_left tbody tr:nth-child(2) td"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Pagination state carried between pages as one opaque cursor string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub token: String,
    pub session_id: String,
}

impl Continuation {
    pub fn to_cursor(&self) -> String {
        format!("{}:{}", self.token, self.session_id)
    }

    pub fn from_cursor(cursor: &str) -> Option<Self> {
        let (token, session_id) = cursor.split_once(':')?;
        Some(Self {
            token: token.to_string(),
            session_id: session_id.to_string(),
        })
    }
}

/// Continuation embedded in a first-page document, if there are more pages.
pub fn continuation(document: &str) -> Option<Continuation> {
    let token = CONTINUE_TOKEN.captures(document)?.get(1)?.as_str();
    let session_id = SESSION_ID.captures(document)?.get(1)?.as_str();
    Some(Continuation {
        token: token.to_string(),
        session_id: session_id.to_string(),
    })
}

/// Follow-up page payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AjaxPage {
    pub success: bool,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub continue_token: Option<String>,
}

pub fn parse_ajax(body: &str) -> Result<AjaxPage, SourceError> {
    let page: AjaxPage = serde_json::from_str(body)
        .map_err(|e| SourceError::Protocol(format!("history page JSON: {e}")))?;
    if !page.success {
        return Err(SourceError::Protocol(
            "history page reported success=false".to_string(),
        ));
    }
    Ok(page)
}

/// Raw items of a history page, newest first.
///
/// Follow-up pages deliver bare table rows, which an HTML parser drops
/// outside a table, so those are wrapped first.
pub fn parse_items(html: &str) -> Vec<RawItem> {
    let document = if html.trim_start().starts_with("<tr") {
        Html::parse_document(&format!("<table><tbody>{html}</tbody></table>"))
    } else {
        Html::parse_document(html)
    };
    document.select(&MATCH_CELL).map(parse_cell).collect()
}

fn parse_cell(cell: ElementRef<'_>) -> RawItem {
    let locator = cell
        .select(&REPLAY_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string());
    let played_at = cell
        .select(&PLAYED_AT_CELL)
        .next()
        .map(|td| td.text().collect::<String>().trim().to_string());
    RawItem { locator, played_at }
}

/// Scrapes one account's match history using its login cookie.
pub struct GcpdPageSource {
    client: reqwest::Client,
    base_url: String,
    cookies: HashMap<AccountKey, Secret>,
}

impl GcpdPageSource {
    pub fn new(client: reqwest::Client, cookies: HashMap<AccountKey, Secret>) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL, cookies)
    }

    pub fn with_base_url(
        client: reqwest::Client,
        base_url: impl Into<String>,
        cookies: HashMap<AccountKey, Secret>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cookies,
        }
    }

    async fn get(
        &self,
        cookie: &Secret,
        query: &[(&str, &str)],
    ) -> Result<String, SourceError> {
        let url = format!("{}/my/gcpd/730", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header(reqwest::header::COOKIE, cookie.expose())
            .send()
            .await
            .map_err(network)?;
        check_status(response, &url)?
            .text()
            .await
            .map_err(network)
    }
}

#[async_trait]
impl PageSource for GcpdPageSource {
    async fn fetch_page(
        &self,
        account: &AccountKey,
        category: Category,
        cursor: Option<&str>,
    ) -> Result<RawPage, SourceError> {
        let cookie = self
            .cookies
            .get(account)
            .ok_or_else(|| SourceError::MissingCredentials(account.to_string()))?;

        let Some(cursor) = cursor else {
            tracing::debug!(account = %account, category = %category, "fetching first history page");
            let document = self.get(cookie, &[("tab", category.tab())]).await?;
            let next = continuation(&document);
            return Ok(RawPage {
                items: parse_items(&document),
                has_more: next.is_some(),
                cursor: next.map(|c| c.to_cursor()),
            });
        };

        let state = Continuation::from_cursor(cursor)
            .ok_or_else(|| SourceError::Protocol(format!("bad history cursor '{cursor}'")))?;
        tracing::debug!(account = %account, category = %category, token = %state.token, "fetching history page");
        let body = self
            .get(
                cookie,
                &[
                    ("ajax", "1"),
                    ("tab", category.tab()),
                    ("continue_token", state.token.as_str()),
                    ("sessionid", state.session_id.as_str()),
                ],
            )
            .await?;
        let page = parse_ajax(&body)?;
        let next = page.continue_token.filter(|t| !t.is_empty()).map(|token| Continuation {
            token,
            session_id: state.session_id.clone(),
        });
        Ok(RawPage {
            items: parse_items(&page.html),
            has_more: next.is_some(),
            cursor: next.map(|c| c.to_cursor()),
        })
    }
}
