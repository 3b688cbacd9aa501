use scraper::{Html, Selector};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::debug;
use url::Url;

use crate::fetch::Fetcher;
use crate::utils::{AppError, Result};

/// Product links on a listing page: every `a[href]` containing `marker`,
/// resolved against `base_url` and kept when it points at the base host or
/// one of its subdomains. Order is first appearance, without duplicates.
pub fn extract_product_links(html: &str, base_url: &Url, marker: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let Some(base_host) = base_url.host_str() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains(marker) {
            continue;
        }
        let Ok(url) = base_url.join(href.trim()) else {
            debug!(href, "unresolvable link skipped");
            continue;
        };
        let same_site = url
            .host_str()
            .is_some_and(|host| host == base_host || host.ends_with(&format!(".{}", base_host)));
        if same_site && seen.insert(url.to_string()) {
            links.push(url.to_string());
        }
    }
    links
}

/// Fetches a listing page through `fetcher` and extracts its product links.
pub async fn fetch_product_links(fetcher: &dyn Fetcher, identity: &str, base_url: &Url, marker: &str) -> Result<Vec<String>> {
    let document = fetcher.fetch(identity).await?;
    let links = extract_product_links(&document.html, base_url, marker);
    debug!(identity, found = links.len(), "listing page scanned");
    Ok(links)
}

/// Appends `links` to the links file, one per line.
pub fn append_links(path: &Path, links: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AppError::persist(path, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::persist(path, e))?;
    for link in links {
        writeln!(file, "{}", link).map_err(|e| AppError::persist(path, e))?;
    }
    file.sync_data().map_err(|e| AppError::persist(path, e))
}

/// Reads a links file. Blank lines are dropped; a missing file is empty.
pub fn read_links(path: &Path) -> Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
