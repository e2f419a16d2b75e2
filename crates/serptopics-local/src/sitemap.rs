//! Sitemap URL collection for coverage checks.
//!
//! Follows nested sitemap indexes down to a depth cap and returns the
//! deduplicated, sorted page URLs.

use serptopics_core::{Error, Result};

const FETCH_TIMEOUT_MS: u64 = 30_000;

/// One parsed sitemap document: either an index of nested sitemaps, page
/// URLs, or (for malformed feeds) both.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SitemapDoc {
    pub sitemaps: Vec<String>,
    pub pages: Vec<String>,
}

pub fn parse_sitemap(body: &str) -> SitemapDoc {
    // quick-xml because sitemap namespaces make regex parsing brittle.
    let mut reader = quick_xml::Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut doc = SitemapDoc::default();
    let mut in_sitemap_entry = false;
    let mut in_url_entry = false;
    let mut in_loc = false;
    let mut loc_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name.ends_with("sitemap") {
                    in_sitemap_entry = true;
                } else if name.ends_with("url") {
                    in_url_entry = true;
                } else if name.ends_with("loc") {
                    in_loc = true;
                    loc_text.clear();
                }
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if in_loc {
                    let txt = t.unescape().map(|t| t.to_string()).unwrap_or_default();
                    loc_text.push_str(&txt);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name.ends_with("loc") {
                    in_loc = false;
                    let loc = loc_text.trim().to_string();
                    // Ignore relative or otherwise unparseable locations.
                    if url::Url::parse(&loc).is_ok() {
                        if in_sitemap_entry {
                            doc.sitemaps.push(loc);
                        } else if in_url_entry {
                            doc.pages.push(loc);
                        }
                    }
                    loc_text.clear();
                } else if name.ends_with("sitemap") {
                    in_sitemap_entry = false;
                } else if name.ends_with("url") {
                    in_url_entry = false;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
        buf.clear();
    }

    doc
}

/// Fetches a sitemap and every nested sitemap below it, up to `max_depth`
/// levels of nesting, and returns the sorted, deduplicated page URLs.
pub async fn fetch_sitemap_urls(
    client: &reqwest::Client,
    sitemap_url: &str,
    max_depth: usize,
) -> Result<Vec<String>> {
    let mut pending = vec![(sitemap_url.to_string(), 0usize)];
    let mut pages: Vec<String> = Vec::new();

    while let Some((current_url, depth)) = pending.pop() {
        let resp = client
            .get(&current_url)
            .timeout(std::time::Duration::from_millis(FETCH_TIMEOUT_MS))
            .send()
            .await
            .map_err(|e| Error::Sitemap(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Sitemap(format!(
                "sitemap HTTP {status} for {current_url}"
            )));
        }
        let body = resp.text().await.map_err(|e| Error::Sitemap(e.to_string()))?;

        let doc = parse_sitemap(&body);
        pages.extend(doc.pages);
        if doc.sitemaps.is_empty() {
            continue;
        }
        if depth >= max_depth {
            log::warn!("sitemap nesting depth cap reached at {current_url}");
            continue;
        }
        for nested in doc.sitemaps {
            pending.push((nested, depth + 1));
        }
    }

    pages.sort();
    pages.dedup();
    Ok(pages)
}
