//! Independent discovery strategies.
//!
//! Each strategy finds candidate content identifiers its own way; the
//! [`Discoverer`](crate::Discoverer) runs them in sequence and merges their
//! output. A strategy failing is never fatal to discovery as a whole.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use harvester_shared::{DiscoveredItem, Fetcher, HarvesterError, Result, UnitSpec};

/// Priority tier for items from a structured index (sitemap).
pub const PRIORITY_STRUCTURED_INDEX: u8 = 10;

/// Priority tier for items found by probing well-known paths.
pub const PRIORITY_KNOWN_PATH: u8 = 20;

/// Priority tier for items found by recursive link-following.
pub const PRIORITY_LINK_FOLLOW: u8 = 30;

/// Priority tier for synthesized, unprobed URLs.
pub const PRIORITY_SYNTHESIS: u8 = 40;

/// One way of finding content identifiers for a unit.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Strategy name, recorded on every item it finds.
    fn name(&self) -> &'static str;

    /// Find candidate items for the unit.
    async fn discover(&self, unit: &UnitSpec) -> Result<Vec<DiscoveredItem>>;
}

// ---------------------------------------------------------------------------
// Structured index (sitemap)
// ---------------------------------------------------------------------------

/// Parses `<origin>/sitemap.xml` when the site publishes one.
pub struct StructuredIndexStrategy {
    fetcher: Arc<dyn Fetcher>,
}

impl StructuredIndexStrategy {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DiscoveryStrategy for StructuredIndexStrategy {
    fn name(&self) -> &'static str {
        "structured_index"
    }

    async fn discover(&self, unit: &UnitSpec) -> Result<Vec<DiscoveredItem>> {
        let origin = parse_origin(&unit.origin)?;
        let sitemap_url = format!("{}/sitemap.xml", origin_string(&origin));

        let content = match self.fetcher.fetch(&sitemap_url).await {
            Ok(content) => content,
            Err(HarvesterError::NotFound { .. }) => {
                debug!(%sitemap_url, "no sitemap published");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let loc_re = Regex::new(r"<loc>\s*([^<]+?)\s*</loc>")
            .map_err(|e| HarvesterError::parse(e.to_string()))?;

        let base_host = origin.host_str().unwrap_or("").to_string();
        let mut items = Vec::new();
        for cap in loc_re.captures_iter(&content.body) {
            let Ok(url) = Url::parse(&cap[1]) else {
                continue;
            };
            if url.host_str().unwrap_or("") != base_host {
                continue;
            }
            items.push(DiscoveredItem {
                identifier: normalize_identifier(&url),
                priority: PRIORITY_STRUCTURED_INDEX,
                strategy: self.name().into(),
            });
        }

        debug!(%sitemap_url, items = items.len(), "sitemap parsed");
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Known-path probing
// ---------------------------------------------------------------------------

/// Probes well-known listing paths relative to the origin.
pub struct KnownPathsStrategy {
    fetcher: Arc<dyn Fetcher>,
    paths: Vec<String>,
}

impl KnownPathsStrategy {
    pub fn new(fetcher: Arc<dyn Fetcher>, paths: Vec<String>) -> Self {
        Self { fetcher, paths }
    }
}

#[async_trait]
impl DiscoveryStrategy for KnownPathsStrategy {
    fn name(&self) -> &'static str {
        "known_paths"
    }

    async fn discover(&self, unit: &UnitSpec) -> Result<Vec<DiscoveredItem>> {
        let origin = parse_origin(&unit.origin)?;

        let mut items = Vec::new();
        for path in &self.paths {
            let Ok(url) = origin.join(path) else {
                warn!(%path, "known path does not join onto origin");
                continue;
            };

            match self.fetcher.fetch(url.as_str()).await {
                Ok(_) => {
                    items.push(DiscoveredItem {
                        identifier: normalize_identifier(&url),
                        priority: PRIORITY_KNOWN_PATH,
                        strategy: self.name().into(),
                    });
                }
                Err(HarvesterError::NotFound { .. }) => {
                    debug!(%url, "known path absent");
                }
                Err(e) => {
                    // One unreachable probe should not sink the strategy.
                    warn!(%url, error = %e, "known path probe failed");
                }
            }
        }

        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Recursive link-following
// ---------------------------------------------------------------------------

/// Bounded BFS from the origin, collecting every in-scope page visited.
pub struct LinkFollowStrategy {
    fetcher: Arc<dyn Fetcher>,
    depth: u32,
    max_pages: usize,
}

impl LinkFollowStrategy {
    pub fn new(fetcher: Arc<dyn Fetcher>, depth: u32, max_pages: usize) -> Self {
        Self {
            fetcher,
            depth,
            max_pages,
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for LinkFollowStrategy {
    fn name(&self) -> &'static str {
        "link_follow"
    }

    async fn discover(&self, unit: &UnitSpec) -> Result<Vec<DiscoveredItem>> {
        let origin = parse_origin(&unit.origin)?;
        let scope = UnitScope::new(&origin, unit);

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, u32)> = VecDeque::from([(origin, 0)]);
        let mut items = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if visited.len() >= self.max_pages {
                debug!(max_pages = self.max_pages, "page budget exhausted");
                break;
            }

            let identifier = normalize_identifier(&url);
            if !visited.insert(identifier.clone()) {
                continue;
            }

            let content = match self.fetcher.fetch(&identifier).await {
                Ok(content) => content,
                Err(HarvesterError::NotFound { .. }) => {
                    debug!(%identifier, "linked page absent");
                    continue;
                }
                Err(e) => {
                    warn!(%identifier, error = %e, "linked page fetch failed");
                    continue;
                }
            };

            items.push(DiscoveredItem {
                identifier,
                priority: PRIORITY_LINK_FOLLOW,
                strategy: self.name().into(),
            });

            if depth < self.depth {
                for link in extract_links(&content.body, &url) {
                    let Ok(link_url) = Url::parse(&link) else {
                        continue;
                    };
                    if scope.in_scope(&link_url) {
                        queue.push_back((link_url, depth + 1));
                    }
                }
            }
        }

        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Catalog-driven URL synthesis
// ---------------------------------------------------------------------------

/// Builds candidate URLs from the unit's known identifiers and URL template.
///
/// Synthesized URLs are never probed here; wrong guesses surface as cheap
/// not-found skips during retrieval.
pub struct CatalogSynthesisStrategy;

#[async_trait]
impl DiscoveryStrategy for CatalogSynthesisStrategy {
    fn name(&self) -> &'static str {
        "catalog_synthesis"
    }

    async fn discover(&self, unit: &UnitSpec) -> Result<Vec<DiscoveredItem>> {
        let Some(template) = unit.url_template.as_deref() else {
            return Ok(Vec::new());
        };
        if !template.contains("{id}") {
            return Err(HarvesterError::validation(format!(
                "url_template for unit '{}' has no {{id}} placeholder",
                unit.name
            )));
        }

        let mut items = Vec::new();
        for id in &unit.catalog_ids {
            let candidate = template.replace("{id}", id);
            let Ok(url) = Url::parse(&candidate) else {
                warn!(%candidate, "synthesized URL does not parse");
                continue;
            };
            items.push(DiscoveredItem {
                identifier: normalize_identifier(&url),
                priority: PRIORITY_SYNTHESIS,
                strategy: self.name().into(),
            });
        }

        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Scope and URL helpers
// ---------------------------------------------------------------------------

/// Determines which URLs are in scope for a unit.
pub(crate) struct UnitScope {
    base_host: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UnitScope {
    pub(crate) fn new(origin: &Url, unit: &UnitSpec) -> Self {
        Self {
            base_host: origin.host_str().unwrap_or("").to_string(),
            include: unit
                .include_patterns
                .iter()
                .filter_map(|p| glob_to_regex(p))
                .collect(),
            exclude: unit
                .exclude_patterns
                .iter()
                .filter_map(|p| glob_to_regex(p))
                .collect(),
        }
    }

    pub(crate) fn in_scope(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if url.host_str().unwrap_or("") != self.base_host {
            return false;
        }
        self.path_allowed(url.path())
    }

    /// Pattern checks only, for candidates whose host is already trusted.
    pub(crate) fn path_allowed(&self, path: &str) -> bool {
        for pattern in &self.exclude {
            if pattern.is_match(path) {
                return false;
            }
        }
        if !self.include.is_empty() {
            return self.include.iter().any(|p| p.is_match(path));
        }
        true
    }
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

/// Parse a unit origin into a URL.
pub(crate) fn parse_origin(origin: &str) -> Result<Url> {
    Url::parse(origin)
        .map_err(|e| HarvesterError::validation(format!("invalid origin '{origin}': {e}")))
}

/// Origin (scheme + host + port) as a string without a trailing slash.
pub(crate) fn origin_string(url: &Url) -> String {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    }
}

/// Normalize a URL into its canonical identifier form: no fragment, no
/// trailing slash (except at the root).
pub(crate) fn normalize_identifier(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

/// Extract all links from an HTML document, resolved against the base URL.
pub(crate) fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }
            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::testutil::FakeFetcher;

    fn unit(origin: &str) -> UnitSpec {
        UnitSpec {
            name: "acme".into(),
            origin: origin.into(),
            include_patterns: vec![],
            exclude_patterns: vec![],
            catalog_ids: vec![],
            url_template: None,
        }
    }

    #[tokio::test]
    async fn sitemap_strategy_parses_locs_and_filters_hosts() {
        let sitemap = r#"<?xml version="1.0"?>
<urlset>
  <url><loc>https://shop.example.com/product/a</loc></url>
  <url><loc> https://shop.example.com/product/b </loc></url>
  <url><loc>https://other.example.com/product/c</loc></url>
</urlset>"#;

        let fetcher = Arc::new(FakeFetcher {
            pages: HashMap::from([(
                "https://shop.example.com/sitemap.xml".to_string(),
                sitemap.to_string(),
            )]),
        });

        let strategy = StructuredIndexStrategy::new(fetcher);
        let items = strategy
            .discover(&unit("https://shop.example.com"))
            .await
            .unwrap();

        let ids: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "https://shop.example.com/product/a",
                "https://shop.example.com/product/b"
            ]
        );
        assert!(items.iter().all(|i| i.priority == PRIORITY_STRUCTURED_INDEX));
    }

    #[tokio::test]
    async fn sitemap_absence_is_empty_not_an_error() {
        let fetcher = Arc::new(FakeFetcher {
            pages: HashMap::new(),
        });
        let strategy = StructuredIndexStrategy::new(fetcher);
        let items = strategy
            .discover(&unit("https://shop.example.com"))
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn known_paths_keeps_only_present_paths() {
        let fetcher = Arc::new(FakeFetcher {
            pages: HashMap::from([(
                "https://shop.example.com/catalog".to_string(),
                "<html></html>".to_string(),
            )]),
        });

        let strategy = KnownPathsStrategy::new(
            fetcher,
            vec!["/catalog".into(), "/products".into()],
        );
        let items = strategy
            .discover(&unit("https://shop.example.com"))
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identifier, "https://shop.example.com/catalog");
        assert_eq!(items[0].priority, PRIORITY_KNOWN_PATH);
    }

    #[tokio::test]
    async fn link_follow_respects_depth_and_scope() {
        let root = r##"<html><body>
            <a href="/product/a">A</a>
            <a href="https://other.example.com/away">away</a>
            <a href="#anchor">anchor</a>
        </body></html>"##;
        let page_a = r#"<html><body><a href="/product/b">B</a></body></html>"#;
        let page_b = r#"<html><body><a href="/product/c">C</a></body></html>"#;

        let fetcher = Arc::new(FakeFetcher {
            pages: HashMap::from([
                ("https://shop.example.com/".to_string(), root.to_string()),
                (
                    "https://shop.example.com/product/a".to_string(),
                    page_a.to_string(),
                ),
                (
                    "https://shop.example.com/product/b".to_string(),
                    page_b.to_string(),
                ),
                (
                    "https://shop.example.com/product/c".to_string(),
                    "<html></html>".to_string(),
                ),
            ]),
        });

        // Depth 1: the root and its direct links, but not /product/b.
        let strategy = LinkFollowStrategy::new(fetcher.clone(), 1, 100);
        let items = strategy
            .discover(&unit("https://shop.example.com/"))
            .await
            .unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "https://shop.example.com/",
                "https://shop.example.com/product/a"
            ]
        );

        // Depth 3 reaches the whole chain, never leaving the host.
        let strategy = LinkFollowStrategy::new(fetcher, 3, 100);
        let items = strategy
            .discover(&unit("https://shop.example.com/"))
            .await
            .unwrap();
        assert_eq!(items.len(), 4);
        assert!(
            items
                .iter()
                .all(|i| i.identifier.starts_with("https://shop.example.com"))
        );
    }

    #[tokio::test]
    async fn link_follow_honors_page_budget() {
        let mut pages = HashMap::new();
        let mut body = String::from("<html><body>");
        for i in 0..20 {
            body.push_str(&format!("<a href=\"/p/{i}\">p{i}</a>"));
            pages.insert(
                format!("https://shop.example.com/p/{i}"),
                "<html></html>".to_string(),
            );
        }
        body.push_str("</body></html>");
        pages.insert("https://shop.example.com/".to_string(), body);

        let strategy = LinkFollowStrategy::new(Arc::new(FakeFetcher { pages }), 2, 5);
        let items = strategy
            .discover(&unit("https://shop.example.com/"))
            .await
            .unwrap();
        assert!(items.len() <= 5);
    }

    #[tokio::test]
    async fn synthesis_expands_template() {
        let mut spec = unit("https://shop.example.com");
        spec.catalog_ids = vec!["sku-1".into(), "sku-2".into()];
        spec.url_template = Some("https://shop.example.com/product/{id}".into());

        let items = CatalogSynthesisStrategy.discover(&spec).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "https://shop.example.com/product/sku-1",
                "https://shop.example.com/product/sku-2"
            ]
        );
        assert!(items.iter().all(|i| i.priority == PRIORITY_SYNTHESIS));
    }

    #[tokio::test]
    async fn synthesis_without_template_is_empty() {
        let mut spec = unit("https://shop.example.com");
        spec.catalog_ids = vec!["sku-1".into()];
        let items = CatalogSynthesisStrategy.discover(&spec).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn synthesis_rejects_template_without_placeholder() {
        let mut spec = unit("https://shop.example.com");
        spec.catalog_ids = vec!["sku-1".into()];
        spec.url_template = Some("https://shop.example.com/product/fixed".into());
        assert!(CatalogSynthesisStrategy.discover(&spec).await.is_err());
    }

    #[test]
    fn scope_applies_patterns() {
        let origin = Url::parse("https://shop.example.com/").unwrap();
        let mut spec = unit("https://shop.example.com/");
        spec.exclude_patterns = vec!["/blog/**".into()];
        let scope = UnitScope::new(&origin, &spec);

        assert!(scope.in_scope(&Url::parse("https://shop.example.com/product/a").unwrap()));
        assert!(!scope.in_scope(&Url::parse("https://shop.example.com/blog/post").unwrap()));
        assert!(!scope.in_scope(&Url::parse("https://other.example.com/product/a").unwrap()));
        assert!(!scope.in_scope(&Url::parse("ftp://shop.example.com/product/a").unwrap()));
    }

    #[test]
    fn normalization_strips_fragments_and_trailing_slash() {
        let url = Url::parse("https://shop.example.com/product/a/#reviews").unwrap();
        assert_eq!(
            normalize_identifier(&url),
            "https://shop.example.com/product/a"
        );

        let root = Url::parse("https://shop.example.com/").unwrap();
        assert_eq!(normalize_identifier(&root), "https://shop.example.com/");
    }

    #[test]
    fn link_extraction_resolves_and_filters() {
        let html = r##"<html><body>
            <a href="/page2">Page 2</a>
            <a href="relative/path">Relative</a>
            <a href="#section">Anchor</a>
            <a href="mailto:x@example.com">Mail</a>
        </body></html>"##;

        let base = Url::parse("https://shop.example.com/page1").unwrap();
        let links = extract_links(html, &base);

        assert!(links.contains(&"https://shop.example.com/page2".to_string()));
        assert!(links.contains(&"https://shop.example.com/relative/path".to_string()));
        assert!(!links.iter().any(|l| l.contains('#')));
        assert!(!links.iter().any(|l| l.starts_with("mailto:")));
    }
}
