//! Service discovery from the AWS documentation sitemaps.

use crate::config::DEFAULT_SITEMAP_INDEX_URL;
use crate::error::ProviderError;
use regex::Regex;
use reqwest::Client;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const LOC_PATTERN: &str = r"<loc>\s*([^<]+?)\s*</loc>";
const GUIDE_SITEMAP_PATTERN: &str =
    r"^https://docs\.aws\.amazon\.com/([^/]+)/latest/(userguide|developerguide|devguide)/sitemap\.xml$";

#[derive(Debug, Clone)]
pub struct SitemapParser {
    loc_re: Regex,
    guide_re: Regex,
}

impl SitemapParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            loc_re: Regex::new(LOC_PATTERN)?,
            guide_re: Regex::new(GUIDE_SITEMAP_PATTERN)?,
        })
    }

    fn locations<'a>(&'a self, xml: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.loc_re
            .captures_iter(xml)
            .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
    }

    /// Maps service name to its guide sitemap; a `userguide` wins over other guide types.
    pub fn parse_sitemap_index(&self, xml: &str) -> BTreeMap<String, String> {
        let mut services = BTreeMap::new();

        for loc in self.locations(xml) {
            let Some(captures) = self.guide_re.captures(loc) else {
                continue;
            };
            let (Some(service), Some(guide)) = (captures.get(1), captures.get(2)) else {
                continue;
            };

            let service = service.as_str().to_string();
            if guide.as_str() == "userguide" || !services.contains_key(&service) {
                services.insert(service, loc.to_string());
            }
        }

        services
    }

    /// Page URLs of one guide sitemap, deduplicated and sorted.
    pub(crate) fn parse_sitemap_urls(&self, xml: &str) -> Vec<String> {
        self.locations(xml)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Fetches the sitemap index once per client and answers lookups from it.
pub struct SitemapClient {
    client: Client,
    index_url: String,
    parser: SitemapParser,
    services: OnceCell<BTreeMap<String, String>>,
}

impl SitemapClient {
    pub fn new(index_url: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let parser = SitemapParser::new()
            .map_err(|error| ProviderError::Configuration(format!("sitemap pattern: {error}")))?;

        Ok(Self {
            client,
            index_url: index_url.unwrap_or_else(|| DEFAULT_SITEMAP_INDEX_URL.to_string()),
            parser,
            services: OnceCell::new(),
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ProviderError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Response {
                provider: "sitemap".to_string(),
                details: format!("{url} returned {}", response.status()),
            });
        }
        Ok(response.text().await?)
    }

    async fn services(&self) -> Result<&BTreeMap<String, String>, ProviderError> {
        self.services
            .get_or_try_init(|| async {
                let xml = self.fetch_text(&self.index_url).await?;
                let services = self.parser.parse_sitemap_index(&xml);
                info!(count = services.len(), "discovered documentation services");
                Ok::<_, ProviderError>(services)
            })
            .await
    }

    pub async fn available_services(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.services().await?.keys().cloned().collect())
    }

    pub(crate) async fn sitemap_url(&self, service: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.services().await?.get(service).cloned())
    }

    /// Page URLs for `service`, optionally capped to the first `limit` in sorted order.
    pub async fn page_urls(
        &self,
        service: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, ProviderError> {
        let Some(sitemap) = self.sitemap_url(service).await? else {
            warn!(service, "no sitemap for service");
            return Ok(Vec::new());
        };

        let mut urls = self.parser.parse_sitemap_urls(&self.fetch_text(&sitemap).await?);
        if let Some(limit) = limit {
            urls.truncate(limit);
        }
        Ok(urls)
    }
}
