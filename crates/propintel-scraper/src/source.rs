use std::future::Future;

use reqwest::Url;

use crate::error::{FetchError, PartitionError};
use crate::fetch::Fetcher;
use crate::parse::{parse_detail_page, parse_index_page, ListingDetail, ListingStub};

/// Search filters applied to every index page: 2 and 3 bedroom residential
/// stock across all dwelling types.
const BASE_FILTERS: &[(&str, &str)] = &[
    ("bedroom", "2,3"),
    (
        "proptype",
        "Multistorey-Apartment,Builder-Floor-Apartment,Penthouse,Studio-Apartment,Residential-House,Villa",
    ),
];

/// A site that lists properties page by page.
///
/// The coordinator only talks to this trait, so tests can drive it with
/// scripted pages and the HTTP details stay in [`MagicBricksSource`].
pub trait ListingSource: Send + Sync + 'static {
    /// Fetches and parses one search-result page. An empty vector means the
    /// results have run out.
    fn index_page(
        &self,
        city: &str,
        page: u32,
    ) -> impl Future<Output = Result<Vec<ListingStub>, PartitionError>> + Send;

    /// Fetches and parses the detail page behind `stub`.
    fn detail(
        &self,
        stub: &ListingStub,
    ) -> impl Future<Output = Result<ListingDetail, PartitionError>> + Send;
}

/// [`ListingSource`] backed by the magicbricks.com search pages.
#[derive(Debug, Clone)]
pub struct MagicBricksSource {
    fetcher: Fetcher,
    base_url: Url,
    origin: String,
    max_listings_per_page: usize,
}

impl MagicBricksSource {
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if `base_url` is not an absolute
    /// http(s) URL.
    pub fn new(
        fetcher: Fetcher,
        base_url: &str,
        max_listings_per_page: usize,
    ) -> Result<Self, FetchError> {
        let parsed = Url::parse(base_url).map_err(|e| FetchError::InvalidUrl {
            url: base_url.to_owned(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: base_url.to_owned(),
                reason: format!("unsupported scheme \"{}\"", parsed.scheme()),
            });
        }
        let origin = parsed.origin().ascii_serialization();
        Ok(Self {
            fetcher,
            base_url: parsed,
            origin,
            max_listings_per_page,
        })
    }

    /// Search-result URL for `city`, page `page` (1-based).
    #[must_use]
    pub fn index_url(&self, city: &str, page: u32) -> String {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in BASE_FILTERS {
                query.append_pair(key, value);
            }
            query.append_pair("cityName", city);
            query.append_pair("page", &page.to_string());
        }
        url.into()
    }

    /// Referer for detail pages: the city's search page, as if the visitor
    /// clicked through from the results.
    fn city_search_url(&self, city: &str) -> String {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("cityName", city);
        url.into()
    }

    fn home_url(&self) -> String {
        format!("{}/", self.origin)
    }
}

impl ListingSource for MagicBricksSource {
    async fn index_page(&self, city: &str, page: u32) -> Result<Vec<ListingStub>, PartitionError> {
        let url = self.index_url(city, page);
        let html = self.fetcher.fetch(&url, &self.home_url()).await?;
        let stubs = parse_index_page(&html, &url, &self.origin, city, self.max_listings_per_page)?;
        tracing::debug!(city, page, listings = stubs.len(), "source: index page parsed");
        Ok(stubs)
    }

    async fn detail(&self, stub: &ListingStub) -> Result<ListingDetail, PartitionError> {
        let html = self
            .fetcher
            .fetch(&stub.url, &self.city_search_url(&stub.city))
            .await?;
        Ok(parse_detail_page(&html, &stub.url)?)
    }
}
