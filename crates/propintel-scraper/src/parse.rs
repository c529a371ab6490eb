//! HTML parsing for search-result (index) pages and listing detail pages.
//!
//! Parsing is regex-based: the pages are large, server-rendered and only a
//! handful of values are needed, so a full DOM is not built.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use propintel_core::{ListingRecord, PriceUnit};
use regex::Regex;

use crate::error::ParseError;

static LISTING_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\b[^>]*?\bhref\s*=\s*["']([^"']*(?:propertyDetails|/property/)[^"']*)["']"#)
        .expect("valid regex")
});
static SLUG_BHK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)-BHK").expect("valid regex"));
static SLUG_AREA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)-Sq-(ft|yrd)").expect("valid regex"));
static SLUG_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"in-([A-Za-z-]+)&id").expect("valid regex"));

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("valid regex"));

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:₹|\brs\.?)\s*(\d[\d,]*(?:\.\d+)?)\s*(crores?|cr|lakhs?|lacs?)\b")
        .expect("valid regex")
});
static BHK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*BHK").expect("valid regex"));
static AREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(?:sq\.?\s*ft|sqft)").expect("valid regex")
});

/// Property types that appear verbatim in listing URL slugs.
const SLUG_PROPERTY_TYPES: &[&str] = &[
    "Multistorey-Apartment",
    "Builder-Floor-Apartment",
    "Residential-House",
    "Villa",
    "Penthouse",
    "Studio-Apartment",
];

/// Coarse property-type keywords searched for in detail page text.
const DETAIL_PROPERTY_TYPES: &[&str] = &["Apartment", "Villa", "House", "Penthouse", "Studio"];

const SQ_FT_PER_SQ_YARD: f64 = 9.0;

/// What an index page reveals about one listing, read from its URL slug.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingStub {
    pub url: String,
    pub city: String,
    pub location: Option<String>,
    pub property_type: Option<String>,
    pub bedrooms: Option<u32>,
    pub area_sqft: Option<f64>,
}

/// Fields read from a listing's detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetail {
    pub price_cr: Option<f64>,
    pub bedrooms: Option<u32>,
    pub area_sqft: Option<f64>,
    pub property_type: Option<String>,
    pub title: Option<String>,
}

impl ListingStub {
    /// Human-readable title assembled from the slug fields, e.g.
    /// `2 BHK Multistorey Apartment in Baner`.
    #[must_use]
    pub fn slug_title(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(bhk) = self.bedrooms {
            parts.push(format!("{bhk} BHK"));
        }
        if let Some(ptype) = &self.property_type {
            parts.push(ptype.clone());
        }
        if let Some(location) = &self.location {
            parts.push(format!("in {location}"));
        }
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    /// Merges the stub with its detail page (if fetched) into a record.
    ///
    /// Slug fields are structured and win over text-scraped ones; the detail
    /// page fills the gaps and is the only source of the price.
    #[must_use]
    pub fn into_record(self, detail: Option<ListingDetail>, scraped_at: DateTime<Utc>) -> ListingRecord {
        let detail = detail.unwrap_or_default();
        let title = detail.title.clone().or_else(|| self.slug_title());
        ListingRecord {
            url: self.url,
            city: self.city,
            location: self.location,
            property_type: self.property_type.or(detail.property_type),
            bedrooms: self.bedrooms.or(detail.bedrooms),
            area_sqft: self.area_sqft.or(detail.area_sqft),
            price_cr: detail.price_cr,
            price_per_sqft: None,
            title,
            scraped_at,
        }
        .with_derived_fields()
    }
}

/// Extracts listing stubs from a search-result page.
///
/// Relative links are resolved against `origin` (scheme + host). Links
/// repeated within the page (card image and title usually both link) are
/// collapsed; at most `max_listings` stubs are returned.
///
/// # Errors
///
/// Returns [`ParseError::Blocked`] for bot-challenge pages and
/// [`ParseError::NotHtml`] when the body has no document markup.
pub fn parse_index_page(
    html: &str,
    page_url: &str,
    origin: &str,
    city: &str,
    max_listings: usize,
) -> Result<Vec<ListingStub>, ParseError> {
    check_document(html, page_url)?;

    let mut seen = HashSet::new();
    let mut stubs = Vec::new();
    for caps in LISTING_HREF_RE.captures_iter(html) {
        if stubs.len() >= max_listings {
            break;
        }
        let href = decode_entities(caps[1].trim());
        if href.is_empty() {
            continue;
        }
        let url = absolutize(&href, origin);
        if !seen.insert(url.clone()) {
            continue;
        }
        stubs.push(stub_from_url(url, city));
    }
    Ok(stubs)
}

/// Extracts price, size and title from a listing detail page.
///
/// # Errors
///
/// Same as [`parse_index_page`].
pub fn parse_detail_page(html: &str, url: &str) -> Result<ListingDetail, ParseError> {
    check_document(html, url)?;

    let text = visible_text(html);

    let price_cr = PRICE_RE.captures(&text).and_then(|caps| {
        let amount: f64 = caps[1].replace(',', "").parse().ok()?;
        let unit = PriceUnit::from_label(&caps[2])?;
        Some(unit.to_crores(amount))
    });
    let bedrooms = BHK_RE
        .captures(&text)
        .and_then(|caps| caps[1].parse().ok());
    let area_sqft = AREA_RE
        .captures(&text)
        .and_then(|caps| caps[1].replace(',', "").parse().ok());

    let lowered = text.to_lowercase();
    let property_type = DETAIL_PROPERTY_TYPES
        .iter()
        .find(|t| lowered.contains(&t.to_lowercase()))
        .map(|t| (*t).to_string());

    let title = H1_RE
        .captures(html)
        .map(|caps| visible_text(&caps[1]))
        .filter(|t| !t.is_empty());

    Ok(ListingDetail {
        price_cr,
        bedrooms,
        area_sqft,
        property_type,
        title,
    })
}

fn stub_from_url(url: String, city: &str) -> ListingStub {
    let slug = url.rsplit('/').next().unwrap_or(&url);

    let bedrooms = SLUG_BHK_RE
        .captures(slug)
        .and_then(|caps| caps[1].parse().ok());
    let area_sqft = SLUG_AREA_RE.captures(slug).and_then(|caps| {
        let value: f64 = caps[1].parse().ok()?;
        if caps[2].eq_ignore_ascii_case("yrd") {
            Some(value * SQ_FT_PER_SQ_YARD)
        } else {
            Some(value)
        }
    });
    let property_type = SLUG_PROPERTY_TYPES
        .iter()
        .find(|t| slug.contains(*t))
        .map(|t| t.replace('-', " "));
    let location = SLUG_LOCATION_RE
        .captures(slug)
        .map(|caps| caps[1].trim_matches('-').replace('-', " "))
        .filter(|l| !l.is_empty());

    ListingStub {
        city: city.to_string(),
        location,
        property_type,
        bedrooms,
        area_sqft,
        url,
    }
}

fn absolutize(href: &str, origin: &str) -> String {
    let origin = origin.trim_end_matches('/');
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with('/') {
        format!("{origin}{href}")
    } else {
        format!("{origin}/{href}")
    }
}

fn check_document(body: &str, url: &str) -> Result<(), ParseError> {
    if looks_like_bot_challenge(body) {
        return Err(ParseError::Blocked {
            url: url.to_owned(),
        });
    }
    let lowered = body.to_ascii_lowercase();
    if !(lowered.contains("<html") || lowered.contains("<body") || lowered.contains("<!doctype html")) {
        return Err(ParseError::NotHtml {
            url: url.to_owned(),
        });
    }
    Ok(())
}

pub(crate) fn looks_like_bot_challenge(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    let has_cloudflare_banner = lowered.contains("attention required! | cloudflare");
    let has_challenge_platform = lowered.contains("/cdn-cgi/challenge-platform/");
    let has_just_a_moment = lowered.contains("just a moment...");
    let has_cookie_gate = lowered.contains("please enable cookies");
    let has_cf_chl = lowered.contains("cf-chl-");
    let has_akamai_denial = lowered.contains("<title>access denied</title>")
        && lowered.contains("you don't have permission to access");
    let has_captcha_gate =
        lowered.contains("captcha") && lowered.contains("verify you are a human");

    has_cloudflare_banner
        || has_challenge_platform
        || (has_just_a_moment && has_cookie_gate)
        || (has_just_a_moment && has_cf_chl)
        || has_akamai_denial
        || has_captcha_gate
}

fn visible_text(html: &str) -> String {
    let without_scripts = SCRIPT_STYLE_RE.replace_all(html, " ");
    let without_tags = TAG_RE.replace_all(&without_scripts, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE_RE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#8377;", "₹")
        .replace("&#x20B9;", "₹")
        .replace("&#x20b9;", "₹")
        .replace("&rupee;", "₹")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
