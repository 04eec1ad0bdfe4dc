//! HTML parser for catalog and item pages
//!
//! This module handles parsing HTML content to extract:
//! - Item records from detail pages
//! - Item links from catalog listing pages
//! - Pagination state
//!
//! Parsers never fail loudly: malformed markup yields `None` or an empty list.

use crate::model::ParsedItem;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Pagination state of a catalog page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Absolute URL of the following page
    pub next_url: Option<String>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
}

/// Maps page markup to records and links
pub trait CatalogParser: Send + Sync {
    /// Extracts one item from its detail page
    fn parse_item(&self, html: &str, page_url: &str) -> Option<ParsedItem>;

    /// Extracts absolute item URLs from a catalog page, in page order
    fn parse_item_list(&self, html: &str, page_url: &str) -> Vec<String>;

    /// Extracts pagination state from a catalog page
    fn parse_pagination(&self, html: &str, page_url: &str) -> Pagination;
}

/// Parser for the bookstore catalog layout
#[derive(Debug, Default, Clone, Copy)]
pub struct BookstoreParser;

impl CatalogParser for BookstoreParser {
    fn parse_item(&self, html: &str, page_url: &str) -> Option<ParsedItem> {
        let document = Html::parse_document(html);
        let base_url = Url::parse(page_url).ok()?;

        let Some(title) = select_first(&document, "div.product_main h1") else {
            tracing::debug!("No title found on {}", page_url);
            return None;
        };
        let name = element_text(&title);

        let rating = select_first(&document, "p.star-rating")
            .map(|el| parse_rating(&el.value().classes().collect::<Vec<_>>().join(" ")))
            .unwrap_or(0);

        let description = select_first(&document, "#product_description + p")
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty());

        let table = product_table(&document);
        let lookup = |key: &str| {
            table
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let price_excl_tax = parse_price(lookup("Price (excl. tax)").unwrap_or("0"));
        let price_incl_tax = parse_price(lookup("Price (incl. tax)").unwrap_or("0"));
        let (Some(price_excl_tax), Some(price_incl_tax)) = (price_excl_tax, price_incl_tax) else {
            tracing::debug!("Unparseable prices on {}", page_url);
            return None;
        };

        let (availability, _quantity) =
            parse_availability(lookup("Availability").unwrap_or("Out of stock"));

        let num_reviews = lookup("Number of reviews")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        let category = category_from_breadcrumb(&document).unwrap_or_else(|| "Unknown".to_string());

        let image_url = select_first(&document, "div.item.active img")
            .and_then(|el| el.value().attr("src"))
            .and_then(|src| base_url.join(src).ok())
            .map(|url| url.to_string())
            .unwrap_or_default();

        Some(ParsedItem {
            source_url: page_url.to_string(),
            name,
            description,
            category,
            price_excl_tax,
            price_incl_tax,
            availability,
            num_reviews,
            rating,
            image_url,
        })
    }

    fn parse_item_list(&self, html: &str, page_url: &str) -> Vec<String> {
        let Ok(base_url) = Url::parse(page_url) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let Ok(link_selector) = Selector::parse("article.product_pod h3 a[href]") else {
            return Vec::new();
        };

        let urls: Vec<String> = document
            .select(&link_selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| resolve_link(href, &base_url))
            .collect();

        tracing::debug!("Found {} items on {}", urls.len(), page_url);
        urls
    }

    fn parse_pagination(&self, html: &str, page_url: &str) -> Pagination {
        let document = Html::parse_document(html);
        let mut pagination = Pagination::default();

        // Text like "Page 2 of 50"
        if let Some(current) = select_first(&document, "li.current") {
            let text = element_text(&current);
            let parts: Vec<&str> = text.split_whitespace().collect();
            if parts.len() >= 4 {
                pagination.current_page = parts[1].parse().ok();
                pagination.total_pages = parts[3].parse().ok();
            }
        }

        if let Ok(base_url) = Url::parse(page_url) {
            pagination.next_url = select_first(&document, "li.next a")
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| resolve_link(href, &base_url));
        }

        pagination
    }
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

/// Text content with runs of whitespace collapsed
fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rows of the product information table as (header, value)
fn product_table(document: &Html) -> Vec<(String, String)> {
    let (Ok(row_selector), Ok(th), Ok(td)) = (
        Selector::parse("table.table-striped tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    document
        .select(&row_selector)
        .filter_map(|row| {
            let key = row.select(&th).next()?;
            let value = row.select(&td).next()?;
            Some((element_text(&key), element_text(&value)))
        })
        .collect()
}

/// Second-to-last breadcrumb, when the trail has at least three crumbs
fn category_from_breadcrumb(document: &Html) -> Option<String> {
    let crumb_selector = Selector::parse("ul.breadcrumb li").ok()?;
    let link_selector = Selector::parse("a").ok()?;

    let crumbs: Vec<ElementRef> = document.select(&crumb_selector).collect();
    if crumbs.len() < 3 {
        return None;
    }

    crumbs[crumbs.len() - 2]
        .select(&link_selector)
        .next()
        .map(|a| element_text(&a))
        .filter(|text| !text.is_empty())
}

/// Resolves an href to an absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}

/// Parses a price such as "£51.77"; `None` if no number is present
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// Reads a star rating from a class list such as "star-rating Three"; 0 when unknown
pub fn parse_rating(classes: &str) -> u8 {
    classes
        .split_whitespace()
        .find_map(|class| match class {
            "One" => Some(1),
            "Two" => Some(2),
            "Three" => Some(3),
            "Four" => Some(4),
            "Five" => Some(5),
            _ => None,
        })
        .unwrap_or(0)
}

/// Splits "In stock (22 available)" into ("In stock", 22)
pub fn parse_availability(text: &str) -> (String, u32) {
    let text = text.trim();
    match text.split_once('(') {
        Some((status, rest)) => {
            let quantity = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            (status.trim().to_string(), quantity)
        }
        None => (text.to_string(), 0),
    }
}
