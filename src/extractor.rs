use scraper::{ElementRef, Html};
use tracing::debug;

use crate::models::{Characteristics, ProductRating, ProductRecord, Review};
use crate::selectors::{SelectorConfig, SelectorRule, keys};
use crate::utils::{AppError, Result};

/// Values written in place of fields whose node could not be located.
pub mod placeholders {
    pub const TITLE: &str = "No title";
    pub const PRICE: &str = "Price not found";
    pub const DESCRIPTION: &str = "No description";
    pub const RATING_MISSING: &str = "Rating not found";
    pub const NO_DATA: &str = "No data";
    pub const REVIEWER: &str = "Unknown reviewer";
    pub const DATE: &str = "No date";
}

/// Attribute read for media sub-fields when the rule names none.
const DEFAULT_MEDIA_ATTR: &str = "src";

/// Applies a [`SelectorConfig`] to a product page. Field-level misses never
/// fail; they yield the placeholders above.
pub struct Extractor;

impl Extractor {
    /// Parses `html` and extracts a record. Errors only when there is no
    /// document at all (empty or whitespace-only input).
    pub fn parse(html: &str, source: &str, config: &SelectorConfig) -> Result<ProductRecord> {
        if html.trim().is_empty() {
            return Err(AppError::Extraction {
                message: format!("empty document for {}", source),
            });
        }
        let document = Html::parse_document(html);
        Ok(Self::parse_document(&document, source, config))
    }

    pub fn parse_document(document: &Html, source: &str, config: &SelectorConfig) -> ProductRecord {
        let root = document.root_element();
        let mut misses = Vec::new();

        let mut scalar = |key: &'static str, placeholder: &str| -> String {
            match config.resolve(key).and_then(|rule| find_first(root, rule)) {
                Some(el) => text_content(el),
                None => {
                    misses.push(key);
                    placeholder.to_string()
                }
            }
        };

        let title = scalar(keys::TITLE, placeholders::TITLE);
        let price = normalize_spaces(&scalar(keys::PRICE, placeholders::PRICE));
        let description = scalar(keys::DESCRIPTION, placeholders::DESCRIPTION);

        let characteristics = extract_characteristics(root, config.resolve(keys::CHARACTERISTICS));
        let rating = extract_rating(root, config.resolve(keys::RATING));
        let reviews = extract_reviews(root, config.resolve(keys::REVIEWS));

        debug!(
            source,
            missing = ?misses,
            characteristics = characteristics.len(),
            reviews = reviews.len(),
            "page extracted"
        );

        ProductRecord {
            title,
            price,
            description,
            characteristics,
            rating,
            reviews,
            source: source.to_string(),
        }
    }
}

fn find_first<'a>(scope: ElementRef<'a>, rule: &SelectorRule) -> Option<ElementRef<'a>> {
    descendants(scope).find(|el| rule.matches(el.value()))
}

fn find_all<'a>(scope: ElementRef<'a>, rule: &SelectorRule) -> Vec<ElementRef<'a>> {
    descendants(scope).filter(|el| rule.matches(el.value())).collect()
}

/// Descendant elements of `scope`, excluding `scope` itself, in document order.
fn descendants<'a>(scope: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    scope.descendants().skip(1).filter_map(ElementRef::wrap)
}

/// All descendant text, trimmed at the ends.
fn text_content(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Each text node trimmed, empties dropped, concatenated.
fn stripped_text(el: ElementRef) -> String {
    el.text().map(str::trim).filter(|t| !t.is_empty()).collect()
}

/// Each text node trimmed, empties dropped, joined with single spaces.
fn spaced_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces thin, no-break and narrow no-break spaces with plain spaces.
pub fn normalize_spaces(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2009}' | '\u{00a0}' | '\u{202f}' => ' ',
            other => other,
        })
        .collect()
}

fn extract_characteristics(root: ElementRef, rule: Option<&SelectorRule>) -> Characteristics {
    let mut characteristics = Characteristics::new();
    let Some(container) = rule else {
        return characteristics;
    };
    let Some(pair_rule) = container.nested(keys::PAIR) else {
        return characteristics;
    };
    let (Some(key_rule), Some(value_rule)) = (pair_rule.nested(keys::KEY), pair_rule.nested(keys::VALUE)) else {
        return characteristics;
    };

    for block in find_all(root, container) {
        for pair in find_all(block, pair_rule) {
            let key = find_first(pair, key_rule).map(text_content);
            let value = find_first(pair, value_rule).map(spaced_text);
            if let (Some(key), Some(value)) = (key, value) {
                characteristics.insert(key, value);
            }
        }
    }

    characteristics
}

fn extract_rating(root: ElementRef, rule: Option<&SelectorRule>) -> ProductRating {
    let container = rule.and_then(|r| find_first(root, r).map(|el| (r, el)));
    let overall_rating = match container {
        None => placeholders::RATING_MISSING.to_string(),
        Some((rule, el)) => rule
            .nested(keys::VALUE)
            .and_then(|value_rule| find_first(el, value_rule))
            .map(text_content)
            .unwrap_or_else(|| placeholders::NO_DATA.to_string()),
    };
    ProductRating { overall_rating }
}

fn extract_reviews(root: ElementRef, rule: Option<&SelectorRule>) -> Vec<Review> {
    let Some(container_rule) = rule else {
        return Vec::new();
    };
    let Some(block_rule) = container_rule.nested(keys::REVIEW_BLOCK) else {
        return Vec::new();
    };
    let exclude = container_rule.nested(keys::EXCLUDE);

    let mut reviews = Vec::new();
    for container in find_all(root, container_rule) {
        for block in find_all(container, block_rule) {
            if exclude.is_some_and(|ex| is_inside_excluded(block, container, ex)) {
                continue;
            }
            reviews.push(extract_review(block, block_rule));
        }
    }
    reviews
}

/// True when an ancestor of `el` below `container` matches `exclude`.
fn is_inside_excluded(el: ElementRef, container: ElementRef, exclude: &SelectorRule) -> bool {
    for ancestor in el.ancestors() {
        if ancestor == *container {
            return false;
        }
        if let Some(ancestor) = ElementRef::wrap(ancestor) {
            if exclude.matches(ancestor.value()) {
                return true;
            }
        }
    }
    false
}

fn extract_review(block: ElementRef, rule: &SelectorRule) -> Review {
    let sub_text = |name: &str, placeholder: &str| -> String {
        rule.nested(name)
            .and_then(|sub| find_first(block, sub))
            .map(stripped_text)
            .unwrap_or_else(|| placeholder.to_string())
    };

    Review {
        reviewer: sub_text(keys::REVIEWER, placeholders::REVIEWER),
        date: sub_text(keys::DATE, placeholders::DATE),
        comment: sub_text(keys::COMMENT, placeholders::NO_DATA),
        rating: count_active_icons(block, rule.nested(keys::RATING)),
        product_color: sub_text(keys::PRODUCT_COLOR, placeholders::NO_DATA),
        media: extract_media(block, rule.nested(keys::MEDIA)),
    }
}

/// Counts icons in the rating widget whose inline style carries the
/// configured highlight color.
fn count_active_icons(block: ElementRef, rule: Option<&SelectorRule>) -> u32 {
    let Some(rule) = rule else {
        return 0;
    };
    let (Some(icon_rule), Some(color)) = (rule.nested(keys::ICON), rule.highlight_color.as_deref()) else {
        return 0;
    };
    let Some(widget) = find_first(block, rule) else {
        return 0;
    };

    find_all(widget, icon_rule)
        .into_iter()
        .filter(|icon| icon.value().attr("style").is_some_and(|style| style.contains(color)))
        .count() as u32
}

fn extract_media(block: ElementRef, rule: Option<&SelectorRule>) -> Vec<String> {
    let Some(rule) = rule else {
        return Vec::new();
    };
    let attr = rule.attr.as_deref().unwrap_or(DEFAULT_MEDIA_ATTR);
    find_all(block, rule)
        .into_iter()
        .filter_map(|el| el.value().attr(attr))
        .map(str::to_string)
        .collect()
}
