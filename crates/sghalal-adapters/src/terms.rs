//! Built-in search term list.
//!
//! The directory has no "list everything" query, so coverage comes from the
//! union of many overlapping searches. The list is ordered: terms that tend to
//! match broadly come first, and merge order (and therefore last-write-wins
//! conflict resolution) follows this order.

const BROAD_TERMS: &[&str] = &["*", "a", "e", "i", "o", "u"];

const FOOD_TERMS: &[&str] = &[
    "restaurant", "cafe", "food", "kitchen", "stall", "court", "centre", "mall", "market",
    "hawker", "canteen", "bakery", "shop", "bar", "muslim", "halal", "malay", "indian",
    "chinese", "western", "chicken", "rice", "noodle", "beef", "fish", "seafood", "pizza",
    "burger", "sandwich", "curry", "soup", "dessert", "cake", "bread",
];

const LOCATION_TERMS: &[&str] = &[
    "singapore", "jurong", "tampines", "orchard", "marina", "bugis", "toa", "ang", "bedok",
    "woodlands", "yishun", "sembawang", "changi", "plaza", "junction", "hub", "point", "park",
    "mall", "central", "north", "south", "east", "west", "avenue", "road", "street",
    "crescent", "drive", "lane", "close", "gardens",
];

const SYMBOL_TERMS: &[&str] = &["*", "&", "@", "-", "/", "(", ")", "#", "+"];

pub fn default_search_terms() -> Vec<String> {
    let letters = ('a'..='z').map(String::from);
    let digits = ('0'..='9').map(String::from);
    let words = BROAD_TERMS
        .iter()
        .copied()
        .map(String::from)
        .chain(letters)
        .chain(digits)
        .chain(FOOD_TERMS.iter().copied().map(String::from))
        .chain(LOCATION_TERMS.iter().copied().map(String::from))
        .chain(SYMBOL_TERMS.iter().copied().map(String::from));
    dedupe_terms(words)
}

/// Drop empty and repeated terms, keeping the first occurrence.
///
/// Surrounding whitespace is significant (`" rice"` and `"rice"` hit the
/// upstream index differently) so terms are compared verbatim.
pub fn dedupe_terms(terms: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    terms
        .into_iter()
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Spellings of a productive term that sometimes surface extra matches.
pub fn term_variations(term: &str) -> Vec<String> {
    vec![
        format!(" {term}"),
        format!("{term} "),
        format!("*{term}"),
        format!("{term}*"),
        format!("{term}s"),
        format!("the {term}"),
    ]
}
