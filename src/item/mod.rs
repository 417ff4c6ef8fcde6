//! Core data model for discovered catalog entries
//!
//! This module defines the units the crawl engine produces and the publish
//! channel consumes:
//! - [`Category`]: a traversable listing page
//! - [`Product`]: a discovered item reference, deduplicated by id
//! - [`Item`]: the normalized, publish-ready unit
//! - [`Lang`]: the supported language dimension

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::ConfigError;

/// Language dimension of a crawl
///
/// Serialized in lowercase two-letter form in both configuration files and
/// the item wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Fr,
    De,
    Es,
    It,
    Nl,
    Sv,
    Pl,
}

impl Lang {
    /// Returns the lowercase two-letter code for this language
    pub fn code(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Fr => "fr",
            Lang::De => "de",
            Lang::Es => "es",
            Lang::It => "it",
            Lang::Nl => "nl",
            Lang::Sv => "sv",
            Lang::Pl => "pl",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Lang {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Lang::En),
            "fr" => Ok(Lang::Fr),
            "de" => Ok(Lang::De),
            "es" => Ok(Lang::Es),
            "it" => Ok(Lang::It),
            "nl" => Ok(Lang::Nl),
            "sv" => Ok(Lang::Sv),
            "pl" => Ok(Lang::Pl),
            other => Err(ConfigError::UnknownLang(other.to_string())),
        }
    }
}

/// One traversable listing page discovered during a crawl
///
/// Identity is the extracted `id` only. Two references with different URLs
/// but the same id are the same category; the cycle guard in the crawl
/// engine relies on this.
#[derive(Debug, Clone)]
pub struct Category {
    /// Extracted category identifier
    pub id: String,

    /// Absolute URL of the listing page
    pub url: String,

    /// Human-readable slug, when the pattern captures one
    pub slug: Option<String>,
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Category {}

impl Hash for Category {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One discovered item reference prior to being wrapped as an [`Item`]
///
/// Identity is the extracted `id` only, so two references with the same id
/// but different slugs or URLs collapse to one product.
#[derive(Debug, Clone)]
pub struct Product {
    /// Extracted product identifier
    pub id: String,

    /// Absolute URL(s) where the product was seen
    pub urls: Vec<String>,

    /// Human-readable slug, when the pattern captures one
    pub slug: Option<String>,
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Product {}

impl Hash for Product {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The normalized publish unit handed to the publish channel
///
/// Immutable once constructed. Serialized as a JSON object on the wire:
/// `{"source": ..., "lang": "en", "brand": ..., "urls": [...]}` with `brand`
/// omitted when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Name of the source site configuration that produced this item
    pub source: String,

    /// Language dimension the item was discovered under
    pub lang: Lang,

    /// Brand dimension the item was discovered under, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    /// Resolved product URL(s)
    pub urls: Vec<String>,
}

impl Item {
    /// Builds an item from a discovered product and the current dimensions
    pub fn from_product(source: &str, lang: Lang, brand: Option<&str>, product: &Product) -> Self {
        Item {
            source: source.to_string(),
            lang,
            brand: brand.map(str::to_string),
            urls: product.urls.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lang_round_trip() {
        for code in ["en", "fr", "de", "es", "it", "nl", "sv", "pl"] {
            let lang: Lang = code.parse().unwrap();
            assert_eq!(lang.code(), code);
        }
    }

    #[test]
    fn test_lang_parse_is_case_insensitive() {
        assert_eq!("EN".parse::<Lang>().unwrap(), Lang::En);
        assert_eq!("Fr".parse::<Lang>().unwrap(), Lang::Fr);
    }

    #[test]
    fn test_lang_parse_rejects_unknown() {
        assert!("xx".parse::<Lang>().is_err());
    }

    #[test]
    fn test_category_identity_is_id_only() {
        let a = Category {
            id: "chairs".to_string(),
            url: "https://shop.test/cat/chairs/".to_string(),
            slug: None,
        };
        let b = Category {
            id: "chairs".to_string(),
            url: "https://shop.test/furniture/chairs/".to_string(),
            slug: Some("chairs".to_string()),
        };
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_product_dedup_by_id() {
        let a = Product {
            id: "p1".to_string(),
            urls: vec!["https://shop.test/p/p1/".to_string()],
            slug: Some("red-chair".to_string()),
        };
        let b = Product {
            id: "p1".to_string(),
            urls: vec!["https://shop.test/items/p1/".to_string()],
            slug: Some("crimson-chair".to_string()),
        };

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_item_wire_format() {
        let item = Item {
            source: "shop".to_string(),
            lang: Lang::En,
            brand: None,
            urls: vec!["https://shop.test/p/p1/".to_string()],
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["source"], "shop");
        assert_eq!(json["lang"], "en");
        assert_eq!(json["urls"][0], "https://shop.test/p/p1/");
        // Absent brand is omitted entirely, not serialized as null
        assert!(json.get("brand").is_none());
    }

    #[test]
    fn test_item_wire_format_with_brand() {
        let item = Item {
            source: "shop".to_string(),
            lang: Lang::Fr,
            brand: Some("acme".to_string()),
            urls: vec![],
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["brand"], "acme");
        assert_eq!(json["lang"], "fr");
    }
}
