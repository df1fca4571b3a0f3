use serde::{Deserialize, Serialize};

use crate::models::{Category, ProductId};

/// Canonical catalog item that scraped listings are matched against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: Category,
    /// Lowercased match terms; see [`Product::longest_keyword_match`].
    pub keywords: Vec<String>,
    pub is_organic: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub category: Category,
    pub keywords: Vec<String>,
    pub is_organic: bool,
}

impl Product {
    pub fn new(id: ProductId, new_product: NewProduct) -> Self {
        Self {
            id,
            name: new_product.name,
            category: new_product.category,
            keywords: normalize_keywords(new_product.keywords),
            is_organic: new_product.is_organic,
            is_active: true,
        }
    }

    /// Length in chars of the longest keyword contained in `text_lower`, if any.
    pub fn longest_keyword_match(&self, text_lower: &str) -> Option<usize> {
        self.keywords
            .iter()
            .filter(|keyword| !keyword.is_empty() && text_lower.contains(keyword.as_str()))
            .map(|keyword| keyword.chars().count())
            .max()
    }
}

fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = keywords
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cucumbers() -> Product {
        Product::new(
            1,
            NewProduct {
                name: "Cucumbers".to_string(),
                category: Category::A,
                keywords: vec!["Cucumber".to_string(), " خيار ".to_string(), "".to_string()],
                is_organic: false,
            },
        )
    }

    #[test]
    fn test_keywords_are_normalized() {
        let product = cucumbers();
        assert_eq!(product.keywords, vec!["cucumber".to_string(), "خيار".to_string()]);
        assert!(product.is_active);
    }

    #[test]
    fn test_longest_keyword_match() {
        let product = cucumbers();
        assert_eq!(product.longest_keyword_match("fresh cucumber 500g"), Some(8));
        assert_eq!(product.longest_keyword_match("خيار بلدي"), Some(4));
        assert_eq!(product.longest_keyword_match("tomatoes"), None);
    }
}
