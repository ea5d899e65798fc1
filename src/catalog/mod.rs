pub mod service;

pub use service::{ALL_CATEGORIES_KEY, CategoryService};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub u64);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "category#{}", self.0)
    }
}

/// A product category as listed in the catalog menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub display_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Category {
    pub fn new(id: CategoryId, name: impl Into<String>, display_order: i32) -> Self {
        Self {
            id,
            name: name.into(),
            display_order,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_json_shape() {
        let category = Category::new(CategoryId(4), "Tea", 2);
        let json = serde_json::to_string(&category).unwrap();
        assert_eq!(json, r#"{"id":4,"name":"Tea","display_order":2}"#);

        let parsed: Category =
            serde_json::from_str(r#"{"id":4,"name":"Tea","display_order":2,"description":"Leaves"}"#).unwrap();
        assert_eq!(parsed, category.with_description("Leaves"));
    }
}
