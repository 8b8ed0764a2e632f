//! Product registrations published on the product topic.

use common::ProductId;
use serde::{Deserialize, Serialize};

/// A product registration, keyed on the broker by `product_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub price: i64,
    pub category: String,
}

impl Product {
    /// Returns a description of the first problem with this registration, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.product_id.as_str().trim().is_empty() {
            return Err("productId must not be blank".to_string());
        }
        if self.name.trim().is_empty() {
            return Err(format!("name must not be blank for product {}", self.product_id));
        }
        if self.price < 0 {
            return Err(format!("price must not be negative for product {}", self.product_id));
        }
        Ok(())
    }
}
