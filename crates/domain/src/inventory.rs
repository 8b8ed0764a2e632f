//! Inventory entity owned by the inventory participant.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Stock level for one product. `available = quantity - reserved_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub product_id: ProductId,
    pub quantity: u32,
    pub reserved_quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            product_id,
            quantity,
            reserved_quantity: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved_quantity)
    }

    /// Reserves `amount` units. Returns false and leaves the entity untouched
    /// when fewer than `amount` units are available.
    pub fn reserve(&mut self, amount: u32) -> bool {
        if self.available_quantity() < amount {
            return false;
        }
        self.reserved_quantity += amount;
        self.updated_at = Utc::now();
        true
    }

    /// Returns reserved units to stock, never below zero.
    pub fn release(&mut self, amount: u32) {
        self.reserved_quantity = self.reserved_quantity.saturating_sub(amount);
        self.updated_at = Utc::now();
    }

    /// Turns a reservation into a sale, decrementing quantity and reserved together.
    pub fn confirm_reservation(&mut self, amount: u32) -> Result<(), DomainError> {
        if amount > self.reserved_quantity {
            return Err(DomainError::InvalidTransition {
                entity: "inventory",
                from: format!("reserved={}", self.reserved_quantity),
                action: "confirm more than reserved",
            });
        }
        self.quantity -= amount;
        self.reserved_quantity -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_within_available() {
        let mut inventory = Inventory::new(ProductId::new("p1"), 10);
        assert!(inventory.reserve(4));
        assert_eq!(inventory.reserved_quantity, 4);
        assert_eq!(inventory.available_quantity(), 6);
    }

    #[test]
    fn test_reserve_beyond_available_does_not_mutate() {
        let mut inventory = Inventory::new(ProductId::new("p1"), 3);
        assert!(inventory.reserve(2));
        let before = inventory.clone();

        assert!(!inventory.reserve(2));
        assert_eq!(inventory, before);
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut inventory = Inventory::new(ProductId::new("p1"), 10);
        inventory.reserve(2);
        inventory.release(5);
        assert_eq!(inventory.reserved_quantity, 0);
        assert_eq!(inventory.quantity, 10);
    }

    #[test]
    fn test_confirm_reservation_decrements_both() {
        let mut inventory = Inventory::new(ProductId::new("p1"), 10);
        inventory.reserve(3);
        inventory.confirm_reservation(3).unwrap();
        assert_eq!(inventory.quantity, 7);
        assert_eq!(inventory.reserved_quantity, 0);
        assert!(inventory.confirm_reservation(1).is_err());
    }
}
