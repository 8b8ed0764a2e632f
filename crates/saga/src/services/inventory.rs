//! Inventory participant.

use chrono::Utc;
use common::ProductId;
use domain::{
    Inventory, InventoryFailed, InventoryReleased, InventoryReserved, ReleaseInventory,
    ReserveInventory, SagaEvent,
};
use store::SagaStore;

use crate::error::Result;

/// Aggregate type of the rows this participant writes to the outbox.
pub const INVENTORY_AGGREGATE: &str = "Inventory";

/// Owns stock levels.
///
/// Insufficient or unknown stock is not an error: the reply is an
/// InventoryFailed event carrying the requested and available quantities.
#[derive(Clone)]
pub struct InventoryService<S: SagaStore> {
    store: S,
}

impl<S: SagaStore> InventoryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, product_id = %command.product_id, quantity = command.quantity))]
    pub async fn reserve_stock(&self, command: &ReserveInventory) -> Result<SagaEvent> {
        let mut tx = self.store.begin().await?;

        let event = match tx.inventory(&command.product_id).await? {
            None => {
                tracing::warn!("inventory not found");
                self.failed(command, 0, "Inventory not found")
            }
            Some(mut inventory) => {
                let available = inventory.available_quantity();
                if inventory.reserve(command.quantity) {
                    tx.save_inventory(&inventory).await?;
                    tracing::info!(
                        remaining = inventory.available_quantity(),
                        "stock reserved"
                    );
                    SagaEvent::InventoryReserved(InventoryReserved {
                        saga_id: command.saga_id,
                        order_id: command.order_id,
                        product_id: command.product_id.clone(),
                        quantity: command.quantity,
                        timestamp: Utc::now(),
                    })
                } else {
                    tracing::warn!(available, "insufficient stock");
                    self.failed(command, available, "Insufficient stock")
                }
            }
        };

        tx.enqueue_event(INVENTORY_AGGREGATE, &event).await?;
        tx.commit().await?;

        let outcome = if matches!(event, SagaEvent::InventoryReserved(_)) {
            "reserved"
        } else {
            "failed"
        };
        metrics::counter!("inventory_reservations_total", "outcome" => outcome).increment(1);
        Ok(event)
    }

    fn failed(&self, command: &ReserveInventory, available: u32, reason: &str) -> SagaEvent {
        SagaEvent::InventoryFailed(InventoryFailed {
            saga_id: command.saga_id,
            order_id: command.order_id,
            product_id: command.product_id.clone(),
            requested_quantity: command.quantity,
            available_quantity: available,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Gives reserved stock back and replies InventoryReleased, also when
    /// the product is unknown.
    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, product_id = %command.product_id, quantity = command.quantity))]
    pub async fn release_stock(&self, command: &ReleaseInventory) -> Result<SagaEvent> {
        let mut tx = self.store.begin().await?;

        match tx.inventory(&command.product_id).await? {
            Some(mut inventory) => {
                inventory.release(command.quantity);
                tx.save_inventory(&inventory).await?;
                tracing::info!(reason = %command.reason, "stock released");
            }
            None => tracing::warn!("inventory not found, replying anyway"),
        }

        let event = SagaEvent::InventoryReleased(InventoryReleased {
            saga_id: command.saga_id,
            order_id: command.order_id,
            product_id: command.product_id.clone(),
            quantity: command.quantity,
            timestamp: Utc::now(),
        });
        tx.enqueue_event(INVENTORY_AGGREGATE, &event).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Sets the stock of a product to `quantity` with nothing reserved,
    /// replacing any previous level.
    #[tracing::instrument(skip(self))]
    pub async fn initialize_inventory(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Inventory> {
        let mut tx = self.store.begin().await?;
        let inventory = Inventory::new(product_id, quantity);
        tx.save_inventory(&inventory).await?;
        tx.commit().await?;

        tracing::info!("inventory initialized");
        Ok(inventory)
    }

    pub async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<Inventory>> {
        Ok(self.store.get_inventory(product_id).await?)
    }
}
