use async_trait::async_trait;
use common::{CustomerId, Money, OrderId, PaymentId, ProductId, SagaId};
use domain::{Inventory, Order, Payment, SagaState, SagaStatus};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    FailedMessage, FailedMessageStatus, OutboxRecord, OutboxStatus, Result, StoreError,
    store::{DeadLetterStore, OutboxStore, SagaStore, StoreTx},
};

const SAGA_COLUMNS: &str = "saga_id, order_id, customer_id, product_id, quantity, total_amount, status, current_step, payment_id, failure_reason, created_at, updated_at, completed_at";
const ORDER_COLUMNS: &str = "order_id, saga_id, customer_id, product_id, quantity, total_amount, status, cancellation_reason, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "payment_id, saga_id, order_id, customer_id, amount, status, transaction_id, payment_key, refund_id, failure_reason, created_at, updated_at";
const INVENTORY_COLUMNS: &str = "product_id, quantity, reserved_quantity, created_at, updated_at";
const OUTBOX_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, topic, status, retry_count, created_at, processed_at";
const FAILED_COLUMNS: &str = "id, original_topic, partition_id, offset_id, message_key, message_value, error_message, status, created_at, resolved_at, retry_count";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn to_u32(value: i64, column: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidColumn { column, value })
}

fn row_to_saga(row: PgRow) -> Result<SagaState> {
    Ok(SagaState {
        saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "saga_state.quantity")?,
        total_amount: Money::new(row.try_get("total_amount")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        current_step: row.try_get::<String, _>("current_step")?.parse()?,
        payment_id: row
            .try_get::<Option<String>, _>("payment_id")?
            .map(PaymentId::new),
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    Ok(Order {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
        customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "orders.quantity")?,
        total_amount: Money::new(row.try_get("total_amount")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payment(row: PgRow) -> Result<Payment> {
    Ok(Payment {
        payment_id: PaymentId::new(row.try_get::<String, _>("payment_id")?),
        saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
        amount: Money::new(row.try_get("amount")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        transaction_id: row.try_get("transaction_id")?,
        payment_key: row.try_get("payment_key")?,
        refund_id: row.try_get("refund_id")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_inventory(row: PgRow) -> Result<Inventory> {
    Ok(Inventory {
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "inventory.quantity")?,
        reserved_quantity: to_u32(
            row.try_get("reserved_quantity")?,
            "inventory.reserved_quantity",
        )?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_outbox(row: PgRow) -> Result<OutboxRecord> {
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get::<String, _>("event_type")?.parse()?,
        payload: row.try_get("payload")?,
        topic: row.try_get("topic")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        retry_count: to_u32(row.try_get("retry_count")?, "outbox.retry_count")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn row_to_failed(row: PgRow) -> Result<FailedMessage> {
    Ok(FailedMessage {
        id: row.try_get("id")?,
        original_topic: row.try_get("original_topic")?,
        partition_id: row.try_get("partition_id")?,
        offset_id: row.try_get("offset_id")?,
        message_key: row.try_get("message_key")?,
        message_value: row.try_get("message_value")?,
        error_message: row.try_get("error_message")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
        retry_count: to_u32(row.try_get("retry_count")?, "failed_messages.retry_count")?,
    })
}

/// Transaction over [`PostgresStore`]. Rolled back by sqlx when dropped.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn saga(&mut self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let sql = format!("SELECT {SAGA_COLUMNS} FROM saga_state WHERE saga_id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(saga_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_saga)
            .transpose()
    }

    async fn save_saga(&mut self, saga: &SagaState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_state (saga_id, order_id, customer_id, product_id, quantity, total_amount,
                                    status, current_step, payment_id, failure_reason,
                                    created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (saga_id) DO UPDATE SET
                status = EXCLUDED.status,
                current_step = EXCLUDED.current_step,
                payment_id = EXCLUDED.payment_id,
                failure_reason = EXCLUDED.failure_reason,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(saga.saga_id.as_uuid())
        .bind(saga.order_id.as_uuid())
        .bind(saga.customer_id.as_str())
        .bind(saga.product_id.as_str())
        .bind(i64::from(saga.quantity))
        .bind(saga.total_amount.amount())
        .bind(saga.status.as_str())
        .bind(saga.current_step.as_str())
        .bind(saga.payment_id.as_ref().map(PaymentId::as_str))
        .bind(saga.failure_reason.as_deref())
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .bind(saga.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_order)
            .transpose()
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, saga_id, customer_id, product_id, quantity, total_amount,
                                status, cancellation_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (order_id) DO UPDATE SET
                status = EXCLUDED.status,
                cancellation_reason = EXCLUDED.cancellation_reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.order_id.as_uuid())
        .bind(order.saga_id.as_uuid())
        .bind(order.customer_id.as_str())
        .bind(order.product_id.as_str())
        .bind(i64::from(order.quantity))
        .bind(order.total_amount.amount())
        .bind(order.status.as_str())
        .bind(order.cancellation_reason.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn payment(&mut self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        let sql =
            format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(payment_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_payment)
            .transpose()
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (payment_id, saga_id, order_id, customer_id, amount, status,
                                  transaction_id, payment_key, refund_id, failure_reason,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (payment_id) DO UPDATE SET
                status = EXCLUDED.status,
                transaction_id = EXCLUDED.transaction_id,
                payment_key = EXCLUDED.payment_key,
                refund_id = EXCLUDED.refund_id,
                failure_reason = EXCLUDED.failure_reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(payment.payment_id.as_str())
        .bind(payment.saga_id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.customer_id.as_str())
        .bind(payment.amount.amount())
        .bind(payment.status.as_str())
        .bind(payment.transaction_id.as_deref())
        .bind(payment.payment_key.as_deref())
        .bind(payment.refund_id.as_deref())
        .bind(payment.failure_reason.as_deref())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn inventory(&mut self, product_id: &ProductId) -> Result<Option<Inventory>> {
        let sql =
            format!("SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(product_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_inventory)
            .transpose()
    }

    async fn save_inventory(&mut self, inventory: &Inventory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, quantity, reserved_quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                reserved_quantity = EXCLUDED.reserved_quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(inventory.product_id.as_str())
        .bind(i64::from(inventory.quantity))
        .bind(i64::from(inventory.reserved_quantity))
        .bind(inventory.created_at)
        .bind(inventory.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload, topic,
                                status, retry_count, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(&record.aggregate_type)
        .bind(&record.aggregate_id)
        .bind(record.event_type.as_str())
        .bind(&record.payload)
        .bind(&record.topic)
        .bind(record.status.as_str())
        .bind(i64::from(record.retry_count))
        .bind(record.created_at)
        .bind(record.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let sql = format!("SELECT {SAGA_COLUMNS} FROM saga_state WHERE saga_id = $1");
        sqlx::query(&sql)
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_saga)
            .transpose()
    }

    async fn find_saga_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        let sql = format!("SELECT {SAGA_COLUMNS} FROM saga_state WHERE order_id = $1");
        sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_saga)
            .transpose()
    }

    async fn list_sagas(&self, status: Option<SagaStatus>) -> Result<Vec<SagaState>> {
        let sql = format!(
            "SELECT {SAGA_COLUMNS} FROM saga_state WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_saga).collect()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1");
        sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_order)
            .transpose()
    }

    async fn find_order_by_saga(&self, saga_id: SagaId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE saga_id = $1");
        sqlx::query(&sql)
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_order)
            .transpose()
    }

    async fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1");
        sqlx::query(&sql)
            .bind(payment_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_payment)
            .transpose()
    }

    async fn find_payment_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE saga_id = $1 ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_payment)
            .transpose()
    }

    async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<Inventory>> {
        let sql = format!("SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = $1");
        sqlx::query(&sql)
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_inventory)
            .transpose()
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        self.find_by_status(OutboxStatus::Pending, limit).await
    }

    async fn find_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE status = $1 ORDER BY created_at ASC, seq ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_outbox).collect()
    }

    async fn get_outbox(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = $1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_outbox)
            .transpose()
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET status = $2, processed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(OutboxStatus::Sent.as_str())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        ensure_updated(result.rows_affected(), id)
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET status = $2, retry_count = retry_count + 1 WHERE id = $1",
        )
        .bind(id)
        .bind(OutboxStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        ensure_updated(result.rows_affected(), id)
    }

    async fn requeue(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE outbox SET status = $2 WHERE id = $1 AND status = $3")
            .bind(id)
            .bind(OutboxStatus::Pending.as_str())
            .bind(OutboxStatus::Failed.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_outbox(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound {
                kind: "Outbox record",
                id: id.to_string(),
            }),
        }
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn ensure_updated(rows_affected: u64, id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound {
            kind: "Outbox record",
            id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl DeadLetterStore for PostgresStore {
    async fn save_failed_message(&self, message: &FailedMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_messages (id, original_topic, partition_id, offset_id, message_key,
                                         message_value, error_message, status, created_at,
                                         resolved_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(message.id)
        .bind(&message.original_topic)
        .bind(message.partition_id)
        .bind(message.offset_id)
        .bind(message.message_key.as_deref())
        .bind(&message.message_value)
        .bind(message.error_message.as_deref())
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.resolved_at)
        .bind(i64::from(message.retry_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_failed_message(&self, id: Uuid) -> Result<Option<FailedMessage>> {
        let sql = format!("SELECT {FAILED_COLUMNS} FROM failed_messages WHERE id = $1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_failed)
            .transpose()
    }

    async fn find_failed_messages(
        &self,
        status: Option<FailedMessageStatus>,
        original_topic: Option<&str>,
    ) -> Result<Vec<FailedMessage>> {
        let sql = format!(
            r#"
            SELECT {FAILED_COLUMNS} FROM failed_messages
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR original_topic = $2)
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(original_topic)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_failed).collect()
    }

    async fn update_failed_message_status(
        &self,
        id: Uuid,
        status: FailedMessageStatus,
    ) -> Result<Option<FailedMessage>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {FAILED_COLUMNS} FROM failed_messages WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };
        let mut message = row_to_failed(row)?;
        message.apply_status(status);

        sqlx::query(
            "UPDATE failed_messages SET status = $2, resolved_at = $3, retry_count = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(message.status.as_str())
        .bind(message.resolved_at)
        .bind(i64::from(message.retry_count))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(message))
    }
}
