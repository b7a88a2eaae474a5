//! `PostgreSQL` ledger implementation.
//!
//! Store of record for tiers, orders and tickets. The oversell guard lives in
//! the `sold` update of [`Ledger::commit_fulfillment`]:
//!
//! ```sql
//! UPDATE tiers SET sold = sold + $2 WHERE id = $1 AND sold + $2 <= total
//! ```
//!
//! so even a counter store that handed out too many holds cannot push `sold`
//! past `total`.
//!
//! # Example
//!
//! ```no_run
//! use softlock_core::stores::postgres::PostgresLedger;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/softlock").await?;
//! let ledger = PostgresLedger::new(pool);
//! ledger.migrate().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::PostgresConfig;
use crate::error::{AllocError, Result};
use crate::providers::{CommitOutcome, Fulfillment, Ledger};
use crate::types::{
    Buyer, CheckoutId, LineItem, LineStatus, Money, Order, OrderId, OrderStatus, SessionId,
    Ticket, TicketId, Tier, TierConfigUpdate, TierDefinition, TierId, TierKind,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

const TIER_COLUMNS: &str = "id, name, description, price_minor, kind, total, sold";

const ORDER_COLUMNS: &str = "id, session_id, buyer_name, buyer_email, buyer_phone, status, \
                             amount_minor, created_at, updated_at, paid_at";

const LINE_COLUMNS: &str =
    "checkout_id, tier_id, unit_number, quantity, unit_price_minor, status, expires_at";

const TICKET_COLUMNS: &str =
    "id, tier_id, unit_number, order_id, checkout_id, buyer_email, qr_payload, issued_at";

/// `PostgreSQL` ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    /// `PostgreSQL` connection pool.
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a new ledger over an existing pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - `PostgreSQL` connection pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and create the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::StoreUnavailable`] if the database cannot be
    /// reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| AllocError::StoreUnavailable(format!("Failed to connect to ledger: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AllocError::StoreUnavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i32(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| AllocError::ValidationError(format!("{field} {value} is out of range")))
}

fn to_u32(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AllocError::StoreUnavailable(format!("Corrupt {field}: {value}")))
}

fn to_money(value: i64) -> Result<Money> {
    u64::try_from(value)
        .map(Money::from_minor)
        .map_err(|_| AllocError::StoreUnavailable(format!("Corrupt amount: {value}")))
}

fn money_column(money: Money) -> i64 {
    i64::try_from(money.minor()).unwrap_or(i64::MAX)
}

fn tier_from_row(row: &PgRow) -> Result<Tier> {
    Ok(Tier {
        id: TierId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: to_money(row.try_get("price_minor")?)?,
        kind: TierKind::parse(row.try_get("kind")?)?,
        total: to_u32(row.try_get("total")?, "total")?,
        sold: to_u32(row.try_get("sold")?, "sold")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<LineItem> {
    let unit_number: Option<i32> = row.try_get("unit_number")?;
    Ok(LineItem {
        checkout_id: CheckoutId::from_uuid(row.try_get("checkout_id")?),
        tier: TierId::new(row.try_get::<String, _>("tier_id")?),
        unit_number: unit_number.map(|n| to_u32(n, "unit_number")).transpose()?,
        quantity: to_u32(row.try_get("quantity")?, "quantity")?,
        unit_price: to_money(row.try_get("unit_price_minor")?)?,
        status: LineStatus::parse(row.try_get("status")?)?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket> {
    let unit_number: Option<i32> = row.try_get("unit_number")?;
    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get("id")?),
        tier: TierId::new(row.try_get::<String, _>("tier_id")?),
        unit_number: unit_number.map(|n| to_u32(n, "unit_number")).transpose()?,
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        checkout_id: CheckoutId::from_uuid(row.try_get("checkout_id")?),
        buyer_email: row.try_get("buyer_email")?,
        qr_payload: row.try_get("qr_payload")?,
        issued_at: row.try_get("issued_at")?,
    })
}

async fn load_order(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>> {
    let Some(row) = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let lines = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 ORDER BY position"
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(line_from_row)
    .collect::<Result<Vec<_>>>()?;

    let buyer_email: Option<String> = row.try_get("buyer_email")?;
    let buyer = match buyer_email {
        Some(email) => Some(Buyer {
            name: row.try_get::<Option<String>, _>("buyer_name")?.unwrap_or_default(),
            email,
            phone: row.try_get::<Option<String>, _>("buyer_phone")?.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Some(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
        buyer,
        lines,
        status: OrderStatus::parse(row.try_get("status")?)?,
        amount: to_money(row.try_get("amount_minor")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        paid_at: row.try_get("paid_at")?,
    }))
}

/// Load an order after closing its open lines whose hold expired before
/// `now`. Run inside a transaction.
async fn load_order_lapsing(
    conn: &mut PgConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Order>> {
    let lapsed = sqlx::query(
        r"
        UPDATE order_lines SET status = 'lapsed'
        WHERE order_id = $1 AND status = 'open' AND expires_at < $2
        ",
    )
    .bind(id)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let Some(mut order) = load_order(conn, id).await? else {
        return Ok(None);
    };
    if lapsed > 0 {
        order.updated_at = now;
        order.refresh();
        save_order_summary(conn, &order).await?;
        tracing::debug!(order_id = %order.id, lapsed, "Lapsed expired order lines");
    }
    Ok(Some(order))
}

async fn save_order_summary(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r"
        UPDATE orders
        SET buyer_name = $2,
            buyer_email = $3,
            buyer_phone = $4,
            status = $5,
            amount_minor = $6,
            updated_at = $7,
            paid_at = $8
        WHERE id = $1
        ",
    )
    .bind(order.id.as_uuid())
    .bind(order.buyer.as_ref().map(|b| b.name.as_str()))
    .bind(order.buyer.as_ref().map(|b| b.email.as_str()))
    .bind(order.buyer.as_ref().map(|b| b.phone.as_str()))
    .bind(order.status.as_str())
    .bind(money_column(order.amount))
    .bind(order.updated_at)
    .bind(order.paid_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn tickets_for(conn: &mut PgConnection, checkout_id: CheckoutId) -> Result<Vec<Ticket>> {
    sqlx::query(&format!(
        "SELECT {TICKET_COLUMNS} FROM tickets WHERE checkout_id = $1 ORDER BY unit_number, id"
    ))
    .bind(checkout_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(ticket_from_row)
    .collect()
}

impl PostgresLedger {
    /// Distinguish "no such tier" from a failed guard after an update
    /// matched no rows.
    async fn guard_failure(&self, id: &TierId, reason: String) -> AllocError {
        let exists = sqlx::query("SELECT 1 FROM tiers WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await;

        match exists {
            Ok(Some(_)) => AllocError::AdminConflict {
                tier: id.clone(),
                reason,
            },
            Ok(None) => AllocError::UnknownTier(id.clone()),
            Err(e) => e.into(),
        }
    }
}

impl Ledger for PostgresLedger {
    async fn list_tiers(&self) -> Result<Vec<Tier>> {
        sqlx::query(&format!("SELECT {TIER_COLUMNS} FROM tiers ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(tier_from_row)
            .collect()
    }

    async fn tier(&self, id: &TierId) -> Result<Option<Tier>> {
        sqlx::query(&format!("SELECT {TIER_COLUMNS} FROM tiers WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(tier_from_row)
            .transpose()
    }

    async fn define_tier(&self, definition: &TierDefinition) -> Result<Tier> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO tiers (id, name, description, price_minor, kind, total, sold)
            VALUES ($1, $2, $3, $4, $5, 0, 0)
            ON CONFLICT (id) DO NOTHING
            RETURNING {TIER_COLUMNS}
            "
        ))
        .bind(definition.id.as_str())
        .bind(&definition.name)
        .bind(definition.description.as_deref())
        .bind(money_column(definition.price))
        .bind(definition.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(AllocError::AdminConflict {
                tier: definition.id.clone(),
                reason: "tier already exists".into(),
            });
        };

        tracing::info!(tier = %definition.id, kind = definition.kind.as_str(), "Defined tier");
        tier_from_row(&row)
    }

    async fn set_total(&self, id: &TierId, total: u32) -> Result<Tier> {
        let row = sqlx::query(&format!(
            r"
            UPDATE tiers SET total = $2, updated_at = NOW()
            WHERE id = $1 AND sold <= $2
            RETURNING {TIER_COLUMNS}
            "
        ))
        .bind(id.as_str())
        .bind(to_i32(total, "total")?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => tier_from_row(&row),
            None => Err(self
                .guard_failure(id, format!("total {total} is below sold"))
                .await),
        }
    }

    async fn adjust_total(&self, id: &TierId, delta: i64) -> Result<Tier> {
        let row = sqlx::query(&format!(
            r"
            UPDATE tiers SET total = total + $2, updated_at = NOW()
            WHERE id = $1 AND total + $2 >= sold AND total + $2 >= 0
            RETURNING {TIER_COLUMNS}
            "
        ))
        .bind(id.as_str())
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => tier_from_row(&row),
            None => Err(self
                .guard_failure(id, format!("adjusting total by {delta} would drop it below sold"))
                .await),
        }
    }

    async fn update_tier_config(&self, id: &TierId, update: &TierConfigUpdate) -> Result<Tier> {
        let row = sqlx::query(&format!(
            r"
            UPDATE tiers
            SET name = COALESCE($2, name),
                price_minor = COALESCE($3, price_minor),
                description = COALESCE($4, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TIER_COLUMNS}
            "
        ))
        .bind(id.as_str())
        .bind(update.name.as_deref())
        .bind(update.price.map(money_column))
        .bind(update.description.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(tier_from_row)
            .transpose()?
            .ok_or_else(|| AllocError::UnknownTier(id.clone()))
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO orders (id, session_id, status, amount_minor, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.session_id.as_str())
        .bind(order.status.as_str())
        .bind(money_column(order.amount))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in order.lines.iter().enumerate() {
            let position = i32::try_from(position).unwrap_or(i32::MAX);
            sqlx::query(
                r"
                INSERT INTO order_lines
                    (checkout_id, order_id, position, tier_id, unit_number, quantity,
                     unit_price_minor, status, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(line.checkout_id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(position)
            .bind(line.tier.as_str())
            .bind(line.unit_number.map(|n| to_i32(n, "unit_number")).transpose()?)
            .bind(to_i32(line.quantity, "quantity")?)
            .bind(money_column(line.unit_price))
            .bind(line.status.as_str())
            .bind(line.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(order_id = %order.id, lines = order.lines.len(), "Persisted order");
        Ok(())
    }

    async fn order(&self, id: OrderId, now: DateTime<Utc>) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let order = load_order_lapsing(&mut tx, *id.as_uuid(), now).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn order_for_checkout(
        &self,
        checkout_id: CheckoutId,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let order_id: Option<Uuid> =
            sqlx::query_scalar("SELECT order_id FROM order_lines WHERE checkout_id = $1")
                .bind(checkout_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let order = match order_id {
            Some(id) => load_order_lapsing(&mut tx, id, now).await?,
            None => None,
        };
        tx.commit().await?;
        Ok(order)
    }

    async fn lapse_expired_lines(&self, tier: &TierId, now: DateTime<Utc>) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        let mut order_ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            UPDATE order_lines SET status = 'lapsed'
            WHERE tier_id = $1 AND status = 'open' AND expires_at < $2
            RETURNING order_id
            ",
        )
        .bind(tier.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let lapsed = u32::try_from(order_ids.len()).unwrap_or(u32::MAX);

        order_ids.sort_unstable();
        order_ids.dedup();
        for id in order_ids {
            if let Some(mut order) = load_order(&mut tx, id).await? {
                order.updated_at = now;
                order.refresh();
                save_order_summary(&mut tx, &order).await?;
            }
        }

        tx.commit().await?;
        if lapsed > 0 {
            tracing::info!(tier = %tier, lapsed, "Lapsed expired order lines");
        }
        Ok(lapsed)
    }

    async fn close_line(
        &self,
        checkout_id: CheckoutId,
        status: LineStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;

        let order_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT order_id FROM order_lines WHERE checkout_id = $1 FOR UPDATE",
        )
        .bind(checkout_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(order_id) = order_id else {
            return Ok(None);
        };

        let changed = sqlx::query(
            "UPDATE order_lines SET status = $2 WHERE checkout_id = $1 AND status = 'open'",
        )
        .bind(checkout_id.as_uuid())
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let Some(mut order) = load_order(&mut tx, order_id).await? else {
            return Ok(None);
        };
        if changed > 0 {
            order.updated_at = at;
            order.refresh();
            save_order_summary(&mut tx, &order).await?;
        }

        tx.commit().await?;
        Ok(Some(order))
    }

    async fn commit_fulfillment(&self, fulfillment: &Fulfillment) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let line = sqlx::query(
            r"
            SELECT order_id, tier_id, quantity, status
            FROM order_lines
            WHERE checkout_id = $1
            FOR UPDATE
            ",
        )
        .bind(fulfillment.checkout_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(line) = line else {
            return Ok(CommitOutcome::MissingLine);
        };

        let order_id: Uuid = line.try_get("order_id")?;
        let tier_id: String = line.try_get("tier_id")?;
        let quantity: i32 = line.try_get("quantity")?;
        match LineStatus::parse(line.try_get("status")?)? {
            LineStatus::Open | LineStatus::Lapsed => {}
            LineStatus::Fulfilled => {
                let tickets = tickets_for(&mut tx, fulfillment.checkout_id).await?;
                return Ok(CommitOutcome::AlreadyFulfilled(tickets));
            }
            closed => return Ok(CommitOutcome::LineClosed(closed)),
        }

        let sold = sqlx::query(
            r"
            UPDATE tiers SET sold = sold + $2, updated_at = $3
            WHERE id = $1 AND sold + $2 <= total
            ",
        )
        .bind(&tier_id)
        .bind(quantity)
        .bind(fulfillment.at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if sold == 0 {
            tracing::warn!(
                tier = %tier_id,
                quantity,
                checkout_id = %fulfillment.checkout_id,
                "Ledger guard refused sale past total"
            );
            return Ok(CommitOutcome::SoldOut);
        }

        for ticket in &fulfillment.tickets {
            sqlx::query(&format!(
                "INSERT INTO tickets ({TICKET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(ticket.id.as_uuid())
            .bind(ticket.tier.as_str())
            .bind(ticket.unit_number.map(|n| to_i32(n, "unit_number")).transpose()?)
            .bind(ticket.order_id.as_uuid())
            .bind(ticket.checkout_id.as_uuid())
            .bind(&ticket.buyer_email)
            .bind(&ticket.qr_payload)
            .bind(ticket.issued_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE order_lines SET status = 'fulfilled' WHERE checkout_id = $1")
            .bind(fulfillment.checkout_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let Some(mut order) = load_order(&mut tx, order_id).await? else {
            return Ok(CommitOutcome::MissingLine);
        };
        order.buyer = Some(fulfillment.buyer.clone());
        order.updated_at = fulfillment.at;
        order.paid_at.get_or_insert(fulfillment.at);
        order.refresh();
        save_order_summary(&mut tx, &order).await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            checkout_id = %fulfillment.checkout_id,
            tickets = fulfillment.tickets.len(),
            "Committed fulfillment"
        );
        Ok(CommitOutcome::Committed(order))
    }

    async fn tickets_for_checkout(&self, checkout_id: CheckoutId) -> Result<Vec<Ticket>> {
        let mut conn = self.pool.acquire().await?;
        tickets_for(&mut conn, checkout_id).await
    }
}
