use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Creates or refreshes the user row. Called on every contact.
    async fn upsert_user(&self, user_id: UserId, username: &str, full_name: &str) -> RepoResult<()>;
    async fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>>;
    async fn active_order(&self, user_id: UserId) -> RepoResult<Option<OrderId>>;
    /// Overwrites any previous pointer; there is no queue of active orders.
    async fn set_active_order(&self, user_id: UserId, order_id: OrderId) -> RepoResult<()>;
    /// Compare-and-clear: resets the pointer only while it still references
    /// `order_id`. A later-activated order for the same user is left alone.
    async fn clear_active_order_if(&self, user_id: UserId, order_id: OrderId) -> RepoResult<()>;
    /// Unconditional clear, used by the explicit /stop opt-out.
    async fn clear_active_order(&self, user_id: UserId) -> RepoResult<()>;
}

#[async_trait]
pub trait OrderRepo: Send + Sync {
    async fn create_order(&self, new: NewOrder) -> RepoResult<Order>;
    async fn get_order(&self, id: OrderId) -> RepoResult<Order>;
    /// All orders of one user, newest first.
    async fn list_user_orders(&self, user_id: UserId) -> RepoResult<Vec<Order>>;
    /// Newest order still awaiting payment, if any. Fallback target for a
    /// payment screenshot sent without context.
    async fn latest_pending_order(&self, user_id: UserId) -> RepoResult<Option<Order>>;
    async fn set_status(&self, id: OrderId, status: OrderStatus) -> RepoResult<()>;
    /// Stores the proof file id and moves the order to PaymentUploaded in one
    /// write. Last write wins on resubmission.
    async fn save_payment_photo(&self, id: OrderId, file_id: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait TopicRepo: Send + Sync {
    /// Persists the topic link and stamps the order row. Fails with Conflict
    /// when the order is already linked; links are never replaced.
    async fn save_topic(&self, link: TopicLink) -> RepoResult<()>;
    async fn topic_by_order(&self, order_id: OrderId) -> RepoResult<Option<TopicLink>>;
    async fn topic_link(&self, topic_id: TopicId) -> RepoResult<Option<TopicLink>>;
}

pub trait Repo: UserRepo + OrderRepo + TopicRepo {}

impl<T> Repo for T where T: UserRepo + OrderRepo + TopicRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct State {
        users: HashMap<UserId, User>,
        orders: HashMap<OrderId, Order>,
        topics: HashMap<TopicId, TopicLink>,
        next_order_id: OrderId,
    }

    /// In-memory backend; state lives for the process only. Backs the test
    /// suite and local development without a database file.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock_poisoned() -> RepoError {
            RepoError::Internal("state lock poisoned".into())
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn upsert_user(&self, user_id: UserId, username: &str, full_name: &str) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            let entry = s.users.entry(user_id).or_insert(User {
                user_id,
                username: String::new(),
                full_name: String::new(),
                active_order_id: None,
            });
            entry.username = username.to_string();
            entry.full_name = full_name.to_string();
            Ok(())
        }

        async fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            Ok(s.users.get(&user_id).cloned())
        }

        async fn active_order(&self, user_id: UserId) -> RepoResult<Option<OrderId>> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            Ok(s.users.get(&user_id).and_then(|u| u.active_order_id))
        }

        async fn set_active_order(&self, user_id: UserId, order_id: OrderId) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            let user = s.users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
            user.active_order_id = Some(order_id);
            Ok(())
        }

        async fn clear_active_order_if(&self, user_id: UserId, order_id: OrderId) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            if let Some(user) = s.users.get_mut(&user_id) {
                if user.active_order_id == Some(order_id) {
                    user.active_order_id = None;
                }
            }
            Ok(())
        }

        async fn clear_active_order(&self, user_id: UserId) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            if let Some(user) = s.users.get_mut(&user_id) {
                user.active_order_id = None;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OrderRepo for InMemRepo {
        async fn create_order(&self, new: NewOrder) -> RepoResult<Order> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            s.next_order_id += 1;
            let id = s.next_order_id;
            let order = Order {
                id,
                user_id: new.user_id,
                service_type: new.service_type,
                has_parts: new.has_parts,
                parts_data: new.parts_data,
                description: new.description,
                status: OrderStatus::PendingPayment,
                payment_photo: None,
                topic_id: None,
                price_byn: new.price_byn,
                price_rub: new.price_rub,
                created_at: Utc::now(),
            };
            s.orders.insert(id, order.clone());
            Ok(order)
        }

        async fn get_order(&self, id: OrderId) -> RepoResult<Order> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            s.orders.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_user_orders(&self, user_id: UserId) -> RepoResult<Vec<Order>> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            let mut v: Vec<_> = s
                .orders
                .values()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.id.cmp(&a.id)); // ids are monotonic, newest first
            Ok(v)
        }

        async fn latest_pending_order(&self, user_id: UserId) -> RepoResult<Option<Order>> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            Ok(s.orders
                .values()
                .filter(|o| o.user_id == user_id && o.status == OrderStatus::PendingPayment)
                .max_by_key(|o| o.id)
                .cloned())
        }

        async fn set_status(&self, id: OrderId, status: OrderStatus) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            let order = s.orders.get_mut(&id).ok_or(RepoError::NotFound)?;
            order.status = status;
            Ok(())
        }

        async fn save_payment_photo(&self, id: OrderId, file_id: &str) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            let order = s.orders.get_mut(&id).ok_or(RepoError::NotFound)?;
            order.payment_photo = Some(file_id.to_string());
            order.status = OrderStatus::PaymentUploaded;
            Ok(())
        }
    }

    #[async_trait]
    impl TopicRepo for InMemRepo {
        async fn save_topic(&self, link: TopicLink) -> RepoResult<()> {
            let mut s = self.state.write().map_err(|_| Self::lock_poisoned())?;
            if s.topics.contains_key(&link.topic_id)
                || s.topics.values().any(|l| l.order_id == link.order_id)
            {
                return Err(RepoError::Conflict);
            }
            if let Some(order) = s.orders.get_mut(&link.order_id) {
                order.topic_id = Some(link.topic_id);
            }
            s.topics.insert(link.topic_id, link);
            Ok(())
        }

        async fn topic_by_order(&self, order_id: OrderId) -> RepoResult<Option<TopicLink>> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            Ok(s.topics.values().find(|l| l.order_id == order_id).cloned())
        }

        async fn topic_link(&self, topic_id: TopicId) -> RepoResult<Option<TopicLink>> {
            let s = self.state.read().map_err(|_| Self::lock_poisoned())?;
            Ok(s.topics.get(&topic_id).cloned())
        }
    }
}

// SQLite implementation (feature = "sqlite-store")
#[cfg(feature = "sqlite-store")]
pub mod sqlite {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::str::FromStr as _;

    #[derive(Clone)]
    pub struct SqliteRepo {
        pool: Pool<Sqlite>,
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    #[derive(sqlx::FromRow)]
    struct OrderRow {
        id: i64,
        user_id: i64,
        service_type: String,
        has_parts: bool,
        parts_data: Option<String>,
        description: String,
        status: String,
        payment_photo: Option<String>,
        topic_id: Option<i64>,
        price_byn: f64,
        price_rub: f64,
        created_at: DateTime<Utc>,
    }

    impl TryFrom<OrderRow> for Order {
        type Error = RepoError;
        fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
            let status = OrderStatus::from_str(&r.status)
                .map_err(|_| RepoError::Internal(format!("order {} has status '{}'", r.id, r.status)))?;
            Ok(Order {
                id: r.id,
                user_id: r.user_id,
                service_type: r.service_type,
                has_parts: r.has_parts,
                parts_data: r.parts_data,
                description: r.description,
                status,
                payment_photo: r.payment_photo,
                topic_id: r.topic_id,
                price_byn: r.price_byn,
                price_rub: r.price_rub,
                created_at: r.created_at,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserRow {
        user_id: i64,
        username: String,
        full_name: String,
        active_order_id: Option<i64>,
    }

    impl From<UserRow> for User {
        fn from(r: UserRow) -> Self {
            User {
                user_id: r.user_id,
                username: r.username,
                full_name: r.full_name,
                active_order_id: r.active_order_id,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct TopicRow {
        topic_id: i64,
        order_id: i64,
        user_id: i64,
    }

    impl From<TopicRow> for TopicLink {
        fn from(r: TopicRow) -> Self {
            TopicLink { topic_id: r.topic_id, order_id: r.order_id, user_id: r.user_id }
        }
    }

    const ORDER_COLUMNS: &str = "id, user_id, service_type, has_parts, parts_data, description, \
                                 status, payment_photo, topic_id, price_byn, price_rub, created_at";

    impl SqliteRepo {
        pub async fn connect(path: &str) -> anyhow::Result<Self> {
            let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new().max_connections(5).connect_with(opts).await?;
            let repo = Self { pool };
            repo.init_schema().await?;
            Ok(repo)
        }

        /// Tables are created if absent at startup; there is no schema versioning.
        async fn init_schema(&self) -> anyhow::Result<()> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY,
                    username TEXT NOT NULL DEFAULT '',
                    full_name TEXT NOT NULL DEFAULT '',
                    active_order_id INTEGER
                )",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS orders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    service_type TEXT NOT NULL,
                    has_parts INTEGER NOT NULL DEFAULT 0,
                    parts_data TEXT,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending_payment',
                    payment_photo TEXT,
                    topic_id INTEGER,
                    price_byn REAL NOT NULL,
                    price_rub REAL NOT NULL,
                    created_at TEXT NOT NULL
                )",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS topic_links (
                    topic_id INTEGER PRIMARY KEY,
                    order_id INTEGER NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL
                )",
            )
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepo for SqliteRepo {
        async fn upsert_user(&self, user_id: UserId, username: &str, full_name: &str) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO users (user_id, username, full_name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET username = ?2, full_name = ?3",
            )
            .bind(user_id)
            .bind(username)
            .bind(full_name)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(())
        }

        async fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>> {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT user_id, username, full_name, active_order_id FROM users WHERE user_id = ?1",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.map(User::from))
        }

        async fn active_order(&self, user_id: UserId) -> RepoResult<Option<OrderId>> {
            let row: Option<Option<i64>> =
                sqlx::query_scalar("SELECT active_order_id FROM users WHERE user_id = ?1")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(internal)?;
            Ok(row.flatten())
        }

        async fn set_active_order(&self, user_id: UserId, order_id: OrderId) -> RepoResult<()> {
            let res = sqlx::query("UPDATE users SET active_order_id = ?2 WHERE user_id = ?1")
                .bind(user_id)
                .bind(order_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn clear_active_order_if(&self, user_id: UserId, order_id: OrderId) -> RepoResult<()> {
            sqlx::query(
                "UPDATE users SET active_order_id = NULL
                 WHERE user_id = ?1 AND active_order_id = ?2",
            )
            .bind(user_id)
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(())
        }

        async fn clear_active_order(&self, user_id: UserId) -> RepoResult<()> {
            sqlx::query("UPDATE users SET active_order_id = NULL WHERE user_id = ?1")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(())
        }
    }

    #[async_trait]
    impl OrderRepo for SqliteRepo {
        async fn create_order(&self, new: NewOrder) -> RepoResult<Order> {
            let res = sqlx::query(
                "INSERT INTO orders (user_id, service_type, has_parts, parts_data, description,
                                     status, price_byn, price_rub, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending_payment', ?6, ?7, ?8)",
            )
            .bind(new.user_id)
            .bind(&new.service_type)
            .bind(new.has_parts)
            .bind(&new.parts_data)
            .bind(&new.description)
            .bind(new.price_byn)
            .bind(new.price_rub)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            self.get_order(res.last_insert_rowid()).await
        }

        async fn get_order(&self, id: OrderId) -> RepoResult<Order> {
            let row = sqlx::query_as::<_, OrderRow>(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;
            row.try_into()
        }

        async fn list_user_orders(&self, user_id: UserId) -> RepoResult<Vec<Order>> {
            let rows = sqlx::query_as::<_, OrderRow>(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY id DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.into_iter().map(Order::try_from).collect()
        }

        async fn latest_pending_order(&self, user_id: UserId) -> RepoResult<Option<Order>> {
            let row = sqlx::query_as::<_, OrderRow>(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders
                 WHERE user_id = ?1 AND status = 'pending_payment'
                 ORDER BY id DESC LIMIT 1"
            ))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            row.map(Order::try_from).transpose()
        }

        async fn set_status(&self, id: OrderId, status: OrderStatus) -> RepoResult<()> {
            let res = sqlx::query("UPDATE orders SET status = ?2 WHERE id = ?1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn save_payment_photo(&self, id: OrderId, file_id: &str) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE orders SET payment_photo = ?2, status = 'payment_uploaded' WHERE id = ?1",
            )
            .bind(id)
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TopicRepo for SqliteRepo {
        async fn save_topic(&self, link: TopicLink) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT topic_id FROM topic_links WHERE order_id = ?1")
                    .bind(link.order_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(internal)?;
            if existing.is_some() {
                return Err(RepoError::Conflict);
            }
            sqlx::query("INSERT INTO topic_links (topic_id, order_id, user_id) VALUES (?1, ?2, ?3)")
                .bind(link.topic_id)
                .bind(link.order_id)
                .bind(link.user_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| match &e {
                    // UNIQUE(order_id) / PRIMARY KEY(topic_id) backstop
                    sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
                    _ => internal(e),
                })?;
            sqlx::query("UPDATE orders SET topic_id = ?2 WHERE id = ?1")
                .bind(link.order_id)
                .bind(link.topic_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok(())
        }

        async fn topic_by_order(&self, order_id: OrderId) -> RepoResult<Option<TopicLink>> {
            let row = sqlx::query_as::<_, TopicRow>(
                "SELECT topic_id, order_id, user_id FROM topic_links WHERE order_id = ?1",
            )
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.map(TopicLink::from))
        }

        async fn topic_link(&self, topic_id: TopicId) -> RepoResult<Option<TopicLink>> {
            let row = sqlx::query_as::<_, TopicRow>(
                "SELECT topic_id, order_id, user_id FROM topic_links WHERE topic_id = ?1",
            )
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.map(TopicLink::from))
        }
    }
}
