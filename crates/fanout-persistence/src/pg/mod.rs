//! Implementación Postgres (Diesel) de `FanoutStore`.
//!
//! - Cada operación toma una conexión del pool dentro de
//!   `tokio::task::spawn_blocking`; Diesel es síncrono y no debe bloquear el
//!   runtime.
//! - Errores transitorios (pool, serialización, deadlock) se reintentan con
//!   `with_retry` antes de llegar al motor como `StoreError::Unavailable`.
//! - La idempotencia de `distribute_messages` descansa en la restricción
//!   UNIQUE (client_id, user_id, origin_message_id) más
//!   `ON CONFLICT DO NOTHING`: las filas repetidas se omiten sin abortar el
//!   lote.

mod rows;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::upsert::excluded;
use fanout_core::{BlockSnapshot, FanoutStore, InsertOutcome, LocalCopy, MessageQuery, StoreError};
use fanout_domain::{CanonicalMessage, DistributeRecord, DistributeStatus, MemberStatus, MessageStatus, PriorityTier,
                    TenantId, TenantMember, UserId};
use log::{debug, error, warn};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{block_user, client_block_user, client_users, clients, distribute_messages, messages};
use rows::{DistributeRow, MemberRow, MessageRow, NewDistributeRow, NewMemberRow, NewMessageRow};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
type PooledConn = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones; permite inyectar un pool real o uno de
/// test sin acoplar el store a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PooledConn, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PooledConn, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        // Algunos drivers entregan estos casos como texto libre.
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Reintento con backoff lineal corto: hasta 3 reintentos (15, 30 y 45 ms).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("store:retry attempt={} err={} sleep_ms={}", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

fn codes<T: Copy>(items: &[T], code: impl Fn(T) -> i16) -> Vec<i16> {
    items.iter().map(|i| code(*i)).collect()
}

fn require_member_row(updated: usize, tenant: &str, user: &str) -> Result<(), PersistenceError> {
    match updated {
        0 => Err(PersistenceError::MissingRow(format!("member {user} not found in {tenant}"))),
        _ => Ok(()),
    }
}

fn messages_into_domain(rows: Vec<MessageRow>) -> Result<Vec<CanonicalMessage>, PersistenceError> {
    rows.into_iter().map(MessageRow::into_domain).collect()
}

pub struct PgFanoutStore<P: ConnectionProvider = PoolProvider> {
    provider: Arc<P>,
}

impl PgFanoutStore<PoolProvider> {
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PoolProvider { pool })
    }
}

impl<P: ConnectionProvider> PgFanoutStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }

    /// Ejecuta `f` con una conexión del pool fuera del runtime async.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
        where T: Send + 'static,
              F: Fn(&mut PgConnection) -> Result<T, PersistenceError> + Send + 'static
    {
        let provider = Arc::clone(&self.provider);
        let joined = tokio::task::spawn_blocking(move || {
                         with_retry(|| {
                             let mut conn = provider.connection()?;
                             f(&mut *conn)
                         })
                     }).await;
        match joined {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                error!("store:{op}_failed err={e}");
                Err(e.into())
            }
            Err(e) => Err(StoreError::Backend(format!("{op}: blocking task failed: {e}"))),
        }
    }

    /// Alta idempotente de un tenant.
    pub async fn register_tenant(&self, tenant: &str) -> Result<(), StoreError> {
        let tenant = tenant.to_string();
        self.run("register_tenant", move |conn| {
                diesel::insert_into(clients::table).values(clients::client_id.eq(&tenant))
                                                   .on_conflict_do_nothing()
                                                   .execute(conn)?;
                Ok(())
            })
            .await
    }

    /// Inserta o reemplaza la fila de membresía.
    pub async fn upsert_member(&self, member: &TenantMember) -> Result<(), StoreError> {
        let member = member.clone();
        self.run("upsert_member", move |conn| {
                diesel::insert_into(client_users::table).values(NewMemberRow::from(&member))
                                                        .on_conflict((client_users::client_id, client_users::user_id))
                                                        .do_update()
                                                        .set((client_users::priority.eq(excluded(client_users::priority)),
                                                              client_users::status.eq(excluded(client_users::status)),
                                                              client_users::muted_until
                                                                  .eq(excluded(client_users::muted_until))))
                                                        .execute(conn)?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl<P: ConnectionProvider> FanoutStore for PgFanoutStore<P> {
    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        self.run("list_tenants", |conn| {
                Ok(clients::table.select(clients::client_id)
                                 .order(clients::created_at.asc())
                                 .load::<String>(conn)?)
            })
            .await
    }

    async fn tenant_exists(&self, tenant: &str) -> Result<bool, StoreError> {
        let tenant = tenant.to_string();
        self.run("tenant_exists", move |conn| {
                Ok(diesel::select(diesel::dsl::exists(clients::table.filter(clients::client_id.eq(&tenant))))
                    .get_result::<bool>(conn)?)
            })
            .await
    }

    async fn members_by_priority(&self, tenant: &str, tiers: &[PriorityTier]) -> Result<Vec<UserId>, StoreError> {
        let tenant = tenant.to_string();
        let tiers = codes(tiers, PriorityTier::code);
        self.run("members_by_priority", move |conn| {
                Ok(client_users::table.filter(client_users::client_id.eq(&tenant))
                                      .filter(client_users::priority.eq_any(tiers.clone()))
                                      .order((client_users::created_at.asc(), client_users::user_id.asc()))
                                      .select(client_users::user_id)
                                      .load::<String>(conn)?)
            })
            .await
    }

    async fn get_member(&self, tenant: &str, user: &str) -> Result<Option<TenantMember>, StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("get_member", move |conn| {
                client_users::table.filter(client_users::client_id.eq(&tenant))
                                   .filter(client_users::user_id.eq(&user))
                                   .first::<MemberRow>(conn)
                                   .optional()?
                                   .map(MemberRow::into_domain)
                                   .transpose()
            })
            .await
    }

    async fn update_member_priority(&self, tenant: &str, user: &str, priority: PriorityTier) -> Result<(), StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("update_member_priority", move |conn| {
                let n = diesel::update(client_users::table.filter(client_users::client_id.eq(&tenant))
                                                          .filter(client_users::user_id.eq(&user)))
                        .set(client_users::priority.eq(priority.code()))
                        .execute(conn)?;
                require_member_row(n, &tenant, &user)
            })
            .await
    }

    async fn update_member_priority_and_status(&self,
                                               tenant: &str,
                                               user: &str,
                                               priority: PriorityTier,
                                               status: MemberStatus)
                                               -> Result<(), StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("update_member_priority_and_status", move |conn| {
                let n = diesel::update(client_users::table.filter(client_users::client_id.eq(&tenant))
                                                          .filter(client_users::user_id.eq(&user)))
                        .set((client_users::priority.eq(priority.code()), client_users::status.eq(status.code())))
                        .execute(conn)?;
                require_member_row(n, &tenant, &user)
            })
            .await
    }

    async fn update_member_mute(&self, tenant: &str, user: &str, until: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("update_member_mute", move |conn| {
                let n = diesel::update(client_users::table.filter(client_users::client_id.eq(&tenant))
                                                          .filter(client_users::user_id.eq(&user)))
                        .set(client_users::muted_until.eq(until))
                        .execute(conn)?;
                require_member_row(n, &tenant, &user)
            })
            .await
    }

    async fn load_block_snapshot(&self) -> Result<BlockSnapshot, StoreError> {
        self.run("load_block_snapshot", |conn| {
                let global = block_user::table.select(block_user::user_id)
                                              .load::<String>(conn)?
                                              .into_iter()
                                              .collect();
                let mut snapshot = BlockSnapshot { global, ..BlockSnapshot::default() };
                let pairs = client_block_user::table.select((client_block_user::client_id, client_block_user::user_id))
                                                    .load::<(String, String)>(conn)?;
                for (tenant, user) in pairs {
                    snapshot.per_tenant.entry(tenant).or_default().insert(user);
                }
                debug!("store:block_snapshot global={} tenants={}",
                       snapshot.global.len(),
                       snapshot.per_tenant.len());
                Ok(snapshot)
            })
            .await
    }

    async fn insert_global_block(&self, user: &str) -> Result<(), StoreError> {
        let user = user.to_string();
        self.run("insert_global_block", move |conn| {
                diesel::insert_into(block_user::table).values(block_user::user_id.eq(&user))
                                                      .on_conflict_do_nothing()
                                                      .execute(conn)?;
                Ok(())
            })
            .await
    }

    async fn insert_tenant_block(&self, tenant: &str, user: &str) -> Result<(), StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("insert_tenant_block", move |conn| {
                diesel::insert_into(client_block_user::table).values((client_block_user::client_id.eq(&tenant),
                                                                       client_block_user::user_id.eq(&user)))
                                                             .on_conflict_do_nothing()
                                                             .execute(conn)?;
                Ok(())
            })
            .await
    }

    async fn delete_tenant_block(&self, tenant: &str, user: &str) -> Result<(), StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("delete_tenant_block", move |conn| {
                diesel::delete(client_block_user::table.filter(client_block_user::client_id.eq(&tenant))
                                                       .filter(client_block_user::user_id.eq(&user)))
                .execute(conn)?;
                Ok(())
            })
            .await
    }

    async fn insert_message(&self, msg: &CanonicalMessage) -> Result<InsertOutcome, StoreError> {
        let msg = msg.clone();
        self.run("insert_message", move |conn| {
                let n = diesel::insert_into(messages::table).values(NewMessageRow::from(&msg))
                                                            .on_conflict_do_nothing()
                                                            .execute(conn)?;
                Ok(match n {
                    0 => InsertOutcome::AlreadyExists,
                    n => InsertOutcome::Inserted(n),
                })
            })
            .await
    }

    async fn get_message(&self, tenant: &str, message_id: &str) -> Result<Option<CanonicalMessage>, StoreError> {
        let (tenant, message_id) = (tenant.to_string(), message_id.to_string());
        self.run("get_message", move |conn| {
                messages::table.filter(messages::client_id.eq(&tenant))
                               .filter(messages::message_id.eq(&message_id))
                               .first::<MessageRow>(conn)
                               .optional()?
                               .map(MessageRow::into_domain)
                               .transpose()
            })
            .await
    }

    async fn oldest_message_by_status(&self,
                                      tenant: &str,
                                      status: MessageStatus)
                                      -> Result<Option<CanonicalMessage>, StoreError> {
        let tenant = tenant.to_string();
        self.run("oldest_message_by_status", move |conn| {
                messages::table.filter(messages::client_id.eq(&tenant))
                               .filter(messages::status.eq(status.code()))
                               .order(messages::created_at.asc())
                               .first::<MessageRow>(conn)
                               .optional()?
                               .map(MessageRow::into_domain)
                               .transpose()
            })
            .await
    }

    async fn update_message_status(&self, tenant: &str, message_id: &str, status: MessageStatus) -> Result<(), StoreError> {
        let (tenant, message_id) = (tenant.to_string(), message_id.to_string());
        self.run("update_message_status", move |conn| {
                diesel::update(messages::table.filter(messages::client_id.eq(&tenant))
                                              .filter(messages::message_id.eq(&message_id)))
                .set(messages::status.eq(status.code()))
                .execute(conn)?;
                Ok(())
            })
            .await
    }

    async fn query_messages(&self, tenant: &str, query: &MessageQuery<'_>) -> Result<Vec<CanonicalMessage>, StoreError> {
        let tenant = tenant.to_string();
        let statuses = codes(query.statuses, MessageStatus::code);
        let excluded_categories: Vec<String> = query.excluded_categories.iter().map(|c| c.to_string()).collect();
        let after = query.after;
        let limit = query.limit.map(|l| l as i64);
        self.run("query_messages", move |conn| {
                let mut q = messages::table.filter(messages::client_id.eq(&tenant))
                                           .filter(messages::status.eq_any(statuses.clone()))
                                           .into_boxed();
                if !excluded_categories.is_empty() {
                    q = q.filter(messages::category.ne_all(excluded_categories.clone()));
                }
                if let Some(after) = after {
                    q = q.filter(messages::created_at.gt(after));
                }
                q = q.order(messages::created_at.desc());
                if let Some(limit) = limit {
                    q = q.limit(limit);
                }
                messages_into_domain(q.load::<MessageRow>(conn)?)
            })
            .await
    }

    async fn messages_by_sender_since(&self,
                                      tenant: &str,
                                      user: &str,
                                      status: MessageStatus,
                                      since: DateTime<Utc>)
                                      -> Result<Vec<CanonicalMessage>, StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("messages_by_sender_since", move |conn| {
                let rows = messages::table.filter(messages::client_id.eq(&tenant))
                                          .filter(messages::user_id.eq(&user))
                                          .filter(messages::status.eq(status.code()))
                                          .filter(messages::created_at.gt(since))
                                          .order(messages::created_at.desc())
                                          .load::<MessageRow>(conn)?;
                messages_into_domain(rows)
            })
            .await
    }

    async fn insert_distribute_batch(&self, rows: &[DistributeRecord]) -> Result<InsertOutcome, StoreError> {
        if rows.is_empty() {
            return Ok(InsertOutcome::Inserted(0));
        }
        let batch: Vec<NewDistributeRow> = rows.iter().map(NewDistributeRow::from).collect();
        let total = batch.len();
        let inserted = self.run("insert_distribute_batch", move |conn| {
                               Ok(diesel::insert_into(distribute_messages::table).values(&batch)
                                                                                 .on_conflict_do_nothing()
                                                                                 .execute(conn)?)
                           })
                           .await?;
        debug!("store:distribute_batch rows={total} inserted={inserted}");
        Ok(match inserted {
            0 => InsertOutcome::AlreadyExists,
            n => InsertOutcome::Inserted(n),
        })
    }

    async fn get_distribute_by_message_id(&self,
                                          tenant: &str,
                                          message_id: &str)
                                          -> Result<Option<DistributeRecord>, StoreError> {
        let (tenant, message_id) = (tenant.to_string(), message_id.to_string());
        self.run("get_distribute_by_message_id", move |conn| {
                distribute_messages::table.filter(distribute_messages::client_id.eq(&tenant))
                                          .filter(distribute_messages::message_id.eq(&message_id))
                                          .first::<DistributeRow>(conn)
                                          .optional()?
                                          .map(DistributeRow::into_domain)
                                          .transpose()
            })
            .await
    }

    async fn local_copies_by_origin(&self, tenant: &str, origins: &[String]) -> Result<Vec<LocalCopy>, StoreError> {
        if origins.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = tenant.to_string();
        let origins = origins.to_vec();
        self.run("local_copies_by_origin", move |conn| {
                let rows = distribute_messages::table.filter(distribute_messages::client_id.eq(&tenant))
                                                     .filter(distribute_messages::origin_message_id.eq_any(origins.clone()))
                                                     .select((distribute_messages::user_id,
                                                              distribute_messages::message_id,
                                                              distribute_messages::origin_message_id))
                                                     .load::<(String, String, String)>(conn)?;
                Ok(rows.into_iter()
                       .map(|(user_id, message_id, origin_message_id)| LocalCopy { user_id,
                                                                                   message_id,
                                                                                   origin_message_id })
                       .collect())
            })
            .await
    }

    async fn update_distribute_status(&self,
                                      tenant: &str,
                                      message_ids: &[String],
                                      status: DistributeStatus)
                                      -> Result<usize, StoreError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let tenant = tenant.to_string();
        let ids = message_ids.to_vec();
        self.run("update_distribute_status", move |conn| {
                Ok(diesel::update(distribute_messages::table.filter(distribute_messages::client_id.eq(&tenant))
                                                            .filter(distribute_messages::message_id.eq_any(ids.clone())))
                   .set(distribute_messages::status.eq(status.code()))
                   .execute(conn)?)
            })
            .await
    }

    async fn distribute_by_user_status(&self,
                                       tenant: &str,
                                       user: &str,
                                       status: DistributeStatus)
                                       -> Result<Vec<DistributeRecord>, StoreError> {
        let (tenant, user) = (tenant.to_string(), user.to_string());
        self.run("distribute_by_user_status", move |conn| {
                distribute_messages::table.filter(distribute_messages::client_id.eq(&tenant))
                                          .filter(distribute_messages::user_id.eq(&user))
                                          .filter(distribute_messages::status.eq(status.code()))
                                          .order(distribute_messages::created_at.asc())
                                          .load::<DistributeRow>(conn)?
                                          .into_iter()
                                          .map(DistributeRow::into_domain)
                                          .collect()
            })
            .await
    }
}

/// Construye el pool y corre las migraciones pendientes en el primer checkout.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("store:pool_sizes min={validated_min} max={validated_max} adjusting min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
