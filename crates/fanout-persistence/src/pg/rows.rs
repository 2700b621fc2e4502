//! Filas Diesel y su mapeo a los tipos de dominio. Los estados y niveles se
//! guardan como SMALLINT con los códigos estables del dominio.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use fanout_domain::{CanonicalMessage, DistributeRecord, DistributeStatus, MemberStatus, MessageStatus, PriorityTier,
                    TenantMember};

use crate::error::PersistenceError;
use crate::schema::{client_users, distribute_messages, messages};

#[derive(Queryable, Debug)]
pub struct MemberRow {
    pub client_id: String,
    pub user_id: String,
    pub priority: i16,
    pub status: i16,
    pub muted_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MemberRow {
    pub fn into_domain(self) -> Result<TenantMember, PersistenceError> {
        Ok(TenantMember { tenant_id: self.client_id,
                          user_id: self.user_id,
                          priority: PriorityTier::from_code(self.priority)?,
                          status: MemberStatus::from_code(self.status)?,
                          muted_until: self.muted_until,
                          created_at: self.created_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = client_users)]
pub struct NewMemberRow<'a> {
    pub client_id: &'a str,
    pub user_id: &'a str,
    pub priority: i16,
    pub status: i16,
    pub muted_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a TenantMember> for NewMemberRow<'a> {
    fn from(m: &'a TenantMember) -> Self {
        Self { client_id: &m.tenant_id,
               user_id: &m.user_id,
               priority: m.priority.code(),
               status: m.status.code(),
               muted_until: m.muted_until,
               created_at: m.created_at }
    }
}

#[derive(Queryable, Debug)]
pub struct MessageRow {
    pub client_id: String,
    pub message_id: String,
    pub user_id: String,
    pub category: String,
    pub data: String,
    pub quote_message_id: Option<String>,
    pub representative_id: Option<String>,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_domain(self) -> Result<CanonicalMessage, PersistenceError> {
        Ok(CanonicalMessage { tenant_id: self.client_id,
                              message_id: self.message_id,
                              user_id: self.user_id,
                              category: self.category,
                              data: self.data,
                              quote_message_id: self.quote_message_id,
                              representative_id: self.representative_id,
                              status: MessageStatus::from_code(self.status)?,
                              created_at: self.created_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub client_id: &'a str,
    pub message_id: &'a str,
    pub user_id: &'a str,
    pub category: &'a str,
    pub data: &'a str,
    pub quote_message_id: Option<&'a str>,
    pub representative_id: Option<&'a str>,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a CanonicalMessage> for NewMessageRow<'a> {
    fn from(m: &'a CanonicalMessage) -> Self {
        Self { client_id: &m.tenant_id,
               message_id: &m.message_id,
               user_id: &m.user_id,
               category: &m.category,
               data: &m.data,
               quote_message_id: m.quote_message_id.as_deref(),
               representative_id: m.representative_id.as_deref(),
               status: m.status.code(),
               created_at: m.created_at }
    }
}

#[derive(Queryable, Debug)]
pub struct DistributeRow {
    pub message_id: String,
    pub client_id: String,
    pub user_id: String,
    pub shard_id: String,
    pub conversation_id: String,
    pub origin_message_id: String,
    pub quote_message_id: Option<String>,
    pub category: String,
    pub data: String,
    pub representative_id: Option<String>,
    pub level: i16,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

impl DistributeRow {
    pub fn into_domain(self) -> Result<DistributeRecord, PersistenceError> {
        Ok(DistributeRecord { tenant_id: self.client_id,
                              user_id: self.user_id,
                              shard_id: self.shard_id,
                              conversation_id: self.conversation_id,
                              origin_message_id: self.origin_message_id,
                              message_id: self.message_id,
                              quote_message_id: self.quote_message_id,
                              category: self.category,
                              data: self.data,
                              representative_id: self.representative_id,
                              level: PriorityTier::from_code(self.level)?,
                              status: DistributeStatus::from_code(self.status)?,
                              created_at: self.created_at })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = distribute_messages)]
pub struct NewDistributeRow {
    pub message_id: String,
    pub client_id: String,
    pub user_id: String,
    pub shard_id: String,
    pub conversation_id: String,
    pub origin_message_id: String,
    pub quote_message_id: Option<String>,
    pub category: String,
    pub data: String,
    pub representative_id: Option<String>,
    pub level: i16,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

impl From<&DistributeRecord> for NewDistributeRow {
    fn from(r: &DistributeRecord) -> Self {
        Self { message_id: r.message_id.clone(),
               client_id: r.tenant_id.clone(),
               user_id: r.user_id.clone(),
               shard_id: r.shard_id.clone(),
               conversation_id: r.conversation_id.clone(),
               origin_message_id: r.origin_message_id.clone(),
               quote_message_id: r.quote_message_id.clone(),
               category: r.category.clone(),
               data: r.data.clone(),
               representative_id: r.representative_id.clone(),
               level: r.level.code(),
               status: r.status.code(),
               created_at: r.created_at }
    }
}
