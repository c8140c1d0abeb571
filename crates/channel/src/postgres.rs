//! PostgreSQL-backed broker.
//!
//! Each topic row in `channel_topics` doubles as the publish lock: a publisher
//! holds it `FOR UPDATE` while it assigns the partition and the next offset, so
//! offsets stay dense and become visible in order.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::message::select_partition;
use crate::{
    Broker, ChannelError, DEFAULT_PARTITIONS, DeliveryReceipt, Headers, Message,
    OutgoingMessage, RequiredAcks, Result,
};

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        ChannelError::Database(sqlx::Error::Decode(
            format!("{column} out of range: {value}").into(),
        ))
    })
}

fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        ChannelError::Database(sqlx::Error::Decode(
            format!("{column} out of range: {value}").into(),
        ))
    })
}

fn to_db_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Maps acknowledgement levels onto `synchronous_commit`.
fn synchronous_commit(acks: RequiredAcks) -> &'static str {
    match acks {
        RequiredAcks::None => "off",
        RequiredAcks::Leader => "local",
        RequiredAcks::All => "remote_apply",
    }
}

/// Broker storing topics as rows in `channel_messages`.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    default_partitions: u32,
}

impl PostgresBroker {
    pub fn new(pool: PgPool) -> Self {
        Self::with_default_partitions(pool, DEFAULT_PARTITIONS)
    }

    pub fn with_default_partitions(pool: PgPool, default_partitions: u32) -> Self {
        Self {
            pool,
            default_partitions: default_partitions.max(1),
        }
    }

    async fn ensure_topic(
        tx: &mut Transaction<'_, Postgres>,
        topic: &str,
        partitions: u32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO channel_topics (topic, partitions) VALUES ($1, $2) ON CONFLICT (topic) DO NOTHING",
        )
        .bind(topic)
        .bind(i32::try_from(partitions.max(1)).unwrap_or(i32::MAX))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    fn row_to_message(row: PgRow) -> Result<Message> {
        let headers: Json<Headers> = row.try_get("headers")?;
        Ok(Message {
            topic: row.try_get("topic")?,
            partition: to_u32(row.try_get("partition")?, "partition")?,
            offset: to_u64(row.try_get("offset")?, "offset")?,
            key: row.try_get("message_key")?,
            payload: row.try_get("payload")?,
            headers: headers.0,
            published_at: row.try_get("published_at")?,
        })
    }
}

#[async_trait]
impl Broker for PostgresBroker {
    async fn create_topic(&self, topic: &str, partitions: u32) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::ensure_topic(&mut tx, topic, partitions).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        Self::ensure_topic(&mut tx, topic, self.default_partitions).await?;
        let partitions: i32 =
            sqlx::query_scalar("SELECT partitions FROM channel_topics WHERE topic = $1")
                .bind(topic)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;
        to_u32(partitions, "partitions")
    }

    #[tracing::instrument(skip(self, message), fields(key = ?message.key))]
    async fn publish(
        &self,
        topic: &str,
        message: OutgoingMessage,
        acks: RequiredAcks,
    ) -> Result<DeliveryReceipt> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('synchronous_commit', $1, true)")
            .bind(synchronous_commit(acks))
            .execute(&mut *tx)
            .await?;

        Self::ensure_topic(&mut tx, topic, self.default_partitions).await?;

        let row = sqlx::query(
            "SELECT partitions, next_partition FROM channel_topics WHERE topic = $1 FOR UPDATE",
        )
        .bind(topic)
        .fetch_one(&mut *tx)
        .await?;
        let partitions = to_u32(row.try_get("partitions")?, "partitions")?;
        let cursor = to_u32(row.try_get("next_partition")?, "next_partition")?;

        let partition = select_partition(message.key.as_deref(), partitions, cursor);
        if message.key.is_none() {
            sqlx::query("UPDATE channel_topics SET next_partition = $2 WHERE topic = $1")
                .bind(topic)
                .bind(i32::try_from((cursor + 1) % partitions).unwrap_or(0))
                .execute(&mut *tx)
                .await?;
        }

        let offset: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX("offset") + 1, 0)
            FROM channel_messages
            WHERE topic = $1 AND partition = $2
            "#,
        )
        .bind(topic)
        .bind(partition as i32)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO channel_messages (topic, partition, "offset", message_key, payload, headers)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(topic)
        .bind(partition as i32)
        .bind(offset)
        .bind(&message.key)
        .bind(&message.payload)
        .bind(Json(&message.headers))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset: to_u64(offset, "offset")?,
        })
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<Message>> {
        let partitions = self.partitions(topic).await?;
        if partition >= partitions {
            return Err(ChannelError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT topic, partition, "offset", message_key, payload, headers, published_at
            FROM channel_messages
            WHERE topic = $1 AND partition = $2 AND "offset" >= $3
            ORDER BY "offset" ASC
            LIMIT $4
            "#,
        )
        .bind(topic)
        .bind(partition as i32)
        .bind(to_db_offset(offset))
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        let offset: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT next_offset FROM consumer_offsets
            WHERE group_id = $1 AND topic = $2 AND partition = $3
            "#,
        )
        .bind(group)
        .bind(topic)
        .bind(partition as i32)
        .fetch_optional(&self.pool)
        .await?;

        offset.map(|o| to_u64(o, "next_offset")).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (group_id, topic, partition, next_offset)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, topic, partition) DO UPDATE
            SET next_offset = GREATEST(consumer_offsets.next_offset, EXCLUDED.next_offset),
                committed_at = NOW()
            "#,
        )
        .bind(group)
        .bind(topic)
        .bind(partition as i32)
        .bind(to_db_offset(next_offset))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
