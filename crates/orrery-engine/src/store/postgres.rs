use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use orrery_core::{
    Channel, ChannelId, ChannelKind, MemberId, MemberNickname, PermissionSet, PermissionsNode,
    Planet, PlanetId, PlanetMember, PlanetRole, RoleId, RoleMembership, RoleName, TargetType,
    UserId,
};
use orrery_protocol::RelayedMessage;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::OnceCell;

use super::{MessageSink, PermissionStore, StoreError};

const SCHEMA_INIT_LOCK_ID: i64 = 0x4f52_5245_5259;
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed store. Schema creation is idempotent and serialized
/// across processes with an advisory lock.
pub struct PgStore {
    pool: PgPool,
    init: OnceCell<()>,
}

impl PgStore {
    /// Builds a lazy pool; no connection is made until first use.
    ///
    /// # Errors
    /// Returns an error when the database URL cannot be parsed.
    pub fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)
            .map_err(|e| anyhow!("postgres pool init failed: {e}"))?;
        Ok(Self {
            pool,
            init: OnceCell::new(),
        })
    }

    async fn ready(&self) -> Result<&PgPool, StoreError> {
        self.init
            .get_or_try_init(|| async {
                let mut tx = self.pool.begin().await.map_err(db_err)?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_INIT_LOCK_ID)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;

                sqlx::query("CREATE SEQUENCE IF NOT EXISTS orrery_row_ids START 1000")
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS planets (
                        id BIGINT PRIMARY KEY,
                        owner_user_id BIGINT NOT NULL,
                        default_role_id BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS channels (
                        id BIGINT PRIMARY KEY,
                        planet_id BIGINT NOT NULL REFERENCES planets(id) ON DELETE CASCADE,
                        kind SMALLINT NOT NULL,
                        parent_id BIGINT NULL,
                        inherits_perms BOOLEAN NOT NULL DEFAULT FALSE
                    )",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_channels_planet ON channels(planet_id)",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS planet_members (
                        id BIGINT PRIMARY KEY,
                        user_id BIGINT NOT NULL,
                        planet_id BIGINT NOT NULL REFERENCES planets(id) ON DELETE CASCADE,
                        nickname TEXT NOT NULL,
                        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                        rf0 BIGINT NOT NULL DEFAULT 0,
                        rf1 BIGINT NOT NULL DEFAULT 0,
                        rf2 BIGINT NOT NULL DEFAULT 0,
                        rf3 BIGINT NOT NULL DEFAULT 0
                    )",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_planet_members_user_planet
                        ON planet_members(user_id, planet_id)",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS planet_roles (
                        id BIGINT PRIMARY KEY,
                        planet_id BIGINT NOT NULL REFERENCES planets(id) ON DELETE CASCADE,
                        name TEXT NOT NULL,
                        position BIGINT NOT NULL,
                        flag_index SMALLINT NOT NULL,
                        is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                        is_default BOOLEAN NOT NULL DEFAULT FALSE,
                        chat_perms BIGINT NOT NULL DEFAULT 0,
                        category_perms BIGINT NOT NULL DEFAULT 0,
                        voice_perms BIGINT NOT NULL DEFAULT 0,
                        planet_perms BIGINT NOT NULL DEFAULT 0
                    )",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_planet_roles_flag
                        ON planet_roles(planet_id, flag_index)",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_planet_roles_position
                        ON planet_roles(planet_id, position)",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS permission_nodes (
                        role_id BIGINT NOT NULL REFERENCES planet_roles(id) ON DELETE CASCADE,
                        target_id BIGINT NOT NULL,
                        target_type SMALLINT NOT NULL,
                        code BIGINT NOT NULL DEFAULT 0,
                        mask BIGINT NOT NULL DEFAULT 0,
                        PRIMARY KEY (role_id, target_id, target_type)
                    )",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_permission_nodes_target
                        ON permission_nodes(target_id, target_type)",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS messages (
                        id BIGINT PRIMARY KEY,
                        planet_id BIGINT NOT NULL,
                        channel_id BIGINT NOT NULL,
                        author_member_id BIGINT NOT NULL,
                        content TEXT NOT NULL,
                        channel_index BIGINT NOT NULL,
                        sent_at_unix BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_channel_index
                        ON messages(channel_id, channel_index)",
                )
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                tx.commit().await.map_err(db_err)?;
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(&self.pool)
    }
}

fn db_err(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(database_error) = &error {
        if database_error.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Conflict(database_error.to_string());
        }
    }
    StoreError::Unavailable(error.to_string())
}

fn mask_to_db(value: u64) -> i64 {
    i64::from_ne_bytes(value.to_ne_bytes())
}

fn mask_from_db(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes())
}

fn position_to_db(value: u32) -> i64 {
    i64::from(value)
}

fn position_from_db(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Conflict(format!("bad role position {value}")))
}

fn flag_to_db(value: u8) -> i16 {
    i16::from(value)
}

fn flag_from_db(value: i16) -> Result<u8, StoreError> {
    u8::try_from(value).map_err(|_| StoreError::Conflict(format!("bad role flag index {value}")))
}

const fn kind_to_db(kind: ChannelKind) -> i16 {
    match kind {
        ChannelKind::Chat => 0,
        ChannelKind::Category => 1,
        ChannelKind::Voice => 2,
    }
}

fn kind_from_db(value: i16) -> Result<ChannelKind, StoreError> {
    match value {
        0 => Ok(ChannelKind::Chat),
        1 => Ok(ChannelKind::Category),
        2 => Ok(ChannelKind::Voice),
        other => Err(StoreError::Conflict(format!("bad channel kind {other}"))),
    }
}

const fn target_type_to_db(target_type: TargetType) -> i16 {
    match target_type {
        TargetType::ChatChannel => 0,
        TargetType::Category => 1,
        TargetType::VoiceChannel => 2,
        TargetType::Planet => 3,
    }
}

fn target_type_from_db(value: i16) -> Result<TargetType, StoreError> {
    match value {
        0 => Ok(TargetType::ChatChannel),
        1 => Ok(TargetType::Category),
        2 => Ok(TargetType::VoiceChannel),
        3 => Ok(TargetType::Planet),
        other => Err(StoreError::Conflict(format!("bad target type {other}"))),
    }
}

fn planet_from_row(row: &sqlx::postgres::PgRow) -> Result<Planet, StoreError> {
    Ok(Planet {
        id: PlanetId(row.try_get("id").map_err(db_err)?),
        owner_user_id: UserId(row.try_get("owner_user_id").map_err(db_err)?),
        default_role_id: RoleId(row.try_get("default_role_id").map_err(db_err)?),
    })
}

fn channel_from_row(row: &sqlx::postgres::PgRow) -> Result<Channel, StoreError> {
    Ok(Channel {
        id: ChannelId(row.try_get("id").map_err(db_err)?),
        planet_id: PlanetId(row.try_get("planet_id").map_err(db_err)?),
        kind: kind_from_db(row.try_get("kind").map_err(db_err)?)?,
        parent_id: row
            .try_get::<Option<i64>, _>("parent_id")
            .map_err(db_err)?
            .map(ChannelId),
        inherits_perms: row.try_get("inherits_perms").map_err(db_err)?,
    })
}

fn member_from_row(row: &sqlx::postgres::PgRow) -> Result<PlanetMember, StoreError> {
    let nickname: String = row.try_get("nickname").map_err(db_err)?;
    Ok(PlanetMember {
        id: MemberId(row.try_get("id").map_err(db_err)?),
        user_id: UserId(row.try_get("user_id").map_err(db_err)?),
        planet_id: PlanetId(row.try_get("planet_id").map_err(db_err)?),
        nickname: MemberNickname::try_from(nickname)
            .map_err(|_| StoreError::Conflict(String::from("bad nickname row")))?,
        is_deleted: row.try_get("is_deleted").map_err(db_err)?,
        membership: RoleMembership::from_words(
            mask_from_db(row.try_get("rf0").map_err(db_err)?),
            mask_from_db(row.try_get("rf1").map_err(db_err)?),
            mask_from_db(row.try_get("rf2").map_err(db_err)?),
            mask_from_db(row.try_get("rf3").map_err(db_err)?),
        ),
    })
}

fn role_from_row(row: &sqlx::postgres::PgRow) -> Result<PlanetRole, StoreError> {
    let name: String = row.try_get("name").map_err(db_err)?;
    Ok(PlanetRole {
        id: RoleId(row.try_get("id").map_err(db_err)?),
        planet_id: PlanetId(row.try_get("planet_id").map_err(db_err)?),
        name: RoleName::try_from(name)
            .map_err(|_| StoreError::Conflict(String::from("bad role name row")))?,
        position: position_from_db(row.try_get("position").map_err(db_err)?)?,
        flag_index: flag_from_db(row.try_get("flag_index").map_err(db_err)?)?,
        is_admin: row.try_get("is_admin").map_err(db_err)?,
        is_default: row.try_get("is_default").map_err(db_err)?,
        chat_perms: PermissionSet::from_bits(mask_from_db(
            row.try_get("chat_perms").map_err(db_err)?,
        )),
        category_perms: PermissionSet::from_bits(mask_from_db(
            row.try_get("category_perms").map_err(db_err)?,
        )),
        voice_perms: PermissionSet::from_bits(mask_from_db(
            row.try_get("voice_perms").map_err(db_err)?,
        )),
        planet_perms: PermissionSet::from_bits(mask_from_db(
            row.try_get("planet_perms").map_err(db_err)?,
        )),
    })
}

fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<PermissionsNode, StoreError> {
    Ok(PermissionsNode {
        role_id: RoleId(row.try_get("role_id").map_err(db_err)?),
        target_id: ChannelId(row.try_get("target_id").map_err(db_err)?),
        target_type: target_type_from_db(row.try_get("target_type").map_err(db_err)?)?,
        code: mask_from_db(row.try_get("code").map_err(db_err)?),
        mask: mask_from_db(row.try_get("mask").map_err(db_err)?),
    })
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn allocate_id(&self) -> Result<i64, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query("SELECT nextval('orrery_row_ids') AS id")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;
        row.try_get("id").map_err(db_err)
    }

    async fn planet(&self, id: PlanetId) -> Result<Option<Planet>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query("SELECT id, owner_user_id, default_role_id FROM planets WHERE id = $1")
            .bind(id.0)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(planet_from_row).transpose()
    }

    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query(
            "SELECT id, planet_id, kind, parent_id, inherits_perms FROM channels WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn member(&self, id: MemberId) -> Result<Option<PlanetMember>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query(
            "SELECT id, user_id, planet_id, nickname, is_deleted, rf0, rf1, rf2, rf3
             FROM planet_members WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn live_member_by_user(
        &self,
        user_id: UserId,
        planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query(
            "SELECT id, user_id, planet_id, nickname, is_deleted, rf0, rf1, rf2, rf3
             FROM planet_members
             WHERE user_id = $1 AND planet_id = $2 AND is_deleted = FALSE",
        )
        .bind(user_id.0)
        .bind(planet_id.0)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn member_by_user_any(
        &self,
        user_id: UserId,
        planet_id: PlanetId,
    ) -> Result<Option<PlanetMember>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query(
            "SELECT id, user_id, planet_id, nickname, is_deleted, rf0, rf1, rf2, rf3
             FROM planet_members
             WHERE user_id = $1 AND planet_id = $2",
        )
        .bind(user_id.0)
        .bind(planet_id.0)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn role(&self, id: RoleId) -> Result<Option<PlanetRole>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query(
            "SELECT id, planet_id, name, position, flag_index, is_admin, is_default,
                    chat_perms, category_perms, voice_perms, planet_perms
             FROM planet_roles WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn planet_roles(&self, planet_id: PlanetId) -> Result<Vec<PlanetRole>, StoreError> {
        let pool = self.ready().await?;
        let rows = sqlx::query(
            "SELECT id, planet_id, name, position, flag_index, is_admin, is_default,
                    chat_perms, category_perms, voice_perms, planet_perms
             FROM planet_roles WHERE planet_id = $1
             ORDER BY position",
        )
        .bind(planet_id.0)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn nodes_for_target(
        &self,
        role_ids: &[RoleId],
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<HashMap<RoleId, PermissionsNode>, StoreError> {
        if role_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let pool = self.ready().await?;
        let ids: Vec<i64> = role_ids.iter().map(|role_id| role_id.0).collect();
        let rows = sqlx::query(
            "SELECT role_id, target_id, target_type, code, mask
             FROM permission_nodes
             WHERE role_id = ANY($1) AND target_id = $2 AND target_type = $3",
        )
        .bind(&ids)
        .bind(target_id.0)
        .bind(target_type_to_db(target_type))
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

        let mut nodes = HashMap::with_capacity(rows.len());
        for row in &rows {
            let node = node_from_row(row)?;
            nodes.insert(node.role_id, node);
        }
        Ok(nodes)
    }

    async fn node(
        &self,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<Option<PermissionsNode>, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query(
            "SELECT role_id, target_id, target_type, code, mask
             FROM permission_nodes
             WHERE role_id = $1 AND target_id = $2 AND target_type = $3",
        )
        .bind(role_id.0)
        .bind(target_id.0)
        .bind(target_type_to_db(target_type))
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn insert_member(&self, member: &PlanetMember) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        sqlx::query(
            "INSERT INTO planet_members
                 (id, user_id, planet_id, nickname, is_deleted, rf0, rf1, rf2, rf3)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(member.id.0)
        .bind(member.user_id.0)
        .bind(member.planet_id.0)
        .bind(member.nickname.as_str())
        .bind(member.is_deleted)
        .bind(mask_to_db(member.membership.rf0))
        .bind(mask_to_db(member.membership.rf1))
        .bind(mask_to_db(member.membership.rf2))
        .bind(mask_to_db(member.membership.rf3))
        .execute(pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_member(&self, member: &PlanetMember) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        let result = sqlx::query(
            "UPDATE planet_members
             SET nickname = $2, is_deleted = $3, rf0 = $4, rf1 = $5, rf2 = $6, rf3 = $7
             WHERE id = $1",
        )
        .bind(member.id.0)
        .bind(member.nickname.as_str())
        .bind(member.is_deleted)
        .bind(mask_to_db(member.membership.rf0))
        .bind(mask_to_db(member.membership.rf1))
        .bind(mask_to_db(member.membership.rf2))
        .bind(mask_to_db(member.membership.rf3))
        .execute(pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("member {} missing", member.id)));
        }
        Ok(())
    }

    async fn insert_role(&self, role: &PlanetRole) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        sqlx::query(
            "INSERT INTO planet_roles
                 (id, planet_id, name, position, flag_index, is_admin, is_default,
                  chat_perms, category_perms, voice_perms, planet_perms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(role.id.0)
        .bind(role.planet_id.0)
        .bind(role.name.as_str())
        .bind(position_to_db(role.position))
        .bind(flag_to_db(role.flag_index))
        .bind(role.is_admin)
        .bind(role.is_default)
        .bind(mask_to_db(role.chat_perms.bits()))
        .bind(mask_to_db(role.category_perms.bits()))
        .bind(mask_to_db(role.voice_perms.bits()))
        .bind(mask_to_db(role.planet_perms.bits()))
        .execute(pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_role(&self, role: &PlanetRole) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        let result = sqlx::query(
            "UPDATE planet_roles
             SET name = $2, position = $3, is_admin = $4,
                 chat_perms = $5, category_perms = $6, voice_perms = $7, planet_perms = $8
             WHERE id = $1",
        )
        .bind(role.id.0)
        .bind(role.name.as_str())
        .bind(position_to_db(role.position))
        .bind(role.is_admin)
        .bind(mask_to_db(role.chat_perms.bits()))
        .bind(mask_to_db(role.category_perms.bits()))
        .bind(mask_to_db(role.voice_perms.bits()))
        .bind(mask_to_db(role.planet_perms.bits()))
        .execute(pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("role {} missing", role.id)));
        }
        Ok(())
    }

    async fn update_role_positions(
        &self,
        planet_id: PlanetId,
        positions: &[(RoleId, u32)],
    ) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        let mut tx = pool.begin().await.map_err(db_err)?;
        for (role_id, position) in positions {
            sqlx::query(
                "UPDATE planet_roles SET position = $3 WHERE id = $1 AND planet_id = $2",
            )
            .bind(role_id.0)
            .bind(planet_id.0)
            .bind(position_to_db(*position))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        sqlx::query("DELETE FROM planet_roles WHERE id = $1")
            .bind(id.0)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn clear_role_flag(
        &self,
        planet_id: PlanetId,
        flag_index: u8,
    ) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        let word_column = match flag_index >> 6 {
            0 => "rf0",
            1 => "rf1",
            2 => "rf2",
            _ => "rf3",
        };
        let clear_mask = mask_to_db(!(1_u64 << (flag_index & 63)));
        let sql = format!(
            "UPDATE planet_members SET {word_column} = {word_column} & $2 WHERE planet_id = $1"
        );
        sqlx::query(&sql)
            .bind(planet_id.0)
            .bind(clear_mask)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_node(&self, node: &PermissionsNode) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        sqlx::query(
            "INSERT INTO permission_nodes (role_id, target_id, target_type, code, mask)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (role_id, target_id, target_type)
             DO UPDATE SET code = EXCLUDED.code, mask = EXCLUDED.mask",
        )
        .bind(node.role_id.0)
        .bind(node.target_id.0)
        .bind(target_type_to_db(node.target_type))
        .bind(mask_to_db(node.code))
        .bind(mask_to_db(node.mask))
        .execute(pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_node(
        &self,
        role_id: RoleId,
        target_id: ChannelId,
        target_type: TargetType,
    ) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        sqlx::query(
            "DELETE FROM permission_nodes
             WHERE role_id = $1 AND target_id = $2 AND target_type = $3",
        )
        .bind(role_id.0)
        .bind(target_id.0)
        .bind(target_type_to_db(target_type))
        .execute(pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_nodes_for_role(&self, role_id: RoleId) -> Result<(), StoreError> {
        let pool = self.ready().await?;
        sqlx::query("DELETE FROM permission_nodes WHERE role_id = $1")
            .bind(role_id.0)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for PgStore {
    async fn message_count(&self, channel_id: ChannelId) -> Result<u64, StoreError> {
        let pool = self.ready().await?;
        let row = sqlx::query("SELECT COUNT(*) AS total FROM messages WHERE channel_id = $1")
            .bind(channel_id.0)
            .fetch_one(pool)
            .await
            .map_err(db_err)?;
        let total: i64 = row.try_get("total").map_err(db_err)?;
        u64::try_from(total).map_err(|_| StoreError::Conflict(format!("bad message count {total}")))
    }

    async fn persist_batch(&self, batch: &[RelayedMessage]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let pool = self.ready().await?;
        let mut tx = pool.begin().await.map_err(db_err)?;
        for message in batch {
            sqlx::query(
                "INSERT INTO messages
                     (id, planet_id, channel_id, author_member_id, content,
                      channel_index, sent_at_unix)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(message.id.0)
            .bind(message.planet_id.0)
            .bind(message.channel_id.0)
            .bind(message.author_member_id.0)
            .bind(message.content.as_str())
            .bind(
                i64::try_from(message.channel_index).map_err(|_| {
                    StoreError::Conflict(format!("bad channel index {}", message.channel_index))
                })?,
            )
            .bind(message.sent_at_unix)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
