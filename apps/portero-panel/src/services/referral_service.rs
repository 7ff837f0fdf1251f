use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use portero_db::repositories::payment_repo::EarningWithNames;
use portero_db::repositories::user_repo::UserRepository;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::settings::MAX_AFFILIATE_LEVELS;

#[derive(Serialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub username: Option<String>,
    pub referral_count: i64,
}

#[derive(Serialize)]
pub struct LeaderboardDisplayEntry {
    pub rank: usize,
    pub username: String,
    pub referral_count: i64,
    pub medal: Option<String>,
}

/// One node of the downline tree, nested up to ten levels deep.
#[derive(Debug, Serialize)]
pub struct NetworkNode {
    pub id: i64,
    pub name: String,
    pub level: usize,
    pub join_date: DateTime<Utc>,
    pub children: Vec<NetworkNode>,
}

#[derive(Debug, Serialize)]
pub struct LevelEarnings {
    pub level: i32,
    pub amount: f64,
}

#[derive(Serialize)]
pub struct AffiliateStats {
    pub total_earnings: f64,
    pub earnings_by_level: Vec<LevelEarnings>,
    pub direct_referrals: i64,
    pub recent: Vec<EarningWithNames>,
}

#[derive(sqlx::FromRow)]
struct DownlineRow {
    id: i64,
    username: Option<String>,
    full_name: Option<String>,
    referred_by_id: Option<i64>,
    created_at: DateTime<Utc>,
}

pub struct ReferralService {
    pool: PgPool,
    users: UserRepository,
}

impl ReferralService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn generate_referral_code() -> String {
        Uuid::new_v4().to_string()[..8].to_string()
    }

    /// Top referrers by direct referral count, usernames masked for the
    /// public leaderboard.
    pub async fn get_leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardDisplayEntry>> {
        let rows: Vec<LeaderboardEntry> = sqlx::query_as(
            r#"
            SELECT u.username, COUNT(r.id) AS referral_count
            FROM users u
            JOIN users r ON u.id = r.referred_by_id
            GROUP BY u.id, u.username
            ORDER BY referral_count DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut display_rows = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            let rank = index + 1;
            let medal = match rank {
                1 => Some("🥇".to_string()),
                2 => Some("🥈".to_string()),
                3 => Some("🥉".to_string()),
                _ => None,
            };

            let safe_username = row.username.unwrap_or_else(|| "Anónimo".to_string());
            display_rows.push(LeaderboardDisplayEntry {
                rank,
                username: Self::mask_username(&safe_username),
                referral_count: row.referral_count,
                medal,
            });
        }

        Ok(display_rows)
    }

    /// Hierarchical downline of a user, level by level, down to the same
    /// 10-level ceiling the commission walk uses. One query per level rather
    /// than one per node.
    pub async fn network_tree(&self, user_id: i64) -> Result<Vec<NetworkNode>> {
        let mut children_of: HashMap<i64, Vec<DownlineRow>> = HashMap::new();
        let mut frontier = vec![user_id];

        for _ in 0..MAX_AFFILIATE_LEVELS {
            if frontier.is_empty() {
                break;
            }
            let rows: Vec<DownlineRow> = sqlx::query_as(
                "SELECT id, username, full_name, referred_by_id, created_at
                 FROM users WHERE referred_by_id = ANY($1)
                 ORDER BY created_at DESC",
            )
            .bind(&frontier)
            .fetch_all(&self.pool)
            .await?;

            frontier = rows.iter().map(|r| r.id).collect();
            for row in rows {
                if let Some(parent) = row.referred_by_id {
                    children_of.entry(parent).or_default().push(row);
                }
            }
        }

        Ok(Self::assemble(&mut children_of, user_id, 1))
    }

    fn assemble(
        children_of: &mut HashMap<i64, Vec<DownlineRow>>,
        parent: i64,
        level: usize,
    ) -> Vec<NetworkNode> {
        let Some(rows) = children_of.remove(&parent) else {
            return Vec::new();
        };
        rows.into_iter()
            .map(|row| NetworkNode {
                children: Self::assemble(children_of, row.id, level + 1),
                name: row
                    .full_name
                    .or(row.username)
                    .unwrap_or_else(|| "Usuario".to_string()),
                id: row.id,
                level,
                join_date: row.created_at,
            })
            .collect()
    }

    /// Dashboard KPIs: lifetime commissions, the per-level breakdown and the
    /// most recent entries of the earnings feed.
    pub async fn affiliate_stats(&self, user_id: i64) -> Result<AffiliateStats> {
        let total_earnings: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM affiliate_earnings WHERE affiliate_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let by_level: Vec<(i32, f64)> = sqlx::query_as(
            "SELECT level, SUM(amount) FROM affiliate_earnings
             WHERE affiliate_id = $1 GROUP BY level ORDER BY level",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let direct_referrals: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE referred_by_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let recent: Vec<EarningWithNames> = sqlx::query_as(
            r#"
            SELECT e.id,
                   COALESCE(a.username, a.full_name, 'Unknown') AS affiliate_name,
                   COALESCE(s.username, s.full_name, 'Usuario Eliminado') AS source_name,
                   e.level, e.amount, e.created_at
            FROM affiliate_earnings e
            LEFT JOIN users a ON e.affiliate_id = a.id
            LEFT JOIN payments p ON e.payment_id = p.id
            LEFT JOIN users s ON p.user_id = s.id
            WHERE e.affiliate_id = $1
            ORDER BY e.created_at DESC
            LIMIT 20
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(AffiliateStats {
            total_earnings,
            earnings_by_level: by_level
                .into_iter()
                .map(|(level, amount)| LevelEarnings { level, amount })
                .collect(),
            direct_referrals,
            recent,
        })
    }

    pub async fn update_referral_code(&self, user_id: i64, new_code: &str) -> Result<()> {
        self.users.update_referral_code(user_id, new_code).await
    }

    /// Re-parents a user under the owner of `referral_code`. Refuses anything
    /// that would close a loop: self-referral, or a referrer whose own
    /// ancestor chain already contains the user.
    pub async fn attach_referrer(&self, user_id: i64, referral_code: &str) -> Result<String> {
        let referrer = self
            .users
            .get_by_referral_code(referral_code)
            .await?
            .ok_or_else(|| anyhow!("Referral code not found"))?;

        if referrer.id == user_id {
            return Err(anyhow!("A user cannot refer themselves"));
        }

        let mut cursor = referrer.referred_by_id;
        let mut hops = 0;
        while let Some(ancestor_id) = cursor {
            if ancestor_id == user_id {
                return Err(anyhow!("Circular reference detected"));
            }
            hops += 1;
            if hops > MAX_AFFILIATE_LEVELS {
                break;
            }
            cursor = sqlx::query_scalar::<_, Option<i64>>(
                "SELECT referred_by_id FROM users WHERE id = $1",
            )
            .bind(ancestor_id)
            .fetch_optional(&self.pool)
            .await?
            .flatten();
        }

        sqlx::query("UPDATE users SET referred_by_id = $1 WHERE id = $2")
            .bind(referrer.id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        info!("User {} attached under referrer {}", user_id, referrer.id);
        Ok(referrer.display_name())
    }

    fn mask_username(username: &str) -> String {
        if username.chars().count() <= 3 {
            return "***".to_string();
        }
        let visible = if username.chars().count() > 6 { 3 } else { 1 };
        let prefix: String = username.chars().take(visible).collect();
        format!("{}***", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_usernames_are_fully_masked() {
        assert_eq!(ReferralService::mask_username("ana"), "***");
        assert_eq!(ReferralService::mask_username("pedro"), "p***");
        assert_eq!(ReferralService::mask_username("longusername"), "lon***");
    }

    #[test]
    fn generated_codes_are_eight_chars() {
        let code = ReferralService::generate_referral_code();
        assert_eq!(code.len(), 8);
        assert_ne!(code, ReferralService::generate_referral_code());
    }
}
