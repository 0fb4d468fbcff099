use chrono::{Duration, Utc};
use tracing::{debug, info};

use colloquy_types::models::UserTier;

use crate::error::ChatError;
use crate::store::ChatStore;

/// Per-tier daily message allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlements {
    pub guest_max_messages_per_day: u64,
    pub regular_max_messages_per_day: u64,
}

impl Default for Entitlements {
    fn default() -> Self {
        Self {
            guest_max_messages_per_day: 20,
            regular_max_messages_per_day: 100,
        }
    }
}

impl Entitlements {
    pub fn max_messages_per_day(&self, tier: UserTier) -> u64 {
        match tier {
            UserTier::Guest => self.guest_max_messages_per_day,
            UserTier::Regular => self.regular_max_messages_per_day,
        }
    }

    /// Reject the turn if the user already sent their allowance in the last 24 hours.
    pub async fn check(&self, store: &dyn ChatStore, user_id: &str, tier: UserTier) -> Result<(), ChatError> {
        let max = self.max_messages_per_day(tier);
        let since = Utc::now() - Duration::hours(24);
        let count = store.count_user_messages(user_id, since).await?;
        debug!(user_id, ?tier, count, max, "quota checked");
        if count >= max {
            info!(user_id, ?tier, count, "daily message limit reached");
            return Err(ChatError::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use colloquy_db::Database;
    use colloquy_types::models::{Chat, Message, Part, Role, Visibility, generate_id};

    use super::*;
    use crate::store::SqliteStore;

    async fn store_with_user_messages(owner: &str, n: usize) -> SqliteStore {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        store
            .create_chat(&Chat {
                id: "c1".into(),
                user_id: owner.into(),
                title: "t".into(),
                visibility: Visibility::Private,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let batch: Vec<Message> = (0..n)
            .map(|i| Message {
                id: generate_id(),
                chat_id: "c1".into(),
                role: Role::User,
                parts: vec![Part::text(format!("m{i}"))],
                attachments: vec![],
                created_at: Utc::now(),
            })
            .collect();
        store.append_messages(&batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn allows_up_to_the_limit() {
        let limits = Entitlements {
            guest_max_messages_per_day: 3,
            regular_max_messages_per_day: 10,
        };
        let store = store_with_user_messages("u1", 2).await;
        assert!(limits.check(&store, "u1", UserTier::Guest).await.is_ok());

        let store = store_with_user_messages("u1", 3).await;
        let err = limits.check(&store, "u1", UserTier::Guest).await.unwrap_err();
        assert!(matches!(err, ChatError::RateLimited));
        assert!(limits.check(&store, "u1", UserTier::Regular).await.is_ok());
    }

    #[test]
    fn defaults_match_tiers() {
        let limits = Entitlements::default();
        assert_eq!(limits.max_messages_per_day(UserTier::Guest), 20);
        assert_eq!(limits.max_messages_per_day(UserTier::Regular), 100);
    }
}
