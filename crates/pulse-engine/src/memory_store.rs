//! In-memory store backed by a JSON fixture.
//!
//! A fixture bundles everything one send needs: users, cards, notifications,
//! view grants and the canned result each card's query returns. The same
//! [`MemoryStore`] serves as store, permission checker and query runner.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use pulse_types::{
    Card, CardId, Notification, NotificationId, PulseError, QueryConstraints, QueryResult, Result,
    User, UserId,
};

use crate::collaborators::{CardPermissions, NotificationStore, QueryRunner};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: UserId,
    pub card_id: CardId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CannedResult {
    pub card_id: CardId,
    pub result: QueryResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub users: Vec<User>,
    pub cards: Vec<Card>,
    pub notifications: Vec<Notification>,
    /// Users listed here may view every card.
    pub admins: Vec<UserId>,
    pub grants: Vec<Grant>,
    pub results: Vec<CannedResult>,
}

impl Fixture {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PulseError::Config(format!("reading fixture {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    cards: HashMap<CardId, Card>,
    notifications: HashMap<NotificationId, Notification>,
    admins: HashSet<UserId>,
    grants: HashSet<Grant>,
    results: HashMap<CardId, QueryResult>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let state = State {
            users: fixture.users.into_iter().map(|u| (u.id, u)).collect(),
            cards: fixture.cards.into_iter().map(|c| (c.id, c)).collect(),
            notifications: fixture
                .notifications
                .into_iter()
                .map(|n| (n.id, n))
                .collect(),
            admins: fixture.admins.into_iter().collect(),
            grants: fixture.grants.into_iter().collect(),
            results: fixture
                .results
                .into_iter()
                .map(|r| (r.card_id, r.result))
                .collect(),
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_card(&self, card: Card) {
        self.state.write().await.cards.insert(card.id, card);
    }

    pub async fn insert_notification(&self, notification: Notification) {
        self.state
            .write()
            .await
            .notifications
            .insert(notification.id, notification);
    }

    pub async fn grant(&self, user_id: UserId, card_id: CardId) {
        self.state
            .write()
            .await
            .grants
            .insert(Grant { user_id, card_id });
    }

    pub async fn set_result(&self, card_id: CardId, result: QueryResult) {
        self.state.write().await.results.insert(card_id, result);
    }

    /// All notifications, sorted by id.
    pub async fn notifications(&self) -> Vec<Notification> {
        let state = self.state.read().await;
        let mut all: Vec<Notification> = state.notifications.values().cloned().collect();
        all.sort_by_key(|n| n.id);
        all
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn notification(&self, id: NotificationId) -> Result<Option<Notification>> {
        Ok(self.state.read().await.notifications.get(&id).cloned())
    }

    async fn card(&self, id: CardId) -> Result<Option<Card>> {
        Ok(self.state.read().await.cards.get(&id).cloned())
    }

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn delete_notification(&self, id: NotificationId) -> Result<()> {
        self.state
            .write()
            .await
            .notifications
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PulseError::not_found("Notification", id))
    }
}

#[async_trait]
impl CardPermissions for MemoryStore {
    async fn can_view(&self, user: &User, card: &Card) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.admins.contains(&user.id)
            || state.grants.contains(&Grant {
                user_id: user.id,
                card_id: card.id,
            }))
    }
}

#[async_trait]
impl QueryRunner for MemoryStore {
    async fn run(&self, card: &Card, constraints: &QueryConstraints) -> Result<QueryResult> {
        let state = self.state.read().await;
        let mut result = state.results.get(&card.id).cloned().ok_or_else(|| PulseError::Query {
            card: card.id,
            message: "no result recorded for this card".into(),
        })?;
        result.truncate_rows(constraints.limit_for(card.display));
        Ok(result)
    }
}
