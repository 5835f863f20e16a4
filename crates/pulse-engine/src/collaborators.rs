//! External collaborators the orchestrator depends on.

use async_trait::async_trait;

use pulse_types::{
    Card, CardId, Notification, NotificationId, QueryConstraints, QueryResult, Result, User, UserId,
};

/// Executes a card's stored query.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run(&self, card: &Card, constraints: &QueryConstraints) -> Result<QueryResult>;
}

/// Read access to stored configuration, plus one-shot alert cleanup.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn notification(&self, id: NotificationId) -> Result<Option<Notification>>;

    async fn card(&self, id: CardId) -> Result<Option<Card>>;

    async fn user(&self, id: UserId) -> Result<Option<User>>;

    async fn delete_notification(&self, id: NotificationId) -> Result<()>;
}

#[async_trait]
pub trait CardPermissions: Send + Sync {
    /// Whether `user` may see the results of `card`.
    async fn can_view(&self, user: &User, card: &Card) -> Result<bool>;
}
