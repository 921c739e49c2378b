use std::path::Path;

use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::model::UserProfile;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("reading seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing seed file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("seeding user {id}: {source}")]
    User {
        id: ulid::Ulid,
        #[source]
        source: EngineError,
    },
}

/// Load a JSON array of user profiles into the directory. Existing users
/// with the same id are replaced. Returns how many profiles were applied.
pub async fn load_users(engine: &Engine, path: &Path) -> Result<usize, SeedError> {
    let text = tokio::fs::read_to_string(path).await?;
    let users: Vec<UserProfile> = serde_json::from_str(&text)?;
    let count = users.len();
    for user in users {
        let id = user.id;
        engine
            .upsert_user(user)
            .await
            .map_err(|source| SeedError::User { id, source })?;
    }
    info!(count, path = %path.display(), "seeded users");
    Ok(count)
}
