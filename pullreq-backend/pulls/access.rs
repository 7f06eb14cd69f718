use crate::store::repository::MetadataStore;
use crate::store::{Repository, User};

use super::error::PullError;

/// Site admins, owners, and write/admin collaborators can write.
pub async fn can_write(
    store: &dyn MetadataStore,
    user: &User,
    repo: &Repository,
) -> Result<bool, PullError> {
    if user.is_admin {
        return Ok(true);
    }
    let mode = store
        .access_mode(user.id, repo.id)
        .await
        .map_err(PullError::StoreFailure)?;
    Ok(mode.is_some_and(|m| m.can_write()))
}

/// Gate for everything that mutates: the principal must be able to write the head repository.
pub async fn ensure_can_write_head(
    store: &dyn MetadataStore,
    user: &User,
    head_repo: &Repository,
) -> Result<(), PullError> {
    if can_write(store, user, head_repo).await? {
        return Ok(());
    }
    tracing::info!(user = %user.name, head_repo_id = head_repo.id, "no write access to head repository");
    Err(PullError::Forbidden(format!(
        "{} cannot write to {}",
        user.name,
        head_repo.full_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulls::testing::world;

    #[tokio::test]
    async fn owner_collaborator_and_admin_can_write() {
        let w = world().await;
        assert!(can_write(&*w.store, &w.alice, &w.base).await.unwrap());
        assert!(can_write(&*w.store, &w.bob, &w.base).await.unwrap());
        assert!(can_write(&*w.store, &w.bob, &w.fork).await.unwrap());
        assert!(can_write(&*w.store, &w.root, &w.fork).await.unwrap());
    }

    #[tokio::test]
    async fn readers_and_strangers_cannot_write() {
        let w = world().await;
        assert!(!can_write(&*w.store, &w.dave, &w.base).await.unwrap());
        assert!(!can_write(&*w.store, &w.carol, &w.base).await.unwrap());
        assert!(!can_write(&*w.store, &w.alice, &w.fork).await.unwrap());

        let err = ensure_can_write_head(&*w.store, &w.carol, &w.fork)
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Forbidden(_)));
        assert_eq!(err.to_string(), "forbidden: carol cannot write to bob/widgets");
        assert!(
            ensure_can_write_head(&*w.store, &w.carol, &w.carol_fork)
                .await
                .is_ok()
        );
    }
}
