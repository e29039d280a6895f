use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::LedgerError;

/// Gate in front of every payout mutation performed by an admin.
/// How roles are looked up is up to the implementor.
#[async_trait]
pub trait AdminAuthorizer: Send + Sync {
    async fn is_authorized_admin(&self, actor_id: &str) -> Result<bool, LedgerError>;
}

/// For deployments where authorization already happened upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAdmins;

#[async_trait]
impl AdminAuthorizer for AllowAllAdmins {
    async fn is_authorized_admin(&self, _actor_id: &str) -> Result<bool, LedgerError> {
        Ok(true)
    }
}

/// Fixed set of admin ids.
#[derive(Debug, Clone, Default)]
pub struct StaticAdmins {
    admins: HashSet<String>,
}

impl StaticAdmins {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AdminAuthorizer for StaticAdmins {
    async fn is_authorized_admin(&self, actor_id: &str) -> Result<bool, LedgerError> {
        Ok(self.admins.contains(actor_id))
    }
}

pub(crate) async fn require_admin(
    authorizer: &dyn AdminAuthorizer,
    actor_id: &str,
) -> Result<(), LedgerError> {
    if authorizer.is_authorized_admin(actor_id).await? {
        Ok(())
    } else {
        tracing::warn!(actor_id, "payout mutation refused: not an admin");
        Err(LedgerError::Unauthorized {
            actor: actor_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_admins() {
        let admins = StaticAdmins::new(["admin-1"]);
        assert!(require_admin(&admins, "admin-1").await.is_ok());
        assert!(matches!(
            require_admin(&admins, "store-7").await,
            Err(LedgerError::Unauthorized { actor }) if actor == "store-7"
        ));
        assert!(require_admin(&AllowAllAdmins, "anyone").await.is_ok());
    }
}
