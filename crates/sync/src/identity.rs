use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use tether_remote::RemoteTree;

use crate::error::{NotSignedInSnafu, RemoteReadSnafu, RemoteWriteSnafu, SyncResult};
use crate::ids::AccountId;
use crate::paths;

/// Key of the boolean role marker under `accounts/{id}`. Written once at
/// signup, read once at login, never changed afterwards.
pub const ROLE_MARKER_KEY: &str = "isSupport";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Regular,
    Support,
}

impl Role {
    pub fn is_support(self) -> bool {
        matches!(self, Self::Support)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub role: Role,
}

impl Account {
    pub fn new(id: AccountId, role: Role) -> Self {
        Self { id, role }
    }
}

/// Seam to the external authentication provider.
pub trait IdentityProvider: Send + Sync {
    fn current_account_id(&self) -> Option<AccountId>;
}

/// Fixed identity used by tests and the QA runner.
pub struct StaticIdentity {
    account_id: Option<AccountId>,
}

impl StaticIdentity {
    pub fn signed_in(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
        }
    }

    pub fn signed_out() -> Self {
        Self { account_id: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_account_id(&self) -> Option<AccountId> {
        self.account_id.clone()
    }
}

/// Records the account's role marker at signup.
pub async fn record_role(tree: &dyn RemoteTree, account: &Account) -> SyncResult<()> {
    let path = paths::account_root(&account.id).child(ROLE_MARKER_KEY);
    tree.write(&path, Value::Bool(account.role.is_support()))
        .await
        .context(RemoteWriteSnafu {
            stage: "record-role",
        })
}

/// Resolves the caller to an [`Account`] at login by reading the role marker.
///
/// An absent or ill-typed marker resolves to `Regular`; support access is
/// never assumed.
pub async fn resolve_account(
    tree: &dyn RemoteTree,
    identity: &dyn IdentityProvider,
) -> SyncResult<Account> {
    let account_id = identity.current_account_id().context(NotSignedInSnafu {
        stage: "resolve-account",
    })?;

    let marker = tree
        .read(&paths::account_root(&account_id).child(ROLE_MARKER_KEY))
        .await
        .context(RemoteReadSnafu {
            stage: "resolve-account-role",
        })?;

    let role = if marker.as_bool().unwrap_or(false) {
        Role::Support
    } else {
        Role::Regular
    };
    Ok(Account::new(account_id, role))
}
