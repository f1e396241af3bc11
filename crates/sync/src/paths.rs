use tether_remote::TreePath;

use crate::identity::{Account, Role};
use crate::ids::{AccountId, MessageId, TicketId};

pub const ACCOUNTS: &str = "accounts";
pub const TICKETS: &str = "tickets";
pub const MESSAGES: &str = "messages";

pub fn accounts_root() -> TreePath {
    TreePath::root().child(ACCOUNTS)
}

pub fn account_root(account_id: &AccountId) -> TreePath {
    accounts_root().child(account_id.as_str())
}

pub fn account_tickets(account_id: &AccountId) -> TreePath {
    account_root(account_id).child(TICKETS)
}

pub fn ticket_path(account_id: &AccountId, ticket_id: TicketId) -> TreePath {
    account_tickets(account_id).child(ticket_id.to_string())
}

pub fn ticket_messages(account_id: &AccountId, ticket_id: TicketId) -> TreePath {
    ticket_path(account_id, ticket_id).child(MESSAGES)
}

pub fn message_path(account_id: &AccountId, ticket_id: TicketId, message_id: MessageId) -> TreePath {
    ticket_messages(account_id, ticket_id).child(message_id.to_string())
}

/// The one role-conditional path-resolution strategy.
///
/// A regular account addresses its own subtree directly; support has no
/// subtree of its own and must observe the whole accounts collection, with
/// the decode routine doing the narrowing. Each operation selects its scope
/// once and never branches on role elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    Own(AccountId),
    AllAccounts,
}

impl SyncScope {
    pub fn for_account(account: &Account) -> Self {
        match account.role {
            Role::Regular => Self::Own(account.id.clone()),
            Role::Support => Self::AllAccounts,
        }
    }

    /// Subtree read/observed for ticket lists.
    pub fn ticket_base(&self) -> TreePath {
        match self {
            Self::Own(account_id) => account_tickets(account_id),
            Self::AllAccounts => accounts_root(),
        }
    }

    /// Subtree read/observed for one ticket's conversation.
    pub fn message_base(&self, ticket_id: TicketId) -> TreePath {
        match self {
            Self::Own(account_id) => ticket_messages(account_id, ticket_id),
            Self::AllAccounts => accounts_root(),
        }
    }

    pub fn is_full_scan(&self) -> bool {
        matches!(self, Self::AllAccounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Account, Role};

    #[test]
    fn regular_scope_addresses_its_own_subtree() {
        let account = Account::new(AccountId::from("u1"), Role::Regular);
        let scope = SyncScope::for_account(&account);
        let ticket_id = TicketId::new_v7();

        assert_eq!(scope.ticket_base().to_string(), "accounts/u1/tickets");
        assert_eq!(
            scope.message_base(ticket_id).to_string(),
            format!("accounts/u1/tickets/{ticket_id}/messages")
        );
    }

    #[test]
    fn support_scope_scans_the_accounts_root() {
        let account = Account::new(AccountId::from("s1"), Role::Support);
        let scope = SyncScope::for_account(&account);

        assert!(scope.is_full_scan());
        assert_eq!(scope.ticket_base().to_string(), "accounts");
        assert_eq!(scope.message_base(TicketId::new_v7()).to_string(), "accounts");
    }
}
