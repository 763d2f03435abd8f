//! Authorization policy shared by every handler that reads or mutates an
//! event or ticket.
//!
//! A decision depends only on the acting identity, its role and the
//! identities that hold the resource (owner, organizer).

use std::fmt;

use uuid::Uuid;

use crate::models::{Role, User};

/// The authenticated identity performing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateEvent,
    UpdateEvent,
    DeleteEvent,
    ViewTicket,
    VerifyTicket,
    TransferTicket,
    RefundTicket,
    DeleteTicket,
    ChangeRole,
}

impl Action {
    /// Transfers are an owner's decision; nobody else, admins included,
    /// can give a ticket away.
    fn admin_may_act(&self) -> bool {
        !matches!(self, Action::TransferTicket)
    }

    fn describe(&self) -> &'static str {
        match self {
            Action::CreateEvent => "create events",
            Action::UpdateEvent => "update this event",
            Action::DeleteEvent => "delete this event",
            Action::ViewTicket => "view this ticket",
            Action::VerifyTicket => "verify this ticket",
            Action::TransferTicket => "transfer this ticket",
            Action::RefundTicket => "refund this ticket",
            Action::DeleteTicket => "delete this ticket",
            Action::ChangeRole => "change user roles",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Not authorized to {action}")]
pub struct PolicyError {
    pub action: Action,
}

/// Permits the action if the actor is one of `holders` (the resource's
/// owner and/or organizer), or an admin where the action allows it.
pub fn authorize(actor: &Actor, holders: &[Uuid], action: Action) -> Result<(), PolicyError> {
    if holders.contains(&actor.id) || (action.admin_may_act() && actor.is_admin()) {
        return Ok(());
    }

    tracing::debug!(actor_id = %actor.id, role = ?actor.role, %action, "Authorization denied");

    Err(PolicyError { action })
}

/// Permits the action if the actor holds one of the given roles
pub fn require_role(actor: &Actor, allowed: &[Role], action: Action) -> Result<(), PolicyError> {
    if allowed.contains(&actor.role) {
        return Ok(());
    }

    tracing::debug!(actor_id = %actor.id, role = ?actor.role, %action, "Role check failed");

    Err(PolicyError { action })
}
