//! Role-derived capability checks.
//!
//! Every handler asks [`authorize`] before touching storage. Ownership checks
//! (`ModifyFeedback`) happen after the target has been loaded, so a missing
//! target is reported as not found rather than forbidden.

use crate::auth::{Actor, Identity};
use crate::models::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Any safe (GET) request.
    Read,
    /// Category, genre and title lifecycle.
    ManageCatalogue,
    /// The user administration endpoints.
    ManageUsers,
    /// Post a review or a comment.
    CreateFeedback,
    /// Edit or delete a review or comment written by `author`.
    ModifyFeedback { author: Id },
    /// `/users/me`.
    AccessOwnProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthenticated,
    Forbidden,
}

pub fn authorize(actor: &Actor, op: Operation) -> Result<(), Denial> {
    if op == Operation::Read {
        return Ok(());
    }
    let Some(who) = actor.identity() else {
        return Err(Denial::Unauthenticated);
    };
    if permits(who, op) {
        Ok(())
    } else {
        Err(Denial::Forbidden)
    }
}

fn permits(who: &Identity, op: Operation) -> bool {
    if who.is_admin() {
        return true;
    }
    match op {
        Operation::Read | Operation::CreateFeedback | Operation::AccessOwnProfile => true,
        Operation::ModifyFeedback { author } => who.is_moderator() || who.id == author,
        Operation::ManageCatalogue | Operation::ManageUsers => false,
    }
}

/// Convenience for handlers that need the identity after authorizing.
pub fn require<'a>(actor: &'a Actor, op: Operation) -> Result<&'a Identity, Denial> {
    authorize(actor, op)?;
    actor.identity().ok_or(Denial::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn member(id: Id, role: Role, is_superuser: bool) -> Actor {
        Actor::Member(Identity { id, username: format!("u{id}"), role, is_superuser })
    }

    #[test]
    fn anonymous_reads_only() {
        assert_eq!(authorize(&Actor::Anonymous, Operation::Read), Ok(()));
        for op in [
            Operation::ManageCatalogue,
            Operation::ManageUsers,
            Operation::CreateFeedback,
            Operation::ModifyFeedback { author: 1 },
            Operation::AccessOwnProfile,
        ] {
            assert_eq!(authorize(&Actor::Anonymous, op), Err(Denial::Unauthenticated), "{op:?}");
        }
    }

    #[test]
    fn user_owns_only_their_feedback() {
        let user = member(7, Role::User, false);
        assert_eq!(authorize(&user, Operation::CreateFeedback), Ok(()));
        assert_eq!(authorize(&user, Operation::AccessOwnProfile), Ok(()));
        assert_eq!(authorize(&user, Operation::ModifyFeedback { author: 7 }), Ok(()));
        assert_eq!(authorize(&user, Operation::ModifyFeedback { author: 8 }), Err(Denial::Forbidden));
        assert_eq!(authorize(&user, Operation::ManageCatalogue), Err(Denial::Forbidden));
        assert_eq!(authorize(&user, Operation::ManageUsers), Err(Denial::Forbidden));
    }

    #[test]
    fn moderator_edits_any_feedback_but_not_catalogue() {
        let moderator = member(2, Role::Moderator, false);
        assert_eq!(authorize(&moderator, Operation::ModifyFeedback { author: 99 }), Ok(()));
        assert_eq!(authorize(&moderator, Operation::ManageCatalogue), Err(Denial::Forbidden));
        assert_eq!(authorize(&moderator, Operation::ManageUsers), Err(Denial::Forbidden));
    }

    #[test]
    fn admin_role_and_superuser_flag_grant_everything() {
        for admin in [member(1, Role::Admin, false), member(1, Role::User, true)] {
            assert_eq!(authorize(&admin, Operation::ManageCatalogue), Ok(()));
            assert_eq!(authorize(&admin, Operation::ManageUsers), Ok(()));
            assert_eq!(authorize(&admin, Operation::ModifyFeedback { author: 42 }), Ok(()));
        }
    }

    #[test]
    fn require_returns_identity() {
        let user = member(3, Role::User, false);
        assert_eq!(require(&user, Operation::CreateFeedback).map(|i| i.id), Ok(3));
        assert_eq!(require(&Actor::Anonymous, Operation::Read).err(), Some(Denial::Unauthenticated));
    }
}
