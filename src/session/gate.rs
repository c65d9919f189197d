use crate::db::{Role, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Auth,
    AwaitingApproval,
    Blocked,
    Chat,
    Settings,
    Admin,
}

impl Route {
    /// Routes that need a signed-in, active identity.
    pub fn is_protected(self) -> bool {
        matches!(self, Route::Chat | Route::Settings | Route::Admin)
    }
}

/// Where a session stands in `Anonymous -> Pending -> Active | Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Anonymous,
    Pending,
    Active,
    Blocked,
}

impl From<Status> for Access {
    fn from(status: Status) -> Self {
        match status {
            Status::Pending => Access::Pending,
            Status::Active => Access::Active,
            Status::Blocked => Access::Blocked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("redirect to {0:?}")]
pub struct Redirect(pub Route);

/// The route actually shown when `requested` is asked for.
pub fn resolve(access: Access, role: Role, requested: Route) -> Route {
    use Route::*;
    match access {
        Access::Anonymous => match requested {
            Landing | Auth => requested,
            _ => Auth,
        },
        Access::Pending => AwaitingApproval,
        Access::Blocked => Blocked,
        Access::Active => match requested {
            Landing | Auth | AwaitingApproval | Blocked => Chat,
            Admin if role != Role::Admin => Chat,
            _ => requested,
        },
    }
}
