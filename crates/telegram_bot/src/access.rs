use teloxide::types::UserId;

/// Static allow-list of Telegram users, loaded once at startup.
#[derive(Clone, Debug)]
pub(crate) struct AccessGuard {
    allowed: Vec<UserId>,
}

impl AccessGuard {
    pub(crate) fn new(allowed: Vec<UserId>) -> Self {
        Self { allowed }
    }

    pub(crate) fn is_authorized(&self, user: UserId) -> bool {
        self.allowed.contains(&user)
    }
}
