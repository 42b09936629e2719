use std::sync::Arc;

use crate::auth::{AuthService, CookieIssuer};

#[derive(Clone)]
pub struct AppState {
    auth: Arc<AuthService>,
    cookies: Arc<CookieIssuer>,
    trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        auth: Arc<AuthService>,
        cookies: Arc<CookieIssuer>,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            auth,
            cookies,
            trust_forwarded_for,
        }
    }

    pub fn auth(&self) -> Arc<AuthService> {
        Arc::clone(&self.auth)
    }

    pub fn cookies(&self) -> Arc<CookieIssuer> {
        Arc::clone(&self.cookies)
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}
