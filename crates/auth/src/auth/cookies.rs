use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config::CookieConfig;

/// Builds and reads the two cookies of the login flow: the short-lived OAuth
/// state cookie and the long-lived session cookie.
#[derive(Debug, Clone)]
pub struct CookieIssuer {
    config: CookieConfig,
}

impl CookieIssuer {
    pub fn new(config: CookieConfig) -> Self {
        Self { config }
    }

    pub fn state_cookie(&self, state: String) -> Cookie<'static> {
        self.build(&self.config.state_cookie_name, state, self.config.state_timeout)
    }

    pub fn clear_state_cookie(&self) -> Cookie<'static> {
        self.removal(&self.config.state_cookie_name)
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        self.build(
            &self.config.session_cookie_name,
            token,
            self.config.session_max_age,
        )
    }

    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        self.removal(&self.config.session_cookie_name)
    }

    pub fn read_state(&self, jar: &CookieJar) -> Option<String> {
        read(jar, &self.config.state_cookie_name)
    }

    pub fn read_session(&self, jar: &CookieJar) -> Option<String> {
        read(jar, &self.config.session_cookie_name)
    }

    fn build(&self, name: &str, value: String, max_age: chrono::Duration) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_owned(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.secure)
            .max_age(time::Duration::seconds(max_age.num_seconds()));

        if let Some(domain) = &self.config.domain {
            builder = builder.domain(domain.clone());
        }

        builder.build()
    }

    fn removal(&self, name: &str) -> Cookie<'static> {
        let mut cookie = self.build(name, String::new(), chrono::Duration::zero());
        cookie.make_removal();
        cookie
    }
}

fn read(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty())
}
