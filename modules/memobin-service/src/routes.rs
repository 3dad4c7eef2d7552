//! Axum route handlers for the memobin pages.

use crate::config::Config;
use crate::db::memos::LATEST_LIMIT;
use crate::db::{Db, DbError};
use crate::decoder::RawForm;
use crate::errors::{AppError, ServerFault};
use crate::forms::{
    FormDecoders, LoginForm, MemoCreateForm, SignupForm, MSG_DUPLICATE_EMAIL,
    MSG_INVALID_CREDENTIALS,
};
use crate::session::{Session, SessionStore, AUTH_USER_KEY, FLASH_KEY};
use crate::templates::TemplateSet;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use memobin_types::ServiceStatus;
use std::sync::Arc;
use std::time::Instant;

/// Hidden form field carrying the session's CSRF token.
pub const CSRF_FIELD: &str = "csrf_token";

pub struct AppState {
    pub config: Config,
    pub db: Arc<Db>,
    pub templates: TemplateSet,
    pub sessions: Arc<dyn SessionStore>,
    pub forms: FormDecoders,
    pub start_time: Instant,
}

/// Parse a POST body and check its CSRF token before any field is decoded.
fn parse_form(session: &Session, body: &[u8]) -> Result<RawForm, AppError> {
    let raw = RawForm::parse(body)?;
    if !session.verify_csrf(raw.first(CSRF_FIELD))? {
        log::warn!("Rejected form post with a missing or mismatched CSRF token");
        return Err(AppError::InvalidCsrfToken);
    }
    Ok(raw)
}

/// Password hashing and verification run on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::server(ServerFault::Blocking(e)))
}

// GET /
pub async fn home(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    let memos = state.db.latest_memos(LATEST_LIMIT)?;
    let mut data = state.new_template_data(&session)?;
    data.memos = memos;
    state.render(StatusCode::OK, "home", &data)
}

// GET /memo/view/{id}
pub async fn memo_view(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = id
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(AppError::NotFound)?;
    let memo = state.db.get_memo(id)?;
    let mut data = state.new_template_data(&session)?;
    data.memo = Some(memo);
    state.render(StatusCode::OK, "view", &data)
}

// GET /memo/create
pub async fn memo_create(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    let data = state
        .new_template_data(&session)?
        .with_form(&MemoCreateForm::default());
    state.render(StatusCode::OK, "create", &data)
}

// POST /memo/create
pub async fn memo_create_post(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    body: Bytes,
) -> Result<Response, AppError> {
    let raw = parse_form(&session, &body)?;
    let mut form = state.forms.memo_create(&raw)?;
    form.validate();
    if !form.validation.valid() {
        let data = state.new_template_data(&session)?.with_form(&form);
        return state.render(StatusCode::UNPROCESSABLE_ENTITY, "create", &data);
    }

    let id = state.db.insert_memo(&form.title, &form.content, form.expires)?;
    log::info!("Created memo {} expiring in {} days", id, form.expires);
    session.put(FLASH_KEY, "Memo successfully created!")?;
    Ok(Redirect::to(&format!("/memo/view/{}", id)).into_response())
}

// GET /user/signup
pub async fn user_signup(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    let data = state
        .new_template_data(&session)?
        .with_form(&SignupForm::default());
    state.render(StatusCode::OK, "signup", &data)
}

// POST /user/signup
pub async fn user_signup_post(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    body: Bytes,
) -> Result<Response, AppError> {
    let raw = parse_form(&session, &body)?;
    let mut form = state.forms.signup(&raw)?;
    form.validate();
    if form.validation.valid() {
        let db = state.db.clone();
        let (name, email, password) = (
            form.name.clone(),
            form.email.clone(),
            form.password.clone(),
        );
        match blocking(move || db.insert_user(&name, &email, &password)).await? {
            Ok(()) => {
                session.put(FLASH_KEY, "Your signup was successful. Please log in.")?;
                return Ok(Redirect::to("/user/login").into_response());
            }
            Err(DbError::DuplicateEmail) => {
                form.validation.add_field_error("email", MSG_DUPLICATE_EMAIL);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let data = state.new_template_data(&session)?.with_form(&form);
    state.render(StatusCode::UNPROCESSABLE_ENTITY, "signup", &data)
}

// GET /user/login
pub async fn user_login(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    let data = state
        .new_template_data(&session)?
        .with_form(&LoginForm::default());
    state.render(StatusCode::OK, "login", &data)
}

// POST /user/login
pub async fn user_login_post(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    body: Bytes,
) -> Result<Response, AppError> {
    let raw = parse_form(&session, &body)?;
    let mut form = state.forms.login(&raw)?;
    form.validate();
    if form.validation.valid() {
        let db = state.db.clone();
        let (email, password) = (form.email.clone(), form.password.clone());
        match blocking(move || db.authenticate_user(&email, &password)).await? {
            Ok(id) => {
                session.renew_token()?;
                session.put(AUTH_USER_KEY, id)?;
                log::info!("User {} logged in", id);
                return Ok(Redirect::to("/memo/create").into_response());
            }
            Err(DbError::InvalidCredentials) => {
                form.validation.add_non_field_error(MSG_INVALID_CREDENTIALS);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let data = state.new_template_data(&session)?.with_form(&form);
    state.render(StatusCode::UNPROCESSABLE_ENTITY, "login", &data)
}

// POST /user/logout
pub async fn user_logout_post(
    Extension(session): Extension<Session>,
    body: Bytes,
) -> Result<Response, AppError> {
    parse_form(&session, &body)?;
    session.renew_token()?;
    session.remove(AUTH_USER_KEY)?;
    session.put(FLASH_KEY, "You've been logged out successfully!")?;
    Ok(Redirect::to("/").into_response())
}

// GET /status
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServiceStatus>, AppError> {
    Ok(Json(ServiceStatus {
        running: true,
        uptime_secs: state.start_time.elapsed().as_secs(),
        live_memos: state.db.count_live_memos()?,
        registered_users: state.db.count_users()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use chrono::Duration;
    use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
    use reqwest::StatusCode;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    fn ui_dir(sub: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("ui").join(sub)
    }

    async fn spawn_with(
        templates: TemplateSet,
        debug: bool,
        hash_iterations: u32,
    ) -> (String, Arc<AppState>) {
        let config = Config {
            debug,
            static_dir: ui_dir("static"),
            template_dir: ui_dir("html"),
            ..Default::default()
        };
        let db = Arc::new(
            Db::open(":memory:")
                .unwrap()
                .with_hash_iterations(hash_iterations),
        );
        let sessions: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::new(Duration::hours(12)));
        let state = Arc::new(AppState {
            config,
            db,
            templates,
            sessions,
            forms: FormDecoders::new().unwrap(),
            start_time: Instant::now(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::app(state.clone());
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (format!("http://{}", addr), state)
    }

    async fn spawn() -> (String, Arc<AppState>) {
        let templates = TemplateSet::load(&ui_dir("html")).unwrap();
        spawn_with(templates, false, 1_000).await
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// `session=<token>` from the response, if a cookie was set.
    fn session_cookie(resp: &reqwest::Response) -> Option<String> {
        resp.headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("session="))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    /// Value of the first hidden `csrf_token` input in a page.
    fn scrape_csrf(body: &str) -> Option<String> {
        let marker = r#"name="csrf_token" value=""#;
        let start = body.find(marker)? + marker.len();
        let len = body[start..].find('"')?;
        Some(body[start..start + len].to_string())
    }

    async fn get(base: &str, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut req = client().get(format!("{}{}", base, path));
        if let Some(c) = cookie {
            req = req.header(COOKIE, c);
        }
        req.send().await.unwrap()
    }

    struct Page {
        status: StatusCode,
        location: Option<String>,
        body: String,
    }

    /// Keeps the session cookie and the last CSRF token it was shown.
    struct Browser {
        base: String,
        client: reqwest::Client,
        cookie: Option<String>,
        csrf: Option<String>,
    }

    impl Browser {
        fn new(base: &str) -> Self {
            Self {
                base: base.to_string(),
                client: client(),
                cookie: None,
                csrf: None,
            }
        }

        async fn send(&mut self, mut req: reqwest::RequestBuilder) -> Page {
            if let Some(c) = &self.cookie {
                req = req.header(COOKIE, c);
            }
            let resp = req.send().await.unwrap();
            if let Some(c) = session_cookie(&resp) {
                self.cookie = Some(c);
            }
            let status = resp.status();
            let location = resp
                .headers()
                .get(LOCATION)
                .map(|v| v.to_str().unwrap().to_string());
            let body = resp.text().await.unwrap();
            if let Some(token) = scrape_csrf(&body) {
                self.csrf = Some(token);
            }
            Page {
                status,
                location,
                body,
            }
        }

        async fn get(&mut self, path: &str) -> Page {
            let req = self.client.get(format!("{}{}", self.base, path));
            self.send(req).await
        }

        /// Submit a form with the CSRF token, loading a page first if none
        /// has been seen yet.
        async fn post(&mut self, path: &str, fields: &[(&str, &str)]) -> Page {
            if self.csrf.is_none() {
                self.get("/").await;
            }
            let token = self.csrf.clone().unwrap();
            let mut fields = fields.to_vec();
            fields.push((CSRF_FIELD, &token));
            self.post_raw(path, &fields).await
        }

        /// Submit exactly `fields`, without adding a token.
        async fn post_raw(&mut self, path: &str, fields: &[(&str, &str)]) -> Page {
            let req = self
                .client
                .post(format!("{}{}", self.base, path))
                .form(fields);
            self.send(req).await
        }
    }

    async fn signup(browser: &mut Browser, email: &str) -> Page {
        browser
            .post(
                "/user/signup",
                &[("name", "Alice"), ("email", email), ("password", "pa55word!")],
            )
            .await
    }

    const VALID_MEMO: [(&str, &str); 3] = [
        ("title", "O snail"),
        ("content", "Climb Mount Fuji"),
        ("expires", "7"),
    ];

    #[tokio::test]
    async fn test_blank_title_rerenders_without_insert() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        let page = browser
            .post(
                "/memo/create",
                &[("title", ""), ("content", "Some content"), ("expires", "7")],
            )
            .await;
        assert_eq!(page.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(page.body.contains("This field cannot be blank"));
        assert!(page.body.contains("Some content"));
        assert_eq!(state.db.count_live_memos().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_redirects_and_flashes_once() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        let page = browser.post("/memo/create", &VALID_MEMO).await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert_eq!(page.location.as_deref(), Some("/memo/view/1"));

        let memo = state.db.get_memo(1).unwrap();
        assert_eq!(memo.expires - memo.created, Duration::days(7));

        let page = browser.get("/memo/view/1").await;
        assert!(page.body.contains("Memo successfully created!"));
        assert!(page.body.contains("Climb Mount Fuji"));

        let page = browser.get("/memo/view/1").await;
        assert!(!page.body.contains("Memo successfully created!"));
        assert!(page.body.contains("O snail"));
    }

    #[tokio::test]
    async fn test_create_defaults_expiry_and_rejects_other_values() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        let page = browser
            .post("/memo/create", &[("title", "t"), ("content", "c")])
            .await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        let memo = state.db.get_memo(1).unwrap();
        assert_eq!(memo.expires - memo.created, Duration::days(7));

        let page = browser
            .post(
                "/memo/create",
                &[("title", "t"), ("content", "c"), ("expires", "30")],
            )
            .await;
        assert_eq!(page.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(page.body.contains("This field must equal 1, 7 or 365"));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_bad_request() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        let page = browser
            .post(
                "/memo/create",
                &[("title", "t"), ("content", "c"), ("expires", "soon")],
            )
            .await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert_eq!(page.body, "Bad Request");

        let page = browser.post("/memo/create", &[("title", "t")]).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert_eq!(state.db.count_live_memos().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (base, _state) = spawn().await;
        let mut browser = Browser::new(&base);
        let content = "x".repeat(5000);
        let page = browser
            .post(
                "/memo/create",
                &[("title", "t"), ("content", &content), ("expires", "1")],
            )
            .await;
        assert_eq!(page.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_post_without_matching_csrf_token_is_rejected() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        browser.get("/memo/create").await;
        assert!(browser.csrf.is_some());

        let page = browser.post_raw("/memo/create", &VALID_MEMO).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert_eq!(page.body, "Bad Request");

        let mut forged = VALID_MEMO.to_vec();
        forged.push((CSRF_FIELD, "00112233445566778899aabbccddeeff"));
        let page = browser.post_raw("/memo/create", &forged).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);

        // A token lifted from another visitor's page does not carry over.
        let token = browser.csrf.clone().unwrap();
        let mut stranger = Browser::new(&base);
        let mut stolen = VALID_MEMO.to_vec();
        stolen.push((CSRF_FIELD, &token));
        let page = stranger.post_raw("/memo/create", &stolen).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);

        // Checked before decoding: an otherwise undecodable body is still a
        // CSRF rejection and never reaches validation.
        let page = browser.post_raw("/memo/create", &[("title", "")]).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert!(!page.body.contains("This field cannot be blank"));

        assert_eq!(state.db.count_live_memos().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_csrf_token_is_accepted_and_survives_login() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        let first = browser.get("/user/signup").await;
        let token = scrape_csrf(&first.body).unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(scrape_csrf(&browser.get("/").await.body), Some(token.clone()));

        assert_eq!(
            signup(&mut browser, "dave@example.com").await.status,
            StatusCode::SEE_OTHER
        );
        let page = browser
            .post(
                "/user/login",
                &[("email", "dave@example.com"), ("password", "pa55word!")],
            )
            .await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);

        // The page loaded before login still submits after the token renewal.
        let mut fields = VALID_MEMO.to_vec();
        fields.push((CSRF_FIELD, &token));
        let page = browser.post_raw("/memo/create", &fields).await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert_eq!(state.db.count_live_memos().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_expired_memos_look_the_same() {
        let (base, state) = spawn().await;
        let created = chrono::Utc::now() - Duration::days(2);
        state.db.insert_memo_at("old", "gone", 1, created).unwrap();

        let expired = get(&base, "/memo/view/1", None).await;
        let missing = get(&base, "/memo/view/99", None).await;
        let bogus = get(&base, "/memo/view/abc", None).await;
        let zero = get(&base, "/memo/view/0", None).await;
        for resp in [expired, missing, bogus, zero] {
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            assert_eq!(resp.text().await.unwrap(), "Not Found");
        }
    }

    #[tokio::test]
    async fn test_home_lists_live_memos() {
        let (base, state) = spawn().await;
        state.db.insert_memo("First memo", "a", 7).unwrap();
        state.db.insert_memo("Second memo", "b", 1).unwrap();
        let resp = get(&base, "/", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.text().await.unwrap();
        assert!(body.contains("First memo"));
        assert!(body.contains("Second memo"));
    }

    #[tokio::test]
    async fn test_duplicate_signup_is_a_field_error() {
        let (base, state) = spawn().await;
        let mut browser = Browser::new(&base);
        let first = signup(&mut browser, "alice@example.com").await;
        assert_eq!(first.status, StatusCode::SEE_OTHER);
        assert_eq!(first.location.as_deref(), Some("/user/login"));

        let second = signup(&mut browser, "alice@example.com").await;
        assert_eq!(second.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(second.body.contains("Email address is already in use"));
        let third = signup(&mut browser, "alice@example.com").await;
        assert_eq!(third.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.db.count_users().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_signups_create_one_user() {
        let (base, state) = spawn().await;
        let mut a = Browser::new(&base);
        let mut b = Browser::new(&base);
        a.get("/user/signup").await;
        b.get("/user/signup").await;
        let (a, b) = tokio::join!(
            signup(&mut a, "bob@example.com"),
            signup(&mut b, "bob@example.com")
        );
        let mut statuses = vec![a.status.as_u16(), b.status.as_u16()];
        statuses.sort();
        assert_eq!(statuses, vec![303, 422]);
        assert_eq!(state.db.count_users().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_signup_validation_keeps_values_but_not_password() {
        let (base, _state) = spawn().await;
        let mut browser = Browser::new(&base);
        let page = browser
            .post(
                "/user/signup",
                &[("name", "Alice"), ("email", "not-an-email"), ("password", "tiny7")],
            )
            .await;
        assert_eq!(page.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(page.body.contains("This field must be a valid email address"));
        assert!(page.body.contains("This field must be at least 8 characters long"));
        assert!(page.body.contains("not-an-email"));
        assert!(!page.body.contains("tiny7"));
    }

    #[tokio::test]
    async fn test_login_and_logout_flow() {
        let (base, _state) = spawn().await;
        let mut browser = Browser::new(&base);
        signup(&mut browser, "carol@example.com").await;
        let signup_cookie = browser.cookie.clone().unwrap();

        let page = browser
            .post(
                "/user/login",
                &[("email", "carol@example.com"), ("password", "wrong-password")],
            )
            .await;
        assert_eq!(page.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(page.body.contains("Email or password is incorrect"));
        assert!(page.body.contains("Your signup was successful. Please log in."));

        let page = browser
            .post(
                "/user/login",
                &[("email", "carol@example.com"), ("password", "pa55word!")],
            )
            .await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert_eq!(page.location.as_deref(), Some("/memo/create"));
        let login_cookie = browser.cookie.clone().unwrap();
        assert_ne!(login_cookie, signup_cookie);

        assert!(browser.get("/").await.body.contains("Logout"));
        let body = get(&base, "/", Some(&signup_cookie))
            .await
            .text()
            .await
            .unwrap();
        assert!(!body.contains("Logout"));

        // The logout form needs the token too.
        let page = browser.post_raw("/user/logout", &[]).await;
        assert_eq!(page.status, StatusCode::BAD_REQUEST);
        assert!(browser.get("/").await.body.contains("Logout"));

        let page = browser.post("/user/logout", &[]).await;
        assert_eq!(page.status, StatusCode::SEE_OTHER);
        assert_eq!(page.location.as_deref(), Some("/"));
        assert_ne!(browser.cookie.as_deref(), Some(login_cookie.as_str()));

        let page = browser.get("/").await;
        assert!(page.body.contains("logged out successfully"));
        assert!(!page.body.contains("Logout"));
    }

    #[tokio::test]
    async fn test_security_headers_on_every_response() {
        let (base, _state) = spawn().await;
        for path in ["/", "/no/such/route"] {
            let resp = get(&base, path, None).await;
            let headers = resp.headers();
            assert!(headers.contains_key("content-security-policy"));
            assert_eq!(headers["referrer-policy"], "origin-when-cross-origin");
            assert_eq!(headers["x-content-type-options"], "nosniff");
            assert_eq!(headers["x-frame-options"], "deny");
            assert_eq!(headers["x-xss-protection"], "0");
            assert_eq!(headers["server"], "memobin");
        }
    }

    #[tokio::test]
    async fn test_static_assets_are_served() {
        let (base, _state) = spawn().await;
        let resp = get(&base, "/static/css/main.css", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let (base, state) = spawn().await;
        state.db.insert_memo("t", "c", 7).unwrap();
        let status: ServiceStatus = get(&base, "/status", None).await.json().await.unwrap();
        assert!(status.running);
        assert_eq!(status.live_memos, 1);
        assert_eq!(status.registered_users, 0);
    }

    #[tokio::test]
    async fn test_status_reports_database_failure() {
        let (base, state) = spawn().await;
        state.db.conn().execute_batch("DROP TABLE memos").unwrap();
        let resp = get(&base, "/status", None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.text().await.unwrap(), "Internal Server Error");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_status_answers_while_a_login_is_hashing() {
        let templates = TemplateSet::load(&ui_dir("html")).unwrap();
        let (base, state) = spawn_with(templates, false, 200_000).await;
        state
            .db
            .insert_user("Erin", "erin@example.com", "pa55word!")
            .unwrap();

        let mut browser = Browser::new(&base);
        browser.get("/user/login").await;
        let login = tokio::spawn(async move {
            browser
                .post(
                    "/user/login",
                    &[("email", "erin@example.com"), ("password", "pa55word!")],
                )
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // One runtime thread: this only answers first if hashing is off it.
        let resp = get(&base, "/status", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!login.is_finished());
        assert_eq!(login.await.unwrap().status, StatusCode::SEE_OTHER);
    }

    fn templates_without_home() -> TemplateSet {
        TemplateSet::from_sources(vec![
            (
                "base.tmpl.html".to_string(),
                "{% block main %}{% endblock %}".to_string(),
            ),
            (
                "pages/create.tmpl.html".to_string(),
                "{% extends \"base.tmpl.html\" %}{% block main %}create{% endblock %}".to_string(),
            ),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_page_is_a_generic_server_error() {
        let (base, _state) = spawn_with(templates_without_home(), false, 1_000).await;
        let resp = get(&base, "/", None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.text().await.unwrap(), "Internal Server Error");
    }

    #[tokio::test]
    async fn test_debug_mode_exposes_error_detail() {
        let (base, _state) = spawn_with(templates_without_home(), true, 1_000).await;
        let resp = get(&base, "/", None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = resp.text().await.unwrap();
        assert!(body.contains("the template 'home' does not exist"));
    }
}
