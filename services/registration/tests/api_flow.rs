use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use festreg_server::{
    api,
    config::AppSettings,
    mail::{Mail, MailError, Mailer},
    seed::seed,
    state::AppState,
    store::MemoryStore,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Keeps every mail so tests can follow the links inside.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
}

impl RecordingMailer {
    /// Value of `param` in the link of the last mail sent to `to`.
    fn last_link_param(&self, to: &str, param: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let mail = sent
            .iter()
            .rev()
            .find(|m| m.to == to)
            .unwrap_or_else(|| panic!("no mail sent to {to}"));
        let needle = format!("{param}=");
        let start = mail.body.find(&needle).expect("link missing from mail") + needle.len();
        mail.body[start..]
            .split_whitespace()
            .next()
            .unwrap()
            .to_string()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

struct TestApp {
    base_url: String,
    client: reqwest::Client,
    mailer: Arc<RecordingMailer>,
    settings: AppSettings,
}

impl TestApp {
    async fn spawn() -> Self {
        let settings = AppSettings::default();
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            mailer.clone(),
            settings.clone(),
        );
        seed(state.store(), state.credentials(), state.settings())
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let app = api::create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            base_url: format!("http://{addr}/api"),
            client,
            mailer,
            settings,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn register(&self, email: &str, nickname: &str) -> reqwest::Response {
        self.client
            .post(self.url("/register"))
            .json(&json!({
                "username": email,
                "password": "secret1",
                "nickname": nickname,
                "fullName": format!("{nickname} Beispiel"),
                "sitePassword": self.settings.site_password,
            }))
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/login"))
            .json(&json!({ "username": email, "password": password }))
            .send()
            .await
            .unwrap()
    }

    async fn token(&self, email: &str, password: &str) -> String {
        let resp = self.login(email, password).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn admin_token(&self) -> String {
        self.token(&self.settings.super_admin, &self.settings.admin_password)
            .await
    }

    /// Registers, verifies and logs in a user; returns the session token.
    async fn activated_user(&self, email: &str, nickname: &str) -> String {
        assert_eq!(self.register(email, nickname).await.status(), StatusCode::CREATED);
        let token = self.mailer.last_link_param(email, "token");
        let resp = self
            .client
            .get(self.url(&format!("/verify?token={token}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        self.token(email, "secret1").await
    }

    async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Value,
    ) -> reqwest::Response {
        self.client
            .request(method, self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn me(&self, token: &str) -> Value {
        let resp = self.get("/user/me", token).await;
        assert_eq!(resp.status(), StatusCode::OK);
        resp.json().await.unwrap()
    }

    async fn create_spot(&self, admin: &str, name: &str, price: i64, limit: i64) -> String {
        let resp = self
            .send_json(
                reqwest::Method::POST,
                "/admin/spots",
                admin,
                json!({ "name": name, "price": price, "limit": limit }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["currentCount"], 0);
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_shift(&self, admin: &str, name: &str, head_count: i32) -> String {
        let resp = self
            .send_json(
                reqwest::Method::POST,
                "/admin/shifts",
                admin,
                json!({ "name": name, "headCount": head_count, "day": "Samstag" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    async fn import(&self, admin: &str, csv: &str) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(csv.as_bytes().to_vec()).file_name("shifts.csv");
        let form = reqwest::multipart::Form::new().part("file", part);
        self.client
            .post(self.url("/admin/shifts/import"))
            .bearer_auth(admin)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn register_verify_login_flow() {
    let app = TestApp::spawn().await;

    let wrong_site = app
        .client
        .post(app.url("/register"))
        .json(&json!({
            "username": "anna@example.com",
            "password": "secret1",
            "nickname": "anna",
            "sitePassword": "guess",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_site.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        wrong_site.headers()["content-type"],
        "application/problem+json"
    );

    let resp = app.register("Anna@Example.com", "anna").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["username"], "anna@example.com");
    assert_eq!(body["isActivated"], false);
    assert_eq!(body["amountToPay"], 0);
    assert!(body.get("passwordHash").is_none());

    // Not verified yet.
    let resp = app.login("anna@example.com", "secret1").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let token = app.mailer.last_link_param("anna@example.com", "token");
    let resp = app
        .client
        .get(app.url(&format!("/verify?token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        resp.headers()["location"],
        "http://localhost:5173/home?verify=success"
    );

    // Tokens are single use.
    let resp = app
        .client
        .get(app.url(&format!("/verify?token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.login("anna@example.com", "wrong-password").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.login("ANNA@example.com", "secret1").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("jwt="));
    assert!(cookie.contains("HttpOnly"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    let jwt = body["token"].as_str().unwrap();

    let me = app.me(jwt).await;
    assert_eq!(me["nickname"], "anna");
    assert_eq!(me["type"], "reg");
    assert!(me["lastLogin"].is_string());

    // Cookie works as well as the bearer header.
    let resp = app
        .client
        .get(app.url("/user/me"))
        .header("cookie", format!("jwt={jwt}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Activated accounts cannot be registered again.
    let resp = app.register("anna@example.com", "anna2").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_is_required() {
    let app = TestApp::spawn().await;

    let resp = app.client.get(app.url("/user/me")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.get("/user/me", "not-a-jwt").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let user = app.activated_user("bob@example.com", "bob").await;
    let resp = app.get("/admin/users", &user).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let admin = app.admin_token().await;
    let resp = app.get("/admin/users", &admin).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let users: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn spot_assignment_and_amount_to_pay() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let spot = app.create_spot(&admin, "Bulli", 76, 1).await;

    let anna = app.activated_user("anna@example.com", "anna").await;
    let ben = app.activated_user("ben@example.com", "ben").await;

    let resp = app
        .send_json(reqwest::Method::PUT, "/user/me", &anna, json!({ "spotTypeId": spot }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["amountToPay"], 76);
    assert_eq!(body["spotType"]["name"], "Bulli");
    let anna_id = body["id"].as_str().unwrap().to_string();

    // Users cannot record their own payments.
    let resp = app
        .send_json(reqwest::Method::PUT, "/user/me", &anna, json!({ "amountPaid": 76 }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(app.me(&anna).await["amountToPay"], 76);

    let resp = app
        .send_json(
            reqwest::Method::PUT,
            &format!("/admin/users/{anna_id}"),
            &admin,
            json!({ "amountPaid": 50 }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(app.me(&anna).await["amountToPay"], 26);

    // The pool is full now.
    let resp = app
        .send_json(reqwest::Method::PUT, "/user/me", &ben, json!({ "spotTypeId": spot }))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "capacity_exceeded");

    // Re-saving an unchanged spot type skips the capacity check.
    let resp = app
        .send_json(
            reqwest::Method::PUT,
            "/user/me",
            &anna,
            json!({ "spotTypeId": spot, "phone": "0151 000" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let spots: Vec<Value> = app.get("/user/spots", &ben).await.json().await.unwrap();
    let bulli = spots.iter().find(|s| s["name"] == "Bulli").unwrap();
    assert_eq!(bulli["currentCount"], 1);

    // Giving and taking solidarity at once is rejected.
    let resp = app
        .send_json(
            reqwest::Method::PUT,
            "/user/me",
            &anna,
            json!({ "soliAmount": 10, "takesSoli": true }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .send_json(reqwest::Method::PUT, "/user/me", &anna, json!({ "spotTypeId": null }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["amountToPay"], 0);
    assert!(body["spotTypeId"].is_null());

    // The freed slot can be taken.
    let resp = app
        .send_json(reqwest::Method::PUT, "/user/me", &ben, json!({ "spotTypeId": spot }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn shift_enrollment_respects_head_count() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let shift = app.create_shift(&admin, "Tresen", 1).await;

    let anna = app.activated_user("anna@example.com", "anna").await;
    let ben = app.activated_user("ben@example.com", "ben").await;

    let resp = app
        .send_json(reqwest::Method::POST, &format!("/user/shifts/{shift}/me"), &anna, json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["currentCount"], 1);
    assert_eq!(body["userNames"], json!(["anna Beispiel"]));

    let resp = app
        .send_json(reqwest::Method::POST, &format!("/user/shifts/{shift}/me"), &ben, json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "capacity_exceeded");

    let resp = app
        .send_json(reqwest::Method::DELETE, &format!("/user/shifts/{shift}/me"), &ben, json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "not_member");

    let resp = app
        .send_json(reqwest::Method::DELETE, &format!("/user/shifts/{shift}/me"), &anna, json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["currentCount"], 0);

    let unknown = festreg_id::ShiftId::new();
    let resp = app
        .send_json(reqwest::Method::POST, &format!("/user/shifts/{unknown}/me"), &anna, json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .send_json(reqwest::Method::POST, "/user/shifts/garbage/me", &anna, json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_enrolls_users_into_shifts() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let shift = app.create_shift(&admin, "Abbau", 2).await;

    let anna = app.activated_user("anna@example.com", "anna").await;
    let anna_id = app.me(&anna).await["id"].as_str().unwrap().to_string();

    let path = format!("/admin/shifts/{shift}/user/{anna_id}");
    let resp = app.send_json(reqwest::Method::POST, &path, &admin, json!({})).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.send_json(reqwest::Method::POST, &path, &admin, json!({})).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "already_member");

    let resp = app.send_json(reqwest::Method::DELETE, &path, &admin, json!({})).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn csv_import_reports_partial_and_complete() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let resp = app
        .import(&admin, "Name,HeadCount,Day\nBar,3,Freitag\nEinlass,,Samstag\n")
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["imported"], 1);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["outcome"], "partial");
    assert_eq!(report["errors"][0]["row"], 2);

    let resp = app.import(&admin, "name,headcount\nAufbau,4\n").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["outcome"], "complete");

    let resp = app.import(&admin, "name,points\nAufbau,4\n").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let shifts: Vec<Value> = app.get("/admin/shifts", &admin).await.json().await.unwrap();
    let names: Vec<&str> = shifts.iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Bar", "Aufbau"]);
    assert_eq!(shifts[0]["day"], "Freitag");
    assert_eq!(shifts[0]["points"], 1);
}

#[tokio::test]
async fn password_reset_flow() {
    let app = TestApp::spawn().await;
    app.activated_user("anna@example.com", "anna").await;

    let resp = app
        .client
        .post(app.url("/requestPasswordReset?username=nobody@example.com"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .client
        .post(app.url("/requestPasswordReset?username=anna@example.com"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let reset = app.mailer.last_link_param("anna@example.com", "resetToken");

    let resp = app
        .client
        .post(app.url("/resetPassword"))
        .json(&json!({ "token": reset, "password": "newpass1", "passwordConfirm": "newpass2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .client
        .post(app.url("/resetPassword"))
        .json(&json!({ "token": reset, "password": "newpass1", "passwordConfirm": "newpass1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(
        app.login("anna@example.com", "secret1").await.status(),
        StatusCode::UNAUTHORIZED
    );
    app.token("anna@example.com", "newpass1").await;

    let resp = app
        .client
        .post(app.url("/resetPassword"))
        .json(&json!({ "token": reset, "password": "again12", "passwordConfirm": "again12" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_created_account_is_claimed_on_registration() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let resp = app
        .send_json(
            reqwest::Method::POST,
            "/admin/users",
            &admin,
            json!({ "username": "carla@example.com", "nickname": "carla-placeholder" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let placeholder: Value = resp.json().await.unwrap();

    let resp = app.register("carla@example.com", "carla").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], placeholder["id"]);
    assert_eq!(body["nickname"], "carla");
}

#[tokio::test]
async fn super_admin_cannot_be_deleted() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let admin_id = app.me(&admin).await["id"].as_str().unwrap().to_string();

    let resp = app
        .send_json(
            reqwest::Method::DELETE,
            &format!("/admin/users/{admin_id}"),
            &admin,
            json!({}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let anna = app.activated_user("anna@example.com", "anna").await;
    let anna_id = app.me(&anna).await["id"].as_str().unwrap().to_string();
    let resp = app
        .send_json(
            reqwest::Method::DELETE,
            &format!("/admin/users/{anna_id}"),
            &admin,
            json!({}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // The deleted account's token no longer resolves to a user.
    assert_eq!(app.get("/user/me", &anna).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_endpoints() {
    let app = TestApp::spawn().await;
    for path in ["/health", "/healthz", "/readyz", "/livez"] {
        let resp = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
    }
}
