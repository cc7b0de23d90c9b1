//! Minimal blocking client for the Roborock cloud.
//!
//! - Blocking client using `ureq` (no async).
//! - Covers only login (password and e-mail code) and the home snapshot.
//!
//! Authentication
//! - Account endpoints identify the installation through `header_clientid`.
//! - The home endpoint is signed with Hawk using the `rriot` credentials from the login.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use http::StatusCode;
use log::debug;
use md5::{Digest, Md5};
use rand::RngCore;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::cell::RefCell;
use std::time::Duration;

use crate::models::roborock::{ApiResponse, BaseUrl, HomeData, HomeDetail, IotResponse, RRiot, UserData};
use crate::utils::hex_bytes;

const DISCOVERY_URL: &str = "https://euiot.roborock.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CODE_OK: i64 = 200;
const CODE_TOO_FREQUENT: i64 = 9002;

#[derive(Debug)]
pub enum RoborockClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
    /// The API answered with a non-success code.
    Api { code: Option<i64>, message: String },
    /// Password login needs an e-mail verification code.
    TwoStepRequired(String),
    RateLimited(String),
}

impl core::fmt::Display for RoborockClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RoborockClientError::Transport(s) => write!(f, "transport error: {}", s),
            RoborockClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            RoborockClientError::Json(e) => write!(f, "json error: {}", e),
            RoborockClientError::Api { code: Some(code), message } => write!(f, "{} - response code: {}", message, code),
            RoborockClientError::Api { code: None, message } => write!(f, "{}", message),
            RoborockClientError::TwoStepRequired(s) => write!(f, "two step validation required: {}", s),
            RoborockClientError::RateLimited(s) => write!(f, "rate limited: {}", s),
        }
    }
}

impl std::error::Error for RoborockClientError {}

impl From<ureq::Error> for RoborockClientError {
    fn from(value: ureq::Error) -> Self {
        RoborockClientError::Transport(value.to_string())
    }
}

/// The cloud operations the refresh consumes.
pub trait CloudApi {
    fn pass_login(&self, password: &str) -> Result<UserData, RoborockClientError>;
    fn request_code(&self) -> Result<(), RoborockClientError>;
    fn code_login(&self, code: &str) -> Result<UserData, RoborockClientError>;
    fn get_home_data(&self, user: &UserData) -> Result<HomeData, RoborockClientError>;
}

impl<T: CloudApi + ?Sized> CloudApi for &T {
    fn pass_login(&self, password: &str) -> Result<UserData, RoborockClientError> {
        (**self).pass_login(password)
    }

    fn request_code(&self) -> Result<(), RoborockClientError> {
        (**self).request_code()
    }

    fn code_login(&self, code: &str) -> Result<UserData, RoborockClientError> {
        (**self).code_login(code)
    }

    fn get_home_data(&self, user: &UserData) -> Result<HomeData, RoborockClientError> {
        (**self).get_home_data(user)
    }
}

pub struct RoborockWebClient {
    agent: ureq::Agent,
    email: String,
    client_id: String,
    base_url: RefCell<Option<String>>,
}

impl RoborockWebClient {
    pub fn new(email: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();

        let email = email.into();
        let client_id = header_client_id(&email, &random_token(16));
        RoborockWebClient {
            agent,
            email,
            client_id,
            base_url: RefCell::new(None),
        }
    }

    /// Region-specific API host for the account, looked up once.
    fn base_url(&self) -> Result<String, RoborockClientError> {
        if let Some(url) = self.base_url.borrow().as_ref() {
            return Ok(url.clone());
        }

        let resp = self
            .agent
            .post(format!("{}/api/v1/getUrlByEmail", DISCOVERY_URL))
            .header("header_clientid", &self.client_id)
            .query("email", &self.email)
            .query("needtwostepauth", "false")
            .send_empty();
        let BaseUrl { url } = Self::account_data(resp, "getUrlByEmail")?;
        debug!("account api base url: {}", url);
        *self.base_url.borrow_mut() = Some(url.clone());
        Ok(url)
    }

    fn account_post<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, RoborockClientError> {
        let url = format!("{}{}", self.base_url()?, path);
        let mut req = self.agent.post(&url).header("header_clientid", &self.client_id);
        for (k, v) in query {
            req = req.query(*k, *v);
        }
        Self::account_data(req.send_empty(), path)
    }

    fn account_data<T: DeserializeOwned>(
        resp: Result<http::Response<ureq::Body>, ureq::Error>,
        context: &str,
    ) -> Result<T, RoborockClientError> {
        let (status, body) = read_response(resp)?;
        parse_account_response(status, &body, context)
    }
}

impl CloudApi for RoborockWebClient {
    fn pass_login(&self, password: &str) -> Result<UserData, RoborockClientError> {
        self.account_post(
            "/api/v1/login",
            &[
                ("username", self.email.as_str()),
                ("password", password),
                ("needtwostepauth", "false"),
            ],
        )
    }

    fn request_code(&self) -> Result<(), RoborockClientError> {
        // the response carries no data on success
        let _: Option<serde_json::Value> =
            self.account_post("/api/v1/sendEmailCode", &[("username", self.email.as_str()), ("type", "auth")])?;
        Ok(())
    }

    fn code_login(&self, code: &str) -> Result<UserData, RoborockClientError> {
        self.account_post(
            "/api/v1/loginWithCode",
            &[
                ("username", self.email.as_str()),
                ("verifycode", code),
                ("verifycodetype", "AUTH_EMAIL_CODE"),
            ],
        )
    }

    fn get_home_data(&self, user: &UserData) -> Result<HomeData, RoborockClientError> {
        let url = format!("{}/api/v1/getHomeDetail", self.base_url()?);
        let resp = self
            .agent
            .get(&url)
            .header("header_clientid", &self.client_id)
            .header("Authorization", &user.token)
            .call();
        let HomeDetail { rr_home_id } = Self::account_data(resp, "getHomeDetail")?;

        let path = format!("/v3/user/homes/{}", rr_home_id);
        let auth = hawk_authorization(&user.rriot, &path, Utc::now().timestamp(), &random_token(6))?;
        let resp = self
            .agent
            .get(format!("{}{}", user.rriot.r.a.trim_end_matches('/'), path))
            .header("Authorization", &auth)
            .call();
        let (status, body) = read_response(resp)?;
        parse_iot_response(status, &body, &path)
    }
}

fn read_response(
    resp: Result<http::Response<ureq::Body>, ureq::Error>,
) -> Result<(StatusCode, String), RoborockClientError> {
    let mut resp = resp?;
    let status = resp.status();
    let body = resp.body_mut().read_to_string()?;
    Ok((status, body))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, RoborockClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| RoborockClientError::Json(e.to_string()))
}

fn check_status(status: StatusCode, body: &str) -> Result<(), RoborockClientError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RoborockClientError::RateLimited(body.to_string()));
    }
    if !status.is_success() {
        return Err(RoborockClientError::Http {
            status: status.as_u16(),
            message: body.to_string(),
        });
    }
    Ok(())
}

/// Interprets the `{code, msg, data}` envelope of the account API.
pub fn parse_account_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    context: &str,
) -> Result<T, RoborockClientError> {
    check_status(status, body)?;
    let envelope: ApiResponse<serde_json::Value> = decode(body)?;
    let message = envelope.msg.unwrap_or_default();

    match envelope.code {
        Some(CODE_OK) => {
            let data = envelope.data.unwrap_or(serde_json::Value::Null);
            serde_path_to_error::deserialize(data)
                .map_err(|e| RoborockClientError::Json(format!("{}: {}", context, e)))
        }
        _ if message.to_lowercase().contains("two step") => Err(RoborockClientError::TwoStepRequired(message)),
        Some(CODE_TOO_FREQUENT) => Err(RoborockClientError::RateLimited(message)),
        code => Err(RoborockClientError::Api { code, message }),
    }
}

/// Interprets the `{success, result}` envelope of the home API.
pub fn parse_iot_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    context: &str,
) -> Result<T, RoborockClientError> {
    check_status(status, body)?;
    let envelope: IotResponse<serde_json::Value> = decode(body)?;
    match envelope.result {
        Some(result) if envelope.success => serde_path_to_error::deserialize(result)
            .map_err(|e| RoborockClientError::Json(format!("{}: {}", context, e))),
        _ => Err(RoborockClientError::Api {
            code: None,
            message: format!(
                "{} failed: {}",
                context,
                envelope.status.unwrap_or_else(|| "no result".to_string())
            ),
        }),
    }
}

/// `base64(md5(email + device_identifier))`
pub fn header_client_id(email: &str, device_identifier: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(email.as_bytes());
    hasher.update(device_identifier.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Hawk `Authorization` header for a home API path.
pub fn hawk_authorization(
    rriot: &RRiot,
    path: &str,
    timestamp: i64,
    nonce: &str,
) -> Result<String, RoborockClientError> {
    let path_digest = hex_bytes(&Md5::digest(path.as_bytes()));
    let prestr = [
        rriot.u.as_str(),
        rriot.s.as_str(),
        nonce,
        &timestamp.to_string(),
        &path_digest,
        "",
        "",
    ]
    .join(":");

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(rriot.h.as_bytes()).map_err(|e| RoborockClientError::Api {
        code: None,
        message: format!("invalid hawk key: {}", e),
    })?;
    mac.update(prestr.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "Hawk id=\"{}\",s=\"{}\",ts=\"{}\",nonce=\"{}\",mac=\"{}\"",
        rriot.u, rriot.s, timestamp, nonce, signature
    ))
}

/// URL-safe random token of `bytes` random bytes.
fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
