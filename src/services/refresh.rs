use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::cache::{CachedSession, load_connection_cache};
use crate::client::{CloudApi, RoborockClientError};
use crate::config::Config;
use crate::models::roborock::UserData;
use crate::secrets::SecretStore;

pub const RATE_LIMIT_MESSAGE: &str = "Roborock login rate limit hit. Please wait a minute and retry.";
pub const CODE_REQUIRED_MESSAGE: &str = "Email code is required for two-step validation.";
pub const CODE_PROMPT: &str = "Roborock email code: ";

/// Makes sure the session cache holds a valid session and fresh home data.
///
/// A cached session is reused as-is. Otherwise the account credentials are read from the
/// secret store and a fresh login is performed, including the e-mail code step when the
/// cloud asks for it. The home data is fetched in both cases and the cache file is rewritten.
/// Returns the path that was written.
pub fn refresh_home_data_cache<S, C, F, P>(
    cfg: &Config,
    secrets: &S,
    make_client: F,
    prompt: P,
) -> Result<PathBuf, String>
where
    S: SecretStore,
    C: CloudApi,
    F: FnOnce(&str) -> C,
    P: FnOnce(&str) -> Result<String, String>,
{
    let (path, mut session) = match load_connection_cache(&cfg.cache_files) {
        Some((path, session)) => {
            info!("using cached session from {}", path.display());
            (path, session)
        }
        None => (cfg.primary_cache_file().clone(), CachedSession::default()),
    };

    let cached_user = cached_user_data(&session);
    let (email, client, user) = match (session.email.clone(), cached_user) {
        (Some(email), Some(user)) => {
            let client = make_client(&email);
            (email, client, user)
        }
        _ => {
            let email = secrets
                .read(&cfg.secrets.email, "email")
                .map_err(|e| e.to_string())?;
            let password = secrets
                .read(&cfg.secrets.password, "password")
                .map_err(|e| e.to_string())?;
            let client = make_client(&email);
            let user = login(&client, &password, cfg, prompt)?;
            (email, client, user)
        }
    };

    let home = client
        .get_home_data(&user)
        .map_err(|e| format!("fetching home data failed: {}", e))?;
    info!("fetched home data for home {} with {} room(s)", home.id, home.rooms.len());

    session.email = Some(email);
    session.user_data = Some(serde_json::to_value(&user).map_err(|e| format!("serialize user data failed: {}", e))?);
    session.set_home_data(serde_json::to_value(&home).map_err(|e| format!("serialize home data failed: {}", e))?);
    session.store(&path)?;
    info!("wrote session cache {}", path.display());
    Ok(path)
}

fn cached_user_data(session: &CachedSession) -> Option<UserData> {
    if !session.has_session() {
        return None;
    }
    let raw = session.user_data.clone()?;
    match serde_path_to_error::deserialize::<_, UserData>(raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!("cached user data unusable, logging in again: {}", e);
            None
        }
    }
}

fn login<C, P>(client: &C, password: &str, cfg: &Config, prompt: P) -> Result<UserData, String>
where
    C: CloudApi,
    P: FnOnce(&str) -> Result<String, String>,
{
    match client.pass_login(password) {
        Ok(user) => Ok(user),
        Err(RoborockClientError::TwoStepRequired(msg)) => {
            info!("{}, requesting an e-mail code", msg);
            request_code_with_retry(client, cfg.code_request_attempts, cfg.code_request_backoff, thread::sleep)?;
            let code = prompt(CODE_PROMPT)?;
            let code = code.trim();
            if code.is_empty() {
                return Err(CODE_REQUIRED_MESSAGE.to_string());
            }
            client
                .code_login(code)
                .map_err(|e| format!("Roborock code login failed: {}", e))
        }
        Err(e) => Err(format!("Roborock login failed: {}", e)),
    }
}

/// Asks for an e-mail code, waiting `backoff` through `sleep` after each rate-limited attempt
/// except the last.
fn request_code_with_retry<C, S>(client: &C, attempts: u32, backoff: Duration, mut sleep: S) -> Result<(), String>
where
    C: CloudApi,
    S: FnMut(Duration),
{
    for attempt in 1..=attempts {
        match client.request_code() {
            Ok(()) => return Ok(()),
            Err(RoborockClientError::RateLimited(msg)) if attempt < attempts => {
                warn!("e-mail code request {}/{} rate limited ({}), retrying", attempt, attempts, msg);
                sleep(backoff);
            }
            Err(RoborockClientError::RateLimited(_)) => break,
            Err(e) => return Err(format!("requesting e-mail code failed: {}", e)),
        }
    }
    Err(RATE_LIMIT_MESSAGE.to_string())
}

/// Prints `text` to stdout and reads one line from stdin.
pub fn stdin_prompt(text: &str) -> Result<String, String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", text)
        .and_then(|_| stdout.flush())
        .map_err(|e| format!("write prompt failed: {}", e))?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| format!("read e-mail code failed: {}", e))?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fakes::{FakeCloud, FakeSecrets, home_data, user_data};
    use serde_json::Value;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const FIXTURE: &str = include_str!("../../tests/data/roborock-cache.json");

    fn config(dir: &Path) -> Config {
        let files = format!("{}:{}", dir.join("first").display(), dir.join("second").display());
        let mut cfg = Config::from_lookup(|key| match key {
            "ROBOROCK_CACHE_FILES" => Some(files.clone()),
            _ => None,
        })
        .unwrap();
        cfg.code_request_backoff = Duration::ZERO;
        cfg
    }

    fn account_secrets(cfg: &Config) -> FakeSecrets {
        FakeSecrets::with(&[
            (cfg.secrets.email.as_str(), "someone@example.com"),
            (cfg.secrets.password.as_str(), "hunter2"),
        ])
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn no_prompt(_: &str) -> Result<String, String> {
        panic!("prompt not expected")
    }

    #[test]
    fn cached_session_skips_login() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let second = dir.path().join("second");
        fs::write(&second, FIXTURE).unwrap();

        let cloud = FakeCloud::new(home_data(&[(11100845, "Kitchen"), (11100861, "Office")]));
        let secrets = FakeSecrets::default();
        let mut client_email = None;
        let written = refresh_home_data_cache(
            &cfg,
            &secrets,
            |email| {
                client_email = Some(email.to_string());
                &cloud
            },
            no_prompt,
        )
        .unwrap();

        assert_eq!(written, second);
        assert_eq!(client_email.as_deref(), Some("someone@example.com"));
        assert!(secrets.reads.borrow().is_empty());
        assert_eq!(cloud.pass_logins.get(), 0);
        assert_eq!(*cloud.home_tokens.borrow(), vec!["rr5f2c9a7b41e3d0:x7QmB2pLkR9sVw==".to_string()]);

        let doc = read(&second);
        assert_eq!(doc["base_url"], "https://euiot.roborock.com");
        assert_eq!(doc["user_data"]["nickname"], "someone");
        assert_eq!(doc["cache_data"]["network_info"]["abc"]["ip"], "10.0.1.150");
        assert_eq!(doc["cache_data"]["home_data"]["rooms"][1]["name"], "Office");
        assert!(!dir.path().join("first").exists());
    }

    #[test]
    fn fresh_login_writes_primary_file() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cloud = FakeCloud::new(home_data(&[(7, "Hall")])).login_with(Ok(user_data("fresh-token")));
        let secrets = account_secrets(&cfg);

        let written = refresh_home_data_cache(&cfg, &secrets, |_| &cloud, no_prompt).unwrap();

        assert_eq!(written, dir.path().join("first"));
        assert_eq!(cloud.pass_logins.get(), 1);
        assert_eq!(cloud.code_requests.get(), 0);
        let doc = read(&written);
        assert_eq!(doc["email"], "someone@example.com");
        assert_eq!(doc["user_data"]["token"], "fresh-token");
        assert_eq!(doc["cache_data"]["home_data"]["rooms"][0]["id"], 7);
    }

    #[test]
    fn two_step_login_retries_rate_limited_code_requests() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cloud = FakeCloud::new(home_data(&[]))
            .login_with(Err(RoborockClientError::TwoStepRequired("need two step validation".into())))
            .code_requests_answer(vec![
                Err(RoborockClientError::RateLimited("429".into())),
                Err(RoborockClientError::RateLimited("9002".into())),
                Ok(()),
            ]);
        let secrets = account_secrets(&cfg);
        let prompted = Cell::new(false);

        refresh_home_data_cache(&cfg, &secrets, |_| &cloud, |text| {
            assert_eq!(text, CODE_PROMPT);
            prompted.set(true);
            Ok(" 123456\n".to_string())
        })
        .unwrap();

        assert_eq!(cloud.code_requests.get(), 3);
        assert!(prompted.get());
        assert_eq!(*cloud.codes.borrow(), vec!["123456".to_string()]);
        assert_eq!(read(&dir.path().join("first"))["user_data"]["token"], "code-token");
    }

    #[test]
    fn rate_limit_gives_up_after_three_attempts() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cloud = FakeCloud::new(home_data(&[]))
            .login_with(Err(RoborockClientError::TwoStepRequired("two step".into())))
            .code_requests_answer(vec![
                Err(RoborockClientError::RateLimited("a".into())),
                Err(RoborockClientError::RateLimited("b".into())),
                Err(RoborockClientError::RateLimited("c".into())),
                Ok(()),
            ]);
        let secrets = account_secrets(&cfg);

        let err = refresh_home_data_cache(&cfg, &secrets, |_| &cloud, no_prompt).unwrap_err();

        assert_eq!(err, RATE_LIMIT_MESSAGE);
        assert_eq!(cloud.code_requests.get(), 3);
        assert!(cloud.home_tokens.borrow().is_empty());
        assert!(!dir.path().join("first").exists());
    }

    #[test]
    fn code_requests_wait_between_attempts_only() {
        let cloud = FakeCloud::new(home_data(&[])).code_requests_answer(vec![
            Err(RoborockClientError::RateLimited("a".into())),
            Err(RoborockClientError::RateLimited("b".into())),
            Err(RoborockClientError::RateLimited("c".into())),
        ]);
        let mut sleeps = Vec::new();

        let err = request_code_with_retry(&cloud, 3, Duration::from_millis(1500), |d| sleeps.push(d)).unwrap_err();

        assert_eq!(err, RATE_LIMIT_MESSAGE);
        assert_eq!(cloud.code_requests.get(), 3);
        assert_eq!(sleeps, vec![Duration::from_millis(1500); 2]);
    }

    #[test]
    fn code_request_success_stops_waiting() {
        let cloud = FakeCloud::new(home_data(&[]))
            .code_requests_answer(vec![Err(RoborockClientError::RateLimited("a".into())), Ok(())]);
        let mut sleeps = Vec::new();

        request_code_with_retry(&cloud, 3, Duration::from_millis(40), |d| sleeps.push(d)).unwrap();

        assert_eq!(cloud.code_requests.get(), 2);
        assert_eq!(sleeps, vec![Duration::from_millis(40)]);
    }

    #[test]
    fn configured_backoff_is_slept() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.code_request_backoff = Duration::from_millis(40);
        let cloud = FakeCloud::new(home_data(&[]))
            .login_with(Err(RoborockClientError::TwoStepRequired("two step".into())))
            .code_requests_answer(vec![
                Err(RoborockClientError::RateLimited("a".into())),
                Err(RoborockClientError::RateLimited("b".into())),
                Err(RoborockClientError::RateLimited("c".into())),
            ]);
        let secrets = account_secrets(&cfg);

        let started = std::time::Instant::now();
        let err = refresh_home_data_cache(&cfg, &secrets, |_| &cloud, no_prompt).unwrap_err();

        assert_eq!(err, RATE_LIMIT_MESSAGE);
        assert!(started.elapsed() >= Duration::from_millis(80), "{:?}", started.elapsed());
    }

    #[test]
    fn empty_code_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cloud = FakeCloud::new(home_data(&[]))
            .login_with(Err(RoborockClientError::TwoStepRequired("two step".into())));
        let secrets = account_secrets(&cfg);

        let err = refresh_home_data_cache(&cfg, &secrets, |_| &cloud, |_| Ok("  \n".to_string())).unwrap_err();

        assert_eq!(err, CODE_REQUIRED_MESSAGE);
        assert!(cloud.codes.borrow().is_empty());
    }

    #[test]
    fn other_login_errors_are_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cloud = FakeCloud::new(home_data(&[])).login_with(Err(RoborockClientError::Api {
            code: Some(2012),
            message: "wrong password".into(),
        }));
        let secrets = account_secrets(&cfg);

        let err = refresh_home_data_cache(&cfg, &secrets, |_| &cloud, no_prompt).unwrap_err();

        assert!(err.contains("wrong password"), "{}", err);
        assert_eq!(cloud.code_requests.get(), 0);
    }

    #[test]
    fn unparsable_cached_user_falls_back_to_login() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        fs::write(
            dir.path().join("first"),
            r#"{"email": "someone@example.com", "user_data": {"token": "t"}}"#,
        )
        .unwrap();
        let cloud = FakeCloud::new(home_data(&[])).login_with(Ok(user_data("fresh-token")));
        let secrets = account_secrets(&cfg);

        refresh_home_data_cache(&cfg, &secrets, |_| &cloud, no_prompt).unwrap();

        assert_eq!(cloud.pass_logins.get(), 1);
        assert_eq!(read(&dir.path().join("first"))["user_data"]["token"], "fresh-token");
    }

    #[test]
    fn missing_email_secret_stops_before_login() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cloud = FakeCloud::new(home_data(&[]));
        let secrets = FakeSecrets::with(&[(cfg.secrets.email.as_str(), "")]);

        let err = refresh_home_data_cache(&cfg, &secrets, |_| &cloud, no_prompt).unwrap_err();

        assert_eq!(err, "Empty email from 1Password.");
        assert_eq!(cloud.pass_logins.get(), 0);
    }
}
