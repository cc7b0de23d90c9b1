//! In-memory stand-ins for the secret store, the cloud and the vacuum.

use serde_json::{Map, json};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::client::{CloudApi, RoborockClientError};
use crate::local::error::LocalError;
use crate::local::connection::DeviceClient;
use crate::models::roborock::{HomeData, HomeRoom, RoomMapping, UserData};
use crate::secrets::{SecretError, SecretStore, non_empty};

#[derive(Default)]
pub struct FakeSecrets {
    values: HashMap<String, String>,
    pub reads: RefCell<Vec<String>>,
}

impl FakeSecrets {
    pub fn with(values: &[(&str, &str)]) -> Self {
        FakeSecrets {
            values: values.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            reads: RefCell::new(Vec::new()),
        }
    }
}

impl SecretStore for FakeSecrets {
    fn read(&self, reference: &str, label: &str) -> Result<String, SecretError> {
        self.reads.borrow_mut().push(label.to_string());
        match self.values.get(reference) {
            Some(v) => non_empty(label, v),
            None => Err(SecretError::Lookup {
                label: label.to_string(),
                stderr: format!("\"{}\" isn't an item", reference),
            }),
        }
    }
}

pub fn user_data(token: &str) -> UserData {
    serde_json::from_value(json!({
        "token": token,
        "rruid": "rr-test",
        "rriot": {"u": "u", "s": "s", "h": "h", "k": "k", "r": {"a": "https://api-eu.roborock.com"}}
    }))
    .expect("valid user data")
}

pub fn home_data(rooms: &[(i64, &str)]) -> HomeData {
    HomeData {
        id: 1996043,
        name: Some("My Home".to_string()),
        rooms: rooms
            .iter()
            .map(|(id, name)| HomeRoom {
                id: *id,
                name: Some(name.to_string()),
                extra: Map::new(),
            })
            .collect(),
        extra: Map::new(),
    }
}

pub struct FakeCloud {
    pub login_result: RefCell<Option<Result<UserData, RoborockClientError>>>,
    pub code_results: RefCell<VecDeque<Result<(), RoborockClientError>>>,
    pub home: HomeData,
    pub pass_logins: Cell<u32>,
    pub code_requests: Cell<u32>,
    pub codes: RefCell<Vec<String>>,
    pub home_tokens: RefCell<Vec<String>>,
}

impl FakeCloud {
    pub fn new(home: HomeData) -> Self {
        FakeCloud {
            login_result: RefCell::new(None),
            code_results: RefCell::new(VecDeque::new()),
            home,
            pass_logins: Cell::new(0),
            code_requests: Cell::new(0),
            codes: RefCell::new(Vec::new()),
            home_tokens: RefCell::new(Vec::new()),
        }
    }

    pub fn login_with(self, result: Result<UserData, RoborockClientError>) -> Self {
        *self.login_result.borrow_mut() = Some(result);
        self
    }

    pub fn code_requests_answer(self, results: Vec<Result<(), RoborockClientError>>) -> Self {
        *self.code_results.borrow_mut() = results.into();
        self
    }
}

impl CloudApi for FakeCloud {
    fn pass_login(&self, _password: &str) -> Result<UserData, RoborockClientError> {
        self.pass_logins.set(self.pass_logins.get() + 1);
        self.login_result
            .borrow_mut()
            .take()
            .unwrap_or_else(|| Err(RoborockClientError::Api { code: None, message: "unexpected login".into() }))
    }

    fn request_code(&self) -> Result<(), RoborockClientError> {
        self.code_requests.set(self.code_requests.get() + 1);
        self.code_results.borrow_mut().pop_front().unwrap_or(Ok(()))
    }

    fn code_login(&self, code: &str) -> Result<UserData, RoborockClientError> {
        self.codes.borrow_mut().push(code.to_string());
        Ok(user_data("code-token"))
    }

    fn get_home_data(&self, user: &UserData) -> Result<HomeData, RoborockClientError> {
        self.home_tokens.borrow_mut().push(user.token.clone());
        Ok(self.home.clone())
    }
}

/// Vacuum double; counters are shared so they survive the client being moved.
#[derive(Clone, Default)]
pub struct FakeDevice {
    pub mapping: Vec<RoomMapping>,
    pub fail: bool,
    pub requests: Rc<Cell<u32>>,
    pub disconnects: Rc<Cell<u32>>,
}

impl DeviceClient for FakeDevice {
    fn get_room_mapping(&mut self) -> Result<Vec<RoomMapping>, LocalError> {
        self.requests.set(self.requests.get() + 1);
        if self.fail {
            return Err(LocalError::Timeout(std::time::Duration::from_secs(15)));
        }
        Ok(self.mapping.clone())
    }

    fn disconnect(&mut self) -> Result<(), LocalError> {
        self.disconnects.set(self.disconnects.get() + 1);
        Ok(())
    }
}
