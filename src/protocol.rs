//! Wire protocol (spec §4.5): line-delimited JSON requests and responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::WireError;

#[derive(Debug, Deserialize)]
pub struct Request {
  pub command: String,
  #[serde(default)]
  pub params: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Response {
  pub ok: bool,
  #[serde(skip_serializing_if = "Value::is_null")]
  pub data: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Response {
  pub fn success(data: Value) -> Self {
    Response {
      ok: true,
      data,
      message: None,
      error: None,
    }
  }

  pub fn failure(err: WireError) -> Self {
    Response {
      ok: false,
      data: json!({}),
      message: Some(err.message().to_string()),
      error: Some(err.tag().to_string()),
    }
  }

  pub fn to_line(&self) -> String {
    // Serialization of a plain Value tree never fails.
    let mut line = serde_json::to_string(self).expect("response serializes");
    line.push('\n');
    line
  }
}
