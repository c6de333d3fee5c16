//! Command handlers (C6): the verb table from spec §4.6, dispatching a
//! parsed [`Request`] onto [`Daemon`] methods and shaping the response.

use serde_json::json;

use crate::daemon::Daemon;
use crate::error::WireError;
use crate::protocol::{Request, Response};

fn param<'a>(req: &'a Request, name: &str) -> Result<&'a str, WireError> {
  req.params.get(name).map(String::as_str).ok_or(WireError::BadRequest)
}

pub fn dispatch(daemon: &Daemon, req: Request) -> Response {
  let result = match req.command.as_str() {
    "health" => Ok(daemon.health()),
    "unlock" => param(&req, "password").and_then(|p| daemon.unlock(p)).map(|()| json!({})),
    "lock" => daemon.lock().map(|()| json!({})),
    "list" => daemon.list().map(|keys| json!({ "keys": keys })),
    "get" => param(&req, "key")
      .and_then(|k| daemon.get(k))
      .map(|value| json!({ "value": value })),
    "add" => (|| {
      let key = param(&req, "key")?;
      let value = param(&req, "value")?;
      daemon.add(key, value)
    })()
    .map(|()| json!({})),
    "delete" => param(&req, "key").and_then(|k| daemon.delete(k)).map(|()| json!({})),
    "change_password" => (|| {
      let old = param(&req, "old_password")?;
      let new = param(&req, "new_password")?;
      daemon.change_password(old, new)
    })()
    .map(|()| json!({})),
    "schedule_clipboard_clear" => param(&req, "value")
      .and_then(|v| daemon.schedule_clipboard_clear(v))
      .map(|()| json!({})),
    "stop" => {
      daemon.stop();
      Ok(json!({}))
    }
    _ => Err(WireError::BadRequest),
  };

  match result {
    Ok(data) => Response::success(data),
    Err(e) => Response::failure(e),
  }
}
