//! The response envelope.
//!
//! Every enveloped response has the same JSON shape:
//!
//! ```json
//! { "uuid": "…", "data": <any> | null, "error": {"name", "message", "code"} | null }
//! ```
//!
//! Exactly one of `data` / `error` is non-null. [`emit`] is the single place a
//! [`Reply`] is classified and turned into bytes; it is called once per
//! request and its result is the whole response.

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::app_error::ApplicationError;
use crate::reply::{CsvFile, Reply, csv_file_name};
use crate::response::{ContentType, Response};

#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub uuid: &'a str,
    pub data: Option<Value>,
    pub error: Option<&'a ApplicationError>,
}

/// How a leaf wants successes rendered.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ResponseType {
    #[default]
    Json,
    /// Array-of-records successes become a CSV attachment.
    Csv { file_name: String, delimiter: String },
}

impl ResponseType {
    pub fn csv(file_name: impl Into<String>) -> Self {
        Self::Csv { file_name: csv_file_name(&file_name.into()), delimiter: ",".to_owned() }
    }
}

/// Turns `reply` into the response for request `uuid`.
pub fn emit(uuid: &str, reply: Reply) -> Response {
    match reply {
        Reply::Data(data) => {
            // a success with nothing to say still carries a non-null `data`
            let data = if data.is_null() { Value::Object(Map::new()) } else { data };
            envelope(uuid, StatusCode::OK, Some(data), None)
        }
        Reply::Error(e) => envelope(uuid, e.status(), None, Some(&e)),
        Reply::Csv(file) => csv(&file),
        Reply::Raw(value) => match serde_json::to_vec(&value) {
            Ok(bytes) => Response::json(bytes),
            Err(e) => emit(uuid, Reply::Error(e.into())),
        },
        Reply::WithCookie(cookie, inner) => {
            let mut res = emit(uuid, *inner);
            res.headers.push(("set-cookie".to_owned(), cookie.to_header_value()));
            res
        }
    }
}

/// [`emit`] after applying a leaf's [`ResponseType`].
pub fn emit_as(uuid: &str, reply: Reply, response_type: &ResponseType) -> Response {
    let ResponseType::Csv { file_name, delimiter } = response_type else {
        return emit(uuid, reply);
    };
    match reply {
        Reply::Data(value) => match CsvFile::from_value(value) {
            Ok(file) => csv(&file.file_name(file_name.as_str()).delimiter(delimiter.as_str())),
            Err(e) => csv_error(file_name, &e),
        },
        Reply::Error(e) => csv_error(file_name, &e),
        Reply::WithCookie(cookie, inner) => {
            let mut res = emit_as(uuid, *inner, response_type);
            res.headers.push(("set-cookie".to_owned(), cookie.to_header_value()));
            res
        }
        other => emit(uuid, other),
    }
}

fn envelope(
    uuid: &str,
    status: StatusCode,
    data: Option<Value>,
    error: Option<&ApplicationError>,
) -> Response {
    let body = Envelope { uuid, data, error };
    match serde_json::to_vec(&body) {
        Ok(bytes) => Response::builder().status(status).json(bytes),
        Err(e) => {
            error!(uuid, "envelope serialisation failed: {e}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .json(br#"{"uuid":null,"data":null,"error":{"name":"ServerError","message":"response could not be serialised","code":500}}"#.to_vec())
        }
    }
}

fn csv(file: &CsvFile) -> Response {
    Response::builder()
        .header("content-disposition", &attachment(file.name()))
        .bytes(ContentType::Csv, file.render().into_bytes())
}

/// A failed CSV download still downloads: a text attachment holding the message.
fn csv_error(file_name: &str, e: &ApplicationError) -> Response {
    let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);
    Response::builder()
        .status(e.status())
        .header("content-disposition", &attachment(&format!("{stem}-error.txt")))
        .text(e.message())
}

fn attachment(file_name: &str) -> String {
    let safe: String = file_name.chars().filter(|c| *c != '"' && !c.is_control()).collect();
    format!("attachment; filename=\"{safe}\"")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::reply::Cookie;

    fn body_json(res: &Response) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[test]
    fn success_is_wrapped_with_null_error() {
        let res = emit("req-1", Reply::Data(json!({"id": 7})));
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(body_json(&res), json!({"uuid": "req-1", "data": {"id": 7}, "error": null}));
    }

    #[test]
    fn error_uses_its_code_and_null_data() {
        let e = ApplicationError::with_code("Forbidden", "nope", 403);
        let res = emit("req-2", Reply::Error(e));
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(&res),
            json!({"uuid": "req-2", "data": null, "error": {"name": "Forbidden", "message": "nope", "code": 403}})
        );
    }

    #[test]
    fn null_success_still_has_non_null_data() {
        let res = emit("req-3", Reply::Data(Value::Null));
        assert_eq!(body_json(&res)["data"], json!({}));
    }

    #[test]
    fn raw_bypasses_envelope() {
        let res = emit("req-4", Reply::Raw(json!({"access_token": "t", "expires_in": 60})));
        assert_eq!(body_json(&res), json!({"access_token": "t", "expires_in": 60}));
    }

    #[test]
    fn csv_reply_is_an_attachment() {
        let file = CsvFile::from_value(json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}]))
            .unwrap()
            .file_name("numbers");
        let res = emit("req-5", Reply::Csv(file));
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("text/csv"));
        assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"numbers.csv\""));
        assert_eq!(res.body(), b"a,b\n1,2\n3,4");
    }

    #[test]
    fn csv_leaf_converts_records() {
        let res = emit_as(
            "req-6",
            Reply::Data(json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}])),
            &ResponseType::csv("report"),
        );
        assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"report.csv\""));
        assert_eq!(res.body(), b"a,b\n1,2\n3,4");
    }

    #[test]
    fn csv_leaf_error_switches_to_error_attachment() {
        let res = emit_as(
            "req-7",
            Reply::Error(ApplicationError::not_found("no such report")),
            &ResponseType::csv("report.csv"),
        );
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"report-error.txt\""));
        assert_eq!(res.body(), b"no such report");
    }

    #[test]
    fn csv_leaf_with_non_records_is_an_error_attachment() {
        let res = emit_as("req-8", Reply::Data(json!("oops")), &ResponseType::csv("x"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"x-error.txt\""));
    }

    #[test]
    fn cookie_is_added_alongside_body() {
        let reply = Reply::Data(json!({"ok": true})).with_cookie(Cookie::new("session", "abc").http_only(true));
        let res = emit("req-9", reply);
        assert_eq!(res.header("set-cookie"), Some("session=abc; HttpOnly"));
        assert_eq!(body_json(&res)["data"], json!({"ok": true}));
    }
}
