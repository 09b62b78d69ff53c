//! What a service hands back, before it becomes bytes.
//!
//! [`Reply`] is the closed set of response shapes. A service returns anything
//! implementing [`IntoReply`], usually `Result<T, ApplicationError>` with
//! `T: Serialize` wrapped in [`Json`], and [`emit`](crate::envelope::emit)
//! dispatches on the variant exactly once.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::app_error::ApplicationError;

// ── Reply ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Success, wrapped as `{uuid, data, error: null}`.
    Data(Value),
    /// Failure, wrapped as `{uuid, data: null, error}`.
    Error(ApplicationError),
    /// A CSV attachment.
    Csv(CsvFile),
    /// The value is the whole body, no envelope.
    Raw(Value),
    /// Another reply plus a `Set-Cookie` header.
    WithCookie(Cookie, Box<Reply>),
}

impl Reply {
    pub fn data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::Data(v),
            Err(e) => Self::Error(e.into()),
        }
    }

    pub fn raw<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::Raw(v),
            Err(e) => Self::Error(e.into()),
        }
    }

    /// Attach a cookie to this reply.
    pub fn with_cookie(self, cookie: Cookie) -> Self {
        Self::WithCookie(cookie, Box::new(self))
    }
}

// ── IntoReply ─────────────────────────────────────────────────────────────────

/// Conversion into a [`Reply`]. Implement it on your own types to return them
/// straight from a service.
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply { Reply::Data(self) }
}

impl IntoReply for ApplicationError {
    fn into_reply(self) -> Reply { Reply::Error(self) }
}

impl IntoReply for CsvFile {
    fn into_reply(self) -> Reply { Reply::Csv(self) }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply { Reply::Data(Value::Null) }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply { Reply::Data(Value::String(self)) }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply { Reply::Data(Value::from(self)) }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<ApplicationError>,
{
    fn into_reply(self) -> Reply {
        match self {
            Ok(v) => v.into_reply(),
            Err(e) => Reply::Error(e.into()),
        }
    }
}

/// Any serialisable value as envelope data.
#[derive(Clone, Debug)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Reply { Reply::data(&self.0) }
}

/// A serialisable value sent as the entire body, for endpoints that must match
/// an external API's shape exactly.
#[derive(Clone, Debug)]
pub struct NoEnvelope<T>(pub T);

impl<T: Serialize> IntoReply for NoEnvelope<T> {
    fn into_reply(self) -> Reply { Reply::raw(&self.0) }
}

/// A reply with a cookie set alongside it.
#[derive(Clone, Debug)]
pub struct WithCookie<T>(pub Cookie, pub T);

impl<T: IntoReply> IntoReply for WithCookie<T> {
    fn into_reply(self) -> Reply { self.1.into_reply().with_cookie(self.0) }
}

// ── CSV ───────────────────────────────────────────────────────────────────────

pub const DEFAULT_CSV_NAME: &str = "data.csv";

/// One CSV column: which record field to read and what to call it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CsvHeader {
    pub field: String,
    pub title: String,
}

impl CsvHeader {
    pub fn new(field: impl Into<String>, title: impl Into<String>) -> Self {
        Self { field: field.into(), title: title.into() }
    }
}

/// Records to be sent as a CSV attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct CsvFile {
    records: Vec<Map<String, Value>>,
    file_name: String,
    delimiter: String,
    headers: Option<Vec<CsvHeader>>,
}

impl CsvFile {
    pub fn new(records: Vec<Map<String, Value>>) -> Self {
        Self {
            records,
            file_name: DEFAULT_CSV_NAME.to_owned(),
            delimiter: ",".to_owned(),
            headers: None,
        }
    }

    /// Accepts an array of objects; anything else is a 500.
    pub fn from_value(value: Value) -> Result<Self, ApplicationError> {
        let Value::Array(items) = value else {
            return Err(ApplicationError::server_error("CSV data must be an array of records"));
        };
        let records = items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(ApplicationError::server_error("CSV records must be objects")),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self::new(records))
    }

    pub fn from_serialize<T: Serialize>(records: &[T]) -> Result<Self, ApplicationError> {
        Self::from_value(serde_json::to_value(records)?)
    }

    /// `.csv` is appended when missing.
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = csv_file_name(&name.into());
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Explicit columns. Without them the first record's keys are used, in
    /// the order that record lists them.
    pub fn headers(mut self, headers: Vec<CsvHeader>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn name(&self) -> &str { &self.file_name }

    /// Header line plus one line per record, joined by `\n`. Empty when there
    /// are no records.
    pub fn render(&self) -> String {
        let Some(first) = self.records.first() else {
            return String::new();
        };
        let columns: Vec<CsvHeader> = match &self.headers {
            Some(h) => h.clone(),
            None => first.keys().map(|k| CsvHeader::new(k.as_str(), k.as_str())).collect(),
        };

        let mut lines = Vec::with_capacity(self.records.len() + 1);
        lines.push(columns.iter().map(|c| c.title.as_str()).collect::<Vec<_>>().join(&self.delimiter));
        for record in &self.records {
            let row: Vec<String> = columns
                .iter()
                .map(|c| cell(record.get(&c.field)))
                .collect();
            lines.push(row.join(&self.delimiter));
        }
        lines.join("\n")
    }
}

/// Ensures `name` ends in `.csv`.
pub(crate) fn csv_file_name(name: &str) -> String {
    if name.ends_with(".csv") { name.to_owned() } else { format!("{name}.csv") }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items.iter().map(|v| cell(Some(v))).collect::<Vec<_>>().join(","),
        Some(other) => other.to_string(),
    }
}

// ── Cookie ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SameSite {
    None,
    #[default]
    Lax,
    Strict,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None   => f.write_str("None"),
            Self::Lax    => f.write_str("Lax"),
            Self::Strict => f.write_str("Strict"),
        }
    }
}

/// A cookie to set on the response.
#[derive(Clone, Debug, PartialEq)]
pub struct Cookie {
    name: String,
    content: String,
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<Duration>,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            domain: None,
            path: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// A cookie whose content is `value` serialised as JSON.
    pub fn json<T: Serialize>(name: impl Into<String>, value: &T) -> Result<Self, ApplicationError> {
        Ok(Self::new(name, serde_json::to_string(value)?))
    }

    /// Expires the cookie immediately.
    pub fn remove(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(Duration::ZERO)
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(age);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn content(&self) -> &str { &self.content }

    /// The `Set-Cookie` header value. Content is percent-encoded, so any
    /// string survives the round trip through [`Request::cookie`](crate::Request::cookie).
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, urlencoding::encode(&self.content));
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", age.as_secs()));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str(&format!("; SameSite={same_site}"));
        }
        out
    }
}
