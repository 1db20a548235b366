//! Query object encoding and URL merging.

use std::fmt;

use reqwest::Url;

use crate::{FetchError, Result};

/// Value of a single query key.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryValue {
    /// Key is omitted entirely.
    Absent,
    Scalar(String),
    /// Key is repeated with a `[]` suffix, once per item.
    List(Vec<QueryValue>),
}

impl QueryValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_owned())
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<u64> for QueryValue {
    fn from(value: u64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

impl<T: Into<QueryValue>> From<Vec<T>> for QueryValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<QueryValue>, const N: usize> From<[T; N]> for QueryValue {
    fn from(values: [T; N]) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered query object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    entries: Vec<(String, QueryValue)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key. Keys are kept in insertion order.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattens into `params`, skipping absent values.
    pub fn append_to(&self, params: &mut SearchParams) {
        for (key, value) in &self.entries {
            append_value(params, key, value);
        }
    }
}

impl<K: Into<String>, V: Into<QueryValue>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

fn append_value(params: &mut SearchParams, key: &str, value: &QueryValue) {
    match value {
        QueryValue::Absent => {}
        QueryValue::Scalar(value) => params.append(key, value),
        QueryValue::List(items) => {
            let key = format!("{key}[]");
            for item in items {
                append_value(params, &key, item);
            }
        }
    }
}

/// Flat list of query pairs with the encoding backends commonly expect:
/// `application/x-www-form-urlencoded` values, `[` and `]` left literal in
/// keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchParams {
    pairs: Vec<(String, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", encode_key(key), encode_component(value))?;
        }
        Ok(())
    }
}

fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn encode_key(key: &str) -> String {
    encode_component(key)
        .replace("%5B", "[")
        .replace("%5D", "]")
}

/// Merges `query` into `target`. Pairs already on the URL come first; the
/// fragment is preserved.
pub fn append_query(target: &str, query: Option<&Query>) -> Result<Url> {
    let mut url = Url::parse(target)
        .map_err(|err| FetchError::config(format!("invalid URL '{target}': {err}")))?;

    let mut params = SearchParams::new();
    for (key, value) in url.query_pairs() {
        params.append(key, value);
    }
    if let Some(query) = query {
        query.append_to(&mut params);
    }

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&params.to_string()));
    }
    Ok(url)
}
