//! Vendor-specific behavior.
//!
//! A [`DatabaseProduct`] covers the things that differ between database
//! products: catalog access, how parameters are bound, which parameters
//! return cursors, and how error messages map to script lines. The
//! [`ProductRegistry`] picks one per connection target.

use crate::db::connection::Connection;
use crate::db::driver::{Cursor, Statement};
use crate::db::params::PlaceholderStyle;
use crate::error::{DbError, DbResult};
use crate::models::{NamedParameter, ParamKind, Value};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";
const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Severity of a described error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// An error or warning pinned to a line of the executed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    /// 1-based script line, when known
    pub line: Option<usize>,
    pub text: String,
}

/// Per-vendor strategy plugged into the engine.
#[async_trait::async_trait]
pub trait DatabaseProduct: Send + Sync {
    fn name(&self) -> &str;

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    async fn current_catalog(&self, connection: &Connection) -> DbResult<Option<String>> {
        connection.catalog().await
    }

    async fn set_catalog(&self, connection: &Connection, catalog: &str) -> DbResult<()> {
        connection.set_catalog(catalog).await
    }

    /// Bind one parameter at a 1-based ordinal, registering it as an output
    /// first when its direction requires.
    fn bind_parameter(
        &self,
        statement: &mut dyn Statement,
        parameter: &NamedParameter,
        ordinal: usize,
    ) -> DbResult<()> {
        if parameter.is_cursor() {
            return Err(DbError::unsupported(format!(
                "cursor parameter :{} on {}",
                parameter.name,
                self.name()
            )));
        }
        if parameter.is_output() {
            statement.register_output(ordinal, parameter.kind)?;
        }
        statement.bind(ordinal, convert_parameter(parameter)?)
    }

    /// Result cursor returned through an output parameter, for products
    /// that support them.
    async fn cursor_for(
        &self,
        _statement: &mut dyn Statement,
        _parameter: &NamedParameter,
        _ordinal: usize,
    ) -> DbResult<Option<Box<dyn Cursor>>> {
        Ok(None)
    }

    /// Turn an execution error into messages with script line numbers.
    fn describe_errors(&self, error: &DbError, line_offset: usize) -> Vec<Message> {
        let text = error.to_string();
        let line = extract_line_hint(&text).map(|line| line + line_offset);
        vec![Message {
            severity: Severity::Error,
            line,
            text,
        }]
    }
}

/// Convert a parameter's text value into the value bound for its kind.
///
/// Numbers that fail to parse bind as zero; dates that fail to parse are
/// rejected. Temporal kinds convert to typed values so that drivers bind
/// them as dates and times rather than text. A missing value binds the kind's default (empty string, zero,
/// or the current date/time).
pub fn convert_parameter(parameter: &NamedParameter) -> DbResult<Value> {
    let value = parameter.value.as_deref().map(str::trim);
    let format = parameter.format.as_deref().filter(|f| !f.is_empty());

    let converted = match parameter.kind {
        ParamKind::Integer => Value::Int(value.and_then(|v| v.parse().ok()).unwrap_or(0)),
        ParamKind::Decimal => Value::Float(value.and_then(|v| v.parse().ok()).unwrap_or(0.0)),
        ParamKind::String => Value::String(parameter.value.clone().unwrap_or_default()),
        ParamKind::Date => {
            let date = match value {
                Some(v) => NaiveDate::parse_from_str(v, format.unwrap_or(DEFAULT_DATE_FORMAT))
                    .map_err(|e| bad_value(parameter, e))?,
                None => Local::now().date_naive(),
            };
            Value::Date(date)
        }
        ParamKind::Time => {
            let time = match value {
                Some(v) => NaiveTime::parse_from_str(v, format.unwrap_or(DEFAULT_TIME_FORMAT))
                    .map_err(|e| bad_value(parameter, e))?,
                None => Local::now().time(),
            };
            Value::Time(time)
        }
        ParamKind::DateTime => {
            let datetime = match value {
                Some(v) => parse_datetime(v, format).map_err(|e| bad_value(parameter, e))?,
                None => Local::now().naive_local(),
            };
            Value::DateTime(datetime)
        }
        ParamKind::Cursor => {
            return Err(DbError::unsupported(format!(
                "cursor parameter :{} cannot be bound as input",
                parameter.name
            )));
        }
    };
    Ok(converted)
}

fn parse_datetime(value: &str, format: Option<&str>) -> Result<NaiveDateTime, chrono::ParseError> {
    match format {
        Some(f) => NaiveDateTime::parse_from_str(value, f),
        // Accept both the SQL and the ISO 8601 separator.
        None => NaiveDateTime::parse_from_str(value, DEFAULT_DATETIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")),
    }
}

fn bad_value(parameter: &NamedParameter, err: chrono::ParseError) -> DbError {
    DbError::invalid_input(format!(
        "Value {:?} for parameter :{} is not a valid {:?}: {}",
        parameter.value.as_deref().unwrap_or_default(),
        parameter.name,
        parameter.kind,
        err
    ))
}

/// Find a "line N" hint in a server error message.
fn extract_line_hint(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let pos = lower.find("line ")?;
    let digits: String = lower[pos + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Product used when nothing more specific matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProduct;

impl DatabaseProduct for DefaultProduct {
    fn name(&self) -> &str {
        "default"
    }
}

/// PostgreSQL: numbered placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresProduct;

impl DatabaseProduct for PostgresProduct {
    fn name(&self) -> &str {
        "postgresql"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }
}

struct ProductEntry {
    patterns: Vec<String>,
    product: Arc<dyn DatabaseProduct>,
}

/// Maps product-name patterns to products.
///
/// Patterns are case-insensitive globs where `*` matches any run of
/// characters; a pattern may list alternatives separated by commas.
/// Registration order decides ties. Resolutions are cached per target URL.
pub struct ProductRegistry {
    entries: Vec<ProductEntry>,
    default: Arc<dyn DatabaseProduct>,
    cache: RwLock<HashMap<String, Arc<dyn DatabaseProduct>>>,
}

impl std::fmt::Debug for ProductRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductRegistry")
            .field(
                "patterns",
                &self.entries.iter().map(|e| &e.patterns).collect::<Vec<_>>(),
            )
            .field("default", &self.default.name())
            .finish_non_exhaustive()
    }
}

impl Default for ProductRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DefaultProduct))
    }
}

impl ProductRegistry {
    pub fn new(default: Arc<dyn DatabaseProduct>) -> Self {
        Self {
            entries: Vec::new(),
            default,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in products.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("postgres*", Arc::new(PostgresProduct));
        registry
    }

    pub fn register(&mut self, pattern: &str, product: Arc<dyn DatabaseProduct>) {
        let patterns = pattern
            .split(',')
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self.entries.push(ProductEntry { patterns, product });
    }

    pub fn default_product(&self) -> Arc<dyn DatabaseProduct> {
        Arc::clone(&self.default)
    }

    /// First product whose pattern matches `product_name`, or the default.
    pub fn find(&self, product_name: &str) -> Arc<dyn DatabaseProduct> {
        let name = product_name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.patterns.iter().any(|p| glob_match(p, &name)))
            .map(|entry| Arc::clone(&entry.product))
            .unwrap_or_else(|| self.default_product())
    }

    /// Resolve the product for a target URL, keyed by its scheme.
    pub fn resolve(&self, url: &str) -> Arc<dyn DatabaseProduct> {
        if let Some(product) = self
            .cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(url)
        {
            return Arc::clone(product);
        }

        let scheme = url.split(':').next().unwrap_or_default();
        let product = self.find(scheme);
        debug!(scheme = %scheme, product = %product.name(), "Resolved database product");
        self.cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(url.to_string(), Arc::clone(&product));
        product
    }
}

/// Glob match with `*` wildcards; both sides are already lowercase.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if text.len() < first.len() + last.len() || !text.starts_with(first) || !text.ends_with(last)
    {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    true
}
