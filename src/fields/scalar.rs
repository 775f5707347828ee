//! Scalar field types: options, casting and validation
//!
//! Casting never rejects a value that is merely out of range; it only fails
//! when no plausible value of the target type exists. Range, choice and
//! format checks happen in the `validate_*` functions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::error::CoercionFailure;
use crate::validation::ValidationFailure;

static ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]{16}$").unwrap());

static COLOR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9a-f]{6}$").unwrap());

static SHORT_COLOR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9a-f]{3}$").unwrap());

static DATA_URI_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:([a-z]+)/[a-z0-9.+-]+;base64,").unwrap());

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Tolerance used when checking step increments.
const STEP_EPSILON: f64 = 1e-8;

/// Options for string fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringOptions {
    /// Whether the empty string is a valid value
    pub blank: bool,
    /// Trim surrounding whitespace while cleaning
    pub trim: bool,
    /// Restrict values to this set
    pub choices: Option<Vec<String>>,
}

impl Default for StringOptions {
    fn default() -> Self {
        Self {
            blank: true,
            trim: true,
            choices: None,
        }
    }
}

/// Options for number fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Values are rounded to the nearest increment of `step`, counted from `min`
    pub step: Option<f64>,
    pub integer: bool,
    pub positive: bool,
    pub choices: Option<Vec<f64>>,
    /// Wrap values into `[0, 360)`
    pub normalize_angle: bool,
}

/// Broad media categories accepted by file path fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Audio,
    Video,
    Text,
}

impl FileCategory {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &[
                "apng", "avif", "bmp", "gif", "jpeg", "jpg", "png", "svg", "tiff", "webp",
            ],
            Self::Audio => &["aac", "flac", "m4a", "mid", "mp3", "ogg", "opus", "wav", "webm"],
            Self::Video => &["m4v", "mp4", "ogg", "webm"],
            Self::Text => &["csv", "json", "md", "pdf", "tsv", "txt", "xml", "yaml", "yml"],
        }
    }

    fn mime_prefix(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

/// Options for file path fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePathOptions {
    /// Allowed categories; empty means any extension
    pub categories: Vec<FileCategory>,
    /// Accept inline `data:` URIs of an allowed category
    pub base64: bool,
}

// ---------------------------------------------------------------------------
// Casting
// ---------------------------------------------------------------------------

pub(crate) fn cast_string(value: Value) -> Result<Value, CoercionFailure> {
    match value {
        Value::String(_) => Ok(value),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(CoercionFailure::new("string", &other)),
    }
}

pub(crate) fn cast_number(value: Value) -> Result<Value, CoercionFailure> {
    match &value {
        Value::Number(_) => Ok(value),
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(normalize_number(f)),
            _ => Err(CoercionFailure::new("number", &value)),
        },
        _ => Err(CoercionFailure::new("number", &value)),
    }
}

pub(crate) fn cast_boolean(value: Value) -> Result<Value, CoercionFailure> {
    match &value {
        Value::Bool(_) => Ok(value),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "" => Ok(Value::Null),
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(CoercionFailure::new("boolean", &value)),
        },
        _ => Err(CoercionFailure::new("boolean", &value)),
    }
}

pub(crate) fn cast_color(value: Value) -> Result<Value, CoercionFailure> {
    match &value {
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => {
            let css = s.trim().to_lowercase();
            let css = if SHORT_COLOR_REGEX.is_match(&css) {
                css.chars()
                    .skip(1)
                    .fold(String::from("#"), |mut out, c| {
                        out.push(c);
                        out.push(c);
                        out
                    })
            } else {
                css
            };
            Ok(Value::String(css))
        }
        Value::Number(n) => match n.as_u64() {
            Some(rgb) if rgb <= 0xFF_FFFF => Ok(Value::String(format!("#{rgb:06x}"))),
            _ => Err(CoercionFailure::new("color", &value)),
        },
        _ => Err(CoercionFailure::new("color", &value)),
    }
}

/// JSON fields store their payload as a serialized string.
pub(crate) fn cast_json(value: Value) -> Result<Value, CoercionFailure> {
    match value {
        Value::String(_) => Ok(value),
        other => serde_json::to_string(&other)
            .map(Value::String)
            .map_err(|_| CoercionFailure::new("JSON string", &other)),
    }
}

pub(crate) fn cast_object(value: Value) -> Result<Value, CoercionFailure> {
    match value {
        Value::Object(_) => Ok(value),
        other => Err(CoercionFailure::new("object", &other)),
    }
}

/// Accept a raw id, or a document-like record from which `_id` is extracted.
pub(crate) fn cast_document_id(
    value: Value,
    allow_document: bool,
) -> Result<Value, CoercionFailure> {
    match &value {
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(_) => Ok(value),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Object(record) if allow_document => match record.get("_id") {
            Some(Value::String(id)) => Ok(Value::String(id.clone())),
            Some(Value::Null) => Ok(Value::Null),
            _ => Err(CoercionFailure::new("document id", &value)),
        },
        _ => Err(CoercionFailure::new("document id", &value)),
    }
}

// ---------------------------------------------------------------------------
// Type-specific cleaning
// ---------------------------------------------------------------------------

/// Store integral values as JSON integers so `10` and `10.0` compare equal after cleaning.
pub(crate) fn normalize_number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub(crate) fn clean_string(value: Value, options: &StringOptions) -> Value {
    match value {
        Value::String(s) if options.trim => Value::String(s.trim().to_string()),
        other => other,
    }
}

pub(crate) fn clean_number(value: Value, options: &NumberOptions) -> Value {
    let Some(mut f) = value.as_f64() else {
        return value;
    };
    if options.normalize_angle {
        f = f.rem_euclid(360.0);
    }
    if options.integer {
        f = f.round();
    }
    if let Some(step) = options.step.filter(|s| *s > 0.0) {
        let base = options.min.unwrap_or(0.0);
        f = ((f - base) / step).round() * step + base;
    }
    normalize_number(f)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn fail(message: impl Into<String>, value: &Value) -> Result<(), ValidationFailure> {
    Err(ValidationFailure::new(message, Some(value.clone())))
}

fn format_number(f: f64) -> String {
    normalize_number(f).to_string()
}

pub(crate) fn validate_string(
    value: &Value,
    options: &StringOptions,
) -> Result<(), ValidationFailure> {
    let Value::String(s) = value else {
        return fail("must be a string", value);
    };
    if !options.blank && s.trim().is_empty() {
        return fail("may not be a blank string", value);
    }
    if let Some(choices) = &options.choices
        && !choices.iter().any(|c| c == s)
    {
        return fail(format!("\"{s}\" is not a valid choice"), value);
    }
    Ok(())
}

pub(crate) fn validate_number(
    value: &Value,
    options: &NumberOptions,
) -> Result<(), ValidationFailure> {
    let Some(f) = value.as_f64() else {
        return fail("must be a number", value);
    };
    if options.integer && f.fract() != 0.0 {
        return fail("must be an integer", value);
    }
    if options.positive && f <= 0.0 {
        return fail("must be a positive number", value);
    }
    if let Some(min) = options.min
        && f < min
    {
        return fail(format!("cannot be less than {}", format_number(min)), value);
    }
    if let Some(max) = options.max
        && f > max
    {
        return fail(format!("cannot be greater than {}", format_number(max)), value);
    }
    if let Some(step) = options.step.filter(|s| *s > 0.0) {
        let ratio = (f - options.min.unwrap_or(0.0)) / step;
        if (ratio - ratio.round()).abs() > STEP_EPSILON {
            return fail(format!("must be an increment of {}", format_number(step)), value);
        }
    }
    if let Some(choices) = &options.choices
        && !choices.iter().any(|c| (c - f).abs() < f64::EPSILON)
    {
        return fail(format!("{} is not a valid choice", format_number(f)), value);
    }
    Ok(())
}

pub(crate) fn validate_boolean(value: &Value) -> Result<(), ValidationFailure> {
    match value {
        Value::Bool(_) => Ok(()),
        _ => fail("must be a boolean", value),
    }
}

pub(crate) fn validate_color(value: &Value) -> Result<(), ValidationFailure> {
    match value {
        Value::String(s) if COLOR_REGEX.is_match(s) => Ok(()),
        _ => fail("must be a valid color string", value),
    }
}

pub(crate) fn validate_json(value: &Value) -> Result<(), ValidationFailure> {
    match value {
        Value::String(s) if serde_json::from_str::<Value>(s).is_ok() => Ok(()),
        _ => fail("must be a valid JSON string", value),
    }
}

pub(crate) fn validate_object(value: &Value) -> Result<(), ValidationFailure> {
    match value {
        Value::Object(_) => Ok(()),
        _ => fail("must be an object", value),
    }
}

pub(crate) fn validate_document_id(value: &Value) -> Result<(), ValidationFailure> {
    match value {
        Value::String(s) if is_valid_id(s) => Ok(()),
        _ => fail("must be a valid 16-character alphanumeric ID", value),
    }
}

pub(crate) fn validate_file_path(
    value: &Value,
    options: &FilePathOptions,
) -> Result<(), ValidationFailure> {
    let Value::String(path) = value else {
        return fail("must be a string", value);
    };
    if path.trim().is_empty() {
        return fail("may not be a blank string", value);
    }
    if options.categories.is_empty() {
        return Ok(());
    }

    if let Some(captures) = DATA_URI_REGEX.captures(path) {
        let mime = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if options.base64 && options.categories.iter().any(|c| c.mime_prefix() == mime) {
            return Ok(());
        }
        return fail("does not contain an allowed data URI", value);
    }

    let bare = path.split(['?', '#']).next().unwrap_or(path);
    let extension = bare
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if options
        .categories
        .iter()
        .any(|c| c.extensions().contains(&extension.as_str()))
    {
        Ok(())
    } else {
        let categories: Vec<String> = options
            .categories
            .iter()
            .map(|c| c.mime_prefix().to_string())
            .collect();
        fail(
            format!(
                "does not have a valid file extension for categories [{}]",
                categories.join(", ")
            ),
            value,
        )
    }
}

/// True for 16-character alphanumeric document ids.
pub fn is_valid_id(id: &str) -> bool {
    ID_REGEX.is_match(id)
}
