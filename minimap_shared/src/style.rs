//! Style registry.
//!
//! Maps a minimap kind to its visual rule. The remote overlay applies the
//! resulting stylesheet to every icon carrying the kind as its class, so
//! rules are produced once per kind, never per entity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MinimapError, MinimapResult};

/// Selector -> rule body. Sorted so payloads are stable across cycles.
pub type Stylesheet = BTreeMap<String, Value>;

/// RGB color with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA` (alpha is accepted and dropped).
    pub fn from_hex(s: &str) -> MinimapResult<Self> {
        let invalid = || MinimapError::InvalidColor(s.to_string());
        let hex = s.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::from_u8(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Channels rounded to the nearest integer in `0..=255`.
    pub fn to_u8(self) -> [u8; 3] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b)]
    }

    /// CSS form, e.g. `rgb(255,0,0)`.
    pub fn css(self) -> String {
        let [r, g, b] = self.to_u8();
        format!("rgb({r},{g},{b})")
    }

    pub fn hex(self) -> String {
        let [r, g, b] = self.to_u8();
        format!("#{r:02X}{g:02X}{b:02X}")
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.css())
    }
}

impl TryFrom<String> for Rgb {
    type Error = MinimapError;

    fn try_from(s: String) -> MinimapResult<Self> {
        Self::from_hex(&s)
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> Self {
        c.hex()
    }
}

/// Configured per-kind override. Either field may be left unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleOverride {
    #[serde(default)]
    pub color: Option<Rgb>,
    #[serde(default)]
    pub css: Option<String>,
}

/// Splits `prop: value; prop2: value2` into ordered pairs. Fragments
/// without a colon are skipped.
pub fn parse_declarations(text: &str) -> Vec<(String, String)> {
    text.split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let (prop, value) = (prop.trim(), value.trim());
            (!prop.is_empty() && !value.is_empty()).then(|| (prop.to_string(), value.to_string()))
        })
        .collect()
}

fn keyframes(frames: &[(&str, &str, &str)]) -> Value {
    let mut body = serde_json::Map::new();
    for &(stop, prop, value) in frames {
        let mut frame = serde_json::Map::new();
        frame.insert(prop.to_string(), Value::String(value.to_string()));
        body.insert(stop.to_string(), Value::Object(frame));
    }
    Value::Object(body)
}

/// Animations the overlay can reference from extra style text.
fn default_global_rules() -> Stylesheet {
    let mut rules = Stylesheet::new();
    rules.insert(
        "@keyframes shimmer".into(),
        keyframes(&[
            ("0%", "background-color", "rgb(170,220,170)"),
            ("50%", "background-color", "rgb(0,209,224)"),
            ("100%", "background-color", "rgb(193,220,170)"),
        ]),
    );
    rules.insert(
        "@keyframes sizeFluctuation".into(),
        keyframes(&[("100%", "transform", "scale(2)")]),
    );
    rules.insert(
        "@keyframes doRotate".into(),
        keyframes(&[
            ("0%", "transform", "rotate(0deg)"),
            ("100%", "transform", "rotate(360deg)"),
        ]),
    );
    rules
}

/// Kind -> rule resolution plus the always-present global rules.
#[derive(Debug, Clone)]
pub struct StyleRegistry {
    overrides: BTreeMap<String, StyleOverride>,
    globals: Stylesheet,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            globals: default_global_rules(),
        }
    }
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: BTreeMap<String, StyleOverride>) -> Self {
        Self {
            overrides,
            ..Self::default()
        }
    }

    pub fn set_override(&mut self, kind: impl Into<String>, style: StyleOverride) {
        self.overrides.insert(kind.into(), style);
    }

    /// Adds or replaces a global rule (e.g. another `@keyframes`).
    pub fn set_global_rule(&mut self, selector: impl Into<String>, body: Value) {
        self.globals.insert(selector.into(), body);
    }

    /// CSS class selector used for a kind.
    pub fn selector(kind: &str) -> String {
        format!(".{kind}")
    }

    /// Builds the rule body for one kind. Configured overrides win over the
    /// entity's own color and style text.
    pub fn rule(&self, kind: &str, color: Rgb, extra_css: Option<&str>) -> Value {
        let over = self.overrides.get(kind);
        let color = over.and_then(|o| o.color).unwrap_or(color);

        let mut body = serde_json::Map::new();
        body.insert("background-color".into(), Value::String(color.css()));

        let extra = over.and_then(|o| o.css.as_deref()).or(extra_css);
        for (prop, value) in extra.map(parse_declarations).unwrap_or_default() {
            body.insert(prop, Value::String(value));
        }
        Value::Object(body)
    }

    /// Builds a stylesheet from `(kind, color, extra_css)` entries. The first
    /// entry of each kind decides its rule; later duplicates are ignored.
    pub fn stylesheet<'a, I>(&self, entries: I) -> Stylesheet
    where
        I: IntoIterator<Item = (&'a str, Rgb, Option<&'a str>)>,
    {
        let mut sheet = Stylesheet::new();
        for (kind, color, extra) in entries {
            let selector = Self::selector(kind);
            if sheet.contains_key(&selector) {
                continue;
            }
            sheet.insert(selector, self.rule(kind, color, extra));
        }
        for (selector, body) in &self.globals {
            sheet.insert(selector.clone(), body.clone());
        }
        sheet
    }
}
