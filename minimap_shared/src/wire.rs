//! Wire protocol.
//!
//! Text frames carrying JSON. Outbound frames wrap everything in a `data`
//! envelope whose shape tells the overlay what it holds:
//!
//! - reset: `{"data":{"reset":true}}`
//! - positions: `{"data":[{"id":1,"x":0.5,"y":0.5,"kind":"Cube"}]}`
//! - styles: `{"data":{"css":{".Cube":{"background-color":"rgb(255,0,0)"}}}}`
//!
//! Inbound frames are viewer clicks. Every field is optional at this layer;
//! deciding what is actionable belongs to the command decoder.
//!
//! There are no sequence numbers or acknowledgements. Ordering and delivery
//! are whatever the socket provides.

use serde::{Deserialize, Serialize};

use crate::{error::MinimapResult, style::Stylesheet};

/// Decimal places kept for normalized coordinates.
pub const COORD_DECIMALS: i32 = 3;

/// One minimap icon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub kind: String,
}

/// Payload of an outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerData {
    Reset { reset: bool },
    Css { css: Stylesheet },
    Units(Vec<Unit>),
}

/// Outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMsg {
    pub data: ServerData,
}

impl ServerMsg {
    pub fn reset() -> Self {
        Self {
            data: ServerData::Reset { reset: true },
        }
    }

    pub fn units(units: Vec<Unit>) -> Self {
        Self {
            data: ServerData::Units(units),
        }
    }

    pub fn css(css: Stylesheet) -> Self {
        Self {
            data: ServerData::Css { css },
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self.data, ServerData::Reset { reset: true })
    }
}

/// Raw inbound viewer message, as sent by the overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickMsg {
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub bubble_color: Option<String>,
    #[serde(default)]
    pub bubble_size: Option<f32>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Rounds a normalized coordinate for the wire.
pub fn round_coord(v: f32) -> f32 {
    let scale = 10f32.powi(COORD_DECIMALS);
    (v * scale).round() / scale
}

pub fn encode(msg: &ServerMsg) -> MinimapResult<String> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode_server(text: &str) -> MinimapResult<ServerMsg> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_click(text: &str) -> MinimapResult<ClickMsg> {
    Ok(serde_json::from_str(text)?)
}
