//! Key layout of the local key-value store.
//!
//! ```text
//! /tr/<trId>          -> TerrariumInfo (JSON)
//! /tr/<trId>/status   -> RunStatus (JSON string)
//! ```

use crate::types::TerrariumId;

/// Prefix shared by every terrarium key; used to list all terrariums.
pub const TERRARIUM_PREFIX: &str = "/tr/";

pub fn terrarium_key(id: &TerrariumId) -> String {
    format!("{}{}", TERRARIUM_PREFIX, id)
}

pub fn status_key(id: &TerrariumId) -> String {
    format!("{}{}/status", TERRARIUM_PREFIX, id)
}
