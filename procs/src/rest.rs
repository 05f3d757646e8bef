// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Response envelope for HTTP adapters sitting in front of a registry. The adapters
//! themselves (routing, query parsing, transport) live outside this crate; only the
//! envelope and the method→code map are part of the contract. See [`RestResponse`].

use crate::ProcError;
use serde::Serialize;
use serde_json::Value;
use strum_macros::{Display, EnumString};

/// HTTP-ish method an envelope answers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum RestMethod {
    #[strum(serialize = "GET")]
    Get,
    #[strum(serialize = "POST")]
    Post,
    #[strum(serialize = "PUT")]
    Put,
    #[strum(serialize = "DELETE")]
    Delete,
}

/// The uniform reply wrapper:
/// `{"code": <int>, "status": <string>, "message": <string>, "data": <obj|null>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestResponse {
    pub code: u16,
    pub status: String,
    pub message: String,
    pub data: Option<Value>,
}

impl RestResponse {
    /// Success envelope. `PUT` with no data yields `204`; every other success takes
    /// its method's success code.
    #[must_use]
    pub fn ok(method: RestMethod, data: Option<Value>) -> Self {
        let code = match method {
            RestMethod::Post => 201,
            RestMethod::Put if data.is_none() => 204,
            RestMethod::Get | RestMethod::Put | RestMethod::Delete => 200,
        };
        Self {
            code,
            status: "OK".into(),
            message: String::new(),
            data,
        }
    }

    /// Failure envelope following the method→code map: GET→{404, 304},
    /// POST→{404, 409}, PUT→404, DELETE→404; everything unmapped collapses to 404.
    #[must_use]
    pub fn from_error(method: RestMethod, error: ProcError) -> Self {
        let code = match (method, error) {
            (RestMethod::Get, ProcError::NotModified) => 304,
            (RestMethod::Post, ProcError::Conflict) => 409,
            _ => 404,
        };
        Self {
            code,
            status: "Error".into(),
            message: error.to_string(),
            data: None,
        }
    }
}
