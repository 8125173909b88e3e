//! Error and notice response messages.

use std::collections::HashMap;

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Parse error/notice fields from payload into a field-code-keyed map.
fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = HashMap::new();
    let mut data = payload;

    while !data.is_empty() && data[0] != 0 {
        let field_type = data[0];
        data = &data[1..];

        let (value, rest) = read_cstr(data)?;
        data = rest;

        fields.insert(field_type, value.to_string());
    }

    Ok(ServerError::new(fields))
}

/// ErrorResponse message - fatal error from server.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Parsed error fields
    pub fields: ServerError,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Convert to an Error.
    ///
    /// SQLSTATE `57014` (`query_canceled`) is the server's response to a
    /// `CancelRequest` delivered via [`crate::cancel`]; surface it as
    /// [`Error::Cancelled`] rather than a generic server error so callers can
    /// match on it without inspecting SQLSTATE themselves.
    pub fn into_error(self) -> Error {
        if self.fields.code() == "57014" {
            return Error::Cancelled;
        }
        Error::Server(self.fields)
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> &str {
        self.fields.code()
    }

    /// Get the primary message.
    pub fn message(&self) -> &str {
        self.fields.message()
    }

    /// Get the severity.
    pub fn severity(&self) -> &str {
        self.fields.severity_v_or_localized()
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    /// Parsed notice fields
    pub fields: ServerError,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> &str {
        self.fields.code()
    }

    /// Get the primary message.
    pub fn message(&self) -> &str {
        self.fields.message()
    }

    /// Get the severity.
    pub fn severity(&self) -> &str {
        self.fields.severity_v_or_localized()
    }
}
