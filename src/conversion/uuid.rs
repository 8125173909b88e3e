//! UUID type implementation (uuid crate).

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

use super::{FromWireValue, ToWireValue};

impl FromWireValue<'_> for uuid::Uuid {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::UUID {
            return Err(Error::Decode(format!("cannot decode oid {} as UUID", oid)));
        }
        let s = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::UUID {
            return Err(Error::Decode(format!("cannot decode oid {} as UUID", oid)));
        }
        uuid::Uuid::from_slice(bytes).map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))
    }
}

impl ToWireValue for uuid::Uuid {
    fn natural_oid(&self) -> Oid {
        oid::UUID
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match target_oid {
            oid::UUID => {
                buf.extend_from_slice(&16_i32.to_be_bytes());
                buf.extend_from_slice(self.as_bytes());
                Ok(())
            }
            _ => Err(Error::type_mismatch(self.natural_oid(), target_oid)),
        }
    }
}
