//! Extended query protocol backend messages.
//!
//! ParseComplete, BindComplete, CloseComplete, NoData and PortalSuspended have
//! empty payloads and are matched by tag alone.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_u32};
use crate::protocol::types::{Oid, U16BE};

/// ParameterDescription message header.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ParameterDescriptionHead {
    /// Number of parameters
    pub num_params: U16BE,
}

/// ParameterDescription message - describes parameters for a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    /// Parameter type OIDs
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (head, mut data) = read_bytes(payload, 2)?;
        let head = ParameterDescriptionHead::ref_from_bytes(head)
            .map_err(|e| Error::ProtocolSync(format!("ParameterDescription header: {e:?}")))?;

        let num_params = head.num_params.get() as usize;
        let mut param_oids = Vec::with_capacity(num_params);

        for _ in 0..num_params {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }

        Ok(Self { param_oids })
    }

    /// Get the number of parameters.
    pub fn len(&self) -> usize {
        self.param_oids.len()
    }

    /// Check if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.param_oids.is_empty()
    }

    /// Get parameter type OIDs.
    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_description() {
        let desc = ParameterDescription::parse(&[0, 2, 0, 0, 0, 25, 0, 0, 0, 23]).unwrap();
        assert_eq!(desc.oids(), &[25, 23]);
    }

    #[test]
    fn test_parameter_description_short() {
        assert!(ParameterDescription::parse(&[0, 2, 0, 0, 0, 25]).is_err());
        assert!(ParameterDescription::parse(&[0]).is_err());
    }
}
