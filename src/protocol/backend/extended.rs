//! Extended query protocol backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription message - describes parameters for a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_params, mut data) = read_i16(payload)?;
        let num_params = usize::try_from(num_params).map_err(|_e| {
            Error::Protocol(format!("ParameterDescription: negative count {num_params}"))
        })?;

        let mut param_oids = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }

        Ok(Self { param_oids })
    }

    pub fn len(&self) -> usize {
        self.param_oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.param_oids.is_empty()
    }

    /// Parameter type OIDs in placeholder order.
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
    fn parameter_oids() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&25_u32.to_be_bytes());
        assert_eq!(ParameterDescription::parse(&payload).unwrap().oids(), &[23, 25]);

        payload.truncate(5);
        assert!(ParameterDescription::parse(&payload).is_err());
    }
}
