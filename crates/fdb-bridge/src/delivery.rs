use fdb_host::{HostFunction, HostValue};

use crate::error::BridgeError;

/// How a completed operation reports back, decided once when it is issued.
#[derive(Clone, Debug)]
pub enum Delivery {
    /// Settle a promise returned to the issuer.
    Promise,
    /// Call `callback(err, value)` exactly once.
    Callback(HostFunction),
}

impl Delivery {
    /// `undefined` or `null` selects a promise, a function selects callback
    /// style. Anything else is rejected before the operation is issued.
    pub fn from_arg(arg: &HostValue) -> Result<Delivery, BridgeError> {
        match arg {
            HostValue::Undefined | HostValue::Null => Ok(Delivery::Promise),
            HostValue::Function(f) => Ok(Delivery::Callback(f.clone())),
            _ => Err(BridgeError::InvalidCallback),
        }
    }

    pub fn is_promise(&self) -> bool {
        matches!(self, Delivery::Promise)
    }
}
