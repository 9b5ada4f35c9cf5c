//! Module-level entry points: API version, error predicates and opening
//! the database.

use std::rc::Rc;

use fdb_host::{Env, HostValue};
use fdb_native::{codes, select_api_version, ErrorCode, ErrorPredicate, NativeError, Network};

use crate::binding::database::Database;
use crate::bridge::Bridge;
use crate::delivery::Delivery;
use crate::error::BridgeError;
use crate::extract::{Extracted, Extractor};

/// Select the API version for the process. Repeating the same version is
/// allowed.
pub fn set_api_version(version: i32) -> Result<(), BridgeError> {
    select_api_version(version).map_err(|e| match e.code {
        codes::API_VERSION_ALREADY_SET => BridgeError::ApiVersionMismatch,
        _ => e.into(),
    })
}

/// `errorPredicate(test, code)`
pub fn error_predicate(test: i32, code: ErrorCode) -> Result<bool, BridgeError> {
    let predicate = ErrorPredicate::from_code(test)
        .ok_or_else(|| NativeError::new(codes::INVALID_OPTION_VALUE))?;
    Ok(fdb_native::error_predicate(predicate, code))
}

fn database_extractor(bridge: &Bridge) -> Extractor {
    let bridge = bridge.clone();
    Extractor::Custom(Box::new(move |_, future| match future.get_database() {
        Ok(db) => Extracted::Value(Some(HostValue::External(Rc::new(Database::new(bridge, db))))),
        Err(e) => e.into(),
    }))
}

fn unwrap_database(value: &HostValue) -> Result<Rc<Database>, BridgeError> {
    value
        .as_external::<Database>()
        .ok_or(BridgeError::Native(NativeError::new(codes::INTERNAL_ERROR)))
}

/// Open the database, blocking until the cluster answers. Bootstrap only.
pub fn open_database_sync(
    bridge: &Bridge,
    env: &mut Env,
    network: &Network,
) -> Result<Rc<Database>, BridgeError> {
    let value = bridge.block_on(env, network.create_database(), database_extractor(bridge))?;
    log::debug!("database opened synchronously");
    unwrap_database(&value)
}

/// Open the database through the bridge. Settles with the wrapped database.
pub fn open_database(
    bridge: &Bridge,
    network: &Network,
    callback: &HostValue,
) -> Result<HostValue, BridgeError> {
    let delivery = Delivery::from_arg(callback)?;
    bridge.deliver(network.create_database(), database_extractor(bridge), delivery)
}

/// Unwrap a database delivered by [`open_database`].
pub fn database_from_value(value: &HostValue) -> Result<Rc<Database>, BridgeError> {
    unwrap_database(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use fdb_host::EventLoop;
    use fdb_native::{NetworkConfig, MAX_API_VERSION};

    #[test]
    fn test_api_version_latch() {
        set_api_version(MAX_API_VERSION).unwrap();
        set_api_version(MAX_API_VERSION).unwrap();
        assert_eq!(
            set_api_version(MAX_API_VERSION - 10),
            Err(BridgeError::ApiVersionMismatch)
        );
        assert_eq!(
            BridgeError::ApiVersionMismatch.to_string(),
            "foundationdb already initialized with another API version"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert_eq!(error_predicate(50000, 1020), Ok(true));
        assert_eq!(error_predicate(50001, 1020), Ok(false));
        assert_eq!(error_predicate(50001, 1021), Ok(true));
        assert_eq!(error_predicate(50002, 1007), Ok(true));
        assert!(error_predicate(1, 1020).is_err());
    }

    #[test]
    fn test_open_database_both_ways() {
        let network = Network::start(&NetworkConfig::default()).unwrap();
        let mut event_loop = EventLoop::default();
        event_loop.env().register_error_class("FDBError");
        let bridge = Bridge::init(&mut event_loop, BridgeConfig::default());

        let db = open_database_sync(&bridge, event_loop.env(), &network).unwrap();
        assert!(!db.is_closed());

        let promise = open_database(&bridge, &network, &HostValue::Undefined).unwrap();
        event_loop.run().unwrap();
        let opened = promise.as_promise().unwrap().outcome().unwrap().unwrap();
        assert!(database_from_value(&opened).is_ok());

        assert!(matches!(
            open_database(&bridge, &network, &HostValue::Number(3.0)),
            Err(BridgeError::InvalidCallback)
        ));
        bridge.teardown();
        network.stop();
    }
}
