//! Fuzz target: persisted identity record validation and decoding.
//!
//! Arbitrary flash contents must either be rejected or decode into an
//! identity that encodes back into a record that decodes to the same
//! identity.
//!
//! cargo fuzz run fuzz_identity_record

#![no_main]

use devlink::identity::{self, DeviceIdentity, validate_record};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = validate_record(data) {
        assert_eq!(object.first(), Some(&b'{'));
        assert_eq!(object.last(), Some(&b'}'));
        assert!(object.len() <= data.len());
    }

    let defaults = DeviceIdentity::default();
    let Ok(decoded) = identity::decode(data, &defaults) else {
        return;
    };
    // Oversized fields are legal on flash but cannot be written back.
    let Ok(encoded) = identity::encode(&decoded) else {
        return;
    };
    let again = identity::decode(&encoded, &defaults).expect("re-encoded record must decode");
    assert_eq!(again, decoded);
});
