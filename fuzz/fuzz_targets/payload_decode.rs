//! Payload parsers and the state reader on arbitrary input.

#![no_main]

use bytes::Bytes;
use framelock_core::{LineDecoder, StateReader};
use framelock_proto::{DataPackage, PackageAck, SizeHint, SyncPayload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let payload = Bytes::copy_from_slice(data);

    if let Ok(sync) = SyncPayload::parse(&payload) {
        assert!(sync.frame_number >= 0);
        assert_eq!(sync.state.len() + 4, data.len());
    }
    if let Ok(package) = DataPackage::parse(&payload) {
        assert!(package.package_id >= 0);
        assert_eq!(package.data.len() + 4, data.len());
    }
    let _ = PackageAck::parse(&payload);
    let _ = SizeHint::parse(&payload);

    let mut reader = StateReader::new(data);
    while reader.remaining() > 0 {
        let before = reader.position();
        let advanced = match data[before] % 4 {
            0 => reader.read_str().is_ok(),
            1 => reader.read_bytes().is_ok(),
            2 => reader.read_i64().is_ok(),
            _ => reader.read_bool().is_ok(),
        };
        if !advanced {
            break;
        }
        assert!(reader.position() > before);
    }

    let mut lines = LineDecoder::new(256);
    lines.extend(data);
    while let Ok(Some(_)) = lines.next_line() {}
});
