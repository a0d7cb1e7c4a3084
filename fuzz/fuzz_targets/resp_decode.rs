#![no_main]

use bytes::BytesMut;
use gordo_supervisor::resp::decode_reply;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // 완성된 프레임만 소비하고, 에러나 미완성 입력에서 패닉하지 않아야 한다
    loop {
        let before = buf.len();
        match decode_reply(&mut buf) {
            Ok(Some(_)) => assert!(buf.len() < before),
            Ok(None) => {
                assert_eq!(buf.len(), before);
                break;
            }
            Err(_) => break,
        }
    }
});
