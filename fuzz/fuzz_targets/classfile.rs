#![no_main]

use libfuzzer_sys::fuzz_target;
use allocscope::classfile::ClassFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(class) = ClassFile::parse(data) {
        let _ = class.to_bytes();
    }
});
