#![no_main]

use libfuzzer_sys::fuzz_target;
use allocscope::{
    classfile::ClassFile,
    instrument::{Rewriter, RewriterConfig},
};

fuzz_target!(|data: &[u8]| {
    let rewriter = Rewriter::new(RewriterConfig::default());
    if let Ok(rewritten) = rewriter.rewrite(data, None) {
        // whatever the rewriter emits must parse again
        assert!(ClassFile::parse(&rewritten.bytes).is_ok());
    }
});
