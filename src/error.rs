use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! rewrite_error {
    ($class:expr, $msg:expr) => {
        crate::Error::Rewrite {
            class: $class.to_string(),
            message: $msg.to_string(),
        }
    };

    ($class:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Rewrite {
            class: $class.to_string(),
            message: format!($fmt, $($arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two families. Parse and rewrite failures mean the class file could not be
/// read or could not be reassembled after hook calls were spliced in. Resource exhaustion means
/// a limit was hit (constant pool size, nesting of pending allocations, re-entrant rewriting on
/// one thread). Both are fatal for the class being loaded: the gate never falls back to the
/// original bytes once it decided that a class must be instrumented.
///
/// A type that is excluded or not registered is not an error; the gate reports it as
/// [`crate::instrument::TransformOutcome::NoChange`].
///
/// # Examples
///
/// ```rust
/// use allocscope::{Error, classfile::ClassFile};
///
/// match ClassFile::parse(&[0xCA, 0xFE]) {
///     Ok(_) => unreachable!(),
///     Err(Error::OutOfBounds) => println!("truncated input"),
///     Err(Error::Malformed { message, .. }) => println!("malformed: {message}"),
///     Err(e) => println!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// Includes the source location where the malformation was detected for debugging
    /// purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The class parsed, but the instrumented form could not be assembled.
    ///
    /// Raised for allocation idioms the rewriter cannot bracket safely and for frame
    /// remapping failures.
    #[error("Failed to rewrite {class}: {message}")]
    Rewrite {
        /// Internal name of the class being rewritten
        class: String,
        /// What went wrong
        message: String,
    },

    /// A structural limit of the class file format or of the rewriter was exceeded.
    #[error("Limit exceeded for {what} - maximum is {limit}")]
    LimitExceeded {
        /// The resource that ran out
        what: &'static str,
        /// The limit that was hit
        limit: usize,
    },

    /// Recursion limit reached.
    ///
    /// Raised when a rewrite is re-entered on the same thread, which happens when a
    /// collaborator triggers loading of another class while a rewrite is in progress.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),
}

impl Error {
    /// Returns `true` for the resource-exhaustion family of failures.
    ///
    /// These are never retried; the class load fails just like for a parse failure, but a
    /// host may want to report them differently.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Error::LimitExceeded { .. } | Error::RecursionLimit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_macro_records_location() {
        let err = malformed_error!("bad tag {}", 42);
        match err {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad tag 42");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("Expected Malformed"),
        }
    }

    #[test]
    fn rewrite_macro_formats_class() {
        let err = rewrite_error!("demo/Widget", "branch at {} out of range", 12);
        assert_eq!(
            err.to_string(),
            "Failed to rewrite demo/Widget: branch at 12 out of range"
        );
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn exhaustion_family() {
        assert!(Error::RecursionLimit(1).is_resource_exhaustion());
        assert!(Error::LimitExceeded {
            what: "constant pool entries",
            limit: 65535
        }
        .is_resource_exhaustion());
        assert!(!Error::OutOfBounds.is_resource_exhaustion());
        assert!(!Error::Empty.is_resource_exhaustion());
    }
}
