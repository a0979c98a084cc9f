//! Errors and error-related utilities.

use std::{error, fmt, result};

/// The result type used throughout this library.
pub type Result<T> = result::Result<T, Box<dyn error::Error>>;

/// Invalid input: malformed files, manifests or batch data.
#[derive(Debug)]
pub struct InvalidInput(pub String);

/// Invalid command line argument or configuration value.
#[derive(Debug)]
pub struct InvalidArgument(pub String);

/// Something that was looked up by name or id does not exist.
#[derive(Debug)]
pub struct LookupFailed(pub String);

/// An operation is not allowed in the current state of the store.
#[derive(Debug)]
pub struct InvalidState(pub String);

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid input: {}", self.0)
    }
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid argument: {}", self.0)
    }
}

impl fmt::Display for LookupFailed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "not found: {}", self.0)
    }
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid state: {}", self.0)
    }
}

impl error::Error for InvalidInput {}

impl error::Error for InvalidArgument {}

impl error::Error for LookupFailed {}

impl error::Error for InvalidState {}

/// A helper for constructing [InvalidInput].
pub fn invalid_input(s: String) -> Box<dyn error::Error> {
    InvalidInput(s).into()
}

/// A helper for constructing [InvalidInput].
pub fn invalid_input_ref(s: &str) -> Box<dyn error::Error> {
    InvalidInput(s.to_owned()).into()
}

/// A helper for constructing [InvalidArgument].
pub fn invalid_argument(s: String) -> Box<dyn error::Error> {
    InvalidArgument(s).into()
}

/// A helper for constructing [InvalidArgument].
pub fn invalid_argument_ref(s: &str) -> Box<dyn error::Error> {
    InvalidArgument(s.to_owned()).into()
}

/// A helper for constructing [LookupFailed].
pub fn lookup_failed(s: String) -> Box<dyn error::Error> {
    LookupFailed(s).into()
}

/// A helper for constructing [InvalidState].
pub fn invalid_state(s: String) -> Box<dyn error::Error> {
    InvalidState(s).into()
}
