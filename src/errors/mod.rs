mod kensho_error;

pub use kensho_error::{ErrorKind, KenshoError, RemoteFailure};
