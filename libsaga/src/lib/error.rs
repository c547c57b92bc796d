//! lib/error.rs
//!
//! This module contains the library-wide error taxonomy. Every operation of the library and of
//! the adaptors behind it fails with one of these kinds. The kinds are ranked by specificity:
//! when several concurrent units of execution fail, the aggregate operation reports the most
//! specific error among them, since it says the most about the actual cause.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::config;
use std::{error, fmt, io};


//-------------------------------------------------------------------------------------------- ERROR


#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A failure with no better classification.
    Generic(String),
    /// An operation did not complete within its allotted time.
    Timeout(String),
    /// The backend rejected the presented identity.
    AuthenticationFailed(String),
    /// The backend refused to vouch for the requested capability.
    AuthorizationFailed(String),
    /// The backend denied access to an entity.
    PermissionDenied(String),
    /// The operation is not valid in the current lifecycle state.
    IncorrectState(String),
    /// The named entity does not exist.
    DoesNotExist(String),
    /// The named entity already exists.
    AlreadyExists(String),
    /// A malformed input: invalid attribute name, value or type.
    BadParameter(String),
    /// A URL that could not be parsed or carries an unusable schema.
    IncorrectUrl(String),
    /// The operation is not implemented by the bound adaptor.
    NotImplemented(String),
}

impl Error {
    /// Ranks the error kinds from least to most specific certainty about the cause. Used to pick
    /// a representative error out of several concurrent failures.
    pub fn specificity(&self) -> u8 {
        match self {
            Error::Generic(_) => 0,
            Error::Timeout(_) => 1,
            Error::AuthenticationFailed(_) => 2,
            Error::AuthorizationFailed(_) => 3,
            Error::PermissionDenied(_) => 4,
            Error::IncorrectState(_) => 5,
            Error::DoesNotExist(_) => 6,
            Error::AlreadyExists(_) => 7,
            Error::BadParameter(_) => 8,
            Error::IncorrectUrl(_) => 9,
            Error::NotImplemented(_) => 10,
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Generic(ref s) => write!(f, "An error occurred:\n{}", s),
            Error::Timeout(ref s) => write!(f, "The operation timed out:\n{}", s),
            Error::AuthenticationFailed(ref s) => write!(f, "Authentication failed:\n{}", s),
            Error::AuthorizationFailed(ref s) => write!(f, "Authorization failed:\n{}", s),
            Error::PermissionDenied(ref s) => write!(f, "Permission denied:\n{}", s),
            Error::IncorrectState(ref s) => write!(
                f,
                "The operation is not valid in the current state:\n{}",
                s
            ),
            Error::DoesNotExist(ref s) => write!(f, "The entity does not exist:\n{}", s),
            Error::AlreadyExists(ref s) => write!(f, "The entity already exists:\n{}", s),
            Error::BadParameter(ref s) => write!(f, "A parameter was malformed:\n{}", s),
            Error::IncorrectUrl(ref s) => write!(f, "The url was incorrect:\n{}", s),
            Error::NotImplemented(ref s) => write!(f, "The operation is not implemented:\n{}", s),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::IncorrectUrl(format!("{}", err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Generic(format!("{}", err))
    }
}

impl From<config::Error> for Error {
    fn from(err: config::Error) -> Error {
        match err {
            config::Error::Parsing(s) => Error::BadParameter(s),
            config::Error::Reading(s) => Error::Generic(s),
        }
    }
}


//-------------------------------------------------------------------------------------------- TESTS


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_specificity_ordering() {
        let errors = vec![
            Error::Generic("a".into()),
            Error::Timeout("a".into()),
            Error::IncorrectState("a".into()),
            Error::DoesNotExist("a".into()),
            Error::BadParameter("a".into()),
            Error::NotImplemented("a".into()),
        ];
        let ranks: Vec<u8> = errors.iter().map(Error::specificity).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_url_conversion() {
        let err: Error = url::Url::parse("::not a url::").unwrap_err().into();
        match err {
            Error::IncorrectUrl(_) => {}
            other => panic!("wrong kind: {:?}", other),
        }
    }
}
