//! AWS Signature Version 4 request signing.
//!
//! Signatures are time-bound, so credentials are resolved and requests signed
//! at send time. Nothing here caches a signature across requests.

pub mod credentials;
pub mod error;
pub mod signer;

pub use {
    credentials::{
        AwsCredentials, CredentialsProvider, EnvCredentialsProvider, SharedCredentialsProvider,
        StaticCredentialsProvider,
    },
    error::{Error, Result},
    signer::{SigV4Signer, derive_signing_key},
};
